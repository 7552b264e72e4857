//! Cold streams that run on the collecting thread.
//!
//! A [`BlockingFlow`] produces items only while it is being collected, and
//! produces them on the collecting thread, blocking that thread between
//! items when it has to wait. Collecting a flow twice runs it twice.
//!
//! Operators such as [`map`](BlockingFlow::map) and
//! [`flat_map`](BlockingFlow::flat_map) wrap a flow in a new one built on
//! [`transform`](BlockingFlow::transform). An [`Observable`] is a flow that
//! never ends by itself: it emits the current value and then every distinct
//! value published after it, until the collecting thread is interrupted.
//!
//! # Example
//!
//! ```ignore
//! let ids = devices.observable().map(|list| list.len());
//! ids.collect(&cx, |count| {
//!     println!("{count} devices");
//!     Ok(())
//! })?;
//! ```
//!
//! # Stopping
//!
//! Every emit returns a `Result`. An `Err` from the collector travels back
//! up through each operator to the source, which stops and returns it.

use std::fmt;
use std::marker::PhantomData;

use super::{MutableObservable, Observable};
use crate::cx::Cx;
use crate::error::Result;

/// Receives the items of a flow being collected.
///
/// Bound to the collecting thread.
pub struct Collector<'a, T> {
    cx: &'a Cx,
    sink: &'a mut dyn FnMut(T) -> Result<()>,
}

impl<'a, T> Collector<'a, T> {
    /// Returns the context of the collecting thread.
    #[must_use]
    pub const fn cx(&self) -> &'a Cx {
        self.cx
    }

    /// Passes `item` downstream.
    ///
    /// An `Err` means the collection is over; return it with `?`.
    ///
    /// # Panics
    ///
    /// Panics if called off the collecting thread.
    #[allow(clippy::result_large_err)]
    pub fn emit(&mut self, item: T) -> Result<()> {
        self.cx.assert_current("Collector::emit");
        (self.sink)(item)
    }
}

impl<T> fmt::Debug for Collector<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("collector", &self.cx.task_id())
            .finish_non_exhaustive()
    }
}

/// A cold stream of items, produced on the thread that collects it.
pub trait BlockingFlow {
    /// The type of the emitted items.
    type Item;

    /// Runs the flow, passing every item to `collector`.
    ///
    /// Returns `Ok` when a finite flow is exhausted, or the first error
    /// raised by the flow or by the collector.
    #[allow(clippy::result_large_err)]
    fn collect_into(&self, collector: &mut Collector<'_, Self::Item>) -> Result<()>;

    /// Runs the flow on the thread `cx` is bound to, calling `on_each` for
    /// every item.
    ///
    /// # Panics
    ///
    /// Panics if called off the thread `cx` is bound to.
    #[allow(clippy::result_large_err)]
    fn collect<F>(&self, cx: &Cx, mut on_each: F) -> Result<()>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> Result<()>,
    {
        cx.assert_current("BlockingFlow::collect");
        self.collect_into(&mut Collector {
            cx,
            sink: &mut on_each,
        })
    }

    /// Builds a flow that runs `body` for every item of this one; `body`
    /// emits zero or more items downstream.
    fn transform<U, F>(self, body: F) -> Transform<Self, F, U>
    where
        Self: Sized,
        F: Fn(&mut Collector<'_, U>, Self::Item) -> Result<()>,
    {
        Transform {
            upstream: self,
            body,
            _item: PhantomData,
        }
    }

    /// Emits `op(item)` for every item.
    fn map<U, F>(self, op: F) -> impl BlockingFlow<Item = U>
    where
        Self: Sized,
        F: Fn(Self::Item) -> U,
    {
        self.transform::<U, _>(move |out, item| out.emit(op(item)))
    }

    /// Emits the values `op` returns as `Some`.
    fn filter_map<U, F>(self, op: F) -> impl BlockingFlow<Item = U>
    where
        Self: Sized,
        F: Fn(Self::Item) -> Option<U>,
    {
        self.transform::<U, _>(move |out, item| match op(item) {
            Some(value) => out.emit(value),
            None => Ok(()),
        })
    }

    /// Emits the items that satisfy `predicate`.
    fn filter<P>(self, predicate: P) -> impl BlockingFlow<Item = Self::Item>
    where
        Self: Sized,
        P: Fn(&Self::Item) -> bool,
    {
        self.transform::<Self::Item, _>(move |out, item| {
            if predicate(&item) {
                out.emit(item)
            } else {
                Ok(())
            }
        })
    }

    /// Collects the flow `op` returns for each item, in turn.
    fn flat_map<G, F>(self, op: F) -> impl BlockingFlow<Item = G::Item>
    where
        Self: Sized,
        G: BlockingFlow,
        F: Fn(Self::Item) -> G,
    {
        self.transform::<G::Item, _>(move |out, item| op(item).collect_into(out))
    }

    /// Collects each inner flow, in turn.
    fn flatten(self) -> impl BlockingFlow<Item = <Self::Item as BlockingFlow>::Item>
    where
        Self: Sized,
        Self::Item: BlockingFlow,
    {
        self.transform::<<Self::Item as BlockingFlow>::Item, _>(|out, inner| {
            inner.collect_into(out)
        })
    }
}

impl<Fl: BlockingFlow + ?Sized> BlockingFlow for &Fl {
    type Item = Fl::Item;

    fn collect_into(&self, collector: &mut Collector<'_, Self::Item>) -> Result<()> {
        (**self).collect_into(collector)
    }
}

impl<Fl: BlockingFlow + ?Sized> BlockingFlow for Box<Fl> {
    type Item = Fl::Item;

    fn collect_into(&self, collector: &mut Collector<'_, Self::Item>) -> Result<()> {
        (**self).collect_into(collector)
    }
}

/// Creates a flow whose items are whatever `body` emits when collected.
#[must_use]
pub fn blocking_flow<T, F>(body: F) -> FromFn<T, F>
where
    F: Fn(&mut Collector<'_, T>) -> Result<()>,
{
    FromFn {
        body,
        _item: PhantomData,
    }
}

/// Flow returned by [`blocking_flow`].
#[must_use = "flows do nothing unless collected"]
pub struct FromFn<T, F> {
    body: F,
    _item: PhantomData<fn() -> T>,
}

impl<T, F> BlockingFlow for FromFn<T, F>
where
    F: Fn(&mut Collector<'_, T>) -> Result<()>,
{
    type Item = T;

    fn collect_into(&self, collector: &mut Collector<'_, T>) -> Result<()> {
        (self.body)(collector)
    }
}

impl<T, F> fmt::Debug for FromFn<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

/// Flow returned by [`BlockingFlow::transform`].
#[must_use = "flows do nothing unless collected"]
pub struct Transform<Fl, F, U> {
    upstream: Fl,
    body: F,
    _item: PhantomData<fn() -> U>,
}

impl<Fl, F, U> BlockingFlow for Transform<Fl, F, U>
where
    Fl: BlockingFlow,
    F: Fn(&mut Collector<'_, U>, Fl::Item) -> Result<()>,
{
    type Item = U;

    fn collect_into(&self, collector: &mut Collector<'_, U>) -> Result<()> {
        let cx = collector.cx;
        let mut forward = |item: Fl::Item| (self.body)(&mut *collector, item);
        self.upstream.collect_into(&mut Collector {
            cx,
            sink: &mut forward,
        })
    }
}

impl<Fl: fmt::Debug, F, U> fmt::Debug for Transform<Fl, F, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}

impl<T> BlockingFlow for Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Item = T;

    /// Subscribes the collecting thread and emits the current value, then
    /// each later value that differs from the last one emitted.
    ///
    /// Only ends with an error: the collector's, or `Interrupted`.
    fn collect_into(&self, collector: &mut Collector<'_, T>) -> Result<()> {
        let mut subscription = self.subscribe(collector.cx());
        let mut item = subscription.next_potentially_distinct()?;
        loop {
            collector.emit(item.clone())?;
            item = subscription.next_distinct_from(&item)?;
        }
    }
}

impl<T> BlockingFlow for MutableObservable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Item = T;

    fn collect_into(&self, collector: &mut Collector<'_, T>) -> Result<()> {
        self.observable().collect_into(collector)
    }
}
