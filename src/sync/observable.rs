//! Single-value broadcast cell with per-subscriber blocking pull.
//!
//! A [`MutableObservable`] holds one current value. Reads are a lock-free
//! atomic load. Writes that change the value are delivered to every live
//! [`Subscription`], each of which owns a one-slot mailbox: a write that
//! lands before the subscriber has drained the previous one replaces it
//! (conflation, last write wins).
//!
//! Subscriptions are bound to the thread that created them and are `!Send`.
//! Polling parks that thread until a value is available.
//!
//! # Example
//!
//! ```ignore
//! let devices = MutableObservable::new(Vec::new());
//! let view = devices.observable();
//!
//! // consumer thread
//! let mut sub = view.subscribe(&cx);
//! let current = sub.next_potentially_distinct()?;
//!
//! // producer thread
//! devices.set(vec![device]);
//! ```
//!
//! # Locking
//!
//! The mutation lock is held only while comparing, storing and fanning out a
//! new value, and while the subscriber set changes. [`Observable::value`]
//! never takes it.
//!
//! Taking the lock is not an interruption point. Its critical sections never
//! block, so [`MutableObservable::set`] and [`MutableObservable::update`] take
//! no [`Cx`] and leave a pending interrupt for the caller's next wait.

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::cx::Cx;
use crate::error::Result;
use crate::tracing_compat::trace;

/// The subscriber set; zero or one subscriber needs no heap allocation.
type Subscribers<T> = SmallVec<[Arc<Mailbox<T>>; 1]>;

struct Shared<T> {
    value: ArcSwap<T>,
    subscribers: Mutex<Subscribers<T>>,
}

struct Mailbox<T> {
    pending: ArcSwapOption<T>,
    owner: Cx,
}

impl<T> Mailbox<T> {
    fn deliver(&self, value: &Arc<T>) {
        self.pending.store(Some(Arc::clone(value)));
        self.owner.unpark();
    }
}

/// Read-only view of an observable value.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Returns the most recently published value.
    #[must_use]
    pub fn value(&self) -> T {
        T::clone(&self.shared.value.load())
    }

    /// Subscribes the thread `cx` is bound to.
    ///
    /// The subscription's mailbox starts out holding the current value, so
    /// the first poll returns without waiting.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the one `cx` is bound to.
    #[must_use]
    pub fn subscribe(&self, cx: &Cx) -> Subscription<T> {
        cx.assert_current("Observable::subscribe");
        let mut subscribers = self.shared.subscribers.lock();
        let mailbox = Arc::new(Mailbox {
            pending: ArcSwapOption::new(Some(self.shared.value.load_full())),
            owner: cx.clone(),
        });
        subscribers.push(Arc::clone(&mailbox));
        trace!(
            subscriber = %cx.task_id(),
            subscribers = subscribers.len(),
            "observable subscribed"
        );
        drop(subscribers);
        Subscription {
            shared: Arc::clone(&self.shared),
            mailbox,
            closed: AtomicBool::new(false),
            _not_send: PhantomData,
        }
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.shared.value.load())
            .finish_non_exhaustive()
    }
}

/// Writable observable value.
pub struct MutableObservable<T> {
    view: Observable<T>,
}

impl<T> MutableObservable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates an observable holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            view: Observable {
                shared: Arc::new(Shared {
                    value: ArcSwap::from_pointee(initial),
                    subscribers: Mutex::new(SmallVec::new()),
                }),
            },
        }
    }

    /// Returns a read-only view sharing this value.
    #[must_use]
    pub fn observable(&self) -> Observable<T> {
        self.view.clone()
    }

    /// Returns the most recently published value.
    #[must_use]
    pub fn value(&self) -> T {
        self.view.value()
    }

    /// Subscribes the thread `cx` is bound to. See [`Observable::subscribe`].
    #[must_use]
    pub fn subscribe(&self, cx: &Cx) -> Subscription<T> {
        self.view.subscribe(cx)
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.view.subscriber_count()
    }

    /// Publishes `value` unless it equals the current one.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        let subscribers = self.view.shared.subscribers.lock();
        if **self.view.shared.value.load() == value {
            return false;
        }
        self.publish_locked(&subscribers, value);
        true
    }

    /// Replaces the value with `f(current)` under the mutation lock.
    ///
    /// Returns whether the value changed.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let subscribers = self.view.shared.subscribers.lock();
        let current = self.view.shared.value.load_full();
        let next = f(&current);
        if *current == next {
            return false;
        }
        self.publish_locked(&subscribers, next);
        true
    }

    fn publish_locked(&self, subscribers: &MutexGuard<'_, Subscribers<T>>, value: T) {
        let value = Arc::new(value);
        self.view.shared.value.store(Arc::clone(&value));
        for mailbox in subscribers.iter() {
            mailbox.deliver(&value);
        }
        trace!(subscribers = subscribers.len(), "observable published");
    }
}

impl<T> Clone for MutableObservable<T> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MutableObservable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableObservable")
            .field("value", &self.view.shared.value.load())
            .finish_non_exhaustive()
    }
}

impl<T> From<MutableObservable<T>> for Observable<T> {
    fn from(mutable: MutableObservable<T>) -> Self {
        mutable.view
    }
}

/// A thread-bound stream of values from an [`Observable`].
///
/// Closed on drop.
pub struct Subscription<T> {
    shared: Arc<Shared<T>>,
    mailbox: Arc<Mailbox<T>>,
    closed: AtomicBool,
    _not_send: PhantomData<*const ()>,
}

impl<T> Subscription<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Blocks until a value is pending, then takes and returns it.
    ///
    /// The returned value may equal one returned earlier if it was published
    /// again in between. Returns `Err(Interrupted)` if the owner thread is
    /// interrupted while waiting.
    ///
    /// # Panics
    ///
    /// Panics if the subscription is closed or polled off its owner thread.
    #[allow(clippy::result_large_err)]
    pub fn next_potentially_distinct(&mut self) -> Result<T> {
        self.mailbox
            .owner
            .assert_current("Subscription::next_potentially_distinct");
        assert!(!self.is_closed(), "polled a closed subscription");
        loop {
            if let Some(value) = self.mailbox.pending.swap(None) {
                return Ok(T::clone(&value));
            }
            self.mailbox.owner.checkpoint()?;
            self.mailbox.owner.park();
        }
    }

    /// Polls until a value different from `last` arrives.
    #[allow(clippy::result_large_err)]
    pub fn next_distinct_from(&mut self, last: &T) -> Result<T> {
        loop {
            let value = self.next_potentially_distinct()?;
            if value != *last {
                return Ok(value);
            }
        }
    }

    /// Calls `f` with every value that differs from the previous one.
    ///
    /// Only returns when interrupted.
    #[allow(clippy::result_large_err)]
    pub fn for_each_distinct(&mut self, mut f: impl FnMut(T)) -> Result<Infallible> {
        let mut last = self.next_potentially_distinct()?;
        f(last.clone());
        loop {
            let value = self.next_distinct_from(&last)?;
            last = value.clone();
            f(value);
        }
    }

    /// Calls `f` with every value taken from the mailbox.
    ///
    /// Only returns when interrupted.
    #[allow(clippy::result_large_err)]
    pub fn for_each_potentially_distinct(&mut self, mut f: impl FnMut(T)) -> Result<Infallible> {
        loop {
            f(self.next_potentially_distinct()?);
        }
    }

    /// Returns true if a value is waiting in the mailbox.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.mailbox.pending.load().is_some()
    }
}

impl<T> Subscription<T> {
    /// Returns true once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Unregisters the subscription. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain(|candidate| !Arc::ptr_eq(candidate, &self.mailbox));
        trace!(subscribers = subscribers.len(), "subscription closed");
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("owner", &self.mailbox.owner.task_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test, wait_until};
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn first_poll_returns_current_value() {
        init_test("first_poll_returns_current_value");
        let cx = Cx::root();
        let cell = MutableObservable::new(5);
        let mut sub = cell.subscribe(&cx);
        assert_eq!(sub.next_potentially_distinct().expect("value"), 5);
        assert!(!sub.has_pending());
        crate::test_complete!("first_poll_returns_current_value");
    }

    #[test]
    fn publishes_conflate_to_latest() {
        init_test("publishes_conflate_to_latest");
        let cx = Cx::root();
        let cell = MutableObservable::new(0);
        let mut sub = cell.subscribe(&cx);
        assert!(cell.set(1));
        assert!(cell.set(2));
        assert!(cell.set(3));
        let first = sub.next_potentially_distinct().expect("value");
        crate::assert_with_log!(first == 3, "conflated value", 3, first);
        assert!(!sub.has_pending());
        crate::test_complete!("publishes_conflate_to_latest");
    }

    #[test]
    fn equal_value_is_not_published() {
        init_test("equal_value_is_not_published");
        let cx = Cx::root();
        let cell = MutableObservable::new("a".to_string());
        let mut sub = cell.subscribe(&cx);
        assert_eq!(sub.next_potentially_distinct().expect("value"), "a");
        assert!(!cell.set("a".to_string()));
        assert!(!sub.has_pending());
        assert!(cell.update(|v| format!("{v}b")));
        assert_eq!(sub.next_potentially_distinct().expect("value"), "ab");
        crate::test_complete!("equal_value_is_not_published");
    }

    #[test]
    fn blocked_subscriber_wakes_on_publish() {
        init_test("blocked_subscriber_wakes_on_publish");
        let cell = MutableObservable::new(0_u32);
        let view = cell.observable();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let cx = Cx::root();
            let mut sub = view.subscribe(&cx);
            let initial = sub.next_potentially_distinct().expect("initial");
            tx.send(()).expect("signal");
            let next = sub.next_distinct_from(&initial).expect("next");
            (initial, next)
        });
        rx.recv().expect("subscribed");
        cell.set(9);
        let (initial, next) = handle.join().expect("join");
        assert_eq!((initial, next), (0, 9));
        crate::test_complete!("blocked_subscriber_wakes_on_publish");
    }

    #[test]
    fn interrupt_unblocks_poll() {
        init_test("interrupt_unblocks_poll");
        let cell = MutableObservable::new(1_u8);
        let view = cell.observable();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let cx = Cx::root();
            tx.send(cx.clone()).expect("send cx");
            let mut sub = view.subscribe(&cx);
            let _ = sub.next_potentially_distinct();
            sub.for_each_potentially_distinct(|_| {})
        });
        let remote = rx.recv().expect("cx");
        wait_until("subscriber registered", || cell.subscriber_count() == 1);
        remote.interrupt();
        let result = handle.join().expect("join");
        assert!(result.expect_err("interrupted").is_interrupted());
        wait_until("subscription dropped", || cell.subscriber_count() == 0);
        crate::test_complete!("interrupt_unblocks_poll");
    }

    #[test]
    fn publishing_ignores_pending_interrupt() {
        init_test("publishing_ignores_pending_interrupt");
        let cx = Cx::root();
        let cell = MutableObservable::new(0);
        let mut sub = cell.subscribe(&cx);
        cx.interrupt();
        assert!(cell.set(1));
        assert!(cell.update(|v| v + 1));
        assert!(cx.is_interrupted(), "interrupt stays pending");
        assert!(sub.next_potentially_distinct().is_ok_and(|v| v == 2));
        assert!(sub.next_potentially_distinct().expect_err("wait").is_interrupted());
        crate::test_complete!("publishing_ignores_pending_interrupt");
    }

    #[test]
    fn close_is_idempotent_and_unregisters() {
        init_test("close_is_idempotent_and_unregisters");
        let cx = Cx::root();
        let cell = MutableObservable::new(0);
        let first = cell.subscribe(&cx);
        let second = cell.subscribe(&cx);
        assert_eq!(cell.subscriber_count(), 2);
        first.close();
        first.close();
        assert!(first.is_closed());
        assert_eq!(cell.subscriber_count(), 1);
        drop(second);
        assert_eq!(cell.subscriber_count(), 0);
        crate::test_complete!("close_is_idempotent_and_unregisters");
    }

    #[test]
    #[should_panic(expected = "closed subscription")]
    fn polling_closed_subscription_panics() {
        let cx = Cx::root();
        let cell = MutableObservable::new(0);
        let mut sub = cell.subscribe(&cx);
        sub.close();
        let _ = sub.next_potentially_distinct();
    }

    #[test]
    fn for_each_distinct_skips_repeats() {
        init_test("for_each_distinct_skips_repeats");
        let cell = MutableObservable::new(0_i32);
        let view = cell.observable();
        let (cx_tx, cx_rx) = mpsc::channel();
        let (seen_tx, seen_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let cx = Cx::root();
            let mut sub = view.subscribe(&cx);
            cx_tx.send(cx.clone()).expect("send cx");
            sub.for_each_distinct(|v| {
                let _ = seen_tx.send(v);
            })
        });
        let remote = cx_rx.recv().expect("cx");
        assert_eq!(seen_rx.recv().expect("initial"), 0);
        cell.set(4);
        assert_eq!(seen_rx.recv().expect("four"), 4);
        remote.interrupt();
        assert!(handle.join().expect("join").is_err());
        crate::test_complete!("for_each_distinct_skips_repeats");
    }
}
