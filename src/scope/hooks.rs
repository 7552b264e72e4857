//! Persistent hook chains stored inside immutable scope states.
//!
//! A scope state is replaced wholesale on every CAS, so the hooks it carries
//! are a shared cons list: registering a hook builds a new head that points
//! at the old list. Each hook sits in its own once-cell, which makes running
//! a chain idempotent even if two state snapshots share nodes.
//!
//! A cell that has run or been disarmed is spent. Spent cells are dropped
//! from the list whenever it has doubled since the last prune, so a
//! long-lived scope whose children come and go keeps a bounded chain.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::tracing_compat::error;
use crate::types::PanicPayload;

type Hook<A> = Box<dyn FnOnce(&A) + Send>;

/// A hook that runs at most once.
pub(crate) struct HookCell<A> {
    hook: Mutex<Option<Hook<A>>>,
}

impl<A> HookCell<A> {
    pub(crate) fn new(hook: impl FnOnce(&A) + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            hook: Mutex::new(Some(Box::new(hook))),
        })
    }

    /// Runs the hook if it has not run yet. Panics are caught and logged.
    pub(crate) fn fire(&self, arg: &A) {
        let Some(hook) = self.hook.lock().take() else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(arg))) {
            let payload = PanicPayload::from_any(payload.as_ref());
            error!(panic = %payload, "scope hook panicked");
        }
    }

    /// Drops the hook without running it.
    pub(crate) fn disarm(&self) {
        let hook = self.hook.lock().take();
        drop(hook);
    }

    fn is_spent(&self) -> bool {
        self.hook.lock().is_none()
    }
}

/// Chains shorter than this are never pruned.
const PRUNE_FLOOR: usize = 16;

struct HookNode<A> {
    cell: Arc<HookCell<A>>,
    next: Option<Arc<HookNode<A>>>,
}

/// Immutable list of hooks, newest first.
pub(crate) struct HookChain<A> {
    head: Option<Arc<HookNode<A>>>,
    len: usize,
    /// Length right after the last prune.
    pruned_len: usize,
}

impl<A> HookChain<A> {
    pub(crate) const fn empty() -> Self {
        Self {
            head: None,
            len: 0,
            pruned_len: 0,
        }
    }

    /// Returns a new chain with `cell` added after every existing hook.
    #[must_use]
    pub(crate) fn with(&self, cell: &Arc<HookCell<A>>) -> Self {
        let base = if self.len >= PRUNE_FLOOR && self.len >= 2 * self.pruned_len {
            self.pruned()
        } else {
            self.clone()
        };
        Self {
            head: Some(Arc::new(HookNode {
                cell: Arc::clone(cell),
                next: base.head,
            })),
            len: base.len + 1,
            pruned_len: base.pruned_len,
        }
    }

    /// Returns the chain without its spent cells, order preserved.
    fn pruned(&self) -> Self {
        let live: Vec<&Arc<HookCell<A>>> = self
            .cells_newest_first()
            .into_iter()
            .filter(|cell| !cell.is_spent())
            .collect();
        let mut head = None;
        for cell in live.iter().rev() {
            head = Some(Arc::new(HookNode {
                cell: Arc::clone(cell),
                next: head,
            }));
        }
        Self {
            head,
            len: live.len(),
            pruned_len: live.len(),
        }
    }

    fn cells_newest_first(&self) -> Vec<&Arc<HookCell<A>>> {
        let mut cells = Vec::with_capacity(self.len);
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            cells.push(&current.cell);
            node = current.next.as_deref();
        }
        cells
    }

    /// Runs every hook in registration order.
    pub(crate) fn fire(&self, arg: &A) {
        for cell in self.cells_newest_first().into_iter().rev() {
            cell.fire(arg);
        }
    }

    /// Number of nodes, spent ones included.
    pub(crate) const fn len(&self) -> usize {
        self.len
    }
}

impl<A> Clone for HookChain<A> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
            pruned_len: self.pruned_len,
        }
    }
}

impl<A> fmt::Debug for HookChain<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain").field("len", &self.len()).finish()
    }
}

impl<A> Drop for HookNode<A> {
    fn drop(&mut self) {
        // Unlink iteratively so long chains do not recurse on drop.
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::empty();
        for i in 0..3 {
            let log = Arc::clone(&log);
            chain = chain.with(&HookCell::new(move |_: &()| log.lock().push(i)));
        }
        assert_eq!(chain.len(), 3);
        chain.fire(&());
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn hooks_fire_once_across_shared_chains() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let base = HookChain::empty().with(&HookCell::new(move |_: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let extended = base.with(&HookCell::new(|_: &()| {}));
        base.fire(&());
        extended.fire(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_hook_does_not_stop_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let chain = HookChain::empty()
            .with(&HookCell::new(|_: &u8| panic!("hook failed")))
            .with(&HookCell::new(move |v: &u8| {
                counter.fetch_add(usize::from(*v), Ordering::SeqCst);
            }));
        chain.fire(&4);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn spent_cells_are_pruned_and_order_is_kept() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::empty();
        let mut cells = Vec::new();
        for i in 0..1_000 {
            let log = Arc::clone(&log);
            let cell = HookCell::new(move |_: &()| log.lock().push(i));
            chain = chain.with(&cell);
            cells.push(cell);
            if i % 10 != 0 {
                cells[i].disarm();
            }
        }
        let live = 100;
        assert!(chain.len() < 2 * live + PRUNE_FLOOR, "chain len {}", chain.len());

        chain.fire(&());
        let fired = log.lock().clone();
        let expected: Vec<usize> = (0..1_000).step_by(10).collect();
        assert_eq!(fired, expected);
    }

    #[test]
    fn disarmed_cell_never_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let cell = HookCell::new(move |_: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let chain = HookChain::empty().with(&cell);
        cell.disarm();
        chain.fire(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(cell.is_spent());
    }

    #[test]
    fn long_chain_drops_without_recursion() {
        let mut chain = HookChain::empty();
        for _ in 0..100_000 {
            chain = chain.with(&HookCell::new(|_: &()| {}));
        }
        drop(chain);
    }
}
