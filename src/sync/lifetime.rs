//! Reference-counted shutdown barrier.
//!
//! A [`SharedLifetime`] guards a resource that many threads may use at once
//! but that must eventually drain and close for good, such as a device handle
//! with transfers in flight. Users [`retain`](SharedLifetime::retain) before
//! touching the resource and [`release`](SharedLifetime::release) after;
//! [`end`](SharedLifetime::end) stops new retains immediately and blocks
//! until the in-flight ones are released.
//!
//! # Control Word
//!
//! All state lives in one `AtomicI64`. The low 63 bits hold the retain count;
//! the sign bit marks the lifetime as ending. Setting the sign bit keeps the
//! magnitude, so the release that drains the last retain observes
//! `ENDED | 1` and is the one that opens the end fence.
//!
//! # Example
//!
//! ```ignore
//! let lifetime = SharedLifetime::new();
//! lifetime.with_retained(|| submit_transfer())?;
//! assert!(lifetime.end());
//! assert!(lifetime.retain().is_err());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread::{self, Thread};

use crossbeam_queue::SegQueue;

use crate::error::{Error, Result};
use crate::tracing_compat::trace;

const ENDED: i64 = i64::MIN;
const MAGNITUDE: i64 = i64::MAX;

/// A retain-counted lifetime that can be ended exactly once.
pub struct SharedLifetime {
    word: AtomicI64,
    fence: EndFence,
}

impl SharedLifetime {
    /// Creates a live lifetime with no retains.
    #[must_use]
    pub fn new() -> Self {
        Self {
            word: AtomicI64::new(0),
            fence: EndFence::new(),
        }
    }

    /// Registers one more user of the lifetime.
    ///
    /// Fails with [`ErrorKind::LifetimeEnded`](crate::ErrorKind::LifetimeEnded)
    /// once [`end`](Self::end) has begun.
    ///
    /// # Panics
    ///
    /// Panics if the retain count would overflow.
    #[allow(clippy::result_large_err)]
    pub fn retain(&self) -> Result<()> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if current < 0 {
                return Err(Error::lifetime_ended());
            }
            assert!(current != MAGNITUDE, "shared lifetime retain count overflow");
            match self.word.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Drops one retain, opening the end fence if it was the last one after
    /// [`end`](Self::end) began.
    ///
    /// # Panics
    ///
    /// Panics if there is no outstanding retain.
    pub fn release(&self) {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            assert!(
                current & MAGNITUDE != 0,
                "shared lifetime released without a matching retain"
            );
            match self.word.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == ENDED | 1 {
            trace!("last retain released, opening end fence");
            self.fence.open();
        }
    }

    /// Ends the lifetime and waits for every outstanding retain to be released.
    ///
    /// Returns `true` for the one caller that performed the transition and
    /// `false` for everyone else. Every caller returns only after the retain
    /// count has drained to zero. The wait ignores interruption.
    pub fn end(&self) -> bool {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if current < 0 {
                self.fence.wait();
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                current | ENDED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        trace!(outstanding = current, "shared lifetime ending");
        if current == 0 {
            self.fence.open();
        }
        self.fence.wait();
        true
    }

    /// Runs `block` while holding a retain, releasing it on every exit path
    /// including unwinding.
    #[allow(clippy::result_large_err)]
    pub fn with_retained<R>(&self, block: impl FnOnce() -> R) -> Result<R> {
        let _guard = self.retained()?;
        Ok(block())
    }

    /// Retains the lifetime and returns a guard that releases it on drop.
    #[allow(clippy::result_large_err)]
    pub fn retained(&self) -> Result<Retained<'_>> {
        self.retain()?;
        Ok(Retained { lifetime: self })
    }

    /// Returns true once [`end`](Self::end) has begun.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.word.load(Ordering::Acquire) < 0
    }

    /// Returns the current number of outstanding retains.
    #[must_use]
    pub fn retain_count(&self) -> u64 {
        (self.word.load(Ordering::Acquire) & MAGNITUDE).unsigned_abs()
    }
}

impl Default for SharedLifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLifetime")
            .field("retain_count", &self.retain_count())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Guard holding one retain of a [`SharedLifetime`].
#[must_use = "the retain is released as soon as the guard is dropped"]
pub struct Retained<'a> {
    lifetime: &'a SharedLifetime,
}

impl Drop for Retained<'_> {
    fn drop(&mut self) {
        self.lifetime.release();
    }
}

impl fmt::Debug for Retained<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retained").finish_non_exhaustive()
    }
}

/// One-shot gate that threads park on until it opens.
struct EndFence {
    open: AtomicBool,
    waiters: SegQueue<Thread>,
}

impl EndFence {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            waiters: SegQueue::new(),
        }
    }

    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        while let Some(waiter) = self.waiters.pop() {
            waiter.unpark();
        }
    }

    fn wait(&self) {
        if self.open.load(Ordering::SeqCst) {
            return;
        }
        // Register before re-checking so an opener either sees us or we see it.
        self.waiters.push(thread::current());
        while !self.open.load(Ordering::SeqCst) {
            thread::park();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test, wait_until};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn end_without_retains_returns_immediately() {
        init_test("end_without_retains_returns_immediately");
        let lifetime = SharedLifetime::new();
        assert!(lifetime.end());
        assert!(lifetime.is_ended());
        assert!(!lifetime.end());
        crate::test_complete!("end_without_retains_returns_immediately");
    }

    #[test]
    fn retain_after_end_fails() {
        init_test("retain_after_end_fails");
        let lifetime = SharedLifetime::new();
        assert!(lifetime.end());
        let err = lifetime.retain().expect_err("ended");
        assert_eq!(err.kind(), crate::ErrorKind::LifetimeEnded);
        assert!(lifetime.with_retained(|| ()).is_err());
        crate::test_complete!("retain_after_end_fails");
    }

    #[test]
    fn end_waits_for_release() {
        init_test("end_waits_for_release");
        let lifetime = Arc::new(SharedLifetime::new());
        lifetime.retain().expect("retain");

        let ender = Arc::clone(&lifetime);
        let handle = thread::spawn(move || ender.end());

        wait_until("end to mark the lifetime", || lifetime.is_ended());
        thread::sleep(Duration::from_millis(10));
        assert!(!handle.is_finished());
        assert_eq!(lifetime.retain_count(), 1);

        lifetime.release();
        let was_ender = handle.join().expect("join");
        crate::assert_with_log!(was_ender, "first ender", true, was_ender);
        assert!(lifetime.retain().is_err());
        crate::test_complete!("end_waits_for_release");
    }

    #[test]
    fn concurrent_end_has_single_winner() {
        init_test("concurrent_end_has_single_winner");
        let lifetime = Arc::new(SharedLifetime::new());
        lifetime.retain().expect("retain");
        lifetime.retain().expect("retain");

        let winners = Arc::new(AtomicUsize::new(0));
        let returned = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lifetime = Arc::clone(&lifetime);
                let winners = Arc::clone(&winners);
                let returned = Arc::clone(&returned);
                thread::spawn(move || {
                    if lifetime.end() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    returned.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        wait_until("lifetime ended", || lifetime.is_ended());
        lifetime.release();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(returned.load(Ordering::SeqCst), 0);
        lifetime.release();

        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(returned.load(Ordering::SeqCst), 4);
        crate::test_complete!("concurrent_end_has_single_winner");
    }

    #[test]
    fn with_retained_releases_on_panic() {
        init_test("with_retained_releases_on_panic");
        let lifetime = SharedLifetime::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = lifetime.with_retained(|| panic!("inside"));
        }));
        assert!(result.is_err());
        assert_eq!(lifetime.retain_count(), 0);
        assert!(lifetime.end());
        crate::test_complete!("with_retained_releases_on_panic");
    }

    #[test]
    fn retained_guard_counts() {
        let lifetime = SharedLifetime::new();
        let first = lifetime.retained().expect("retain");
        let second = lifetime.retained().expect("retain");
        assert_eq!(lifetime.retain_count(), 2);
        drop(first);
        drop(second);
        assert_eq!(lifetime.retain_count(), 0);
    }

    #[test]
    #[should_panic(expected = "without a matching retain")]
    fn release_without_retain_panics() {
        SharedLifetime::new().release();
    }
}
