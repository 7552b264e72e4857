//! Internal utilities.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// Replaces the state in `cell` with `next` if it is still `current`.
///
/// Returns whether the swap happened. `current` must be a snapshot obtained
/// from `cell` (identity, not equality, is compared).
pub(crate) fn compare_and_set<T>(cell: &ArcSwap<T>, current: &Arc<T>, next: T) -> bool {
    let previous = cell.compare_and_swap(current, Arc::new(next));
    Arc::ptr_eq(&previous, current)
}
