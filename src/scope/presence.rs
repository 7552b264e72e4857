//! Running one scope per element of an observed collection.
//!
//! [`launch_while_present`] watches a [`Subscription`] to a collection-valued
//! observable and keeps exactly one launched scope alive for every element
//! currently present. A device list is the typical source: a scope per
//! attached device, cancelled when the device goes away.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::hash::Hash;
use std::sync::Arc;

use super::WorkScope;
use crate::cx::Cx;
use crate::error::Result;
use crate::sync::Subscription;
use crate::tracing_compat::debug;
use crate::types::CancelReason;

/// One element entering or leaving a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<E> {
    /// The element was not present before.
    Added(E),
    /// The element is no longer present.
    Removed(E),
}

impl<E> Change<E> {
    /// Returns the element that changed.
    pub const fn element(&self) -> &E {
        match self {
            Self::Added(element) | Self::Removed(element) => element,
        }
    }

    /// Consumes the change, returning its element.
    pub fn into_element(self) -> E {
        match self {
            Self::Added(element) | Self::Removed(element) => element,
        }
    }

    /// Returns true for [`Change::Added`].
    pub const fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }

    /// Returns true for [`Change::Removed`].
    pub const fn is_removed(&self) -> bool {
        matches!(self, Self::Removed(_))
    }
}

/// Diffs `snapshot` against `current` and updates `current` to match it.
///
/// Removals come first, then additions in snapshot order. Duplicates in the
/// snapshot count once.
pub fn additions_and_removals<E>(
    current: &mut HashSet<E>,
    snapshot: impl IntoIterator<Item = E>,
) -> Vec<Change<E>>
where
    E: Eq + Hash + Clone,
{
    let mut seen = HashSet::new();
    let incoming: Vec<E> = snapshot
        .into_iter()
        .filter(|element| seen.insert(element.clone()))
        .collect();

    let mut changes = Vec::new();
    current.retain(|element| {
        let keep = seen.contains(element);
        if !keep {
            changes.push(Change::Removed(element.clone()));
        }
        keep
    });
    for element in incoming {
        if current.insert(element.clone()) {
            changes.push(Change::Added(element));
        }
    }
    changes
}

/// Launches `body` in a child of `scope` for every element present in the
/// observed collection, cancelling that child when the element disappears.
///
/// An element that reappears before its previous scope has finished waits
/// for that scope before being launched again. Runs until the calling thread
/// is interrupted; all element scopes are then cancelled and
/// `Err(Interrupted)` is returned.
///
/// # Panics
///
/// Panics if called off the thread that owns `subscription`.
#[allow(clippy::result_large_err)]
pub fn launch_while_present<C, E, F>(
    cx: &Cx,
    scope: &WorkScope,
    subscription: &mut Subscription<C>,
    body: F,
) -> Result<Infallible>
where
    C: IntoIterator<Item = E> + Clone + PartialEq + Send + Sync + 'static,
    E: Eq + Hash + Clone + Send + 'static,
    F: Fn(&Cx, &WorkScope, E) -> Result<()> + Send + Sync + 'static,
{
    let body = Arc::new(body);
    let mut present = HashSet::new();
    let mut running: HashMap<E, WorkScope> = HashMap::new();

    let result = (|| -> Result<Infallible> {
        loop {
            let snapshot = subscription.next_potentially_distinct()?;
            running.retain(|_, element_scope| !element_scope.is_completed());

            for change in additions_and_removals(&mut present, snapshot) {
                match change {
                    Change::Added(element) => {
                        if let Some(previous) = running.remove(&element) {
                            previous.join(cx)?;
                        }
                        let body = Arc::clone(&body);
                        let launched_element = element.clone();
                        let element_scope = scope.launch(cx, move |cx, element_scope| {
                            body(cx, element_scope, launched_element)
                        });
                        debug!(scope_id = %element_scope.id(), "element present");
                        running.insert(element, element_scope);
                    }
                    Change::Removed(element) => {
                        if let Some(element_scope) = running.get(&element) {
                            debug!(scope_id = %element_scope.id(), "element removed");
                            element_scope.cancel(CancelReason::user("element removed"));
                        }
                    }
                }
            }
        }
    })();

    for element_scope in running.values() {
        element_scope.cancel(CancelReason::interrupted());
    }
    result
}
