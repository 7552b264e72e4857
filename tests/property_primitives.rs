//! Property-based tests for scope trees, shared lifetimes and observables.
//!
//! # Properties
//!
//! - Cancelling a scope completes exactly its subtree, each node once
//! - A scope tree sealed bottom-up completes without a cause
//! - The lifetime retain count follows a counter model and never goes negative
//! - A subscriber only ever receives the latest value, and each publish once

#[macro_use]
mod common;

use common::*;
use proptest::prelude::*;
use schism::{CancelKind, CancelReason, Cx, MutableObservable, SharedLifetime, WorkScope};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Scope trees
// ============================================================================

/// Builds a tree where node `i + 1` hangs off node `parents[i] % (i + 1)`.
fn build_tree(parents: &[usize]) -> (Vec<WorkScope>, Vec<Option<usize>>) {
    let mut nodes = vec![WorkScope::new()];
    let mut links = vec![None];
    for (i, pick) in parents.iter().enumerate() {
        let parent = pick % (i + 1);
        nodes.push(nodes[parent].child_scope());
        links.push(Some(parent));
    }
    (nodes, links)
}

fn is_descendant(links: &[Option<usize>], mut node: usize, ancestor: usize) -> bool {
    loop {
        if node == ancestor {
            return true;
        }
        match links[node] {
            Some(parent) => node = parent,
            None => return false,
        }
    }
}

proptest! {
    #![proptest_config(test_proptest_config(64))]

    #[test]
    fn cancel_completes_exactly_the_subtree(
        parents in prop::collection::vec(any::<usize>(), 0..24),
        target in any::<usize>(),
    ) {
        init_test_logging();
        let (nodes, links) = build_tree(&parents);
        let target = target % nodes.len();

        let hits: Vec<Arc<AtomicUsize>> = nodes
            .iter()
            .map(|node| {
                let hits = Arc::new(AtomicUsize::new(0));
                let counter = Arc::clone(&hits);
                node.invoke_on_cancellation(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                hits
            })
            .collect();

        prop_assert!(nodes[target].cancel(CancelReason::user("prop")));
        prop_assert!(!nodes[target].cancel(CancelReason::timeout()));

        for (i, node) in nodes.iter().enumerate() {
            let count = hits[i].load(Ordering::SeqCst);
            if is_descendant(&links, i, target) {
                prop_assert_eq!(count, 1, "node {} cancelled once", i);
                prop_assert!(node.is_completed(), "idle subtree drains: node {}", i);
                let kind = node.cause().map(|c| c.kind());
                let expected = if i == target { CancelKind::User } else { CancelKind::ParentCancelled };
                prop_assert_eq!(kind, Some(expected));
            } else {
                prop_assert_eq!(count, 0, "node {} untouched", i);
                prop_assert!(node.is_active());
            }
        }
    }

    #[test]
    fn sealed_tree_completes_without_cause(
        parents in prop::collection::vec(any::<usize>(), 0..24),
    ) {
        init_test_logging();
        let (nodes, _) = build_tree(&parents);
        for node in nodes.iter().rev() {
            node.complete();
        }
        for node in &nodes {
            prop_assert!(node.is_completed());
            prop_assert!(node.cause().is_none());
            prop_assert_eq!(node.retain_count(), 0);
        }
    }

    #[test]
    fn sealing_root_first_waits_for_children(
        parents in prop::collection::vec(any::<usize>(), 1..16),
    ) {
        init_test_logging();
        let (nodes, _) = build_tree(&parents);
        prop_assert!(!nodes[0].complete(), "root with children only seals");
        for node in nodes.iter().skip(1) {
            prop_assert!(!nodes[0].is_completed());
            node.complete();
        }
        prop_assert!(nodes.iter().all(WorkScope::is_completed));
    }
}

// ============================================================================
// Shared lifetime
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum LifetimeOp {
    Retain,
    Release,
}

fn lifetime_op() -> impl Strategy<Value = LifetimeOp> {
    prop_oneof![3 => Just(LifetimeOp::Retain), 2 => Just(LifetimeOp::Release)]
}

proptest! {
    #![proptest_config(test_proptest_config(128))]

    #[test]
    fn lifetime_count_follows_model(ops in prop::collection::vec(lifetime_op(), 0..64)) {
        init_test_logging();
        let lifetime = SharedLifetime::new();
        let mut model = 0_u64;
        for op in ops {
            match op {
                LifetimeOp::Retain => {
                    prop_assert!(lifetime.retain().is_ok());
                    model += 1;
                }
                LifetimeOp::Release if model > 0 => {
                    lifetime.release();
                    model -= 1;
                }
                LifetimeOp::Release => {}
            }
            prop_assert_eq!(lifetime.retain_count(), model);
        }
        for _ in 0..model {
            lifetime.release();
        }
        prop_assert!(lifetime.end());
        prop_assert!(lifetime.retain().is_err());
        prop_assert_eq!(lifetime.retain_count(), 0);
    }
}

// ============================================================================
// Observable
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum ObservableOp {
    Publish(u8),
    Poll,
}

fn observable_op() -> impl Strategy<Value = ObservableOp> {
    prop_oneof![
        3 => (0_u8..4).prop_map(ObservableOp::Publish),
        2 => Just(ObservableOp::Poll),
    ]
}

proptest! {
    #![proptest_config(test_proptest_config(128))]

    #[test]
    fn subscriber_receives_latest_value_once(
        ops in prop::collection::vec(observable_op(), 0..48),
    ) {
        init_test_logging();
        let cx = Cx::root();
        let cell = MutableObservable::new(0_u8);
        let mut subscription = cell.subscribe(&cx);
        // The current value is pending at subscription time.
        let mut pending = true;

        for op in ops {
            match op {
                ObservableOp::Publish(value) => {
                    let changed = value != cell.value();
                    prop_assert_eq!(cell.set(value), changed);
                    pending |= changed;
                }
                ObservableOp::Poll if pending => {
                    let seen = subscription.next_potentially_distinct().expect("pending value");
                    prop_assert_eq!(seen, cell.value());
                    pending = false;
                }
                ObservableOp::Poll => {}
            }
            prop_assert_eq!(subscription.has_pending(), pending);
        }
    }
}
