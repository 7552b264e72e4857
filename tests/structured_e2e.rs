//! End-to-end behavior of the structured concurrency primitives.
//!
//! Run with: `cargo test --test structured_e2e`

#[macro_use]
mod common;

use common::*;
use schism::{
    launch_while_present, task_group, Actor, CancelKind, CancelReason, Cx, Error, ErrorKind,
    MutableObservable, SharedLifetime, WorkScope,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

#[test]
fn group_waits_for_siblings_of_failed_task() {
    init_test("group_waits_for_siblings_of_failed_task");
    let cx = Cx::root();
    let finished = Arc::new(AtomicUsize::new(0));

    let result = task_group(&cx, |group| {
        let (f1, f3) = (Arc::clone(&finished), Arc::clone(&finished));
        group.task(move |cx| {
            cx.sleep(Duration::from_millis(30))?;
            f1.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        group.task(|_| Err::<u32, _>(Error::user("boom")));
        group.task(move |cx| {
            cx.sleep(Duration::from_millis(30))?;
            f3.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        });
        Ok(())
    });

    let finished = finished.load(Ordering::SeqCst);
    assert_with_log!(finished == 2, "siblings finished", 2, finished);
    let err = result.expect_err("unjoined failure is reported");
    assert_eq!(err.kind(), ErrorKind::TaskFailed);
    assert!(err.message().is_some_and(|m| m.contains("boom")));
    test_complete!("group_waits_for_siblings_of_failed_task");
}

#[test]
fn joined_failure_is_reported_by_its_own_join() {
    init_test("joined_failure_is_reported_by_its_own_join");
    let cx = Cx::root();

    let values = task_group(&cx, |group| {
        let t1 = group.task(|cx| {
            cx.sleep(Duration::from_millis(10))?;
            Ok(1)
        });
        let t2 = group.task(|_| Err::<i32, _>(Error::user("boom")));
        let t3 = group.task(|_| Ok(3));

        let failure = t2.join().expect_err("task 2 fails");
        assert_eq!(failure.kind(), ErrorKind::TaskFailed);
        assert!(failure.message().is_some_and(|m| m.contains("boom")));
        assert!(t2.join().is_err(), "join is idempotent");
        Ok(vec![t1.join()?, t3.join()?])
    })
    .expect("group succeeds once the failure was observed");

    assert_eq!(values, vec![1, 3]);
    test_complete!("joined_failure_is_reported_by_its_own_join");
}

#[test]
fn failing_group_body_interrupts_running_tasks() {
    init_test("failing_group_body_interrupts_running_tasks");
    let cx = Cx::root();
    let interrupted = Arc::new(AtomicUsize::new(0));

    let result: schism::Result<()> = task_group(&cx, |group| {
        for _ in 0..3 {
            let interrupted = Arc::clone(&interrupted);
            group.task(move |cx| loop {
                if let Err(err) = cx.checkpoint() {
                    interrupted.fetch_add(1, Ordering::SeqCst);
                    return Err::<(), _>(err);
                }
                cx.park();
            });
        }
        assert_eq!(group.incomplete_count(), 3);
        Err(Error::user("body gave up"))
    });

    let err = result.expect_err("body error is the cause");
    assert_eq!(err.message(), Some("body gave up"));
    assert_eq!(interrupted.load(Ordering::SeqCst), 3);
    assert!(err.suppressed().is_empty(), "interruptions are not suppressed failures");
    test_complete!("failing_group_body_interrupts_running_tasks");
}

#[test]
fn subscriber_sees_only_latest_publish() {
    init_test("subscriber_sees_only_latest_publish");
    let cx = Cx::root();
    let cell = MutableObservable::new(0);
    let mut subscription = cell.subscribe(&cx);

    assert!(cell.set(1));
    assert!(cell.set(2));
    assert!(cell.set(3));

    let first = subscription.next_potentially_distinct().expect("value");
    assert_with_log!(first == 3, "conflated value", 3, first);
    assert!(!subscription.has_pending());
    test_complete!("subscriber_sees_only_latest_publish");
}

#[test]
fn end_waits_for_release_then_refuses_retains() {
    init_test("end_waits_for_release_then_refuses_retains");
    let lifetime = Arc::new(SharedLifetime::new());
    lifetime.retain().expect("retain");

    let ender = {
        let lifetime = Arc::clone(&lifetime);
        thread::spawn(move || lifetime.end())
    };
    wait_until("end observed", || lifetime.is_ended());
    thread::sleep(Duration::from_millis(20));
    assert!(!ender.is_finished(), "end blocks while retained");

    lifetime.release();
    assert!(ender.join().expect("ender thread"));
    let err = lifetime.retain().expect_err("ended");
    assert_eq!(err.kind(), ErrorKind::LifetimeEnded);
    assert!(!lifetime.end(), "only the first end reports true");
    test_complete!("end_waits_for_release_then_refuses_retains");
}

#[test]
fn device_list_drives_per_device_actors() {
    init_test("device_list_drives_per_device_actors");
    let devices = MutableObservable::new(Vec::<u32>::new());
    let view = devices.observable();
    let registry = MutableObservable::new(BTreeSet::<u32>::new());
    let active = registry.observable();
    let registry = Arc::new(registry);

    let (cx_tx, cx_rx) = mpsc::channel();
    let root = WorkScope::new();
    let manager_scope = root.clone();
    let manager = thread::spawn(move || {
        let cx = Cx::root();
        let _ = cx_tx.send(cx.clone());
        let mut subscription = view.subscribe(&cx);
        launch_while_present(&cx, &manager_scope, &mut subscription, move |cx, scope, id| {
            let actor = Actor::new(cx, scope, Vec::<u32>::new());
            actor.isolated(cx, move |log| {
                log.push(id);
                Ok(())
            })?;
            registry.update(|set| {
                let mut next = set.clone();
                next.insert(id);
                next
            });
            let outcome = loop {
                if let Err(err) = cx.checkpoint() {
                    break err;
                }
                cx.park();
            };
            registry.update(|set| {
                let mut next = set.clone();
                next.remove(&id);
                next
            });
            Err(outcome)
        })
    });
    let manager_cx = cx_rx.recv().expect("manager cx");

    test_section!("attach");
    devices.set(vec![7, 9]);
    wait_until("both devices active", || active.value().len() == 2);

    test_section!("detach");
    devices.set(vec![9]);
    wait_until("device 7 gone", || active.value() == BTreeSet::from([9]));

    test_section!("shutdown");
    root.cancel(CancelReason::shutdown());
    manager_cx.interrupt();
    let err = manager.join().expect("manager thread").expect_err("interrupted");
    assert!(err.is_interrupted());
    wait_until("root drained", || root.is_completed());
    assert!(active.value().is_empty());
    assert_eq!(root.cause().map(|c| c.kind()), Some(CancelKind::Shutdown));
    test_complete!("device_list_drives_per_device_actors");
}
