// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Listener lifetimes against the loopback engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracklib::{
    BridgeError, LoopbackEngine, ObservableMap, ObserverSet, SimilarityTransform,
    SubscriptionChannel,
};

fn setup() -> (Arc<LoopbackEngine>, SubscriptionChannel) {
    let engine = Arc::new(LoopbackEngine::new());
    let channel = SubscriptionChannel::new(engine.clone());
    (engine, channel)
}

fn counter(set: &ObserverSet<u32>) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&hits);
    set.subscribe(move |_| {
        inner.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    hits
}

#[test]
fn test_stale_listener_callback_after_unsubscribe() {
    let (engine, channel) = setup();
    let observers = Arc::new(ObserverSet::new());
    let hits = counter(&observers);

    let subscription = channel.subscribe("pose", observers).unwrap();
    engine.emit("pose", "1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(subscription.unsubscribe());
    let old = engine.removed_listeners().pop().unwrap();
    old.invoke("2");
    old.invoke("not even json");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failing_observer_does_not_suppress_others() {
    let (engine, channel) = setup();
    let observers = Arc::new(ObserverSet::<u32>::new());
    observers.subscribe(|value| anyhow::bail!("cannot handle {value}"));
    let hits = counter(&observers);

    let _subscription = channel.subscribe("pose", observers).unwrap();
    engine.emit("pose", "5");
    engine.emit("pose", "6");

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn test_reentrant_event_during_remove_is_not_delivered() {
    let (engine, channel) = setup();
    let observers = Arc::new(ObserverSet::new());
    let hits = counter(&observers);
    let subscription = channel.subscribe("pose", observers).unwrap();

    // Simulate the engine firing once more after the bridge started
    // unsubscribing, but from the same registration record.
    let record = engine.listeners("pose").pop().unwrap();
    assert!(subscription.unsubscribe());
    record.invoke("7");

    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_events_follow_stream_order() {
    let (engine, channel) = setup();
    let observers = Arc::new(ObserverSet::<u32>::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    observers.subscribe(move |value| {
        sink.lock().push(*value);
        Ok(())
    });
    let _subscription = channel.subscribe("pose", observers).unwrap();

    for value in 0..5 {
        engine.emit("pose", &value.to_string());
    }
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_refused_registration() {
    let (engine, channel) = setup();
    engine.set_reject_listeners(true);
    let result = channel.subscribe("pose", Arc::new(ObserverSet::<u32>::new()));
    assert!(matches!(result, Err(BridgeError::RegistrationFailed { .. })));
    assert_eq!(engine.listener_count(), 0);
}

#[test]
fn test_dropped_subscription_unsubscribes() {
    let (engine, channel) = setup();
    {
        let _subscription = channel
            .subscribe("pose", Arc::new(ObserverSet::<u32>::new()))
            .unwrap();
        assert_eq!(engine.listener_count(), 1);
    }
    assert_eq!(engine.listener_count(), 0);
    assert_eq!(engine.remove_listener_calls(), 1);
}

#[test]
fn test_destroyed_engine_is_not_contacted_on_unsubscribe() {
    let (engine, channel) = setup();
    let subscription = channel
        .subscribe("pose", Arc::new(ObserverSet::<u32>::new()))
        .unwrap();

    engine.destroy();
    assert!(!subscription.unsubscribe());
    assert_eq!(engine.remove_listener_calls(), 0);
}

#[test]
fn test_anchor_map_delivers_transforms() {
    let (engine, channel) = setup();
    let mut anchors = ObservableMap::<SimilarityTransform>::new();
    let latest = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&latest);
    anchors.get_or_create("anchor/42").subscribe(move |transform| {
        *sink.lock() = Some(*transform);
        Ok(())
    });
    anchors.synchronize(&channel);

    engine.emit(
        "anchor/42",
        r#"{"translation":[0.0,0.0,-1.0],"rotation":[0.0,0.0,0.0,1.0],"scale":1.0}"#,
    );
    let transform = latest.lock().unwrap();
    assert_eq!(transform.translation, [0.0, 0.0, -1.0]);

    anchors.clear();
    assert_eq!(engine.listener_count(), 0);
}
