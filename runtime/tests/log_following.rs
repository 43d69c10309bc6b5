//! Integration tests for following the log through an `EventStream`.
//!
//! These drive a polling stream over the in-memory driver and check the
//! ordering, retry and skip behavior a subscriber observes.

#![allow(clippy::unwrap_used)] // Test code can use unwrap

use eventide_core::event::SerializedEvent;
use eventide_core::prelude::*;
use eventide_runtime::config::RuntimeConfig;
use eventide_runtime::event_stream::{EventStream, PollingSource};
use eventide_runtime::wake_up::WakeUpConfig;
use eventide_testing::InMemoryEventStore;
use eventide_testing::helpers::{collect_n, init_test_tracing};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Tick {
    n: u64,
}

impl PayloadType for Tick {
    const EVENT_TYPE: &'static str = "Tick.v1";
}

impl EventPayload for Tick {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn stream_id(&self) -> StreamId {
        StreamId::new("Clock", "main")
    }
}

fn ticks(range: std::ops::Range<u64>) -> Vec<Arc<dyn EventPayload>> {
    range
        .map(|n| Arc::new(Tick { n }) as Arc<dyn EventPayload>)
        .collect()
}

fn fast_config() -> RuntimeConfig {
    RuntimeConfig::default().with_wake_up(WakeUpConfig::new(
        Duration::from_millis(1),
        Duration::from_millis(10),
    ))
}

fn positions(events: &[Event]) -> Vec<u64> {
    events.iter().map(|e| e.position().value()).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn temporary_failure_between_batches_loses_and_repeats_nothing() {
    init_test_tracing();
    let store = Arc::new(InMemoryEventStore::new().with_max_batch_size(3));
    store.write_events(ticks(0..5)).await.unwrap();
    store.fail_read_from(Position::new(3), ReadFailure::Temporary("connection reset".into()));

    let stream = EventStream::new(Arc::new(PollingSource::from_config(store.clone(), &fast_config())));
    let mut events = stream.subscribe();
    stream.start();

    let seen = collect_n(&mut events, 5, Duration::from_secs(5)).await;
    assert_eq!(positions(&seen), vec![0, 1, 2, 3, 4]);

    let extra = collect_n(&mut events, 1, Duration::from_millis(100)).await;
    assert!(extra.is_empty());
}

#[tokio::test]
async fn events_written_later_are_delivered_in_order() {
    let store = Arc::new(InMemoryEventStore::new().with_max_batch_size(2));
    let stream = EventStream::new(Arc::new(PollingSource::from_config(store.clone(), &fast_config())));
    let mut events = stream.subscribe();
    stream.start();

    for chunk in [0..3, 3..4, 4..9] {
        store.write_events(ticks(chunk)).await.unwrap();
        stream.notifier().signal();
    }

    let seen = collect_n(&mut events, 9, Duration::from_secs(5)).await;
    assert_eq!(positions(&seen), (0..9).collect::<Vec<_>>());
    let payloads: Vec<u64> = seen
        .iter()
        .filter_map(|e| e.payload_as::<Tick>().map(|t| t.n))
        .collect();
    assert_eq!(payloads, (0..9).collect::<Vec<_>>());
}

#[tokio::test]
async fn undecodable_record_inside_a_batch_is_skipped() {
    let mut registry = PayloadRegistry::new();
    registry.register::<Tick>().unwrap();
    let store = Arc::new(InMemoryEventStore::with_serializer(Arc::new(registry)));

    store.write_events(ticks(0..1)).await.unwrap();
    store.append_raw(
        StreamId::new("Clock", "main"),
        SerializedEvent::new("Retired.v1".to_string(), vec![7], None),
    );
    store.write_events(ticks(2..3)).await.unwrap();

    let stream = EventStream::new(Arc::new(PollingSource::from_config(store.clone(), &fast_config())));
    let mut events = stream.subscribe();
    stream.start();

    let seen = collect_n(&mut events, 2, Duration::from_secs(5)).await;
    assert_eq!(positions(&seen), vec![0, 2]);
}

#[tokio::test]
async fn poisoned_position_is_skipped_after_permanent_failures() {
    let mut registry = PayloadRegistry::new();
    registry.register::<Tick>().unwrap();
    let store = Arc::new(InMemoryEventStore::with_serializer(Arc::new(registry)).with_max_batch_size(2));

    store.write_events(ticks(0..2)).await.unwrap();
    store.append_raw(
        StreamId::new("Clock", "main"),
        SerializedEvent::new("Retired.v1".to_string(), vec![7], None),
    );
    store.write_events(ticks(3..5)).await.unwrap();

    let config = fast_config().with_skip_after_permanent_failures(2);
    let stream = EventStream::new(Arc::new(PollingSource::from_config(store.clone(), &config)));
    let mut events = stream.subscribe();
    stream.start();

    let seen = collect_n(&mut events, 4, Duration::from_secs(5)).await;
    assert_eq!(positions(&seen), vec![0, 1, 3, 4]);
}

#[tokio::test]
async fn poisoned_position_blocks_without_a_skip_budget() {
    let mut registry = PayloadRegistry::new();
    registry.register::<Tick>().unwrap();
    let store = Arc::new(InMemoryEventStore::with_serializer(Arc::new(registry)).with_max_batch_size(2));

    store.write_events(ticks(0..2)).await.unwrap();
    store.append_raw(
        StreamId::new("Clock", "main"),
        SerializedEvent::new("Retired.v1".to_string(), vec![7], None),
    );
    store.write_events(ticks(3..5)).await.unwrap();

    let stream = EventStream::new(Arc::new(PollingSource::from_config(store.clone(), &fast_config())));
    let mut events = stream.subscribe();
    stream.start();

    let seen = collect_n(&mut events, 4, Duration::from_millis(300)).await;
    assert_eq!(positions(&seen), vec![0, 1]);
}
