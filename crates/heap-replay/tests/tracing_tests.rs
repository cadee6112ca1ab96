//! Integration tests for the tracing feature.
//!
//! These tests install a subscriber and replay whole GC cycles, so every
//! span and event of the replay is formatted at least once.

#![cfg(feature = "tracing")]

use std::sync::Arc;

use heap_replay::snapshot::IndexReader;
use heap_replay::tracing::internal::next_cycle_id;
use heap_replay::tracing::{CycleId, ReplayPhase};
use heap_replay::{
    AllocatedType, EventKind, GcInfo, GcKind, Heap, HeapReplayer, LabKind, ObjectInfo, ObjectShape, ReplayConfig,
    Space, SpaceType, Symbols, TraceEvent,
};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;

fn with_subscriber(f: impl FnOnce()) {
    let _guard = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_test_writer()
        .finish()
        .set_default();
    f();
}

fn heap() -> Heap {
    let mut symbols = Symbols::new(true);
    symbols.add_type(AllocatedType::instance(1, "Pair", 24, 2));
    let mut heap = Heap::new(symbols, ReplayConfig::checked());
    heap.add_space(Space::new(0, "Eden", 0x1000, 0x1000).with_type(SpaceType::Eden))
        .unwrap();
    heap.add_space(Space::new(1, "Old", 0x4000, 0x1000).with_type(SpaceType::Old))
        .unwrap();
    heap
}

#[test]
fn test_cycle_ids_increase() {
    let CycleId(first) = next_cycle_id();
    let CycleId(second) = next_cycle_id();
    assert!(second > first);
    assert_ne!(ReplayPhase::Flush, ReplayPhase::Repair);
}

#[test]
fn test_replay_with_subscriber() {
    with_subscriber(|| {
        let mut replayer = HeapReplayer::new(heap());
        let events = vec![
            TraceEvent::Allocation {
                thread: Arc::from("main"),
                addr: 0x1000,
                type_id: 1,
                site: 0,
                shape: ObjectShape::Instance,
            },
            TraceEvent::GcStart(GcInfo::start(GcKind::Minor, 0, 1, 10)),
            TraceEvent::GcSpaceCollected { space_id: 0 },
            TraceEvent::Move {
                thread: Arc::from("gc"),
                event: EventKind::GcMoveFast,
                from: 0x1000,
                to: 0x4000,
                lab_kind: LabKind::Plab,
                pointers: None,
            },
            TraceEvent::GcEnd {
                info: GcInfo::end(GcKind::Minor, 0, 1, 20),
                failed: false,
            },
        ];
        replayer.replay(events, &mut ()).unwrap();
        assert_eq!(replayer.heap().object_count(), 1);
    });
}

#[test]
fn test_failed_gc_with_subscriber() {
    with_subscriber(|| {
        let mut heap = heap();
        let pair = Arc::clone(heap.symbols().type_by_id(1).unwrap());
        heap.allocate(0x1000, ObjectInfo::instance(Arc::from("main"), pair, 0, EventKind::Allocation))
            .unwrap();
        heap.gc_start(GcInfo::start(GcKind::Minor, 0, 1, 10)).unwrap();
        heap.mark_space_for_collection(0).unwrap();
        heap.fail_space(0).unwrap();
        heap.gc_end(GcInfo::end(GcKind::Minor, 0, 1, 20), true).unwrap();
        assert!(heap.object(0x1000).is_some());
    });
}

#[test]
fn test_missing_dump_is_logged() {
    with_subscriber(|| {
        let index = IndexReader::default();
        let position = index.range_from_last_dump_to(10);
        assert!(!position.has_dump());
    });
}
