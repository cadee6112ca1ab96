//! Pointer repair benchmark.
//!
//! Old objects each reference one young object. A minor GC evacuates the
//! young space, after which every old reference must be forwarded.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use heap_replay::{
    AllocatedType, EventKind, GcInfo, GcKind, Heap, HeapReplayer, LabKind, ObjectShape, ReplayConfig, Space,
    SpaceType, Symbols, TraceEvent, NULL_PTR,
};

const PAIR: i32 = 1;
const PAIR_SIZE: u64 = 24;
const EDEN: u64 = 0x10_0000;
const SURVIVOR: u64 = 0x20_0000;
const OLD: u64 = 0x40_0000;
const SPACE_LENGTH: u64 = 0x10_0000;

fn alloc(addr: u64) -> TraceEvent {
    TraceEvent::Allocation {
        thread: Arc::from("main"),
        addr,
        type_id: PAIR,
        site: 0,
        shape: ObjectShape::Instance,
    }
}

fn linked_heap(objects: u64, workers: usize) -> HeapReplayer {
    let mut symbols = Symbols::new(true);
    symbols.add_type(AllocatedType::instance(PAIR, "Pair", 24, 2));
    let mut heap = Heap::new(symbols, ReplayConfig::new(workers));
    for (id, name, addr, ty) in [
        (0, "Eden", EDEN, SpaceType::Eden),
        (1, "Survivor", SURVIVOR, SpaceType::Survivor),
        (2, "Old", OLD, SpaceType::Old),
    ] {
        heap.add_space(Space::new(id, name, addr, SPACE_LENGTH).with_type(ty))
            .expect("spaces do not overlap");
    }

    let mut replayer = HeapReplayer::new(heap);
    let mut events = Vec::new();
    for i in 0..objects {
        events.push(alloc(EDEN + i * PAIR_SIZE));
        events.push(alloc(OLD + i * PAIR_SIZE));
    }
    events.push(TraceEvent::GcStart(GcInfo::start(GcKind::Minor, 0, 1, 10)));
    for i in 0..objects {
        events.push(TraceEvent::Pointers {
            thread: Arc::from("gc"),
            event: EventKind::GcPtrUpdatePostmove,
            to: OLD + i * PAIR_SIZE,
            pointers: vec![(EDEN + i * PAIR_SIZE) as i64, NULL_PTR],
        });
    }
    events.push(TraceEvent::GcEnd {
        info: GcInfo::end(GcKind::Minor, 0, 1, 20),
        failed: false,
    });
    replayer.replay(events, &mut ()).expect("setup trace is consistent");
    replayer
}

fn evacuation(objects: u64) -> Vec<TraceEvent> {
    let mut events = vec![
        TraceEvent::GcStart(GcInfo::start(GcKind::Minor, 0, 2, 30)),
        TraceEvent::GcSpaceCollected { space_id: 0 },
    ];
    for i in 0..objects {
        events.push(TraceEvent::Move {
            thread: Arc::from("gc"),
            event: EventKind::GcMoveFast,
            from: EDEN + i * PAIR_SIZE,
            to: SURVIVOR + i * PAIR_SIZE,
            lab_kind: LabKind::Plab,
            pointers: None,
        });
    }
    events.push(TraceEvent::GcEnd {
        info: GcInfo::end(GcKind::Minor, 0, 2, 40),
        failed: false,
    });
    events
}

fn bench_minor_gc_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("minor_gc_repair");
    let objects = 10_000;
    for workers in [1, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter_batched(
                || (linked_heap(objects, workers), evacuation(objects)),
                |(mut replayer, events)| {
                    let result = replayer.replay(events, &mut ());
                    black_box(result.is_ok());
                    replayer
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_minor_gc_repair);
criterion_main!(benches);
