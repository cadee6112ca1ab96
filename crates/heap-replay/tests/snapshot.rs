//! Snapshot files, the GC index and the dump recorder.

use std::sync::Arc;

use heap_replay::snapshot::{
    DumpRecorder, GcLookup, HeapPosition, HeapReader, HeapWriter, IndexReader, INDEX_FILE,
};
use heap_replay::{
    validate_all_pointers, AllocatedType, DumpPolicy, EventKind, GcInfo, GcKind, Heap, HeapReplayer, LabKind,
    ObjectShape, ReplayConfig, RootPointer, SpaceMode, SpaceType, StackFrame, Symbols, ThreadInfo, TraceError,
    TraceEvent, NULL_PTR,
};

const PAIR: i32 = 1;
const INTS: i32 = 2;
const MIRROR: i32 = 3;
const EDEN: u64 = 0x1000;
const OLD: u64 = 0x4000;

fn symbols() -> Symbols {
    let mut symbols = Symbols::new(true);
    symbols.add_type(AllocatedType::instance(PAIR, "Pair", 24, 2));
    symbols.add_type(AllocatedType::array(INTS, "int[]", 4, true));
    symbols.add_type(AllocatedType::instance(MIRROR, "Class", 0, 0));
    symbols
}

fn thread(name: &str) -> Arc<str> {
    Arc::from(name)
}

fn alloc(addr: u64, type_id: i32, shape: ObjectShape) -> TraceEvent {
    TraceEvent::Allocation {
        thread: thread("main"),
        addr,
        type_id,
        site: 7,
        shape,
    }
}

fn gc(id: i16, kind: GcKind, time: i64, body: Vec<TraceEvent>) -> Vec<TraceEvent> {
    let mut events = vec![TraceEvent::GcStart(GcInfo::start(kind, 2, id, time))];
    events.extend(body);
    events.push(TraceEvent::GcEnd {
        info: GcInfo::end(kind, 2, id, time + 5),
        failed: false,
    });
    events
}

/// Two spaces (one unused slot in between), objects of every shape, a root
/// and a thread, after two GCs.
fn trace() -> Vec<TraceEvent> {
    let mut events = vec![
        TraceEvent::SpaceCreate {
            id: 0,
            name: "Eden".to_owned(),
            addr: EDEN,
            length: 0x1000,
        },
        TraceEvent::SpaceRedefine {
            id: 0,
            ty: Some(SpaceType::Eden),
            mode: None,
        },
        TraceEvent::SpaceCreate {
            id: 2,
            name: "Old".to_owned(),
            addr: OLD,
            length: 0x1000,
        },
        TraceEvent::SpaceRedefine {
            id: 2,
            ty: Some(SpaceType::Old),
            mode: Some(SpaceMode::Normal),
        },
        TraceEvent::ThreadAlive({
            let mut info = ThreadInfo::new(1, "main", "main#1");
            info.call_stack.push(StackFrame {
                class_id: 4,
                method_id: 9,
            });
            info
        }),
        TraceEvent::LabAllocation {
            thread: thread("main"),
            kind: LabKind::Tlab,
            addr: OLD,
            capacity: Some(0x100),
        },
        alloc(OLD, PAIR, ObjectShape::Instance),
        alloc(OLD + 24, INTS, ObjectShape::Array { length: 3 }),
        alloc(OLD + 56, MIRROR, ObjectShape::Mirror { size: 40 }),
        alloc(EDEN, PAIR, ObjectShape::Instance),
    ];
    events.extend(gc(
        1,
        GcKind::Minor,
        100,
        vec![
            TraceEvent::Pointers {
                thread: thread("gc"),
                event: EventKind::GcPtrUpdatePremove,
                to: OLD,
                pointers: vec![EDEN as i64, OLD as i64 + 24],
            },
            TraceEvent::Root(RootPointer::StaticField {
                addr: OLD,
                class_id: 4,
                offset: 16,
            }),
            TraceEvent::Root(RootPointer::ClassLoader {
                addr: OLD + 56,
                loader_name: "app".to_owned(),
            }),
        ],
    ));
    events.extend(gc(
        2,
        GcKind::Minor,
        200,
        vec![
            TraceEvent::GcSpaceCollected { space_id: 0 },
            TraceEvent::Move {
                thread: thread("gc"),
                event: EventKind::GcMoveFast,
                from: EDEN,
                to: OLD + 0x100,
                lab_kind: LabKind::Plab,
                pointers: None,
            },
            TraceEvent::Root(RootPointer::Other {
                addr: OLD,
                kind: heap_replay::RootKind::Universe,
            }),
        ],
    ));
    events
}

fn replayed() -> Heap {
    let mut replayer = HeapReplayer::new(Heap::new(symbols(), ReplayConfig::checked()));
    replayer.replay(trace(), &mut ()).unwrap();
    replayer.into_heap()
}

fn snapshot_bytes(heap: &Heap) -> Vec<u8> {
    let mut writer = HeapWriter::new(Vec::new());
    writer.write(heap).unwrap();
    writer.finish().unwrap()
}

fn assert_same_heap(expected: &Heap, actual: &Heap) {
    assert_eq!(actual.gc_info(), expected.gc_info());
    assert_eq!(actual.spaces().len(), expected.spaces().len());
    for (want, got) in expected.spaces().iter().zip(actual.spaces()) {
        assert_eq!(got.id(), want.id());
        assert_eq!(got.name(), want.name());
        assert_eq!((got.addr(), got.length()), (want.addr(), want.length()));
        assert_eq!(got.space_type(), want.space_type());
        assert_eq!(got.mode(), want.mode());
        let labs: Vec<_> = want.front().iter().zip(got.front().iter()).collect();
        assert_eq!(labs.len(), want.front().len());
        assert_eq!(got.front().len(), want.front().len());
        for (want_lab, got_lab) in labs {
            assert_eq!(got_lab.bottom(), want_lab.bottom());
            assert_eq!(got_lab.capacity(), want_lab.capacity());
            assert_eq!(got_lab.kind(), want_lab.kind());
            assert_eq!(got_lab.thread(), want_lab.thread());
            for ((want_addr, want_obj), (got_addr, got_obj)) in want_lab.objects().zip(got_lab.objects()) {
                assert_eq!(got_addr, want_addr);
                assert_eq!(got_obj.size(), want_obj.size());
                assert_eq!(got_obj.info().shape, want_obj.info().shape);
                assert_eq!(got_obj.info().site, want_obj.info().site);
                assert_eq!(got_obj.pointers(), want_obj.pointers());
            }
        }
    }
    assert_eq!(actual.roots(), expected.roots());
    assert_eq!(actual.threads(), expected.threads());
}

#[test]
fn test_snapshot_round_trip() {
    let heap = replayed();
    assert_eq!(heap.object(OLD).unwrap().pointers(), &[OLD as i64 + 0x100, OLD as i64 + 24]);
    assert_eq!(heap.object(OLD + 56).unwrap().size(), 40);

    let bytes = snapshot_bytes(&heap);
    let mut restored = HeapReader::new(bytes.as_slice())
        .read(symbols(), ReplayConfig::checked())
        .unwrap();
    assert_same_heap(&heap, &restored);
    assert!(restored.space(1).is_err());
    validate_all_pointers(&mut restored).unwrap();
}

#[test]
fn test_restored_heap_keeps_replaying() {
    let heap = replayed();
    let restored = HeapReader::new(snapshot_bytes(&heap).as_slice())
        .read(symbols(), ReplayConfig::checked())
        .unwrap();
    let mut replayer = HeapReplayer::new(restored);
    let body = vec![TraceEvent::Pointers {
        thread: thread("gc"),
        event: EventKind::GcPtrUpdatePostmove,
        to: OLD,
        pointers: vec![NULL_PTR, OLD as i64 + 56],
    }];
    replayer.replay(gc(3, GcKind::Minor, 300, body), &mut ()).unwrap();
    assert_eq!(replayer.heap().object(OLD).unwrap().pointers(), &[NULL_PTR, OLD as i64 + 56]);
}

#[test]
fn test_snapshot_rejects_bad_header() {
    let heap = replayed();
    let mut bytes = snapshot_bytes(&heap);
    bytes[0] ^= 0xff;
    let err = HeapReader::new(bytes.as_slice())
        .read(symbols(), ReplayConfig::new(1))
        .unwrap_err();
    assert!(matches!(err, TraceError::InvalidSnapshot(_)), "{err}");

    let mut bytes = snapshot_bytes(&heap);
    bytes[7] = 9;
    let err = HeapReader::new(bytes.as_slice())
        .read(symbols(), ReplayConfig::new(1))
        .unwrap_err();
    assert!(err.to_string().contains("version"), "{err}");

    let bytes = snapshot_bytes(&heap);
    let err = HeapReader::new(&bytes[..bytes.len() - 1])
        .read(symbols(), ReplayConfig::new(1))
        .unwrap_err();
    assert!(matches!(err, TraceError::Io(_)), "{err}");
}

#[test]
fn test_writer_requires_completed_gc() {
    let heap = Heap::new(symbols(), ReplayConfig::new(1));
    let mut writer = HeapWriter::new(Vec::new());
    assert!(matches!(writer.write(&heap), Err(TraceError::UnexpectedEvent(_))));
}

#[test]
fn test_recorder_writes_dumps_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = DumpRecorder::create(
        dir.path().join("dumps"),
        DumpPolicy {
            every_nth_gc: 2,
            major_only: false,
            max_dumps: None,
        },
    )
    .unwrap();
    let mut replayer = HeapReplayer::new(Heap::new(symbols(), ReplayConfig::checked()));
    replayer.replay(trace(), &mut recorder).unwrap();
    assert_eq!(recorder.dumps_written(), 1);
    let dump = recorder.dump_path(2);
    let index_path = recorder.dir().join(INDEX_FILE);
    recorder.finish().unwrap();

    let index = IndexReader::open(&index_path).unwrap();
    let records = index.records();
    assert_eq!(records.len(), 4);
    assert_eq!(
        records.iter().map(|record| record.dump_exists).collect::<Vec<_>>(),
        vec![false, false, false, true]
    );
    assert!(records.windows(2).all(|pair| pair[0].position < pair[1].position));

    let end = records[3];
    assert_eq!(end.event, EventKind::GcEnd);
    assert_eq!(index.range_from_last_dump_to(205), HeapPosition { dump: 2, from: end.position, to: end.position });
    let before = index.range_from_last_dump_to(200);
    assert_eq!(before, HeapPosition { dump: -1, from: -1, to: records[2].position });

    let lookup = GcLookup {
        event: EventKind::GcStart,
        kind: GcKind::Minor,
        cause: 2,
    };
    assert_eq!(index.gc_time(&lookup, 1), 200);
    assert_eq!(index.gc_time(&lookup, 2), -1);

    let restored = HeapReader::open(&dump)
        .unwrap()
        .read(symbols(), ReplayConfig::checked())
        .unwrap();
    assert_same_heap(replayer.heap(), &restored);
}
