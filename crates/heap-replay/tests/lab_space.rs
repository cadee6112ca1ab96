//! Allocation buffers and space views.

use std::sync::Arc;

use heap_replay::{
    find_space, AddressedObject, Allocation, AllocatedType, EventKind, Lab, LabKind, ObjectInfo, Space,
    SpaceType, Symbols, Tag, TransitionType,
};

fn thread() -> Arc<str> {
    Arc::from("main")
}

fn object(size: i32) -> AddressedObject {
    let ty = Arc::new(AllocatedType::instance(size, "Blob", size, 0));
    let info = Arc::new(ObjectInfo::instance(thread(), ty, 0, EventKind::Allocation));
    AddressedObject::create(info, &Symbols::new(false))
}

fn tlab(addr: u64, sizes: &[i32]) -> Lab {
    Lab::from_objects(thread(), LabKind::Tlab, addr, sizes.iter().map(|&size| object(size)).collect()).unwrap()
}

#[test]
fn test_sublab_carves_on_object_boundaries() {
    let lab = tlab(0x1000, &[16, 32, 16, 8]);
    assert_eq!(lab.capacity(), 72);

    let middle = lab.sublab(0x1010, 0x1040).unwrap().unwrap();
    assert_eq!(middle.bottom(), 0x1010);
    assert_eq!(middle.capacity(), 48);
    assert_eq!(middle.object_count(), 2);
    assert!(middle.is_full());
    assert!(middle.object_at(0x1030).is_some());

    assert!(lab.sublab(0x1010, 0x1010).unwrap().is_none());
    assert_eq!(lab.sublab(0x1000, 0x1048).unwrap().unwrap().object_count(), 4);
    assert!(lab.sublab(0x1008, 0x1040).is_err());
    assert!(lab.sublab(0x1010, 0x1020).is_err());
    assert!(lab.sublab(0x2000, 0x2010).is_err());
}

#[test]
fn test_sublab_clamps_to_top() {
    let mut lab = Lab::multi(thread(), LabKind::Tlab, 0x1000, Some(0x100));
    lab.push(object(16)).unwrap();
    lab.push(object(16)).unwrap();
    let tail = lab.sublab(0x1010, 0x1100).unwrap().unwrap();
    assert_eq!(tail.object_count(), 1);
    assert_eq!(tail.capacity(), 16);
    assert!(lab.sublab(0x1020, 0x1100).unwrap().is_none());
}

#[test]
fn test_extendable_lab_grows_at_top_only() {
    let mut lab = Lab::multi(thread(), LabKind::Virtual, 0x1000, None);
    assert!(lab.is_extendable());
    assert!(matches!(lab.try_allocate(0x1000, object(16)).unwrap(), Allocation::Assigned(0x1000)));
    assert!(matches!(lab.try_allocate(0x1020, object(16)).unwrap(), Allocation::NotAssigned(_)));
    assert!(matches!(lab.try_allocate(0x1010, object(16)).unwrap(), Allocation::Assigned(0x1010)));
    assert_eq!(lab.capacity(), 32);

    lab.reset_capacity();
    assert!(!lab.is_extendable());
    assert!(lab.is_full());
    assert!(lab.push(object(8)).is_err());
}

#[test]
fn test_lab_kind_ids() {
    for (kind, id) in [
        (LabKind::Tlab, 0),
        (LabKind::Plab, 1),
        (LabKind::Virtual, 2),
        (LabKind::RegionVirtual, 3),
    ] {
        assert_eq!(kind.id(), id);
        assert_eq!(LabKind::from_id(id), Some(kind));
    }
    assert_eq!(LabKind::from_id(4), None);
}

#[test]
fn test_space_views_follow_transition() {
    let mut space = Space::new(0, "Eden", 0x1000, 0x1000).with_type(SpaceType::Eden);
    space.assign(&thread(), LabKind::Tlab, 0x1000, object(16)).unwrap();
    assert_eq!(space.transition(), TransitionType::None);
    assert!(space.object(0x1000).is_some());

    space.start_transition(TransitionType::ReplaceAll).unwrap();
    assert!(space.is_being_collected());
    assert!(space.front_object(0x1000).is_none());
    assert!(space.back_object(0x1000).is_some());
    assert!(space.object(0x1000).is_some());
    assert!(space.start_transition(TransitionType::Accumulative).is_err());

    space.commit_transition().unwrap();
    assert_eq!(space.transition(), TransitionType::None);
    assert!(space.object(0x1000).is_none());
}

#[test]
fn test_rollback_keeps_moved_and_unmoved_objects() {
    let mut space = Space::new(0, "Eden", 0x1000, 0x1000).with_type(SpaceType::Eden);
    let main = thread();
    space.assign(&main, LabKind::Tlab, 0x1000, object(16)).unwrap();
    space.assign(&main, LabKind::Tlab, 0x1010, object(16)).unwrap();
    space.start_transition(TransitionType::ReplaceAll).unwrap();

    let mut moved = space.back_object(0x1000).unwrap().relocated_copy();
    moved.set_tag(Tag::NoForward);
    space.assign(&Arc::from("gc"), LabKind::Plab, 0x1000, moved).unwrap();
    space.rollback_transition().unwrap();

    assert_eq!(space.transition(), TransitionType::None);
    assert_eq!(space.object(0x1000).unwrap().tag(), Tag::NoForward);
    assert_eq!(space.object(0x1010).unwrap().tag(), Tag::Unset);
    assert_eq!(space.front().object_count(), 2);
}

#[test]
fn test_find_space_by_address() {
    let spaces = [
        Space::new(0, "Eden", 0x1000, 0x1000),
        Space::new(1, "Old", 0x4000, 0x2000),
    ];
    assert_eq!(find_space(&spaces, 0x1fff).map(Space::id), Some(0));
    assert_eq!(find_space(&spaces, 0x5fff).map(Space::id), Some(1));
    assert!(find_space(&spaces, 0x2000).is_none());
    assert!(find_space(&spaces, 0x0fff).is_none());
    assert!(find_space(&spaces, 0x6000).is_none());
}
