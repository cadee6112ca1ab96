//! Heap trace replay and pointer relocation.
//!
//! `heap-replay` rebuilds the heap of a traced VM from its allocation and GC
//! records. Objects live in allocation buffers (labs) inside address
//! [`Space`]s. A GC moves them between a space's **front** view (the heap as
//! it will be after the GC) and its **back** view (the heap as it was
//! before), and reference slots are repaired once the GC ends.
//!
//! # Overview
//!
//! - [`Heap`]: spaces, GC lifecycle, allocation, moves, roots and threads.
//! - [`HeapReplayer`]: applies decoded [`TraceEvent`]s in trace order and
//!   accumulates streamed references per GC thread.
//! - [`pointer`]: reference bookkeeping, repair at GC end and validation.
//! - [`snapshot`]: binary heap snapshots and the GC index used to seek into
//!   a trace.
//!
//! # Example
//!
//! ```ignore
//! use heap_replay::{GcInfo, GcKind, Heap, HeapReplayer, ReplayConfig, Symbols, TraceEvent};
//!
//! let heap = Heap::new(symbols, ReplayConfig::default());
//! let mut replayer = HeapReplayer::new(heap);
//! replayer.replay(events, &mut ())?;
//! heap_replay::validate_all_pointers(&mut replayer.into_heap())?;
//! ```
//!
//! # Parallelism
//!
//! Reference repair and validation fan out over
//! [`ReplayConfig::max_workers`] threads, one lab at a time. Replay itself is
//! sequential.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod event;
mod heap;
mod lab;
mod object;
mod replay;
mod roots;
mod space;
mod symbols;

pub mod parallel;
pub mod pointer;
pub mod snapshot;
pub mod tracing;

pub use config::{available_parallelism, DumpPolicy, ReplayConfig};
pub use error::{InvalidPointer, Result, TraceError};
pub use event::{EventKind, GcInfo, GcKind};
pub use heap::{find_space, Heap};
pub use lab::{Allocation, Lab, LabKind, ObjectFilter};
pub use object::{
    AddressedObject, ObjectInfo, ObjectInfoCache, ObjectShape, Tag, MAX_PTRS_PER_EVENT, NULL_PTR,
    UPDATED_NULL_PTR,
};
pub use pointer::{handle_ptrs_on_gc_end, validate_all_pointers};
pub use replay::{HeapListener, HeapReplayer, ThreadState, TraceEvent};
pub use roots::{RootKind, RootPointer, StackFrame, ThreadInfo};
pub use space::{LabMap, PostCollectionView, PreCollectionView, Space, SpaceMode, SpaceType, TransitionType};
pub use symbols::{AllocatedType, AllocationSite, GcCause, Symbols};
