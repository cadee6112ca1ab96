//! Index of GC boundaries.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Result, TraceError};
use crate::event::{EventKind, GcInfo, GcKind};
use crate::snapshot::codec::{Decoder, Encoder};
use crate::snapshot::MAGIC;
use crate::tracing::{replay_debug, replay_warn};

/// One GC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Trace position of the GC record.
    pub position: i64,
    pub kind: GcKind,
    /// `GcStart` or `GcEnd`.
    pub event: EventKind,
    pub cause: i32,
    pub time: i64,
    pub gc_id: i32,
    /// Whether a snapshot named by `gc_id` was written at this boundary.
    pub dump_exists: bool,
}

impl IndexRecord {
    #[must_use]
    pub fn new(position: u64, info: &GcInfo, dump_exists: bool) -> Self {
        Self {
            position: i64::try_from(position).unwrap_or(i64::MAX),
            kind: info.kind,
            event: info.event,
            cause: info.cause,
            time: info.time,
            gc_id: i32::from(info.id),
            dump_exists,
        }
    }
}

/// Where replay has to start and stop to reach a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapPosition {
    /// Snapshot to load, -1 if replay has to start from the beginning.
    pub dump: i32,
    /// Trace position of that snapshot, -1 without one.
    pub from: i64,
    /// Trace position to replay up to.
    pub to: i64,
}

impl HeapPosition {
    const NONE: Self = Self {
        dump: -1,
        from: -1,
        to: 0,
    };

    #[must_use]
    pub const fn has_dump(&self) -> bool {
        self.dump >= 0
    }
}

/// Selects GC boundaries by event, kind and cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcLookup {
    pub event: EventKind,
    pub kind: GcKind,
    pub cause: i32,
}

impl GcLookup {
    fn matches(&self, record: &IndexRecord) -> bool {
        record.event == self.event && record.kind == self.kind && record.cause == self.cause
    }
}

/// Appends [`IndexRecord`]s to an index stream.
pub struct IndexWriter<W: Write> {
    enc: Encoder<W>,
}

impl IndexWriter<BufWriter<File>> {
    /// Create (or truncate) the index file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created or written.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> IndexWriter<W> {
    /// Start an index on `out`.
    ///
    /// # Errors
    ///
    /// Fails if the magic number cannot be written.
    pub fn new(out: W) -> Result<Self> {
        let mut enc = Encoder::new(out);
        enc.i32(MAGIC)?;
        Ok(Self { enc })
    }

    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn append(&mut self, record: &IndexRecord) -> Result<()> {
        self.enc.i64(record.position)?;
        self.enc.i32(record.kind.id())?;
        self.enc.i32(i32::from(record.event.id()))?;
        self.enc.i32(record.cause)?;
        self.enc.i64(record.time)?;
        self.enc.i32(record.gc_id)?;
        self.enc.bool(record.dump_exists)
    }

    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn flush(&mut self) -> Result<()> {
        self.enc.flush()
    }

    /// Flush and return the underlying stream.
    ///
    /// # Errors
    ///
    /// Fails if flushing fails.
    pub fn finish(mut self) -> Result<W> {
        self.enc.flush()?;
        Ok(self.enc.into_inner())
    }
}

/// In-memory copy of an index.
#[derive(Debug, Clone, Default)]
pub struct IndexReader {
    records: Vec<IndexRecord>,
}

impl IndexReader {
    /// Read the index file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not an index.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Read records until the end of `input`.
    ///
    /// # Errors
    ///
    /// Fails on a wrong magic number, unknown ids or a truncated record.
    pub fn from_reader(input: impl Read) -> Result<Self> {
        let mut dec = Decoder::new(input);
        let magic = dec.i32()?;
        if magic != MAGIC {
            return Err(TraceError::InvalidSnapshot(format!("bad index magic number {magic:#x}")));
        }
        let mut records = Vec::new();
        while let Some(position) = dec.try_i64()? {
            let kind = dec.i32()?;
            let kind = GcKind::from_id(kind)
                .ok_or_else(|| TraceError::InvalidSnapshot(format!("unknown GC kind id {kind}")))?;
            let event = dec.i32()?;
            let event = u8::try_from(event)
                .ok()
                .and_then(EventKind::from_id)
                .ok_or_else(|| TraceError::InvalidSnapshot(format!("unknown GC event id {event}")))?;
            records.push(IndexRecord {
                position,
                kind,
                event,
                cause: dec.i32()?,
                time: dec.i64()?,
                gc_id: dec.i32()?,
                dump_exists: dec.bool()?,
            });
        }
        Ok(Self { records })
    }

    #[must_use]
    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    /// Range to replay to reach the first GC boundary at `time`: the nearest
    /// snapshot at or before that boundary, and the boundary's position.
    #[must_use]
    pub fn range_from_last_dump_to(&self, time: i64) -> HeapPosition {
        let Some(target) = self.records.iter().position(|record| record.time == time) else {
            replay_warn!(time, "no GC boundary at the requested time");
            return HeapPosition::NONE;
        };
        let to = self.records[target].position;
        let dump = self.records[..=target]
            .iter()
            .rev()
            .find(|record| record.dump_exists);
        match dump {
            Some(record) => {
                replay_debug!(time, dump = record.gc_id, from = record.position, to, "index_lookup");
                HeapPosition {
                    dump: record.gc_id,
                    from: record.position,
                    to,
                }
            }
            None => {
                replay_warn!(time, to, "no heap dump before the requested time");
                HeapPosition { to, ..HeapPosition::NONE }
            }
        }
    }

    /// Time of the `nth` (0-based) boundary matching `lookup`, or -1.
    #[must_use]
    pub fn gc_time(&self, lookup: &GcLookup, nth: usize) -> i64 {
        self.records
            .iter()
            .filter(|record| lookup.matches(record))
            .nth(nth)
            .map_or(-1, |record| record.time)
    }
}
