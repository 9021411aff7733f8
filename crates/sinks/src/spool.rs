//! On-disk overflow spool
//!
//! A per-destination durable FIFO of whole lines, used when the in-memory
//! queue is full or the connection is down. Records are length-prefixed and
//! appended to segment files under the spool directory:
//!
//! ```text
//! <spool_dir>/<name>.<seq>.spool
//! ```
//!
//! Segments rotate at a size bound; fully consumed segments are deleted.
//! Segments found on open are adopted, so undelivered data survives both
//! restarts and destination re-creation at the same address.
//!
//! The flush policy is batched: the write buffer is flushed every
//! `flush_every` records and fsynced on rotate and close.
//!
//! All operations take one short mutex-guarded critical section; callers on
//! the submit path never wait on more than one buffered file write.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::SinkError;

/// Sequence numbers start high so head segments written at close can be
/// numbered below every live segment.
const INITIAL_SEQ: u64 = 1 << 32;

/// Default segment rotation bound.
const DEFAULT_MAX_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Default records between buffer flushes.
const DEFAULT_FLUSH_EVERY: usize = 256;

/// Spool configuration.
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Directory holding the segment files.
    pub dir: PathBuf,

    /// Spool name, shared prefix of all segment files. Derived from the
    /// owning destination's `(addr, instance)` identity.
    pub name: String,

    /// Rotate the write segment when it exceeds this many bytes.
    pub max_segment_size: u64,

    /// Flush the write buffer every this many records.
    pub flush_every: usize,
}

impl SpoolConfig {
    /// Config with default rotation and flush bounds.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

/// Durable per-destination FIFO.
pub struct Spool {
    inner: Mutex<Inner>,
}

struct Inner {
    config: SpoolConfig,
    /// Requeued lines, drained before anything on disk. Persisted as a
    /// low-numbered segment on close.
    head: VecDeque<Bytes>,
    /// Segment currently being read.
    read: Option<ReadSegment>,
    /// Sealed segments awaiting read, ascending sequence order.
    pending: VecDeque<u64>,
    /// Segment currently being written.
    write: Option<WriteSegment>,
    /// Sequence for the next write segment.
    next_seq: u64,
    /// Sequence below the lowest known segment, for head persistence.
    low_seq: u64,
    /// Records appended since the last flush.
    unflushed: usize,
}

struct WriteSegment {
    seq: u64,
    file: BufWriter<File>,
    bytes: u64,
    records: u64,
}

struct ReadSegment {
    seq: u64,
    file: BufReader<File>,
}

impl Spool {
    /// Open a spool, adopting any segment files left by a previous owner.
    pub fn open(config: SpoolConfig) -> Result<Self, SinkError> {
        let spool_open = |source: io::Error| SinkError::SpoolOpen {
            name: config.name.clone(),
            dir: config.dir.display().to_string(),
            source,
        };

        fs::create_dir_all(&config.dir).map_err(spool_open)?;

        let mut seqs: Vec<u64> = Vec::new();
        let prefix = format!("{}.", config.name);
        for entry in fs::read_dir(&config.dir).map_err(spool_open)? {
            let entry = entry.map_err(spool_open)?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(rest) = name.strip_prefix(&prefix)
                && let Some(seq) = rest.strip_suffix(".spool")
                && let Ok(seq) = seq.parse::<u64>()
            {
                seqs.push(seq);
            }
        }
        seqs.sort_unstable();

        let next_seq = seqs.last().map_or(INITIAL_SEQ, |&s| s + 1);
        let low_seq = seqs.first().map_or(INITIAL_SEQ, |&s| s).saturating_sub(1);

        if !seqs.is_empty() {
            tracing::info!(
                spool = %config.name,
                segments = seqs.len(),
                "adopting existing spool segments"
            );
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                config,
                head: VecDeque::new(),
                read: None,
                pending: seqs.into(),
                write: None,
                next_seq,
                low_seq,
                unflushed: 0,
            }),
        })
    }

    /// Append one line. Fails only on disk error.
    pub fn enqueue(&self, line: &[u8]) -> io::Result<()> {
        self.inner.lock().expect("spool lock").enqueue(line)
    }

    /// Consume the oldest queued line, if any.
    pub fn dequeue(&self) -> io::Result<Option<Bytes>> {
        self.inner.lock().expect("spool lock").dequeue()
    }

    /// Put an unsent batch back at the head of the queue, preserving its
    /// internal order. Used by the writer after a failed network write.
    pub fn requeue_front(&self, lines: Vec<Bytes>) {
        let mut inner = self.inner.lock().expect("spool lock");
        for line in lines.into_iter().rev() {
            inner.head.push_front(line);
        }
    }

    /// Whether any line is queued (in the head buffer or on disk).
    pub fn has_queued(&self) -> bool {
        let inner = self.inner.lock().expect("spool lock");
        !inner.head.is_empty()
            || inner.read.is_some()
            || !inner.pending.is_empty()
            || inner.write.as_ref().is_some_and(|w| w.records > 0)
    }

    /// Flush, fsync, and persist the head buffer ahead of every segment.
    pub fn close(&self) -> io::Result<()> {
        self.inner.lock().expect("spool lock").close()
    }
}

impl Inner {
    fn path(&self, seq: u64) -> PathBuf {
        self.config
            .dir
            .join(format!("{}.{:020}.spool", self.config.name, seq))
    }

    fn enqueue(&mut self, line: &[u8]) -> io::Result<()> {
        if self.write.is_none() {
            let seq = self.next_seq;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path(seq))?;
            self.write = Some(WriteSegment {
                seq,
                file: BufWriter::new(file),
                bytes: 0,
                records: 0,
            });
            self.next_seq += 1;
        }

        let max_segment = self.config.max_segment_size;
        let flush_every = self.config.flush_every;
        let write = self.write.as_mut().expect("write segment present");

        write.file.write_all(&(line.len() as u32).to_be_bytes())?;
        write.file.write_all(line)?;
        write.bytes += 4 + line.len() as u64;
        write.records += 1;
        self.unflushed += 1;

        if self.unflushed >= flush_every {
            write.file.flush()?;
            self.unflushed = 0;
        }

        if write.bytes >= max_segment {
            self.seal_write()?;
        }

        Ok(())
    }

    /// Seal the write segment: flush, fsync, queue it for reading.
    fn seal_write(&mut self) -> io::Result<()> {
        if let Some(mut write) = self.write.take() {
            write.file.flush()?;
            write.file.get_ref().sync_data()?;
            self.unflushed = 0;
            if write.records > 0 {
                self.pending.push_back(write.seq);
            } else {
                let _ = fs::remove_file(self.path(write.seq));
            }
        }
        Ok(())
    }

    fn dequeue(&mut self) -> io::Result<Option<Bytes>> {
        if let Some(line) = self.head.pop_front() {
            return Ok(Some(line));
        }

        loop {
            if self.read.is_none() {
                if let Some(seq) = self.pending.pop_front() {
                    match File::open(self.path(seq)) {
                        Ok(file) => {
                            self.read = Some(ReadSegment {
                                seq,
                                file: BufReader::new(file),
                            });
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e),
                    }
                } else if self.write.as_ref().is_some_and(|w| w.records > 0) {
                    // The only queued data sits in the active write segment:
                    // seal it so it becomes readable.
                    self.seal_write()?;
                    continue;
                } else {
                    return Ok(None);
                }
            }

            let read = self.read.as_mut().expect("read segment present");
            match read_record(&mut read.file)? {
                Some(line) => return Ok(Some(line)),
                None => {
                    // Exhausted (or truncated tail): this segment is done.
                    let seq = read.seq;
                    self.read = None;
                    let _ = fs::remove_file(self.path(seq));
                }
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.seal_write()?;

        if !self.head.is_empty() {
            let seq = self.low_seq;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path(seq))?;
            let mut out = BufWriter::new(file);
            for line in self.head.drain(..) {
                out.write_all(&(line.len() as u32).to_be_bytes())?;
                out.write_all(&line)?;
            }
            out.flush()?;
            out.get_ref().sync_data()?;
            self.low_seq = seq.saturating_sub(1);
        }

        Ok(())
    }
}

/// Read one length-prefixed record.
///
/// Returns `None` at clean end of segment, and also for a truncated tail
/// (a crash mid-append): the partial record is unusable either way.
fn read_record(file: &mut BufReader<File>) -> io::Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match file.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    let mut line = vec![0u8; len];
    match file.read_exact(&mut line) {
        Ok(()) => Ok(Some(Bytes::from(line))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "spool_test.rs"]
mod spool_test;
