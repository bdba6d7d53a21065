//! Polymorphic scan targets and their byte-stream capabilities.
//!
//! A scan target is a logical byte source: the file (or raw device) the scan
//! started from, or a virtual source discovered inside another target (a ZIP
//! entry, a gzip stream). Targets are immutable after construction and shared
//! between stages as `Arc<ScanTarget>`; virtual targets hold their parent the
//! same way, so a target's description can always be reconstructed without
//! touching the filesystem.
//!
//! # Invariants
//! - Virtual targets always declare start offset 0; only the root file
//!   target carries a caller-provided offset.
//! - `open()` yields a fresh handle each call; handles are independent.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::gzip::GzipStreamTarget;
use crate::archive::zip::ZipEntryTarget;
use crate::error::StreamError;
use crate::probe;

/// Byte-stream handle over a target's logical bytes.
///
/// Sequential reads go through [`Read`]. `seek_to` repositions the sequential
/// cursor; `read_at` fills the buffer exactly from an absolute position,
/// independent of the cursor. Streams that cannot honor an operation return a
/// typed [`StreamError`] instead of panicking; the reader stage treats that
/// like any other per-target failure.
pub trait TargetStream: Read + Send {
    /// Reposition the sequential cursor to `pos` bytes from the start.
    fn seek_to(&mut self, pos: u64) -> Result<(), StreamError>;

    /// Fill `buf` exactly with the bytes at `pos`, leaving the sequential
    /// cursor untouched. Fails if the target ends before `buf` is full.
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<(), StreamError>;
}

/// Message carried on the target queue.
///
/// `Shutdown` is the driver's request to stop the reader once the queue has
/// drained; finders only ever publish `Scan`.
pub(crate) enum TargetMsg {
    Scan(Arc<ScanTarget>),
    Shutdown,
}

/// A logical byte source consumed by the reader stage.
pub enum ScanTarget {
    /// The filesystem path the scan started from.
    File(FileTarget),
    /// One entry of a ZIP archive found inside a parent target.
    ZipEntry(ZipEntryTarget),
    /// A gzip stream found inside a parent target.
    GzipStream(GzipStreamTarget),
}

impl ScanTarget {
    /// The outermost target: a filesystem path plus a start offset.
    pub fn file(path: PathBuf, start_offset: u64) -> Self {
        Self::File(FileTarget { path, start_offset })
    }

    /// Human-readable description, stable across the scan.
    pub fn describe(&self) -> String {
        match self {
            Self::File(t) => t.path.display().to_string(),
            Self::ZipEntry(t) => t.describe(),
            Self::GzipStream(t) => t.describe(),
        }
    }

    /// Byte offset scanning starts from within this target.
    pub fn start_offset(&self) -> u64 {
        match self {
            Self::File(t) => t.start_offset,
            Self::ZipEntry(_) | Self::GzipStream(_) => 0,
        }
    }

    /// Declared size in bytes; `Ok(None)` means unknown (streamed).
    pub fn size(&self) -> Result<Option<u64>, StreamError> {
        match self {
            Self::File(t) => probe::size_of(&t.path).map(Some).map_err(StreamError::Io),
            Self::ZipEntry(t) => Ok(Some(t.uncompressed_size)),
            Self::GzipStream(_) => Ok(None),
        }
    }

    /// Open a fresh byte-stream handle over this target's logical bytes.
    pub fn open(&self) -> Result<Box<dyn TargetStream>, StreamError> {
        match self {
            Self::File(t) => {
                let file = File::open(&t.path)?;
                Ok(Box::new(FileStream { file }))
            }
            Self::ZipEntry(t) => t.open_stream(),
            Self::GzipStream(t) => t.open_stream(),
        }
    }
}

/// The outermost target: a path and the offset scanning starts from.
pub struct FileTarget {
    pub(crate) path: PathBuf,
    pub(crate) start_offset: u64,
}

struct FileStream {
    file: File,
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl TargetStream for FileStream {
    fn seek_to(&mut self, pos: u64) -> Result<(), StreamError> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    #[cfg(unix)]
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<(), StreamError> {
        use std::os::unix::fs::FileExt;
        let mut filled = 0;
        while filled < buf.len() {
            let n = match self.file.read_at(&mut buf[filled..], pos + filled as u64) {
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StreamError::Io(e)),
            };
            if n == 0 {
                return Err(StreamError::Corrupt("unexpected end of target"));
            }
            filled += n;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<(), StreamError> {
        let saved = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(pos))?;
        let result = self.file.read_exact(buf);
        self.file.seek(SeekFrom::Start(saved))?;
        result.map_err(StreamError::Io)
    }
}

/// Stream over an in-memory copy of a target's bytes.
///
/// ZIP entries are inflated in full when opened; this serves the result and
/// supports every stream capability.
pub(crate) struct MemStream {
    data: Vec<u8>,
    pos: usize,
}

impl MemStream {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl Read for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data.len().saturating_sub(self.pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl TargetStream for MemStream {
    fn seek_to(&mut self, pos: u64) -> Result<(), StreamError> {
        // Seeking past the end is allowed; subsequent reads report EOF.
        self.pos = usize::try_from(pos).unwrap_or(usize::MAX);
        Ok(())
    }

    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> Result<(), StreamError> {
        let start = usize::try_from(pos).unwrap_or(usize::MAX);
        let end = start.saturating_add(buf.len());
        if end > self.data.len() {
            return Err(StreamError::Corrupt("unexpected end of target"));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}
