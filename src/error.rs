//! Error types for the scan engine.
//!
//! Errors are split by boundary: `StreamError` covers operations on a single
//! target's byte stream, `ScanError` covers the one failure class that is
//! allowed to abort a scan (the outermost target). All enums are
//! `#[non_exhaustive]` so variants can be added without breaking callers.
//!
//! # Design Notes
//! - I/O errors preserve their source to keep diagnostics actionable.
//! - Per-target failures on virtual targets never surface here; they are
//!   logged and the target is skipped.

use std::fmt;
use std::io;

/// Errors from operations on a target's byte stream.
#[derive(Debug)]
#[non_exhaustive]
pub enum StreamError {
    /// Seek to a non-zero offset on a sequential-only stream.
    UnsupportedSeek,
    /// Positional read on a sequential-only stream.
    UnsupportedReadAt,
    /// The container behind a virtual target is malformed or truncated.
    Corrupt(&'static str),
    /// I/O error from the underlying source.
    Io(io::Error),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedSeek => write!(f, "seeking not supported for this stream"),
            Self::UnsupportedReadAt => write!(f, "positional reads not supported for this stream"),
            Self::Corrupt(detail) => write!(f, "corrupt container: {detail}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Fatal failure of the outermost scan target.
///
/// Virtual targets that fail to size, open, or seek are logged and skipped;
/// only the root path the caller asked for surfaces as one of these.
#[derive(Debug)]
#[non_exhaustive]
pub enum ScanError {
    /// The root target's size could not be determined.
    Unsized { target: String, source: StreamError },
    /// The root target could not be opened.
    Unopenable { target: String, source: StreamError },
    /// The root target's stream rejected the requested start offset.
    Unseekable { target: String, source: StreamError },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsized { target, source } => {
                write!(f, "cannot determine size of {target}: {source}")
            }
            Self::Unopenable { target, source } => write!(f, "cannot open {target}: {source}"),
            Self::Unseekable { target, source } => {
                write!(f, "cannot seek to start offset in {target}: {source}")
            }
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unsized { source, .. }
            | Self::Unopenable { source, .. }
            | Self::Unseekable { source, .. } => Some(source),
        }
    }
}
