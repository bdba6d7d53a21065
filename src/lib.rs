//! Forensic scanner for Bitcoin wallet remnants.
//!
//! Wallets are Berkeley DB files; rather than parse them, the scanner walks
//! a block-level byte source (a raw device, disk image, or plain file)
//! looking for the characteristic ASCII keys wallets contain, and reports
//! each hit in human-readable terms.
//!
//! The engine is a recursive staged pipeline:
//! - a reader fills pooled 16 KiB blocks from the current scan target,
//! - a ZIP finder and a gzip finder watch the block stream for container
//!   signatures and register validated hits as new *virtual* targets whose
//!   streams decompress the payload,
//! - a matcher probes each block for the needle set and recycles it.
//!
//! Virtual targets feed back into the reader, so a wallet inside a ZIP
//! inside a gzip stream is found by the same machinery as a bare one.
//!
//! ```no_run
//! use std::path::Path;
//!
//! let stats = walletfind::scan(
//!     0,
//!     Path::new("/dev/sdb"),
//!     |detection| println!("{}", detection.description),
//!     |_progress| {},
//! )?;
//! eprintln!("scanned {} bytes", stats.bytes_scanned);
//! # Ok::<(), walletfind::ScanError>(())
//! ```

pub mod archive;
mod block;
mod error;
mod matcher;
mod pipeline;
mod probe;
mod reader;
mod target;

pub use block::{BLOCK_LEN, BLOCK_QUEUE_CAP, POOL_BLOCKS};
pub use error::{ScanError, StreamError};
pub use matcher::NEEDLES;
pub use pipeline::{scan, Detection, ProgressInfo, ScanStats};
pub use probe::size_of;
pub use target::{FileTarget, ScanTarget, TargetStream};
