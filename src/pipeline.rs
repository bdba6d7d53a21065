//! Staged scan pipeline over bounded queues.
//!
//! Why a staged pipeline?
//! - It makes backpressure explicit: block queues are fixed-capacity, and a
//!   slow matcher starves the reader by withholding buffer returns.
//! - It keeps memory bounded: all blocks are allocated once, up front.
//! - Container expansion feeds back into the head of the pipeline, so ZIP
//!   entries and gzip streams are scanned by the same machinery that found
//!   them.
//!
//! Topology (fixed at startup, one thread per stage):
//!
//! ```text
//!             scan targets <─────────────────────────────┐
//!                  v                                     │
//!  [reader] ──> [zip finder] ──> [gzip finder] ──> [matcher]
//!     ^                                                  │
//!     └───────────────── empty blocks (pool) <───────────┘
//! ```
//!
//! # Termination
//! The reader emits one end-of-target sentinel per target it finishes (or
//! skips). Each finder absorbs one sentinel per child target it registered
//! and forwards the rest without exiting, so the only sentinel that reaches
//! the matcher arrives after every registered target has terminated: that is
//! the completion signal. Shutdown then pushes a stop message into the
//! target queue, a sentinel into each block queue, and drops the driver's
//! channel handles; every stage exits on its stop message, its sentinel, or
//! queue disconnection. Duplicate sentinels are harmless.
//!
//! The pool holds fewer blocks than any queue's capacity, so no stage can
//! block forever on a full queue during shutdown.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded};

use crate::archive::gzip::run_gzip_finder;
use crate::archive::zip::run_zip_finder;
use crate::block::{Block, Slot, BLOCK_QUEUE_CAP, POOL_BLOCKS};
use crate::error::ScanError;
use crate::matcher::run_matcher;
use crate::reader::run_reader;
use crate::target::{ScanTarget, TargetMsg};

const SIGNAL_QUEUE_CAP: usize = 10;

/// One matched needle in one block.
pub struct Detection {
    /// `Found '<needle>' at <target> in <N>kB block at byte offset <off>`.
    pub description: String,
}

/// Progress snapshot emitted by the reader, once per block.
pub struct ProgressInfo {
    /// Description of the target currently being scanned.
    pub current_target: String,
    /// Bytes scanned in the current target, in whole-block increments.
    pub scanned_bytes: u64,
    /// Declared size of the current target; -1 when unknown (streamed).
    pub total_bytes: i64,
    /// Targets discovered but not yet scanned. Grows as containers are
    /// expanded.
    pub unscanned_targets: usize,
}

/// Summary counters for a completed scan.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanStats {
    /// Targets scanned: the root plus every expanded container entry.
    pub targets: u64,
    /// Blocks filled and pushed through the pipeline.
    pub blocks: u64,
    /// Bytes actually read into blocks.
    pub bytes_scanned: u64,
    /// Detections emitted.
    pub detections: u64,
}

/// Shared stage counters behind relaxed atomics.
#[derive(Default)]
pub(crate) struct Counters {
    targets: AtomicU64,
    blocks: AtomicU64,
    bytes_scanned: AtomicU64,
    detections: AtomicU64,
}

impl Counters {
    pub(crate) fn note_target(&self) {
        self.targets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_block(&self, bytes: u64) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.bytes_scanned.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn note_detection(&self) {
        self.detections.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ScanStats {
        ScanStats {
            targets: self.targets.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
        }
    }
}

/// Outcome notification from a stage to the driver.
pub(crate) enum Signal {
    /// The outermost target's sentinel reached the matcher.
    Complete,
    /// A stage hit an unrecoverable failure.
    Error(ScanError),
}

/// Scan `path` for wallet remnants, starting `start_offset` bytes in.
///
/// `on_detection` is invoked once per matched needle, inline from the
/// matcher stage. `on_progress` is invoked once per block, inline from the
/// reader stage; rate-limiting any display is the callee's business.
/// Detections from a single target arrive in non-decreasing block-offset
/// order, and within one block in needle-list order.
///
/// Per-target failures (an unreadable archive entry, a bogus container) are
/// logged and skipped; only a root target that cannot be sized, opened, or
/// seeked fails the scan.
pub fn scan<D, P>(
    start_offset: u64,
    path: &Path,
    on_detection: D,
    on_progress: P,
) -> Result<ScanStats, ScanError>
where
    D: FnMut(Detection) + Send,
    P: FnMut(ProgressInfo) + Send,
{
    let counters = Counters::default();
    let root = Arc::new(ScanTarget::file(path.to_path_buf(), start_offset));

    let signal = thread::scope(|scope| {
        // Container expansion can register many targets from one block, so
        // the target queue spills without bound; every block queue is
        // strictly bounded.
        let (targets_tx, targets_rx) = unbounded::<TargetMsg>();
        let (pool_tx, pool_rx) = bounded::<Slot>(BLOCK_QUEUE_CAP);
        let (zip_tx, zip_rx) = bounded::<Slot>(BLOCK_QUEUE_CAP);
        let (gzip_tx, gzip_rx) = bounded::<Slot>(BLOCK_QUEUE_CAP);
        let (match_tx, match_rx) = bounded::<Slot>(BLOCK_QUEUE_CAP);
        let (signal_tx, signal_rx) = bounded::<Signal>(SIGNAL_QUEUE_CAP);

        for _ in 0..POOL_BLOCKS {
            pool_tx
                .send(Slot::Block(Block::empty()))
                .expect("pool primed within queue capacity");
        }

        {
            let targets_rx = targets_rx.clone();
            let pool_rx = pool_rx.clone();
            let pool_tx = pool_tx.clone();
            let zip_tx = zip_tx.clone();
            let signal_tx = signal_tx.clone();
            let counters = &counters;
            scope.spawn(move || {
                run_reader(
                    targets_rx,
                    pool_rx,
                    pool_tx,
                    zip_tx,
                    signal_tx,
                    counters,
                    on_progress,
                );
            });
        }

        {
            let zip_rx = zip_rx.clone();
            let gzip_tx = gzip_tx.clone();
            let targets_tx = targets_tx.clone();
            scope.spawn(move || run_zip_finder(zip_rx, gzip_tx, targets_tx));
        }

        {
            let gzip_rx = gzip_rx.clone();
            let match_tx = match_tx.clone();
            let targets_tx = targets_tx.clone();
            scope.spawn(move || run_gzip_finder(gzip_rx, match_tx, targets_tx));
        }

        {
            let match_rx = match_rx.clone();
            let pool_tx = pool_tx.clone();
            let signal_tx = signal_tx.clone();
            let counters = &counters;
            scope.spawn(move || {
                run_matcher(match_rx, pool_tx, signal_tx, counters, on_detection);
            });
        }

        // Prime the pipeline with the root target.
        targets_tx
            .send(TargetMsg::Scan(Arc::clone(&root)))
            .expect("target queue open at startup");

        let signal = match signal_rx.recv() {
            Ok(signal) => signal,
            Err(_) => Signal::Complete,
        };

        // Cooperative shutdown. The stop message ends a reader idling on
        // the target queue; the pool sentinel stops one mid-target; the
        // queue sentinels wake any finder still draining. All remaining
        // channel handles drop when this closure returns, which releases
        // any stage the messages missed, and the scope then joins every
        // stage.
        let _ = targets_tx.send(TargetMsg::Shutdown);
        let _ = pool_tx.send(Slot::EndOfTarget);
        let _ = zip_tx.send(Slot::EndOfTarget);
        let _ = match_tx.send(Slot::EndOfTarget);

        signal
    });

    match signal {
        Signal::Complete => Ok(counters.snapshot()),
        Signal::Error(err) => Err(err),
    }
}
