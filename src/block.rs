//! Reusable read blocks and queue geometry.
//!
//! # Invariants
//! - A block's buffer is exactly [`BLOCK_LEN`] bytes for its whole lifetime;
//!   a short final read leaves the previous contents in the tail.
//! - While in flight, a block is owned by exactly one stage; it returns to
//!   the pool through the matcher (or through the reader when a target ends
//!   or its stream errors).
//!
//! # Design Notes
//! - Blocks are allocated once at startup and recycled forever; the pool
//!   holds fewer blocks than any queue's capacity, so a stage can always
//!   complete a send after its consumer has drained.

use std::sync::Arc;

use crate::target::ScanTarget;

/// Bytes per block. Observable through the detection string ("16kB block").
pub const BLOCK_LEN: usize = 16 * 1024;

/// Blocks pre-allocated into the pool at startup.
pub const POOL_BLOCKS: usize = 20;

/// Capacity of each block queue (and of the pool channel).
pub const BLOCK_QUEUE_CAP: usize = 30;

/// A window of a target's bytes together with its provenance.
pub(crate) struct Block {
    /// Byte offset of this block within its target. Always a multiple of
    /// [`BLOCK_LEN`]; the reader advances by the full buffer size even when
    /// the final read came up short.
    pub(crate) offset: u64,
    pub(crate) data: Box<[u8]>,
    /// Human-readable description of where this block came from, built at
    /// fill time.
    pub(crate) location: String,
    /// The target this block was read from. `None` only while the block
    /// sits in the pool.
    pub(crate) source: Option<Arc<ScanTarget>>,
}

impl Block {
    pub(crate) fn empty() -> Box<Self> {
        Box::new(Self {
            offset: 0,
            data: vec![0u8; BLOCK_LEN].into_boxed_slice(),
            location: String::new(),
            source: None,
        })
    }
}

/// Message carried on block queues: a filled block, or the end-of-target
/// sentinel that delimits one target's block stream from the next.
pub(crate) enum Slot {
    Block(Box<Block>),
    EndOfTarget,
}
