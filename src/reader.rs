//! Reader stage: turns the stream of scan targets into a stream of filled
//! blocks.
//!
//! # Invariants
//! - Blocks from one target are emitted in strictly increasing offset order,
//!   delimited from the next target's by an end-of-target sentinel.
//! - The cursor advances by the full buffer size per block even when the
//!   final read came up short, so block offsets are always multiples of the
//!   buffer size. Downstream output depends on this.
//! - A target that fails to size, open, or seek is skipped, but still gets
//!   its sentinel: the finders' absorption accounting counts one sentinel
//!   per registered target, produced or skipped alike.

use std::io::{self, Read};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::block::{Slot, BLOCK_LEN};
use crate::error::ScanError;
use crate::pipeline::{Counters, ProgressInfo, Signal};
use crate::target::{ScanTarget, TargetMsg};

pub(crate) fn run_reader<P: FnMut(ProgressInfo)>(
    targets: Receiver<TargetMsg>,
    pool: Receiver<Slot>,
    pool_return: Sender<Slot>,
    blocks_out: Sender<Slot>,
    signals: Sender<Signal>,
    counters: &Counters,
    mut on_progress: P,
) {
    'targets: while let Ok(msg) = targets.recv() {
        let target = match msg {
            TargetMsg::Scan(target) => target,
            TargetMsg::Shutdown => return,
        };
        // Only the entry point creates file targets, and the entry point's
        // target is always the outermost one: its failure fails the scan.
        // Virtual targets are skipped with a log line.
        let is_root = matches!(*target, ScanTarget::File(_));

        let total_bytes = match target.size() {
            Ok(size) => size.map(|v| v as i64).unwrap_or(-1),
            Err(err) => {
                if is_root {
                    let _ = signals.send(Signal::Error(ScanError::Unsized {
                        target: target.describe(),
                        source: err,
                    }));
                    return;
                }
                warn!("skipping {}: cannot size: {}", target.describe(), err);
                if blocks_out.send(Slot::EndOfTarget).is_err() {
                    return;
                }
                continue;
            }
        };

        let mut stream = match target.open() {
            Ok(stream) => stream,
            Err(err) => {
                if is_root {
                    let _ = signals.send(Signal::Error(ScanError::Unopenable {
                        target: target.describe(),
                        source: err,
                    }));
                    return;
                }
                warn!("skipping {}: cannot open: {}", target.describe(), err);
                if blocks_out.send(Slot::EndOfTarget).is_err() {
                    return;
                }
                continue;
            }
        };

        if let Err(err) = stream.seek_to(target.start_offset()) {
            if is_root {
                let _ = signals.send(Signal::Error(ScanError::Unseekable {
                    target: target.describe(),
                    source: err,
                }));
                return;
            }
            warn!("skipping {}: cannot seek: {}", target.describe(), err);
            if blocks_out.send(Slot::EndOfTarget).is_err() {
                return;
            }
            continue;
        }

        counters.note_target();
        let mut current_offset = target.start_offset();

        loop {
            let mut block = match pool.recv() {
                Ok(Slot::Block(block)) => block,
                // A sentinel in the pool is the shutdown request.
                Ok(Slot::EndOfTarget) | Err(_) => return,
            };

            let read = match fill(&mut *stream, &mut block.data) {
                Ok(read) => read,
                Err(err) => {
                    // Mid-read failure abandons the target but never the
                    // pipeline, root target included.
                    warn!("abandoning {}: read failed: {}", target.describe(), err);
                    let _ = pool_return.send(Slot::Block(block));
                    if blocks_out.send(Slot::EndOfTarget).is_err() {
                        return;
                    }
                    continue 'targets;
                }
            };

            if read == 0 {
                let _ = pool_return.send(Slot::Block(block));
                if blocks_out.send(Slot::EndOfTarget).is_err() {
                    return;
                }
                continue 'targets;
            }

            block.offset = current_offset;
            block.location = format!(
                "{} in {}kB block at byte offset {}",
                target.describe(),
                BLOCK_LEN / 1024,
                current_offset
            );
            block.source = Some(Arc::clone(&target));

            current_offset += BLOCK_LEN as u64;
            counters.note_block(read as u64);
            on_progress(ProgressInfo {
                current_target: target.describe(),
                scanned_bytes: current_offset,
                total_bytes,
                unscanned_targets: targets.len(),
            });

            if blocks_out.send(Slot::Block(block)).is_err() {
                return;
            }
        }
    }
}

/// Read into `buf` until it is full or the stream ends.
///
/// A short return (including 0) means end of stream: the next call would
/// read nothing. This keeps block packing deterministic even for
/// decompressors that return data in small pieces.
fn fill<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that returns one byte at a time.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn fill_packs_short_reads_into_one_block() {
        let mut buf = [0u8; 8];
        assert_eq!(fill(&mut Trickle(b"abcdef"), &mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"abcdef");

        let mut src = Trickle(b"0123456789");
        assert_eq!(fill(&mut src, &mut buf).unwrap(), 8);
        assert_eq!(fill(&mut src, &mut buf).unwrap(), 2);
        assert_eq!(fill(&mut src, &mut buf).unwrap(), 0);
    }
}
