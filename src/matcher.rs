//! Wallet matcher: the terminal pipeline stage.
//!
//! Bitcoin wallets are Berkeley DB files; rather than parse them, the
//! matcher looks for characteristic ASCII keys that appear inside them.
//! Key list per the Berkeley DB usage in the reference client
//! (<https://github.com/berkeleydb/libdb/blob/master/src/dbinc/db.in>).

use crossbeam_channel::{Receiver, Sender};
use memchr::memmem;

use crate::block::Slot;
use crate::pipeline::{Counters, Detection, Signal};

/// Wallet needles, in reporting order.
pub const NEEDLES: [&str; 5] = [
    "orderposnext",
    "addrIncoming",
    "bestblock",
    "defaultkey",
    "acentry",
];

/// Probe every block for the needle set and recycle it into the pool.
///
/// At most one detection is emitted per (block, needle): only the presence
/// of a needle in a block is reported, not every occurrence. The first
/// end-of-target sentinel to arrive is the outermost target's (the finders
/// absorb the rest), so it signals completion and ends the stage.
pub(crate) fn run_matcher<D: FnMut(Detection)>(
    blocks_in: Receiver<Slot>,
    pool: Sender<Slot>,
    signals: Sender<Signal>,
    counters: &Counters,
    mut on_detection: D,
) {
    let finders: Vec<memmem::Finder<'static>> = NEEDLES
        .iter()
        .map(|needle| memmem::Finder::new(needle.as_bytes()))
        .collect();

    while let Ok(slot) = blocks_in.recv() {
        let block = match slot {
            Slot::EndOfTarget => {
                let _ = signals.send(Signal::Complete);
                return;
            }
            Slot::Block(block) => block,
        };

        for (needle, finder) in NEEDLES.iter().zip(&finders) {
            if finder.find(&block.data).is_some() {
                counters.note_detection();
                on_detection(Detection {
                    description: format!("Found '{}' at {}", needle, block.location),
                });
            }
        }

        if pool.send(Slot::Block(block)).is_err() {
            return;
        }
    }
}
