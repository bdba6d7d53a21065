//! gzip detection and expansion.
//!
//! gzip carries no index: the only way to know whether a magic hit is a real
//! stream is to start decoding it. A hit is validated by reading one
//! decompressed byte; only then is a virtual target registered. Format
//! reference: RFC 1952.
//!
//! # Invariants
//! - A gzip target's stream is sequential-only. Seek to offset 0 is a no-op;
//!   any other seek and all positional reads fail with a typed error.
//! - A gzip target's size is unknown (streamed).

use std::io::{self, Read};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use flate2::read::MultiGzDecoder;
use memchr::memmem;
use tracing::debug;

use crate::block::Slot;
use crate::error::StreamError;
use crate::target::{ScanTarget, TargetMsg, TargetStream};

/// gzip magic bytes.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A gzip stream found inside a parent target.
pub struct GzipStreamTarget {
    pub(crate) parent: Arc<ScanTarget>,
    /// Byte offset of the gzip header within the parent.
    pub(crate) gzip_offset: u64,
}

impl GzipStreamTarget {
    pub(crate) fn describe(&self) -> String {
        format!(
            "Gzipfile @ byte {} in [{}]",
            self.gzip_offset,
            self.parent.describe()
        )
    }

    pub(crate) fn open_stream(&self) -> Result<Box<dyn TargetStream>, StreamError> {
        let mut stream = self.parent.open()?;
        stream.seek_to(self.gzip_offset)?;
        Ok(Box::new(GzipTargetStream {
            decoder: MultiGzDecoder::new(stream),
        }))
    }
}

/// Decompressing stream over a gzip member chain.
struct GzipTargetStream {
    decoder: MultiGzDecoder<Box<dyn TargetStream>>,
}

impl Read for GzipTargetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

impl TargetStream for GzipTargetStream {
    fn seek_to(&mut self, pos: u64) -> Result<(), StreamError> {
        if pos == 0 {
            return Ok(());
        }
        Err(StreamError::UnsupportedSeek)
    }

    fn read_at(&mut self, _buf: &mut [u8], _pos: u64) -> Result<(), StreamError> {
        Err(StreamError::UnsupportedReadAt)
    }
}

/// Check that a magic hit at `gzip_offset` is backed by a decodable stream.
fn probe(source: &Arc<ScanTarget>, gzip_offset: u64) -> bool {
    let Ok(mut stream) = source.open() else {
        return false;
    };
    if stream.seek_to(gzip_offset).is_err() {
        return false;
    }
    let mut decoder = MultiGzDecoder::new(stream);
    let mut one = [0u8; 1];
    matches!(decoder.read(&mut one), Ok(1))
}

/// Finder stage: watch blocks for the gzip magic, register validated hits as
/// virtual targets, forward every block unchanged.
///
/// Sentinel accounting is identical to the ZIP finder: one absorbed
/// end-of-target per registered child, forwarded sentinels do not end the
/// stage.
pub(crate) fn run_gzip_finder(
    blocks_in: Receiver<Slot>,
    blocks_out: Sender<Slot>,
    targets: Sender<TargetMsg>,
) {
    let magic = memmem::Finder::new(&GZIP_MAGIC);
    let mut opened_targets: u64 = 0;

    while let Ok(slot) = blocks_in.recv() {
        let block = match slot {
            Slot::EndOfTarget => {
                if opened_targets > 0 {
                    opened_targets -= 1;
                } else if blocks_out.send(Slot::EndOfTarget).is_err() {
                    return;
                }
                continue;
            }
            Slot::Block(block) => block,
        };

        if let (Some(hit), Some(source)) = (magic.find(&block.data), block.source.as_ref()) {
            let gzip_offset = block.offset + hit as u64;
            if probe(source, gzip_offset) {
                debug!(
                    "gzip stream at byte {} of {}",
                    gzip_offset,
                    source.describe()
                );
                let child = Arc::new(ScanTarget::GzipStream(GzipStreamTarget {
                    parent: Arc::clone(source),
                    gzip_offset,
                }));
                if targets.send(TargetMsg::Scan(child)).is_ok() {
                    opened_targets += 1;
                }
            }
        }

        if blocks_out.send(Slot::Block(block)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn gzipped(data: &[u8]) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        let mut encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap();
        tmp.flush().unwrap();
        tmp
    }

    fn file_target(tmp: &NamedTempFile) -> Arc<ScanTarget> {
        Arc::new(ScanTarget::file(tmp.path().to_path_buf(), 0))
    }

    #[test]
    fn probe_accepts_a_real_stream_and_rejects_junk() {
        let good = gzipped(b"payload");
        assert!(probe(&file_target(&good), 0));

        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(&[0x1f, 0x8b, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        bad.flush().unwrap();
        assert!(!probe(&file_target(&bad), 0));
    }

    #[test]
    fn probe_rejects_an_empty_member() {
        let empty = gzipped(b"");
        assert!(!probe(&file_target(&empty), 0));
    }

    #[test]
    fn stream_decompresses_and_rejects_random_access() {
        let tmp = gzipped(b"some wallet bytes");
        let target = GzipStreamTarget {
            parent: file_target(&tmp),
            gzip_offset: 0,
        };
        assert_eq!(
            target.describe(),
            format!("Gzipfile @ byte 0 in [{}]", tmp.path().display())
        );

        let mut stream = target.open_stream().unwrap();
        assert!(stream.seek_to(0).is_ok());
        assert!(matches!(
            stream.seek_to(4),
            Err(StreamError::UnsupportedSeek)
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            stream.read_at(&mut buf, 0),
            Err(StreamError::UnsupportedReadAt)
        ));

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"some wallet bytes");
    }
}
