//! ZIP detection and expansion.
//!
//! ZIP archives keep their index at the end: the end-of-central-directory
//! record (EOCD) points back at the central directory, which in turn points
//! at each entry's local header. The finder scans blocks for the EOCD
//! signature, derives the archive's position and extent in the parent target
//! from the EOCD fields alone, and publishes one virtual target per entry.
//! Format reference: APPNOTE.TXT (PKWARE).
//!
//! # Invariants
//! - All sizes and offsets are untrusted and validated against the archive
//!   window before use.
//! - Any parse failure anywhere means "not a zip": zero targets, no error.
//!   A four-byte signature match in arbitrary data is routine.
//!
//! # Supported
//! - Zip32, entries stored (method 0) or deflated (method 8).
//!
//! # Not Supported
//! - Zip64 (0xFFFF/0xFFFFFFFF sentinel fields), multi-disk archives,
//!   encrypted entries. All of these read as "not a zip" / unopenable.

use std::io::Read;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use flate2::read::DeflateDecoder;
use memchr::memmem;
use tracing::debug;

use crate::block::Slot;
use crate::error::StreamError;
use crate::target::{MemStream, ScanTarget, TargetMsg, TargetStream};

/// End-of-central-directory signature, `PK\x05\x06`.
pub const ECD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

/// EOCD field offsets (bytes from the signature).
const ECD_CENTRAL_DIRECTORY_SIZE: u64 = 12;
const ECD_ARCHIVE_START: u64 = 16;
const ECD_COMMENT_LEN: u64 = 20;

const SIG_CDFH: u32 = 0x0201_4b50;
const SIG_LFH: u32 = 0x0403_4b50;

/// EOCD fixed-field length.
const EOCD_LEN: usize = 22;
/// How far back from the window end the EOCD is searched for.
/// 64 KiB comment plus header margin.
const EOCD_SEARCH_MAX: u64 = 66 * 1024;

/// Central directory fixed header length.
const CDFH_LEN: usize = 46;
/// Local file header fixed length.
const LFH_LEN: usize = 30;

/// One entry of a ZIP archive found inside a parent target.
///
/// Stores only where the archive sits in the parent and which entry this is;
/// the archive structure is re-parsed from the parent on every `open()`.
pub struct ZipEntryTarget {
    pub(crate) parent: Arc<ScanTarget>,
    /// Byte offset of the archive's first byte within the parent.
    pub(crate) zip_start: u64,
    /// Total archive length derived from the EOCD fields.
    pub(crate) zip_size: u64,
    pub(crate) index: u32,
    pub(crate) uncompressed_size: u64,
}

impl ZipEntryTarget {
    pub(crate) fn describe(&self) -> String {
        format!(
            "Zipfile #{} @ byte {} in [{}]",
            self.index,
            self.zip_start,
            self.parent.describe()
        )
    }

    /// Inflate the entry payload in full and serve it from memory.
    pub(crate) fn open_stream(&self) -> Result<Box<dyn TargetStream>, StreamError> {
        let stream = self.parent.open()?;
        let mut window = ZipWindow::open(stream, self.zip_start, self.zip_size)?;
        let meta = window.entry_at(self.index)?;
        let payload = window.read_entry_payload(&meta)?;
        Ok(Box::new(MemStream::new(payload)))
    }
}

/// Central-directory metadata for a single entry.
#[derive(Clone, Copy)]
struct ZipEntryMeta {
    index: u32,
    flags: u16,
    method: u16,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
}

impl ZipEntryMeta {
    fn is_encrypted(&self) -> bool {
        (self.flags & 0x0001) != 0
    }
}

/// Cursor over one ZIP archive embedded in a parent target.
///
/// `start`/`len` delimit the archive window within the parent; every offset
/// in the archive structure is relative to `start` and validated against
/// `len` before any read.
struct ZipWindow {
    stream: Box<dyn TargetStream>,
    start: u64,
    len: u64,
    cd_pos: u64,
    cd_end: u64,
    entries_total: u32,
    entries_seen: u32,
}

impl ZipWindow {
    /// Locate and parse the EOCD inside the window, then position the cursor
    /// at the central directory.
    fn open(
        mut stream: Box<dyn TargetStream>,
        start: u64,
        len: u64,
    ) -> Result<Self, StreamError> {
        if len < EOCD_LEN as u64 {
            return Err(StreamError::Corrupt("archive too small"));
        }

        let win_len = len.min(EOCD_SEARCH_MAX) as usize;
        let mut win = vec![0u8; win_len];
        stream.read_at(&mut win, start + len - win_len as u64)?;

        let eocd_rel = rfind_eocd(&win)
            .ok_or(StreamError::Corrupt("missing end-of-central-directory"))?;
        let eocd = &win[eocd_rel..];

        let entries_total = le_u16(&eocd[10..12]) as u32;
        let cd_size = le_u32(&eocd[12..16]) as u64;
        let cd_off = le_u32(&eocd[16..20]) as u64;

        if entries_total == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_off == 0xFFFF_FFFF {
            return Err(StreamError::Corrupt("zip64 archives not supported"));
        }

        let cd_end = cd_off.saturating_add(cd_size);
        if cd_end > len {
            return Err(StreamError::Corrupt("central directory out of bounds"));
        }

        Ok(Self {
            stream,
            start,
            len,
            cd_pos: cd_off,
            cd_end,
            entries_total,
            entries_seen: 0,
        })
    }

    /// Yield the next central-directory entry, validating its signature.
    fn next_entry(&mut self) -> Result<Option<ZipEntryMeta>, StreamError> {
        if self.entries_seen >= self.entries_total {
            return Ok(None);
        }
        if self.cd_pos.saturating_add(CDFH_LEN as u64) > self.cd_end {
            return Err(StreamError::Corrupt("central directory truncated"));
        }

        let mut hdr = [0u8; CDFH_LEN];
        self.stream.read_at(&mut hdr, self.start + self.cd_pos)?;
        if le_u32(&hdr[0..4]) != SIG_CDFH {
            return Err(StreamError::Corrupt("bad central directory signature"));
        }

        let flags = le_u16(&hdr[8..10]);
        let method = le_u16(&hdr[10..12]);
        let compressed_size = le_u32(&hdr[20..24]) as u64;
        let uncompressed_size = le_u32(&hdr[24..28]) as u64;
        let name_len = le_u16(&hdr[28..30]) as u64;
        let extra_len = le_u16(&hdr[30..32]) as u64;
        let comment_len = le_u16(&hdr[32..34]) as u64;
        let local_header_offset = le_u32(&hdr[42..46]) as u64;

        if compressed_size == 0xFFFF_FFFF
            || uncompressed_size == 0xFFFF_FFFF
            || local_header_offset == 0xFFFF_FFFF
        {
            return Err(StreamError::Corrupt("zip64 archives not supported"));
        }

        let index = self.entries_seen;
        self.entries_seen += 1;
        self.cd_pos = self
            .cd_pos
            .saturating_add(CDFH_LEN as u64 + name_len + extra_len + comment_len);

        Ok(Some(ZipEntryMeta {
            index,
            flags,
            method,
            compressed_size,
            uncompressed_size,
            local_header_offset,
        }))
    }

    /// Walk the central directory to the entry at `index`.
    fn entry_at(&mut self, index: u32) -> Result<ZipEntryMeta, StreamError> {
        while let Some(meta) = self.next_entry()? {
            if meta.index == index {
                return Ok(meta);
            }
        }
        Err(StreamError::Corrupt("entry index out of range"))
    }

    /// Read and decompress one entry's payload into memory.
    fn read_entry_payload(&mut self, meta: &ZipEntryMeta) -> Result<Vec<u8>, StreamError> {
        if meta.is_encrypted() {
            return Err(StreamError::Corrupt("encrypted entry"));
        }
        if meta.method != 0 && meta.method != 8 {
            return Err(StreamError::Corrupt("unsupported compression method"));
        }
        if meta
            .local_header_offset
            .saturating_add(LFH_LEN as u64)
            > self.len
        {
            return Err(StreamError::Corrupt("local header out of bounds"));
        }

        let mut lfh = [0u8; LFH_LEN];
        self.stream
            .read_at(&mut lfh, self.start + meta.local_header_offset)?;
        if le_u32(&lfh[0..4]) != SIG_LFH {
            return Err(StreamError::Corrupt("bad local header signature"));
        }

        let name_len = le_u16(&lfh[26..28]) as u64;
        let extra_len = le_u16(&lfh[28..30]) as u64;
        let data_start = meta.local_header_offset + LFH_LEN as u64 + name_len + extra_len;
        let data_end = data_start.saturating_add(meta.compressed_size);
        if data_end > self.len {
            return Err(StreamError::Corrupt("entry payload out of bounds"));
        }

        self.stream.seek_to(self.start + data_start)?;
        let mut raw = vec![0u8; meta.compressed_size as usize];
        read_exact_stream(&mut *self.stream, &mut raw)?;

        match meta.method {
            0 => Ok(raw),
            _ => {
                let mut inflated = Vec::with_capacity(meta.uncompressed_size as usize);
                DeflateDecoder::new(&raw[..])
                    .read_to_end(&mut inflated)
                    .map_err(StreamError::Io)?;
                Ok(inflated)
            }
        }
    }
}

/// Expand the archive whose EOCD signature sits at `ecd_offset` within
/// `source`, publishing one virtual target per entry.
///
/// Returns the number of targets published; any failure returns 0 (the
/// signature was a false positive).
pub(crate) fn expand(
    source: &Arc<ScanTarget>,
    ecd_offset: u64,
    targets: &Sender<TargetMsg>,
) -> u64 {
    let children = match enumerate(source, ecd_offset) {
        Ok(children) => children,
        Err(_) => return 0,
    };

    debug!(
        "zip archive at byte {} of {}: {} entries",
        ecd_offset,
        source.describe(),
        children.len()
    );

    let mut published = 0;
    for child in children {
        if targets.send(TargetMsg::Scan(child)).is_err() {
            break;
        }
        published += 1;
    }
    published
}

fn enumerate(
    source: &Arc<ScanTarget>,
    ecd_offset: u64,
) -> Result<Vec<Arc<ScanTarget>>, StreamError> {
    let mut stream = source.open()?;

    let mut word = [0u8; 4];
    stream.read_at(&mut word, ecd_offset + ECD_CENTRAL_DIRECTORY_SIZE)?;
    let cd_size = le_u32(&word) as u64;
    stream.read_at(&mut word, ecd_offset + ECD_ARCHIVE_START)?;
    let cd_start = le_u32(&word) as u64;
    let mut half = [0u8; 2];
    stream.read_at(&mut half, ecd_offset + ECD_COMMENT_LEN)?;
    let comment_len = le_u16(&half) as u64;

    // The central directory sits immediately before the EOCD, and its own
    // offset field says how far into the archive it is. Walking both back
    // from the signature position locates the archive start in the parent.
    let file_offset_from_ecd = cd_start + cd_size;
    let zip_size = file_offset_from_ecd + ECD_COMMENT_LEN + 2 + comment_len;
    let zip_start = ecd_offset
        .checked_sub(file_offset_from_ecd)
        .ok_or(StreamError::Corrupt("archive would start before the target"))?;

    let mut window = ZipWindow::open(stream, zip_start, zip_size)?;
    let mut children = Vec::new();
    while let Some(meta) = window.next_entry()? {
        children.push(Arc::new(ScanTarget::ZipEntry(ZipEntryTarget {
            parent: Arc::clone(source),
            zip_start,
            zip_size,
            index: meta.index,
            uncompressed_size: meta.uncompressed_size,
        })));
    }
    Ok(children)
}

/// Finder stage: watch blocks for the EOCD signature, expand hits, forward
/// every block unchanged.
///
/// `opened_targets` counts child targets whose eventual end-of-target
/// sentinel must be absorbed here rather than forwarded, so that only the
/// outermost target's sentinel ever reaches the matcher. Forwarding a
/// sentinel does not end the stage: targets registered by the other finder
/// may still be pending, and their blocks flow through here too. The stage
/// ends when its input disconnects during shutdown.
pub(crate) fn run_zip_finder(
    blocks_in: Receiver<Slot>,
    blocks_out: Sender<Slot>,
    targets: Sender<TargetMsg>,
) {
    let signature = memmem::Finder::new(&ECD_SIGNATURE);
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

        if let (Some(hit), Some(source)) = (signature.find(&block.data), block.source.as_ref()) {
            opened_targets += expand(source, block.offset + hit as u64, &targets);
        }

        if blocks_out.send(Slot::Block(block)).is_err() {
            return;
        }
    }
}

/// Backward search for the EOCD signature, skipping matches too close to the
/// window end to hold the fixed fields.
fn rfind_eocd(win: &[u8]) -> Option<usize> {
    let mut hay = win;
    loop {
        let pos = memmem::rfind(hay, &ECD_SIGNATURE)?;
        if pos + EOCD_LEN <= win.len() {
            return Some(pos);
        }
        hay = &hay[..pos];
    }
}

fn read_exact_stream<R: Read + ?Sized>(r: &mut R, dst: &mut [u8]) -> Result<(), StreamError> {
    let mut filled = 0;
    while filled < dst.len() {
        let n = match r.read(&mut dst[filled..]) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Io(e)),
        };
        if n == 0 {
            return Err(StreamError::Corrupt("entry payload truncated"));
        }
        filled += n;
    }
    Ok(())
}

#[inline(always)]
fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline(always)]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
