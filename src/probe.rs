//! Target size probe.
//!
//! Regular files answer from `stat`. Raw block devices (`/dev/sdb` and
//! friends) stat as zero-length on Linux, so those are sized with the
//! `BLKGETSIZE64` ioctl instead.

use std::fs;
use std::io;
use std::path::Path;

/// Size of the byte source at `path`, in bytes.
pub fn size_of(path: &Path) -> io::Result<u64> {
    let meta = fs::metadata(path)?;

    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::FileTypeExt;
        if meta.len() == 0 && meta.file_type().is_block_device() {
            return block_device_size(path);
        }
    }

    Ok(meta.len())
}

#[cfg(target_os = "linux")]
fn block_device_size(path: &Path) -> io::Result<u64> {
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    // _IOR(0x12, 114, size_t)
    const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

    let file = File::open(path)?;
    let mut size: u64 = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut size as *mut u64) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn regular_file_size_comes_from_stat() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 1234]).unwrap();
        tmp.flush().unwrap();
        assert_eq!(size_of(tmp.path()).unwrap(), 1234);
    }

    #[test]
    fn missing_path_reports_error() {
        assert!(size_of(Path::new("./no/such/device")).is_err());
    }
}
