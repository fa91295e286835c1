//! Low-level file mapping helpers shared by the columnar and block stores:
//! space preallocation and kernel read-ahead hints.

use std::fs::File;

use eyre::Result;

#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// Reserves `bytes` of backing store for `file`, extending but never
/// shrinking it. Uses `posix_fallocate` where available so later page
/// faults cannot hit ENOSPC.
pub fn preallocate(file: &File, bytes: u64) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, bytes as libc::off_t) };
        eyre::ensure!(
            rc == 0,
            "posix_fallocate of {} bytes failed: {}",
            bytes,
            std::io::Error::from_raw_os_error(rc)
        );
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    {
        use eyre::WrapErr;
        let current = file
            .metadata()
            .wrap_err("failed to read file metadata before preallocation")?
            .len();
        if current < bytes {
            file.set_len(bytes)
                .wrap_err_with(|| format!("failed to extend file to {} bytes", bytes))?;
        }
        Ok(())
    }
}

/// Advises the kernel that `map` (backed by `file`) will be read
/// sequentially and soon. Hints only; failures are ignored.
pub fn advise_sequential(file: &File, ptr: *const u8, len: usize) {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = file;

    #[cfg(unix)]
    // SAFETY: madvise is a hint over a live mapping owned by the caller; it
    // neither unmaps nor mutates the region.
    unsafe {
        libc::madvise(ptr as *mut libc::c_void, len, libc::MADV_SEQUENTIAL);
        libc::madvise(ptr as *mut libc::c_void, len, libc::MADV_WILLNEED);
    }

    #[cfg(not(unix))]
    {
        let _ = (file, ptr, len);
    }
}
