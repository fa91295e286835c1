//! # Huge-Page Staging Memory
//!
//! Anonymous memory backing the reader's staging copies. Analytical passes
//! that stream a whole day of columns are TLB-bound as much as
//! memory-bandwidth-bound, so the slab tries hard to sit on 2 MiB pages:
//!
//! 1. Round the request up to a 2 MiB multiple and `mmap` with
//!    `MAP_HUGETLB | MAP_HUGE_2MB | MAP_POPULATE`. This succeeds only when
//!    the host has preallocated hugetlb pages.
//! 2. On failure, fall back to an ordinary anonymous mapping and ask for
//!    transparent huge pages with `madvise(MADV_HUGEPAGE)`.
//!
//! Either way the caller gets a plain byte slab, freed with `munmap` on
//! drop. Whether real huge pages were obtained is observable via
//! [`HugeSlab::is_huge`] but does not change behavior.

use std::ptr::{self, NonNull};
use std::slice;

use eyre::{bail, ensure, Result};

#[cfg(target_os = "linux")]
use crate::config::HUGE_PAGE_BYTES;

/// An anonymous memory slab, huge-page backed when the host allows it.
#[derive(Debug)]
pub struct HugeSlab {
    ptr: NonNull<u8>,
    len: usize,
    huge: bool,
}

// SAFETY: the slab exclusively owns its mapping; the raw pointer is not
// shared outside &self/&mut self borrows.
unsafe impl Send for HugeSlab {}

impl HugeSlab {
    /// Allocates a slab of at least `bytes` bytes, zero-filled.
    pub fn alloc(bytes: usize) -> Result<Self> {
        ensure!(bytes > 0, "cannot allocate an empty slab");

        #[cfg(target_os = "linux")]
        {
            let rounded = (bytes + HUGE_PAGE_BYTES - 1) & !(HUGE_PAGE_BYTES - 1);
            let flags = libc::MAP_PRIVATE
                | libc::MAP_ANONYMOUS
                | libc::MAP_POPULATE
                | libc::MAP_HUGETLB
                | libc::MAP_HUGE_2MB;
            // SAFETY: anonymous mapping, no fd, no aliasing of existing memory.
            let p = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    rounded,
                    libc::PROT_READ | libc::PROT_WRITE,
                    flags,
                    -1,
                    0,
                )
            };
            if p != libc::MAP_FAILED {
                let Some(ptr) = NonNull::new(p.cast::<u8>()) else {
                    bail!("mmap returned a null mapping");
                };
                return Ok(Self {
                    ptr,
                    len: rounded,
                    huge: true,
                });
            }
        }

        // SAFETY: anonymous mapping, no fd, no aliasing of existing memory.
        let p = unsafe {
            libc::mmap(
                ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        ensure!(
            p != libc::MAP_FAILED,
            "anonymous mmap of {} bytes failed: {}",
            bytes,
            std::io::Error::last_os_error()
        );
        let Some(ptr) = NonNull::new(p.cast::<u8>()) else {
            bail!("mmap returned a null mapping");
        };

        #[cfg(target_os = "linux")]
        // SAFETY: hint over the mapping just created.
        unsafe {
            libc::madvise(p, bytes, libc::MADV_HUGEPAGE);
        }

        Ok(Self {
            ptr,
            len: bytes,
            huge: false,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the slab sits on reserved hugetlb pages (as opposed to the
    /// transparent-huge-page fallback).
    pub fn is_huge(&self) -> bool {
        self.huge
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live private mapping owned by self.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe a live private mapping owned by self.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HugeSlab {
    fn drop(&mut self) {
        // SAFETY: exactly one munmap of the mapping created in alloc.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}
