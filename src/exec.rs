//! Executable Memory
//!
//! unsafe only for mmap/munmap, the I-cache flush, and the call into the region.

use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::ptr::{self, NonNull};

use crate::error::{ProbeError, Result};

/// Used when the OS will not report a page size.
pub const FALLBACK_PAGE_SIZE: usize = 4096;

const FALLBACK: NonZeroUsize = match NonZeroUsize::new(FALLBACK_PAGE_SIZE) {
    Some(nz) => nz,
    None => panic!("fallback page size is zero"),
};

/// Validated page size: non-zero power of two.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct PageSize(NonZeroUsize);

impl PageSize {
    pub fn new(bytes: usize) -> Result<Self> {
        let nz = NonZeroUsize::new(bytes).ok_or(ProbeError::InvalidPageSize {
            bytes,
            reason: "must be non-zero",
        })?;
        if !bytes.is_power_of_two() {
            return Err(ProbeError::InvalidPageSize {
                bytes,
                reason: "must be a power of two",
            });
        }
        Ok(Self(nz))
    }

    /// Page size reported by the OS.
    pub fn query() -> Self {
        // SAFETY: sysconf has no memory-safety preconditions.
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(sz)
            .ok()
            .and_then(|sz| Self::new(sz).ok())
            .unwrap_or(Self(FALLBACK))
    }

    /// Jump stride larger than the host page. Must stay a multiple of `host`
    /// so every mapping length remains page-granular.
    pub fn stride(bytes: usize, host: PageSize) -> Result<Self> {
        let stride = Self::new(bytes)?;
        if stride.get() < host.get() {
            return Err(ProbeError::InvalidPageSize {
                bytes,
                reason: "must not be smaller than the host page size",
            });
        }
        Ok(stride)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    /// Byte length of `pages` pages, or `SizeOverflow`.
    pub fn bytes_for(self, pages: usize) -> Result<usize> {
        pages
            .checked_mul(self.get())
            .filter(|&len| len <= isize::MAX as usize)
            .ok_or(ProbeError::SizeOverflow {
                pages,
                page_size: self.get(),
            })
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::query()
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Owned RWX anonymous mapping. Unmapped on drop.
pub struct ExecRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl ExecRegion {
    /// Map `pages` pages readable, writable and executable at once.
    pub fn map(pages: usize, page_size: PageSize) -> Result<Self> {
        if pages == 0 {
            return Err(ProbeError::InvalidArgument(
                "executable region needs at least one page".into(),
            ));
        }
        let len = page_size.bytes_for(pages)?;

        // SAFETY: anonymous private mapping at a kernel-chosen address; no
        // existing memory is affected.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if raw == libc::MAP_FAILED {
            return Err(ProbeError::Map {
                bytes: len,
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(raw as *mut u8).ok_or_else(|| ProbeError::Map {
            bytes: len,
            source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
        })?;

        tracing::trace!(addr = ?ptr, len, pages, "mapped executable region");
        Ok(Self { ptr, len })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn base(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the mapping is readable for `len` bytes and lives as long as self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes the access exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let capacity = self.len;
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= capacity)
            .ok_or(ProbeError::OutOfBounds {
                offset,
                len: bytes.len(),
                capacity,
            })?;
        self.as_bytes_mut()[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Tile `pattern` across the whole region. The region length must be a
    /// multiple of the pattern length.
    pub fn fill(&mut self, pattern: &[u8]) -> Result<()> {
        if pattern.is_empty() || self.len % pattern.len() != 0 {
            return Err(ProbeError::InvalidArgument(format!(
                "fill pattern of {} bytes does not tile a {}-byte region",
                pattern.len(),
                self.len
            )));
        }
        if let [byte] = pattern {
            self.as_bytes_mut().fill(*byte);
        } else {
            for chunk in self.as_bytes_mut().chunks_exact_mut(pattern.len()) {
                chunk.copy_from_slice(pattern);
            }
        }
        Ok(())
    }

    /// Make data writes visible to instruction fetch.
    pub fn sync_icache(&self) {
        let begin = self.ptr.as_ptr();
        // SAFETY: [begin, begin + len) is inside this mapping.
        let end = unsafe { begin.add(self.len) };
        flush_icache(begin, end);
    }

    /// Call the region's base address as `extern "C" fn()`.
    ///
    /// # Safety
    ///
    /// The code at offset 0 must follow the host calling convention and
    /// return; `chain::walk` establishes this for generated chains.
    #[inline]
    pub unsafe fn invoke(&self) {
        let entry: extern "C" fn() = std::mem::transmute(self.ptr.as_ptr());
        entry();
    }

    /// `invoke` repeated `count` times through one fn pointer.
    ///
    /// # Safety
    ///
    /// Same as [`ExecRegion::invoke`].
    #[inline]
    pub unsafe fn invoke_repeated(&self, count: u64) {
        let entry: extern "C" fn() = std::mem::transmute(self.ptr.as_ptr());
        for _ in 0..count {
            entry();
        }
    }
}

impl fmt::Debug for ExecRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecRegion")
            .field("base", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for ExecRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped once.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
        if rc != 0 {
            let err = ProbeError::Unmap {
                bytes: self.len,
                source: io::Error::last_os_error(),
            };
            match std::error::Error::source(&err) {
                Some(source) => tracing::warn!(error = %source, "{err}"),
                None => tracing::warn!("{err}"),
            }
        } else {
            tracing::trace!(addr = ?self.ptr, len = self.len, "unmapped executable region");
        }
    }
}

#[cfg(all(target_arch = "aarch64", not(target_os = "macos")))]
fn flush_icache(begin: *mut u8, end: *mut u8) {
    extern "C" {
        fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
    }
    // SAFETY: range is a live mapping owned by the caller.
    unsafe { __clear_cache(begin as *mut libc::c_char, end as *mut libc::c_char) }
}

#[cfg(all(target_arch = "aarch64", target_os = "macos"))]
fn flush_icache(begin: *mut u8, end: *mut u8) {
    extern "C" {
        fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
    }
    // SAFETY: range is a live mapping owned by the caller.
    unsafe { sys_icache_invalidate(begin as *mut libc::c_void, end as usize - begin as usize) }
}

#[cfg(not(target_arch = "aarch64"))]
fn flush_icache(_begin: *mut u8, _end: *mut u8) {
    // x86-64 keeps the I-cache coherent with stores; ordering them is enough.
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}
