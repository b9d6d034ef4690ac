//! The file-backed weight region: a read-only mapping over the whole
//! weights file, plus the page-aligned prefetch/evict primitives that
//! remap or advise sub-ranges of it.
//!
//! Prefetch is implemented as a `MAP_FIXED | MAP_POPULATE` remap over an
//! already-mapped range: the kernel synchronously pre-reads the pages
//! before the call returns, overlapping disk I/O with the scheduler
//! thread's own progress rather than the compute thread's. Eviction is a
//! `MADV_DONTNEED` advisory; it never unmaps, so the virtual range stays
//! backed by the file and a subsequent page fault simply re-reads it.

use std::ffi::c_void;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::error::CatalogError;
use crate::page::{align_down, align_up, system_page_size};

/// A read-only mapping over an entire weights file, shared by every
/// cooperating prefetch/evict call.
pub struct FileBackedRegion {
    file: File,
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is read-only and shared; concurrent prefetch/evict
// calls address disjoint or idempotent sub-ranges per the scheduling
// protocol, and the base pointer itself is never mutated after creation.
unsafe impl Send for FileBackedRegion {}
unsafe impl Sync for FileBackedRegion {}

impl FileBackedRegion {
    /// Open `path` read-only and map the whole file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        let len = len.max(1); // mmap of a zero-length file is undefined.

        // SAFETY: fd is a valid, open, readable file; len > 0; the mapping
        // is immediately checked against MAP_FAILED below.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(CatalogError::Io(std::io::Error::last_os_error()));
        }
        let base = NonNull::new(addr as *mut u8).expect("mmap returned a null non-failure address");

        Ok(Self { file, base, len })
    }

    /// Base virtual address of the mapping.
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Length of the mapped file, in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Prefetch `[start, end)` (file offsets), rounded out to page
    /// boundaries, using `workers` ephemeral threads splitting the range
    /// on page-aligned chunk boundaries. `workers` is clamped to `[1, 16]`.
    ///
    /// Mapping failure on any worker is logged and that worker's chunk is
    /// left demand-paged; the call never panics or returns an error.
    pub fn prefetch_range(&self, start: u64, end: u64, workers: usize) {
        let page_size = system_page_size();
        let aligned_start = align_down(start, page_size);
        let aligned_end = align_up(end, page_size);
        if aligned_end <= aligned_start {
            return;
        }
        let total = aligned_end - aligned_start;

        let workers = workers.clamp(1, 16) as u64;
        let chunk = align_up(total.div_ceil(workers), page_size).max(page_size);

        std::thread::scope(|scope| {
            let mut offset = aligned_start;
            while offset < aligned_end {
                let chunk_end = (offset + chunk).min(aligned_end);
                let chunk_start = offset;
                scope.spawn(move || {
                    self.remap_populate(chunk_start, chunk_end - chunk_start);
                });
                offset = chunk_end;
            }
        });

        debug!(
            start = aligned_start,
            end = aligned_end,
            bytes = total,
            workers,
            "prefetched layer fragment"
        );
    }

    /// Remap `[file_off, file_off + length)` at the matching address in
    /// the base mapping with populate-on-fault semantics.
    fn remap_populate(&self, file_off: u64, length: u64) {
        if length == 0 {
            return;
        }
        let addr = unsafe { self.base.as_ptr().add(file_off as usize) } as *mut c_void;

        // SAFETY: addr lies within [base, base+len) because the caller
        // page-aligned file_off/length against the mapped file's size;
        // MAP_FIXED replaces exactly that sub-range of the existing
        // mapping, which is the coordination mechanism this module relies
        // on (see module docs).
        let remapped = unsafe {
            libc::mmap(
                addr,
                length as usize,
                libc::PROT_READ,
                libc::MAP_SHARED | libc::MAP_FIXED | libc::MAP_POPULATE,
                self.file.as_raw_fd(),
                file_off as i64,
            )
        };
        if remapped == libc::MAP_FAILED {
            warn!(
                file_off,
                length,
                error = %std::io::Error::last_os_error(),
                "prefetch mmap(MAP_POPULATE) failed, falling back to demand paging"
            );
        }
    }

    /// Evict `[start, end)` (file offsets), rounded *inward* to page
    /// boundaries so no page straddling the edges of another layer's data
    /// is advised out. A degenerate inward range (S4) is a silent no-op.
    pub fn evict_range(&self, start: u64, end: u64) {
        let page_size = system_page_size();
        let aligned_start = align_up(start, page_size);
        let aligned_end = align_down(end, page_size);
        if aligned_end <= aligned_start {
            return;
        }
        let length = (aligned_end - aligned_start) as usize;
        let addr = unsafe { self.base.as_ptr().add(aligned_start as usize) } as *mut c_void;

        // SAFETY: addr/length lie within the mapping by construction above;
        // MADV_DONTNEED never unmaps, it only discards cached pages.
        let rc = unsafe { libc::madvise(addr, length, libc::MADV_DONTNEED) };
        if rc != 0 {
            warn!(
                start = aligned_start,
                end = aligned_end,
                error = %std::io::Error::last_os_error(),
                "madvise(MADV_DONTNEED) failed, pages remain resident"
            );
        } else {
            debug!(start = aligned_start, end = aligned_end, "evicted layer fragment");
        }
    }
}

impl Drop for FileBackedRegion {
    fn drop(&mut self) {
        // SAFETY: base/len describe exactly the mapping created in `open`.
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_file(bytes: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0xABu8; bytes]).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn open_maps_whole_file() {
        let f = make_file(8192);
        let region = FileBackedRegion::open(f.path()).unwrap();
        assert_eq!(region.len(), 8192);
        // Reading through the mapping should see the file's bytes.
        let byte = unsafe { *region.base() };
        assert_eq!(byte, 0xAB);
    }

    #[test]
    fn prefetch_then_evict_does_not_crash_and_preserves_readability() {
        let page = system_page_size();
        let f = make_file((page * 4) as usize);
        let region = FileBackedRegion::open(f.path()).unwrap();

        region.prefetch_range(page + 1, page * 3 - 1, 1);
        region.evict_range(page + 1, page * 3 - 1);

        // Eviction is advisory only — the mapping stays valid and readable.
        let byte = unsafe { *region.base().add((page * 2) as usize) };
        assert_eq!(byte, 0xAB);
    }

    #[test]
    fn prefetch_with_multiple_workers_covers_whole_range() {
        let page = system_page_size();
        let f = make_file((page * 8) as usize);
        let region = FileBackedRegion::open(f.path()).unwrap();

        region.prefetch_range(0, page * 8, 4);

        for i in 0..8 {
            let byte = unsafe { *region.base().add((page * i) as usize) };
            assert_eq!(byte, 0xAB);
        }
    }
}
