//! Page-size arithmetic shared by the prefetch and eviction primitives.
//!
//! Both helpers assume `page_size` is a power of two, which holds for every
//! platform page size this engine targets (4 KiB / 16 KiB / 64 KiB).

/// Round `offset` down to the nearest multiple of `page_size`.
pub fn align_down(offset: u64, page_size: u64) -> u64 {
    offset & !(page_size - 1)
}

/// Round `offset` up to the nearest multiple of `page_size`.
pub fn align_up(offset: u64, page_size: u64) -> u64 {
    (offset + page_size - 1) & !(page_size - 1)
}

/// The system page size, queried once and cached.
pub fn system_page_size() -> u64 {
    use std::sync::OnceLock;
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions and always
        // returns a positive value on Linux.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if raw <= 0 {
            4096
        } else {
            raw as u64
        }
    })
}
