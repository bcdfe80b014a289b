//! Double virtual-memory mapping of one physical region, used to back
//! circular [`SharedBuffer`](crate::SharedBuffer)s.
//!
//! The trick: back the region with an anonymous `memfd`, then `mmap` it
//! twice at adjacent virtual addresses. A write to byte `i` and a read of
//! byte `i + len` (for `i < len`) observe the same physical page, giving a
//! ring buffer that never needs an explicit wrap-around in the reader.

use std::io;
use std::ptr::NonNull;

/// A region of `len` bytes mapped twice, back to back, so that
/// `[0, len)` and `[len, 2*len)` alias the same physical memory.
pub struct CircularMapping {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: `CircularMapping` owns its mapping exclusively (no other handle to
// the same `mmap` region exists) and exposes it only through `&`/`&mut`
// borrows of `self`, so moving it across threads is sound.
unsafe impl Send for CircularMapping {}

impl CircularMapping {
    /// Maps `len` bytes twice, back to back. `len` is rounded up by the
    /// caller to a page multiple where that matters; this implementation
    /// rounds internally so callers may request any size.
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "circular length must be nonzero"));
        }
        let page = page_size();
        let rounded = len.div_ceil(page) * page;

        unsafe {
            let name = std::ffi::CString::new("flow-circular").unwrap();
            let fd = libc::memfd_create(name.as_ptr(), 0);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let guard = FdGuard(fd);

            if libc::ftruncate(fd, rounded as libc::off_t) != 0 {
                return Err(io::Error::last_os_error());
            }

            // Reserve a contiguous region of 2*rounded bytes so the two
            // mappings land adjacently, then re-map each half over it.
            let reservation = libc::mmap(
                std::ptr::null_mut(),
                rounded * 2,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if reservation == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }

            let first = libc::mmap(
                reservation,
                rounded,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                fd,
                0,
            );
            if first == libc::MAP_FAILED {
                libc::munmap(reservation, rounded * 2);
                return Err(io::Error::last_os_error());
            }

            let second = libc::mmap(
                (reservation as usize + rounded) as *mut libc::c_void,
                rounded,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                fd,
                0,
            );
            if second == libc::MAP_FAILED {
                libc::munmap(reservation, rounded * 2);
                return Err(io::Error::last_os_error());
            }

            drop(guard); // the mappings keep the file alive; the fd itself is not needed further.

            Ok(CircularMapping {
                base: NonNull::new(reservation as *mut u8).expect("mmap returned null on success"),
                len: rounded,
            })
        }
    }

    /// The physical length of one copy; a view may legally index up to
    /// `2 * physical_len()` bytes into the mirror before wrapping.
    pub fn physical_len(&self) -> usize {
        self.len
    }

    /// The full mirrored region: `[0, len)` is the primary mapping,
    /// `[len, 2*len)` aliases the same physical pages. A caller indexing
    /// past `len` observes the same bytes as indexing from zero, which is
    /// the entire point of the double mapping — callers that only want the
    /// primary half should slice `&as_slice()[..physical_len()]` themselves.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len * 2) }
    }

    /// The full mirrored region, mutably. See [`CircularMapping::as_slice`].
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len * 2) }
    }
}

impl Drop for CircularMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len * 2);
        }
    }
}

struct FdGuard(libc::c_int);
impl Drop for FdGuard {
    fn drop(&mut self) {
        unsafe { libc::close(self.0); }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_writes() {
        let Ok(mut m) = CircularMapping::new(4096) else { return };
        m.as_mut_slice()[0] = 0xAB;
        m.as_mut_slice()[4095] = 0xCD;
        // Read past the logical end through the alias mapping directly.
        let ptr = m.base.as_ptr();
        unsafe {
            assert_eq!(*ptr.add(4096), 0xAB);
            assert_eq!(*ptr.add(8191), 0xCD);
        }
    }

    #[test]
    fn as_slice_exposes_the_full_mirrored_region() {
        let Ok(mut m) = CircularMapping::new(4096) else { return };
        assert_eq!(m.as_slice().len(), 2 * m.physical_len());
        m.as_mut_slice()[0] = 0x11;
        m.as_mut_slice()[200] = 0x22;
        // A caller indexing at `physical_len() + i` must see the same byte
        // as indexing at `i`, without reaching into private fields.
        assert_eq!(m.as_slice()[m.physical_len()], 0x11);
        assert_eq!(m.as_slice()[m.physical_len() + 200], 0x22);
    }
}
