//! Block decompression seam.
//!
//! Bundles treat each compressed block as an opaque unit handled by an
//! external Oodle-style decompressor, reached through a function pointer
//! loaded by name from a shared object. The raw export is hostile in two
//! ways, both absorbed here so the rest of the crate can stay safe:
//!
//! - It **reads past the end of its input**. [`OodleCodec`] never hands it
//!   the caller's buffer: the source is copied into a fresh anonymous
//!   mapping whose trailing page is read-only, so the overrun is bounded
//!   and any stray write faults instead of corrupting the heap. Platforms
//!   without page protection get a plain copy with a 64-byte margin on
//!   both sides.
//! - It **may scribble past the end of its output**. Every destination must
//!   therefore extend [`SAFE_SPACE`] bytes beyond the decoded size; the
//!   adapter seeds that tail with a sentinel and tolerates (but logs) any
//!   clobbering.
//!
//! # Thread safety
//! The adapter allocates private scratch per call and holds no mutable
//! state, but the loaded export itself carries no reentrancy guarantee;
//! callers wanting concurrency must serialize externally.

use std::ffi::{c_int, c_void, OsStr};
use std::ptr;

use thiserror::Error;

/// Required destination (and source-copy) margin, in bytes.
pub const SAFE_SPACE: usize = 64;

/// Written into the destination tail before invocation; an overwrite is
/// observable but tolerated.
const TAIL_SENTINEL: u8 = 0xCD;

/// Export name used when the caller does not specify one.
pub const DEFAULT_EXPORT: &str = "Ooz_Decompress";

#[derive(Error, Debug)]
pub enum CodecError {
    /// The shared object or its export could not be loaded.
    #[error("failed to load decompressor: {0}")]
    Library(#[from] libloading::Error),
    /// The guard allocation for the source copy failed.
    #[error("guard allocation failed: {0}")]
    Guard(#[from] std::io::Error),
    /// The decompressor did not produce exactly the expected byte count.
    #[error("decompressor returned {returned}, expected {expected} bytes")]
    BadBlock { returned: i64, expected: usize },
}

/// Raw decompress export. Returns the number of bytes written on success,
/// anything else on failure. All trailing arguments are passed as zero.
type DecompressFn = unsafe extern "C" fn(
    src: *const u8,
    src_len: c_int,
    dst: *mut u8,
    dst_size: usize,
    _: c_int,
    _: c_int,
    _: c_int,
    _: *mut u8,
    _: usize,
    _: *mut c_void,
    _: *mut c_void,
    _: *mut c_void,
    _: usize,
    _: c_int,
) -> c_int;

/// One opaque block in, exactly `dst_size` bytes out.
pub trait BlockCodec {
    /// Decompress one block into the front of `dst`.
    ///
    /// `dst` must extend at least [`SAFE_SPACE`] bytes past `dst_size`;
    /// on success exactly `dst_size` bytes of it are meaningful.
    fn decompress_block(&self, src: &[u8], dst: &mut [u8], dst_size: usize)
        -> Result<(), CodecError>;
}

/// The production codec: a decompress export loaded from a shared object.
///
/// The library handle lives as long as the codec, which keeps the copied
/// function pointer valid.
pub struct OodleCodec {
    _lib:       libloading::Library,
    decompress: DecompressFn,
}

impl OodleCodec {
    /// Load `export` (default [`DEFAULT_EXPORT`]) from the shared object at
    /// `library`.
    pub fn load(library: impl AsRef<OsStr>, export: Option<&str>) -> Result<Self, CodecError> {
        let export = export.unwrap_or(DEFAULT_EXPORT);
        let lib = unsafe { libloading::Library::new(library.as_ref())? };
        let decompress = unsafe { *lib.get::<DecompressFn>(export.as_bytes())? };
        Ok(Self { _lib: lib, decompress })
    }
}

impl BlockCodec for OodleCodec {
    fn decompress_block(
        &self,
        src: &[u8],
        dst: &mut [u8],
        dst_size: usize,
    ) -> Result<(), CodecError> {
        assert!(
            dst.len() >= dst_size + SAFE_SPACE,
            "destination must carry {SAFE_SPACE} bytes of tail scratch"
        );

        let guarded = GuardedSource::copy(src)?;
        dst[dst_size..dst_size + SAFE_SPACE].fill(TAIL_SENTINEL);

        let returned = unsafe {
            (self.decompress)(
                guarded.as_ptr(),
                src.len() as c_int,
                dst.as_mut_ptr(),
                dst_size,
                0,
                0,
                0,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                0,
                0,
            )
        };
        drop(guarded);

        if returned as i64 != dst_size as i64 {
            return Err(CodecError::BadBlock { returned: returned as i64, expected: dst_size });
        }
        if dst[dst_size..dst_size + SAFE_SPACE].iter().any(|&b| b != TAIL_SENTINEL) {
            log::trace!("decompressor clobbered the destination tail scratch");
        }
        Ok(())
    }
}

/// Private copy of a source block with margins the decompressor may
/// overread without touching anything that matters.
///
/// On unix the copy lands in an anonymous mapping sized up to whole pages
/// plus one extra, and the trailing page is remapped read-only. The
/// mapping is released on every exit path via `Drop`.
#[cfg(unix)]
struct GuardedSource {
    base:   *mut c_void,
    mapped: usize,
    data:   *const u8,
}

#[cfg(unix)]
impl GuardedSource {
    fn copy(src: &[u8]) -> Result<Self, std::io::Error> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let span = SAFE_SPACE + src.len() + SAFE_SPACE;
        let mapped = span.div_ceil(page) * page + page;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }

        let data = unsafe {
            let data = (base as *mut u8).add(SAFE_SPACE);
            ptr::copy_nonoverlapping(src.as_ptr(), data, src.len());
            data as *const u8
        };

        let guard = unsafe { (base as *mut u8).add(mapped - page) };
        if unsafe { libc::mprotect(guard as *mut c_void, page, libc::PROT_READ) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::munmap(base, mapped) };
            return Err(err);
        }

        Ok(Self { base, mapped, data })
    }

    fn as_ptr(&self) -> *const u8 {
        self.data
    }
}

#[cfg(unix)]
impl Drop for GuardedSource {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.base, self.mapped) };
    }
}

#[cfg(not(unix))]
struct GuardedSource {
    buf: Vec<u8>,
}

#[cfg(not(unix))]
impl GuardedSource {
    fn copy(src: &[u8]) -> Result<Self, std::io::Error> {
        let mut buf = vec![0u8; SAFE_SPACE + src.len() + SAFE_SPACE];
        buf[SAFE_SPACE..SAFE_SPACE + src.len()].copy_from_slice(src);
        Ok(Self { buf })
    }

    fn as_ptr(&self) -> *const u8 {
        self.buf[SAFE_SPACE..].as_ptr()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_copy_preserves_the_source() {
        let src: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let guarded = GuardedSource::copy(&src).unwrap();
        let copied = unsafe { std::slice::from_raw_parts(guarded.as_ptr(), src.len()) };
        assert_eq!(copied, &src[..]);
    }

    #[cfg(unix)]
    #[test]
    fn guarded_copy_allows_bounded_overread() {
        let src = vec![0x5Au8; 10];
        let guarded = GuardedSource::copy(&src).unwrap();
        // The decompressor reads some bytes past src_len; the margin before
        // the guard page must absorb at least SAFE_SPACE of that.
        let overread =
            unsafe { std::slice::from_raw_parts(guarded.as_ptr(), src.len() + SAFE_SPACE) };
        assert_eq!(&overread[..10], &src[..]);
    }

    #[test]
    fn store_codec_rejects_size_mismatch() {
        use testing::StoreCodec;
        let mut dst = vec![0u8; 4 + SAFE_SPACE];
        assert!(StoreCodec.decompress_block(b"abcd", &mut dst, 4).is_ok());
        assert_eq!(&dst[..4], b"abcd");
        assert!(matches!(
            StoreCodec.decompress_block(b"abc", &mut dst, 4),
            Err(CodecError::BadBlock { .. })
        ));
    }
}
