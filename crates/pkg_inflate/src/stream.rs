//! Owned wrapper around a zlib inflate stream.
//!
//! The wrapper functions as an owned decoder context: it is initialized on construction and
//! `inflateEnd` is called when it is dropped, so the decoder's internal buffers are released on
//! every exit path of the caller.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::ffi::{c_int, CStr};
use std::ptr;

use libz_sys::{uInt, voidpf, z_stream};

use crate::InflateError;

/// Alignment of every block handed to zlib. The first `ALIGN` bytes of each block store its total
/// size so `zfree` can rebuild the layout.
const ALIGN: usize = 16;

/// Tracks the number of bytes zlib has allocated through [`zalloc`] and refuses allocations that
/// would exceed the configured limit.
struct Allocator {
    limit: Option<usize>,
    in_use: Cell<usize>,
}

impl Allocator {
    fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            in_use: Cell::new(0),
        }
    }

    fn reserve(&self, size: usize) -> bool {
        let next = self.in_use.get().saturating_add(size);
        if self.limit.is_some_and(|limit| next > limit) {
            return false;
        }
        self.in_use.set(next);
        true
    }

    fn release(&self, size: usize) {
        self.in_use.set(self.in_use.get().saturating_sub(size));
    }
}

/// Allocation callback registered on the stream. `opaque` points to the [`Allocator`] owned by the
/// [`Inflater`].
unsafe extern "C" fn zalloc(opaque: voidpf, items: uInt, size: uInt) -> voidpf {
    let allocator = &*(opaque as *const Allocator);
    let Some(total) = (items as usize)
        .checked_mul(size as usize)
        .and_then(|bytes| bytes.checked_add(ALIGN))
    else {
        return ptr::null_mut();
    };
    if !allocator.reserve(total) {
        return ptr::null_mut();
    }
    let Ok(layout) = Layout::from_size_align(total, ALIGN) else {
        allocator.release(total);
        return ptr::null_mut();
    };

    let block = alloc(layout);
    if block.is_null() {
        allocator.release(total);
        return ptr::null_mut();
    }
    block.cast::<usize>().write(total);
    block.add(ALIGN).cast()
}

unsafe extern "C" fn zfree(opaque: voidpf, address: voidpf) {
    if address.is_null() {
        return;
    }
    let allocator = &*(opaque as *const Allocator);
    let block = address.cast::<u8>().sub(ALIGN);
    let total = block.cast::<usize>().read();
    dealloc(block, Layout::from_size_align_unchecked(total, ALIGN));
    allocator.release(total);
}

/// The state the decoder reported after a single call to [`Inflater::inflate`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Status {
    /// Progress was made, more input or output space may be required.
    Ok,
    /// The logical end of the compressed stream was reached.
    StreamEnd,
    /// No progress was possible with the given buffers.
    NoProgress,
}

/// Result of a single call to [`Inflater::inflate`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Progress {
    pub consumed: usize,
    pub produced: usize,
    pub status: Status,
}

/// An initialized zlib inflate stream.
///
/// Both the stream and its allocator are boxed because zlib keeps a pointer back to the stream in
/// its internal state and the allocator is referenced through the `opaque` pointer; neither may
/// move while the decoder is alive.
pub(crate) struct Inflater {
    stream: Box<z_stream>,
    // Read by `zalloc`/`zfree` through the stream's `opaque` pointer.
    #[allow(dead_code)]
    allocator: Box<Allocator>,
}

impl Inflater {
    /// Initializes a new decoder for a zlib wrapped deflate stream.
    pub fn new(memory_limit: Option<usize>) -> Result<Self, InflateError> {
        let allocator = Box::new(Allocator::new(memory_limit));
        let mut stream = Box::new(z_stream {
            next_in: ptr::null_mut(),
            avail_in: 0,
            total_in: 0,
            next_out: ptr::null_mut(),
            avail_out: 0,
            total_out: 0,
            msg: ptr::null_mut(),
            state: ptr::null_mut(),
            zalloc,
            zfree,
            opaque: ptr::addr_of!(*allocator) as voidpf,
            data_type: 0,
            adler: 0,
            reserved: 0,
        });

        // Safe because the stream is fully initialized and boxed. When initialization fails zlib
        // has already released whatever it allocated, so no `inflateEnd` is required.
        let code = unsafe {
            libz_sys::inflateInit_(
                &mut *stream,
                libz_sys::zlibVersion(),
                std::mem::size_of::<z_stream>() as c_int,
            )
        };
        if code != libz_sys::Z_OK {
            return Err(error_from_code(code, &stream));
        }

        Ok(Self { stream, allocator })
    }

    /// Feeds `input` to the decoder and writes decompressed bytes into `output`.
    pub fn inflate(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress, InflateError> {
        let avail_in = uInt::try_from(input.len()).unwrap_or(uInt::MAX);
        let avail_out = uInt::try_from(output.len()).unwrap_or(uInt::MAX);

        // zlib never writes through `next_in`, the mutable cast only satisfies the C signature.
        self.stream.next_in = input.as_ptr().cast_mut();
        self.stream.avail_in = avail_in;
        self.stream.next_out = output.as_mut_ptr();
        self.stream.avail_out = avail_out;

        let code = unsafe { libz_sys::inflate(&mut *self.stream, libz_sys::Z_NO_FLUSH) };

        let consumed = (avail_in - self.stream.avail_in) as usize;
        let produced = (avail_out - self.stream.avail_out) as usize;

        // Do not keep pointers into buffers we do not own.
        self.stream.next_in = ptr::null_mut();
        self.stream.avail_in = 0;
        self.stream.next_out = ptr::null_mut();
        self.stream.avail_out = 0;

        let status = match code {
            libz_sys::Z_OK => Status::Ok,
            libz_sys::Z_STREAM_END => Status::StreamEnd,
            libz_sys::Z_BUF_ERROR => Status::NoProgress,
            code => return Err(error_from_code(code, &self.stream)),
        };

        Ok(Progress {
            consumed,
            produced,
            status,
        })
    }

    /// Returns the number of bytes currently allocated by the decoder.
    #[cfg(test)]
    pub fn allocated(&self) -> usize {
        self.allocator.in_use.get()
    }
}

impl Drop for Inflater {
    fn drop(&mut self) {
        // Safe because the stream was successfully initialized and is never ended manually.
        unsafe {
            libz_sys::inflateEnd(&mut *self.stream);
        }
    }
}

/// Converts a failing zlib return code into an [`InflateError`].
fn error_from_code(code: c_int, stream: &z_stream) -> InflateError {
    match code {
        libz_sys::Z_MEM_ERROR => InflateError::OutOfMemory,
        libz_sys::Z_NEED_DICT => {
            InflateError::Corrupt("the stream requires a preset dictionary".to_string())
        }
        code if stream.msg.is_null() => InflateError::Corrupt(format!("zlib error code {code}")),
        // Safe because zlib only ever stores static, nul terminated strings in `msg`.
        _ => InflateError::Corrupt(
            unsafe { CStr::from_ptr(stream.msg) }
                .to_string_lossy()
                .into_owned(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{Inflater, Status};
    use crate::InflateError;
    use assert_matches::assert_matches;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_single_call_reaches_stream_end() {
        let compressed = compress(b"hello inflate");
        let mut inflater = Inflater::new(None).unwrap();
        let mut output = [0u8; 64];

        let progress = inflater.inflate(&compressed, &mut output).unwrap();
        assert_eq!(progress.status, Status::StreamEnd);
        assert_eq!(progress.consumed, compressed.len());
        assert_eq!(&output[..progress.produced], b"hello inflate");
    }

    #[test]
    fn test_allocations_are_tracked() {
        let inflater = Inflater::new(None).unwrap();
        assert!(inflater.allocated() > 0);
    }

    #[test]
    fn test_no_progress_without_input() {
        let mut inflater = Inflater::new(None).unwrap();
        let mut output = [0u8; 16];
        let progress = inflater.inflate(&[], &mut output).unwrap();
        assert_eq!(progress.status, Status::NoProgress);
        assert_eq!(progress.produced, 0);
    }

    #[test]
    fn test_init_without_memory() {
        // `Inflater` owns raw zlib state and has no `Debug`, only the error is inspected.
        assert_matches!(Inflater::new(Some(0)).err(), Some(InflateError::OutOfMemory));
    }

    #[test]
    fn test_invalid_header_is_corrupt() {
        let mut inflater = Inflater::new(None).unwrap();
        let mut output = [0u8; 16];
        assert_matches!(
            inflater.inflate(b"definitely not zlib", &mut output),
            Err(InflateError::Corrupt(_))
        );
    }
}
