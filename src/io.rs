//! Custom byte-stream I/O bridged to the native AVIO callback contract.
//!
//! An [`IoContext`] lets any in-memory or caller-defined transport feed a
//! demuxer or drain a muxer: three closures (read, write, seek) are stored
//! behind a stable heap address and forwarded to FFmpeg through `extern "C"`
//! trampolines whose opaque pointer recovers that address. The trampoline
//! target is boxed separately from the `IoContext` itself, so the context
//! value may move freely after creation.

use std::ffi::{c_int, c_void};
use std::slice;

use ffmpeg_sys_next as ffi;

use crate::error::{check_ptr, Result};

/// Default scratch buffer size handed to the native I/O layer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Fixed-size memory block allocated with `av_malloc`.
///
/// Used as the native I/O scratch buffer; not resizable. Freed with
/// `av_free` unless ownership is released into native hands.
pub struct Buffer {
    ptr: *mut u8,
    len: usize,
}

impl Buffer {
    pub fn alloc(len: usize) -> Result<Buffer> {
        let ptr = unsafe { ffi::av_malloc(len) } as *mut u8;
        check_ptr(ptr, "could not allocate I/O buffer")?;
        Ok(Buffer { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Hand the raw block to native code; the handle no longer frees it.
    pub(crate) fn release(mut self) -> *mut u8 {
        std::mem::replace(&mut self.ptr, std::ptr::null_mut())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ffi::av_free(self.ptr as *mut c_void) };
        }
    }
}

/// Seek origin for the custom seek callback.
///
/// `Size` is the pseudo-whence (`AVSEEK_SIZE`): report the total stream size
/// without moving the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
    Size,
}

impl Whence {
    fn from_raw(raw: c_int) -> Option<Whence> {
        match raw {
            libc::SEEK_SET => Some(Whence::Start),
            libc::SEEK_CUR => Some(Whence::Current),
            libc::SEEK_END => Some(Whence::End),
            w if w == ffi::AVSEEK_SIZE as c_int => Some(Whence::Size),
            _ => None,
        }
    }
}

/// Read up to `buf.len()` bytes; returns the byte count, 0 at end of stream,
/// or a negative native error code.
pub type ReadFn = Box<dyn FnMut(&mut [u8]) -> c_int>;
/// Write `buf`; returns the byte count written or a negative error code.
pub type WriteFn = Box<dyn FnMut(&[u8]) -> c_int>;
/// Seek to `offset` relative to `whence`; returns the new position (or the
/// total size for [`Whence::Size`]) or a negative error code.
pub type SeekFn = Box<dyn FnMut(i64, Whence) -> i64>;

/// Trampoline target. Lives in its own box so its address never changes
/// while the native AVIO handle exists.
struct IoInner {
    read: Option<ReadFn>,
    write: Option<WriteFn>,
    seek: Option<SeekFn>,
}

/// Bridge between user closures and one native `AVIOContext`.
pub struct IoContext {
    inner: Box<IoInner>,
    avio: *mut ffi::AVIOContext,
}

impl IoContext {
    /// Create a read-side context over a freshly allocated buffer of
    /// [`DEFAULT_BUFFER_SIZE`] bytes.
    pub fn with_default_capacity() -> Result<IoContext> {
        IoContext::new(Buffer::alloc(DEFAULT_BUFFER_SIZE)?)
    }

    /// Create a read-side context, taking ownership of `buffer`.
    pub fn new(buffer: Buffer) -> Result<IoContext> {
        IoContext::create(buffer, false)
    }

    /// Create a write-capable context, taking ownership of `buffer`.
    pub fn new_writable(buffer: Buffer) -> Result<IoContext> {
        IoContext::create(buffer, true)
    }

    fn create(buffer: Buffer, writable: bool) -> Result<IoContext> {
        let mut inner = Box::new(IoInner {
            read: None,
            write: None,
            seek: None,
        });
        let opaque = &mut *inner as *mut IoInner as *mut c_void;
        let len = buffer.len();
        // The AVIOContext takes over the block; it may even reallocate it.
        let buf = buffer.release();
        let avio = unsafe {
            ffi::avio_alloc_context(
                buf,
                len as c_int,
                writable as c_int,
                opaque,
                Some(read_trampoline),
                Some(write_trampoline),
                Some(seek_trampoline),
            )
        };
        if avio.is_null() {
            unsafe { ffi::av_free(buf as *mut c_void) };
            check_ptr(avio, "could not allocate I/O context")?;
        }
        Ok(IoContext { inner, avio })
    }

    pub fn set_read(&mut self, f: impl FnMut(&mut [u8]) -> c_int + 'static) {
        self.inner.read = Some(Box::new(f));
    }

    pub fn set_write(&mut self, f: impl FnMut(&[u8]) -> c_int + 'static) {
        self.inner.write = Some(Box::new(f));
    }

    pub fn set_seek(&mut self, f: impl FnMut(i64, Whence) -> i64 + 'static) {
        self.inner.seek = Some(Box::new(f));
    }

    pub(crate) fn avio_ptr(&self) -> *mut ffi::AVIOContext {
        self.avio
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        unsafe {
            if !self.avio.is_null() {
                // Free whatever buffer the context holds now; the library may
                // have swapped the original one.
                ffi::av_freep(&mut (*self.avio).buffer as *mut *mut u8 as *mut c_void);
                ffi::avio_context_free(&mut self.avio);
            }
        }
    }
}

unsafe extern "C" fn read_trampoline(opaque: *mut c_void, buf: *mut u8, len: c_int) -> c_int {
    let inner = &mut *(opaque as *mut IoInner);
    let Some(read) = inner.read.as_mut() else {
        return ffi::AVERROR_EOF;
    };
    if len <= 0 {
        return 0;
    }
    let out = slice::from_raw_parts_mut(buf, len as usize);
    let n = read(out);
    // The user contract is "0 bytes past the end, no error"; the native
    // contract wants AVERROR_EOF instead.
    if n == 0 {
        ffi::AVERROR_EOF
    } else {
        n
    }
}

unsafe extern "C" fn write_trampoline(opaque: *mut c_void, buf: *mut u8, len: c_int) -> c_int {
    let inner = &mut *(opaque as *mut IoInner);
    let Some(write) = inner.write.as_mut() else {
        return ffi::AVERROR(libc::EIO);
    };
    if len <= 0 {
        return 0;
    }
    let data = slice::from_raw_parts(buf, len as usize);
    write(data)
}

unsafe extern "C" fn seek_trampoline(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let inner = &mut *(opaque as *mut IoInner);
    let Some(seek) = inner.seek.as_mut() else {
        return ffi::AVERROR(libc::ESPIPE) as i64;
    };
    let Some(whence) = Whence::from_raw(whence & !(ffi::AVSEEK_FORCE as c_int)) else {
        return ffi::AVERROR(libc::EINVAL) as i64;
    };
    seek(offset, whence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Source {
        data: Vec<u8>,
        pos: usize,
    }

    fn memory_reader(data: Vec<u8>) -> Result<IoContext> {
        let src = Rc::new(RefCell::new(Source { data, pos: 0 }));
        let mut io = IoContext::new(Buffer::alloc(16)?)?;
        {
            let src = Rc::clone(&src);
            io.set_read(move |buf| {
                let mut src = src.borrow_mut();
                let pos = src.pos;
                let n = buf.len().min(src.data.len() - pos);
                buf[..n].copy_from_slice(&src.data[pos..pos + n]);
                src.pos += n;
                n as c_int
            });
        }
        io.set_seek(move |offset, whence| {
            let mut src = src.borrow_mut();
            let len = src.data.len() as i64;
            let target = match whence {
                Whence::Start => offset,
                Whence::Current => src.pos as i64 + offset,
                Whence::End => len + offset,
                Whence::Size => return len,
            };
            if !(0..=len).contains(&target) {
                return ffi::AVERROR(libc::EINVAL) as i64;
            }
            src.pos = target as usize;
            target
        });
        Ok(io)
    }

    #[test]
    fn sequential_reads_never_exceed_remainder() {
        let io = memory_reader((0u8..10).collect()).unwrap();
        let mut buf = [0u8; 16];
        unsafe {
            let n = ffi::avio_read(io.avio_ptr(), buf.as_mut_ptr(), 4);
            assert_eq!(n, 4);
            assert_eq!(&buf[..4], &[0, 1, 2, 3]);

            // Asking for more than remains returns only the remainder.
            let n = ffi::avio_read(io.avio_ptr(), buf.as_mut_ptr(), 16);
            assert_eq!(n, 6);
            assert_eq!(&buf[..6], &[4, 5, 6, 7, 8, 9]);

            // Past the end: the user closure reports 0 bytes, surfaced to the
            // native layer as its end-of-stream sentinel, not a failure.
            let n = ffi::avio_read(io.avio_ptr(), buf.as_mut_ptr(), 4);
            assert_eq!(n, ffi::AVERROR_EOF);
        }
    }

    #[test]
    fn seek_from_start_positions_reads() {
        let io = memory_reader((0u8..10).collect()).unwrap();
        let mut buf = [0u8; 16];
        unsafe {
            let pos = ffi::avio_seek(io.avio_ptr(), 5, libc::SEEK_SET);
            assert_eq!(pos, 5);
            let n = ffi::avio_read(io.avio_ptr(), buf.as_mut_ptr(), 16);
            assert_eq!(n, 5);
            assert_eq!(&buf[..5], &[5, 6, 7, 8, 9]);
        }
    }

    #[test]
    fn size_whence_reports_length_without_moving() {
        let io = memory_reader((0u8..10).collect()).unwrap();
        let mut buf = [0u8; 4];
        unsafe {
            assert_eq!(ffi::avio_size(io.avio_ptr()), 10);
            let n = ffi::avio_read(io.avio_ptr(), buf.as_mut_ptr(), 2);
            assert_eq!(n, 2);
            assert_eq!(&buf[..2], &[0, 1]);
        }
    }

    #[test]
    fn buffer_is_fixed_size() {
        let buf = Buffer::alloc(32).unwrap();
        assert_eq!(buf.len(), 32);
        assert!(!buf.as_ptr().is_null());
    }
}
