//! Error signaling for native library calls.
//!
//! Every negative return code from FFmpeg is translated into an [`Error`]
//! carrying the caller's context plus the library's own diagnostic text.
//! `AVERROR_EOF` is not an error here: the read/receive helpers turn it into
//! a normal `false`/`Eof` so the drivers can switch into drain mode.

use std::ffi::c_int;

use ffmpeg_sys_next as ffi;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A native call returned a negative result code.
    #[error("{context}: {detail}")]
    Native {
        context: String,
        detail: String,
        code: c_int,
    },
    /// An allocation or lookup unexpectedly returned a null pointer.
    #[error("{0}: received null pointer")]
    Null(String),
    /// A codec or format identifier the native library does not know.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    /// The engine was asked to do something its current state forbids.
    #[error("invalid use: {0}")]
    Misuse(String),
}

impl Error {
    pub(crate) fn native(context: impl Into<String>, code: c_int) -> Self {
        Error::Native {
            context: context.into(),
            detail: err_string(code),
            code,
        }
    }

    /// The raw native result code, if this failure came from a native call.
    pub fn code(&self) -> Option<c_int> {
        match self {
            Error::Native { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// `AVERROR(EAGAIN)`, the "feed me / drain me first" sentinel.
pub(crate) const AGAIN: c_int = ffi::AVERROR(libc::EAGAIN);

/// Human-readable text for a native error code via `av_strerror`.
pub fn err_string(code: c_int) -> String {
    let mut buf = [0u8; ffi::AV_ERROR_MAX_STRING_SIZE as usize];
    let rc = unsafe { ffi::av_strerror(code, buf.as_mut_ptr() as *mut _, buf.len()) };
    if rc < 0 {
        return format!("unknown error {code}");
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Map a negative result code to `Error::Native`, passing non-negatives through.
pub(crate) fn check(code: c_int, context: &str) -> Result<c_int> {
    if code < 0 {
        Err(Error::native(context, code))
    } else {
        Ok(code)
    }
}

/// Like [`check`], but `AVERROR_EOF` becomes a normal `Ok(false)`.
pub(crate) fn check_eof(code: c_int, context: &str) -> Result<bool> {
    if code == ffi::AVERROR_EOF {
        Ok(false)
    } else {
        check(code, context).map(|_| true)
    }
}

/// Reject a null pointer from an allocation or lookup call.
pub(crate) fn check_ptr<T>(ptr: *mut T, context: &str) -> Result<*mut T> {
    if ptr.is_null() {
        Err(Error::Null(context.to_string()))
    } else {
        Ok(ptr)
    }
}
