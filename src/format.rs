//! Container format lookup and format-context teardown shims.

use std::ffi::CString;

use ffmpeg_sys_next as ffi;

use crate::error::{Error, Result};

/// Contexts with an opened input need the paired close call; unopened and
/// output contexts are plain allocations.
pub(crate) unsafe fn free_input_context(ptr: *mut ffi::AVFormatContext) {
    let mut ptr = ptr;
    ffi::avformat_close_input(&mut ptr);
}

pub(crate) unsafe fn free_format_context(ptr: *mut ffi::AVFormatContext) {
    ffi::avformat_free_context(ptr);
}

/// A demuxer selected by short name, bypassing probing.
///
/// Needed when the input has no usable extension or magic, for example a raw
/// elementary stream delivered through custom I/O.
#[derive(Debug, Clone, Copy)]
pub struct InputFormat {
    raw: *const ffi::AVInputFormat,
}

impl InputFormat {
    pub fn find(name: &str) -> Result<InputFormat> {
        let cname = CString::new(name).map_err(|_| Error::Misuse("format name contains NUL".into()))?;
        let raw = unsafe { ffi::av_find_input_format(cname.as_ptr()) };
        if raw.is_null() {
            return Err(Error::NotFound {
                kind: "input format",
                name: name.to_owned(),
            });
        }
        Ok(InputFormat { raw })
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::AVInputFormat {
        self.raw
    }
}
