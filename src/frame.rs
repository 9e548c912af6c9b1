//! Decoded audio/video frames.

use std::ffi::c_int;

use ffmpeg_sys_next as ffi;

use crate::error::{check, check_ptr, Error, Result};
use crate::owned::Owned;

unsafe fn free_frame(ptr: *mut ffi::AVFrame) {
    let mut ptr = ptr;
    ffi::av_frame_free(&mut ptr);
}

/// One uncompressed frame of video or audio.
///
/// Decoders fill frames; encoder callbacks populate them. The planar data
/// accessors expose only planes the current format actually uses.
pub struct Frame {
    raw: Owned<ffi::AVFrame>,
}

impl Frame {
    pub fn alloc() -> Result<Frame> {
        let ptr = unsafe { ffi::av_frame_alloc() };
        check_ptr(ptr, "could not allocate frame")?;
        Ok(Frame {
            raw: unsafe { Owned::acquire(ptr, free_frame) },
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::AVFrame {
        self.raw.as_ptr()
    }

    /// Configure geometry and allocate sample buffers for video.
    pub fn ensure_video(
        &mut self,
        format: ffi::AVPixelFormat,
        width: u32,
        height: u32,
    ) -> Result<()> {
        unsafe {
            let raw = self.raw.as_ptr();
            ffi::av_frame_unref(raw);
            (*raw).format = format as c_int;
            (*raw).width = width as c_int;
            (*raw).height = height as c_int;
            check(
                ffi::av_frame_get_buffer(raw, 0),
                "could not allocate video frame buffer",
            )?;
        }
        Ok(())
    }

    /// Configure layout and allocate sample buffers for audio.
    pub fn ensure_audio(
        &mut self,
        format: ffi::AVSampleFormat,
        sample_rate: u32,
        channels: u32,
        samples: usize,
    ) -> Result<()> {
        unsafe {
            let raw = self.raw.as_ptr();
            ffi::av_frame_unref(raw);
            (*raw).format = format as c_int;
            (*raw).sample_rate = sample_rate as c_int;
            (*raw).nb_samples = samples as c_int;
            ffi::av_channel_layout_default(&mut (*raw).ch_layout, channels as c_int);
            check(
                ffi::av_frame_get_buffer(raw, 0),
                "could not allocate audio frame buffer",
            )?;
        }
        Ok(())
    }

    /// Ensure the frame's buffers are safe to write into, copying away any
    /// data shared with a codec.
    pub fn make_writable(&mut self) -> Result<()> {
        check(
            unsafe { ffi::av_frame_make_writable(self.raw.as_ptr()) },
            "could not make frame writable",
        )?;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        unsafe { (*self.raw.as_ptr()).width as u32 }
    }

    pub fn height(&self) -> u32 {
        unsafe { (*self.raw.as_ptr()).height as u32 }
    }

    pub fn samples(&self) -> usize {
        unsafe { (*self.raw.as_ptr()).nb_samples as usize }
    }

    pub fn sample_rate(&self) -> u32 {
        unsafe { (*self.raw.as_ptr()).sample_rate as u32 }
    }

    pub fn channels(&self) -> u32 {
        unsafe { (*self.raw.as_ptr()).ch_layout.nb_channels as u32 }
    }

    pub fn pts(&self) -> i64 {
        unsafe { (*self.raw.as_ptr()).pts }
    }

    pub fn set_pts(&mut self, pts: i64) {
        unsafe { (*self.raw.as_ptr()).pts = pts };
    }

    pub fn stride(&self, plane: usize) -> usize {
        unsafe { (*self.raw.as_ptr()).linesize[plane] as usize }
    }

    fn plane_len(&self, plane: usize, rows: usize) -> Result<usize> {
        let raw = unsafe { &*self.raw.as_ptr() };
        if plane >= raw.data.len() || raw.data[plane].is_null() {
            return Err(Error::Misuse(format!("frame has no plane {plane}")));
        }
        let stride = raw.linesize[plane];
        // Bottom-up layouts store a negative stride; a slice cannot describe
        // those.
        if stride < 0 {
            return Err(Error::Misuse(format!(
                "plane {plane} has negative stride {stride}"
            )));
        }
        Ok(stride as usize * rows)
    }

    /// Read access to one plane, `rows` lines deep.
    pub fn plane(&self, plane: usize, rows: usize) -> Result<&[u8]> {
        let len = self.plane_len(plane, rows)?;
        let raw = unsafe { &*self.raw.as_ptr() };
        Ok(unsafe { std::slice::from_raw_parts(raw.data[plane], len) })
    }

    /// Write access to one plane, `rows` lines deep.
    pub fn plane_mut(&mut self, plane: usize, rows: usize) -> Result<&mut [u8]> {
        let len = self.plane_len(plane, rows)?;
        let raw = unsafe { &*self.raw.as_ptr() };
        Ok(unsafe { std::slice::from_raw_parts_mut(raw.data[plane], len) })
    }

    /// Release the payload; the frame can be refilled.
    pub fn clear(&mut self) {
        unsafe { ffi::av_frame_unref(self.raw.as_ptr()) };
    }
}
