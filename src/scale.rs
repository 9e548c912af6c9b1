//! Pixel format conversion and resizing.

use std::ffi::c_int;
use std::marker::PhantomData;
use std::ptr;

use ffmpeg_sys_next as ffi;

use crate::error::{check, Error, Result};
use crate::frame::Frame;

pub const MAX_PLANES: usize = 4;

/// Geometry and pixel format of a picture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureLayout {
    pub format: ffi::AVPixelFormat,
    pub width: u32,
    pub height: u32,
}

/// Read-only view of planar picture data.
pub struct Picture<'a> {
    layout: PictureLayout,
    data: [*const u8; MAX_PLANES],
    stride: [c_int; MAX_PLANES],
    _source: PhantomData<&'a [u8]>,
}

/// Mutable view of planar picture data.
pub struct PictureMut<'a> {
    layout: PictureLayout,
    data: [*mut u8; MAX_PLANES],
    stride: [c_int; MAX_PLANES],
    _source: PhantomData<&'a mut [u8]>,
}

fn fill_planes(
    buffer: *const u8,
    len: usize,
    layout: PictureLayout,
) -> Result<([*mut u8; MAX_PLANES], [c_int; MAX_PLANES])> {
    let mut data: [*mut u8; MAX_PLANES] = [ptr::null_mut(); MAX_PLANES];
    let mut stride: [c_int; MAX_PLANES] = [0; MAX_PLANES];
    let needed = check(
        unsafe {
            ffi::av_image_fill_arrays(
                data.as_mut_ptr(),
                stride.as_mut_ptr(),
                buffer,
                layout.format,
                layout.width as c_int,
                layout.height as c_int,
                1,
            )
        },
        "could not describe picture buffer",
    )?;
    if (needed as usize) > len {
        return Err(Error::Misuse(format!(
            "picture needs {needed} bytes, buffer holds {len}"
        )));
    }
    Ok((data, stride))
}

impl<'a> Picture<'a> {
    /// Describe a tightly packed buffer as a picture.
    pub fn from_buffer(buffer: &'a [u8], layout: PictureLayout) -> Result<Picture<'a>> {
        let (data, stride) = fill_planes(buffer.as_ptr(), buffer.len(), layout)?;
        Ok(Picture {
            layout,
            data: data.map(|p| p as *const u8),
            stride,
            _source: PhantomData,
        })
    }

    /// View a decoded video frame's planes.
    pub fn from_frame(frame: &'a Frame) -> Picture<'a> {
        let raw = unsafe { &*frame.as_ptr() };
        let mut data: [*const u8; MAX_PLANES] = [ptr::null(); MAX_PLANES];
        let mut stride: [c_int; MAX_PLANES] = [0; MAX_PLANES];
        for i in 0..MAX_PLANES {
            data[i] = raw.data[i] as *const u8;
            stride[i] = raw.linesize[i];
        }
        Picture {
            layout: PictureLayout {
                format: unsafe { std::mem::transmute::<c_int, ffi::AVPixelFormat>(raw.format) },
                width: raw.width as u32,
                height: raw.height as u32,
            },
            data,
            stride,
            _source: PhantomData,
        }
    }

    pub fn layout(&self) -> PictureLayout {
        self.layout
    }
}

impl<'a> PictureMut<'a> {
    /// Describe a tightly packed mutable buffer as a picture destination.
    pub fn from_buffer(buffer: &'a mut [u8], layout: PictureLayout) -> Result<PictureMut<'a>> {
        let (data, stride) = fill_planes(buffer.as_ptr(), buffer.len(), layout)?;
        Ok(PictureMut {
            layout,
            data,
            stride,
            _source: PhantomData,
        })
    }

    pub fn layout(&self) -> PictureLayout {
        self.layout
    }
}

/// Converts pictures between pixel formats and sizes.
///
/// The native conversion context is cached and only rebuilt when the source
/// or destination layout changes between calls.
pub struct Scaler {
    ctx: *mut ffi::SwsContext,
    flags: c_int,
}

impl Scaler {
    /// Bilinear scaler, the usual default.
    pub fn bilinear() -> Scaler {
        Scaler {
            ctx: ptr::null_mut(),
            flags: ffi::SWS_BILINEAR as c_int,
        }
    }

    pub fn with_flags(flags: c_int) -> Scaler {
        Scaler {
            ctx: ptr::null_mut(),
            flags,
        }
    }

    /// Convert `src` into `dst`.
    pub fn scale(&mut self, src: &Picture<'_>, dst: &mut PictureMut<'_>) -> Result<()> {
        let sl = src.layout;
        let dl = dst.layout;
        self.ctx = unsafe {
            ffi::sws_getCachedContext(
                self.ctx,
                sl.width as c_int,
                sl.height as c_int,
                sl.format,
                dl.width as c_int,
                dl.height as c_int,
                dl.format,
                self.flags,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        if self.ctx.is_null() {
            return Err(Error::Null("could not create scaling context".into()));
        }
        check(
            unsafe {
                ffi::sws_scale(
                    self.ctx,
                    src.data.as_ptr(),
                    src.stride.as_ptr(),
                    0,
                    sl.height as c_int,
                    dst.data.as_ptr(),
                    dst.stride.as_ptr(),
                )
            },
            "could not scale picture",
        )?;
        Ok(())
    }
}

impl Drop for Scaler {
    fn drop(&mut self) {
        if !self.ctx.is_null() {
            unsafe { ffi::sws_freeContext(self.ctx) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_buffer_is_rejected() {
        let layout = PictureLayout {
            format: ffi::AVPixelFormat::AV_PIX_FMT_RGB24,
            width: 16,
            height: 16,
        };
        let buffer = vec![0u8; 16];
        assert!(matches!(
            Picture::from_buffer(&buffer, layout),
            Err(Error::Misuse(_))
        ));
    }

    #[test]
    fn yuv_grey_converts_to_rgb_grey() {
        let src_layout = PictureLayout {
            format: ffi::AVPixelFormat::AV_PIX_FMT_YUV420P,
            width: 16,
            height: 16,
        };
        // Flat mid-grey: Y = 128, U = V = 128.
        let src_buf = vec![128u8; 16 * 16 + 2 * 8 * 8];
        let dst_layout = PictureLayout {
            format: ffi::AVPixelFormat::AV_PIX_FMT_RGB24,
            width: 16,
            height: 16,
        };
        let mut dst_buf = vec![0u8; 16 * 16 * 3];

        let src = Picture::from_buffer(&src_buf, src_layout).unwrap();
        let mut dst = PictureMut::from_buffer(&mut dst_buf, dst_layout).unwrap();
        Scaler::bilinear().scale(&src, &mut dst).unwrap();

        for &b in &dst_buf {
            assert!(
                (120..=140).contains(&b),
                "expected grey output, got {b}"
            );
        }
    }

    #[test]
    fn downscale_halves_dimensions() {
        let src_layout = PictureLayout {
            format: ffi::AVPixelFormat::AV_PIX_FMT_RGB24,
            width: 32,
            height: 32,
        };
        let src_buf = vec![200u8; 32 * 32 * 3];
        let dst_layout = PictureLayout {
            format: ffi::AVPixelFormat::AV_PIX_FMT_RGB24,
            width: 16,
            height: 16,
        };
        let mut dst_buf = vec![0u8; 16 * 16 * 3];

        let src = Picture::from_buffer(&src_buf, src_layout).unwrap();
        let mut dst = PictureMut::from_buffer(&mut dst_buf, dst_layout).unwrap();
        Scaler::bilinear().scale(&src, &mut dst).unwrap();
        assert!(dst_buf.iter().all(|&b| b >= 195));
    }
}
