//! Codec contexts and the send/receive data exchange.
//!
//! Decoders and encoders share one calling convention: feed input with a
//! `send_*` call, pull output with a `receive_*` call, and interpret the
//! three-way [`Receive`] status. `Again` means the codec wants the opposite
//! direction serviced first; the caller keeps the unconsumed input around and
//! offers it again later.

use std::ffi::c_int;
use std::ptr;

use ffmpeg_sys_next as ffi;

use crate::error::{check, check_ptr, Error, Result, AGAIN};
use crate::frame::Frame;
use crate::owned::Owned;
use crate::packet::Packet;

unsafe fn free_codec_context(ptr: *mut ffi::AVCodecContext) {
    let mut ptr = ptr;
    ffi::avcodec_free_context(&mut ptr);
}

/// Outcome of a `receive_*` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receive {
    /// Output was produced and is ready in the destination.
    Got,
    /// No output yet; the codec needs more input first.
    Again,
    /// The codec has been fully drained.
    Eof,
}

fn receive_status(code: c_int, context: &'static str) -> Result<Receive> {
    match code {
        0 => Ok(Receive::Got),
        c if c == AGAIN => Ok(Receive::Again),
        ffi::AVERROR_EOF => Ok(Receive::Eof),
        c => check(c, context).map(|_| Receive::Got),
    }
}

/// Parameters for opening an encoder.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub bit_rate: i64,
    /// Time base the encoder stamps output in, as (numerator, denominator).
    pub time_base: (i32, i32),
    pub kind: EncoderKind,
}

#[derive(Debug, Clone)]
pub enum EncoderKind {
    Video {
        width: u32,
        height: u32,
        pixel_format: ffi::AVPixelFormat,
        gop_size: u32,
    },
    Audio {
        sample_rate: u32,
        channels: u32,
        sample_format: ffi::AVSampleFormat,
    },
}

/// An opened decoder or encoder.
pub struct CodecContext {
    raw: Owned<ffi::AVCodecContext>,
}

impl std::fmt::Debug for CodecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecContext").finish_non_exhaustive()
    }
}

impl CodecContext {
    fn alloc(codec: *const ffi::AVCodec) -> Result<CodecContext> {
        let ptr = unsafe { ffi::avcodec_alloc_context3(codec) };
        check_ptr(ptr, "could not allocate codec context")?;
        Ok(CodecContext {
            raw: unsafe { Owned::acquire(ptr, free_codec_context) },
        })
    }

    /// Open a decoder matching the codec parameters of a container stream.
    pub(crate) fn decoder_for_stream(stream: *mut ffi::AVStream) -> Result<CodecContext> {
        unsafe {
            let par = (*stream).codecpar;
            let codec = ffi::avcodec_find_decoder((*par).codec_id);
            if codec.is_null() {
                return Err(Error::NotFound {
                    kind: "decoder",
                    name: format!("{:?}", (*par).codec_id),
                });
            }
            let ctx = CodecContext::alloc(codec)?;
            check(
                ffi::avcodec_parameters_to_context(ctx.as_ptr(), par),
                "could not copy codec parameters",
            )?;
            (*ctx.as_ptr()).pkt_timebase = (*stream).time_base;
            check(
                ffi::avcodec_open2(ctx.as_ptr(), codec, ptr::null_mut()),
                "could not open decoder",
            )?;
            Ok(ctx)
        }
    }

    /// Open an encoder for `codec_id` configured from `settings`.
    ///
    /// `global_header` must be set when the target container stores codec
    /// configuration out of band.
    pub(crate) fn encoder(
        codec_id: ffi::AVCodecID,
        settings: &EncoderSettings,
        global_header: bool,
    ) -> Result<CodecContext> {
        unsafe {
            let codec = ffi::avcodec_find_encoder(codec_id);
            if codec.is_null() {
                return Err(Error::NotFound {
                    kind: "encoder",
                    name: format!("{codec_id:?}"),
                });
            }
            let ctx = CodecContext::alloc(codec)?;
            let raw = ctx.as_ptr();
            (*raw).bit_rate = settings.bit_rate;
            (*raw).time_base = ffi::AVRational {
                num: settings.time_base.0,
                den: settings.time_base.1,
            };
            match settings.kind {
                EncoderKind::Video {
                    width,
                    height,
                    pixel_format,
                    gop_size,
                } => {
                    (*raw).width = width as c_int;
                    (*raw).height = height as c_int;
                    (*raw).pix_fmt = pixel_format;
                    (*raw).gop_size = gop_size as c_int;
                    (*raw).framerate = ffi::AVRational {
                        num: settings.time_base.1,
                        den: settings.time_base.0,
                    };
                }
                EncoderKind::Audio {
                    sample_rate,
                    channels,
                    sample_format,
                } => {
                    (*raw).sample_rate = sample_rate as c_int;
                    (*raw).sample_fmt = sample_format;
                    ffi::av_channel_layout_default(&mut (*raw).ch_layout, channels as c_int);
                }
            }
            if global_header {
                (*raw).flags |= ffi::AV_CODEC_FLAG_GLOBAL_HEADER as c_int;
            }
            check(
                ffi::avcodec_open2(raw, codec, ptr::null_mut()),
                "could not open encoder",
            )?;
            Ok(ctx)
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::AVCodecContext {
        self.raw.as_ptr()
    }

    pub fn time_base(&self) -> ffi::AVRational {
        unsafe { (*self.raw.as_ptr()).time_base }
    }

    /// Number of audio samples the encoder expects per frame, 0 when the
    /// codec accepts any count.
    pub fn frame_size(&self) -> usize {
        unsafe { (*self.raw.as_ptr()).frame_size.max(0) as usize }
    }

    /// Offer a packet to a decoder. Returns `Again` when the decoder cannot
    /// take it before output is collected; the packet stays with the caller.
    pub fn send_packet(&mut self, packet: &Packet) -> Result<Receive> {
        let code = unsafe { ffi::avcodec_send_packet(self.as_ptr(), packet.as_ptr()) };
        receive_status(code, "could not send packet to decoder")
    }

    /// Signal end of input to a decoder; subsequent receives drain it.
    pub fn send_eof_packet(&mut self) -> Result<()> {
        let code = unsafe { ffi::avcodec_send_packet(self.as_ptr(), ptr::null()) };
        if code == ffi::AVERROR_EOF {
            // Already draining.
            return Ok(());
        }
        check(code, "could not flush decoder")?;
        Ok(())
    }

    pub fn receive_frame(&mut self, frame: &mut Frame) -> Result<Receive> {
        let code = unsafe { ffi::avcodec_receive_frame(self.as_ptr(), frame.as_ptr()) };
        receive_status(code, "could not receive frame from decoder")
    }

    /// Offer a frame to an encoder.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<Receive> {
        let code = unsafe { ffi::avcodec_send_frame(self.as_ptr(), frame.as_ptr()) };
        receive_status(code, "could not send frame to encoder")
    }

    /// Signal end of input to an encoder; subsequent receives drain it.
    pub fn send_eof_frame(&mut self) -> Result<()> {
        let code = unsafe { ffi::avcodec_send_frame(self.as_ptr(), ptr::null()) };
        if code == ffi::AVERROR_EOF {
            return Ok(());
        }
        check(code, "could not flush encoder")?;
        Ok(())
    }

    pub fn receive_packet(&mut self, packet: &mut Packet) -> Result<Receive> {
        let code = unsafe { ffi::avcodec_receive_packet(self.as_ptr(), packet.as_ptr()) };
        receive_status(code, "could not receive packet from encoder")
    }

    /// Discard all buffered state, e.g. after a seek.
    pub(crate) fn flush(&mut self) {
        unsafe { ffi::avcodec_flush_buffers(self.as_ptr()) };
    }

    /// Copy the context's parameters onto a container stream being muxed.
    pub(crate) fn parameters_to_stream(&self, stream: *mut ffi::AVStream) -> Result<()> {
        check(
            unsafe { ffi::avcodec_parameters_from_context((*stream).codecpar, self.as_ptr()) },
            "could not copy codec parameters to stream",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_status_maps_sentinels() {
        assert_eq!(receive_status(0, "t").unwrap(), Receive::Got);
        assert_eq!(receive_status(AGAIN, "t").unwrap(), Receive::Again);
        assert_eq!(receive_status(ffi::AVERROR_EOF, "t").unwrap(), Receive::Eof);
        assert!(receive_status(ffi::AVERROR(libc::EINVAL), "t").is_err());
    }

    #[test]
    fn mjpeg_encoder_opens_with_video_settings() {
        let settings = EncoderSettings {
            bit_rate: 400_000,
            time_base: (1, 25),
            kind: EncoderKind::Video {
                width: 64,
                height: 48,
                pixel_format: ffi::AVPixelFormat::AV_PIX_FMT_YUVJ420P,
                gop_size: 10,
            },
        };
        let ctx = CodecContext::encoder(ffi::AVCodecID::AV_CODEC_ID_MJPEG, &settings, false)
            .unwrap();
        let tb = ctx.time_base();
        assert_eq!((tb.num, tb.den), (1, 25));
    }

    #[test]
    fn unknown_encoder_is_not_found() {
        let settings = EncoderSettings {
            bit_rate: 1,
            time_base: (1, 25),
            kind: EncoderKind::Audio {
                sample_rate: 8000,
                channels: 1,
                sample_format: ffi::AVSampleFormat::AV_SAMPLE_FMT_S16,
            },
        };
        let err = CodecContext::encoder(ffi::AVCodecID::AV_CODEC_ID_NONE, &settings, false)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "encoder", .. }));
    }
}
