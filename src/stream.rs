//! # Stream handles
//!
//! A [`Stream`] is a shared handle onto one elementary stream of a container.
//! Each stream owns its codec session plus one reusable packet and frame, so
//! decode and encode steps on a stream are strictly sequential.
//!
//! Demuxed streams stay dormant until opened: an unopened stream's packets
//! are discarded inside the native layer, so callers pay only for the media
//! they consume. Muxed streams start closed as well; the caller configures
//! encoder parameters, then opens the stream with the callback that will
//! populate frames on demand.
//!
//! Handles are reference counted and may outlive their container; once the
//! container goes away the handle is detached and every operation on it
//! reports misuse instead of touching freed memory.

use std::ffi::CStr;
use std::sync::Arc;

use ffmpeg_sys_next as ffi;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::{CodecContext, EncoderSettings, Receive};
use crate::error::{check, Error, Result};
use crate::frame::Frame;
use crate::packet::Packet;

/// Invoked with each decoded frame (demux) or asked to fill the next frame
/// (mux). The return value means "keep going": a demux callback returning
/// `false` stops delivery for this stream, a mux callback returning `false`
/// declines and moves the stream into its flush phase.
pub type FrameCallback = Box<dyn FnMut(&mut Frame) -> bool>;

/// Broad media category of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Attachment,
    Unknown,
}

impl MediaKind {
    pub(crate) fn from_raw(raw: ffi::AVMediaType) -> MediaKind {
        match raw {
            ffi::AVMediaType::AVMEDIA_TYPE_VIDEO => MediaKind::Video,
            ffi::AVMediaType::AVMEDIA_TYPE_AUDIO => MediaKind::Audio,
            ffi::AVMediaType::AVMEDIA_TYPE_SUBTITLE => MediaKind::Subtitle,
            ffi::AVMediaType::AVMEDIA_TYPE_DATA => MediaKind::Data,
            ffi::AVMediaType::AVMEDIA_TYPE_ATTACHMENT => MediaKind::Attachment,
            _ => MediaKind::Unknown,
        }
    }

    fn decodable(self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }
}

/// Which side of the engine a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Demux,
    Mux,
}

/// Descriptive snapshot of a stream, safe to serialize and log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    /// Time base as (numerator, denominator).
    pub time_base: (i32, i32),
}

pub(crate) struct StreamInner {
    raw: *mut ffi::AVStream,
    index: usize,
    kind: MediaKind,
    role: Role,
    codec: Option<CodecContext>,
    callback: Option<FrameCallback>,
    // Mux-only: chosen at add_stream, applied when the stream opens.
    codec_id: ffi::AVCodecID,
    settings: Option<EncoderSettings>,
    global_header: bool,
    packet: Packet,
    frame: Frame,
    flush_sent: bool,
    finished: bool,
}

impl StreamInner {
    fn raw(&self) -> Result<*mut ffi::AVStream> {
        if self.raw.is_null() {
            return Err(Error::Misuse(format!(
                "stream {} used after its container was closed",
                self.index
            )));
        }
        Ok(self.raw)
    }

    fn codec_mut(&mut self) -> Result<&mut CodecContext> {
        self.codec
            .as_mut()
            .ok_or_else(|| Error::Misuse("stream is not open".into()))
    }

    fn set_discard(&mut self, discard: ffi::AVDiscard) -> Result<()> {
        let raw = self.raw()?;
        unsafe { (*raw).discard = discard };
        Ok(())
    }

    fn open(&mut self, callback: FrameCallback) -> Result<()> {
        match self.role {
            Role::Demux => self.open_decoder()?,
            Role::Mux => self.open_encoder()?,
        }
        self.callback = Some(callback);
        self.flush_sent = false;
        self.finished = false;
        Ok(())
    }

    fn open_decoder(&mut self) -> Result<()> {
        if !self.kind.decodable() {
            return Err(Error::Misuse(format!(
                "cannot decode a {:?} stream",
                self.kind
            )));
        }
        if self.codec.is_none() {
            let raw = self.raw()?;
            self.codec = Some(CodecContext::decoder_for_stream(raw)?);
            debug!(stream = self.index, kind = ?self.kind, "decoder opened");
        }
        self.set_discard(ffi::AVDiscard::AVDISCARD_DEFAULT)
    }

    fn open_encoder(&mut self) -> Result<()> {
        if self.codec.is_some() {
            return Err(Error::Misuse("stream is already open".into()));
        }
        let settings = self
            .settings
            .as_ref()
            .ok_or_else(|| Error::Misuse("stream opened before being configured".into()))?;
        let codec = CodecContext::encoder(self.codec_id, settings, self.global_header)?;
        let raw = self.raw()?;
        codec.parameters_to_stream(raw)?;
        unsafe {
            (*raw).time_base = ffi::AVRational {
                num: settings.time_base.0,
                den: settings.time_base.1,
            };
        }
        debug!(stream = self.index, kind = ?self.kind, "encoder opened");
        self.codec = Some(codec);
        Ok(())
    }

    fn configure(&mut self, settings: EncoderSettings) -> Result<()> {
        if self.role != Role::Mux {
            return Err(Error::Misuse(
                "only muxed streams take encoder settings".into(),
            ));
        }
        if self.codec.is_some() {
            return Err(Error::Misuse("stream is already open".into()));
        }
        self.settings = Some(settings);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.role == Role::Demux && !self.raw.is_null() {
            self.set_discard(ffi::AVDiscard::AVDISCARD_ALL)?;
        }
        self.codec = None;
        self.callback = None;
        self.packet.clear();
        Ok(())
    }

    /// Take over a freshly demuxed packet and run one decode step. Returns
    /// the number of frames delivered; when the decoder refuses the packet it
    /// is kept pending and offered again by [`StreamInner::resume`].
    fn accept(&mut self, incoming: &mut Packet) -> Result<usize> {
        if self.role != Role::Demux {
            return Err(Error::Misuse("cannot decode on a muxed stream".into()));
        }
        if self.finished {
            incoming.clear();
            return Ok(0);
        }
        self.packet.move_from(incoming);
        self.submit()
    }

    fn has_pending(&self) -> bool {
        self.packet.pending() && !self.finished
    }

    /// Re-offer the pending packet from the last refused submission.
    fn resume(&mut self) -> Result<usize> {
        if !self.has_pending() {
            return Ok(0);
        }
        self.submit()
    }

    fn submit(&mut self) -> Result<usize> {
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| Error::Misuse("stream is not open".into()))?;
        let pending = matches!(codec.send_packet(&self.packet)?, Receive::Again);
        self.packet.set_pending(pending);
        if !pending {
            self.packet.clear();
        }
        let delivered = self.receive_frames()?;
        trace!(stream = self.index, frames = delivered, "packet decoded");
        Ok(delivered)
    }

    /// Signal end of input and drain buffered frames. Returns the number of
    /// frames delivered; `finished` flips once the decoder reports empty.
    fn drain(&mut self) -> Result<usize> {
        if self.finished || self.codec.is_none() {
            return Ok(0);
        }
        if !self.flush_sent {
            self.codec_mut()?.send_eof_packet()?;
            self.flush_sent = true;
        }
        self.receive_frames()
    }

    fn receive_frames(&mut self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let codec = self
                .codec
                .as_mut()
                .ok_or_else(|| Error::Misuse("stream is not open".into()))?;
            match codec.receive_frame(&mut self.frame)? {
                Receive::Got => {
                    delivered += 1;
                    let keep_going = match self.callback.as_mut() {
                        Some(callback) => callback(&mut self.frame),
                        None => true,
                    };
                    self.frame.clear();
                    if !keep_going {
                        self.finished = true;
                        self.packet.clear();
                        return Ok(delivered);
                    }
                }
                Receive::Again => return Ok(delivered),
                Receive::Eof => {
                    self.finished = true;
                    debug!(stream = self.index, "decoder drained");
                    return Ok(delivered);
                }
            }
        }
    }

    /// Run one encode step: ask the callback for input while the encoder is
    /// hungry, then write any completed packet into `ctx`. Returns whether a
    /// packet was written.
    fn encode_into(&mut self, ctx: *mut ffi::AVFormatContext) -> Result<bool> {
        if self.role != Role::Mux {
            return Err(Error::Misuse("cannot encode on a demuxed stream".into()));
        }
        if self.finished {
            return Ok(false);
        }
        loop {
            let codec = self
                .codec
                .as_mut()
                .ok_or_else(|| Error::Misuse("stream is not open".into()))?;
            match codec.receive_packet(&mut self.packet)? {
                Receive::Got => {
                    let codec_tb = codec.time_base();
                    let raw = self.raw()?;
                    unsafe {
                        ffi::av_packet_rescale_ts(
                            self.packet.as_ptr(),
                            codec_tb,
                            (*raw).time_base,
                        );
                    }
                    self.packet.set_stream_index(self.index);
                    check(
                        unsafe { ffi::av_interleaved_write_frame(ctx, self.packet.as_ptr()) },
                        "could not write packet",
                    )?;
                    return Ok(true);
                }
                Receive::Eof => {
                    self.finished = true;
                    debug!(stream = self.index, "encoder drained");
                    return Ok(false);
                }
                Receive::Again => {
                    let more = if self.flush_sent {
                        self.finished = true;
                        return Ok(false);
                    } else {
                        match self.callback.as_mut() {
                            Some(callback) => callback(&mut self.frame),
                            None => false,
                        }
                    };
                    let codec = self
                        .codec
                        .as_mut()
                        .ok_or_else(|| Error::Misuse("stream is not open".into()))?;
                    if more {
                        codec.send_frame(&self.frame)?;
                        self.frame.clear();
                    } else {
                        codec.send_eof_frame()?;
                        self.flush_sent = true;
                    }
                }
            }
        }
    }

    fn info(&self) -> Result<StreamInfo> {
        let raw = self.raw()?;
        unsafe {
            let par = (*raw).codecpar;
            let codec = CStr::from_ptr(ffi::avcodec_get_name((*par).codec_id))
                .to_string_lossy()
                .into_owned();
            Ok(StreamInfo {
                index: self.index,
                kind: self.kind,
                codec,
                time_base: ((*raw).time_base.num, (*raw).time_base.den),
            })
        }
    }

    fn reset_codec(&mut self) {
        if let Some(codec) = self.codec.as_mut() {
            codec.flush();
        }
        self.packet.clear();
        self.flush_sent = false;
        self.finished = false;
    }

    fn detach(&mut self) {
        self.raw = std::ptr::null_mut();
        self.codec = None;
        self.callback = None;
    }
}

/// Shared handle onto one stream of a container.
///
/// Cloning shares state: open/close and callback registration through one
/// handle are visible through every other handle to the same stream.
///
/// Handles stay on the thread that opened the container. The native stream
/// descriptor is also touched by the format context without any shared lock,
/// so a handle cannot move to another thread:
///
/// ```compile_fail
/// fn on_another_thread<T: Send>(_: T) {}
/// fn reject(stream: avmux::Stream) {
///     on_another_thread(stream);
/// }
/// ```
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Mutex<StreamInner>>,
}

impl Stream {
    pub(crate) fn demuxed(raw: *mut ffi::AVStream) -> Result<Stream> {
        let (index, kind) = unsafe {
            (
                (*raw).index as usize,
                MediaKind::from_raw((*(*raw).codecpar).codec_type),
            )
        };
        Stream::wrap(raw, index, kind, Role::Demux, ffi::AVCodecID::AV_CODEC_ID_NONE, false)
    }

    pub(crate) fn muxed(
        raw: *mut ffi::AVStream,
        codec_id: ffi::AVCodecID,
        global_header: bool,
    ) -> Result<Stream> {
        let index = unsafe { (*raw).index as usize };
        let kind = MediaKind::from_raw(unsafe { ffi::avcodec_get_type(codec_id) });
        Stream::wrap(raw, index, kind, Role::Mux, codec_id, global_header)
    }

    fn wrap(
        raw: *mut ffi::AVStream,
        index: usize,
        kind: MediaKind,
        role: Role,
        codec_id: ffi::AVCodecID,
        global_header: bool,
    ) -> Result<Stream> {
        Ok(Stream {
            inner: Arc::new(Mutex::new(StreamInner {
                raw,
                index,
                kind,
                role,
                codec: None,
                callback: None,
                codec_id,
                settings: None,
                global_header,
                packet: Packet::alloc()?,
                frame: Frame::alloc()?,
                flush_sent: false,
                finished: false,
            })),
        })
    }

    pub fn index(&self) -> usize {
        self.inner.lock().index
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.lock().kind
    }

    /// Whether this stream has finished producing or consuming data.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    pub fn info(&self) -> Result<StreamInfo> {
        self.inner.lock().info()
    }

    /// Store the encoder parameters a muxed stream will open with.
    pub fn configure(&self, settings: EncoderSettings) -> Result<()> {
        self.inner.lock().configure(settings)
    }

    /// Open the stream and register its callback: a frame sink for demuxed
    /// streams, a frame source for muxed ones.
    pub fn open(&self, callback: impl FnMut(&mut Frame) -> bool + 'static) -> Result<()> {
        self.inner.lock().open(Box::new(callback))
    }

    /// Close the stream; a demuxed stream's packets go back to being
    /// discarded.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().close()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().codec.is_some()
    }

    pub(crate) fn accept(&self, packet: &mut Packet) -> Result<usize> {
        self.inner.lock().accept(packet)
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.inner.lock().has_pending()
    }

    pub(crate) fn resume(&self) -> Result<usize> {
        self.inner.lock().resume()
    }

    pub(crate) fn drain(&self) -> Result<usize> {
        self.inner.lock().drain()
    }

    pub(crate) fn encode_into(&self, ctx: *mut ffi::AVFormatContext) -> Result<bool> {
        self.inner.lock().encode_into(ctx)
    }

    pub(crate) fn reset_codec(&self) {
        self.inner.lock().reset_codec();
    }

    pub(crate) fn detach(&self) {
        self.inner.lock().detach();
    }
}
