//! # Containers
//!
//! A [`Container`] wraps one native format context in either demux (input)
//! or mux (output) mode and drives data through it one step at a time.
//!
//! Demuxing: open an input, open the streams you care about with a frame
//! callback, then call [`Container::decode`] until it reports no work left.
//! Packets for unopened streams are discarded inside the native layer.
//!
//! Muxing: open an output, add a stream per elementary stream, configure each
//! with encoder settings, open it with the callback that supplies frames, and
//! call [`Container::encode`] until every stream has flushed; the trailer
//! goes out when the last encoder runs dry.
//!
//! Teardown order is load bearing: stream handles are detached first, the
//! format context goes second, and any custom I/O context is freed last
//! because the native layer may still flush through it while closing.

use std::ffi::{c_int, CStr, CString};
use std::ptr;

use ffmpeg_sys_next as ffi;
use tracing::{debug, info, warn};

use crate::dict::Dictionary;
use crate::error::{check, check_eof, check_ptr, Error, Result};
use crate::format::{free_format_context, free_input_context, InputFormat};
use crate::io::IoContext;
use crate::owned::Owned;
use crate::packet::Packet;
use crate::stream::{MediaKind, Stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Input,
    Output,
}

/// A demuxing or muxing session over one media container.
pub struct Container {
    streams: Vec<Stream>,
    // Declared before `_io` so the format context is torn down while the
    // custom I/O it writes through is still alive.
    ctx: Owned<ffi::AVFormatContext>,
    _io: Option<IoContext>,
    mode: Mode,
    owns_pb: bool,
    draining: bool,
    finished: bool,
    header_written: bool,
    trailer_written: bool,
    // Scratch packet packets are demuxed into before being routed.
    read_packet: Packet,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Container {
    // ========================================================================
    // Opening
    // ========================================================================

    /// Open a container for reading from a path or URL.
    pub fn open_input(path: &str) -> Result<Container> {
        Container::open_input_inner(Some(path), None, None)
    }

    /// Open a container for reading, forcing the demuxer instead of probing.
    pub fn open_input_format(path: &str, format: InputFormat) -> Result<Container> {
        Container::open_input_inner(Some(path), None, Some(format))
    }

    /// Open a container for reading through custom I/O callbacks.
    ///
    /// Pass a format when the data cannot be probed, e.g. a raw elementary
    /// stream with no container framing.
    pub fn open_input_io(io: IoContext, format: Option<InputFormat>) -> Result<Container> {
        Container::open_input_inner(None, Some(io), format)
    }

    fn open_input_inner(
        path: Option<&str>,
        io: Option<IoContext>,
        format: Option<InputFormat>,
    ) -> Result<Container> {
        let raw = unsafe { ffi::avformat_alloc_context() };
        check_ptr(raw, "could not allocate format context")?;
        let mut ctx = unsafe { Owned::acquire(raw, free_format_context) };
        if let Some(io) = &io {
            unsafe {
                (*raw).pb = io.avio_ptr();
                (*raw).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;
            }
        }
        let url = path
            .map(|p| CString::new(p).map_err(|_| Error::Misuse("path contains NUL".into())))
            .transpose()?;
        let fmt = format.map_or(ptr::null(), |f| f.as_ptr());
        // The open call frees the context itself on failure, so ownership is
        // handed through it and taken back with the input-aware destructor.
        let mut raw = ctx.release();
        let rc = unsafe {
            ffi::avformat_open_input(
                &mut raw,
                url.as_ref().map_or(ptr::null(), |u| u.as_ptr()),
                fmt,
                ptr::null_mut(),
            )
        };
        check(rc, "could not open input")?;
        let ctx = unsafe { Owned::acquire(raw, free_input_context) };
        check(
            unsafe { ffi::avformat_find_stream_info(ctx.as_ptr(), ptr::null_mut()) },
            "could not read stream info",
        )?;

        let mut streams = Vec::new();
        unsafe {
            for i in 0..(*ctx.as_ptr()).nb_streams {
                let raw_stream = *(*ctx.as_ptr()).streams.add(i as usize);
                // Dormant until a caller opens it.
                (*raw_stream).discard = ffi::AVDiscard::AVDISCARD_ALL;
                streams.push(Stream::demuxed(raw_stream)?);
            }
        }
        let container = Container {
            streams,
            ctx,
            _io: io,
            mode: Mode::Input,
            owns_pb: false,
            draining: false,
            finished: false,
            header_written: false,
            trailer_written: false,
            read_packet: Packet::alloc()?,
        };
        info!(
            format = container.format_name(),
            streams = container.streams.len(),
            "input opened"
        );
        Ok(container)
    }

    /// Open a container for writing to a path; the format is guessed from
    /// the file name.
    pub fn open_output(path: &str) -> Result<Container> {
        let url = CString::new(path).map_err(|_| Error::Misuse("path contains NUL".into()))?;
        let mut raw = ptr::null_mut();
        check(
            unsafe {
                ffi::avformat_alloc_output_context2(
                    &mut raw,
                    ptr::null(),
                    ptr::null(),
                    url.as_ptr(),
                )
            },
            "could not allocate output context",
        )?;
        let ctx = unsafe { Owned::acquire(raw, free_format_context) };
        let mut owns_pb = false;
        unsafe {
            if ((*(*raw).oformat).flags & ffi::AVFMT_NOFILE as c_int) == 0 {
                check(
                    ffi::avio_open(&mut (*raw).pb, url.as_ptr(), ffi::AVIO_FLAG_WRITE as c_int),
                    "could not open output file",
                )?;
                owns_pb = true;
            }
        }
        Container::output_from(ctx, None, owns_pb)
    }

    /// Open a container for writing through custom I/O callbacks; the format
    /// is selected by short name.
    pub fn open_output_io(format_name: &str, io: IoContext) -> Result<Container> {
        let cname = CString::new(format_name)
            .map_err(|_| Error::Misuse("format name contains NUL".into()))?;
        let mut raw = ptr::null_mut();
        check(
            unsafe {
                ffi::avformat_alloc_output_context2(
                    &mut raw,
                    ptr::null(),
                    cname.as_ptr(),
                    ptr::null(),
                )
            },
            "could not allocate output context",
        )?;
        let ctx = unsafe { Owned::acquire(raw, free_format_context) };
        unsafe {
            (*raw).pb = io.avio_ptr();
            (*raw).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;
        }
        Container::output_from(ctx, Some(io), false)
    }

    fn output_from(
        ctx: Owned<ffi::AVFormatContext>,
        io: Option<IoContext>,
        owns_pb: bool,
    ) -> Result<Container> {
        let container = Container {
            streams: Vec::new(),
            ctx,
            _io: io,
            mode: Mode::Output,
            owns_pb,
            draining: false,
            finished: false,
            header_written: false,
            trailer_written: false,
            read_packet: Packet::alloc()?,
        };
        info!(format = container.format_name(), "output opened");
        Ok(container)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Short name of the container format.
    pub fn format_name(&self) -> &str {
        unsafe {
            let ctx = self.ctx.as_ptr();
            let name = match self.mode {
                Mode::Input => (*(*ctx).iformat).name,
                Mode::Output => (*(*ctx).oformat).name,
            };
            CStr::from_ptr(name).to_str().unwrap_or("unknown")
        }
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> Option<Stream> {
        self.streams.get(index).cloned()
    }

    /// All streams of one media kind.
    pub fn streams_of(&self, kind: MediaKind) -> Vec<Stream> {
        self.streams
            .iter()
            .filter(|s| s.kind() == kind)
            .cloned()
            .collect()
    }

    /// First stream of one media kind, if any.
    pub fn first_stream_of(&self, kind: MediaKind) -> Option<Stream> {
        self.streams.iter().find(|s| s.kind() == kind).cloned()
    }

    fn require_mode(&self, mode: Mode, what: &'static str) -> Result<()> {
        if self.mode != mode {
            return Err(Error::Misuse(format!(
                "cannot {what} on a container opened for {}",
                match self.mode {
                    Mode::Input => "reading",
                    Mode::Output => "writing",
                }
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Demuxing
    // ========================================================================

    /// Perform one unit of demux work: feed one packet to its stream's
    /// decoder, or drain decoders once the input is exhausted.
    ///
    /// Returns `false` once every open stream has been fully drained; further
    /// calls keep returning `false`.
    pub fn decode(&mut self) -> Result<bool> {
        self.require_mode(Mode::Input, "decode")?;
        if self.finished {
            return Ok(false);
        }
        loop {
            // A packet a decoder refused last time goes first.
            if let Some(stream) = self.streams.iter().find(|s| s.has_pending()).cloned() {
                stream.resume()?;
                return Ok(true);
            }
            if self.draining {
                return self.drain_pass();
            }
            self.read_packet.clear();
            let rc = unsafe { ffi::av_read_frame(self.ctx.as_ptr(), self.read_packet.as_ptr()) };
            if !check_eof(rc, "could not read packet")? {
                self.draining = true;
                debug!("input exhausted, draining decoders");
                continue;
            }
            let index = self.read_packet.stream_index();
            match self.open_stream_at(index) {
                Some(stream) => {
                    stream.accept(&mut self.read_packet)?;
                    return Ok(true);
                }
                // Packet for a stream nobody is listening to.
                None => continue,
            }
        }
    }

    /// Run [`Container::decode`] to completion.
    pub fn decode_all(&mut self) -> Result<()> {
        while self.decode()? {}
        Ok(())
    }

    fn open_stream_at(&self, index: usize) -> Option<Stream> {
        self.streams
            .get(index)
            .filter(|s| s.is_open() && !s.is_finished())
            .cloned()
    }

    fn drain_pass(&mut self) -> Result<bool> {
        let mut delivered = 0;
        for stream in &self.streams {
            if stream.is_open() && !stream.is_finished() {
                delivered += stream.drain()?;
            }
        }
        let all_done = self
            .streams
            .iter()
            .all(|s| !s.is_open() || s.is_finished());
        if all_done {
            self.finished = true;
        }
        Ok(delivered > 0 || !self.finished)
    }

    /// Seek to `timestamp` (in the stream's time base, or the global one when
    /// no stream is given) and reset decode state so reading can resume.
    pub fn seek(&mut self, stream: Option<&Stream>, timestamp: i64) -> Result<()> {
        self.require_mode(Mode::Input, "seek")?;
        let index = stream.map_or(-1, |s| s.index() as c_int);
        check(
            unsafe {
                ffi::av_seek_frame(
                    self.ctx.as_ptr(),
                    index,
                    timestamp,
                    ffi::AVSEEK_FLAG_BACKWARD as c_int,
                )
            },
            "could not seek",
        )?;
        self.draining = false;
        self.finished = false;
        for stream in &self.streams {
            stream.reset_codec();
        }
        Ok(())
    }

    // ========================================================================
    // Muxing
    // ========================================================================

    /// Append a closed output stream for `codec_id`. Configure it with
    /// [`Stream::configure`] and open it with [`Stream::open`] before
    /// encoding.
    pub fn add_stream(&mut self, codec_id: ffi::AVCodecID) -> Result<Stream> {
        self.require_mode(Mode::Output, "add a stream")?;
        if self.header_written {
            return Err(Error::Misuse(
                "cannot add a stream after the header was written".into(),
            ));
        }
        let global_header = unsafe {
            ((*(*self.ctx.as_ptr()).oformat).flags & ffi::AVFMT_GLOBALHEADER as c_int) != 0
        };
        let raw = unsafe { ffi::avformat_new_stream(self.ctx.as_ptr(), ptr::null()) };
        check_ptr(raw, "could not create output stream")?;
        let stream = Stream::muxed(raw, codec_id, global_header)?;
        debug!(index = stream.index(), kind = ?stream.kind(), "output stream added");
        self.streams.push(stream.clone());
        Ok(stream)
    }

    /// Write the container header. Called implicitly by the first
    /// [`Container::encode`]; call it directly to pass muxer options.
    pub fn write_header(&mut self, options: &mut Dictionary) -> Result<()> {
        self.require_mode(Mode::Output, "write a header")?;
        if self.header_written {
            return Err(Error::Misuse("header already written".into()));
        }
        check(
            unsafe { ffi::avformat_write_header(self.ctx.as_ptr(), options.as_mut_ptr()) },
            "could not write header",
        )?;
        self.header_written = true;
        Ok(())
    }

    /// Perform one encode pass over all open streams: each gets a chance to
    /// pull frames from its callback and write one finished packet,
    /// interleaved, into the container.
    ///
    /// Returns `true` iff at least one packet was written this pass; once no
    /// stream produces output the trailer is written and further calls keep
    /// returning `false`.
    pub fn encode(&mut self) -> Result<bool> {
        self.require_mode(Mode::Output, "encode")?;
        if self.finished {
            return Ok(false);
        }
        if !self.streams.iter().any(|s| s.is_open()) {
            return Err(Error::Misuse("no open output streams".into()));
        }
        if !self.header_written {
            let mut options = Dictionary::new();
            self.write_header(&mut options)?;
        }
        let mut wrote = false;
        for stream in &self.streams {
            if stream.is_open() && !stream.is_finished() {
                wrote |= stream.encode_into(self.ctx.as_ptr())?;
            }
        }
        if !wrote {
            self.write_trailer()?;
            self.finished = true;
        }
        Ok(wrote)
    }

    /// Run [`Container::encode`] to completion, trailer included.
    pub fn encode_all(&mut self) -> Result<()> {
        while self.encode()? {}
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        if self.header_written && !self.trailer_written {
            check(
                unsafe { ffi::av_write_trailer(self.ctx.as_ptr()) },
                "could not write trailer",
            )?;
            self.trailer_written = true;
            debug!("trailer written");
        }
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.mode == Mode::Output && self.header_written && !self.trailer_written {
            let rc = unsafe { ffi::av_write_trailer(self.ctx.as_ptr()) };
            if rc < 0 {
                warn!(code = rc, "trailer write failed during teardown");
            }
            self.trailer_written = true;
        }
        // Handles held by callers must not reach into freed native state.
        for stream in &self.streams {
            stream.detach();
        }
        if self.owns_pb && !self.ctx.is_null() {
            unsafe { ffi::avio_closep(&mut (*self.ctx.as_ptr()).pb) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Buffer;

    #[test]
    fn missing_input_reports_native_error() {
        let err = Container::open_input("/no/such/file.mkv").unwrap_err();
        assert!(matches!(err, Error::Native { .. }));
    }

    #[test]
    fn output_rejects_demux_operations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut container = Container::open_output(path.to_str().unwrap()).unwrap();
        assert!(matches!(container.decode(), Err(Error::Misuse(_))));
        assert!(matches!(container.seek(None, 0), Err(Error::Misuse(_))));
    }

    #[test]
    fn encode_without_open_streams_is_misuse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut container = Container::open_output(path.to_str().unwrap()).unwrap();
        assert!(matches!(container.encode(), Err(Error::Misuse(_))));
        // An added but never opened stream does not change that.
        container
            .add_stream(ffi::AVCodecID::AV_CODEC_ID_PCM_S16LE)
            .unwrap();
        assert!(matches!(container.encode(), Err(Error::Misuse(_))));
    }

    #[test]
    fn custom_io_output_marks_the_context() {
        let mut io = IoContext::new_writable(Buffer::alloc(4096).unwrap()).unwrap();
        io.set_write(|buf| buf.len() as c_int);
        let container = Container::open_output_io("wav", io).unwrap();
        let flags = unsafe { (*container.ctx.as_ptr()).flags };
        assert_ne!(flags & ffi::AVFMT_FLAG_CUSTOM_IO as c_int, 0);
    }

    #[test]
    fn opening_an_unconfigured_mux_stream_is_misuse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut container = Container::open_output(path.to_str().unwrap()).unwrap();
        let stream = container
            .add_stream(ffi::AVCodecID::AV_CODEC_ID_PCM_S16LE)
            .unwrap();
        assert_eq!(stream.kind(), MediaKind::Audio);
        assert!(matches!(stream.open(|_| false), Err(Error::Misuse(_))));
    }
}
