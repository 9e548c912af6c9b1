//! Containers backed entirely by in-memory I/O callbacks.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use avmux::{
    sys, Buffer, Container, EncoderKind, EncoderSettings, InputFormat, IoContext, MediaKind,
    Whence,
};

/// One encoded mjpeg frame, produced through a real encoder into a file.
fn encoded_mjpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.mjpeg");
    {
        let mut output = Container::open_output(path.to_str().unwrap()).unwrap();
        let settings = EncoderSettings {
            bit_rate: 400_000,
            time_base: (1, 25),
            kind: EncoderKind::Video {
                width,
                height,
                pixel_format: sys::AVPixelFormat::AV_PIX_FMT_YUVJ420P,
                gop_size: 10,
            },
        };
        let stream = output
            .add_stream(sys::AVCodecID::AV_CODEC_ID_MJPEG)
            .unwrap();
        stream.configure(settings).unwrap();
        let mut produced = false;
        stream
            .open(move |frame| {
                if produced {
                    return false;
                }
                frame
                    .ensure_video(sys::AVPixelFormat::AV_PIX_FMT_YUVJ420P, width, height)
                    .unwrap();
                frame.plane_mut(0, height as usize).unwrap().fill(200);
                frame.plane_mut(1, height as usize / 2).unwrap().fill(128);
                frame.plane_mut(2, height as usize / 2).unwrap().fill(128);
                frame.set_pts(0);
                produced = true;
                true
            })
            .unwrap();
        output.encode_all().unwrap();
    }
    std::fs::read(path).unwrap()
}

#[test]
fn decode_from_memory_through_read_callback() {
    let bytes = encoded_mjpeg_bytes(48, 32);
    assert!(!bytes.is_empty());

    let mut io = IoContext::with_default_capacity().unwrap();
    let mut pos = 0usize;
    io.set_read(move |buf| {
        let n = buf.len().min(bytes.len() - pos);
        buf[..n].copy_from_slice(&bytes[pos..pos + n]);
        pos += n;
        n as std::ffi::c_int
    });

    let mut input =
        Container::open_input_io(io, Some(InputFormat::find("mjpeg").unwrap())).unwrap();
    let video = input.first_stream_of(MediaKind::Video).unwrap();
    let frames = Arc::new(AtomicUsize::new(0));
    {
        let frames = Arc::clone(&frames);
        video
            .open(move |frame| {
                assert_eq!((frame.width(), frame.height()), (48, 32));
                frames.fetch_add(1, Ordering::SeqCst);
                true
            })
            .unwrap();
    }
    input.decode_all().unwrap();
    assert_eq!(frames.load(Ordering::SeqCst), 1);
}

/// Growable in-memory sink with a seekable cursor, the shape the wav muxer
/// needs to patch its header after the fact.
#[derive(Default)]
struct Sink {
    data: Vec<u8>,
    pos: usize,
}

fn memory_writer(sink: Rc<Mutex<Sink>>) -> IoContext {
    let mut io = IoContext::new_writable(Buffer::alloc(4096).unwrap()).unwrap();
    {
        let sink = Rc::clone(&sink);
        io.set_write(move |buf| {
            let mut sink = sink.lock();
            let pos = sink.pos;
            let end = pos + buf.len();
            if end > sink.data.len() {
                sink.data.resize(end, 0);
            }
            sink.data[pos..end].copy_from_slice(buf);
            sink.pos = end;
            buf.len() as std::ffi::c_int
        });
    }
    io.set_seek(move |offset, whence| {
        let mut sink = sink.lock();
        let len = sink.data.len() as i64;
        let target = match whence {
            Whence::Start => offset,
            Whence::Current => sink.pos as i64 + offset,
            Whence::End => len + offset,
            Whence::Size => return len,
        };
        if target < 0 {
            return -1;
        }
        sink.pos = target as usize;
        target
    });
    io
}

#[test]
fn wav_muxes_into_memory_through_write_callback() {
    let sink = Rc::new(Mutex::new(Sink::default()));
    let io = memory_writer(Rc::clone(&sink));

    {
        let mut output = Container::open_output_io("wav", io).unwrap();
        let settings = EncoderSettings {
            bit_rate: 705_600,
            time_base: (1, 44_100),
            kind: EncoderKind::Audio {
                sample_rate: 44_100,
                channels: 1,
                sample_format: sys::AVSampleFormat::AV_SAMPLE_FMT_S16,
            },
        };
        let stream = output
            .add_stream(sys::AVCodecID::AV_CODEC_ID_PCM_S16LE)
            .unwrap();
        stream.configure(settings).unwrap();
        let mut produced = 0i64;
        stream
            .open(move |frame| {
                if produced >= 4 {
                    return false;
                }
                frame
                    .ensure_audio(sys::AVSampleFormat::AV_SAMPLE_FMT_S16, 44_100, 1, 256)
                    .unwrap();
                frame.plane_mut(0, 1).unwrap()[..512].fill(0);
                frame.set_pts(produced * 256);
                produced += 1;
                true
            })
            .unwrap();
        output.encode_all().unwrap();
    }

    let sink = sink.lock();
    assert!(sink.data.len() > 44, "expected a wav header plus samples");
    assert_eq!(&sink.data[0..4], b"RIFF");
    assert_eq!(&sink.data[8..12], b"WAVE");
    // Four frames of 256 mono s16 samples.
    assert!(sink.data.len() >= 4 * 256 * 2);
}
