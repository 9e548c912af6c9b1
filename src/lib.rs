//! # avmux
//!
//! Resource-safe demultiplexing and multiplexing over the native FFmpeg
//! libraries.
//!
//! Every native allocation is held by an owner that frees it exactly once,
//! native error codes surface as [`Error`] values carrying the call site and
//! the library's own diagnostic text, and data flows through the engine in
//! explicit pull-one-step calls so callers control pacing.
//!
//! ## Reading
//!
//! ```no_run
//! use avmux::{Container, MediaKind};
//!
//! # fn main() -> avmux::Result<()> {
//! let mut input = Container::open_input("movie.mkv")?;
//! let video = input
//!     .first_stream_of(MediaKind::Video)
//!     .ok_or_else(|| avmux::Error::Misuse("no video stream".into()))?;
//! video.open(|frame| {
//!     println!("frame {}x{} pts {}", frame.width(), frame.height(), frame.pts());
//!     true
//! })?;
//! input.decode_all()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing
//!
//! Output streams pull their input: each stream carries a callback that is
//! asked to fill the next frame whenever its encoder runs dry, and declines
//! by returning `false` once the stream is complete.
//!
//! ## Custom I/O
//!
//! [`IoContext`] adapts read/write/seek closures to the native I/O layer, so
//! containers can live entirely in memory or behind any transport.

// ============================================================================
// Modules
// ============================================================================

mod codec;
mod container;
mod dict;
mod error;
mod format;
mod frame;
mod io;
mod owned;
mod packet;
mod scale;
mod stream;

// ============================================================================
// Public surface
// ============================================================================

pub use codec::{CodecContext, EncoderKind, EncoderSettings, Receive};
pub use container::Container;
pub use dict::Dictionary;
pub use error::{Error, Result};
pub use format::InputFormat;
pub use frame::Frame;
pub use io::{Buffer, IoContext, Whence, DEFAULT_BUFFER_SIZE};
pub use packet::Packet;
pub use scale::{Picture, PictureLayout, PictureMut, Scaler, MAX_PLANES};
pub use stream::{FrameCallback, MediaKind, Stream, StreamInfo};

/// Re-export of the generated FFI bindings for identifiers the public API
/// takes directly, such as codec ids and pixel formats.
pub use ffmpeg_sys_next as sys;
