//! Compressed data packets.

use std::ffi::c_int;

use ffmpeg_sys_next as ffi;

use crate::error::{check_ptr, Error, Result};
use crate::owned::Owned;

unsafe fn free_packet(ptr: *mut ffi::AVPacket) {
    let mut ptr = ptr;
    ffi::av_packet_free(&mut ptr);
}

/// One compressed unit of data travelling between the demuxer, a codec, and
/// the muxer.
///
/// A packet read from a container may not be fully consumed by a single
/// decode call; `pending` records that the same packet must be offered to the
/// codec again before the next container read.
pub struct Packet {
    raw: Owned<ffi::AVPacket>,
    pending: bool,
}

impl Packet {
    pub fn alloc() -> Result<Packet> {
        let ptr = unsafe { ffi::av_packet_alloc() };
        check_ptr(ptr, "could not allocate packet")?;
        Ok(Packet {
            raw: unsafe { Owned::acquire(ptr, free_packet) },
            pending: false,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::AVPacket {
        self.raw.as_ptr()
    }

    /// Index of the stream this packet belongs to.
    pub fn stream_index(&self) -> usize {
        unsafe { (*self.raw.as_ptr()).stream_index as usize }
    }

    pub(crate) fn set_stream_index(&mut self, index: usize) {
        unsafe { (*self.raw.as_ptr()).stream_index = index as c_int };
    }

    pub fn size(&self) -> usize {
        unsafe { (*self.raw.as_ptr()).size as usize }
    }

    pub fn data(&self) -> &[u8] {
        unsafe {
            let raw = &*self.raw.as_ptr();
            if raw.data.is_null() || raw.size <= 0 {
                &[]
            } else {
                std::slice::from_raw_parts(raw.data, raw.size as usize)
            }
        }
    }

    /// Discard the first `consumed` bytes, keeping the rest for another
    /// decode attempt. Consuming everything clears the payload.
    pub fn advance(&mut self, consumed: usize) -> Result<()> {
        let raw = self.raw.as_ptr();
        let size = unsafe { (*raw).size } as usize;
        if consumed > size {
            return Err(Error::Misuse(format!(
                "consumed {consumed} bytes of a {size} byte packet"
            )));
        }
        unsafe {
            if consumed == size {
                ffi::av_packet_unref(raw);
            } else {
                (*raw).data = (*raw).data.add(consumed);
                (*raw).size -= consumed as c_int;
            }
        }
        Ok(())
    }

    /// Take the payload out of `other`, leaving it empty.
    pub(crate) fn move_from(&mut self, other: &mut Packet) {
        unsafe { ffi::av_packet_move_ref(self.raw.as_ptr(), other.raw.as_ptr()) };
        self.pending = false;
        other.pending = false;
    }

    /// Drop the payload and reset metadata; the allocation is kept for reuse.
    pub fn clear(&mut self) {
        unsafe { ffi::av_packet_unref(self.raw.as_ptr()) };
        self.pending = false;
    }

    pub(crate) fn pending(&self) -> bool {
        self.pending
    }

    pub(crate) fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_bytes(n: usize) -> Packet {
        let pkt = Packet::alloc().unwrap();
        let rc = unsafe { ffi::av_new_packet(pkt.as_ptr(), n as c_int) };
        assert_eq!(rc, 0);
        pkt
    }

    #[test]
    fn advance_shrinks_payload() {
        let mut pkt = packet_with_bytes(10);
        assert_eq!(pkt.size(), 10);
        pkt.advance(4).unwrap();
        assert_eq!(pkt.size(), 6);
        pkt.advance(6).unwrap();
        assert_eq!(pkt.size(), 0);
        assert!(pkt.data().is_empty());
    }

    #[test]
    fn advance_past_payload_is_misuse() {
        let mut pkt = packet_with_bytes(4);
        assert!(matches!(pkt.advance(5), Err(Error::Misuse(_))));
        assert_eq!(pkt.size(), 4);
    }

    #[test]
    fn clear_resets_pending() {
        let mut pkt = packet_with_bytes(8);
        pkt.set_pending(true);
        pkt.clear();
        assert!(!pkt.pending());
        assert_eq!(pkt.size(), 0);
    }
}
