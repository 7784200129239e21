use std::ops::Range;

use tracing::trace;

use crate::error::TransportError;
use crate::fragment_header::{FragmentHeader, HEADER_LEN, MAX_FRAME_SIZE, MAX_PAYLOAD};

/// Initial descriptor pool reservation - enough for a ~10 MiB frame, so the
///  pool only grows for unusually large frames.
const POOL_RESERVE: usize = 8000;

/// One ready-to-send fragment: the owned 12-byte wire header plus the
///  sub-range of the caller's frame buffer that forms the payload.
///
/// The descriptor does not own payload bytes. The payload range is resolved
///  against the frame slice at send time, which re-establishes the borrow -
///  a frame buffer therefore cannot be mutated between `prepare_frame` and
///  the send without the compiler noticing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentDescriptor {
    header_bytes: [u8; HEADER_LEN],
    payload: Range<usize>,
}

impl FragmentDescriptor {
    pub fn header_bytes(&self) -> &[u8; HEADER_LEN] {
        &self.header_bytes
    }

    pub fn payload_range(&self) -> Range<usize> {
        self.payload.clone()
    }

    pub fn payload_in<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        &frame[self.payload.clone()]
    }
}

/// Zero-copy fragmentation: splits a frame into [`MAX_PAYLOAD`]-sized
///  fragments by building descriptors over the caller's buffer. No payload
///  bytes are copied; only the 12-byte headers are written, into descriptors
///  pooled and reused across frames.
pub struct Packetizer {
    pool: Vec<FragmentDescriptor>,
}

impl Packetizer {
    pub fn new() -> Packetizer {
        Packetizer { pool: Vec::with_capacity(POOL_RESERVE) }
    }

    /// Prepares `frame` for transmission as fragments of `frame_id` and
    ///  returns the fragment count.
    ///
    /// A frame of L bytes becomes `max(1, ceil(L / MAX_PAYLOAD))` fragments:
    ///  all but the last carry exactly [`MAX_PAYLOAD`] payload bytes, the
    ///  last carries the remainder - possibly zero, since an empty frame is
    ///  still announced to the receiver with a single payload-less fragment.
    ///
    /// The prepared batch stays valid until the next `prepare_frame` call.
    pub fn prepare_frame(&mut self, frame: &[u8], frame_id: u32) -> Result<usize, TransportError> {
        if frame.len() as u64 > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge { size: frame.len() as u64 });
        }

        // integer division rounded up, clamped so an empty frame emits one fragment
        let total_frags = ((frame.len() + MAX_PAYLOAD - 1) / MAX_PAYLOAD).max(1);

        self.pool.clear();
        if total_frags > self.pool.capacity() {
            trace!("growing fragment descriptor pool to {} entries", total_frags);
            self.pool.reserve(total_frags);
        }

        let mut offset = 0;
        let mut remaining = frame.len();
        for frag_index in 0..total_frags {
            let chunk = remaining.min(MAX_PAYLOAD);
            let header =
                FragmentHeader::new(frame_id, frag_index as u32, total_frags as u32);
            self.pool.push(FragmentDescriptor {
                header_bytes: header.wire_bytes(),
                payload: offset..offset + chunk,
            });
            offset += chunk;
            remaining -= chunk;
        }

        Ok(total_frags)
    }

    /// The batch prepared by the last `prepare_frame` call.
    pub fn fragments(&self) -> &[FragmentDescriptor] {
        &self.pool
    }

    pub fn fragment_count(&self) -> usize {
        self.pool.len()
    }
}

impl Default for Packetizer {
    fn default() -> Packetizer {
        Packetizer::new()
    }
}
