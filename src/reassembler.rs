use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::config::ReassemblyConfig;
use crate::fragment_header::{FragmentHeader, MAX_FRAME_SIZE, MAX_PAYLOAD};

/// A fully reassembled frame, handed out exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct CompletedFrame {
    pub frame_id: u32,
    pub data: Vec<u8>,
}

/// Receive-side state of one frame with missing fragments.
///
/// The buffer is contiguous and sized for the declared fragment count, so an
///  arriving fragment is copied straight to `frag_index * MAX_PAYLOAD` no
///  matter in which order fragments show up. The exact frame length is
///  unknown until the *last* fragment (the only one allowed to be short)
///  arrives and pins it down.
struct PendingFrame {
    buffer: Vec<u8>,
    received_mask: Vec<u64>,
    received_count: u32,
    total_frags: u32,
    final_data_size: usize,
    last_update: Instant,
}

impl PendingFrame {
    /// `None` if the allocation fails - the caller drops the fragment rather
    ///  than aborting the receive loop.
    fn new(total_frags: u32, buffer_size: usize, now: Instant) -> Option<PendingFrame> {
        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(buffer_size).is_err() {
            return None;
        }
        buffer.resize(buffer_size, 0);

        let mask_words = (total_frags as usize + 63) / 64;
        let mut received_mask = Vec::new();
        if received_mask.try_reserve_exact(mask_words).is_err() {
            return None;
        }
        received_mask.resize(mask_words, 0);

        Some(PendingFrame {
            buffer,
            received_mask,
            received_count: 0,
            total_frags,
            final_data_size: buffer_size,
            last_update: now,
        })
    }

    fn is_received(&self, frag_index: u32) -> bool {
        self.received_mask[frag_index as usize / 64] & (1u64 << (frag_index % 64)) != 0
    }

    fn mark_received(&mut self, frag_index: u32) {
        self.received_mask[frag_index as usize / 64] |= 1u64 << (frag_index % 64);
        self.received_count += 1;
    }
}

/// Accepts fragments in arbitrary order, groups them by frame id and emits
///  each frame once all of its fragments have arrived.
///
/// The pending table is bounded: at most `max_pending_frames` frames may be
///  in flight, and frames that stop making progress for `frame_timeout` are
///  evicted when room is needed. All per-fragment error conditions
///  (malformed headers, duplicates, a full table, failed allocations) are
///  absorbed - fragment loss shows up as frame loss and nothing else.
///
/// Not synchronized; intended to be owned by a single receive thread.
pub struct Reassembler {
    config: ReassemblyConfig,
    pending: BTreeMap<u32, PendingFrame>,
}

impl Reassembler {
    pub fn new(config: ReassemblyConfig) -> Reassembler {
        Reassembler { config, pending: BTreeMap::new() }
    }

    /// Number of frames currently awaiting fragments. Never exceeds the
    ///  configured `max_pending_frames`.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Ingests one fragment. Returns the completed frame if this fragment
    ///  was the last missing piece, `None` otherwise - including every
    ///  silently-dropped condition.
    pub fn add_fragment(
        &mut self,
        header: &FragmentHeader,
        payload: &[u8],
    ) -> Option<CompletedFrame> {
        if payload.len() > MAX_PAYLOAD {
            debug!(
                "fragment of frame {} carries {} payload bytes, above the protocol maximum - dropping",
                header.frame_id,
                payload.len()
            );
            return None;
        }
        if header.total_frags == 0 {
            // a conforming sender emits at least one fragment per frame
            debug!("fragment of frame {} declares zero total fragments - dropping", header.frame_id);
            return None;
        }

        let now = Instant::now();

        if !self.pending.contains_key(&header.frame_id)
            && self.pending.len() >= self.config.max_pending_frames
        {
            self.evict(now);
            if self.pending.len() >= self.config.max_pending_frames {
                debug!(
                    "reassembly table full - dropping fragment of new frame {}",
                    header.frame_id
                );
                return None;
            }
        }

        let frame = match self.pending.entry(header.frame_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let buffer_size = header.total_frags as u64 * MAX_PAYLOAD as u64;
                if buffer_size > MAX_FRAME_SIZE || buffer_size > self.config.max_frame_bytes {
                    debug!(
                        "frame {} declares {} fragments ({} bytes), above the allocation ceiling - dropping",
                        header.frame_id, header.total_frags, buffer_size
                    );
                    return None;
                }
                match PendingFrame::new(header.total_frags, buffer_size as usize, now) {
                    Some(frame) => entry.insert(frame),
                    None => {
                        warn!(
                            "allocating {} bytes for frame {} failed - dropping",
                            buffer_size, header.frame_id
                        );
                        return None;
                    }
                }
            }
        };

        frame.last_update = now;

        if header.frag_index >= frame.total_frags {
            debug!(
                "fragment index {} of frame {} is outside the declared range of {} - dropping",
                header.frag_index, header.frame_id, frame.total_frags
            );
            return None;
        }
        if frame.is_received(header.frag_index) {
            trace!("duplicate fragment {} of frame {} - dropping", header.frag_index, header.frame_id);
            return None;
        }

        let offset = header.frag_index as usize * MAX_PAYLOAD;
        if offset + payload.len() <= frame.buffer.len() {
            frame.buffer[offset..offset + payload.len()].copy_from_slice(payload);
        }

        if header.frag_index == frame.total_frags - 1 {
            // the last fragment is the only short one, so it reveals the
            //  frame's exact byte length
            frame.final_data_size = offset + payload.len();
        }

        frame.mark_received(header.frag_index);

        if frame.received_count == frame.total_frags {
            let mut frame = self
                .pending
                .remove(&header.frame_id)
                .expect("this is a bug: the entry was present a moment ago");
            frame.buffer.truncate(frame.final_data_size);
            trace!(
                "frame {} complete: {} bytes from {} fragments",
                header.frame_id,
                frame.buffer.len(),
                frame.total_frags
            );
            return Some(CompletedFrame { frame_id: header.frame_id, data: frame.buffer });
        }

        None
    }

    /// Frees table room: drops every frame that has seen no fragment for
    ///  `frame_timeout`, and if that is not enough sacrifices the pending
    ///  frame with the smallest id (deterministic thanks to the ordered
    ///  table).
    fn evict(&mut self, now: Instant) {
        let timeout = self.config.frame_timeout;
        self.pending.retain(|frame_id, frame| {
            let stale = now.duration_since(frame.last_update) > timeout;
            if stale {
                debug!(
                    "evicting stale frame {} ({} of {} fragments received)",
                    frame_id, frame.received_count, frame.total_frags
                );
            }
            !stale
        });

        if self.pending.len() >= self.config.max_pending_frames {
            if let Some((victim, _)) = self.pending.pop_first() {
                debug!("reassembly table still full - force-evicting frame {}", victim);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    fn fragment(frame_id: u32, frag_index: u32, total_frags: u32, fill: u8) -> (FragmentHeader, Vec<u8>) {
        (
            FragmentHeader::new(frame_id, frag_index, total_frags),
            vec![fill; MAX_PAYLOAD],
        )
    }

    fn reassembler() -> Reassembler {
        Reassembler::new(ReassemblyConfig::default())
    }

    #[test]
    fn test_ordered_three_fragments() {
        let mut reassembler = reassembler();

        let (h0, p0) = fragment(100, 0, 3, 0xAA);
        let (h1, p1) = fragment(100, 1, 3, 0xBB);
        let (h2, p2) = fragment(100, 2, 3, 0xCC);

        assert_eq!(reassembler.add_fragment(&h0, &p0), None);
        assert_eq!(reassembler.add_fragment(&h1, &p1), None);

        let completed = reassembler.add_fragment(&h2, &p2).unwrap();
        assert_eq!(completed.frame_id, 100);
        assert_eq!(completed.data.len(), 3 * MAX_PAYLOAD);
        assert_eq!(completed.data[0], 0xAA);
        assert_eq!(completed.data[MAX_PAYLOAD], 0xBB);
        assert_eq!(completed.data[2 * MAX_PAYLOAD], 0xCC);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_out_of_order_delivery() {
        let mut reassembler = reassembler();

        let (h0, p0) = fragment(200, 0, 3, 0x00);
        let (h1, p1) = fragment(200, 1, 3, 0x11);
        let (h2, p2) = fragment(200, 2, 3, 0x22);

        assert_eq!(reassembler.add_fragment(&h2, &p2), None);
        assert_eq!(reassembler.add_fragment(&h0, &p0), None);

        let completed = reassembler.add_fragment(&h1, &p1).unwrap();
        assert_eq!(completed.frame_id, 200);
        assert_eq!(completed.data[0], 0x00);
        assert_eq!(completed.data[2 * MAX_PAYLOAD], 0x22);
    }

    #[test]
    fn test_duplicate_fragment_is_dropped() {
        let mut reassembler = reassembler();

        let (h0, p0) = fragment(300, 0, 2, 0xAA);
        let (h1, p1) = fragment(300, 1, 2, 0xBB);

        assert_eq!(reassembler.add_fragment(&h0, &p0), None);
        assert_eq!(reassembler.add_fragment(&h0, &p0), None);

        let completed = reassembler.add_fragment(&h1, &p1).unwrap();
        assert_eq!(completed.data.len(), 2 * MAX_PAYLOAD);
    }

    #[test]
    fn test_interleaved_frames_complete_independently() {
        let mut reassembler = reassembler();

        let (a0, pa0) = fragment(10, 0, 2, 0xAA);
        let (b0, pb0) = fragment(20, 0, 2, 0xBB);
        let (a1, pa1) = fragment(10, 1, 2, 0xAA);
        let (b1, pb1) = fragment(20, 1, 2, 0xBB);

        assert_eq!(reassembler.add_fragment(&a0, &pa0), None);
        assert_eq!(reassembler.add_fragment(&b0, &pb0), None);

        let first = reassembler.add_fragment(&a1, &pa1).unwrap();
        assert_eq!(first.frame_id, 10);

        let second = reassembler.add_fragment(&b1, &pb1).unwrap();
        assert_eq!(second.frame_id, 20);
    }

    #[test]
    fn test_short_final_fragment_sets_exact_length() {
        let mut reassembler = reassembler();

        let (h0, p0) = fragment(1, 0, 2, 0x55);
        let h1 = FragmentHeader::new(1, 1, 2);
        let p1 = vec![0x66u8; 7];

        assert_eq!(reassembler.add_fragment(&h0, &p0), None);
        let completed = reassembler.add_fragment(&h1, &p1).unwrap();

        assert_eq!(completed.data.len(), MAX_PAYLOAD + 7);
        assert_eq!(&completed.data[MAX_PAYLOAD..], &p1[..]);
    }

    #[test]
    fn test_empty_frame_completes_with_zero_bytes() {
        let mut reassembler = reassembler();

        let header = FragmentHeader::new(5, 0, 1);
        let completed = reassembler.add_fragment(&header, &[]).unwrap();

        assert_eq!(completed.frame_id, 5);
        assert_eq!(completed.data.len(), 0);
    }

    #[rstest]
    #[case::oversize_payload(FragmentHeader::new(1, 0, 2), MAX_PAYLOAD + 1)]
    #[case::zero_total_frags(FragmentHeader::new(1, 0, 0), 10)]
    #[case::index_out_of_range(FragmentHeader::new(1, 2, 2), 10)]
    fn test_malformed_fragments_leave_no_trace(#[case] header: FragmentHeader, #[case] payload_len: usize) {
        let mut reassembler = reassembler();

        let payload = vec![0u8; payload_len];
        assert_eq!(reassembler.add_fragment(&header, &payload), None);

        // index-out-of-range admits the frame but must not mark anything received
        if reassembler.pending_count() == 1 {
            let (h0, p0) = fragment(1, 0, 2, 0xAA);
            let (h1, p1) = fragment(1, 1, 2, 0xBB);
            assert_eq!(reassembler.add_fragment(&h0, &p0), None);
            assert!(reassembler.add_fragment(&h1, &p1).is_some());
        }
    }

    #[test]
    fn test_oversize_allocation_request_is_dropped() {
        let mut reassembler = Reassembler::new(ReassemblyConfig {
            max_frame_bytes: 10 * MAX_PAYLOAD as u64,
            ..ReassemblyConfig::default()
        });

        let header = FragmentHeader::new(1, 0, 11);
        assert_eq!(reassembler.add_fragment(&header, &[0u8; 10]), None);
        assert_eq!(reassembler.pending_count(), 0);

        // at the ceiling is still admitted
        let header = FragmentHeader::new(1, 0, 10);
        assert_eq!(reassembler.add_fragment(&header, &[0u8; 10]), None);
        assert_eq!(reassembler.pending_count(), 1);
    }

    #[test]
    fn test_table_never_exceeds_capacity() {
        let mut reassembler = reassembler();
        let capacity = ReassemblyConfig::default().max_pending_frames;

        for frame_id in 0..100u32 {
            let (header, payload) = fragment(frame_id, 0, 2, 0x11);
            reassembler.add_fragment(&header, &payload);
            assert!(reassembler.pending_count() <= capacity);
        }
    }

    #[test]
    fn test_forced_eviction_removes_smallest_frame_id() {
        let mut reassembler = reassembler();
        let capacity = ReassemblyConfig::default().max_pending_frames;

        // frame_timeout has not elapsed for any of these, so admitting one
        //  more forces the deterministic victim choice
        for frame_id in 0..capacity as u32 {
            let (header, payload) = fragment(frame_id, 0, 2, 0x11);
            assert_eq!(reassembler.add_fragment(&header, &payload), None);
        }
        assert_eq!(reassembler.pending_count(), capacity);

        let (header, payload) = fragment(1000, 0, 2, 0x22);
        assert_eq!(reassembler.add_fragment(&header, &payload), None);
        assert_eq!(reassembler.pending_count(), capacity);

        // frame 0 was sacrificed: its remaining fragment no longer completes it
        let (h1, p1) = fragment(0, 1, 2, 0x11);
        assert_eq!(reassembler.add_fragment(&h1, &p1), None);

        // frame 1000 was admitted and completes normally
        let (h1, p1) = fragment(1000, 1, 2, 0x22);
        assert!(reassembler.add_fragment(&h1, &p1).is_some());
    }

    #[test]
    fn test_stale_frames_are_evicted_first() {
        let mut reassembler = Reassembler::new(ReassemblyConfig {
            frame_timeout: Duration::from_millis(0),
            ..ReassemblyConfig::default()
        });
        let capacity = ReassemblyConfig::default().max_pending_frames;

        for frame_id in 0..capacity as u32 {
            let (header, payload) = fragment(frame_id, 0, 2, 0x11);
            reassembler.add_fragment(&header, &payload);
        }
        std::thread::sleep(Duration::from_millis(5));

        // with every entry stale, eviction clears the whole table
        let (header, payload) = fragment(1000, 0, 2, 0x22);
        assert_eq!(reassembler.add_fragment(&header, &payload), None);
        assert_eq!(reassembler.pending_count(), 1);

        let (h1, p1) = fragment(1000, 1, 2, 0x22);
        assert!(reassembler.add_fragment(&h1, &p1).is_some());
    }

    #[test]
    fn test_completion_step_is_unaffected_by_duplicates() {
        let mut reassembler = reassembler();

        let (h0, p0) = fragment(7, 0, 3, 0x01);
        let (h1, p1) = fragment(7, 1, 3, 0x02);
        let (h2, p2) = fragment(7, 2, 3, 0x03);

        assert_eq!(reassembler.add_fragment(&h0, &p0), None);
        assert_eq!(reassembler.add_fragment(&h1, &p1), None);
        assert_eq!(reassembler.add_fragment(&h0, &p0), None);
        assert_eq!(reassembler.add_fragment(&h1, &p1), None);

        let completed = reassembler.add_fragment(&h2, &p2).unwrap();
        assert_eq!(completed.data.len(), 3 * MAX_PAYLOAD);
        assert_eq!(completed.data[MAX_PAYLOAD], 0x02);
    }
}
