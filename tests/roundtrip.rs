//! Pure fragment-level round trips: Packetizer output fed straight into a
//!  Reassembler, no sockets involved, so arbitrary delivery orders can be
//!  exercised deterministically.

use framelink::config::ReassemblyConfig;
use framelink::fragment_header::{FragmentHeader, MAX_PAYLOAD};
use framelink::packetizer::Packetizer;
use framelink::reassembler::{CompletedFrame, Reassembler};

fn patterned_frame(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 131 % 251) as u8).collect()
}

/// All (header, payload) pairs the sink would put on the wire for `frame`.
fn fragments_of(frame: &[u8], frame_id: u32) -> Vec<(FragmentHeader, Vec<u8>)> {
    let mut packetizer = Packetizer::new();
    packetizer.prepare_frame(frame, frame_id).unwrap();

    packetizer
        .fragments()
        .iter()
        .map(|fragment| {
            let header = FragmentHeader::deser(&mut &fragment.header_bytes()[..]).unwrap();
            (header, fragment.payload_in(frame).to_vec())
        })
        .collect()
}

fn deliver(
    reassembler: &mut Reassembler,
    fragments: &[(FragmentHeader, Vec<u8>)],
    order: impl Iterator<Item = usize>,
) -> Option<CompletedFrame> {
    let mut completed = None;
    for index in order {
        let (header, payload) = &fragments[index];
        if let Some(frame) = reassembler.add_fragment(header, payload) {
            assert!(completed.is_none(), "a frame must complete exactly once");
            completed = Some(frame);
        }
    }
    completed
}

#[test]
fn in_order_round_trip_for_assorted_sizes() {
    for len in [0, 1, 7, MAX_PAYLOAD - 1, MAX_PAYLOAD, MAX_PAYLOAD + 1, 2 * MAX_PAYLOAD + 7, 3 * MAX_PAYLOAD] {
        let frame = patterned_frame(len);
        let fragments = fragments_of(&frame, 42);
        assert_eq!(fragments.len(), ((len + MAX_PAYLOAD - 1) / MAX_PAYLOAD).max(1));

        let mut reassembler = Reassembler::new(ReassemblyConfig::default());
        let completed = deliver(&mut reassembler, &fragments, 0..fragments.len())
            .unwrap_or_else(|| panic!("frame of {len} bytes did not complete"));

        assert_eq!(completed.frame_id, 42);
        assert_eq!(completed.data, frame, "mismatch at {len} bytes");
    }
}

#[test]
fn reversed_delivery_round_trip() {
    let frame = patterned_frame(5 * MAX_PAYLOAD + 123);
    let fragments = fragments_of(&frame, 7);

    let mut reassembler = Reassembler::new(ReassemblyConfig::default());
    let completed = deliver(&mut reassembler, &fragments, (0..fragments.len()).rev()).unwrap();

    assert_eq!(completed.data, frame);
}

#[test]
fn even_odd_interleaved_delivery_round_trip() {
    let frame = patterned_frame(6 * MAX_PAYLOAD + 1);
    let fragments = fragments_of(&frame, 9);

    let order = (0..fragments.len())
        .step_by(2)
        .chain((1..fragments.len()).step_by(2));

    let mut reassembler = Reassembler::new(ReassemblyConfig::default());
    let completed = deliver(&mut reassembler, &fragments, order).unwrap();

    assert_eq!(completed.data, frame);
}

#[test]
fn duplicated_prefix_does_not_disturb_the_result() {
    let frame = patterned_frame(3 * MAX_PAYLOAD + 55);
    let fragments = fragments_of(&frame, 11);

    let mut reassembler = Reassembler::new(ReassemblyConfig::default());

    // every fragment but the last, then the same subset again
    for (header, payload) in &fragments[..fragments.len() - 1] {
        assert!(reassembler.add_fragment(header, payload).is_none());
    }
    for (header, payload) in &fragments[..fragments.len() - 1] {
        assert!(reassembler.add_fragment(header, payload).is_none());
    }

    let (header, payload) = fragments.last().unwrap();
    let completed = reassembler.add_fragment(header, payload).unwrap();
    assert_eq!(completed.data, frame);
}

#[test]
fn multiplexed_frames_each_reassemble_to_their_input() {
    let frame_count = ReassemblyConfig::default().max_pending_frames;
    let frames: Vec<Vec<u8>> = (0..frame_count)
        .map(|i| patterned_frame(2 * MAX_PAYLOAD + 100 * i + 1))
        .collect();
    let per_frame: Vec<_> = frames
        .iter()
        .enumerate()
        .map(|(i, frame)| fragments_of(frame, i as u32))
        .collect();

    let mut reassembler = Reassembler::new(ReassemblyConfig::default());
    let mut completed = Vec::new();

    // deliver round-robin: fragment 0 of every frame, then fragment 1, ...
    let max_fragments = per_frame.iter().map(Vec::len).max().unwrap();
    for fragment_index in 0..max_fragments {
        for fragments in &per_frame {
            if let Some((header, payload)) = fragments.get(fragment_index) {
                if let Some(frame) = reassembler.add_fragment(header, payload) {
                    completed.push(frame);
                }
            }
        }
    }

    assert_eq!(completed.len(), frame_count);
    for frame in completed {
        assert_eq!(frame.data, frames[frame.frame_id as usize]);
    }
    assert_eq!(reassembler.pending_count(), 0);
}
