use bytes::{Buf, BufMut};

/// Maximum payload bytes per UDP datagram.
///
/// Standard Ethernet MTU is 1500 bytes; subtracting the IP header (20 bytes
///  minimum), the UDP header (8 bytes) and the fragment header (12 bytes)
///  leaves 1460. The value is set to 1400 to leave a safety margin for VLAN
///  tags, tunnel encapsulation (VPN/GRE) and PPPoE, all of which eat into the
///  MTU on some routes without being visible to the endpoints.
pub const MAX_PAYLOAD: usize = 1400;

/// Serialized size of [`FragmentHeader`]. The wire layout has no padding.
pub const HEADER_LEN: usize = 12;

/// Largest frame the protocol can carry: `u32::MAX` fragments of
///  [`MAX_PAYLOAD`] bytes each (just under 6 TB - the practical limit is the
///  receiver's allocation ceiling, see `ReassemblyConfig::max_frame_bytes`).
pub const MAX_FRAME_SIZE: u64 = u32::MAX as u64 * MAX_PAYLOAD as u64;

/// The per-datagram descriptor preceding every fragment payload.
///
/// Wire format (12 bytes, all fields little-endian, no padding):
/// ```ascii
/// 0: frame_id    (u32) - sender-assigned id of the frame this fragment belongs to
/// 4: frag_index  (u32) - position of this fragment within the frame, 0-based
/// 8: total_frags (u32) - number of fragments the frame was split into, >= 1
/// ```
///
/// `frag_index < total_frags` holds for every fragment a conforming sender
///  emits; an empty frame is still sent as one fragment with a zero-length
///  payload. Frame ids wrap around after `u32::MAX` frames - receivers treat
///  them as opaque keys, so wrap-around is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_id: u32,
    pub frag_index: u32,
    pub total_frags: u32,
}

impl FragmentHeader {
    pub fn new(frame_id: u32, frag_index: u32, total_frags: u32) -> FragmentHeader {
        FragmentHeader { frame_id, frag_index, total_frags }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.frame_id);
        buf.put_u32_le(self.frag_index);
        buf.put_u32_le(self.total_frags);
    }

    /// Returns `None` if fewer than [`HEADER_LEN`] bytes remain.
    pub fn deser(buf: &mut impl Buf) -> Option<FragmentHeader> {
        if buf.remaining() < HEADER_LEN {
            return None;
        }
        Some(FragmentHeader {
            frame_id: buf.get_u32_le(),
            frag_index: buf.get_u32_le(),
            total_frags: buf.get_u32_le(),
        })
    }

    /// The exact bytes that go on the wire ahead of the payload. This is what
    ///  the scatter/gather send path points its first iovec at.
    pub fn wire_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.frame_id.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.frag_index.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.total_frags.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::zero(FragmentHeader::new(0, 0, 1), vec![0,0,0,0, 0,0,0,0, 1,0,0,0])]
    #[case::small(FragmentHeader::new(1, 2, 3), vec![1,0,0,0, 2,0,0,0, 3,0,0,0])]
    #[case::little_endian(FragmentHeader::new(0x01020304, 0x0a0b0c0d, 0x11223344),
        vec![0x04,0x03,0x02,0x01, 0x0d,0x0c,0x0b,0x0a, 0x44,0x33,0x22,0x11])]
    #[case::max(FragmentHeader::new(u32::MAX, u32::MAX - 1, u32::MAX),
        vec![0xff,0xff,0xff,0xff, 0xfe,0xff,0xff,0xff, 0xff,0xff,0xff,0xff])]
    fn test_wire_layout(#[case] header: FragmentHeader, #[case] expected: Vec<u8>) {
        assert_eq!(expected.len(), HEADER_LEN);
        assert_eq!(header.wire_bytes().as_slice(), expected.as_slice());

        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[rstest]
    #[case::zero(FragmentHeader::new(0, 0, 1))]
    #[case::typical(FragmentHeader::new(100, 2, 3))]
    #[case::max(FragmentHeader::new(u32::MAX, u32::MAX - 1, u32::MAX))]
    fn test_roundtrip(#[case] header: FragmentHeader) {
        let bytes = header.wire_bytes();
        let mut buf = &bytes[..];
        assert_eq!(FragmentHeader::deser(&mut buf), Some(header));
        assert_eq!(buf.len(), 0);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one_short(HEADER_LEN - 1)]
    fn test_deser_too_short(#[case] len: usize) {
        let bytes = vec![0u8; len];
        assert_eq!(FragmentHeader::deser(&mut &bytes[..]), None);
    }

    #[test]
    fn test_deser_leaves_payload_in_buffer() {
        let mut bytes = FragmentHeader::new(7, 0, 1).wire_bytes().to_vec();
        bytes.extend_from_slice(b"payload");

        let mut buf = &bytes[..];
        let header = FragmentHeader::deser(&mut buf).unwrap();

        assert_eq!(header.frame_id, 7);
        assert_eq!(buf, b"payload");
    }
}
