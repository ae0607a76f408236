//! Message frame codec
//!
//! Frames travel inside the authenticated payload of Message packets. The
//! header is 48 bytes, little-endian:
//!
//! ```text
//! [0..4]    block id being sent (0 if none)
//! [4..8]    block id being acknowledged (0 if none)
//! [8..16]   bytes acknowledged in the first range (cumulative from offset 0)
//! [16..20]  gap before the second range
//! [20..38]  nine u16s: range₂, gap₂, …, gap₅, range₆
//! [38..40]  EOF flags (bits 11/12) | data length (0..1024)
//! [40..48]  stream offset of the data
//! [48..]    zero padding, then data right-aligned at the end
//! ```
//!
//! Total frame length is the smallest multiple of 16 that holds the header
//! plus the data, capped at 1088 bytes.

use bytes::Bytes;
use smallvec::SmallVec;
use thiserror::Error;

/// Frame header size
pub const FRAME_HEADER_LEN: usize = 48;
/// Largest frame that fits a Message packet
pub const FRAME_MAX_LEN: usize = 1088;
/// Largest data payload of a single block
pub const BLOCK_DATA_MAX: usize = 1024;
/// Stream size ceiling: offsets beyond 2^60 are a protocol violation
pub const STREAM_CEILING: u64 = 1 << 60;
/// Maximum number of selective-ACK ranges per frame
pub const ACK_RANGES_MAX: usize = 6;

const EOF_SUCCESS_BIT: u16 = 0x0800;
const EOF_FAILURE_BIT: u16 = 0x1000;
const DATA_LEN_MASK: u16 = 0x07FF;

/// Frame codec errors; a bad frame means "drop the datagram".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame shorter than header")]
    TooShort,

    #[error("frame length not a multiple of 16 or above the cap")]
    BadLength,

    #[error("data length field inconsistent with frame length")]
    BadDataLength,

    #[error("stream offset beyond the 2^60 ceiling")]
    BeyondCeiling,
}

/// End-of-stream marker carried by the final block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eof {
    None,
    Success,
    Failure,
}

/// An absolute acknowledged byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRange {
    pub start: u64,
    pub end: u64,
}

/// List of acknowledged ranges, first range always anchored at offset 0.
pub type AckRanges = SmallVec<[AckRange; ACK_RANGES_MAX]>;

/// A decoded message frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: u32,
    pub ack_id: u32,
    pub acks: AckRanges,
    pub eof: Eof,
    pub offset: u64,
    pub data: Bytes,
}

impl Frame {
    /// A pure acknowledgement (no block attached).
    #[must_use]
    pub fn ack_only(ack_id: u32, acks: AckRanges) -> Self {
        Self {
            id: 0,
            ack_id,
            acks,
            eof: Eof::None,
            offset: 0,
            data: Bytes::new(),
        }
    }

    /// True when the frame carries a block the peer must acknowledge.
    #[must_use]
    pub fn carries_block(&self) -> bool {
        self.id != 0 && (!self.data.is_empty() || self.eof != Eof::None)
    }

    /// Total wire length of the encoded frame.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        let raw = FRAME_HEADER_LEN + self.data.len();
        (raw + 15) & !15
    }

    /// Encode into a 16-byte aligned frame, data right-aligned.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        debug_assert!(self.data.len() <= BLOCK_DATA_MAX);
        let total = self.wire_len();
        let mut out = vec![0u8; total];

        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&self.ack_id.to_le_bytes());
        encode_acks(&self.acks, &mut out[8..38]);

        let mut field = self.data.len() as u16 & DATA_LEN_MASK;
        match self.eof {
            Eof::None => {}
            Eof::Success => field |= EOF_SUCCESS_BIT,
            Eof::Failure => field |= EOF_FAILURE_BIT,
        }
        out[38..40].copy_from_slice(&field.to_le_bytes());
        out[40..48].copy_from_slice(&self.offset.to_le_bytes());

        let data_at = total - self.data.len();
        out[data_at..].copy_from_slice(&self.data);
        Bytes::from(out)
    }

    /// Decode a frame from the opened payload of a Message packet.
    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        if src.len() < FRAME_HEADER_LEN {
            return Err(FrameError::TooShort);
        }
        if src.len() % 16 != 0 || src.len() > FRAME_MAX_LEN {
            return Err(FrameError::BadLength);
        }

        let id = u32::from_le_bytes(src[0..4].try_into().unwrap());
        let ack_id = u32::from_le_bytes(src[4..8].try_into().unwrap());
        let acks = decode_acks(&src[8..38]);

        let field = u16::from_le_bytes(src[38..40].try_into().unwrap());
        let len = usize::from(field & DATA_LEN_MASK);
        let eof = if field & EOF_FAILURE_BIT != 0 {
            Eof::Failure
        } else if field & EOF_SUCCESS_BIT != 0 {
            Eof::Success
        } else {
            Eof::None
        };

        if len > BLOCK_DATA_MAX || FRAME_HEADER_LEN + len > src.len() {
            return Err(FrameError::BadDataLength);
        }

        let offset = u64::from_le_bytes(src[40..48].try_into().unwrap());
        if offset.saturating_add(len as u64) > STREAM_CEILING {
            return Err(FrameError::BeyondCeiling);
        }

        let data = Bytes::copy_from_slice(&src[src.len() - len..]);
        Ok(Self {
            id,
            ack_id,
            acks,
            eof,
            offset,
            data,
        })
    }
}

// Wire slots of the ACK set: one u64, one u32, then nine u16s, alternating
// range and gap lengths starting at offset 0.
const ACK_SLOT_MAX: [u64; 11] = [
    u64::MAX,
    u32::MAX as u64,
    u16::MAX as u64,
    u16::MAX as u64,
    u16::MAX as u64,
    u16::MAX as u64,
    u16::MAX as u64,
    u16::MAX as u64,
    u16::MAX as u64,
    u16::MAX as u64,
    u16::MAX as u64,
];

fn write_ack_slot(dst: &mut [u8], slot: usize, value: u64) {
    match slot {
        0 => dst[0..8].copy_from_slice(&value.to_le_bytes()),
        1 => dst[8..12].copy_from_slice(&(value as u32).to_le_bytes()),
        n => {
            let at = 12 + (n - 2) * 2;
            dst[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes());
        }
    }
}

fn read_ack_slot(src: &[u8], slot: usize) -> u64 {
    match slot {
        0 => u64::from_le_bytes(src[0..8].try_into().unwrap()),
        1 => u64::from(u32::from_le_bytes(src[8..12].try_into().unwrap())),
        n => {
            let at = 12 + (n - 2) * 2;
            u64::from(u16::from_le_bytes(src[at..at + 2].try_into().unwrap()))
        }
    }
}

/// Serialize sorted, disjoint ranges into the alternating range/gap slots.
/// A range set that does not fit the slot widths is truncated; the dropped
/// tail is re-acknowledged by a later frame.
fn encode_acks(acks: &AckRanges, dst: &mut [u8]) {
    let mut pos = 0u64;
    let mut slot = 0usize;
    for range in acks {
        if range.start < pos || range.end <= range.start {
            continue;
        }
        let gap = range.start - pos;
        if slot == 0 && gap == 0 {
            // First range is anchored at 0 and goes straight into slot 0.
        } else {
            if slot == 0 {
                // Nothing contiguous from 0: slot 0 stays an empty range.
                slot = 1;
            }
            if slot >= ACK_SLOT_MAX.len() || gap > ACK_SLOT_MAX[slot] {
                break;
            }
            write_ack_slot(dst, slot, gap);
            slot += 1;
            pos += gap;
        }
        let len = range.end - range.start;
        if slot >= ACK_SLOT_MAX.len() || len > ACK_SLOT_MAX[slot] {
            break;
        }
        write_ack_slot(dst, slot, len);
        pos += len;
        slot += 1;
    }
}

fn decode_acks(src: &[u8]) -> AckRanges {
    let mut acks = AckRanges::new();
    let mut pos = 0u64;
    for slot in 0..ACK_SLOT_MAX.len() {
        let value = read_ack_slot(src, slot);
        if slot % 2 == 0 {
            // range slot
            if value > 0 {
                acks.push(AckRange {
                    start: pos,
                    end: pos + value,
                });
                pos += value;
            }
        } else {
            // gap slot
            pos += value;
        }
    }
    acks
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn ack_only_frame_is_header_sized() {
        let frame = Frame::ack_only(9, smallvec![AckRange { start: 0, end: 512 }]);
        let wire = frame.encode();
        assert_eq!(wire.len(), FRAME_HEADER_LEN);

        let decoded = Frame::decode(&wire).unwrap();
        assert_eq!(decoded.id, 0);
        assert_eq!(decoded.ack_id, 9);
        assert_eq!(decoded.acks.as_slice(), &[AckRange { start: 0, end: 512 }]);
        assert!(!decoded.carries_block());
    }

    #[test]
    fn data_frame_round_trip() {
        let frame = Frame {
            id: 3,
            ack_id: 0,
            acks: AckRanges::new(),
            eof: Eof::None,
            offset: 2048,
            data: Bytes::from(vec![0x68u8; 100]),
        };
        let wire = frame.encode();
        // 48 + 100 = 148 → padded to 160
        assert_eq!(wire.len(), 160);

        let decoded = Frame::decode(&wire).unwrap();
        assert_eq!(decoded.id, 3);
        assert_eq!(decoded.offset, 2048);
        assert_eq!(decoded.data.len(), 100);
        assert!(decoded.data.iter().all(|&b| b == 0x68));
    }

    #[test]
    fn full_block_fills_the_cap() {
        let frame = Frame {
            id: 1,
            ack_id: 0,
            acks: AckRanges::new(),
            eof: Eof::None,
            offset: 0,
            data: Bytes::from(vec![1u8; BLOCK_DATA_MAX]),
        };
        let wire = frame.encode();
        assert_eq!(wire.len(), FRAME_MAX_LEN);
        assert_eq!(Frame::decode(&wire).unwrap().data.len(), BLOCK_DATA_MAX);
    }

    #[test]
    fn eof_flags_round_trip() {
        for eof in [Eof::Success, Eof::Failure] {
            let frame = Frame {
                id: 5,
                ack_id: 0,
                acks: AckRanges::new(),
                eof,
                offset: 64,
                data: Bytes::new(),
            };
            let decoded = Frame::decode(&frame.encode()).unwrap();
            assert_eq!(decoded.eof, eof);
            assert!(decoded.carries_block());
        }
    }

    #[test]
    fn multi_range_acks_round_trip() {
        let acks: AckRanges = smallvec![
            AckRange { start: 0, end: 1024 },
            AckRange {
                start: 2048,
                end: 3072
            },
            AckRange {
                start: 4096,
                end: 4608
            },
        ];
        let frame = Frame::ack_only(7, acks.clone());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.acks.as_slice(), acks.as_slice());
    }

    #[test]
    fn acks_not_anchored_at_zero() {
        let acks: AckRanges = smallvec![AckRange {
            start: 512,
            end: 1024
        }];
        let frame = Frame::ack_only(1, acks.clone());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.acks.as_slice(), acks.as_slice());
    }

    #[test]
    fn six_ranges_is_the_wire_limit() {
        let mut acks = AckRanges::new();
        for i in 0..6u64 {
            acks.push(AckRange {
                start: i * 200,
                end: i * 200 + 100,
            });
        }
        let decoded = Frame::decode(&Frame::ack_only(1, acks.clone()).encode()).unwrap();
        assert_eq!(decoded.acks.len(), 6);
        assert_eq!(decoded.acks.as_slice(), acks.as_slice());
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_eq!(Frame::decode(&[0u8; 32]), Err(FrameError::TooShort));
        assert_eq!(Frame::decode(&[0u8; 50]), Err(FrameError::BadLength));
        assert_eq!(
            Frame::decode(&[0u8; FRAME_MAX_LEN + 16]),
            Err(FrameError::BadLength)
        );

        // Data length larger than the frame can hold
        let mut wire = vec![0u8; 64];
        wire[38..40].copy_from_slice(&100u16.to_le_bytes());
        assert_eq!(Frame::decode(&wire), Err(FrameError::BadDataLength));

        // Offset beyond the stream ceiling
        let mut wire = vec![0u8; 64];
        wire[38..40].copy_from_slice(&16u16.to_le_bytes());
        wire[40..48].copy_from_slice(&STREAM_CEILING.to_le_bytes());
        assert_eq!(Frame::decode(&wire), Err(FrameError::BeyondCeiling));
    }
}
