//! The wire segment: a fixed 6-byte header plus an optional payload.
//!
//! ```text
//! byte 0..1 : seq_num (uint16, big-endian)
//! byte 2    : zero-padding (must be 0)
//! byte 3    : flags (bits 7..3 = 0; bit 2 = ACK; bit 1 = SYN; bit 0 = FIN)
//! byte 4..5 : CRC-16 checksum (big-endian)
//! byte 6..  : payload
//! ```

use bytes::{BufMut, BytesMut};

use crate::crc16;
use crate::error::{Result, UrpError};

pub const HEADER_LEN: usize = 6;

/// A segment carries exactly one of these flags, or none (a DATA segment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Data,
    Ack,
    Syn,
    Fin,
}

impl Kind {
    fn from_flags(flags: u8) -> Result<Self> {
        match flags & 0b111 {
            0b000 => Ok(Kind::Data),
            0b100 => Ok(Kind::Ack),
            0b010 => Ok(Kind::Syn),
            0b001 => Ok(Kind::Fin),
            _ => Err(UrpError::InvalidSegment {
                reason: "more than one of ACK/SYN/FIN set",
            }),
        }
    }

    fn to_flags(self) -> u8 {
        match self {
            Kind::Data => 0b000,
            Kind::Ack => 0b100,
            Kind::Syn => 0b010,
            Kind::Fin => 0b001,
        }
    }

    /// Four-character label used in the wire-event log (§6 log line format).
    pub fn label(self) -> &'static str {
        match self {
            Kind::Data => "DATA",
            Kind::Ack => "ACK",
            Kind::Syn => "SYN",
            Kind::Fin => "FIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seq_num: u16,
    pub kind: Kind,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn data(seq_num: u16, data: Vec<u8>) -> Self {
        Segment {
            seq_num,
            kind: Kind::Data,
            data,
        }
    }

    pub fn ack(seq_num: u16) -> Self {
        Segment {
            seq_num,
            kind: Kind::Ack,
            data: Vec::new(),
        }
    }

    pub fn syn(seq_num: u16) -> Self {
        Segment {
            seq_num,
            kind: Kind::Syn,
            data: Vec::new(),
        }
    }

    pub fn fin(seq_num: u16) -> Self {
        Segment {
            seq_num,
            kind: Kind::Fin,
            data: Vec::new(),
        }
    }

    /// The first sequence number past this segment's payload:
    /// `(seq_num + len(payload)) mod 2^16`.
    pub fn end_seq_num(&self) -> u16 {
        crate::seq::wrap_add(self.seq_num, self.data.len() as u16)
    }

    /// Packs header (checksum field zeroed, CRC computed over the full
    /// buffer, then spliced back in) plus payload into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.data.len());
        buf.put_u16(self.seq_num);
        buf.put_u8(0); // padding
        buf.put_u8(self.kind.to_flags());
        buf.put_u16(0); // checksum placeholder
        buf.put_slice(&self.data);

        let checksum = crc16::compute(&buf)?;
        buf[4..6].copy_from_slice(&checksum.to_be_bytes());

        Ok(buf.to_vec())
    }

    /// Decodes a wire buffer. Returns `(None, corrupted=true)` if the header
    /// itself fails to parse (bad padding, bad flags). Otherwise returns the
    /// segment together with `payload_intact`: `false` means the header
    /// parsed but the CRC check failed, in which case the payload MUST NOT
    /// be trusted by the caller (it is still returned so callers can log it).
    ///
    /// Fails with [`UrpError::InvalidSegment`] if `buf` is shorter than
    /// [`HEADER_LEN`].
    pub fn decode(buf: &[u8]) -> Result<(Option<Segment>, bool)> {
        if buf.len() < HEADER_LEN {
            return Err(UrpError::InvalidSegment {
                reason: "buffer shorter than the 6-byte header",
            });
        }

        let seq_num = u16::from_be_bytes([buf[0], buf[1]]);
        let padding = buf[2];
        let flags = buf[3];
        let checksum = u16::from_be_bytes([buf[4], buf[5]]);

        if padding != 0 || flags & 0b1111_1000 != 0 {
            return Ok((None, false));
        }

        let kind = match Kind::from_flags(flags) {
            Ok(kind) => kind,
            Err(_) => return Ok((None, false)),
        };

        let mut zeroed = buf.to_vec();
        zeroed[4] = 0;
        zeroed[5] = 0;
        let payload_intact = crc16::verify(&zeroed, checksum)?;

        let segment = Segment {
            seq_num,
            kind,
            data: buf[HEADER_LEN..].to_vec(),
        };

        Ok((Some(segment), payload_intact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_visible_fields() {
        let seg = Segment::data(1234, b"the big brown fox".to_vec());
        let encoded = seg.encode().unwrap();
        let (decoded, intact) = Segment::decode(&encoded).unwrap();
        assert!(intact);
        assert_eq!(decoded.unwrap(), seg);
    }

    #[test]
    fn control_segments_round_trip_with_empty_payload() {
        for seg in [Segment::syn(7), Segment::ack(8), Segment::fin(9)] {
            let encoded = seg.encode().unwrap();
            let (decoded, intact) = Segment::decode(&encoded).unwrap();
            assert!(intact);
            assert_eq!(decoded.unwrap(), seg);
        }
    }

    #[test]
    fn bit_flip_in_payload_is_detected_but_header_still_parses() {
        let seg = Segment::data(1, b"payload bytes".to_vec());
        let mut encoded = seg.encode().unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let (decoded, intact) = Segment::decode(&encoded).unwrap();
        assert!(!intact);
        assert!(decoded.is_some(), "header should still parse");
    }

    #[test]
    fn bad_padding_is_header_corruption() {
        let seg = Segment::data(1, b"x".to_vec());
        let mut encoded = seg.encode().unwrap();
        encoded[2] = 1;

        let (decoded, intact) = Segment::decode(&encoded).unwrap();
        assert!(decoded.is_none());
        assert!(!intact);
    }

    #[test]
    fn multiple_flags_set_is_header_corruption() {
        let mut encoded = Segment::ack(1).encode().unwrap();
        encoded[3] |= 0b010; // also set SYN

        let mut zeroed = encoded.clone();
        zeroed[4] = 0;
        zeroed[5] = 0;
        let checksum = crc16::compute(&zeroed).unwrap();
        encoded[4..6].copy_from_slice(&checksum.to_be_bytes());

        let (decoded, intact) = Segment::decode(&encoded).unwrap();
        assert!(decoded.is_none());
        assert!(!intact);
    }

    #[test]
    fn too_short_buffer_is_an_error() {
        assert!(Segment::decode(&[0u8; 5]).is_err());
    }

    #[test]
    fn end_seq_num_wraps() {
        let seg = Segment::data(65530, vec![0u8; 10]);
        assert_eq!(seg.end_seq_num(), 4);
    }
}
