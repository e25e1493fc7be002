use crate::error::{Result, SeedlinkError};
use crate::frame::RawFrame;
use crate::sequence::SequenceNumber;

pub const HEADER_LEN: usize = 8;
pub const DATA_SIGNATURE: &[u8; 2] = b"SL";
pub const INFO_SIGNATURE: &[u8; 6] = b"SLINFO";

/// Conventional miniSEED2 / INFO-chunk record size. Real v3 data records
/// carry their true length in a blockette 1000 (see `inspector.rs`); this
/// constant is only the legacy fixed-size convenience used by `write`/
/// `parse` below and by INFO chunking, which always sends fixed-size
/// records regardless of the XML/JSON content's own length.
pub const PAYLOAD_LEN: usize = 512;
pub const FRAME_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

/// What an 8-byte v3 header declares about the frame that follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum V3Header {
    /// `SL` + 6-hex-digit sequence. Payload length is not carried in the
    /// header; the framer must detect it (see `inspector.rs`).
    Data { sequence: SequenceNumber },
    /// `SLINFO` + `' '` + terminal flag. INFO chunks are always
    /// [`PAYLOAD_LEN`] bytes by convention, so their length never needs
    /// detection.
    Info { terminal: bool },
}

/// Parse the 8-byte v3 frame header (signature + sequence, or the `SLINFO`
/// variant). Does not touch any payload bytes.
pub fn parse_header(header: &[u8]) -> Result<V3Header> {
    if header.len() < HEADER_LEN {
        return Err(SeedlinkError::FrameTooShort {
            expected: HEADER_LEN,
            actual: header.len(),
        });
    }

    if &header[0..6] == INFO_SIGNATURE.as_slice() {
        // byte 6 is a literal separator space; byte 7 is the flag: '*' for
        // an unterminated (more-to-come) chunk, anything else terminates.
        let terminal = header[7] != b'*';
        return Ok(V3Header::Info { terminal });
    }

    if &header[0..2] == DATA_SIGNATURE.as_slice() {
        let hex_str = std::str::from_utf8(&header[2..8])
            .map_err(|_| SeedlinkError::InvalidSequence("sequence bytes are not valid UTF-8".into()))?;
        let sequence = SequenceNumber::from_v3_hex(hex_str)?;
        return Ok(V3Header::Data { sequence });
    }

    Err(SeedlinkError::InvalidSignature {
        expected: "SL",
        actual: [header[0], header[1]],
    })
}

/// Parse a complete, fixed-size (`PAYLOAD_LEN`-byte payload) v3 data frame.
///
/// This is the legacy convenience for the common case; the incremental
/// framer (driven by `parse_header` + the record inspector) is what handles
/// genuinely variable-length v3 data records on the wire.
pub fn parse(data: &[u8]) -> Result<RawFrame<'_>> {
    if data.len() < FRAME_LEN {
        return Err(SeedlinkError::FrameTooShort {
            expected: FRAME_LEN,
            actual: data.len(),
        });
    }

    match parse_header(&data[0..HEADER_LEN])? {
        V3Header::Data { sequence } => {
            let payload = &data[HEADER_LEN..FRAME_LEN];
            Ok(RawFrame::V3 { sequence, payload })
        }
        V3Header::Info { .. } => Err(SeedlinkError::InvalidSignature {
            expected: "SL",
            actual: [data[0], data[1]],
        }),
    }
}

/// Write a v3 data frame. `payload` is typically [`PAYLOAD_LEN`] bytes
/// (the conventional fixed record size) but any length is accepted, since
/// real server-declared record lengths vary (see `inspector.rs`).
pub fn write(sequence: SequenceNumber, payload: &[u8]) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(DATA_SIGNATURE);
    frame.extend_from_slice(sequence.to_v3_hex().as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write a v3 INFO chunk. `payload` must be exactly [`PAYLOAD_LEN`] bytes
/// (callers pad/truncate the XML/JSON body to the conventional record
/// size, matching how INFO responses are chunked on the wire).
pub fn write_info(payload: &[u8], terminal: bool) -> Result<Vec<u8>> {
    if payload.len() != PAYLOAD_LEN {
        return Err(SeedlinkError::PayloadLengthMismatch {
            expected: PAYLOAD_LEN,
            actual: payload.len(),
        });
    }
    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.extend_from_slice(INFO_SIGNATURE);
    frame.push(b' ');
    frame.push(if terminal { b' ' } else { b'*' });
    frame.extend_from_slice(payload);
    Ok(frame)
}
