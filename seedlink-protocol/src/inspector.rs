//! Record inspector: determines a miniSEED v2/v3 record's total length and
//! extracts its FDSN station id and start time from a possibly-incomplete
//! prefix of the record.
//!
//! The v3 framer invokes this once at least 64 bytes are buffered for a
//! `v3` data frame whose length wasn't declared on the wire.

use crate::error::{Result, SeedlinkError};
use crate::time::doy2md;

pub const MIN_INSPECT_LEN: usize = 64;

/// Sanity bound on a scanned-for miniSEED v2 record length. Real record
/// lengths are powers of two up to a few KiB; this just keeps the
/// header-sync fallback from scanning forever on a corrupt stream.
const MAX_V2_RECORD_LEN: usize = 1 << 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordFormat {
    MiniSeed2,
    MiniSeed3,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordInfo {
    pub format: RecordFormat,
    pub length: usize,
    /// `NET_STA`, when extractable from the bytes seen so far.
    pub station_id: Option<String>,
    /// ISO-8601 start time, when extractable from the bytes seen so far.
    pub start_time: Option<String>,
}

/// Outcome of one inspection pass: either a definitive length (and whatever
/// metadata could be read alongside it), or a request for more bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InspectOutcome {
    Detected(RecordInfo),
    NeedMoreData,
}

/// Inspect a buffered prefix of a record. `buf` must be at least
/// [`MIN_INSPECT_LEN`] bytes; shorter buffers are a caller error (the framer
/// is responsible for buffering up to the threshold first).
pub fn inspect(buf: &[u8]) -> Result<InspectOutcome> {
    if buf.len() < MIN_INSPECT_LEN {
        return Err(SeedlinkError::FrameTooShort {
            expected: MIN_INSPECT_LEN,
            actual: buf.len(),
        });
    }

    if buf[0] == b'M' && buf[1] == b'S' && buf[2] == 3 {
        inspect_v3(buf)
    } else if buf[0..6].iter().all(u8::is_ascii_digit) {
        inspect_v2(buf)
    } else {
        Err(SeedlinkError::InvalidResponse(
            "buffer is neither a miniSEED 2 nor miniSEED 3 record".into(),
        ))
    }
}

// ---- miniSEED 3 --------------------------------------------------------

const FSDH_LEN: usize = 40;

fn inspect_v3(buf: &[u8]) -> Result<InspectOutcome> {
    let sid_length = buf[33] as usize;
    let extra_length = u16::from_le_bytes([buf[34], buf[35]]) as usize;
    let payload_length = u32::from_le_bytes([buf[36], buf[37], buf[38], buf[39]]) as usize;
    let length = FSDH_LEN + sid_length + extra_length + payload_length;

    let year = u16::from_le_bytes([buf[8], buf[9]]);
    let doy = u16::from_le_bytes([buf[10], buf[11]]);
    let hour = buf[12];
    let minute = buf[13];
    let second = buf[14];

    let start_time = doy2md(year as i64, doy as u32)
        .ok()
        .map(|(month, mday)| {
            format!("{year:04}-{month:02}-{mday:02}T{hour:02}:{minute:02}:{second:02}Z")
        });

    let station_id = if buf.len() >= FSDH_LEN + sid_length {
        std::str::from_utf8(&buf[FSDH_LEN..FSDH_LEN + sid_length])
            .ok()
            .and_then(extract_fdsn_station)
    } else {
        None
    };

    Ok(InspectOutcome::Detected(RecordInfo {
        format: RecordFormat::MiniSeed3,
        length,
        station_id,
        start_time,
    }))
}

/// `bytes between the FDSN: prefix and the second '_'`, clamped to the
/// 22-byte station-id buffer (the resolved reading of the `FDSN:` URN's
/// `NET_STA` prefix, not including the literal `FDSN:` text).
fn extract_fdsn_station(source_id: &str) -> Option<String> {
    let rest = source_id.strip_prefix("FDSN:")?;
    let first_us = rest.find('_')?;
    let second_us = rest[first_us + 1..].find('_')? + first_us + 1;
    let station = &rest[..second_us];
    Some(station.chars().take(22).collect())
}

// ---- miniSEED 2 ---------------------------------------------------------

fn read_u16(buf: &[u8], offset: usize, swapped: bool) -> u16 {
    let raw = [buf[offset], buf[offset + 1]];
    if swapped {
        u16::from_le_bytes(raw)
    } else {
        u16::from_be_bytes(raw)
    }
}

fn decode_ascii_field(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf).trim().to_owned()
}

fn inspect_v2(buf: &[u8]) -> Result<InspectOutcome> {
    let quality = buf[6];
    if !matches!(quality, b'D' | b'R' | b'Q' | b'M') {
        return Err(SeedlinkError::InvalidResponse(format!(
            "invalid miniSEED v2 quality indicator: {:?}",
            quality as char
        )));
    }

    let station = decode_ascii_field(&buf[8..13]);
    let location = decode_ascii_field(&buf[13..15]);
    let channel = decode_ascii_field(&buf[15..18]);
    let network = decode_ascii_field(&buf[18..20]);

    let year_be = u16::from_be_bytes([buf[20], buf[21]]);
    let (year, swapped) = if (1900..=2100).contains(&year_be) {
        (year_be, false)
    } else {
        let year_le = u16::from_le_bytes([buf[20], buf[21]]);
        if (1900..=2100).contains(&year_le) {
            (year_le, true)
        } else {
            return Err(SeedlinkError::InvalidResponse(format!(
                "miniSEED v2 year out of range even after byte swap: {year_be}"
            )));
        }
    };

    let doy = read_u16(buf, 22, swapped);
    if !(1..=366).contains(&doy) {
        return Err(SeedlinkError::InvalidResponse(format!(
            "miniSEED v2 day-of-year out of range: {doy}"
        )));
    }
    let hour = buf[24];
    let minute = buf[25];
    let second = buf[26];
    if hour > 23 || minute > 59 || second > 59 {
        return Err(SeedlinkError::InvalidResponse(
            "miniSEED v2 time-of-day out of range".into(),
        ));
    }

    let length = match scan_blockette_1000(buf, swapped)? {
        Some(len) => len,
        None => match sync_scan(buf)? {
            Some(len) => len,
            None => return Ok(InspectOutcome::NeedMoreData),
        },
    };

    let (month, mday) = doy2md(year as i64, doy as u32)?;
    let start_time = Some(format!(
        "{year:04}-{month:02}-{mday:02}T{hour:02}:{minute:02}:{second:02}Z"
    ));

    let station_id = if network.is_empty() && station.is_empty() {
        None
    } else {
        Some(format!("{network}_{station}"))
    };
    let _ = (location, channel); // retained for future selector matching, not part of station_id

    Ok(InspectOutcome::Detected(RecordInfo {
        format: RecordFormat::MiniSeed2,
        length,
        station_id,
        start_time,
    }))
}

/// Walk the blockette chain from the header-declared first-blockette offset
/// looking for type 1000 (Data Only SEED). Returns `Ok(None)` if the chain
/// is exhausted (or runs past the buffered prefix) without finding one.
fn scan_blockette_1000(buf: &[u8], swapped: bool) -> Result<Option<usize>> {
    let mut offset = read_u16(buf, 46, swapped) as usize;
    let mut steps = 0;
    while offset != 0 {
        steps += 1;
        if steps > 64 {
            return Err(SeedlinkError::InvalidResponse(
                "miniSEED v2 blockette chain did not terminate".into(),
            ));
        }
        if offset + 4 > buf.len() {
            // Not enough buffered yet to read this blockette's header.
            return Ok(None);
        }
        let blockette_type = read_u16(buf, offset, swapped);
        let next_offset = read_u16(buf, offset + 2, swapped) as usize;
        if next_offset != 0 && next_offset <= offset {
            return Err(SeedlinkError::InvalidResponse(
                "miniSEED v2 blockette chain offset did not increase".into(),
            ));
        }
        if blockette_type == 1000 {
            if offset + 7 > buf.len() {
                return Ok(None);
            }
            let reclen_field = buf[offset + 6];
            return Ok(Some(1usize << reclen_field));
        }
        offset = next_offset;
    }
    Ok(None)
}

/// Fallback when no blockette 1000 is found: scan 64-byte-aligned offsets
/// for the next record's header sync pattern (6 ASCII digits + a valid
/// quality indicator).
fn sync_scan(buf: &[u8]) -> Result<Option<usize>> {
    let mut offset = MIN_INSPECT_LEN;
    while offset + 7 <= buf.len() {
        if offset > MAX_V2_RECORD_LEN {
            return Err(SeedlinkError::InvalidResponse(
                "miniSEED v2 record exceeds maximum scanned length".into(),
            ));
        }
        let candidate = &buf[offset..offset + 7];
        if candidate[0..6].iter().all(u8::is_ascii_digit)
            && matches!(candidate[6], b'D' | b'R' | b'Q' | b'M')
        {
            return Ok(Some(offset));
        }
        offset += 64;
    }
    if offset > MAX_V2_RECORD_LEN {
        return Err(SeedlinkError::InvalidResponse(
            "miniSEED v2 record exceeds maximum scanned length".into(),
        ));
    }
    Ok(None)
}
