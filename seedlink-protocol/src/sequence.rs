use crate::error::{Result, SeedlinkError};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Sentinel: sequence not set.
    pub const UNSET: Self = Self(u64::MAX);

    /// Sentinel: request all data (v4).
    pub const ALL_DATA: Self = Self(u64::MAX - 1);

    /// Maximum sequence value for v3 (6 hex digits).
    pub const V3_MAX: u64 = 0xFF_FFFF;

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns true if this is a special sentinel value (UNSET or ALL_DATA).
    pub fn is_special(self) -> bool {
        self == Self::UNSET || self == Self::ALL_DATA
    }

    /// Parse v3 hex representation (6 uppercase hex digits, e.g. "00001A").
    pub fn from_v3_hex(hex: &str) -> Result<Self> {
        if hex.len() != 6 {
            return Err(SeedlinkError::InvalidSequence(format!(
                "v3 hex must be 6 chars, got {} ({hex:?})",
                hex.len()
            )));
        }
        let value = u64::from_str_radix(hex, 16)
            .map_err(|_| SeedlinkError::InvalidSequence(format!("invalid v3 hex: {hex:?}")))?;
        Ok(Self(value))
    }

    /// Serialize to v3 hex (6 uppercase hex digits).
    pub fn to_v3_hex(self) -> String {
        format!("{:06X}", self.0)
    }

    /// Parse v4 decimal string (e.g. "26").
    pub fn from_v4_decimal(s: &str) -> Result<Self> {
        let value: u64 = s
            .parse()
            .map_err(|_| SeedlinkError::InvalidSequence(format!("invalid v4 decimal: {s:?}")))?;
        Ok(Self(value))
    }

    /// Serialize to v4 decimal string.
    pub fn to_v4_decimal(self) -> String {
        self.0.to_string()
    }

    /// Parse from v4 little-endian bytes (frame header).
    pub fn from_v4_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Serialize to v4 little-endian bytes (frame header).
    pub fn to_v4_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::UNSET {
            write!(f, "UNSET")
        } else if *self == Self::ALL_DATA {
            write!(f, "ALL_DATA")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
