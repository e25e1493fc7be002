//! Stream subscription registry.
//!
//! Tracks which station selectors a long-running collector is subscribed
//! to, along with the last sequence number and timestamp seen for each, so
//! a [`ReconnectingClient`](crate::ReconnectingClient) can persist and
//! resume progress across restarts the way `slinktool -i`'s state file
//! does. Station ids may carry `*`/`?`/`[...]` glob wildcards via
//! [`seedlink_protocol::globmatch`]; duplicate ids are allowed — the list
//! is not a set.
//!
//! Entries are kept in three ascending-lexicographic partitions: exact ids
//! first, then `?`-only wildcards, then anything containing `*`. This puts
//! the most specific subscriptions first so a lookup that wants "the most
//! precise match" can stop at the first hit. All-station mode is not a
//! separate flag — it is represented as the single synthetic entry
//! [`ALL_STATION_ID`] (`XX_UNI`), mutually exclusive with any other entry.

use std::path::Path;

use seedlink_protocol::{SequenceNumber, globmatch};

use crate::error::{ClientError, Result};

/// Synthetic station id representing an all-station ("uni-station")
/// subscription. A registry holds this entry, and only this entry, while
/// all-station mode is active.
pub const ALL_STATION_ID: &str = "XX_UNI";

/// One subscription: a station id (possibly wildcarded), its selector
/// string, and the last sequence/timestamp observed for resumption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// Station id, `NET_STA` form. May contain `*`/`?` wildcards, or be
    /// [`ALL_STATION_ID`] for the all-station entry.
    pub station_id: String,
    /// Space-separated stream-id selector expressions, if any were given.
    pub selectors: Option<String>,
    /// Last sequence number observed for this subscription.
    pub seqnum: SequenceNumber,
    /// ISO-8601 `Z` timestamp of the last observed packet, if any.
    pub timestamp: Option<String>,
}

fn partition_of(station_id: &str) -> u8 {
    if station_id.contains('*') {
        2
    } else if station_id.contains('?') {
        1
    } else {
        0
    }
}

/// Converts a legacy comma-delimited timestamp (`year,month,day,hour,min,sec`,
/// any trailing fields omitted) into ISO-8601 `Z` form. A value that is not
/// comma-delimited is assumed to already be ISO-8601 and is passed through,
/// truncated to the state-file format's 31-character limit.
fn normalize_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.contains(',') {
        return raw.chars().take(31).collect();
    }
    let mut fields = raw.split(',').map(str::trim);
    let year: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(1970);
    let month: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(1).max(1);
    let day: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(1).max(1);
    let hour: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let min: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let sec: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{min:02}:{sec:02}Z")
}

/// A partitioned, sorted list of station selectors and their resume state.
#[derive(Clone, Debug, Default)]
pub struct StreamRegistry {
    entries: Vec<SubscriptionRecord>,
}

impl StreamRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether this registry is in all-station mode.
    pub fn is_all_station(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].station_id == ALL_STATION_ID
    }

    fn insertion_index(&self, station_id: &str) -> usize {
        let target = partition_of(station_id);
        let mut idx = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            let p = partition_of(&entry.station_id);
            match p.cmp(&target) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Greater => {
                    idx = i;
                    break;
                }
                std::cmp::Ordering::Equal => {
                    if entry.station_id.as_str() > station_id {
                        idx = i;
                        break;
                    }
                }
            }
        }
        idx
    }

    /// Adds a subscription. Duplicate ids are allowed — this never
    /// deduplicates against an existing entry. Rejected while all-station
    /// mode is active, since the two modes are mutually exclusive.
    pub fn add(
        &mut self,
        station_id: &str,
        selectors: Option<&str>,
        seqnum: SequenceNumber,
        timestamp: Option<&str>,
    ) -> Result<()> {
        if self.is_all_station() {
            return Err(ClientError::UnexpectedResponse(
                "cannot add a per-station subscription while all-station mode is active".into(),
            ));
        }
        let record = SubscriptionRecord {
            station_id: station_id.to_owned(),
            selectors: selectors.map(str::to_owned),
            seqnum,
            timestamp: timestamp.map(normalize_timestamp),
        };
        let idx = self.insertion_index(station_id);
        self.entries.insert(idx, record);
        Ok(())
    }

    /// Replaces the registry with a single [`ALL_STATION_ID`] entry. Rejected
    /// if any non-all-station entry already exists.
    pub fn set_all_station(
        &mut self,
        selectors: Option<&str>,
        seqnum: SequenceNumber,
        timestamp: Option<&str>,
    ) -> Result<()> {
        if !self.entries.is_empty() && !self.is_all_station() {
            return Err(ClientError::UnexpectedResponse(
                "cannot enable all-station mode with existing per-station subscriptions".into(),
            ));
        }
        self.entries = vec![SubscriptionRecord {
            station_id: ALL_STATION_ID.to_owned(),
            selectors: selectors.map(str::to_owned),
            seqnum,
            timestamp: timestamp.map(normalize_timestamp),
        }];
        Ok(())
    }

    /// Records the sequence/timestamp observed for a concrete `station_id`
    /// against every matching subscription (glob-matched, not exact — a
    /// subscription on `IU_AN??` is updated by a packet from `IU_ANMO`). In
    /// all-station mode, updates the lone entry unconditionally. Returns the
    /// number of records updated.
    pub fn update(
        &mut self,
        station_id: &str,
        seqnum: SequenceNumber,
        timestamp: Option<&str>,
    ) -> usize {
        let ts = timestamp.map(normalize_timestamp);
        if self.is_all_station() {
            let record = &mut self.entries[0];
            record.seqnum = seqnum;
            if let Some(t) = &ts {
                record.timestamp = Some(t.clone());
            }
            return 1;
        }
        let mut count = 0;
        for record in &mut self.entries {
            if globmatch(station_id, &record.station_id) {
                record.seqnum = seqnum;
                if let Some(t) = &ts {
                    record.timestamp = Some(t.clone());
                }
                count += 1;
            }
        }
        count
    }

    /// Returns the recorded sequence number for an exact station id match.
    /// In all-station mode, any id returns the lone entry's sequence.
    pub fn sequence(&self, station_id: &str) -> Option<SequenceNumber> {
        if self.is_all_station() {
            return Some(self.entries[0].seqnum);
        }
        self.entries
            .iter()
            .find(|e| e.station_id == station_id)
            .map(|e| e.seqnum)
    }

    /// Returns true if `station_id` matches any registered selector.
    pub fn matches(&self, station_id: &str) -> bool {
        if self.is_all_station() {
            return true;
        }
        self.entries
            .iter()
            .any(|e| globmatch(station_id, &e.station_id))
    }

    /// Number of registered subscriptions (1 for an all-station registry).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no registered subscriptions at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates registered subscriptions in partition-then-lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionRecord> {
        self.entries.iter()
    }

    /// Serializes the registry to the `<station_id> <seqnum|-1> [<timestamp>]`
    /// state-file format, one entry per line, in registry order.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let seq = if entry.seqnum.is_special() {
                "-1".to_owned()
            } else {
                entry.seqnum.value().to_string()
            };
            match &entry.timestamp {
                Some(ts) => out.push_str(&format!("{} {} {}\n", entry.station_id, seq, ts)),
                None => out.push_str(&format!("{} {}\n", entry.station_id, seq)),
            }
        }
        out
    }

    /// Parses a state file previously produced by [`serialize`](Self::serialize).
    /// Blank lines and lines starting with `#` are ignored. Also accepts the
    /// legacy `<NET> <STA> <seq> [<ts>]` form, and converts comma-delimited
    /// legacy timestamps to ISO-8601 on read.
    pub fn deserialize(text: &str) -> Result<Self> {
        let mut registry = Self::new();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();

            let (station_id, seq_tok, ts_tok) = if parts.len() >= 2 && parts[1].parse::<i64>().is_ok() {
                (parts[0].to_owned(), Some(parts[1]), parts.get(2).copied())
            } else {
                let station = parts.get(1).ok_or_else(|| {
                    ClientError::UnexpectedResponse(format!(
                        "state file line {}: missing station",
                        lineno + 1
                    ))
                })?;
                (
                    format!("{}_{}", parts[0], station),
                    parts.get(2).copied(),
                    parts.get(3).copied(),
                )
            };

            let seqnum = match seq_tok {
                None | Some("-1") => SequenceNumber::UNSET,
                Some(raw) => {
                    let value = raw.parse::<u64>().map_err(|_| {
                        ClientError::UnexpectedResponse(format!(
                            "state file line {}: invalid sequence {raw:?}",
                            lineno + 1
                        ))
                    })?;
                    SequenceNumber::new(value)
                }
            };

            if station_id == ALL_STATION_ID {
                registry.set_all_station(None, seqnum, ts_tok)?;
            } else {
                registry.add(&station_id, None, seqnum, ts_tok)?;
            }
        }
        Ok(registry)
    }

    /// Builds a registry from a `slinktool`-style stream list: one
    /// subscription per line, `<station_id> [<selector>…]`, with `#`/`*`
    /// comment lines. The legacy `<NET> <STA> [<selectors>]` two-token form
    /// is accepted and rewritten as `NET_STA`. A line naming
    /// [`ALL_STATION_ID`] enables all-station mode.
    pub fn from_stream_list_string(text: &str) -> Result<Self> {
        let mut registry = Self::new();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('*') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let first = tokens[0];

            let (station_id, selectors) = if first.contains('_') || first == ALL_STATION_ID {
                let selectors = (tokens.len() > 1).then(|| tokens[1..].join(" "));
                (first.to_owned(), selectors)
            } else {
                let station = tokens.get(1).ok_or_else(|| {
                    ClientError::UnexpectedResponse(format!(
                        "stream list line {}: invalid entry (expected NET_STA or legacy NET STA): {line:?}",
                        lineno + 1
                    ))
                })?;
                let selectors = (tokens.len() > 2).then(|| tokens[2..].join(" "));
                (format!("{first}_{station}"), selectors)
            };

            if station_id == ALL_STATION_ID {
                registry.set_all_station(selectors.as_deref(), SequenceNumber::UNSET, None)?;
            } else {
                registry.add(&station_id, selectors.as_deref(), SequenceNumber::UNSET, None)?;
            }
        }
        Ok(registry)
    }

    /// Reads a stream list file and parses it via [`from_stream_list_string`](Self::from_stream_list_string).
    pub fn from_stream_list_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(ClientError::Io)?;
        Self::from_stream_list_string(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_match_exact() {
        let mut registry = StreamRegistry::new();
        registry.add("IU_ANMO", None, SequenceNumber::UNSET, None).unwrap();
        assert!(registry.matches("IU_ANMO"));
        assert!(!registry.matches("IU_COLA"));
    }

    #[test]
    fn glob_wildcard_matches() {
        let mut registry = StreamRegistry::new();
        registry.add("IU_AN??", None, SequenceNumber::UNSET, None).unwrap();
        assert!(registry.matches("IU_ANMO"));
        assert!(!registry.matches("IU_ANMOX"));
    }

    #[test]
    fn duplicate_ids_are_allowed() {
        let mut registry = StreamRegistry::new();
        registry.add("IU_ANMO", Some("BHZ"), SequenceNumber::UNSET, None).unwrap();
        registry.add("IU_ANMO", Some("BHN"), SequenceNumber::UNSET, None).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn partitioned_insertion_order() {
        let mut registry = StreamRegistry::new();
        registry.add("IU_A*", None, SequenceNumber::UNSET, None).unwrap();
        registry.add("IU_ANMO", None, SequenceNumber::UNSET, None).unwrap();
        registry.add("IU_AN??", None, SequenceNumber::UNSET, None).unwrap();
        registry.add("GE_WLF", None, SequenceNumber::UNSET, None).unwrap();
        let ids: Vec<&str> = registry.iter().map(|e| e.station_id.as_str()).collect();
        // exact ids first (lexicographic), then ?-only, then *-containing.
        assert_eq!(ids, vec!["GE_WLF", "IU_ANMO", "IU_AN??", "IU_A*"]);
    }

    #[test]
    fn all_station_matches_everything() {
        let mut registry = StreamRegistry::new();
        registry
            .set_all_station(None, SequenceNumber::UNSET, None)
            .unwrap();
        assert!(registry.matches("XX_ZZZZ"));
        assert!(registry.is_all_station());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn set_all_station_rejects_existing_entries() {
        let mut registry = StreamRegistry::new();
        registry.add("IU_ANMO", None, SequenceNumber::UNSET, None).unwrap();
        let err = registry
            .set_all_station(None, SequenceNumber::UNSET, None)
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }

    #[test]
    fn add_rejects_while_all_station() {
        let mut registry = StreamRegistry::new();
        registry
            .set_all_station(None, SequenceNumber::UNSET, None)
            .unwrap();
        let err = registry
            .add("IU_ANMO", None, SequenceNumber::UNSET, None)
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }

    #[test]
    fn update_glob_matches_all_matching_entries() {
        let mut registry = StreamRegistry::new();
        registry.add("IU_AN??", None, SequenceNumber::UNSET, None).unwrap();
        registry.add("IU_ANMO", None, SequenceNumber::UNSET, None).unwrap();
        registry.add("GE_WLF", None, SequenceNumber::UNSET, None).unwrap();

        let count = registry.update("IU_ANMO", SequenceNumber::new(42), None);
        assert_eq!(count, 2);
        assert_eq!(registry.sequence("IU_ANMO"), Some(SequenceNumber::new(42)));
        assert_eq!(registry.sequence("GE_WLF"), Some(SequenceNumber::UNSET));
    }

    #[test]
    fn update_all_station_is_unconditional() {
        let mut registry = StreamRegistry::new();
        registry
            .set_all_station(None, SequenceNumber::UNSET, None)
            .unwrap();
        let count = registry.update("ZZ_ZZZZ", SequenceNumber::new(7), Some("2024,3,1,0,0"));
        assert_eq!(count, 1);
        assert_eq!(registry.sequence("ANYTHING"), Some(SequenceNumber::new(7)));
    }

    #[test]
    fn timestamp_roundtrips_through_update() {
        let mut registry = StreamRegistry::new();
        registry.add("IU_ANMO", None, SequenceNumber::UNSET, None).unwrap();
        registry.update("IU_ANMO", SequenceNumber::new(1), Some("2024,3,1,10,30,0"));
        let entry = registry.iter().next().unwrap();
        assert_eq!(entry.timestamp.as_deref(), Some("2024-03-01T10:30:00Z"));
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let mut registry = StreamRegistry::new();
        registry.add("IU_ANMO", None, SequenceNumber::new(123), Some("2024-03-01T10:30:00Z")).unwrap();
        registry.add("GE_WLF", None, SequenceNumber::UNSET, None).unwrap();
        let text = registry.serialize();
        let restored = StreamRegistry::deserialize(&text).unwrap();
        assert_eq!(restored.sequence("IU_ANMO"), Some(SequenceNumber::new(123)));
        assert_eq!(restored.sequence("GE_WLF"), Some(SequenceNumber::UNSET));
        let entry = restored.iter().find(|e| e.station_id == "IU_ANMO").unwrap();
        assert_eq!(entry.timestamp.as_deref(), Some("2024-03-01T10:30:00Z"));
    }

    #[test]
    fn deserialize_accepts_legacy_two_token_form() {
        let text = "# comment\n\nIU ANMO 5 2024,1,10,0,0\n";
        let registry = StreamRegistry::deserialize(text).unwrap();
        let entry = registry.iter().next().unwrap();
        assert_eq!(entry.station_id, "IU_ANMO");
        assert_eq!(entry.seqnum, SequenceNumber::new(5));
        assert_eq!(entry.timestamp.as_deref(), Some("2024-01-10T00:00:00Z"));
    }

    #[test]
    fn deserialize_all_station_entry() {
        let registry = StreamRegistry::deserialize("XX_UNI -1\n").unwrap();
        assert!(registry.is_all_station());
    }

    #[test]
    fn deserialize_rejects_missing_station() {
        let err = StreamRegistry::deserialize("IU\n").unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }

    #[test]
    fn from_stream_list_string_parses_new_and_legacy_forms() {
        let registry =
            StreamRegistry::from_stream_list_string("IU_ANMO BHZ\nGE WLF BHZ BHN\n").unwrap();
        assert!(registry.matches("IU_ANMO"));
        assert!(registry.matches("GE_WLF"));
        let ge = registry.iter().find(|e| e.station_id == "GE_WLF").unwrap();
        assert_eq!(ge.selectors.as_deref(), Some("BHZ BHN"));
    }

    #[test]
    fn from_stream_list_string_xx_uni_sets_all_station() {
        let registry = StreamRegistry::from_stream_list_string("XX_UNI\n").unwrap();
        assert!(registry.is_all_station());
        assert!(registry.matches("ZZ_ZZZZ"));
    }

    #[test]
    fn from_stream_list_string_skips_comments() {
        let registry =
            StreamRegistry::from_stream_list_string("# comment\n* also comment\nIU_ANMO\n")
                .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn from_stream_list_string_rejects_bad_token() {
        let err = StreamRegistry::from_stream_list_string("NOTVALID").unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }
}
