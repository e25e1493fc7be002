use std::sync::Arc;
use std::time::Duration;

use seedlink_protocol::{PayloadFormat, PayloadSubformat, RawFrame, SequenceNumber};

/// Supplies credentials for SeedLink servers that require `AUTH`/`USERAUTH`
/// before HELLO (v4 EXTREPLY-gated deployments).
///
/// Implementations typically look up a token by server address; `auth_finish`
/// is called after a successful negotiation so stateful providers (e.g. one
/// that rotates a nonce) can advance.
pub trait AuthProvider: Send + Sync {
    /// Returns the credential value to send for `server` (e.g. a bearer token).
    fn auth_value(&self, server: &str) -> String;
    /// Called once negotiation against `server` has completed successfully.
    fn auth_finish(&self, server: &str) {
        let _ = server;
    }
}

/// Client connection state machine.
///
/// Transitions: `Disconnected` → `Connected` → `Configured` → `Streaming` → `Disconnected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected to any server.
    Disconnected,
    /// TCP connected and HELLO exchanged; ready for STATION/SELECT.
    Connected,
    /// At least one STATION/DATA configured; ready for END or FETCH.
    Configured,
    /// Binary frame streaming active after END or FETCH.
    Streaming,
}

impl ClientState {
    /// Returns the state name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::Configured => "Configured",
            Self::Streaming => "Streaming",
        }
    }
}

/// Configuration for [`SeedLinkClient`](crate::SeedLinkClient) connections.
#[derive(Clone)]
pub struct ClientConfig {
    /// Timeout for the initial TCP connection. Default: 15 seconds.
    pub connect_timeout: Duration,
    /// Timeout for individual read operations (lines and frames). Default: 60 seconds.
    pub read_timeout: Duration,
    /// Whether to attempt SeedLink v4 negotiation. Default: `true`.
    pub prefer_v4: bool,
    /// Delay between automatic reconnect attempts when using
    /// [`ReconnectingClient`](crate::ReconnectingClient). Default: 30 seconds.
    pub reconnect_delay: Duration,
    /// Interval for TCP keepalive probes (`SO_KEEPALIVE`). Default: 600 seconds.
    pub keepalive_interval: Duration,
    /// Whether reads block indefinitely once streaming (as opposed to
    /// returning on idle). Default: `true`.
    pub blocking: bool,
    /// Dial-up mode: request a bounded, one-shot transfer (FETCH semantics)
    /// rather than an open-ended stream (END semantics). Default: `false`.
    pub dialup: bool,
    /// Prefer BATCH-mode multi-station selection (v3) over repeated
    /// single-station STATION/SELECT/DATA sequences. Default: `false`.
    pub batch_mode: bool,
    /// Client identification string sent via `USERAGENT` (v4) or embedded
    /// in `HELLO`'s `extra` field for diagnostics. Default: `"seedlink-client"`.
    pub client_name: String,
    /// Client version string paired with `client_name`. Default: crate version.
    pub client_version: String,
    /// Optional credential provider for servers requiring authentication.
    /// Default: `None`.
    pub auth: Option<Arc<dyn AuthProvider>>,
    /// Upper bound on a single record's payload size. A record whose
    /// declared length exceeds this surfaces [`ClientError`](crate::ClientError::TooLarge)
    /// instead of growing the receive buffer without limit. Default: 16 KiB,
    /// matching the collector's receive buffer high-water mark.
    pub max_payload_bytes: usize,
    /// Idle timeout: if no data is read for this long while streaming, the
    /// connection is treated as dead and torn down (`netto` in `slinktool`
    /// terms). Default: 600 seconds.
    pub idle_timeout: Duration,
    /// Interval between application-level keepalive queries (`INFO ID`) sent
    /// when no data has arrived recently. Default: 600 seconds.
    pub keepalive_query_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(60),
            prefer_v4: true,
            reconnect_delay: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(600),
            blocking: true,
            dialup: false,
            batch_mode: false,
            client_name: "seedlink-client".to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            auth: None,
            max_payload_bytes: 16 * 1024,
            idle_timeout: Duration::from_secs(600),
            keepalive_query_interval: Duration::from_secs(600),
        }
    }
}

/// Connection-level phase of the collection driver (SPEC_FULL §4.8).
///
/// Distinct from [`ClientState`], which tracks the command-negotiation
/// state visible to callers; `ConnState` tracks the driver's own notion of
/// whether the transport is usable at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// No live transport; waiting for `netdly_deadline` before redialing.
    Down,
    /// Transport connected and negotiated, not yet streaming.
    Up,
    /// Transport connected and the frame stream is flowing.
    Streaming,
}

/// Framer phase within the current record (SPEC_FULL §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Waiting for a fresh record header; no partial record in progress.
    Header,
    /// v4 only: header parsed, waiting for the station-id bytes.
    StationId,
    /// Waiting for the remainder of the record payload.
    Payload,
}

/// Whether an INFO-class request is outstanding (SPEC_FULL §4.8 step 5/9).
///
/// At most one request may be in flight; a non-`None` value blocks further
/// INFO/keepalive requests until the matching reply is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    /// No INFO-class request outstanding.
    None,
    /// A caller-initiated INFO request is outstanding.
    Info,
    /// A driver-initiated keepalive (`INFO ID`) is outstanding; its reply is
    /// swallowed silently rather than surfaced to the caller.
    Keepalive,
}

/// Information about the connected SeedLink server, parsed from HELLO.
#[derive(Clone, Debug)]
pub struct ServerInfo {
    /// Server software name (e.g., `"SeedLink"`).
    pub software: String,
    /// Server version string (e.g., `"v3.1"`).
    pub version: String,
    /// Server organization line.
    pub organization: String,
    /// Advertised capabilities (e.g., `["SLPROTO:4.0", "SLPROTO:3.1"]`).
    pub capabilities: Vec<String>,
}

/// Network + station identifier used as a key for sequence tracking.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationKey {
    /// FDSN network code (e.g., `"IU"`).
    pub network: String,
    /// Station code (e.g., `"ANMO"`).
    pub station: String,
}

/// An owned SeedLink frame with its payload copied to the heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnedFrame {
    /// SeedLink v3 frame (8-byte header + 512-byte miniSEED).
    V3 {
        /// 6-digit hex sequence number.
        sequence: SequenceNumber,
        /// miniSEED v2 record (512 bytes).
        payload: Vec<u8>,
    },
    /// SeedLink v4 frame with variable-length payload.
    V4 {
        /// Payload format indicator.
        format: PayloadFormat,
        /// Payload sub-format indicator.
        subformat: PayloadSubformat,
        /// 20-digit decimal sequence number.
        sequence: SequenceNumber,
        /// Station identifier (e.g., `"IU_ANMO"`).
        station_id: String,
        /// Payload bytes.
        payload: Vec<u8>,
    },
}

impl OwnedFrame {
    /// Returns the sequence number of this frame.
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            Self::V3 { sequence, .. } | Self::V4 { sequence, .. } => *sequence,
        }
    }

    /// Returns the payload bytes of this frame.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::V3 { payload, .. } | Self::V4 { payload, .. } => payload,
        }
    }

    /// Extract the station key (network + station) from the frame.
    ///
    /// For V3, parses station (bytes 8–12) and network (bytes 18–19) from the
    /// miniSEED payload header. For V4, splits `station_id` on `'_'`.
    ///
    /// Returns `None` if the payload is too short or station info is unreadable.
    pub fn station_key(&self) -> Option<StationKey> {
        match self {
            Self::V3 { payload, .. } => {
                if payload.len() >= 20 {
                    let station = std::str::from_utf8(&payload[8..13]).ok()?.trim().to_owned();
                    let network = std::str::from_utf8(&payload[18..20])
                        .ok()?
                        .trim()
                        .to_owned();
                    if !station.is_empty() && !network.is_empty() {
                        Some(StationKey { network, station })
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            Self::V4 { station_id, .. } => {
                station_id
                    .split_once('_')
                    .map(|(network, station)| StationKey {
                        network: network.to_owned(),
                        station: station.to_owned(),
                    })
            }
        }
    }

    /// Decode the payload as a miniSEED record.
    ///
    /// Delegates to [`RawFrame::decode()`] on a borrowed view of this frame.
    pub fn decode(&self) -> seedlink_protocol::Result<seedlink_protocol::DataFrame> {
        self.as_raw_frame().decode()
    }

    fn as_raw_frame(&self) -> RawFrame<'_> {
        match self {
            Self::V3 { sequence, payload } => RawFrame::V3 {
                sequence: *sequence,
                payload,
            },
            Self::V4 {
                format,
                subformat,
                sequence,
                station_id,
                payload,
            } => RawFrame::V4 {
                format: *format,
                subformat: *subformat,
                sequence: *sequence,
                station_id,
                payload,
            },
        }
    }
}

impl<'a> From<RawFrame<'a>> for OwnedFrame {
    fn from(raw: RawFrame<'a>) -> Self {
        match raw {
            RawFrame::V3 { sequence, payload } => Self::V3 {
                sequence,
                payload: payload.to_vec(),
            },
            RawFrame::V4 {
                format,
                subformat,
                sequence,
                station_id,
                payload,
            } => Self::V4 {
                format,
                subformat,
                sequence,
                station_id: station_id.to_owned(),
                payload: payload.to_vec(),
            },
        }
    }
}
