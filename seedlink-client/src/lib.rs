//! Async SeedLink client for real-time seismic data streaming.
//!
//! Connect to SeedLink servers (IRIS, BMKG, etc.) and receive miniSEED
//! records in real-time over the SeedLink v3 or v4 wire protocol. The
//! client negotiates the best dialect the server offers, tracks per-station
//! sequence numbers, and can hand back either a pull-style frame reader
//! ([`SeedLinkClient::next_frame`]) or a [`futures_core::Stream`].
//!
//! ```no_run
//! # async fn example() -> seedlink_client::Result<()> {
//! use seedlink_client::SeedLinkClient;
//!
//! let mut client = SeedLinkClient::connect("rtserve.iris.washington.edu:18000").await?;
//! client.station("ANMO", "IU").await?;
//! client.select("BHZ").await?;
//! client.data().await?;
//! client.end_stream().await?;
//!
//! while let Some(frame) = client.next_frame().await? {
//!     println!("seq={}, len={}", frame.sequence(), frame.payload().len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! For long-running collectors, [`ReconnectingClient`] wraps [`SeedLinkClient`]
//! with exponential-backoff reconnect, subscription replay, and sequence-based
//! deduplication.

pub mod client;
pub mod connection;
pub mod error;
pub mod mock;
pub mod negotiate;
pub mod reconnect;
pub mod registry;
pub mod state;
pub mod stream;

pub use client::SeedLinkClient;
pub use error::{ClientError, Result};
pub use reconnect::{ReconnectConfig, ReconnectingClient};
pub use registry::StreamRegistry;
pub use state::{
    AuthProvider, ClientConfig, ClientState, ConnState, OwnedFrame, QueryState, ServerInfo,
    StationKey, StreamState,
};
pub use stream::frame_stream;
