use std::collections::HashMap;
use std::time::Duration;

use futures_core::Stream;
use seedlink_protocol::SequenceNumber;
use tracing::{debug, info, warn};

use crate::SeedLinkClient;
use crate::error::{ClientError, Result};
use crate::registry::StreamRegistry;
use crate::state::{ClientConfig, OwnedFrame, StationKey};

/// Configuration for automatic reconnect with exponential backoff.
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnect attempt. Default: 1 second.
    pub initial_backoff: Duration,
    /// Maximum delay between reconnect attempts. Default: 60 seconds.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each failed attempt. Default: 2.0.
    pub multiplier: f64,
    /// Maximum number of reconnect attempts. 0 = unlimited. Default: 0.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// Records a subscription step for replay on reconnect.
#[derive(Clone, Debug)]
enum SubscriptionStep {
    Station { station: String, network: String },
    Select { pattern: String },
    Data,
    DataFrom(SequenceNumber),
    TimeWindow { start: String, end: Option<String> },
}

/// A wrapper around [`SeedLinkClient`] that automatically reconnects on disconnect.
///
/// Records all subscription steps (STATION, SELECT, DATA, TIME) and replays them
/// on reconnect. On resume, replaces DATA with DATA-from-sequence using the last
/// tracked sequence numbers.
///
/// # Deduplication guarantee
///
/// SeedLink servers may resend the last frame at the requested sequence number
/// when resuming with `DATA seq`. This client automatically deduplicates frames
/// after reconnect: any frame whose sequence number is ≤ the last tracked
/// sequence for its station is silently dropped. Downstream consumers are
/// guaranteed to never see duplicate frames.
pub struct ReconnectingClient {
    addr: String,
    config: ClientConfig,
    reconnect: ReconnectConfig,
    subscriptions: Vec<SubscriptionStep>,
    client: Option<SeedLinkClient>,
    sequences: HashMap<StationKey, SequenceNumber>,
    /// Subscription/resume bookkeeping mirroring `sequences`, kept in the
    /// `slinktool`-style state-file shape so it can be persisted and
    /// reloaded across process restarts.
    registry: StreamRegistry,
}

impl ReconnectingClient {
    /// Connect to a SeedLink server with reconnect support using default configs.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_config(addr, ClientConfig::default(), ReconnectConfig::default()).await
    }

    /// Connect with custom client and reconnect configuration.
    pub async fn connect_with_config(
        addr: &str,
        config: ClientConfig,
        reconnect: ReconnectConfig,
    ) -> Result<Self> {
        let client = SeedLinkClient::connect_with_config(addr, config.clone()).await?;
        Ok(Self {
            addr: addr.to_owned(),
            config,
            reconnect,
            subscriptions: Vec::new(),
            client: Some(client),
            sequences: HashMap::new(),
            registry: StreamRegistry::new(),
        })
    }

    /// Loads resume state (sequence numbers and timestamps) from a
    /// previously [`StreamRegistry::serialize`]d state file, for a
    /// collector restarting after a process exit.
    pub fn load_registry(&mut self, registry: StreamRegistry) {
        for record in registry.iter() {
            if let Some((network, station)) = record.station_id.split_once('_') {
                self.sequences.insert(
                    StationKey {
                        network: network.to_owned(),
                        station: station.to_owned(),
                    },
                    record.seqnum,
                );
            }
        }
        self.registry = registry;
    }

    /// Returns the stream registry tracking resume state for every
    /// subscribed station, suitable for persisting via
    /// [`StreamRegistry::serialize`].
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Select a station and network. Records the step for reconnect replay.
    pub async fn station(&mut self, station: &str, network: &str) -> Result<()> {
        self.subscriptions.push(SubscriptionStep::Station {
            station: station.to_owned(),
            network: network.to_owned(),
        });
        if !self.registry.is_all_station() {
            let _ = self.registry.add(
                &format!("{network}_{station}"),
                None,
                SequenceNumber::UNSET,
                None,
            );
        }
        self.client_mut()?.station(station, network).await
    }

    /// Select channels. Records the step for reconnect replay.
    pub async fn select(&mut self, pattern: &str) -> Result<()> {
        self.subscriptions.push(SubscriptionStep::Select {
            pattern: pattern.to_owned(),
        });
        self.client_mut()?.select(pattern).await
    }

    /// Arm with DATA. Records the step for reconnect replay.
    pub async fn data(&mut self) -> Result<()> {
        self.subscriptions.push(SubscriptionStep::Data);
        self.client_mut()?.data().await
    }

    /// Arm with DATA from a specific sequence. Records the step for reconnect replay.
    pub async fn data_from(&mut self, sequence: SequenceNumber) -> Result<()> {
        self.subscriptions
            .push(SubscriptionStep::DataFrom(sequence));
        self.client_mut()?.data_from(sequence).await
    }

    /// Arm with TIME window. Records the step for reconnect replay.
    pub async fn time_window(&mut self, start: &str, end: Option<&str>) -> Result<()> {
        self.subscriptions.push(SubscriptionStep::TimeWindow {
            start: start.to_owned(),
            end: end.map(|s| s.to_owned()),
        });
        self.client_mut()?.time_window(start, end).await
    }

    /// Send END to start streaming. Does not record (replayed automatically).
    pub async fn end_stream(&mut self) -> Result<()> {
        self.client_mut()?.end_stream().await
    }

    /// Read the next frame, automatically reconnecting on EOF.
    ///
    /// Returns `Ok(Some(frame))` on success, `Ok(None)` when the stream truly ends
    /// (max attempts exhausted or server sends clean EOF after reconnect),
    /// or `Err` on non-recoverable errors.
    ///
    /// Frames with sequence ≤ the last tracked sequence for their station are
    /// silently dropped (deduplication after reconnect).
    pub async fn next_frame(&mut self) -> Result<Option<OwnedFrame>> {
        loop {
            let result = match self.client.as_mut() {
                Some(client) => client.next_frame().await,
                None => return Err(ClientError::Disconnected),
            };

            match result {
                Ok(Some(frame)) => {
                    // Dedup: skip frames we've already seen (server may resend
                    // the last frame after reconnect with DATA seq)
                    if let Some(key) = frame.station_key()
                        && let Some(&tracked) = self.sequences.get(&key)
                        && frame.sequence() <= tracked
                    {
                        debug!(
                            seq = %frame.sequence(),
                            tracked = %tracked,
                            station = ?key,
                            "skipping duplicate frame"
                        );
                        continue;
                    }

                    // Track sequence from the inner client
                    self.sync_sequences();
                    if let Some(key) = frame.station_key() {
                        self.registry.update(
                            &format!("{}_{}", key.network, key.station),
                            frame.sequence(),
                            None,
                        );
                    }
                    return Ok(Some(frame));
                }
                Ok(None) => {
                    // EOF — attempt reconnect
                    debug!("stream ended, attempting reconnect");
                    match self.attempt_reconnect().await {
                        Ok(()) => {
                            // Reconnected — loop to read from new connection
                            continue;
                        }
                        Err(ClientError::ReconnectFailed { attempts }) => {
                            warn!(attempts, "reconnect failed, giving up");
                            return Err(ClientError::ReconnectFailed { attempts });
                        }
                        Err(ClientError::FatalAddress(msg)) => {
                            warn!(error = %msg, "address is permanently unusable, not retrying");
                            return Err(ClientError::FatalAddress(msg));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume this client and return a [`Stream`] of frames with auto-reconnect.
    ///
    /// Duplicate frames after reconnect are automatically filtered out.
    pub fn into_stream(self) -> impl Stream<Item = Result<OwnedFrame>> {
        async_stream::try_stream! {
            let mut this = self;
            loop {
                match this.next_frame().await {
                    Ok(Some(frame)) => yield frame,
                    Ok(None) => break,
                    Err(ClientError::ReconnectFailed { .. }) => break,
                    Err(e) => Err(e)?,
                }
            }
        }
    }

    /// Returns the last received sequence number for a given network/station pair.
    pub fn last_sequence(&self, network: &str, station: &str) -> Option<SequenceNumber> {
        let key = StationKey {
            network: network.to_owned(),
            station: station.to_owned(),
        };
        self.sequences.get(&key).copied()
    }

    /// Returns a reference to all tracked sequences.
    pub fn sequences(&self) -> &HashMap<StationKey, SequenceNumber> {
        &self.sequences
    }

    // -- Private helpers --

    fn client_mut(&mut self) -> Result<&mut SeedLinkClient> {
        self.client.as_mut().ok_or(ClientError::Disconnected)
    }

    fn sync_sequences(&mut self) {
        if let Some(client) = &self.client {
            for (key, seq) in client.sequences() {
                self.sequences.insert(key.clone(), *seq);
            }
        }
    }

    /// Try to reconnect and replay subscriptions.
    async fn attempt_reconnect(&mut self) -> Result<()> {
        self.client = None;

        let mut backoff = self.reconnect.initial_backoff;
        let max_attempts = self.reconnect.max_attempts;

        for attempt in 1.. {
            if max_attempts > 0 && attempt > max_attempts {
                return Err(ClientError::ReconnectFailed {
                    attempts: max_attempts,
                });
            }

            info!(attempt, backoff_ms = backoff.as_millis(), "reconnecting");
            tokio::time::sleep(backoff).await;

            match SeedLinkClient::connect_with_config(&self.addr, self.config.clone()).await {
                Ok(mut new_client) => {
                    // Replay subscriptions
                    if let Err(e) = self.replay_subscriptions(&mut new_client).await {
                        warn!(attempt, error = %e, "replay failed, retrying");
                        backoff = self.next_backoff(backoff);
                        continue;
                    }

                    // Send END to resume streaming
                    if let Err(e) = new_client.end_stream().await {
                        warn!(attempt, error = %e, "end_stream failed, retrying");
                        backoff = self.next_backoff(backoff);
                        continue;
                    }

                    info!(attempt, "reconnected successfully");
                    self.client = Some(new_client);
                    return Ok(());
                }
                Err(ClientError::FatalAddress(msg)) => {
                    warn!(error = %msg, "address is permanently unusable, aborting reconnect");
                    return Err(ClientError::FatalAddress(msg));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    backoff = self.next_backoff(backoff);
                }
            }
        }

        unreachable!()
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        let next = current.mul_f64(self.reconnect.multiplier);
        next.min(self.reconnect.max_backoff)
    }

    /// Replay all recorded subscription steps on a new client.
    ///
    /// Replaces bare `Data` steps with `DataFrom(last_seq)` when we have
    /// a tracked sequence for the current station context.
    async fn replay_subscriptions(&self, client: &mut SeedLinkClient) -> Result<()> {
        let mut current_station: Option<StationKey> = None;

        for step in &self.subscriptions {
            match step {
                SubscriptionStep::Station { station, network } => {
                    client.station(station, network).await?;
                    current_station = Some(StationKey {
                        network: network.clone(),
                        station: station.clone(),
                    });
                }
                SubscriptionStep::Select { pattern } => {
                    client.select(pattern).await?;
                }
                SubscriptionStep::Data => {
                    // Try to resume from last known sequence
                    if let Some(ref key) = current_station {
                        if let Some(seq) = self.sequences.get(key) {
                            debug!(%seq, station = %key.station, network = %key.network, "resuming from sequence");
                            client.data_from(*seq).await?;
                        } else {
                            client.data().await?;
                        }
                    } else {
                        client.data().await?;
                    }
                }
                SubscriptionStep::DataFrom(seq) => {
                    // If we have a newer sequence, use that instead
                    if let Some(ref key) = current_station
                        && let Some(tracked) = self.sequences.get(key)
                        && *tracked > *seq
                    {
                        client.data_from(*tracked).await?;
                        continue;
                    }
                    client.data_from(*seq).await?;
                }
                SubscriptionStep::TimeWindow { start, end } => {
                    client.time_window(start, end.as_deref()).await?;
                }
            }
        }

        Ok(())
    }
}
