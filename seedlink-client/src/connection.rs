use std::time::Duration;

use seedlink_protocol::frame::{v3, v4};
use seedlink_protocol::{Command, InspectOutcome, ProtocolVersion, inspector};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace, warn};

use crate::error::{ClientError, Result};
use crate::state::OwnedFrame;

/// Default SeedLink port used when an address carries none.
pub const DEFAULT_PORT: u16 = 18000;

/// Default host used when an address is empty.
pub const DEFAULT_HOST: &str = "localhost";

/// Split a SeedLink server address into `(host, port)`.
///
/// Accepts `host`, `host:port`, and `host@port` (the form the original
/// `slinktool` command line uses) and falls back to [`DEFAULT_HOST`] and
/// [`DEFAULT_PORT`] for whichever half is missing.
///
/// A port that cannot be parsed as a `u16` is a permanent failure — the
/// address itself is malformed, not merely unreachable — and is reported
/// as [`ClientError::FatalAddress`] rather than silently defaulting.
pub fn parse_addr(addr: &str) -> Result<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Ok((DEFAULT_HOST.to_owned(), DEFAULT_PORT));
    }

    let sep = addr.rfind(['@', ':']);
    match sep {
        Some(idx) => {
            let host = &addr[..idx];
            let port_str = &addr[idx + 1..];
            let host = if host.is_empty() { DEFAULT_HOST } else { host };
            let port = port_str.parse().map_err(|_| {
                ClientError::FatalAddress(format!(
                    "invalid port {port_str:?} in address {addr:?}"
                ))
            })?;
            Ok((host.to_owned(), port))
        }
        None => Ok((addr.to_owned(), DEFAULT_PORT)),
    }
}

pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    read_timeout: Duration,
}

impl Connection {
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        Self::connect_with_keepalive(addr, connect_timeout, read_timeout, None).await
    }

    /// Connect, additionally arming `SO_KEEPALIVE` with the given probe
    /// interval (passing `None` leaves the OS default in place).
    pub async fn connect_with_keepalive(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
        keepalive_interval: Option<Duration>,
    ) -> Result<Self> {
        let (host, port) = parse_addr(addr)?;
        let dial = format!("{host}:{port}");
        debug!(addr = %dial, "resolving");

        let mut last_err = None;
        let mut stream = None;
        let candidates = tokio::net::lookup_host(&dial).await.map_err(ClientError::Io)?;
        for candidate in candidates {
            debug!(%candidate, "TCP connecting");
            match tokio::time::timeout(connect_timeout, TcpStream::connect(candidate)).await {
                Ok(Ok(s)) => {
                    stream = Some(s);
                    break;
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => return Err(ClientError::Timeout(connect_timeout)),
            }
        }

        let stream = match stream {
            Some(s) => s,
            None => {
                return Err(match last_err {
                    Some(e) => ClientError::Io(e),
                    None => ClientError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no addresses resolved for {dial}"),
                    )),
                });
            }
        };

        stream.set_nodelay(true).ok();
        if let Some(interval) = keepalive_interval {
            let sock = SockRef::from(&stream);
            let keepalive = TcpKeepalive::new().with_time(interval).with_interval(interval);
            if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
                warn!(error = %e, "failed to set SO_KEEPALIVE");
            }
        }

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            read_timeout,
        })
    }

    pub async fn send_command(&mut self, cmd: &Command, version: ProtocolVersion) -> Result<()> {
        trace!(?cmd, "sending");
        let bytes = cmd.to_bytes(version)?;
        self.send_raw(&bytes).await
    }

    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await.map_err(ClientError::Io)?;
        self.writer.flush().await.map_err(ClientError::Io)?;
        Ok(())
    }

    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(self.read_timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| {
                warn!(timeout = ?self.read_timeout, "read timeout");
                ClientError::Timeout(self.read_timeout)
            })?
            .map_err(ClientError::Io)?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }
        Ok(line)
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        tokio::time::timeout(self.read_timeout, self.reader.read_exact(buf))
            .await
            .map_err(|_| ClientError::Timeout(self.read_timeout))?
            .map_err(ClientError::Io)?;
        Ok(())
    }

    /// Read the next v3 frame, detecting data-record length dynamically.
    ///
    /// The `SL` header carries only a sequence number, never a length, so
    /// the real record boundary is found by buffering [`inspector::MIN_INSPECT_LEN`]
    /// bytes and invoking the record inspector, reading further in 128-byte
    /// increments while it reports [`InspectOutcome::NeedMoreData`].
    ///
    /// `max_len` bounds the payload; a record whose declared length exceeds
    /// it surfaces [`ClientError::TooLarge`] without losing the bytes
    /// already read off the wire. Callers that need to resume such a read
    /// after growing their buffer should drive [`read_v3_data_payload`](Self::read_v3_data_payload)
    /// and [`read_v3_data_payload_from`](Self::read_v3_data_payload_from) directly, since resuming
    /// requires remembering the frame's sequence number across the retry.
    pub async fn read_v3_frame(&mut self, max_len: usize) -> Result<OwnedFrame> {
        let mut header = [0u8; v3::HEADER_LEN];
        self.read_exact(&mut header).await?;
        match v3::parse_header(&header)? {
            v3::V3Header::Data { sequence } => {
                let payload = self.read_v3_data_payload(max_len).await?;
                Ok(OwnedFrame::V3 { sequence, payload })
            }
            v3::V3Header::Info { .. } => Err(ClientError::UnexpectedResponse(
                "unexpected SLINFO frame while streaming data".into(),
            )),
        }
    }

    /// Buffer and length-detect a v3 data record body (everything after the
    /// 8-byte header), bounded by `max_len`.
    pub async fn read_v3_data_payload(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.read_v3_data_payload_from(Vec::new(), max_len).await
    }

    /// Continue a v3 payload read that previously returned
    /// [`ClientError::TooLarge`], reusing the preserved prefix in `buf` so
    /// none of the bytes already collected are re-read from the wire.
    pub async fn read_v3_data_payload_from(
        &mut self,
        mut buf: Vec<u8>,
        max_len: usize,
    ) -> Result<Vec<u8>> {
        if buf.len() < inspector::MIN_INSPECT_LEN {
            let start = buf.len();
            buf.resize(inspector::MIN_INSPECT_LEN, 0);
            self.read_exact(&mut buf[start..]).await?;
        }
        loop {
            match inspector::inspect(&buf)? {
                InspectOutcome::Detected(info) => {
                    if info.length > max_len {
                        return Err(ClientError::TooLarge {
                            buffered: buf,
                            needed: info.length,
                        });
                    }
                    if buf.len() < info.length {
                        let start = buf.len();
                        buf.resize(info.length, 0);
                        self.read_exact(&mut buf[start..]).await?;
                    } else {
                        buf.truncate(info.length);
                    }
                    return Ok(buf);
                }
                InspectOutcome::NeedMoreData => {
                    let start = buf.len();
                    let grow = 128.min(max_len.saturating_sub(start).max(1));
                    buf.resize(start + grow, 0);
                    self.read_exact(&mut buf[start..]).await?;
                }
            }
        }
    }

    /// Read one `SLINFO` chunk (fixed [`v3::PAYLOAD_LEN`] payload).
    /// Returns `(payload, terminal)`.
    pub async fn read_v3_info_chunk(&mut self) -> Result<(Vec<u8>, bool)> {
        let mut header = [0u8; v3::HEADER_LEN];
        self.read_exact(&mut header).await?;
        match v3::parse_header(&header)? {
            v3::V3Header::Info { terminal } => {
                let mut payload = vec![0u8; v3::PAYLOAD_LEN];
                self.read_exact(&mut payload).await?;
                Ok((payload, terminal))
            }
            v3::V3Header::Data { .. } => Err(ClientError::UnexpectedResponse(
                "unexpected SL data frame during INFO response".into(),
            )),
        }
    }

    /// Read the next v4 frame, bounded by `max_len`.
    ///
    /// Unlike v3, the `SE` header always carries an explicit `payload_length`,
    /// so the size check runs before the body is read at all — an oversized
    /// frame surfaces [`ClientError::TooLarge`] with only the header consumed.
    pub async fn read_v4_frame(&mut self, max_len: usize) -> Result<OwnedFrame> {
        let mut header = vec![0u8; v4::MIN_HEADER_LEN];
        self.read_exact(&mut header).await?;
        self.read_v4_frame_from(header, max_len).await
    }

    /// Continue a v4 frame read that previously returned
    /// [`ClientError::TooLarge`], reusing the already-read header.
    pub async fn read_v4_frame_from(&mut self, header: Vec<u8>, max_len: usize) -> Result<OwnedFrame> {
        let station_id_len = header[16] as usize;
        let payload_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let remaining = station_id_len + payload_len;
        let total = v4::MIN_HEADER_LEN + remaining;

        if total > max_len {
            return Err(ClientError::TooLarge {
                buffered: header,
                needed: total,
            });
        }

        let mut full = Vec::with_capacity(total);
        full.extend_from_slice(&header);
        full.resize(total, 0);
        self.read_exact(&mut full[v4::MIN_HEADER_LEN..]).await?;

        let (raw, _consumed) = v4::parse(&full)?;
        Ok(OwnedFrame::from(raw))
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(ClientError::Io)?;
        Ok(())
    }
}
