//! An in-process scriptable SeedLink server for exercising the client
//! without a real network peer. Used exclusively by tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use seedlink_protocol::ProtocolVersion;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub struct MockConfig {
    #[allow(dead_code)]
    pub version: ProtocolVersion,
    pub hello_line1: String,
    pub hello_line2: String,
    /// Frames sent on END/FETCH when [`connection_frames`](Self::connection_frames) is `None`.
    pub frames: Vec<Vec<u8>>,
    /// Per-connection frame scripts, indexed by connection attempt (0-based).
    /// When set, overrides `frames` and lets reconnect tests script distinct
    /// behavior per attempt (e.g. duplicate replay then new data).
    pub connection_frames: Option<Vec<Vec<Vec<u8>>>>,
    pub accept_slproto: bool,
    pub close_after_stream: bool,
    /// Maximum number of connections the server accepts before stopping.
    pub max_connections: u32,
}

impl MockConfig {
    pub fn v3_default(frames: Vec<Vec<u8>>) -> Self {
        Self {
            version: ProtocolVersion::V3,
            hello_line1: "SeedLink v3.1 (2020.075)".to_owned(),
            hello_line2: "Mock Server".to_owned(),
            frames,
            connection_frames: None,
            accept_slproto: false,
            close_after_stream: false,
            max_connections: 1,
        }
    }

    pub fn v4_default(frames: Vec<Vec<u8>>) -> Self {
        Self {
            version: ProtocolVersion::V4,
            hello_line1: "SeedLink v4.0 (mock) :: SLPROTO:4.0 SLPROTO:3.1".to_owned(),
            hello_line2: "Mock Server v4".to_owned(),
            frames,
            connection_frames: None,
            accept_slproto: true,
            close_after_stream: false,
            max_connections: 1,
        }
    }

    fn frames_for(&self, connection_index: usize) -> &[Vec<u8>] {
        match &self.connection_frames {
            Some(per_conn) => per_conn.get(connection_index).map_or(&[], |v| v.as_slice()),
            None => &self.frames,
        }
    }
}

/// Commands received on each accepted connection, in arrival order.
#[derive(Clone, Default)]
pub struct CapturedCommands {
    inner: Arc<Mutex<Vec<Vec<String>>>>,
}

impl CapturedCommands {
    /// Returns the commands (trimmed, upper-cased line text) seen on
    /// connection `index` (0-based). Panics if that connection never
    /// accepted.
    pub fn connection(&self, index: usize) -> Vec<String> {
        self.inner.lock().unwrap()[index].clone()
    }

    fn record(&self, index: usize, line: &str) {
        let mut guard = self.inner.lock().unwrap();
        while guard.len() <= index {
            guard.push(Vec::new());
        }
        guard[index].push(line.to_owned());
    }
}

pub struct MockServer {
    addr: SocketAddr,
    captured: CapturedCommands,
}

impl MockServer {
    pub async fn start(config: MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = CapturedCommands::default();

        let captured_clone = captured.clone();
        tokio::spawn(async move {
            Self::handle_connections(listener, config, captured_clone).await;
        });

        Self { addr, captured }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn captured(&self) -> &CapturedCommands {
        &self.captured
    }

    async fn handle_connections(
        listener: TcpListener,
        config: MockConfig,
        captured: CapturedCommands,
    ) {
        for conn_index in 0..config.max_connections as usize {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            Self::handle_one(stream, &config, &captured, conn_index).await;
        }
    }

    async fn handle_one(
        stream: tokio::net::TcpStream,
        config: &MockConfig,
        captured: &CapturedCommands,
        conn_index: usize,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut raw = Vec::new();

        loop {
            // Commands are CR-terminated (not CRLF), unlike server responses.
            raw.clear();
            let n = match reader.read_until(b'\r', &mut raw).await {
                Ok(n) => n,
                Err(_) => break,
            };
            if n == 0 {
                break;
            }

            let trimmed = String::from_utf8_lossy(&raw).trim().to_uppercase();
            captured.record(conn_index, &trimmed);

            if trimmed == "HELLO" {
                let response = format!("{}\r\n{}\r\n", config.hello_line1, config.hello_line2);
                if write_half.write_all(response.as_bytes()).await.is_err() {
                    break;
                }
                let _ = write_half.flush().await;
            } else if trimmed.starts_with("SLPROTO") {
                if config.accept_slproto {
                    if write_half.write_all(b"OK\r\n").await.is_err() {
                        break;
                    }
                } else if write_half
                    .write_all(b"ERROR UNSUPPORTED unsupported command\r\n")
                    .await
                    .is_err()
                {
                    break;
                }
                let _ = write_half.flush().await;
            } else if trimmed.starts_with("STATION")
                || trimmed.starts_with("SELECT")
                || trimmed == "DATA"
                || trimmed.starts_with("DATA ")
                || trimmed.starts_with("TIME")
                || trimmed.starts_with("USERAGENT")
                || trimmed.starts_with("AUTH")
                || trimmed.starts_with("CAPABILITIES")
                || trimmed == "BATCH"
            {
                // All servers reply OK to STATION/SELECT/DATA/TIME/USERAGENT/
                // AUTH/CAPABILITIES/BATCH (EXTREPLY behavior).
                if write_half.write_all(b"OK\r\n").await.is_err() {
                    break;
                }
                let _ = write_half.flush().await;
            } else if trimmed == "GETCAPABILITIES" {
                if write_half.write_all(b"SLPROTO:4.0\r\n").await.is_err() {
                    break;
                }
                let _ = write_half.flush().await;
            } else if trimmed == "END" || trimmed == "FETCH" || trimmed.starts_with("FETCH ") {
                // END/FETCH triggers streaming — no text response, just send frames
                for frame in config.frames_for(conn_index) {
                    if write_half.write_all(frame).await.is_err() {
                        break;
                    }
                }
                let _ = write_half.flush().await;
                if config.close_after_stream {
                    break;
                }
            } else if trimmed.starts_with("INFO") {
                for frame in config.frames_for(conn_index) {
                    if write_half.write_all(frame).await.is_err() {
                        break;
                    }
                }
                if write_half.write_all(b"END\r\n").await.is_err() {
                    break;
                }
                let _ = write_half.flush().await;
            } else if trimmed == "BYE" {
                let _ = write_half.shutdown().await;
                break;
            }
        }
    }
}
