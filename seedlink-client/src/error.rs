use std::time::Duration;

/// Errors that can occur during SeedLink client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP or socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SeedLink protocol parsing error (invalid frame, bad command format, etc.).
    #[error("protocol error: {0}")]
    Protocol(#[from] seedlink_protocol::SeedlinkError),

    /// Operation exceeded the configured timeout duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Server closed the connection (read returned 0 bytes).
    #[error("disconnected")]
    Disconnected,

    /// Server returned an ERROR response to a command.
    #[error("server error: {0}")]
    ServerError(String),

    /// Method called in wrong client state (e.g., `next_frame` before `end_stream`).
    #[error("invalid state: expected {expected}, actual {actual}")]
    InvalidState {
        /// The state(s) required for the operation.
        expected: &'static str,
        /// The current client state.
        actual: &'static str,
    },

    /// Protocol version negotiation failed.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Server sent an unexpected response line.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Automatic reconnect gave up after exhausting the configured attempts.
    #[error("reconnect failed after {attempts} attempt(s)")]
    ReconnectFailed {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The server address is permanently unusable (e.g. an unparseable
    /// port). This is a session-terminating condition: callers must not
    /// retry against it, and [`ReconnectingClient`](crate::ReconnectingClient)
    /// treats it as non-retryable rather than backing off and trying again.
    #[error("fatal address error: {0}")]
    FatalAddress(String),

    /// A record's declared payload length exceeds the caller's receive
    /// buffer. The bytes already collected for the in-progress record are
    /// returned unconsumed in `buffered`; the caller retries with a buffer
    /// of at least `needed` bytes, reusing `buffered` as the preserved
    /// prefix so no data already read off the wire is lost.
    #[error("payload too large: needs {needed} bytes, {} already buffered", buffered.len())]
    TooLarge {
        /// Bytes already collected for the in-progress record.
        buffered: Vec<u8>,
        /// Total record length required to complete the read.
        needed: usize,
    },
}

/// Convenience alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;
