//! Errors of the RPC path.
//!
//! Every failure a caller can observe is decoded once into [`Error`], a closed
//! union that keeps transport problems, malformed responses, node faults,
//! aggregation failures and cancellation apart.

use {
    serde_json::Value,
    std::time::Duration,
};

/// Code nodes (Infura, Alchemy and friends) use to signal that the caller
/// exceeded its request budget.
pub const RATE_LIMIT_CODE: i64 = -32005;

/// Delay used when a rate limited response doesn't suggest one.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound of a node requested backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The request could not be delivered or no response was received.
    #[error("transport error: {0}")]
    Transport(String),
    /// The persistent connection went away while the request was in flight.
    #[error("transport closed: {0}")]
    TransportClosed(String),
    /// The request was issued while the socket was not connected.
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Rpc(#[from] RpcFault),
    /// Every registered nonce source failed (or there were none).
    #[error("no nonce source available")]
    NoNonceSource,
    #[error("request cancelled")]
    Cancelled,
}

impl Error {
    /// Whether retrying the same request against another endpoint could help.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::TransportClosed(_) | Self::NotConnected
        )
    }
}

/// The response did not have the shape the request expected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("response is missing a result")]
    MissingResult,
    #[error("invalid hex value {0:?}")]
    InvalidHex(String),
    #[error("expected {expected}, got {value}")]
    InvalidShape { expected: &'static str, value: Value },
    #[error("unexpected response id {0}")]
    UnexpectedId(Value),
}

/// A fault reported by the node in the `error` member of a response.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcFault {
    pub fn is_rate_limit(&self) -> bool {
        self.code == RATE_LIMIT_CODE
    }

    /// The delay the node asks for before retrying, taken from
    /// `data.backoff_seconds` and capped at [`MAX_BACKOFF`].
    pub fn backoff(&self) -> Duration {
        let seconds = self
            .data
            .as_ref()
            .and_then(|data| data.get("backoff_seconds"))
            .and_then(Value::as_f64);
        match seconds {
            Some(seconds) if seconds.is_finite() && seconds >= 0. => {
                Duration::try_from_secs_f64(seconds)
                    .unwrap_or(MAX_BACKOFF)
                    .min(MAX_BACKOFF)
            }
            _ => DEFAULT_BACKOFF,
        }
    }
}
