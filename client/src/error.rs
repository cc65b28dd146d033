use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    /// The server answered `{ok:false, error}`
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("no ack for {event} within the timeout")]
    AckTimeout { event: String },
    #[error("ack for {event} had an unexpected shape")]
    UnexpectedAck { event: String },
    #[error("connection closed")]
    Closed,
}
