use thiserror::Error;

/// Protocol validation failures reported back to the offending sender
///
/// The `Display` text is the exact message clients receive in both the
/// `{ok:false, error}` ack and the `ERROR` event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("JOIN_MATCH requires matchId and role MASTER|SLAVE")]
    InvalidJoin,
    #[error("{event} requires JOIN_MATCH first")]
    NotJoined { event: &'static str },
    #[error("Only MASTER can trigger CAPTURE_MOMENT")]
    MasterOnly,
    #[error("Only SLAVE can send SLAVE_ACK")]
    SlaveOnly,
}

/// Failures that stop the server itself
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}
