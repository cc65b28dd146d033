use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated connection ids
pub const CONNECTION_ID_LEN: usize = 20;

/// Source of server timestamps
///
/// Every `serverTs` the router stamps, and therefore every default
/// `captureId` and `latencyMs`, is read from this clock.
pub trait Clock: Send + Sync {
    /// Current time in Unix milliseconds
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by [`shared::get_timestamp`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        shared::get_timestamp()
    }
}

// Random alphanumeric connection id, opaque to clients
pub fn generate_connection_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONNECTION_ID_LEN)
        .map(char::from)
        .collect()
}
