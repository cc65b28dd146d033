//! Wire protocol shared by the relay server and its clients
//!
//! Every message is a JSON text frame. Clients send named events with an
//! optional acknowledgement id; the server answers with named events (direct
//! or broadcast to the rest of a match) and, when asked, an ack frame carrying
//! a `{ok:true,...}` / `{ok:false,error}` result.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod coerce;

use coerce::{coerce_number, coerce_string, millis};

pub const JOIN_MATCH: &str = "JOIN_MATCH";
pub const JOINED_MATCH: &str = "JOINED_MATCH";
pub const CAPTURE_MOMENT: &str = "CAPTURE_MOMENT";
pub const SLAVE_ACK: &str = "SLAVE_ACK";
pub const ERROR: &str = "ERROR";

/// Prefix of server-generated capture ids, followed by the server timestamp
pub const CAPTURE_ID_PREFIX: &str = "cap_";

/// The two roles a connection can adopt inside a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    /// Parses a role case-insensitively, ignoring surrounding whitespace
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_uppercase().as_str() {
            "MASTER" => Some(Role::Master),
            "SLAVE" => Some(Role::Slave),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "MASTER",
            Role::Slave => "SLAVE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named event sent by a client
///
/// When `ack` is present the server replies with a [`ServerFrame::Ack`]
/// carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

fn empty_payload() -> Value {
    Value::Object(Default::default())
}

impl ClientFrame {
    pub fn new(event: &str, payload: Value, ack: Option<u64>) -> Self {
        Self {
            event: event.to_string(),
            payload,
            ack,
        }
    }
}

/// A frame sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Event { event: String, payload: Value },
    Ack { id: u64, payload: AckResponse },
}

impl ServerFrame {
    pub fn event<T: Serialize>(event: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(ServerFrame::Event {
            event: event.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// `JOIN_MATCH` input after coercion; not yet validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMatchRequest {
    pub match_id: String,
    pub role: String,
}

impl JoinMatchRequest {
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            match_id: coerce_string(payload.get("matchId")).trim().to_string(),
            role: coerce_string(payload.get("role")),
        }
    }
}

/// `CAPTURE_MOMENT` input after coercion
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMomentRequest {
    /// `None` when the client left the id out (or sent an empty one)
    pub capture_id: Option<String>,
    /// Opaque payload forwarded unchanged; `null` when absent
    pub data: Value,
}

impl CaptureMomentRequest {
    pub fn from_payload(payload: &Value) -> Self {
        let capture_id = coerce_string(payload.get("captureId"));
        Self {
            capture_id: if capture_id.is_empty() {
                None
            } else {
                Some(capture_id)
            },
            data: payload.get("data").cloned().unwrap_or(Value::Null),
        }
    }
}

/// `SLAVE_ACK` input after coercion
///
/// `capture_server_ts` comes from `captureServerTs`, falling back to
/// `serverTs`. Both timestamps are `0.0` when absent or non-numeric and keep
/// any fractional part until they are relayed.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaveAckRequest {
    pub capture_id: String,
    pub capture_server_ts: f64,
    pub client_ts: f64,
}

impl SlaveAckRequest {
    pub fn from_payload(payload: &Value) -> Self {
        let mut capture_server_ts = coerce_number(payload.get("captureServerTs"));
        if capture_server_ts == 0.0 {
            capture_server_ts = coerce_number(payload.get("serverTs"));
        }

        Self {
            capture_id: coerce_string(payload.get("captureId")),
            capture_server_ts,
            client_ts: coerce_number(payload.get("clientTs")),
        }
    }
}

/// Sent to a connection after it joins a match, both as ack body and as a
/// direct `JOINED_MATCH` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedMatch {
    pub match_id: String,
    pub role: Role,
    pub server_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReceipt {
    pub capture_id: String,
    pub server_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaveAckReceipt {
    pub server_ts: i64,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// `CAPTURE_MOMENT` as delivered to the other members of a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureBroadcast {
    pub match_id: String,
    pub capture_id: String,
    pub server_ts: i64,
    pub data: Value,
    pub from: String,
}

/// `SLAVE_ACK` as delivered to the other members of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaveAckBroadcast {
    pub match_id: String,
    pub capture_id: String,
    pub slave_id: String,
    pub capture_server_ts: Option<i64>,
    pub client_ts: Option<i64>,
    pub server_ts: i64,
    pub latency_ms: Option<i64>,
}

/// Success body of an ack, one shape per inbound event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AckBody {
    Joined(JoinedMatch),
    Captured(CaptureReceipt),
    Acknowledged(SlaveAckReceipt),
}

/// Result of an inbound event, returned to the sender through its ack id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResponse {
    Ok(AckBody),
    Err(String),
}

impl AckResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, AckResponse::Ok(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AckResponse::Ok(_) => None,
            AckResponse::Err(message) => Some(message),
        }
    }
}

impl Serialize for AckResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Success<'a> {
            ok: bool,
            #[serde(flatten)]
            body: &'a AckBody,
        }

        #[derive(Serialize)]
        struct Failure<'a> {
            ok: bool,
            error: &'a str,
        }

        match self {
            AckResponse::Ok(body) => Success { ok: true, body }.serialize(serializer),
            AckResponse::Err(error) => Failure { ok: false, error }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AckResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value.get("ok").and_then(Value::as_bool) {
            Some(true) => AckBody::deserialize(value)
                .map(AckResponse::Ok)
                .map_err(D::Error::custom),
            Some(false) => Ok(AckResponse::Err(
                value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )),
            None => Err(D::Error::custom("ack payload is missing `ok`")),
        }
    }
}

/// Milliseconds between a capture and its acknowledgement
///
/// A zero capture timestamp means the slave did not echo it back, so the
/// latency is unknown rather than zero. A difference that does not fit in
/// an `i64` is unknown as well.
pub fn latency_ms(now: i64, capture_server_ts: f64) -> Option<i64> {
    if capture_server_ts == 0.0 {
        return None;
    }
    millis(now as f64 - capture_server_ts)
}

/// Echoed timestamp as relayed to peers; `None` when it was not supplied
pub fn relayed_timestamp(ts: f64) -> Option<i64> {
    millis(ts)
}

/// Current Unix time in milliseconds
pub fn get_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}
