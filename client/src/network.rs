//! WebSocket client for the match relay

use crate::error::ClientError;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde_json::{json, Value};
use shared::{
    AckBody, AckResponse, CaptureBroadcast, CaptureReceipt, ClientFrame, ErrorEvent, JoinedMatch,
    Role, ServerFrame, SlaveAckBroadcast, SlaveAckReceipt, CAPTURE_MOMENT, ERROR, JOINED_MATCH,
    JOIN_MATCH, SLAVE_ACK,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<AckResponse>>>>;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// An event pushed by the server, either direct or broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Joined(JoinedMatch),
    Capture(CaptureBroadcast),
    SlaveAck(SlaveAckBroadcast),
    Error(ErrorEvent),
    /// Event the client does not know, or whose payload did not parse
    Other { event: String, payload: Value },
}

impl RelayEvent {
    pub fn parse(event: String, payload: Value) -> Self {
        let parsed = match event.as_str() {
            JOINED_MATCH => serde_json::from_value(payload.clone()).map(RelayEvent::Joined),
            CAPTURE_MOMENT => serde_json::from_value(payload.clone()).map(RelayEvent::Capture),
            SLAVE_ACK => serde_json::from_value(payload.clone()).map(RelayEvent::SlaveAck),
            ERROR => serde_json::from_value(payload.clone()).map(RelayEvent::Error),
            _ => return RelayEvent::Other { event, payload },
        };

        parsed.unwrap_or_else(|e| {
            warn!("Failed to parse {} payload: {}", event, e);
            RelayEvent::Other { event, payload }
        })
    }
}

/// Connection to a relay server
///
/// Requests that expect an ack wait for the matching ack frame; events are
/// buffered and read with [`RelayClient::next_event`].
pub struct RelayClient {
    sink: SplitSink<WsStream, Message>,
    events: mpsc::UnboundedReceiver<RelayEvent>,
    pending: PendingAcks,
    next_ack: u64,
    ack_timeout: Duration,
    reader: JoinHandle<()>,
}

impl RelayClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _response) = connect_async(url).await?;
        let (sink, mut source) = stream.split();
        let (events_tx, events) = mpsc::unbounded_channel();
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Connection error: {}", e);
                        break;
                    }
                };

                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(ServerFrame::Event { event, payload }) => {
                        if events_tx.send(RelayEvent::parse(event, payload)).is_err() {
                            break;
                        }
                    }
                    Ok(ServerFrame::Ack { id, payload }) => {
                        if let Some(waiter) = reader_pending.lock().await.remove(&id) {
                            let _ = waiter.send(payload);
                        } else {
                            debug!("Ack {} arrived with nobody waiting", id);
                        }
                    }
                    Err(e) => warn!("Malformed frame from server: {}", e),
                }
            }

            // Fail every outstanding request
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            sink,
            events,
            pending,
            next_ack: 1,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            reader,
        })
    }

    pub fn set_ack_timeout(&mut self, ack_timeout: Duration) {
        self.ack_timeout = ack_timeout;
    }

    async fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), ClientError> {
        let text = serde_json::to_string(frame)?;
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Sends an event without asking for an ack
    pub async fn emit(&mut self, event: &str, payload: Value) -> Result<(), ClientError> {
        self.send_frame(&ClientFrame::new(event, payload, None)).await
    }

    /// Sends an event and waits for its ack
    pub async fn request(&mut self, event: &str, payload: Value) -> Result<AckResponse, ClientError> {
        let id = self.next_ack;
        self.next_ack += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        self.send_frame(&ClientFrame::new(event, payload, Some(id)))
            .await?;

        match timeout(self.ack_timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::AckTimeout {
                    event: event.to_string(),
                })
            }
        }
    }

    async fn request_ok(&mut self, event: &str, payload: Value) -> Result<AckBody, ClientError> {
        match self.request(event, payload).await? {
            AckResponse::Ok(body) => Ok(body),
            AckResponse::Err(error) => Err(ClientError::Rejected(error)),
        }
    }

    pub async fn join_match(&mut self, match_id: &str, role: Role) -> Result<JoinedMatch, ClientError> {
        match self
            .request_ok(JOIN_MATCH, json!({ "matchId": match_id, "role": role }))
            .await?
        {
            AckBody::Joined(joined) => Ok(joined),
            _ => Err(ClientError::UnexpectedAck {
                event: JOIN_MATCH.to_string(),
            }),
        }
    }

    /// Triggers a capture; the server generates an id when `capture_id` is `None`
    pub async fn capture_moment(
        &mut self,
        capture_id: Option<&str>,
        data: Value,
    ) -> Result<CaptureReceipt, ClientError> {
        let mut payload = json!({ "data": data });
        if let Some(capture_id) = capture_id {
            payload["captureId"] = json!(capture_id);
        }

        match self.request_ok(CAPTURE_MOMENT, payload).await? {
            AckBody::Captured(receipt) => Ok(receipt),
            _ => Err(ClientError::UnexpectedAck {
                event: CAPTURE_MOMENT.to_string(),
            }),
        }
    }

    /// Acknowledges a capture, echoing its server timestamp
    pub async fn slave_ack(
        &mut self,
        capture_id: &str,
        capture_server_ts: i64,
        client_ts: i64,
    ) -> Result<SlaveAckReceipt, ClientError> {
        let payload = json!({
            "captureId": capture_id,
            "captureServerTs": capture_server_ts,
            "clientTs": client_ts,
        });

        match self.request_ok(SLAVE_ACK, payload).await? {
            AckBody::Acknowledged(receipt) => Ok(receipt),
            _ => Err(ClientError::UnexpectedAck {
                event: SLAVE_ACK.to_string(),
            }),
        }
    }

    /// Next event from the server, or `None` once the connection is gone
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        self.events.recv().await
    }

    /// Next event if one is already buffered
    pub fn try_next_event(&mut self) -> Option<RelayEvent> {
        self.events.try_recv().ok()
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.sink.send(Message::Close(None)).await?;
        self.sink.close().await?;
        Ok(())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
