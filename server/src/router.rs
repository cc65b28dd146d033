//! Role-gated event routing
//!
//! Each connection moves from unjoined to joined with `JOIN_MATCH`. Only a
//! joined MASTER may trigger `CAPTURE_MOMENT` and only a joined SLAVE may send
//! `SLAVE_ACK`. Every rejection is reported to the sender twice, through the
//! ack result and a direct `ERROR` event, and has no other effect.

use crate::client_manager::{ClientHandle, DisconnectReason};
use crate::error::ProtocolError;
use crate::match_registry::MatchRegistry;
use crate::session::ConnectionSession;
use crate::utils::{Clock, SystemClock};
use log::{debug, info};
use serde_json::Value;
use shared::{
    latency_ms, relayed_timestamp, AckBody, AckResponse, CaptureBroadcast, CaptureMomentRequest,
    CaptureReceipt, ErrorEvent, JoinMatchRequest, JoinedMatch, Role, ServerFrame, SlaveAckBroadcast,
    SlaveAckReceipt, SlaveAckRequest, CAPTURE_ID_PREFIX, CAPTURE_MOMENT, ERROR, JOINED_MATCH,
    JOIN_MATCH, SLAVE_ACK,
};
use std::sync::Arc;

pub struct EventRouter {
    registry: Arc<MatchRegistry>,
    clock: Arc<dyn Clock>,
}

impl EventRouter {
    pub fn new(registry: Arc<MatchRegistry>) -> Self {
        Self::with_clock(registry, Arc::new(SystemClock))
    }

    pub fn with_clock(registry: Arc<MatchRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    pub fn registry(&self) -> &Arc<MatchRegistry> {
        &self.registry
    }

    /// Routes one inbound event
    ///
    /// When the frame carried an `ack` id the ack frame is queued first,
    /// followed by the direct `JOINED_MATCH` or `ERROR` event. Returns the ack
    /// result, or `None` for event names the protocol does not define (those
    /// are ignored and never acked).
    pub async fn dispatch(
        &self,
        handle: &Arc<ClientHandle>,
        session: &mut ConnectionSession,
        event: &str,
        payload: &Value,
        ack: Option<u64>,
    ) -> Option<AckResponse> {
        let result = match event {
            JOIN_MATCH => {
                self.join_match(handle, session, JoinMatchRequest::from_payload(payload))
                    .await
            }
            CAPTURE_MOMENT => {
                self.capture_moment(handle, session, CaptureMomentRequest::from_payload(payload))
                    .await
            }
            SLAVE_ACK => {
                self.slave_ack(handle, session, SlaveAckRequest::from_payload(payload))
                    .await
            }
            other => {
                debug!("Ignoring unknown event {} from {}", other, handle.id);
                return None;
            }
        };

        let response = match &result {
            Ok(body) => AckResponse::Ok(body.clone()),
            Err(e) => AckResponse::Err(e.to_string()),
        };
        if let Some(id) = ack {
            handle.send_frame(&ServerFrame::Ack {
                id,
                payload: response.clone(),
            });
        }

        match result {
            Ok(AckBody::Joined(joined)) => {
                handle.emit(JOINED_MATCH, &joined);
            }
            Ok(_) => {}
            Err(e) => self.reject(handle, &e),
        }
        Some(response)
    }

    /// Emits the direct `ERROR` event that accompanies every rejection
    fn reject(&self, handle: &ClientHandle, error: &ProtocolError) {
        debug!("Rejected event from {}: {}", handle.id, error);
        handle.emit(
            ERROR,
            &ErrorEvent {
                message: error.to_string(),
            },
        );
    }

    /// Joins (or re-joins) a match
    ///
    /// A connection that was already in a different match leaves that group
    /// first, so it never receives broadcasts from two matches. The
    /// `JOINED_MATCH` event is emitted by [`EventRouter::dispatch`].
    pub async fn join_match(
        &self,
        handle: &Arc<ClientHandle>,
        session: &mut ConnectionSession,
        request: JoinMatchRequest,
    ) -> Result<AckBody, ProtocolError> {
        let role = Role::parse(&request.role).ok_or(ProtocolError::InvalidJoin)?;
        if request.match_id.is_empty() {
            return Err(ProtocolError::InvalidJoin);
        }
        let match_id = request.match_id;

        if let Some(previous) = session.set(match_id.clone(), role) {
            if previous.match_id != match_id {
                self.registry.leave(&handle.id, &previous.match_id).await;
                info!(
                    "[match:{}] left id={} role={} (re-joined {})",
                    previous.match_id, handle.id, previous.role, match_id
                );
            }
        }
        self.registry.join(handle, &match_id).await;

        info!("[match:{}] joined id={} role={}", match_id, handle.id, role);

        Ok(AckBody::Joined(JoinedMatch {
            match_id,
            role,
            server_ts: self.clock.now_ms(),
        }))
    }

    /// Broadcasts a capture from a MASTER to the rest of its match
    pub async fn capture_moment(
        &self,
        handle: &Arc<ClientHandle>,
        session: &ConnectionSession,
        request: CaptureMomentRequest,
    ) -> Result<AckBody, ProtocolError> {
        let membership = session.get().ok_or(ProtocolError::NotJoined {
            event: CAPTURE_MOMENT,
        })?;
        if membership.role != Role::Master {
            return Err(ProtocolError::MasterOnly);
        }

        let server_ts = self.clock.now_ms();
        let capture_id = request
            .capture_id
            .unwrap_or_else(|| format!("{}{}", CAPTURE_ID_PREFIX, server_ts));

        let event = CaptureBroadcast {
            match_id: membership.match_id.clone(),
            capture_id: capture_id.clone(),
            server_ts,
            data: request.data,
            from: handle.id.clone(),
        };
        self.registry
            .broadcast_to_others(&membership.match_id, CAPTURE_MOMENT, &event, &handle.id)
            .await;

        info!(
            "[match:{}] CAPTURE_MOMENT captureId={}",
            membership.match_id, capture_id
        );

        Ok(AckBody::Captured(CaptureReceipt {
            capture_id,
            server_ts,
        }))
    }

    /// Relays a SLAVE's acknowledgement with the server-computed latency
    pub async fn slave_ack(
        &self,
        handle: &Arc<ClientHandle>,
        session: &ConnectionSession,
        request: SlaveAckRequest,
    ) -> Result<AckBody, ProtocolError> {
        let membership = session.get().ok_or(ProtocolError::NotJoined { event: SLAVE_ACK })?;
        if membership.role != Role::Slave {
            return Err(ProtocolError::SlaveOnly);
        }

        let server_ts = self.clock.now_ms();
        let latency = latency_ms(server_ts, request.capture_server_ts);

        info!(
            "[match:{}] SLAVE_ACK captureId={} slave={} latencyMs={}",
            membership.match_id,
            if request.capture_id.is_empty() {
                "-"
            } else {
                request.capture_id.as_str()
            },
            handle.id,
            latency.map_or_else(|| "null".to_string(), |l| l.to_string())
        );

        let event = SlaveAckBroadcast {
            match_id: membership.match_id.clone(),
            capture_id: request.capture_id,
            slave_id: handle.id.clone(),
            capture_server_ts: relayed_timestamp(request.capture_server_ts),
            client_ts: relayed_timestamp(request.client_ts),
            server_ts,
            latency_ms: latency,
        };
        self.registry
            .broadcast_to_others(&membership.match_id, SLAVE_ACK, &event, &handle.id)
            .await;

        Ok(AckBody::Acknowledged(SlaveAckReceipt {
            server_ts,
            latency_ms: latency,
        }))
    }

    /// Drops the connection from its match; peers are not notified
    pub async fn disconnect(
        &self,
        handle: &ClientHandle,
        session: &mut ConnectionSession,
        reason: DisconnectReason,
    ) {
        if let Some(membership) = session.clear() {
            self.registry.leave(&handle.id, &membership.match_id).await;
        }
        info!("[socket] disconnected id={} reason={}", handle.id, reason);
    }
}
