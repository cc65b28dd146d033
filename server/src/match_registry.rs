//! Match groups and room-scoped broadcast
//!
//! One group per match id, each mapping connection ids to weak handles. The
//! registry never owns a connection: a handle whose connection has gone away
//! simply stops receiving, and the connection task removes itself on
//! disconnect.

use crate::client_manager::ClientHandle;
use log::{debug, warn};
use serde::Serialize;
use shared::ServerFrame;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

type Group = HashMap<String, Weak<ClientHandle>>;

/// Membership table shared by every connection task
#[derive(Default)]
pub struct MatchRegistry {
    matches: RwLock<HashMap<String, Group>>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection to the match group
    ///
    /// Idempotent per connection/match pair; returns true if the connection
    /// was not already a member.
    pub async fn join(&self, handle: &Arc<ClientHandle>, match_id: &str) -> bool {
        let mut matches = self.matches.write().await;
        matches
            .entry(match_id.to_string())
            .or_default()
            .insert(handle.id.clone(), Arc::downgrade(handle))
            .is_none()
    }

    /// Removes the connection from the match group, dropping empty groups
    pub async fn leave(&self, connection_id: &str, match_id: &str) -> bool {
        let mut matches = self.matches.write().await;
        let Some(group) = matches.get_mut(match_id) else {
            return false;
        };

        let removed = group.remove(connection_id).is_some();
        if group.is_empty() {
            matches.remove(match_id);
        }
        removed
    }

    /// Delivers an event to every member of the match except `exclude`
    ///
    /// The payload is serialized once. Returns the number of connections the
    /// frame was queued for; members whose connection is gone or whose send
    /// queue is full are skipped.
    pub async fn broadcast_to_others<T: Serialize>(
        &self,
        match_id: &str,
        event: &str,
        payload: &T,
        exclude: &str,
    ) -> usize {
        let text = match ServerFrame::event(event, payload).and_then(|f| serde_json::to_string(&f)) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize {} broadcast: {}", event, e);
                return 0;
            }
        };

        let recipients: Vec<Arc<ClientHandle>> = {
            let matches = self.matches.read().await;
            match matches.get(match_id) {
                Some(group) => group
                    .iter()
                    .filter(|(id, _)| id.as_str() != exclude)
                    .filter_map(|(_, handle)| handle.upgrade())
                    .collect(),
                None => Vec::new(),
            }
        };

        let delivered = recipients
            .iter()
            .filter(|handle| handle.send_text(text.clone()))
            .count();

        debug!(
            "[match:{}] broadcast {} to {}/{} peers",
            match_id,
            event,
            delivered,
            recipients.len()
        );
        delivered
    }

    /// Connection ids currently in the match
    pub async fn members(&self, match_id: &str) -> Vec<String> {
        let matches = self.matches.read().await;
        matches
            .get(match_id)
            .map(|group| group.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, match_id: &str) -> usize {
        let matches = self.matches.read().await;
        matches.get(match_id).map(HashMap::len).unwrap_or(0)
    }

    pub async fn match_count(&self) -> usize {
        self.matches.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn make_handle(id: &str) -> (Arc<ClientHandle>, mpsc::Receiver<String>) {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(ClientHandle::new(id.to_string(), addr, tx)), rx)
    }

    fn received_event(rx: &mut mpsc::Receiver<String>) -> Option<ServerFrame> {
        rx.try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).unwrap())
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let registry = MatchRegistry::new();
        let (a, _rx) = make_handle("a");

        assert!(registry.join(&a, "m1").await);
        assert!(!registry.join(&a, "m1").await);
        assert_eq!(registry.member_count("m1").await, 1);
        assert_eq!(registry.match_count().await, 1);
    }

    #[tokio::test]
    async fn test_leave_drops_empty_group() {
        let registry = MatchRegistry::new();
        let (a, _rxa) = make_handle("a");
        let (b, _rxb) = make_handle("b");
        registry.join(&a, "m1").await;
        registry.join(&b, "m1").await;

        assert!(registry.leave("a", "m1").await);
        assert_eq!(registry.members("m1").await, vec!["b".to_string()]);

        assert!(registry.leave("b", "m1").await);
        assert_eq!(registry.match_count().await, 0);
        assert!(!registry.leave("b", "m1").await);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = MatchRegistry::new();
        let (a, mut rxa) = make_handle("a");
        let (b, mut rxb) = make_handle("b");
        let (c, mut rxc) = make_handle("c");
        registry.join(&a, "m1").await;
        registry.join(&b, "m1").await;
        registry.join(&c, "m1").await;

        let delivered = registry
            .broadcast_to_others("m1", "CAPTURE_MOMENT", &json!({"captureId": "c1"}), "a")
            .await;

        assert_eq!(delivered, 2);
        assert!(received_event(&mut rxa).is_none());
        for rx in [&mut rxb, &mut rxc] {
            match received_event(rx) {
                Some(ServerFrame::Event { event, payload }) => {
                    assert_eq!(event, "CAPTURE_MOMENT");
                    assert_eq!(payload["captureId"], "c1");
                }
                other => panic!("Unexpected frame: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_is_scoped_to_match() {
        let registry = MatchRegistry::new();
        let (a, _rxa) = make_handle("a");
        let (b, mut rxb) = make_handle("b");
        registry.join(&a, "m1").await;
        registry.join(&b, "m2").await;

        let delivered = registry
            .broadcast_to_others("m1", "SLAVE_ACK", &json!({}), "a")
            .await;

        assert_eq!(delivered, 0);
        assert!(received_event(&mut rxb).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_match() {
        let registry = MatchRegistry::new();
        let delivered = registry
            .broadcast_to_others("nowhere", "SLAVE_ACK", &json!({}), "a")
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_skipped() {
        let registry = MatchRegistry::new();
        let (a, _rxa) = make_handle("a");
        let (b, rxb) = make_handle("b");
        registry.join(&a, "m1").await;
        registry.join(&b, "m1").await;

        drop(b);
        drop(rxb);

        let delivered = registry
            .broadcast_to_others("m1", "CAPTURE_MOMENT", &json!({}), "a")
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(registry.member_count("m1").await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_joins_and_broadcasts() {
        let registry = Arc::new(MatchRegistry::new());
        let mut tasks = Vec::new();
        let mut keep_alive = Vec::new();

        for i in 0..32 {
            let (handle, rx) = make_handle(&format!("c{}", i));
            keep_alive.push(rx);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.join(&handle, "m1").await;
                registry
                    .broadcast_to_others("m1", "CAPTURE_MOMENT", &json!({}), &handle.id)
                    .await;
                handle
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(registry.member_count("m1").await, 32);
    }
}
