//! Performance benchmarks for the relay hot paths

use serde_json::json;
use server::client_manager::ClientHandle;
use server::match_registry::MatchRegistry;
use server::router::EventRouter;
use server::session::ConnectionSession;
use shared::{
    CaptureMomentRequest, ClientFrame, SlaveAckRequest, CAPTURE_MOMENT, JOIN_MATCH, SLAVE_ACK,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

fn handle(id: &str, capacity: usize) -> (Arc<ClientHandle>, mpsc::Receiver<String>) {
    let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
    let (tx, rx) = mpsc::channel(capacity);
    (Arc::new(ClientHandle::new(id.to_string(), addr, tx)), rx)
}

/// Benchmarks payload coercion of inbound requests
#[test]
fn benchmark_payload_coercion() {
    let capture = json!({"captureId": 42, "data": {"frame": 7}});
    let ack = json!({"captureId": "c1", "captureServerTs": "1700000000000", "clientTs": 1.7e12});

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = CaptureMomentRequest::from_payload(&capture);
        let _ = SlaveAckRequest::from_payload(&ack);
    }

    let duration = start.elapsed();
    println!(
        "Payload coercion: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks decoding of client frames
#[test]
fn benchmark_frame_decoding() {
    let text = json!({
        "event": SLAVE_ACK,
        "payload": {"captureId": "c1", "captureServerTs": 1700000000000i64, "clientTs": 1700000000005i64},
        "ack": 12
    })
    .to_string();

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let frame: ClientFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.ack, Some(12));
    }

    let duration = start.elapsed();
    println!(
        "Frame decoding: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks broadcasting to a large match
#[tokio::test]
async fn benchmark_registry_broadcast() {
    let registry = MatchRegistry::new();
    let members = 100;
    let rounds = 100;

    let mut receivers = Vec::new();
    let mut handles = Vec::new();
    for i in 0..members {
        let (handle, rx) = handle(&format!("client{}", i), rounds + 1);
        registry.join(&handle, "bench").await;
        handles.push(handle);
        receivers.push(rx);
    }

    let payload = json!({"captureId": "c1", "serverTs": 1, "data": {"frame": 1}});
    let start = Instant::now();

    for _ in 0..rounds {
        let delivered = registry
            .broadcast_to_others("bench", CAPTURE_MOMENT, &payload, "client0")
            .await;
        assert_eq!(delivered, members - 1);
    }

    let duration = start.elapsed();
    println!(
        "Broadcast to {} members: {} rounds in {:?} ({:.2} μs/round)",
        members,
        rounds,
        duration,
        duration.as_micros() as f64 / rounds as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
    assert!(receivers[0].try_recv().is_err());
}

/// Benchmarks the full capture/acknowledge dispatch path
#[tokio::test]
async fn benchmark_router_dispatch() {
    let router = EventRouter::new(Arc::new(MatchRegistry::new()));
    let iterations = 10_000;

    let (master, mut master_rx) = handle("master", iterations * 2 + 8);
    let (slave, mut slave_rx) = handle("slave", iterations * 2 + 8);
    let mut master_session = ConnectionSession::new();
    let mut slave_session = ConnectionSession::new();

    router
        .dispatch(
            &master,
            &mut master_session,
            JOIN_MATCH,
            &json!({"matchId": "m1", "role": "MASTER"}),
            None,
        )
        .await;
    router
        .dispatch(
            &slave,
            &mut slave_session,
            JOIN_MATCH,
            &json!({"matchId": "m1", "role": "SLAVE"}),
            None,
        )
        .await;

    let capture = json!({"captureId": "c1", "data": {}});
    let ack = json!({"captureId": "c1", "captureServerTs": 1700000000000i64});
    let start = Instant::now();

    for _ in 0..iterations {
        let response = router
            .dispatch(&master, &mut master_session, CAPTURE_MOMENT, &capture, Some(1))
            .await;
        assert!(response.is_some_and(|r| r.is_ok()));

        let response = router
            .dispatch(&slave, &mut slave_session, SLAVE_ACK, &ack, Some(2))
            .await;
        assert!(response.is_some_and(|r| r.is_ok()));

        // Keep the queues from filling
        while master_rx.try_recv().is_ok() {}
        while slave_rx.try_recv().is_ok() {}
    }

    let duration = start.elapsed();
    println!(
        "Router dispatch: {} capture/ack pairs in {:?} ({:.2} μs/pair)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}
