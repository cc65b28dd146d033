//! # Match Relay Client Library
//!
//! Client-side counterpart of the relay server. A [`network::RelayClient`]
//! holds one WebSocket connection, correlates requests with their acks and
//! buffers the events the server pushes.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection handling, request/ack correlation and event decoding:
//! - `join_match`, `capture_moment` and `slave_ack` wait for the server ack
//! - `next_event` yields `JOINED_MATCH`, `CAPTURE_MOMENT`, `SLAVE_ACK` and
//!   `ERROR` pushes
//!
//! ### Latency Module (`latency`)
//! Rolling statistics over the `latencyMs` values the server reports.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{RelayClient, RelayEvent};
//! use shared::{get_timestamp, Role};
//!
//! # async fn run() -> Result<(), client::error::ClientError> {
//! let mut relay = RelayClient::connect("ws://127.0.0.1:8080/ws").await?;
//! relay.join_match("m1", Role::Slave).await?;
//!
//! while let Some(event) = relay.next_event().await {
//!     if let RelayEvent::Capture(capture) = event {
//!         let receipt = relay
//!             .slave_ack(&capture.capture_id, capture.server_ts, get_timestamp())
//!             .await?;
//!         println!("latency: {:?}", receipt.latency_ms);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod latency;
pub mod network;
