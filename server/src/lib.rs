//! # Match Relay Server Library
//!
//! This library implements a real-time relay that pairs a MASTER and one or
//! more SLAVE connections inside a named match and forwards timestamped
//! capture and acknowledgement events between them, computing latency on the
//! server. It holds no durable state: everything lives as long as the
//! connections that created it.
//!
//! ## Protocol
//!
//! Clients speak JSON over a WebSocket (`/ws`). Each inbound frame names an
//! event and may carry an ack id:
//!
//! - `JOIN_MATCH {matchId, role}` places the connection in a match as MASTER
//!   or SLAVE (role is case-insensitive, stored uppercase).
//! - `CAPTURE_MOMENT {captureId?, data?}` (MASTER only) is broadcast to every
//!   other member of the match with the server timestamp.
//! - `SLAVE_ACK {captureId?, captureServerTs?, clientTs?}` (SLAVE only) is
//!   broadcast with `latencyMs = now - captureServerTs`, or `null` when the
//!   capture timestamp is unknown.
//!
//! Violations are answered with `{ok:false, error}` and a direct `ERROR`
//! event and have no other effect. Broadcasts never reach the sender.
//!
//! ## Module Organization
//!
//! ### Session (`session`)
//! Per-connection match id and role, owned by the connection task.
//!
//! ### Match Registry (`match_registry`)
//! One group per match id holding weak connection handles, with
//! broadcast-to-others delivery.
//!
//! ### Router (`router`)
//! The role-gated state machine behind the three inbound events.
//!
//! ### Client Manager (`client_manager`)
//! Connection admission, ids, capacity limits and ping-timeout tracking.
//!
//! ### Network (`network`)
//! The axum transport: `/health`, the `/ws` upgrade with origin checks, and
//! the reader/writer tasks of each connection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod match_registry;
pub mod network;
pub mod router;
pub mod session;
pub mod utils;
