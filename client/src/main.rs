use clap::Parser;
use client::latency::LatencyTracker;
use client::network::{RelayClient, RelayEvent};
use log::{error, info, warn};
use serde_json::json;
use shared::{get_timestamp, Role};
use std::time::Duration;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the relay server
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080/ws")]
    server: String,

    /// Match to join
    #[arg(short = 'm', long, default_value = "m1")]
    match_id: String,

    /// MASTER or SLAVE (case-insensitive)
    #[arg(short = 'r', long, default_value = "SLAVE", value_parser = parse_role)]
    role: Role,

    /// Milliseconds between captures when running as MASTER
    #[arg(short = 'i', long, default_value = "1000")]
    interval_ms: u64,

    /// Stop after this many captures or acks (0 = run forever)
    #[arg(short = 'c', long, default_value = "0")]
    count: u64,
}

fn parse_role(raw: &str) -> Result<Role, String> {
    Role::parse(raw).ok_or_else(|| format!("invalid role '{}', expected MASTER or SLAVE", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut relay = RelayClient::connect(&args.server).await?;

    let joined = relay.join_match(&args.match_id, args.role).await?;
    info!(
        "Joined match {} as {} (serverTs={})",
        joined.match_id, joined.role, joined.server_ts
    );

    let mut tracker = LatencyTracker::default();
    match args.role {
        Role::Master => run_master(&mut relay, &mut tracker, &args).await,
        Role::Slave => run_slave(&mut relay, &mut tracker, &args).await,
    }

    info!("{}", tracker.summary());
    if let Err(e) = relay.close().await {
        warn!("Error while closing connection: {}", e);
    }

    Ok(())
}

/// Triggers a capture every interval and records the latency each SLAVE reports
async fn run_master(relay: &mut RelayClient, tracker: &mut LatencyTracker, args: &Args) {
    let mut ticker = interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if args.count > 0 && sent >= args.count {
                    break;
                }
                sent += 1;

                match relay.capture_moment(None, json!({ "seq": sent })).await {
                    Ok(receipt) => info!("Captured {} at {}", receipt.capture_id, receipt.server_ts),
                    Err(e) => error!("Capture failed: {}", e),
                }
            }
            event = relay.next_event() => {
                match event {
                    Some(RelayEvent::SlaveAck(ack)) => {
                        info!(
                            "SLAVE {} acked {} latencyMs={:?}",
                            ack.slave_id, ack.capture_id, ack.latency_ms
                        );
                        tracker.record(&ack.capture_id, ack.latency_ms);
                    }
                    Some(RelayEvent::Error(err)) => warn!("Server error: {}", err.message),
                    Some(_) => {}
                    None => {
                        warn!("Connection closed by server");
                        break;
                    }
                }
            }
        }
    }
}

/// Acknowledges every capture the MASTER broadcasts
async fn run_slave(relay: &mut RelayClient, tracker: &mut LatencyTracker, args: &Args) {
    let mut acked = 0u64;

    while let Some(event) = relay.next_event().await {
        match event {
            RelayEvent::Capture(capture) => {
                match relay
                    .slave_ack(&capture.capture_id, capture.server_ts, get_timestamp())
                    .await
                {
                    Ok(receipt) => {
                        info!("Acked {} latencyMs={:?}", capture.capture_id, receipt.latency_ms);
                        tracker.record(&capture.capture_id, receipt.latency_ms);
                    }
                    Err(e) => error!("Ack failed: {}", e),
                }

                acked += 1;
                if acked % 10 == 0 {
                    info!("{}", tracker.summary());
                }
                if args.count > 0 && acked >= args.count {
                    return;
                }
            }
            RelayEvent::Error(err) => warn!("Server error: {}", err.message),
            _ => {}
        }
    }

    warn!("Connection closed by server");
}
