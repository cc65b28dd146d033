use clap::Parser;
use log::info;
use server::config::{parse_origins, ServerConfig, DEFAULT_ALLOWED_ORIGINS};
use server::network::Server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Comma-separated list of browser origins allowed to connect
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = DEFAULT_ALLOWED_ORIGINS)]
    allowed_origins: String,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(short, long, default_value = "0")]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        allowed_origins: parse_origins(&args.allowed_origins),
        max_clients: args.max_clients,
        ..Default::default()
    };
    info!("Allowed origins: {:?}", config.allowed_origins);

    let server = Server::bind(config).await?;
    server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => {
                    log::error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    Ok(())
}
