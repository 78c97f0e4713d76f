use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::config::{Ports, DEFAULT_BASE_PORT};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the server sockets to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Base port; the other ports are derived from it
    #[arg(short = 'p', long, default_value_t = DEFAULT_BASE_PORT)]
    port: u16,

    /// Tick duration in milliseconds
    #[arg(short = 't', long, default_value = "33")]
    tick_ms: u64,

    /// Seconds without input before a client is dropped
    #[arg(long, default_value = "5")]
    timeout_secs: u64,

    /// Arena map file, the built-in map is used when omitted
    #[arg(short = 'm', long)]
    map: Option<PathBuf>,

    /// Maximum number of simultaneous players
    #[arg(short = 'n', long, default_value = "16")]
    max_players: usize,

    /// Pause before batched guaranteed commands are sent, in milliseconds
    #[arg(long, default_value = "250")]
    reliable_delay_ms: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_address: args.host,
            ports: Ports::new(args.port),
            tick: Duration::from_millis(args.tick_ms),
            timeout: Duration::from_secs(args.timeout_secs),
            map_path: args.map,
            max_players: args.max_players,
            reliable_delay: Duration::from_millis(args.reliable_delay_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    info!(
        "Starting server on {} (base port {}, tick {:?}, timeout {:?})",
        config.bind_address,
        config.ports.base,
        config.tick,
        config.timeout
    );

    let mut server = Server::new(config).await?;
    server.run().await;

    Ok(())
}
