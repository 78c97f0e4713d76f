use clap::Parser;
use client::config::ClientConfig;
use client::input::ScriptedInput;
use client::network::Client;
use log::{error, info};
use shared::config::{Ports, DEFAULT_BASE_PORT};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: IpAddr,

    /// Server base port
    #[arg(short = 'p', long, default_value_t = DEFAULT_BASE_PORT)]
    port: u16,

    /// Frames per second
    #[arg(short = 'f', long, default_value = "60")]
    fps: u32,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short = 'd', long)]
    duration: Option<u64>,

    /// Seconds the bot drives in one direction before turning
    #[arg(long, default_value = "1.5")]
    leg_secs: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ClientConfig {
        server_address: args.server,
        ports: Ports::new(args.port),
        frame: Duration::from_secs_f64(1.0 / args.fps.max(1) as f64),
        ..ClientConfig::default()
    };

    info!(
        "Connecting to {} at {} fps",
        config.connect_address(),
        args.fps
    );
    let mut client = Client::connect(&config, ScriptedInput::new(args.leg_secs, 1.0)).await?;
    info!("Playing as player {}", client.game().player_id());

    let duration = args.duration;
    client
        .run_until(async move {
            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Cannot listen for Ctrl+C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        })
        .await;

    Ok(())
}
