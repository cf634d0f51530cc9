use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bebop_link::{connect, ConnectError, Connection, HandshakeClient, LinkConfig};
use bebop_protocol::frame::Frame;
use bebop_protocol::handshake::HandshakeResponse;

#[derive(Parser, Debug)]
#[command(name = "bebop", about = "Wi-Fi link to a Bebop-class drone")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config/bebop.toml", global = true)]
    config: PathBuf,

    /// Drone address (overrides the config file)
    #[arg(long, env = "BEBOP_DRONE", global = true)]
    drone: Option<IpAddr>,

    /// Local UDP port the drone sends to (overrides the config file)
    #[arg(long, global = true)]
    local_port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Perform the TCP handshake and print the negotiated ports
    Handshake,
    /// Handshake, then keep the link alive
    Run {
        /// Seconds to stay connected (0 = until Ctrl-C)
        #[arg(short, long, default_value_t = 5)]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = LinkConfig::load(&args.config)?;
    if let Some(drone) = args.drone {
        config.drone_address = drone;
    }
    if let Some(port) = args.local_port {
        config.local_port = port;
    }

    let duration = match args.command {
        Commands::Handshake => {
            let response = HandshakeClient::from_config(&config).handshake_or_status().await;
            if !response.is_success() {
                anyhow::bail!("Handshake failed (status {})", response.status);
            }
            print_ports(&response);
            return Ok(());
        }
        Commands::Run { duration } => duration,
    };

    let (frames_tx, frames_rx) = mpsc::channel(256);
    let Connection { response, mut link } =
        match connect(&config, Some(frames_tx), CancellationToken::new()).await {
            Ok(connection) => connection,
            Err(ConnectError::Handshake(e)) => {
                anyhow::bail!("Handshake failed (status {}): {}", e.status(), e)
            }
            Err(e) => return Err(e.into()),
        };
    print_ports(&response);
    let drain_handle = tokio::spawn(drain_frames(frames_rx));

    info!(remote = %link.remote(), "Link up");

    if duration == 0 {
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
            r = tokio::signal::ctrl_c() => r?,
        }
    }

    info!("Disconnecting...");
    let outcome = link.stop().await;
    drain_handle.abort();

    let stats = link.stats();
    println!();
    println!("Link");
    println!("══════════════════════════════");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Err(e) = outcome {
        warn!(error = %e, "Link ended with an error");
        return Err(e.into());
    }
    Ok(())
}

fn print_ports(response: &HandshakeResponse) {
    println!("Handshake");
    println!("══════════════════════════════");
    println!("  C2D port:        {}", response.c2d_port);
    println!("  Update port:     {}", response.c2d_update_port);
    println!("  User port:       {}", response.c2d_user_port);
    println!("  QoS mode:        {}", response.qos_mode);
    println!("  Stream port:     {}", response.stream_port);
    println!("  Control port:    {}", response.stream_control_port);
}

/// Stand-in for higher-level handling: log each routed frame.
async fn drain_frames(mut frames: mpsc::Receiver<Frame>) {
    while let Some(frame) = frames.recv().await {
        debug!(
            buffer_id = frame.buffer_id,
            data_type = frame.data_type,
            seq = frame.sequence_id,
            bytes = frame.payload.len(),
            "Frame from drone"
        );
    }
}
