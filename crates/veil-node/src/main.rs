//! Veil Node -- path control plane daemon and diagnostics.
//!
//! Usage:
//!   veil-node                                        # Run with default config
//!   veil-node --config path.toml run                 # Run with custom config
//!   veil-node decode 64313a41313a4c313a546934326565  # Decode a hex control frame
//!   veil-node encode-latency --nonce 42              # Encode a latency probe
//!   veil-node simulate --hops 4 --delay-ms 20        # Loopback latency simulation

use std::sync::Arc;

use clap::{Parser, Subcommand};
use veil_node::config::NodeConfig;
use veil_node::{expand_tilde, logging, parse_u64, simulate, Daemon};
use veil_protocol::{Message, PathLatencyMessage, Registry};

#[derive(Parser)]
#[command(name = "veil-node", about = "Veil path control plane node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.veil/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Run,
    /// Decode a hex-encoded control message and print it as JSON
    Decode {
        /// Encoded frame, hex
        frame: String,
    },
    /// Encode a latency message and print it as hex
    EncodeLatency {
        /// Probe nonce (decimal or 0x-hex)
        #[arg(long, value_parser = parse_u64)]
        nonce: u64,
        /// Measured latency; 0 encodes a probe
        #[arg(long, default_value_t = 0)]
        latency: u64,
    },
    /// Measure latency over an in-memory path
    Simulate {
        #[arg(long, default_value_t = 3)]
        hops: usize,
        /// Delay added per link traversal
        #[arg(long, default_value_t = 10)]
        delay_ms: u64,
        #[arg(long, default_value_t = 3)]
        probes: usize,
    },
    /// Print the effective config
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    tracing::dispatcher::set_global_default(logging::dispatch(&cfg.log)?)?;

    match cli.command {
        Some(Commands::Run) | None => {
            run_node(cfg).await?;
        }
        Some(Commands::Decode { frame }) => {
            let bytes = hex::decode(frame.trim())?;
            match Message::decode(&bytes, Registry::global()) {
                Ok(message) => println!("{}", serde_json::to_string_pretty(&message)?),
                Err(e) => anyhow::bail!("{} error: {e}", e.category().as_str()),
            }
        }
        Some(Commands::EncodeLatency { nonce, latency }) => {
            let message = Message::from(PathLatencyMessage {
                nonce,
                latency_ms: latency,
            });
            println!("{}", hex::encode(message.encode()?));
        }
        Some(Commands::Simulate {
            hops,
            delay_ms,
            probes,
        }) => {
            let report = simulate::run(hops, delay_ms, probes, cfg.path.to_path_config())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(Commands::Config) => {
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        node = %cfg.node.name,
        version = env!("CARGO_PKG_VERSION"),
        "starting veil-node"
    );

    let daemon = Arc::new(Daemon::new(cfg)?);
    let task = daemon.spawn(&tokio::runtime::Handle::current())?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    daemon.stop();
    task.await?;
    Ok(())
}
