//! Bebida Broker - man-in-the-middle between Batsim and two schedulers.
//!
//! ```text
//! Batsim (REQ) ──> :28000 [bebida-broker] ──> :28001 System A (HPC, REP)
//!                                         └─> :28002 System B (BDA, REP)
//! ```
//!
//! Runs until the simulation ends; any protocol violation is fatal and
//! exits with status 1.

use anyhow::{Context, Result};
use bebida_core::{Broker, BrokerConfig, EpilogMode};
use bebida_env::{Endpoint, PeerId, ZmqRequester, ZmqResponder};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Bebida broker
#[derive(Parser, Debug)]
#[command(name = "bebida-broker")]
#[command(about = "Route Batsim events between an HPC and a BDA scheduler", long_about = None)]
struct Args {
    /// Interface the simulator connects to
    #[arg(long, default_value = "127.0.0.1")]
    sim_host: String,

    #[arg(long, default_value = "28000")]
    sim_port: u16,

    /// System A (HPC) scheduler
    #[arg(long, default_value = "127.0.0.1")]
    a_host: String,

    #[arg(long, default_value = "28001")]
    a_port: u16,

    /// System B (BDA) scheduler
    #[arg(long, default_value = "127.0.0.1")]
    b_host: String,

    #[arg(long, default_value = "28002")]
    b_port: u16,

    /// Epilog handling: blocking (wait for B) or immediate (legacy)
    #[arg(long, default_value = "blocking")]
    epilog: EpilogMode,

    /// Workload file suffix owned by System A
    #[arg(long, default_value = "_hpc.json")]
    a_suffix: String,

    /// Workload file suffix owned by System B
    #[arg(long, default_value = "_bda.json")]
    b_suffix: String,

    /// Verbose output (ignored when RUST_LOG is set)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    info!("Bebida broker v{}", env!("CARGO_PKG_VERSION"));

    let config = BrokerConfig::default()
        .with_epilog_mode(args.epilog)
        .with_suffixes(args.a_suffix, args.b_suffix);

    let context = zmq::Context::new();
    let simulator = ZmqResponder::bind(&context, PeerId::Simulator, &Endpoint::new(args.sim_host, args.sim_port))
        .context("Failed to open the simulator socket")?;
    let system_a = ZmqRequester::connect(&context, PeerId::SystemA, &Endpoint::new(args.a_host, args.a_port))
        .context("Failed to connect to System A")?;
    let system_b = ZmqRequester::connect(&context, PeerId::SystemB, &Endpoint::new(args.b_host, args.b_port))
        .context("Failed to connect to System B")?;

    match Broker::new(config, simulator, system_a, system_b).run().await {
        Ok(summary) => {
            info!(
                "Handoffs: {} prolog, {} epilog",
                summary.handoffs.prolog_releases, summary.handoffs.epilog_releases
            );
            Ok(())
        }
        Err(e) => {
            error!("Fatal: {}", e);
            std::process::exit(1);
        }
    }
}
