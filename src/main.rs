//! Dobiss Gateway CLI Entry Point
//!
//! Lists the supported dialects, prints a sample configuration, or runs the
//! gateway against the in-process bus.
//!
//! ```bash
//! dobiss-gateway example > dobiss.toml
//! RUST_LOG=debug dobiss-gateway run dobiss.toml --dry-run
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dobiss_gateway::bus::MemoryBus;
use dobiss_gateway::core::metadata::get_protocol_registry;
use dobiss_gateway::gateway::{GatewayConfig, GatewayRuntime, ProtocolKind};

/// Dobiss Gateway - bridge Dobiss CAN programmers to Home Assistant
#[derive(Parser, Debug)]
#[command(name = "dobiss-gateway", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List supported interfaces
    ListProtocols,

    /// Print an example configuration
    Example {
        /// Interface to generate the example for
        #[arg(default_value = "AMBIANCEPRO")]
        interface: String,
    },

    /// Run the gateway
    Run {
        /// Path to the TOML configuration
        config: PathBuf,

        /// Use the in-memory simulator instead of the controller
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::ListProtocols => {
            list_protocols();
            ExitCode::SUCCESS
        }
        Commands::Example { interface } => generate_example(&interface),
        Commands::Run { config, dry_run } => {
            init_tracing();
            match run(config, dry_run).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "Gateway stopped");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn list_protocols() {
    let registry = get_protocol_registry();

    println!("Supported interfaces:");
    println!();

    for protocol in registry.protocols() {
        println!("  {} ({})", protocol.name, protocol.display_name);
        println!("    {}", protocol.description);
        println!("    Interfaces: {}", protocol.interfaces.join(", "));
        if !protocol.needs_controller {
            println!("    No controller needed");
        }
        for driver in &protocol.drivers {
            println!("    Driver: {}", driver.description);
            println!("    Parameters:");
            for param in &driver.parameters {
                let req = if param.required { " (required)" } else { "" };
                println!("      - {}{}: {}", param.name, req, param.description);
            }
        }
        println!();
    }

    println!("Generate a configuration with:");
    println!("  dobiss-gateway example <INTERFACE> > dobiss.toml");
}

fn generate_example(interface: &str) -> ExitCode {
    let kind = match ProtocolKind::from_interface(interface) {
        Ok(kind) => kind,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut config = GatewayConfig::example();
    config.dobiss.interface = interface.trim().to_ascii_uppercase();
    if !kind.needs_controller() {
        config.dobiss.host = None;
    }

    match config.to_toml_string() {
        Ok(toml) => {
            let name = get_protocol_registry()
                .find_by_interface(interface)
                .map(|p| p.display_name)
                .unwrap_or("Dobiss");
            println!("# Dobiss Gateway Configuration - {} Example", name);
            println!();
            println!("{}", toml);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(path: PathBuf, dry_run: bool) -> dobiss_gateway::Result<()> {
    let mut config = GatewayConfig::load(&path)?;
    if dry_run {
        info!("Dry run: using the simulator");
        config.dobiss.interface = "FAKE".to_string();
    }

    let bus = Arc::new(MemoryBus::new());
    let mut messages = bus.observe();
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(message) => info!(
                    topic = %message.topic,
                    retain = message.options.retain,
                    payload = %message.payload,
                    "Publish"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Publish log lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive, a dropped sender reads as shutdown
                warn!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    });

    info!(config = %path.display(), interface = %config.dobiss.interface, "Starting gateway");
    GatewayRuntime::new(config, bus).run(shutdown_rx).await
}
