//! kutti-vbox CLI entry point.

use clap::{Parser, Subcommand};
use kutti_vbox::vbox::Driver;
use kutti_vbox::{DriverConfig, ImageCatalog};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod cli;

/// kutti-vbox - VirtualBox driver for kutti clusters
#[derive(Parser, Debug)]
#[command(name = "kutti-vbox")]
#[command(about = "VirtualBox driver for kutti clusters")]
#[command(version)]
struct Cli {
    /// Use this config file instead of the default one.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show driver status and configuration.
    #[command(subcommand)]
    Driver(cli::driver::DriverCmd),

    /// Manage cluster machines.
    #[command(subcommand, alias = "vm")]
    Machine(cli::machine::MachineCmd),

    /// Manage cluster NAT networks.
    #[command(subcommand, alias = "net")]
    Network(cli::network::NetworkCmd),

    /// Inspect the machine image catalog.
    #[command(subcommand)]
    Image(cli::image::ImageCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to info
    init_logging();

    tracing::debug!(version = kutti_vbox::VERSION, "starting kutti-vbox");

    let loaded = match &cli.config {
        Some(path) => DriverConfig::load_from(path),
        None => DriverConfig::load(),
    };
    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            DriverConfig::default()
        }
    };

    let result = match cli.command {
        Commands::Driver(cmd) => cmd.run(build_driver(config), cli.config.as_deref()),
        Commands::Machine(cmd) => cmd.run(&build_driver(config)),
        Commands::Network(cmd) => cmd.run(&build_driver(config)),
        Commands::Image(cmd) => cmd.run(&build_driver(config)),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Open the image catalog and detect VBoxManage.
fn build_driver(config: DriverConfig) -> Driver {
    let catalog = match config.cache_dir().and_then(|dir| ImageCatalog::open(dir)) {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load image list, starting empty");
            ImageCatalog::new(config.cache_dir().unwrap_or_default())
        }
    };
    Driver::detect(config, Arc::new(catalog))
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kutti_vbox=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
