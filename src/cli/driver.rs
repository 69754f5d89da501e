//! Driver commands.

use crate::cli::parsers::print_json;
use clap::{Args, Subcommand};
use kutti_vbox::vbox::Driver;
use kutti_vbox::{DriverConfig, Result};
use std::path::Path;

/// Driver commands
#[derive(Subcommand, Debug)]
pub enum DriverCmd {
    /// Show whether VirtualBox can be used
    Status(StatusCmd),

    /// Show the effective configuration
    Config(ConfigCmd),
}

impl DriverCmd {
    pub fn run(self, driver: Driver, config_path: Option<&Path>) -> Result<()> {
        match self {
            DriverCmd::Status(cmd) => cmd.run(&driver),
            DriverCmd::Config(cmd) => cmd.run(driver.config(), config_path),
        }
    }
}

/// Show whether VirtualBox can be used
#[derive(Args, Debug)]
pub struct StatusCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let vboxmanage = driver.validate().ok().map(|v| v.path().display().to_string());

        if self.json {
            return print_json(&serde_json::json!({
                "name": driver.name(),
                "description": driver.description(),
                "status": driver.status(),
                "error": driver.error(),
                "vboxmanage": vboxmanage,
                "uses_nat_networking": driver.uses_nat_networking(),
            }));
        }

        println!("Driver:      {}", driver.name());
        println!("Description: {}", driver.description());
        println!("Status:      {}", driver.status());
        if let Some(path) = vboxmanage {
            println!("VBoxManage:  {}", path);
        }
        if let Some(error) = driver.error() {
            println!("Error:       {}", error);
        }
        Ok(())
    }
}

/// Show the effective configuration
#[derive(Args, Debug)]
pub struct ConfigCmd {
    /// Write the effective configuration to the config file.
    #[arg(long)]
    pub save: bool,
}

impl ConfigCmd {
    pub fn run(self, config: &DriverConfig, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => DriverConfig::default_path()?,
        };

        if self.save {
            config.save_to(&path)?;
            println!("Saved configuration to {}", path.display());
            return Ok(());
        }

        let text = toml::to_string_pretty(config)
            .map_err(|e| kutti_vbox::Error::Serialization(e.to_string()))?;
        println!("# {}", path.display());
        println!("{}", text);
        Ok(())
    }
}
