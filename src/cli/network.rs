//! Network management commands.

use crate::cli::parsers::print_json;
use clap::{Args, Subcommand};
use kutti_vbox::vbox::Driver;
use kutti_vbox::Result;

/// Manage cluster NAT networks
#[derive(Subcommand, Debug)]
pub enum NetworkCmd {
    /// Create the NAT network of a cluster
    Create(CreateCmd),
    /// Delete the NAT network of a cluster
    #[command(alias = "rm")]
    Delete(DeleteCmd),
    /// Show the NAT network of a cluster
    Show(ShowCmd),
    /// List kutti NAT networks
    #[command(alias = "ls")]
    List(ListCmd),
}

impl NetworkCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        match self {
            NetworkCmd::Create(cmd) => cmd.run(driver),
            NetworkCmd::Delete(cmd) => cmd.run(driver),
            NetworkCmd::Show(cmd) => cmd.run(driver),
            NetworkCmd::List(cmd) => cmd.run(driver),
        }
    }
}

/// Create the NAT network of a cluster
#[derive(Args, Debug)]
pub struct CreateCmd {
    /// Cluster name.
    pub cluster: String,
}

impl CreateCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let network = driver.new_network(&self.cluster)?;
        println!("Created network '{}' ({})", network.name(), network.cidr());
        Ok(())
    }
}

/// Delete the NAT network of a cluster
#[derive(Args, Debug)]
pub struct DeleteCmd {
    /// Cluster name.
    pub cluster: String,
}

impl DeleteCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        driver.delete_network(&self.cluster)?;
        println!(
            "Deleted network '{}'",
            driver.qualified_network_name(&self.cluster)
        );
        Ok(())
    }
}

/// Show the NAT network of a cluster
#[derive(Args, Debug)]
pub struct ShowCmd {
    /// Cluster name.
    pub cluster: String,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ShowCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let network = driver.get_network(&self.cluster)?;
        if self.json {
            return print_json(&network);
        }
        println!("{} {}", network.name(), network.cidr());
        Ok(())
    }
}

/// List kutti NAT networks
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let networks = driver.list_networks()?;

        if self.json {
            return print_json(&networks);
        }

        if networks.is_empty() {
            println!("No networks found");
            return Ok(());
        }

        println!("{:<30} {:<18}", "NAME", "CIDR");
        println!("{}", "-".repeat(49));
        for network in &networks {
            println!("{:<30} {:<18}", network.name(), network.cidr());
        }
        Ok(())
    }
}
