//! Machine management commands.

use crate::cli::parsers::{parse_duration, parse_port, print_json, PortMapping};
use clap::{Args, Subcommand};
use kutti_vbox::vbox::{Driver, Machine, PredefinedCommand};
use kutti_vbox::Result;
use std::time::Duration;

/// Manage cluster machines
#[derive(Subcommand, Debug)]
pub enum MachineCmd {
    /// Create a machine from a Kubernetes image
    Create(CreateCmd),
    /// Start a machine
    Start(StartCmd),
    /// Stop a machine
    Stop(StopCmd),
    /// Show machine status
    Status(StatusCmd),
    /// List VirtualBox machines
    #[command(alias = "ls")]
    List(ListCmd),
    /// Delete a machine and its disks
    #[command(alias = "rm")]
    Delete(DeleteCmd),
    /// Forward a host port to a machine port
    Forward(ForwardCmd),
    /// Remove a forwarded port
    Unforward(UnforwardCmd),
    /// Forward a host port to the machine's SSH port
    ForwardSsh(ForwardSshCmd),
    /// Change the machine's hostname
    Rename(RenameCmd),
}

impl MachineCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        match self {
            MachineCmd::Create(cmd) => cmd.run(driver),
            MachineCmd::Start(cmd) => cmd.run(driver),
            MachineCmd::Stop(cmd) => cmd.run(driver),
            MachineCmd::Status(cmd) => cmd.run(driver),
            MachineCmd::List(cmd) => cmd.run(driver),
            MachineCmd::Delete(cmd) => cmd.run(driver),
            MachineCmd::Forward(cmd) => cmd.run(driver),
            MachineCmd::Unforward(cmd) => cmd.run(driver),
            MachineCmd::ForwardSsh(cmd) => cmd.run(driver),
            MachineCmd::Rename(cmd) => cmd.run(driver),
        }
    }
}

/// Which machine a command applies to.
#[derive(Args, Debug)]
pub struct MachineRef {
    /// Cluster the machine belongs to.
    #[arg(short, long)]
    pub cluster: String,

    /// Machine name within the cluster.
    pub name: String,
}

impl MachineRef {
    fn get(&self, driver: &Driver) -> Result<Machine> {
        driver.get_machine(&self.name, &self.cluster)
    }
}

fn machine_json(machine: &Machine) -> serde_json::Value {
    serde_json::json!({
        "name": machine.name(),
        "cluster": machine.cluster_name(),
        "qualified_name": machine.qualified_name(),
        "status": machine.status(),
        "error": machine.error_message(),
        "saved_ip_address": machine.saved_ip_address(),
        "ssh_address": machine.ssh_address(),
    })
}

/// Create a machine from a Kubernetes image
#[derive(Args, Debug)]
pub struct CreateCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// Kubernetes version of the image to use.
    #[arg(short = 'k', long = "k8s-version")]
    pub k8s_version: String,
}

impl CreateCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let MachineRef { cluster, name } = &self.machine;
        println!("Creating machine '{}' in cluster '{}'...", name, cluster);

        match driver.new_machine(name, cluster, &self.k8s_version) {
            Ok(machine) => {
                println!("Machine '{}' created ({})", name, machine.status());
                if let Some(ip) = machine.saved_ip_address() {
                    println!("  Address: {}", ip);
                }
                Ok(())
            }
            Err(e) => {
                let (machine, error) = e.into_parts();
                if let Some(machine) = machine {
                    eprintln!(
                        "Machine '{}' was left in VirtualBox with status {}",
                        machine.qualified_name(),
                        machine.status()
                    );
                }
                Err(error)
            }
        }
    }
}

/// Start a machine
#[derive(Args, Debug)]
pub struct StartCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// Wait this long for the guest to come up (e.g., "30s").
    #[arg(long, value_parser = parse_duration)]
    pub wait: Option<Duration>,
}

impl StartCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let mut machine = self.machine.get(driver)?;
        machine.start()?;

        match self.wait {
            Some(timeout) => {
                machine.wait_for_state_change(timeout.as_secs())?;
                println!("Machine '{}': {}", machine.name(), machine.status());
            }
            None => println!("Machine '{}' starting", machine.name()),
        }
        Ok(())
    }
}

/// Stop a machine
#[derive(Args, Debug)]
pub struct StopCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// Power off instead of asking the guest to shut down.
    #[arg(short, long)]
    pub force: bool,
}

impl StopCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let mut machine = self.machine.get(driver)?;
        if self.force {
            machine.force_stop()?;
            println!("Machine '{}' powered off", machine.name());
        } else {
            machine.stop()?;
            println!("Machine '{}' stopping", machine.name());
        }
        Ok(())
    }
}

/// Show machine status
#[derive(Args, Debug)]
pub struct StatusCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let machine = self.machine.get(driver)?;

        if self.json {
            return print_json(&machine_json(&machine));
        }

        println!("Machine '{}': {}", machine.qualified_name(), machine.status());
        if !machine.error_message().is_empty() {
            println!("  Error: {}", machine.error_message());
        }
        if let Some(ip) = machine.saved_ip_address() {
            println!("  Address: {}", ip);
        }
        if let Some(ssh) = machine.ssh_address() {
            println!("  SSH: {}", ssh);
        }
        Ok(())
    }
}

/// List VirtualBox machines
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Only show machines of this cluster.
    #[arg(short, long)]
    pub cluster: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let prefix = self.cluster.as_ref().map(|c| format!("{}-", c));
        let machines: Vec<_> = driver
            .list_machines()?
            .into_iter()
            .filter(|m| prefix.as_deref().map_or(true, |p| m.name.starts_with(p)))
            .collect();

        if self.json {
            let json: Vec<_> = machines
                .iter()
                .map(|m| serde_json::json!({ "name": m.name, "uuid": m.uuid }))
                .collect();
            return print_json(&json);
        }

        if machines.is_empty() {
            println!("No machines found");
            return Ok(());
        }

        println!("{:<30} {:<36}", "NAME", "UUID");
        println!("{}", "-".repeat(67));
        for m in machines {
            println!("{:<30} {:<36}", m.name, m.uuid);
        }
        Ok(())
    }
}

/// Delete a machine and its disks
#[derive(Args, Debug)]
pub struct DeleteCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// Delete without confirmation.
    #[arg(short, long)]
    pub force: bool,
}

impl DeleteCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let MachineRef { cluster, name } = &self.machine;
        let qname = driver.qualified_machine_name(name, cluster);

        if !self.force {
            eprint!("Delete machine '{}' and its disks? [y/N] ", qname);
            let mut input = String::new();
            if std::io::stdin().read_line(&mut input).is_err()
                || !matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
            {
                println!("Cancelled");
                return Ok(());
            }
        }

        driver.delete_machine(name, cluster)?;
        println!("Deleted machine '{}'", qname);
        Ok(())
    }
}

/// Forward a host port to a machine port
#[derive(Args, Debug)]
pub struct ForwardCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// Port mapping (HOST:GUEST or PORT).
    #[arg(short, long, value_parser = parse_port)]
    pub port: PortMapping,
}

impl ForwardCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let machine = self.machine.get(driver)?;
        machine.forward_port(self.port.host, self.port.guest)?;
        println!(
            "Forwarding localhost:{} to '{}' port {}",
            self.port.host,
            machine.name(),
            self.port.guest
        );
        Ok(())
    }
}

/// Remove a forwarded port
#[derive(Args, Debug)]
pub struct UnforwardCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// Guest port whose forwarding rule is removed.
    #[arg(short, long)]
    pub port: u16,
}

impl UnforwardCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let machine = self.machine.get(driver)?;
        machine.unforward_port(self.port)?;
        println!("Removed forwarding to '{}' port {}", machine.name(), self.port);
        Ok(())
    }
}

/// Forward a host port to the machine's SSH port
#[derive(Args, Debug)]
pub struct ForwardSshCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// Host port to forward.
    #[arg(short, long)]
    pub port: u16,
}

impl ForwardSshCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let machine = self.machine.get(driver)?;
        machine.forward_ssh_port(self.port)?;
        println!("SSH to '{}' at localhost:{}", machine.name(), self.port);
        Ok(())
    }
}

/// Change the machine's hostname
#[derive(Args, Debug)]
pub struct RenameCmd {
    #[command(flatten)]
    pub machine: MachineRef,

    /// New hostname.
    pub hostname: String,
}

impl RenameCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let machine = self.machine.get(driver)?;
        machine.execute_command(PredefinedCommand::RenameMachine, &[self.hostname.as_str()])?;
        println!("Renamed '{}' to {}", machine.name(), self.hostname);
        Ok(())
    }
}
