//! Cluster nodes as VirtualBox machines.
//!
//! A [`Machine`] is a view of one VirtualBox VM. VirtualBox is the source of
//! truth: the status held here is whatever the last [`Machine::refresh`]
//! inferred from the guest properties, and may be stale.

use super::properties::{
    self, PropertyEffect, PropertyListing, ENUMERATE_PATTERNS, IP_ADDRESS_PROPERTIES,
    PROP_IP_ADDRESS, PROP_LOGGED_IN_USERS, PROP_SAVED_IP_ADDRESS, PROP_SSH_ADDRESS,
};
use super::{qualified_machine_name, qualified_network_name, VBoxManage};
use crate::config::GuestSettings;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Guest port of the SSH daemon.
pub const SSH_PORT: u16 = 22;

/// Observed status of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MachineStatus {
    /// Not observed yet.
    #[default]
    Unknown,
    /// Registered, not running.
    Stopped,
    /// Booted, with a guest session.
    Running,
    /// Last operation failed; see [`Machine::error_message`].
    Error,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Unknown => write!(f, "Unknown"),
            MachineStatus::Stopped => write!(f, "Stopped"),
            MachineStatus::Running => write!(f, "Running"),
            MachineStatus::Error => write!(f, "Error"),
        }
    }
}

/// Commands a driver may optionally support on its machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredefinedCommand {
    /// Change the guest's hostname. Takes the new name as its only parameter.
    RenameMachine,
}

impl std::fmt::Display for PredefinedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredefinedCommand::RenameMachine => write!(f, "RenameMachine"),
        }
    }
}

impl std::str::FromStr for PredefinedCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RenameMachine" => Ok(PredefinedCommand::RenameMachine),
            other => Err(Error::CommandNotImplemented(other.to_string())),
        }
    }
}

/// A VirtualBox machine that is a node of a kutti cluster.
#[derive(Debug, Clone)]
pub struct Machine {
    vbox: VBoxManage,
    guest: GuestSettings,
    name: String,
    cluster_name: String,
    saved_ip_address: Option<String>,
    status: MachineStatus,
    error_message: Option<String>,
}

impl Machine {
    pub(crate) fn new(
        vbox: VBoxManage,
        guest: GuestSettings,
        name: impl Into<String>,
        cluster_name: impl Into<String>,
        status: MachineStatus,
    ) -> Self {
        Self {
            vbox,
            guest,
            name: name.into(),
            cluster_name: cluster_name.into(),
            saved_ip_address: None,
            status,
            error_message: None,
        }
    }

    /// Name of the machine within its cluster.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cluster the machine belongs to.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Name VirtualBox knows this machine by.
    pub fn qualified_name(&self) -> String {
        qualified_machine_name(&self.name, &self.cluster_name)
    }

    /// Name of the cluster's NAT network.
    pub fn network_name(&self) -> String {
        qualified_network_name(&self.cluster_name)
    }

    /// Last observed status.
    pub fn status(&self) -> MachineStatus {
        self.status
    }

    /// Error from the last failed operation. Empty unless status is Error.
    pub fn error_message(&self) -> &str {
        self.error_message.as_deref().unwrap_or_default()
    }

    pub(crate) fn set_status(&mut self, status: MachineStatus) {
        self.status = status;
        self.error_message = None;
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.status = MachineStatus::Error;
        self.error_message = Some(message.into());
    }

    /// Current address of the first network interface.
    ///
    /// Only available while the machine runs with guest additions.
    pub fn ip_address(&self) -> Option<String> {
        self.get_property(PROP_IP_ADDRESS)
    }

    /// `localhost:<port>` address to SSH into this machine, once the SSH
    /// port has been forwarded.
    pub fn ssh_address(&self) -> Option<String> {
        self.get_property(PROP_SSH_ADDRESS)
    }

    /// Address recorded when the machine was created.
    pub fn saved_ip_address(&self) -> Option<String> {
        self.saved_ip_address
            .clone()
            .or_else(|| self.get_property(PROP_SAVED_IP_ADDRESS))
    }

    /// Start the machine headless.
    ///
    /// Runs `VBoxManage startvm <machine> --type headless`. The machine is
    /// not ready when this returns and its status does not change; see
    /// [`Machine::wait_for_state_change`].
    pub fn start(&self) -> Result<()> {
        let qname = self.qualified_name();
        tracing::info!(machine = %qname, "starting machine");

        self.vbox
            .run(&["startvm", qname.as_str(), "--type", "headless"])
            .map(|_| ())
            .map_err(|e| self.failure("could not start the host", e))
    }

    /// Ask the guest to shut down.
    ///
    /// Runs `VBoxManage controlvm <machine> acpipowerbutton`. The status does
    /// not change; poll with [`Machine::refresh`].
    pub fn stop(&self) -> Result<()> {
        let qname = self.qualified_name();
        tracing::info!(machine = %qname, "stopping machine");

        self.vbox
            .run(&["controlvm", qname.as_str(), "acpipowerbutton"])
            .map_err(|e| self.failure("could not stop the host", e))?;

        self.clear_logged_in_users();
        Ok(())
    }

    /// Power the machine off immediately.
    ///
    /// Runs `VBoxManage controlvm <machine> poweroff` and marks the machine
    /// Stopped.
    pub fn force_stop(&mut self) -> Result<()> {
        let qname = self.qualified_name();
        tracing::info!(machine = %qname, "powering off machine");

        self.vbox
            .run(&["controlvm", qname.as_str(), "poweroff"])
            .map_err(|e| self.failure("could not force stop the host", e))?;

        self.clear_logged_in_users();
        self.set_status(MachineStatus::Stopped);
        Ok(())
    }

    /// Wait up to `timeout_secs` for the guest to log in a user, then refresh.
    ///
    /// Runs `VBoxManage guestproperty wait <machine>
    /// /VirtualBox/GuestInfo/OS/LoggedInUsers --timeout <ms> --fail-on-timeout`.
    /// Timing out is not an error; the refresh decides the status.
    pub fn wait_for_state_change(&mut self, timeout_secs: u64) -> Result<()> {
        let qname = self.qualified_name();
        let timeout_ms = timeout_secs.saturating_mul(1000).to_string();
        tracing::debug!(machine = %qname, timeout_secs, "waiting for state change");

        if let Err(e) = self.vbox.run(&[
            "guestproperty",
            "wait",
            qname.as_str(),
            PROP_LOGGED_IN_USERS,
            "--timeout",
            timeout_ms.as_str(),
            "--fail-on-timeout",
        ]) {
            tracing::debug!(machine = %qname, error = %e, "wait ended without change");
        }

        self.refresh()
    }

    /// Re-read the machine's guest properties and update its status.
    ///
    /// Runs `VBoxManage guestproperty enumerate <machine> --patterns ...`.
    pub fn refresh(&mut self) -> Result<()> {
        let qname = self.qualified_name();
        let output = self
            .vbox
            .run(&[
                "guestproperty",
                "enumerate",
                qname.as_str(),
                "--patterns",
                ENUMERATE_PATTERNS,
            ])
            .map_err(|e| {
                tracing::debug!(machine = %qname, error = %e, "property enumeration failed");
                Error::MachineNotFound(self.name.clone())
            })?;

        // Properties could be read, so the machine exists. Without a guest
        // session it is stopped.
        self.set_status(MachineStatus::Stopped);

        if !output.is_empty() {
            self.apply_properties(&output);
        }

        tracing::debug!(machine = %qname, status = %self.status, "refreshed");
        Ok(())
    }

    pub(crate) fn apply_properties(&mut self, output: &str) {
        match properties::parse_properties(output) {
            PropertyListing::Error(message) => self.set_error(message),
            PropertyListing::Records(records) => {
                for effect in properties::effects(&records) {
                    match effect {
                        PropertyEffect::Running => self.set_status(MachineStatus::Running),
                        PropertyEffect::SavedIp(ip) => {
                            self.saved_ip_address = Some(ip).filter(|ip| !ip.is_empty());
                        }
                    }
                }
            }
        }
    }

    fn forwarding_rule_name(&self, guest_port: u16) -> String {
        format!("Node {} Port {}", self.qualified_name(), guest_port)
    }

    /// Forward `host_port` on the host to `guest_port` on this machine.
    ///
    /// Runs `VBoxManage natnetwork modify --netname <network> --port-forward-4
    /// <rule>`, with a rule such as
    /// `Node c-node1 Port 80:tcp:[]:18080:[192.168.125.11]:80`.
    pub fn forward_port(&self, host_port: u16, guest_port: u16) -> Result<()> {
        let network = self.network_name();
        let ip = self.saved_ip_address().ok_or_else(|| {
            Error::machine(
                &self.name,
                "no saved IP address; the machine cannot be reached through the network",
            )
        })?;

        let rule = format!(
            "{}:tcp:[]:{}:[{}]:{}",
            self.forwarding_rule_name(guest_port),
            host_port,
            ip,
            guest_port
        );
        tracing::info!(machine = %self.name, network = %network, rule = %rule, "forwarding port");

        self.vbox
            .run(&[
                "natnetwork",
                "modify",
                "--netname",
                network.as_str(),
                "--port-forward-4",
                rule.as_str(),
            ])
            .map(|_| ())
            .map_err(|e| {
                self.failure(
                    &format!(
                        "could not create port forwarding rule {} on network {}",
                        rule, network
                    ),
                    e,
                )
            })
    }

    /// Remove the rule forwarding to `guest_port` on this machine.
    ///
    /// Runs `VBoxManage natnetwork modify --netname <network> --port-forward-4
    /// delete <rule name>`.
    pub fn unforward_port(&self, guest_port: u16) -> Result<()> {
        let network = self.network_name();
        let rule_name = self.forwarding_rule_name(guest_port);
        tracing::info!(machine = %self.name, network = %network, rule = %rule_name, "removing forwarded port");

        self.vbox
            .run(&[
                "natnetwork",
                "modify",
                "--netname",
                network.as_str(),
                "--port-forward-4",
                "delete",
                rule_name.as_str(),
            ])
            .map(|_| ())
            .map_err(|e| {
                self.failure(
                    &format!(
                        "could not remove port forwarding rule {} on network {}",
                        rule_name, network
                    ),
                    e,
                )
            })
    }

    /// Forward `host_port` to the guest's SSH port and record the resulting
    /// address as a guest property.
    pub fn forward_ssh_port(&self, host_port: u16) -> Result<()> {
        self.forward_port(host_port, SSH_PORT)?;

        let address = format!("localhost:{}", host_port);
        self.set_property(PROP_SSH_ADDRESS, &address)
    }

    /// Change the guest's hostname.
    ///
    /// Runs the hostname script inside the guest through `VBoxManage
    /// guestcontrol`. Needs a fully booted guest with guest additions.
    pub fn rename(&self, new_name: &str) -> Result<()> {
        let script = self.guest.rename_script();
        self.run_in_guest(&["/usr/bin/sudo", script.as_str(), new_name])
            .map(|_| ())
            .map_err(|e| self.failure(&format!("could not rename host to {}", new_name), e))
    }

    /// Whether this driver implements `command`.
    pub fn implements_command(&self, command: PredefinedCommand) -> bool {
        match command {
            PredefinedCommand::RenameMachine => true,
        }
    }

    /// Run a predefined command.
    pub fn execute_command(&self, command: PredefinedCommand, params: &[&str]) -> Result<()> {
        match command {
            PredefinedCommand::RenameMachine => {
                let new_name = params.first().ok_or_else(|| {
                    Error::machine(&self.name, "RenameMachine needs the new name")
                })?;
                self.rename(new_name)
            }
        }
    }

    /// Run a program inside the guest as the kutti user.
    ///
    /// Runs `VBoxManage guestcontrol <machine> --username <user> --password
    /// <password> run -- <program> <args...>`.
    fn run_in_guest(&self, command: &[&str]) -> Result<String> {
        let qname = self.qualified_name();
        let mut args = vec![
            "guestcontrol",
            qname.as_str(),
            "--username",
            self.guest.username.as_str(),
            "--password",
            self.guest.password.as_str(),
            "run",
            "--",
        ];
        args.extend_from_slice(command);
        self.vbox.run(args.as_slice())
    }

    /// Read a guest property. `None` if it is not set or cannot be read.
    pub(crate) fn get_property(&self, name: &str) -> Option<String> {
        let qname = self.qualified_name();
        match self.vbox.run(&["guestproperty", "get", qname.as_str(), name]) {
            Ok(output) => properties::parse_property_value(&output),
            Err(e) => {
                tracing::debug!(machine = %qname, property = name, error = %e, "could not read property");
                None
            }
        }
    }

    pub(crate) fn set_property(&self, name: &str, value: &str) -> Result<()> {
        let qname = self.qualified_name();
        self.vbox
            .run(&["guestproperty", "set", qname.as_str(), name, value])
            .map(|_| ())
            .map_err(|e| self.failure(&format!("could not set property {}", name), e))
    }

    pub(crate) fn unset_property(&self, name: &str) -> Result<()> {
        let qname = self.qualified_name();
        self.vbox
            .run(&["guestproperty", "unset", qname.as_str(), name])
            .map(|_| ())
            .map_err(|e| self.failure(&format!("could not unset property {}", name), e))
    }

    /// Drop the logged-in-users property so a refresh does not report
    /// Running before the next boot republishes it.
    fn clear_logged_in_users(&self) {
        if let Err(e) = self.unset_property(PROP_LOGGED_IN_USERS) {
            tracing::warn!(machine = %self.name, error = %e, "could not clear logged-in users");
        }
    }

    /// First interface address that is a lease from the cluster network.
    pub(crate) fn discover_ip(&self, prefix: &str) -> Option<String> {
        IP_ADDRESS_PROPERTIES.iter().find_map(|prop| {
            let value = self.get_property(prop);
            let accepted = value
                .as_deref()
                .is_some_and(|ip| properties::is_acceptable_ip(ip, prefix));
            tracing::debug!(machine = %self.name, property = prop, value = ?value, accepted, "checked interface address");
            value.filter(|_| accepted)
        })
    }

    /// Record `ip` in memory and as a guest property.
    pub(crate) fn save_ip_address(&mut self, ip: String) {
        if let Err(e) = self.set_property(PROP_SAVED_IP_ADDRESS, &ip) {
            tracing::warn!(machine = %self.name, error = %e, "could not persist IP address");
        }
        self.saved_ip_address = Some(ip);
    }

    /// Prefix an external-call failure with what was being done to this machine.
    fn failure(&self, context: &str, err: Error) -> Error {
        err.context(format!("{} '{}'", context, self.name))
    }
}

/// Machine creation failed, possibly after the machine was registered.
///
/// When [`CreateError::machine`] is `Some`, the machine exists in VirtualBox
/// and should be deleted by the caller if it is not wanted.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct CreateError {
    machine: Option<Box<Machine>>,
    #[source]
    source: Error,
}

impl CreateError {
    pub(crate) fn with_machine(machine: Machine, source: Error) -> Self {
        Self {
            machine: Some(Box::new(machine)),
            source,
        }
    }

    /// The partially created machine, if it got that far.
    pub fn machine(&self) -> Option<&Machine> {
        self.machine.as_deref()
    }

    /// The underlying error.
    pub fn error(&self) -> &Error {
        &self.source
    }

    /// Split into the partially created machine and the error.
    pub fn into_parts(self) -> (Option<Machine>, Error) {
        (self.machine.map(|m| *m), self.source)
    }
}

impl From<Error> for CreateError {
    fn from(source: Error) -> Self {
        Self {
            machine: None,
            source,
        }
    }
}
