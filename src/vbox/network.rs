//! Cluster NAT networks.
//!
//! A kutti network is a VirtualBox NAT network plus a DHCP server with the
//! same name. VirtualBox treats them as separate objects, so creating or
//! deleting a network takes two calls.

use super::{listing, VBoxManage};
use crate::config::NetworkSettings;
use crate::error::{Error, Result};
use serde::Serialize;

/// Pattern matching every kutti network name.
pub const NETWORK_NAME_PATTERN: &str = "*kuttinet";

/// A VirtualBox NAT network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Network {
    name: String,
    cidr: String,
}

impl Network {
    /// Create a network value.
    pub fn new(name: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cidr: cidr.into(),
        }
    }

    /// Qualified network name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// IPv4 range of the network.
    pub fn cidr(&self) -> &str {
        &self.cidr
    }
}

/// Create a NAT network and its DHCP server.
///
/// Runs:
/// ```text
/// VBoxManage natnetwork add --netname <name> --network <cidr> --enable --dhcp on
/// VBoxManage dhcpserver add --netname <name> --ip <dhcp> --netmask <mask> \
///     --lowerip <first> --upperip <last> --enable
/// ```
///
/// If the DHCP server cannot be created the NAT network is left behind;
/// deleting the network cleans up both.
pub(crate) fn create(vbox: &VBoxManage, name: &str, settings: &NetworkSettings) -> Result<Network> {
    let lower_ip = settings.lower_ip();
    let upper_ip = settings.upper_ip()?;
    tracing::info!(network = %name, cidr = %settings.cidr, "creating NAT network");

    vbox.run(&[
        "natnetwork",
        "add",
        "--netname",
        name,
        "--network",
        settings.cidr.as_str(),
        "--enable",
        "--dhcp",
        "on",
    ])
    .map_err(|e| e.context(format!("could not create NAT network {}", name)))?;

    vbox.run(&[
        "dhcpserver",
        "add",
        "--netname",
        name,
        "--ip",
        settings.dhcp_address.as_str(),
        "--netmask",
        settings.dhcp_netmask.as_str(),
        "--lowerip",
        lower_ip.as_str(),
        "--upperip",
        upper_ip.as_str(),
        "--enable",
    ])
    .map_err(|e| {
        tracing::warn!(network = %name, "NAT network created without DHCP server");
        e.context(format!("could not create DHCP server for network {}", name))
    })?;

    Ok(Network::new(name, settings.cidr.clone()))
}

/// Delete a NAT network and its DHCP server.
///
/// Both removals are always attempted, network first. The first failure is
/// returned.
pub(crate) fn delete(vbox: &VBoxManage, name: &str) -> Result<()> {
    tracing::info!(network = %name, "deleting NAT network");

    let network = vbox
        .run(&["natnetwork", "remove", "--netname", name])
        .map(|_| ())
        .map_err(|e| e.context(format!("could not delete NAT network {}", name)));

    let dhcp = vbox
        .run(&["dhcpserver", "remove", "--netname", name])
        .map(|_| ())
        .map_err(|e| e.context(format!("could not delete DHCP server {}", name)));

    if let Err(e) = &network {
        tracing::warn!(network = %name, error = %e, "NAT network removal failed");
    }
    if let Err(e) = &dhcp {
        tracing::warn!(network = %name, error = %e, "DHCP server removal failed");
    }

    network.and(dhcp)
}

/// List all kutti NAT networks.
pub(crate) fn list(vbox: &VBoxManage) -> Result<Vec<Network>> {
    let output = vbox.run(&["natnetwork", "list", NETWORK_NAME_PATTERN])?;
    listing::parse_network_list(&output)
}

/// Find a kutti NAT network by qualified name.
pub(crate) fn get(vbox: &VBoxManage, name: &str) -> Result<Network> {
    list(vbox)?
        .into_iter()
        .find(|n| n.name() == name)
        .ok_or_else(|| Error::NetworkNotFound(name.to_string()))
}
