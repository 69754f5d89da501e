//! VirtualBox driver.
//!
//! Everything here talks to VirtualBox through the `VBoxManage` tool:
//! - [`Driver`]: entry point, owns configuration and the image source
//! - [`Machine`]: one cluster node (a VirtualBox VM)
//! - [`Network`]: one cluster NAT network plus its DHCP server
//!
//! Machine state is inferred from guest properties published by the
//! VirtualBox guest additions, see [`properties`].

pub mod driver;
pub mod listing;
pub mod locate;
pub mod machine;
pub mod network;
pub mod properties;

use crate::error::Result;
use crate::runner::CommandRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use driver::{Driver, DriverStatus};
pub use listing::MachineListing;
pub use machine::{CreateError, Machine, MachineStatus, PredefinedCommand};
pub use network::Network;

/// Name of this driver.
pub const DRIVER_NAME: &str = "vbox";

/// Human-readable description of this driver.
pub const DRIVER_DESCRIPTION: &str = "Kutti driver for VirtualBox >=6.0";

/// Suffix appended to a cluster name to form its network name.
pub const NETWORK_NAME_SUFFIX: &str = "kuttinet";

/// Oldest supported VBoxManage major version.
pub const MIN_MAJOR_VERSION: u32 = 6;

/// Handle to the VBoxManage tool.
///
/// Cheap to clone; machines keep one so they can act on their own.
#[derive(Clone)]
pub struct VBoxManage {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl VBoxManage {
    /// Create a handle for the tool at `path`.
    pub fn new(path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }

    /// Path of the VBoxManage executable.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run VBoxManage with `args`.
    pub fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.runner.run(&self.path, &args)
    }
}

impl std::fmt::Debug for VBoxManage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VBoxManage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Name VirtualBox knows a cluster node by: `<cluster>-<machine>`.
pub fn qualified_machine_name(machine_name: &str, cluster_name: &str) -> String {
    format!("{}-{}", cluster_name, machine_name)
}

/// Name VirtualBox knows a cluster network by: `<cluster>kuttinet`.
pub fn qualified_network_name(cluster_name: &str) -> String {
    format!("{}{}", cluster_name, NETWORK_NAME_SUFFIX)
}

/// Strip one pair of surrounding double quotes.
pub(crate) fn trim_quotes(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
}

#[cfg(test)]
pub(crate) mod fake;
