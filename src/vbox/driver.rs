//! The VirtualBox driver.

use super::listing::{self, MachineListing};
use super::locate;
use super::machine::{CreateError, Machine, MachineStatus};
use super::network::{self, Network};
use super::{
    qualified_machine_name, qualified_network_name, VBoxManage, DRIVER_DESCRIPTION, DRIVER_NAME,
};
use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::image::{Image, ImageCatalog, ImageSource};
use crate::runner::SystemRunner;
use crate::util::{retry_with_backoff, Sleeper, ThreadSleeper};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Whether the driver can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverStatus {
    /// VBoxManage found and supported.
    Ready,
    /// VBoxManage missing or unsupported; see [`Driver::error`].
    Error,
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverStatus::Ready => write!(f, "Ready"),
            DriverStatus::Error => write!(f, "Error"),
        }
    }
}

/// Kutti driver for VirtualBox.
///
/// Construction never fails. If VBoxManage cannot be used the driver reports
/// [`DriverStatus::Error`] and every operation returns
/// [`Error::DriverUnavailable`].
pub struct Driver {
    vbox: Option<VBoxManage>,
    error: Option<String>,
    config: DriverConfig,
    images: Arc<ImageCatalog>,
    image_source: Arc<dyn ImageSource>,
    sleeper: Arc<dyn Sleeper>,
}

impl Driver {
    /// Find VBoxManage on this host and check its version.
    pub fn detect(config: DriverConfig, images: Arc<ImageCatalog>) -> Self {
        let located = locate::find_vboxmanage(config.vboxmanage_path.as_deref())
            .map(|path| VBoxManage::new(path, Arc::new(SystemRunner)));
        Self::from_located(located, config, images)
    }

    /// Use a specific VBoxManage handle. The version is still checked.
    pub fn with_vboxmanage(
        vbox: VBoxManage,
        config: DriverConfig,
        images: Arc<ImageCatalog>,
    ) -> Self {
        Self::from_located(Ok(vbox), config, images)
    }

    /// Resolve image files through `source` instead of the catalog.
    ///
    /// The catalog still answers image queries.
    pub fn with_image_source(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.image_source = source;
        self
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn from_located(
        located: Result<VBoxManage>,
        config: DriverConfig,
        images: Arc<ImageCatalog>,
    ) -> Self {
        let checked = located.and_then(|vbox| {
            let output = vbox.run(&["--version"])?;
            let major = locate::check_version(&output)?;
            tracing::info!(
                path = %vbox.path().display(),
                version = %output.trim(),
                major,
                "VBoxManage ready"
            );
            Ok(vbox)
        });

        let (vbox, error) = match checked {
            Ok(vbox) => (Some(vbox), None),
            Err(e) => {
                tracing::warn!(error = %e, "VirtualBox driver unavailable");
                (None, Some(e.to_string()))
            }
        };

        Self {
            vbox,
            error,
            config,
            image_source: images.clone(),
            images,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Driver name.
    pub fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    /// Driver description.
    pub fn description(&self) -> &'static str {
        DRIVER_DESCRIPTION
    }

    /// Machines reach each other and the host through a NAT network.
    pub fn uses_nat_networking(&self) -> bool {
        true
    }

    /// Whether the driver can be used.
    pub fn status(&self) -> DriverStatus {
        if self.vbox.is_some() {
            DriverStatus::Ready
        } else {
            DriverStatus::Error
        }
    }

    /// Why the driver cannot be used, if it cannot.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The configuration this driver was built with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The VBoxManage handle, or why there is none.
    pub fn validate(&self) -> Result<&VBoxManage> {
        self.vbox.as_ref().ok_or_else(|| {
            Error::DriverUnavailable(
                self.error
                    .clone()
                    .unwrap_or_else(|| "VBoxManage not available".to_string()),
            )
        })
    }

    /// Name VirtualBox knows a cluster node by.
    pub fn qualified_machine_name(&self, machine_name: &str, cluster_name: &str) -> String {
        qualified_machine_name(machine_name, cluster_name)
    }

    /// Name VirtualBox knows a cluster network by.
    pub fn qualified_network_name(&self, cluster_name: &str) -> String {
        qualified_network_name(cluster_name)
    }

    // ----- networks -----

    /// All kutti NAT networks.
    pub fn list_networks(&self) -> Result<Vec<Network>> {
        network::list(self.validate()?)
    }

    /// The NAT network of a cluster.
    pub fn get_network(&self, cluster_name: &str) -> Result<Network> {
        network::get(self.validate()?, &qualified_network_name(cluster_name))
    }

    /// Create the NAT network of a cluster.
    pub fn new_network(&self, cluster_name: &str) -> Result<Network> {
        network::create(
            self.validate()?,
            &qualified_network_name(cluster_name),
            &self.config.network,
        )
    }

    /// Delete the NAT network of a cluster.
    pub fn delete_network(&self, cluster_name: &str) -> Result<()> {
        network::delete(self.validate()?, &qualified_network_name(cluster_name))
    }

    // ----- machines -----

    /// Every VM registered with VirtualBox, kutti or not.
    pub fn list_machines(&self) -> Result<Vec<MachineListing>> {
        let output = self.validate()?.run(&["list", "vms"])?;
        Ok(listing::parse_vm_list(&output))
    }

    /// Look up a machine and refresh its status.
    pub fn get_machine(&self, machine_name: &str, cluster_name: &str) -> Result<Machine> {
        let mut machine = self.machine_handle(machine_name, cluster_name)?;
        machine.refresh()?;
        Ok(machine)
    }

    /// Unregister a machine and delete its files.
    ///
    /// Runs `VBoxManage unregistervm <machine> --delete`. Deleting a machine
    /// that does not exist fails.
    pub fn delete_machine(&self, machine_name: &str, cluster_name: &str) -> Result<()> {
        let qname = qualified_machine_name(machine_name, cluster_name);
        tracing::info!(machine = %qname, "deleting machine");

        self.validate()?
            .run(&["unregistervm", qname.as_str(), "--delete"])
            .map(|_| ())
            .map_err(|e| e.context(format!("could not delete machine {}", machine_name)))
    }

    /// Create a cluster node from the image for `k8s_version`.
    ///
    /// The machine is imported, attached to the cluster network, booted once
    /// so the guest can take its hostname and a DHCP lease, then stopped.
    /// Failing to learn the lease is only logged; port forwarding will not
    /// work for such a machine.
    ///
    /// If the failure happens after import, the returned [`CreateError`]
    /// carries the machine, which then exists in VirtualBox.
    pub fn new_machine(
        &self,
        machine_name: &str,
        cluster_name: &str,
        k8s_version: &str,
    ) -> std::result::Result<Machine, CreateError> {
        let vbox = self.validate()?;
        let image = self.image_source.image_path(k8s_version)?;
        let base_folder = self.machine_base_folder()?;

        let qname = qualified_machine_name(machine_name, cluster_name);
        let network = qualified_network_name(cluster_name);
        let image_arg = image.display().to_string();
        let group_arg = format!("/{}", cluster_name);
        let base_arg = base_folder.display().to_string();

        tracing::info!(machine = %qname, image = %image_arg, "importing machine image");
        vbox.run(&[
            "import",
            image_arg.as_str(),
            "--vsys",
            "0",
            "--vmname",
            qname.as_str(),
            "--vsys",
            "0",
            "--group",
            group_arg.as_str(),
            "--vsys",
            "0",
            "--basefolder",
            base_arg.as_str(),
        ])
        .map_err(|e| e.context(format!("could not import image {}", image_arg)))?;

        let mut machine = Machine::new(
            vbox.clone(),
            self.config.guest.clone(),
            machine_name,
            cluster_name,
            MachineStatus::Unknown,
        );

        tracing::info!(machine = %qname, network = %network, "attaching machine to network");
        if let Err(e) = vbox.run(&[
            "modifyvm",
            qname.as_str(),
            "--nic1",
            "natnetwork",
            "--nat-network1",
            network.as_str(),
        ]) {
            let e = e.context(format!(
                "could not attach machine {} to network {}",
                machine_name, network
            ));
            machine.set_error(e.to_string());
            return Err(CreateError::with_machine(machine, e));
        }

        if let Err(e) = machine.start() {
            machine.set_error(e.to_string());
            return Err(CreateError::with_machine(machine, e));
        }

        if let Err(e) = machine.wait_for_state_change(self.config.boot_wait_secs) {
            tracing::warn!(machine = %qname, error = %e, "could not read machine state after boot");
        }

        let renamed = retry_with_backoff(
            &self.config.rename_retry,
            self.sleeper.as_ref(),
            "rename machine",
            |_| machine.rename(machine_name),
            |outcome| outcome.is_ok(),
        );
        if let Err(Err(e)) = renamed {
            let e = Error::RetriesExhausted {
                operation: format!("rename machine {}", machine_name),
                attempts: self.config.rename_retry.max_attempts.max(1),
                message: e.to_string(),
            };
            machine.set_error(e.to_string());
            return Err(CreateError::with_machine(machine, e));
        }

        let prefix = self.config.network.address_prefix.as_str();
        let discovered = retry_with_backoff(
            &self.config.ip_retry,
            self.sleeper.as_ref(),
            "fetch IP address",
            |_| machine.discover_ip(prefix),
            Option::is_some,
        );
        match discovered {
            Ok(Some(ip)) => {
                tracing::info!(machine = %qname, ip = %ip, "machine has an address");
                machine.save_ip_address(ip);
            }
            _ => {
                tracing::warn!(
                    machine = %qname,
                    "could not get IP address; port forwarding will not work for this machine"
                );
            }
        }

        if let Err(e) = machine.stop() {
            tracing::warn!(machine = %qname, error = %e, "could not stop machine after creation");
        }
        machine.set_status(MachineStatus::Stopped);

        tracing::info!(machine = %qname, "machine created");
        Ok(machine)
    }

    /// A handle to a machine without contacting VirtualBox.
    fn machine_handle(&self, machine_name: &str, cluster_name: &str) -> Result<Machine> {
        Ok(Machine::new(
            self.validate()?.clone(),
            self.config.guest.clone(),
            machine_name,
            cluster_name,
            MachineStatus::Unknown,
        ))
    }

    /// Absolute directory new machines are imported into.
    fn machine_base_folder(&self) -> Result<PathBuf> {
        let dir = self.config.machines_dir()?;
        std::fs::create_dir_all(&dir)?;
        Ok(std::path::absolute(&dir)?)
    }

    // ----- images -----

    /// The image catalog.
    pub fn images(&self) -> &ImageCatalog {
        &self.images
    }

    /// Whether an image exists for `k8s_version`.
    pub fn valid_k8s_version(&self, k8s_version: &str) -> bool {
        self.images.valid_k8s_version(k8s_version)
    }

    /// Kubernetes versions with an image.
    pub fn k8s_versions(&self) -> Vec<String> {
        self.images.k8s_versions()
    }

    /// All known images.
    pub fn list_images(&self) -> Vec<Image> {
        self.images.list()
    }

    /// The image for `k8s_version`.
    pub fn get_image(&self, k8s_version: &str) -> Result<Image> {
        self.images.get(k8s_version)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("vbox", &self.vbox)
            .field("error", &self.error)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
