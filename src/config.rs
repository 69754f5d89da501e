//! Driver configuration.
//!
//! Settings are read from `kutti-vbox/config.toml` under the platform config
//! directory. A missing file means defaults; every field has one.

use crate::error::{Error, Result};
use crate::util::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application name for config and cache directories.
pub const APP_NAME: &str = "kutti-vbox";

/// Config file name inside the application config directory.
const CONFIG_FILE: &str = "config.toml";

/// Driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Configuration format version.
    pub version: u8,

    /// Explicit path to VBoxManage. Looked up on `PATH` when unset.
    pub vboxmanage_path: Option<PathBuf>,

    /// Directory that holds imported machines.
    pub machines_dir: Option<PathBuf>,

    /// Directory that holds cached images and the image list.
    pub cache_dir: Option<PathBuf>,

    /// Seconds to wait for the first guest property after starting a
    /// freshly imported machine.
    pub boot_wait_secs: u64,

    /// Retry policy for renaming a new machine.
    pub rename_retry: RetryConfig,

    /// Retry policy for discovering a new machine's IP address.
    pub ip_retry: RetryConfig,

    /// Guest account used for commands run inside machines.
    pub guest: GuestSettings,

    /// NAT network addressing.
    pub network: NetworkSettings,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            version: 1,
            vboxmanage_path: None,
            machines_dir: None,
            cache_dir: None,
            boot_wait_secs: 25,
            rename_retry: RetryConfig::for_boot(),
            ip_retry: RetryConfig::for_boot(),
            guest: GuestSettings::default(),
            network: NetworkSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Default location of the config file.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::ConfigLoad("could not determine config directory".into()))?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        config.network.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path().map_err(|e| Error::ConfigSave(e.to_string()))?)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::ConfigSave(e.to_string()))?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::ConfigSave(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| Error::ConfigSave(format!("{}: {}", path.display(), e)))
    }

    /// Directory for imported machines.
    ///
    /// On Linux: `~/.cache/kutti-vbox/driver-vbox-machines`
    pub fn machines_dir(&self) -> Result<PathBuf> {
        match &self.machines_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.cache_dir()?.join("driver-vbox-machines")),
        }
    }

    /// Directory for cached images.
    ///
    /// On Linux: `~/.cache/kutti-vbox`
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let base = dirs::cache_dir()
            .ok_or_else(|| Error::ConfigLoad("could not determine cache directory".into()))?;
        Ok(base.join(APP_NAME))
    }
}

/// Guest account and scripts baked into the kutti machine images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuestSettings {
    /// Guest user name.
    pub username: String,

    /// Guest password.
    pub password: String,
}

impl Default for GuestSettings {
    fn default() -> Self {
        Self {
            username: "kuttiadmin".to_string(),
            password: "Pass@word1".to_string(),
        }
    }
}

impl GuestSettings {
    /// Path of the hostname script inside the guest.
    pub fn rename_script(&self) -> String {
        format!("/home/{}/kutti-installscripts/set-hostname.sh", self.username)
    }
}

/// Addressing shared by every kutti NAT network.
///
/// Isolated NAT networks never bridge to each other, so all of them use the
/// same private range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkSettings {
    /// Network range.
    pub cidr: String,

    /// Leading octets every DHCP lease starts with.
    pub address_prefix: String,

    /// Address of the DHCP server.
    pub dhcp_address: String,

    /// Netmask handed to the DHCP server.
    pub dhcp_netmask: String,

    /// Last octet of the first leased address.
    pub host_base: u8,

    /// Number of addresses in the lease pool.
    pub lease_count: u8,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            cidr: "192.168.125.0/24".to_string(),
            address_prefix: "192.168.125".to_string(),
            dhcp_address: "192.168.125.3".to_string(),
            dhcp_netmask: "255.255.255.0".to_string(),
            host_base: 10,
            lease_count: 30,
        }
    }
}

impl NetworkSettings {
    /// First address of the lease pool.
    pub fn lower_ip(&self) -> String {
        format!("{}.{}", self.address_prefix, self.host_base)
    }

    /// Last address of the lease pool.
    ///
    /// Fails if the pool runs past `.254`.
    pub fn upper_ip(&self) -> Result<String> {
        let last = u16::from(self.host_base) + u16::from(self.lease_count.max(1)) - 1;
        if last > 254 {
            return Err(Error::InvalidConfig(format!(
                "lease pool {}.{} + {} addresses ends past {}.254",
                self.address_prefix, self.host_base, self.lease_count, self.address_prefix
            )));
        }
        Ok(format!("{}.{}", self.address_prefix, last))
    }

    /// Check that the lease pool fits in the network.
    pub fn validate(&self) -> Result<()> {
        self.upper_ip().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.boot_wait_secs, 25);
        assert_eq!(config.rename_retry.max_attempts, 3);
        assert_eq!(config.ip_retry.base_delay_secs, 10);
        assert_eq!(config.network.cidr, "192.168.125.0/24");
    }

    #[test]
    fn test_lease_pool_is_thirty_addresses() {
        let net = NetworkSettings::default();
        assert_eq!(net.lower_ip(), "192.168.125.10");
        assert_eq!(net.upper_ip().unwrap(), "192.168.125.39");
    }

    #[test]
    fn test_lease_pool_must_fit_in_last_octet() {
        let net = NetworkSettings {
            host_base: 225,
            ..Default::default()
        };
        assert_eq!(net.upper_ip().unwrap(), "192.168.125.254");

        let net = NetworkSettings {
            host_base: 250,
            ..Default::default()
        };
        assert!(matches!(net.upper_ip(), Err(Error::InvalidConfig(_))));
        assert!(net.validate().is_err());
    }

    #[test]
    fn test_out_of_range_lease_pool_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[network]\nhost_base = 250\n").unwrap();

        let err = DriverConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rename_script_path() {
        assert_eq!(
            GuestSettings::default().rename_script(),
            "/home/kuttiadmin/kutti-installscripts/set-hostname.sh"
        );
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DriverConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DriverConfig::default();
        config.boot_wait_secs = 40;
        config.vboxmanage_path = Some(PathBuf::from("/opt/vbox/VBoxManage"));
        config.save_to(&path).unwrap();

        let loaded = DriverConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
boot_wait_secs = 60

[guest]
username = "admin"
"#,
        )
        .unwrap();

        let config = DriverConfig::load_from(&path).unwrap();
        assert_eq!(config.boot_wait_secs, 60);
        assert_eq!(config.guest.username, "admin");
        assert_eq!(config.guest.password, "Pass@word1");
        assert_eq!(config.network, NetworkSettings::default());
    }

    #[test]
    fn test_invalid_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "boot_wait_secs = \"soon\"").unwrap();

        let err = DriverConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
    }

    #[test]
    fn test_explicit_dirs_win() {
        let config = DriverConfig {
            machines_dir: Some(PathBuf::from("/vms")),
            cache_dir: Some(PathBuf::from("/cache")),
            ..Default::default()
        };
        assert_eq!(config.machines_dir().unwrap(), PathBuf::from("/vms"));
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/cache"));
    }

    #[test]
    fn test_machines_dir_defaults_under_cache_dir() {
        let config = DriverConfig {
            cache_dir: Some(PathBuf::from("/cache")),
            ..Default::default()
        };
        assert_eq!(
            config.machines_dir().unwrap(),
            PathBuf::from("/cache/driver-vbox-machines")
        );
    }
}
