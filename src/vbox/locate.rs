//! Finding VBoxManage and checking its version.

use super::MIN_MAJOR_VERSION;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Executable name searched for on `PATH`.
#[cfg(not(windows))]
pub const VBOXMANAGE_BINARY: &str = "VBoxManage";

/// Executable name searched for on `PATH`.
#[cfg(windows)]
pub const VBOXMANAGE_BINARY: &str = "VBoxManage.exe";

/// Locate the VBoxManage executable.
///
/// Tries, in order: the configured path, `PATH`, and the platform's default
/// install location.
pub fn find_vboxmanage(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured VBoxManage path does not exist");
    }

    if let Ok(path) = which::which(VBOXMANAGE_BINARY) {
        tracing::debug!(path = %path.display(), "found VBoxManage on PATH");
        return Ok(path);
    }

    if let Some(path) = default_install_path().filter(|p| p.is_file()) {
        tracing::debug!(path = %path.display(), "found VBoxManage in default location");
        return Ok(path);
    }

    Err(Error::DriverUnavailable(
        "VBoxManage not found. Please install VirtualBox 6.0 or above".to_string(),
    ))
}

/// Default install location on Windows, where VirtualBox does not add
/// itself to `PATH`.
#[cfg(windows)]
fn default_install_path() -> Option<PathBuf> {
    std::env::var_os("ProgramFiles").map(|dir| {
        PathBuf::from(dir)
            .join("Oracle")
            .join("VirtualBox")
            .join(VBOXMANAGE_BINARY)
    })
}

/// Default install location (none outside Windows).
#[cfg(not(windows))]
fn default_install_path() -> Option<PathBuf> {
    None
}

/// Major version from `VBoxManage --version` output, e.g. `6` from
/// `6.1.50r161033`.
pub fn parse_major_version(output: &str) -> Result<u32> {
    let text = output.trim();
    let major = text.split('.').next().unwrap_or_default();
    major.parse().map_err(|_| {
        Error::parse(
            "--version",
            format!("unrecognised version string '{}'", text),
        )
    })
}

/// Check that a `--version` output is a supported release.
pub fn check_version(output: &str) -> Result<u32> {
    let major = parse_major_version(output)?;
    if major < MIN_MAJOR_VERSION {
        return Err(Error::DriverUnavailable(format!(
            "unsupported VBoxManage version {}. {}.0 and above are supported",
            output.trim(),
            MIN_MAJOR_VERSION
        )));
    }
    Ok(major)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_version() {
        assert_eq!(parse_major_version("6.1.50r161033\n").unwrap(), 6);
        assert_eq!(parse_major_version("7.0.14r161095").unwrap(), 7);
        assert_eq!(parse_major_version("10.2").unwrap(), 10);
        assert!(parse_major_version("").is_err());
        assert!(parse_major_version("WARNING: kernel module missing").is_err());
    }

    #[test]
    fn test_check_version() {
        assert_eq!(check_version("6.0.8r130520").unwrap(), 6);
        assert_eq!(check_version("7.1.4r165100").unwrap(), 7);

        let err = check_version("5.2.44r139111\n").unwrap_err();
        assert!(matches!(err, Error::DriverUnavailable(_)));
        assert!(err.to_string().contains("5.2.44r139111"));
    }

    #[test]
    fn test_configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VBoxManage");
        std::fs::write(&path, "").unwrap();

        assert_eq!(find_vboxmanage(Some(path.as_path())).unwrap(), path);
    }

    #[test]
    fn test_missing_configured_path_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        match find_vboxmanage(Some(missing.as_path())) {
            Ok(found) => assert_ne!(found, missing),
            Err(e) => assert!(matches!(e, Error::DriverUnavailable(_))),
        }
    }
}
