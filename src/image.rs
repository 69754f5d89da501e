//! Machine image catalog.
//!
//! Images are prebuilt `.ova` files, one per Kubernetes version. Fetching
//! and verifying them is handled elsewhere; this module only keeps the list
//! of known images and resolves where a downloaded image lives.
//!
//! The catalog is persisted as JSON in the same shape as the published
//! images list, keyed by Kubernetes version:
//!
//! ```json
//! {"1.32": {"ImageK8sVersion": "1.32", "ImageChecksum": "...",
//!           "ImageSourceURL": "...", "ImageStatus": "Downloaded"}}
//! ```

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the persisted catalog inside the cache directory.
pub const IMAGES_CONFIG_FILE: &str = "driver-vbox-images.json";

/// Download status of an image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ImageStatus {
    /// Only known from the images list.
    #[default]
    NotDownloaded,
    /// Present in the local cache.
    Downloaded,
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageStatus::NotDownloaded => write!(f, "NotDownloaded"),
            ImageStatus::Downloaded => write!(f, "Downloaded"),
        }
    }
}

/// A machine image for one Kubernetes version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Image {
    /// Kubernetes version installed in the image.
    pub image_k8s_version: String,

    /// Checksum of the `.ova` file.
    #[serde(default)]
    pub image_checksum: String,

    /// Where the image can be downloaded from.
    #[serde(default, rename = "ImageSourceURL")]
    pub image_source_url: String,

    /// Download status.
    #[serde(default)]
    pub image_status: ImageStatus,

    /// New machines should not be created from deprecated images.
    #[serde(default)]
    pub image_deprecated: bool,
}

impl Image {
    /// Create a not-yet-downloaded image entry.
    pub fn new(k8s_version: impl Into<String>) -> Self {
        Self {
            image_k8s_version: k8s_version.into(),
            image_checksum: String::new(),
            image_source_url: String::new(),
            image_status: ImageStatus::NotDownloaded,
            image_deprecated: false,
        }
    }

    /// Kubernetes version of this image.
    pub fn k8s_version(&self) -> &str {
        &self.image_k8s_version
    }

    /// Download status of this image.
    pub fn status(&self) -> ImageStatus {
        self.image_status
    }

    /// Whether this image's Kubernetes version is deprecated.
    pub fn deprecated(&self) -> bool {
        self.image_deprecated
    }
}

/// File name of the cached image for a Kubernetes version.
pub fn image_file_name(k8s_version: &str) -> String {
    format!("kutti-{}.ova", k8s_version)
}

/// Resolves the local file of a machine image.
pub trait ImageSource: Send + Sync {
    /// Path of the local image for `k8s_version`.
    ///
    /// Fails if the image is unknown or not present locally.
    fn image_path(&self, k8s_version: &str) -> Result<PathBuf>;
}

/// The list of known images, backed by a JSON file in the cache directory.
#[derive(Debug)]
pub struct ImageCatalog {
    cache_dir: PathBuf,
    images: RwLock<BTreeMap<String, Image>>,
}

impl ImageCatalog {
    /// Create an empty catalog rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            images: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a catalog and load it from disk.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let catalog = Self::new(cache_dir);
        catalog.load()?;
        Ok(catalog)
    }

    /// Path of the persisted catalog.
    pub fn config_path(&self) -> PathBuf {
        self.cache_dir.join(IMAGES_CONFIG_FILE)
    }

    /// Cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Replace the in-memory list with the persisted one.
    ///
    /// A missing file loads as an empty catalog.
    pub fn load(&self) -> Result<()> {
        let path = self.config_path();
        let loaded = if path.exists() {
            let data = std::fs::read(&path)
                .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;
            serde_json::from_slice::<BTreeMap<String, Image>>(&data)
                .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), count = loaded.len(), "loaded image list");
        *self.images.write() = loaded;
        Ok(())
    }

    /// Persist the in-memory list.
    pub fn save(&self) -> Result<()> {
        let path = self.config_path();
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| Error::ConfigSave(e.to_string()))?;
        let data = serde_json::to_vec_pretty(&*self.images.read())
            .map_err(|e| Error::ConfigSave(e.to_string()))?;
        std::fs::write(&path, data)
            .map_err(|e| Error::ConfigSave(format!("{}: {}", path.display(), e)))
    }

    /// Add or replace an image entry.
    pub fn insert(&self, image: Image) {
        self.images
            .write()
            .insert(image.image_k8s_version.clone(), image);
    }

    /// Look up the image for a Kubernetes version.
    pub fn get(&self, k8s_version: &str) -> Result<Image> {
        self.images
            .read()
            .get(k8s_version)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound(k8s_version.to_string()))
    }

    /// All known images, ordered by version string.
    pub fn list(&self) -> Vec<Image> {
        self.images.read().values().cloned().collect()
    }

    /// All known Kubernetes versions.
    pub fn k8s_versions(&self) -> Vec<String> {
        self.images.read().keys().cloned().collect()
    }

    /// Whether an image is known for `k8s_version`.
    pub fn valid_k8s_version(&self, k8s_version: &str) -> bool {
        self.images.read().contains_key(k8s_version)
    }

    /// Where the image for `k8s_version` is (or would be) cached.
    pub fn local_path(&self, k8s_version: &str) -> PathBuf {
        self.cache_dir.join(image_file_name(k8s_version))
    }
}

impl ImageSource for ImageCatalog {
    fn image_path(&self, k8s_version: &str) -> Result<PathBuf> {
        let image = self.get(k8s_version)?;
        let path = self.local_path(k8s_version);

        if image.status() != ImageStatus::Downloaded {
            return Err(Error::ImageUnavailable {
                path,
                reason: "image has not been downloaded".to_string(),
            });
        }

        if let Err(e) = std::fs::metadata(&path) {
            return Err(Error::ImageUnavailable {
                path,
                reason: e.to_string(),
            });
        }

        Ok(path)
    }
}
