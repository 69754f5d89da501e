//! kutti-vbox - VirtualBox driver for kutti clusters.
//!
//! Provisions cluster nodes as VirtualBox VMs and connects them through
//! per-cluster NAT networks, all by driving the `VBoxManage` tool.
//!
//! ```no_run
//! use kutti_vbox::{DriverConfig, ImageCatalog, vbox::Driver};
//! use std::sync::Arc;
//!
//! let config = DriverConfig::load()?;
//! let images = Arc::new(ImageCatalog::open(config.cache_dir()?)?);
//! let driver = Driver::detect(config, images);
//!
//! driver.new_network("zintakova")?;
//! let machine = driver.new_machine("node1", "zintakova", "1.32")?;
//! machine.start()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod image;
pub mod runner;
pub mod util;
pub mod vbox;

pub use config::DriverConfig;
pub use error::{Error, Result};
pub use image::{Image, ImageCatalog, ImageSource, ImageStatus};
pub use runner::{CommandRunner, SystemRunner};
pub use util::{retry_with_backoff, RetryConfig, Sleeper, ThreadSleeper};

/// Version of kutti-vbox.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
