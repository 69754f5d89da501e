//! Image catalog commands.

use crate::cli::parsers::print_json;
use clap::{Args, Subcommand};
use kutti_vbox::vbox::Driver;
use kutti_vbox::Result;

/// Inspect the machine image catalog
#[derive(Subcommand, Debug)]
pub enum ImageCmd {
    /// List known images
    #[command(alias = "ls")]
    List(ListCmd),
    /// Show one image and where it is cached
    Show(ShowCmd),
}

impl ImageCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        match self {
            ImageCmd::List(cmd) => cmd.run(driver),
            ImageCmd::Show(cmd) => cmd.run(driver),
        }
    }
}

/// List known images
#[derive(Args, Debug)]
pub struct ListCmd {
    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let images = driver.list_images();

        if self.json {
            return print_json(&images);
        }

        if images.is_empty() {
            println!("No images found");
            return Ok(());
        }

        println!("{:<12} {:<14} {:<10}", "K8S", "STATUS", "DEPRECATED");
        println!("{}", "-".repeat(38));
        for image in &images {
            println!(
                "{:<12} {:<14} {:<10}",
                image.k8s_version(),
                image.status().to_string(),
                if image.deprecated() { "yes" } else { "" }
            );
        }
        Ok(())
    }
}

/// Show one image and where it is cached
#[derive(Args, Debug)]
pub struct ShowCmd {
    /// Kubernetes version.
    pub k8s_version: String,
}

impl ShowCmd {
    pub fn run(self, driver: &Driver) -> Result<()> {
        let image = driver.get_image(&self.k8s_version)?;
        let path = driver.images().local_path(image.k8s_version());

        println!("K8s version: {}", image.k8s_version());
        println!("Status:      {}", image.status());
        println!("Deprecated:  {}", image.deprecated());
        println!("Checksum:    {}", image.image_checksum);
        println!("Source:      {}", image.image_source_url);
        println!("Local path:  {}", path.display());
        Ok(())
    }
}
