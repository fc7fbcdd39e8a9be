/// Configuration command handlers
use anyhow::{Context, Result};
use presence_core::config::{Config, DATA_DIR_ENV};
use std::path::Path;

pub fn show_config(data_dir: &Path) -> Result<()> {
    let path = Config::path_in(data_dir);
    let config = Config::load(&path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

    if path.exists() {
        println!("# Loaded from {}", path.display());
    } else {
        println!("# {} not found; showing defaults", path.display());
    }
    println!("{rendered}");
    Ok(())
}

pub fn show_path(data_dir: &Path) {
    println!("Data directory: {}", data_dir.display());
    println!("Config file:    {}", Config::path_in(data_dir).display());
    println!("(Override the data directory with ${DATA_DIR_ENV})");
}
