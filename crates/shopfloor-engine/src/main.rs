//! # Shopfloor
//!
//! Runs the shop simulation headless and prints a throughput summary.
//!
//! Usage: `shopfloor [CONFIG]`, defaulting to `shopfloor.toml` in the
//! working directory. Log filtering follows `RUST_LOG`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use shopfloor_engine::{DialogueLoader, SimConfig, Simulation, CONFIG_FILE};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("shopfloor=info".parse()?))
        .init();

    info!("Shopfloor simulation starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
    let config = SimConfig::load_from(&config_path);

    let mut loader = DialogueLoader::new(&config.dialogue_dir);
    loader
        .load_all()
        .with_context(|| format!("loading dialogues from {}", config.dialogue_dir.display()))?;
    if loader.registry().is_empty() {
        warn!("No dialogues loaded, customers will stay quiet");
    }
    let sources = loader.into_registry().sources();

    let report = Simulation::new(config, sources).run();
    info!(
        served = report.served,
        stranded = report.stranded,
        elapsed = report.elapsed_secs,
        "Simulation finished"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
