//! # Shopfloor Engine
//!
//! Headless runner for the shop simulation.
//!
//! This crate provides:
//! - Simulation configuration loaded from `shopfloor.toml`
//! - The dialogue asset loader and registry
//! - A simulated store implementing the customer collaborators
//! - The fixed-tick simulation loop and its throughput report

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod dialogue_loader;
pub mod sim;
pub mod world;

pub use config::{SimConfig, CONFIG_FILE};
pub use dialogue_loader::{DialogueLoader, DialogueRegistry};
pub use sim::{SimReport, Simulation};
