//! Simulation configuration.
//!
//! Provides the customer flow, timing and world layout parameters of a
//! headless run, plus the gameplay tunables passed down to the shop floor.
//! Configuration can be loaded from and saved to a TOML file.

use serde::{Deserialize, Serialize};
use shopfloor_gameplay::{ConversationConfig, EngineSharing, NpcConfig, ShopFloorConfig};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dialogue_loader::DEFAULT_DIALOGUE_PATH;

/// Configuration file name.
pub const CONFIG_FILE: &str = "shopfloor.toml";

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    // === Customer Flow ===
    /// Customers to spawn over the whole run
    pub customers: u32,
    /// Seconds between spawns
    pub spawn_interval_secs: f32,
    /// Maximum customers on the floor at once
    pub max_concurrent: u32,
    /// Upper bound of items a single customer wants
    pub items_per_customer: u32,

    // === World Layout ===
    /// Items stocked on the shelves
    pub stock: u32,
    /// Items placed in an aisle the navigator cannot reach
    pub blocked_items: u32,
    /// Slots on the counter
    pub counter_slots: u16,
    /// Customer walking speed in units per second
    pub walk_speed: f32,
    /// Player walking speed in units per second
    pub player_walk_speed: f32,

    // === Register ===
    /// Seconds a customer waits at the counter before the register checks them out
    pub checkout_delay_secs: f32,

    // === Timing ===
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Stop after this many simulated seconds
    pub max_sim_secs: f32,

    // === Dialogue ===
    /// Directory scanned for dialogue documents
    pub dialogue_dir: PathBuf,
    /// Choices the simulated player makes before walking away from a conversation
    pub max_dialogue_choices: u32,

    // === Randomness ===
    /// RNG seed (None = random)
    pub seed: Option<u64>,

    // === Gameplay ===
    /// Dialogue engine assignment
    pub sharing: EngineSharing,
    /// Customer tunables
    pub npc: NpcConfig,
    /// Conversation tunables
    pub conversation: ConversationConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            // Customer flow
            customers: 12,
            spawn_interval_secs: 2.0,
            max_concurrent: 6,
            items_per_customer: 3,

            // World
            stock: 48,
            blocked_items: 0,
            counter_slots: 6,
            walk_speed: 2.5,
            player_walk_speed: 1.5,

            // Register
            checkout_delay_secs: 3.0,

            // Timing
            tick_rate: 20,
            max_sim_secs: 600.0,

            // Dialogue
            dialogue_dir: PathBuf::from(DEFAULT_DIALOGUE_PATH),
            max_dialogue_choices: 8,

            seed: None,

            sharing: EngineSharing::Shared,
            npc: NpcConfig::default(),
            conversation: ConversationConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read config file: {e}");
                return Self::default();
            },
        };

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.customers = self.customers.min(10_000);
        self.spawn_interval_secs = self.spawn_interval_secs.clamp(0.0, 600.0);
        self.max_concurrent = self.max_concurrent.clamp(1, 1_000);
        self.items_per_customer = self.items_per_customer.clamp(1, 64);

        self.blocked_items = self.blocked_items.min(self.stock);
        self.counter_slots = self.counter_slots.max(1);
        self.walk_speed = self.walk_speed.clamp(0.1, 50.0);
        self.player_walk_speed = self.player_walk_speed.clamp(0.1, 50.0);

        self.checkout_delay_secs = self.checkout_delay_secs.clamp(0.0, 600.0);
        self.tick_rate = self.tick_rate.clamp(1, 240);
        self.max_sim_secs = self.max_sim_secs.clamp(1.0, 86_400.0);

        self.npc.validate();
        self.conversation.validate();
    }

    /// Seconds per tick.
    #[must_use]
    pub fn tick_secs(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Gameplay configuration for the shop floor.
    #[must_use]
    pub fn shop_config(&self) -> ShopFloorConfig {
        ShopFloorConfig {
            npc: self.npc,
            conversation: self.conversation.clone(),
            sharing: self.sharing,
        }
    }
}
