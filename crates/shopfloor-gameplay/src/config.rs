//! Gameplay tunables for NPC behaviour and conversations.
//!
//! All structs deserialize with `#[serde(default)]` so partial config files
//! only need to name the values they change.

use serde::{Deserialize, Serialize};

/// Tunables for the NPC state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NpcConfig {
    /// Seconds an NPC lingers at an item before picking it up
    pub item_wait_secs: f32,
    /// Seconds between item source polls while idle
    pub idle_poll_secs: f32,
    /// Maximum number of items an NPC can carry at once
    pub max_items: u32,
    /// Retries after an unreachable destination before giving up
    pub navigation_retry_limit: u32,
    /// Seconds between placing consecutive items on the counter
    pub place_step_secs: f32,
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            item_wait_secs: 0.5,
            idle_poll_secs: 1.0,
            max_items: 3,
            navigation_retry_limit: 3,
            place_step_secs: 0.25,
        }
    }
}

impl NpcConfig {
    /// Validate and clamp values to sensible ranges.
    pub fn validate(&mut self) {
        self.item_wait_secs = self.item_wait_secs.clamp(0.0, 60.0);
        self.idle_poll_secs = self.idle_poll_secs.clamp(0.05, 60.0);
        self.max_items = self.max_items.clamp(1, 64);
        self.navigation_retry_limit = self.navigation_retry_limit.min(32);
        self.place_step_secs = self.place_step_secs.clamp(0.0, 10.0);
    }
}

/// What a dialogue engine does when a session starts while another is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeoverPolicy {
    /// Force-end the running session (logged) and start the new one.
    #[default]
    Replace,
    /// Refuse the new session.
    Reject,
}

/// Tunables for the conversation gate and dialogue engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Maximum requester distance for an automatic conversation
    pub trigger_radius: f32,
    /// Seconds between automatic eligibility checks
    pub check_interval_secs: f32,
    /// Transcript entries kept per session
    pub history_limit: usize,
    /// Behaviour when a session starts on a busy engine
    pub takeover: TakeoverPolicy,
    /// Label of the synthesized choice shown on terminal nodes
    pub close_label: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            trigger_radius: 3.0,
            check_interval_secs: 0.25,
            history_limit: 32,
            takeover: TakeoverPolicy::Replace,
            close_label: "Close".to_string(),
        }
    }
}

impl ConversationConfig {
    /// Validate and clamp values to sensible ranges.
    pub fn validate(&mut self) {
        self.trigger_radius = self.trigger_radius.clamp(0.0, 100.0);
        self.check_interval_secs = self.check_interval_secs.clamp(0.0, 10.0);
        self.history_limit = self.history_limit.clamp(1, 1024);
        if self.close_label.trim().is_empty() {
            self.close_label = "Close".to_string();
        }
    }
}
