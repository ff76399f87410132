//! # Shopfloor Gameplay
//!
//! Behavioural core of the shop simulation.
//!
//! This crate provides:
//! - Customer state machines (collect, deliver, wait for checkout, leave)
//! - Dialogue graphs, document loading and the dialogue engine
//! - Conversation gating (proximity, sight line, rotation of dialogues)
//! - The shop floor coordinator binding customers to dialogue sessions
//! - Event bus carrying the presentation events

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod events;
pub mod npc;
pub mod shop;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::*;
    pub use crate::conversation::*;
    pub use crate::dialogue::*;
    pub use crate::events::*;
    pub use crate::npc::*;
    pub use crate::shop::*;
}

pub use prelude::*;
