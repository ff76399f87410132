//! Shop customer behaviour.
//!
//! This module provides:
//! - The phase enum and its transition table
//! - The per-NPC state machine
//! - Collaborator traits for navigation, stock and the counter, with mocks

mod machine;
mod phase;
mod world;

pub use machine::{NpcError, NpcResult, NpcStateMachine};
pub use phase::{transition, NpcPhase, NpcTrigger, TRANSITIONS};
pub use world::{
    Counter, ItemSource, ItemTarget, MockCounter, MockItemSource, MockNavigator, MockShopWorld,
    NavStatus, Navigator, ShopWorld,
};
