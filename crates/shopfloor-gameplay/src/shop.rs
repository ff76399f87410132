//! Shop floor coordinator.
//!
//! Owns every customer's state machine and conversation gate, and binds each
//! customer to at most one dialogue session at a time. One tick visits every
//! customer once, in ID order.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shopfloor_common::NpcId;
use tracing::{debug, error, info, warn};

use crate::config::{ConversationConfig, NpcConfig};
use crate::conversation::{
    ConversationError, ConversationGate, ConversationResult, DialogueSource, Requester, SightLine,
};
use crate::dialogue::{ChoiceOutcome, ChoiceSelector, DialogueEngine, DialogueError, SessionId};
use crate::events::{DialogueEvent, EventBus, NpcEvent, Subscription};
use crate::npc::{Counter, ItemSource, Navigator, NpcError, NpcStateMachine, ShopWorld};

/// How dialogue engines are assigned to customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineSharing {
    /// One engine for the whole floor; a new conversation takes over the running one.
    #[default]
    Shared,
    /// One engine per customer; conversations can overlap.
    PerNpc,
}

/// Shop floor configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopFloorConfig {
    /// Customer tunables
    pub npc: NpcConfig,
    /// Conversation tunables
    pub conversation: ConversationConfig,
    /// Engine assignment
    pub sharing: EngineSharing,
}

impl ShopFloorConfig {
    /// Validate and clamp nested values.
    pub fn validate(&mut self) {
        self.npc.validate();
        self.conversation.validate();
    }
}

/// Running totals for the floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopStats {
    /// Customers spawned
    pub spawned: u64,
    /// Customers removed
    pub removed: u64,
    /// Navigation abandonments
    pub navigation_failures: u64,
    /// Checkouts accepted
    pub checkouts_accepted: u64,
    /// Checkouts ignored
    pub checkouts_rejected: u64,
    /// Conversations started
    pub conversations_started: u64,
    /// Conversations that failed to start
    pub conversation_failures: u64,
}

#[derive(Debug)]
struct Customer {
    machine: NpcStateMachine,
    gate: ConversationGate,
    /// Present only with [`EngineSharing::PerNpc`].
    engine: Option<DialogueEngine>,
    /// Forwards this customer's engine events to the floor bus.
    relay: Option<Subscription<DialogueEvent>>,
}

/// Every customer on the floor plus the dialogue engines they talk through.
#[derive(Debug)]
pub struct ShopFloor {
    config: ShopFloorConfig,
    sources: Vec<Arc<dyn DialogueSource>>,
    customers: BTreeMap<NpcId, Customer>,
    shared_engine: DialogueEngine,
    shared_relay: Subscription<DialogueEvent>,
    npc_events: EventBus<NpcEvent>,
    dialogue_events: EventBus<DialogueEvent>,
    stats: ShopStats,
}

impl ShopFloor {
    /// Create an empty floor.
    #[must_use]
    pub fn new(mut config: ShopFloorConfig, sources: Vec<Arc<dyn DialogueSource>>) -> Self {
        config.validate();
        let shared_engine = DialogueEngine::new(config.conversation.clone());
        let shared_relay = shared_engine.subscribe();
        Self {
            config,
            sources,
            customers: BTreeMap::new(),
            shared_engine,
            shared_relay,
            npc_events: EventBus::default(),
            dialogue_events: EventBus::default(),
            stats: ShopStats::default(),
        }
    }

    /// Floor configuration.
    #[must_use]
    pub fn config(&self) -> &ShopFloorConfig {
        &self.config
    }

    /// Running totals.
    #[must_use]
    pub const fn stats(&self) -> ShopStats {
        self.stats
    }

    /// Subscribe to customer events.
    #[must_use]
    pub fn subscribe_npc_events(&self) -> Subscription<NpcEvent> {
        self.npc_events.subscribe()
    }

    /// Subscribe to dialogue events from every engine on the floor.
    #[must_use]
    pub fn subscribe_dialogue(&self) -> Subscription<DialogueEvent> {
        self.dialogue_events.subscribe()
    }

    /// Number of customers on the floor.
    #[must_use]
    pub fn npc_count(&self) -> usize {
        self.customers.len()
    }

    /// Look up a customer.
    #[must_use]
    pub fn npc(&self, id: NpcId) -> Option<&NpcStateMachine> {
        self.customers.get(&id).map(|c| &c.machine)
    }

    /// Iterate customers in ID order.
    pub fn npcs(&self) -> impl Iterator<Item = &NpcStateMachine> {
        self.customers.values().map(|c| &c.machine)
    }

    /// Engine a customer talks through.
    #[must_use]
    pub fn engine_for(&self, id: NpcId) -> Option<&DialogueEngine> {
        let customer = self.customers.get(&id)?;
        Some(customer.engine.as_ref().unwrap_or(&self.shared_engine))
    }

    /// Session currently running for a customer.
    #[must_use]
    pub fn session_for(&self, id: NpcId) -> Option<SessionId> {
        let customer = self.customers.get(&id)?;
        let session = customer.gate.in_progress()?;
        let engine = customer.engine.as_ref().unwrap_or(&self.shared_engine);
        (engine.active_session() == Some(session)).then_some(session)
    }

    /// Add a customer wanting `wanted` items.
    pub fn spawn_npc(&mut self, wanted: u32) -> NpcId {
        let id = NpcId::new();
        let machine = NpcStateMachine::new(id, wanted, self.config.npc);
        let wanted = machine.wanted();
        let (engine, relay) = match self.config.sharing {
            EngineSharing::Shared => (None, None),
            EngineSharing::PerNpc => {
                let engine = DialogueEngine::new(self.config.conversation.clone());
                let relay = engine.subscribe();
                (Some(engine), Some(relay))
            },
        };
        let gate = ConversationGate::new(
            id,
            self.sources.clone(),
            self.config.conversation.clone(),
            engine.as_ref().unwrap_or(&self.shared_engine),
        );

        self.customers.insert(
            id,
            Customer {
                machine,
                gate,
                engine,
                relay,
            },
        );
        self.stats.spawned += 1;
        info!(npc = %id, wanted, "Customer spawned");
        id
    }

    /// Register-side checkout for one customer.
    pub fn trigger_checkout(&mut self, id: NpcId) -> bool {
        let accepted = match self.customers.get_mut(&id) {
            Some(customer) => customer.machine.trigger_checkout(&self.npc_events),
            None => {
                debug!(npc = %id, "Checkout for unknown customer ignored");
                false
            },
        };
        if accepted {
            self.stats.checkouts_accepted += 1;
        } else {
            self.stats.checkouts_rejected += 1;
        }
        accepted
    }

    /// Explicit conversation request from the UI or command layer.
    pub fn request_conversation(&mut self, id: NpcId) -> ConversationResult<SessionId> {
        let Self {
            customers,
            shared_engine,
            stats,
            ..
        } = self;
        let Some(customer) = customers.get_mut(&id) else {
            return Err(ConversationError::UnknownNpc(id));
        };
        let engine = customer.engine.as_mut().unwrap_or(shared_engine);
        let result = customer.gate.request(&customer.machine, engine);
        match &result {
            Ok(_) => stats.conversations_started += 1,
            Err(ConversationError::Load { .. } | ConversationError::Dialogue(_)) => {
                stats.conversation_failures += 1;
            },
            Err(_) => {},
        }
        self.relay_dialogue();
        result
    }

    /// Pick a choice in a customer's running conversation.
    pub fn choose_response(
        &mut self,
        id: NpcId,
        selector: impl Into<ChoiceSelector>,
    ) -> ConversationResult<ChoiceOutcome> {
        if !self.customers.contains_key(&id) {
            return Err(ConversationError::UnknownNpc(id));
        }
        if self.session_for(id).is_none() {
            return Err(DialogueError::NoActiveSession.into());
        }
        let engine = self.engine_mut(id).ok_or(ConversationError::UnknownNpc(id))?;
        let outcome = engine.choose_response(selector);
        self.relay_dialogue();
        outcome.map_err(ConversationError::from)
    }

    /// End a customer's running conversation.
    pub fn end_conversation(&mut self, id: NpcId) -> bool {
        let Self {
            customers,
            shared_engine,
            ..
        } = self;
        let ended = customers.get_mut(&id).is_some_and(|customer| {
            let engine = customer.engine.as_mut().unwrap_or(shared_engine);
            customer.gate.close(engine)
        });
        self.relay_dialogue();
        ended
    }

    /// Remove a customer, ending its conversation and dropping its subscriptions.
    pub fn remove_npc(&mut self, id: NpcId) -> bool {
        let Some(mut customer) = self.customers.remove(&id) else {
            return false;
        };
        let engine = customer.engine.as_mut().unwrap_or(&mut self.shared_engine);
        if customer.gate.close(engine) {
            debug!(npc = %id, "Conversation ended by removal");
        }
        if let Some(relay) = &customer.relay {
            for event in relay.drain() {
                self.dialogue_events.publish(event);
            }
        }
        self.relay_dialogue();

        self.npc_events.publish(NpcEvent::Removed { npc: id });
        self.stats.removed += 1;
        info!(npc = %id, phase = %customer.machine.phase(), "Customer removed");
        true
    }

    /// One global tick: step every customer, run the eligibility scan, then
    /// remove customers that have left. Returns the removed IDs.
    pub fn update<N, I, C, S>(
        &mut self,
        dt: f32,
        world: &mut ShopWorld<N, I, C>,
        requester: Option<&Requester>,
        sight: &S,
    ) -> Vec<NpcId>
    where
        N: Navigator,
        I: ItemSource,
        C: Counter,
        S: SightLine,
    {
        let Self {
            customers,
            shared_engine,
            npc_events,
            stats,
            ..
        } = self;

        for (id, customer) in customers.iter_mut() {
            match customer.machine.step(dt, world, npc_events) {
                Ok(()) => {},
                Err(NpcError::NavigationAbandoned { .. }) => stats.navigation_failures += 1,
                Err(e) => error!(npc = %id, error = %e, "Customer step failed"),
            }
        }

        for (id, customer) in customers.iter_mut() {
            let engine = customer.engine.as_mut().unwrap_or(&mut *shared_engine);
            let position = world.navigator.position_of(*id);
            match customer
                .gate
                .update(dt, &customer.machine, position, requester, sight, engine)
            {
                Ok(Some(_)) => stats.conversations_started += 1,
                Ok(None) => {},
                Err(e) => {
                    stats.conversation_failures += 1;
                    warn!(npc = %id, error = %e, "Automatic conversation failed");
                },
            }
        }

        let leaving: Vec<NpcId> = customers
            .values()
            .filter(|c| c.machine.is_terminal())
            .map(|c| c.machine.id())
            .collect();
        for id in &leaving {
            world.navigator.cancel(*id);
            self.remove_npc(*id);
        }

        self.relay_dialogue();
        leaving
    }

    fn engine_mut(&mut self, id: NpcId) -> Option<&mut DialogueEngine> {
        let customer = self.customers.get_mut(&id)?;
        Some(customer.engine.as_mut().unwrap_or(&mut self.shared_engine))
    }

    /// Forward engine events to floor subscribers.
    fn relay_dialogue(&mut self) {
        for event in self.shared_relay.drain() {
            self.dialogue_events.publish(event);
        }
        for customer in self.customers.values() {
            if let Some(relay) = &customer.relay {
                for event in relay.drain() {
                    self.dialogue_events.publish(event);
                }
            }
        }
    }
}
