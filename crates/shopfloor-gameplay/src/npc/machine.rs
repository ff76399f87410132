//! Per-customer state machine.
//!
//! Every phase change goes through [`transition`], so the table in
//! [`super::phase`] is the single source of truth. Waiting on the navigator or
//! a timer never blocks: [`NpcStateMachine::step`] returns and the NPC resumes
//! on a later tick.

use std::collections::VecDeque;

use shopfloor_common::{ItemId, NpcId, WorldPos};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::phase::{transition, NpcPhase, NpcTrigger};
use super::world::{Counter, ItemSource, ItemTarget, NavStatus, Navigator, ShopWorld};
use crate::config::NpcConfig;
use crate::events::{EventBus, NpcEvent};

/// Upper bound on instant transitions resolved within one step.
const MAX_TRANSITIONS_PER_STEP: usize = 16;

/// Error types for NPC operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NpcError {
    /// NPC not found
    #[error("NPC not found: {0}")]
    NotFound(NpcId),
    /// Navigation retries exhausted; the NPC fell back
    #[error("{npc} abandoned navigation while {phase} after {attempts} attempts")]
    NavigationAbandoned {
        /// NPC ID
        npc: NpcId,
        /// Phase the NPC was travelling in
        phase: NpcPhase,
        /// Attempts made, including the first request
        attempts: u32,
    },
    /// The transition table has no edge for this trigger
    #[error("{npc} has no transition from {phase} on {trigger:?}")]
    InvalidTransition {
        /// NPC ID
        npc: NpcId,
        /// Current phase
        phase: NpcPhase,
        /// Rejected trigger
        trigger: NpcTrigger,
    },
}

/// Result type for NPC operations.
pub type NpcResult<T> = Result<T, NpcError>;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Travel {
    destination: WorldPos,
    attempts: u32,
    /// False while waiting to re-request after an unreachable report.
    requested: bool,
}

/// One customer's behaviour.
#[derive(Debug, Clone)]
pub struct NpcStateMachine {
    id: NpcId,
    phase: NpcPhase,
    config: NpcConfig,
    /// Items this customer wants in total
    wanted: u32,
    /// Items picked up so far
    collected: u32,
    /// Picked up but not yet placed, oldest first
    held: VecDeque<ItemId>,
    target: Option<ItemTarget>,
    timer: f32,
    travel: Option<Travel>,
}

impl NpcStateMachine {
    /// Create an idle customer wanting `wanted` items (clamped to `1..=max_items`).
    #[must_use]
    pub fn new(id: NpcId, wanted: u32, config: NpcConfig) -> Self {
        Self {
            id,
            phase: NpcPhase::Idle,
            config,
            wanted: wanted.clamp(1, config.max_items.max(1)),
            collected: 0,
            held: VecDeque::new(),
            target: None,
            timer: 0.0,
            travel: None,
        }
    }

    /// NPC ID.
    #[must_use]
    pub const fn id(&self) -> NpcId {
        self.id
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> NpcPhase {
        self.phase
    }

    /// Items this customer will try to collect.
    #[must_use]
    pub const fn wanted(&self) -> u32 {
        self.wanted
    }

    /// Items collected so far.
    #[must_use]
    pub const fn collected(&self) -> u32 {
        self.collected
    }

    /// Items carried, oldest first.
    pub fn held_items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.held.iter().copied()
    }

    /// Number of items carried.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Item currently reserved.
    #[must_use]
    pub fn target(&self) -> Option<ItemTarget> {
        self.target
    }

    /// Check if the customer has left.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Register-side checkout. Accepted only while waiting for checkout.
    pub fn trigger_checkout(&mut self, events: &EventBus<NpcEvent>) -> bool {
        if self.phase != NpcPhase::WaitingForCheckout {
            debug!(npc = %self.id, phase = %self.phase, "Checkout ignored");
            return false;
        }
        self.apply(NpcTrigger::CheckoutTriggered, events).is_ok()
    }

    /// Advance by `dt` seconds.
    ///
    /// Instant transitions (pickup decisions, arrivals already reported) are
    /// resolved in the same call. Returns an error when navigation was
    /// abandoned; the NPC has already fallen back by then.
    pub fn step<N, I, C>(
        &mut self,
        dt: f32,
        world: &mut ShopWorld<N, I, C>,
        events: &EventBus<NpcEvent>,
    ) -> NpcResult<()>
    where
        N: Navigator,
        I: ItemSource,
        C: Counter,
    {
        let mut dt = dt;
        for _ in 0..MAX_TRANSITIONS_PER_STEP {
            let before = self.phase;
            self.tick(dt, world, events)?;
            dt = 0.0;
            if self.phase == before {
                break;
            }
        }
        Ok(())
    }

    fn tick<N, I, C>(
        &mut self,
        dt: f32,
        world: &mut ShopWorld<N, I, C>,
        events: &EventBus<NpcEvent>,
    ) -> NpcResult<()>
    where
        N: Navigator,
        I: ItemSource,
        C: Counter,
    {
        match self.phase {
            NpcPhase::Idle => self.tick_idle(dt, world, events),
            NpcPhase::MovingToItem | NpcPhase::MovingToCounter | NpcPhase::MovingToExit => {
                self.tick_travel(world, events)
            },
            NpcPhase::WaitingAtItem => {
                self.timer -= dt;
                if self.timer <= 0.0 {
                    self.apply(NpcTrigger::TimerElapsed, events)?;
                    self.pick_up(world, events);
                }
                Ok(())
            },
            NpcPhase::Pickup => self.tick_pickup(world, events),
            NpcPhase::Placing => self.tick_placing(dt, world, events),
            NpcPhase::WaitingForCheckout | NpcPhase::Terminal => Ok(()),
        }
    }

    fn tick_idle<N, I, C>(
        &mut self,
        dt: f32,
        world: &mut ShopWorld<N, I, C>,
        events: &EventBus<NpcEvent>,
    ) -> NpcResult<()>
    where
        N: Navigator,
        I: ItemSource,
        C: Counter,
    {
        self.timer -= dt;
        if self.timer > 0.0 {
            return Ok(());
        }
        self.timer = self.config.idle_poll_secs;

        if self.wants_more() {
            if let Some(target) = world.items.next_available_item(self.id) {
                self.target = Some(target);
                return self.apply(NpcTrigger::TargetFound, events);
            }
            debug!(npc = %self.id, "Item source exhausted, polling later");
        }
        if !self.held.is_empty() {
            return self.apply(NpcTrigger::ResumeDelivery, events);
        }
        Ok(())
    }

    fn pick_up<N, I, C>(&mut self, world: &mut ShopWorld<N, I, C>, events: &EventBus<NpcEvent>)
    where
        I: ItemSource,
    {
        let Some(target) = self.target.take() else {
            error!(npc = %self.id, "Pickup without a reserved item");
            return;
        };
        events.publish(NpcEvent::PickupStarted {
            npc: self.id,
            item: target.item,
        });
        world.items.mark_collected(target.item);
        self.held.push_back(target.item);
        self.collected += 1;
    }

    fn tick_pickup<N, I, C>(
        &mut self,
        world: &mut ShopWorld<N, I, C>,
        events: &EventBus<NpcEvent>,
    ) -> NpcResult<()>
    where
        I: ItemSource,
    {
        if self.wants_more() {
            if let Some(target) = world.items.next_available_item(self.id) {
                self.target = Some(target);
                return self.apply(NpcTrigger::CollectMore, events);
            }
        }
        self.apply(NpcTrigger::CollectionDone, events)
    }

    fn tick_placing<N, I, C>(
        &mut self,
        dt: f32,
        world: &mut ShopWorld<N, I, C>,
        events: &EventBus<NpcEvent>,
    ) -> NpcResult<()>
    where
        C: Counter,
    {
        self.timer -= dt;
        if self.timer > 0.0 {
            return Ok(());
        }
        let Some(&item) = self.held.front() else {
            return self.apply(NpcTrigger::HeldEmpty, events);
        };
        let Some(slot) = world.counter.next_available_slot() else {
            debug!(npc = %self.id, "Counter full, waiting for a slot");
            self.timer = self.config.place_step_secs.max(self.config.idle_poll_secs);
            return Ok(());
        };

        events.publish(NpcEvent::PlaceStarted {
            npc: self.id,
            item,
            slot,
        });
        world.counter.place(slot, item);
        self.held.pop_front();
        self.timer = self.config.place_step_secs;

        if self.held.is_empty() {
            self.apply(NpcTrigger::HeldEmpty, events)
        } else {
            Ok(())
        }
    }

    fn tick_travel<N, I, C>(
        &mut self,
        world: &mut ShopWorld<N, I, C>,
        events: &EventBus<NpcEvent>,
    ) -> NpcResult<()>
    where
        N: Navigator,
        I: ItemSource,
        C: Counter,
    {
        let Some(travel) = self.travel else {
            let Some(destination) = self.destination(world) else {
                error!(npc = %self.id, phase = %self.phase, "No destination, falling back");
                return self.apply(NpcTrigger::NavigationAbandoned, events);
            };
            world.navigator.request_move(self.id, destination);
            self.travel = Some(Travel {
                destination,
                attempts: 1,
                requested: true,
            });
            return Ok(());
        };

        let status = if travel.requested {
            world.navigator.poll(self.id)
        } else {
            NavStatus::Unreachable
        };

        match status {
            NavStatus::Pending => Ok(()),
            NavStatus::Arrived => {
                self.travel = None;
                self.apply(NpcTrigger::Arrived, events)
            },
            NavStatus::Unreachable if travel.attempts <= self.config.navigation_retry_limit => {
                let attempts = travel.attempts + 1;
                let requested = world.navigator.is_reachable(travel.destination);
                if requested {
                    world.navigator.request_move(self.id, travel.destination);
                }
                debug!(npc = %self.id, phase = %self.phase, attempts, requested, "Navigation retry");
                self.travel = Some(Travel {
                    attempts,
                    requested,
                    ..travel
                });
                Ok(())
            },
            NavStatus::Unreachable => self.abandon_travel(travel.attempts, world, events),
        }
    }

    fn abandon_travel<N, I, C>(
        &mut self,
        attempts: u32,
        world: &mut ShopWorld<N, I, C>,
        events: &EventBus<NpcEvent>,
    ) -> NpcResult<()>
    where
        N: Navigator,
        I: ItemSource,
    {
        let phase = self.phase;
        self.travel = None;
        world.navigator.cancel(self.id);
        if let Some(target) = self.target.take() {
            world.items.release(self.id, target.item);
        }

        warn!(npc = %self.id, %phase, attempts, "Navigation abandoned");
        events.publish(NpcEvent::NavigationFailed {
            npc: self.id,
            phase,
            attempts,
        });
        self.apply(NpcTrigger::NavigationAbandoned, events)?;
        Err(NpcError::NavigationAbandoned {
            npc: self.id,
            phase,
            attempts,
        })
    }

    fn destination<N, I, C: Counter>(&self, world: &ShopWorld<N, I, C>) -> Option<WorldPos> {
        match self.phase {
            NpcPhase::MovingToItem => self.target.map(|t| t.position),
            NpcPhase::MovingToCounter => Some(world.counter.position()),
            NpcPhase::MovingToExit => Some(world.exit),
            _ => None,
        }
    }

    fn wants_more(&self) -> bool {
        self.collected < self.wanted && (self.held.len() as u32) < self.config.max_items
    }

    fn apply(&mut self, trigger: NpcTrigger, events: &EventBus<NpcEvent>) -> NpcResult<()> {
        let from = self.phase;
        let Some(to) = transition(from, trigger) else {
            return Err(NpcError::InvalidTransition {
                npc: self.id,
                phase: from,
                trigger,
            });
        };

        self.phase = to;
        self.travel = None;
        self.timer = match to {
            NpcPhase::Idle => self.config.idle_poll_secs,
            NpcPhase::WaitingAtItem => self.config.item_wait_secs,
            _ => 0.0,
        };
        debug!(npc = %self.id, %from, %to, ?trigger, "NPC phase change");
        events.publish(NpcEvent::StateChanged {
            npc: self.id,
            from,
            to,
        });
        Ok(())
    }
}
