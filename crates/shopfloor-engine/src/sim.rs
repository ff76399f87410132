//! Headless shop simulation.
//!
//! Spawns customers on an interval, steps the shop floor at a fixed tick,
//! checks customers out at the register after a delay and walks a player to
//! the counter who answers whatever dialogue comes up.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shopfloor_common::{NpcId, SlotId, WorldPos};
use shopfloor_gameplay::{
    ChoiceAction, DialogueEvent, DialogueSource, EndReason, NpcEvent, NpcPhase, PresentedChoice,
    Requester, SessionId, ShopFloor, ShopWorld, Subscription,
};
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::world::{ShelfStock, SimCounter, SimNavigator, SimSightLine, StoreLayout};

/// World type the simulation runs on.
pub type SimWorld = ShopWorld<SimNavigator, ShelfStock, SimCounter>;

/// Register queue: who is waiting to be checked out and which slots they used.
#[derive(Debug, Default)]
pub struct Register {
    delay: f32,
    queue: Vec<(NpcId, f32)>,
    slots: HashMap<NpcId, Vec<SlotId>>,
    served: u32,
}

impl Register {
    /// Creates a register that checks a customer out `delay` seconds after they are ready.
    #[must_use]
    pub fn new(delay: f32) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Feed a customer event observed at `now`.
    pub fn observe(&mut self, event: &NpcEvent, now: f32) {
        match event {
            NpcEvent::PlaceStarted { npc, slot, .. } => {
                self.slots.entry(*npc).or_default().push(*slot);
            },
            NpcEvent::StateChanged {
                npc,
                to: NpcPhase::WaitingForCheckout,
                ..
            } => self.queue.push((*npc, now + self.delay)),
            NpcEvent::Removed { npc } => {
                self.queue.retain(|(id, _)| id != npc);
            },
            _ => {},
        }
    }

    /// Customers whose delay has run out, in queue order.
    pub fn due(&mut self, now: f32) -> Vec<NpcId> {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.queue)
            .into_iter()
            .partition(|(_, ready_at)| *ready_at <= now);
        self.queue = waiting;
        due.into_iter().map(|(npc, _)| npc).collect()
    }

    /// Clear the customer's items off the counter.
    pub fn complete(&mut self, npc: NpcId, counter: &mut SimCounter) -> usize {
        let cleared = self
            .slots
            .remove(&npc)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|slot| counter.take(slot))
            .count();
        self.served += 1;
        cleared
    }

    /// Customers checked out so far.
    #[must_use]
    pub const fn served(&self) -> u32 {
        self.served
    }

    /// Customers waiting in the queue.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.queue.len()
    }
}

/// The person behind the counter.
#[derive(Debug)]
pub struct SimPlayer {
    position: WorldPos,
    post: WorldPos,
    speed: f32,
}

impl SimPlayer {
    /// Creates a player at `start` heading for `post`.
    #[must_use]
    pub const fn new(start: WorldPos, post: WorldPos, speed: f32) -> Self {
        Self {
            position: start,
            post,
            speed,
        }
    }

    /// Walk towards the post for `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        self.position = self.position.move_towards(self.post, self.speed * dt);
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> WorldPos {
        self.position
    }

    /// The player as a conversation requester.
    #[must_use]
    pub const fn requester(&self) -> Requester {
        Requester::player(self.position)
    }
}

#[derive(Debug, Clone, Copy)]
struct Talk {
    npc: NpcId,
    choices: u32,
}

/// Throughput summary printed at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimReport {
    /// Simulated seconds
    pub elapsed_secs: f32,
    /// Ticks run
    pub ticks: u64,
    /// Customers spawned
    pub spawned: u64,
    /// Customers checked out at the register
    pub served: u32,
    /// Customers that left the floor
    pub departed: u64,
    /// Customers still on the floor when the run stopped
    pub stranded: usize,
    /// Navigation abandonments
    pub navigation_abandoned: u64,
    /// Items carried off the shelves
    pub items_collected: u32,
    /// Items withdrawn after repeated failed fetches
    pub items_pulled: u32,
    /// Conversations started
    pub conversations: u64,
    /// Conversations the player talked through to the end
    pub conversations_completed: u32,
    /// Conversations replaced by a newer one
    pub conversations_taken_over: u32,
    /// Conversations that failed to start
    pub conversation_failures: u64,
    /// Player choices made
    pub choices_made: u32,
}

/// Everything a run needs.
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    shop: ShopFloor,
    world: SimWorld,
    sight: SimSightLine,
    register: Register,
    player: SimPlayer,
    npc_events: Subscription<NpcEvent>,
    dialogue_events: Subscription<DialogueEvent>,
    talks: HashMap<SessionId, Talk>,
    rng: fastrand::Rng,
    elapsed: f32,
    spawn_timer: f32,
    report: SimReport,
}

impl Simulation {
    /// Set up the store for a run.
    #[must_use]
    pub fn new(mut config: SimConfig, sources: Vec<Arc<dyn DialogueSource>>) -> Self {
        config.validate();
        let mut rng = config
            .seed
            .map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        let layout = StoreLayout::default();

        let world = ShopWorld::new(
            SimNavigator::new(config.walk_speed, &layout),
            ShelfStock::stocked(config.stock, config.blocked_items, &mut rng),
            SimCounter::new(layout.counter, config.counter_slots),
            layout.exit,
        );
        let shop = ShopFloor::new(config.shop_config(), sources);
        let npc_events = shop.subscribe_npc_events();
        let dialogue_events = shop.subscribe_dialogue();

        info!(
            customers = config.customers,
            stock = config.stock,
            blocked = config.blocked_items,
            slots = config.counter_slots,
            sharing = ?config.sharing,
            "Store open"
        );

        Self {
            register: Register::new(config.checkout_delay_secs),
            player: SimPlayer::new(layout.player_start, layout.player_post, config.player_walk_speed),
            sight: SimSightLine::new(&layout),
            config,
            shop,
            world,
            npc_events,
            dialogue_events,
            talks: HashMap::new(),
            rng,
            elapsed: 0.0,
            spawn_timer: 0.0,
            report: SimReport::default(),
        }
    }

    /// The shop floor.
    #[must_use]
    pub fn shop(&self) -> &ShopFloor {
        &self.shop
    }

    /// The simulated world.
    #[must_use]
    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    /// Simulated seconds so far.
    #[must_use]
    pub const fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Run until every customer has left, nobody can make progress, or time runs out.
    pub fn run(&mut self) -> SimReport {
        while !self.is_finished() {
            self.tick();
        }
        self.report()
    }

    /// Advance the store by one fixed tick.
    pub fn tick(&mut self) {
        let dt = self.config.tick_secs();
        self.elapsed += dt;
        self.report.ticks += 1;

        self.spawn(dt);
        self.world.navigator.advance(dt);
        self.player.advance(dt);

        let requester = self.player.requester();
        let departed = self
            .shop
            .update(dt, &mut self.world, Some(&requester), &self.sight);
        for npc in departed {
            self.world.navigator.forget(npc);
        }

        self.handle_npc_events();
        self.checkout_due();
        self.handle_dialogue_events();
    }

    /// Summary of the run so far.
    #[must_use]
    pub fn report(&self) -> SimReport {
        let stats = self.shop.stats();
        SimReport {
            elapsed_secs: self.elapsed,
            spawned: stats.spawned,
            served: self.register.served(),
            departed: stats.removed,
            stranded: self.shop.npc_count(),
            navigation_abandoned: stats.navigation_failures,
            items_collected: self.world.items.collected(),
            items_pulled: self.world.items.pulled(),
            conversations: stats.conversations_started,
            conversation_failures: stats.conversation_failures,
            ..self.report.clone()
        }
    }

    /// Check if the run should stop.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        if self.elapsed >= self.config.max_sim_secs {
            info!(elapsed = self.elapsed, "Time limit reached");
            return true;
        }
        let all_spawned = self.shop.stats().spawned >= u64::from(self.config.customers);
        if all_spawned && self.shop.npc_count() == 0 {
            return true;
        }
        all_spawned && self.is_stalled()
    }

    /// Every remaining customer is idle with empty hands and the shelves are bare.
    fn is_stalled(&self) -> bool {
        let stuck = self
            .shop
            .npcs()
            .all(|npc| npc.phase() == NpcPhase::Idle && npc.held_count() == 0);
        if stuck && self.world.items.remaining() == 0 {
            warn!(customers = self.shop.npc_count(), "Shelves empty, customers stranded");
            return true;
        }
        false
    }

    fn spawn(&mut self, dt: f32) {
        self.spawn_timer -= dt;
        if self.spawn_timer > 0.0 {
            return;
        }
        let spawned = self.shop.stats().spawned;
        if spawned >= u64::from(self.config.customers)
            || self.shop.npc_count() >= self.config.max_concurrent as usize
        {
            return;
        }
        let wanted = self.rng.u32(1..=self.config.items_per_customer);
        self.shop.spawn_npc(wanted);
        self.spawn_timer = self.config.spawn_interval_secs;
    }

    fn handle_npc_events(&mut self) {
        for event in self.npc_events.drain() {
            match &event {
                NpcEvent::StateChanged { npc, from, to } => {
                    debug!(npc = %npc, %from, %to, "Customer state");
                },
                NpcEvent::PickupStarted { npc, item } => debug!(npc = %npc, %item, "Pickup"),
                NpcEvent::PlaceStarted { npc, item, slot } => {
                    debug!(npc = %npc, %item, %slot, "Place");
                },
                NpcEvent::NavigationFailed {
                    npc,
                    phase,
                    attempts,
                } => info!(npc = %npc, %phase, attempts, "Customer gave up walking"),
                NpcEvent::Removed { npc } => info!(npc = %npc, "Customer left"),
            }
            self.register.observe(&event, self.elapsed);
        }
    }

    fn checkout_due(&mut self) {
        for npc in self.register.due(self.elapsed) {
            if self.shop.trigger_checkout(npc) {
                let cleared = self.register.complete(npc, &mut self.world.counter);
                info!(npc = %npc, items = cleared, "Checked out");
            } else {
                debug!(npc = %npc, "Register skipped customer");
            }
        }
    }

    fn handle_dialogue_events(&mut self) {
        let mut presented = Vec::new();
        for event in self.dialogue_events.drain() {
            match event {
                DialogueEvent::SessionStarted {
                    session,
                    dialogue,
                    owner,
                } => {
                    info!(%session, %dialogue, ?owner, "Dialogue shown");
                    if let Some(npc) = owner {
                        self.talks.insert(session, Talk { npc, choices: 0 });
                    }
                },
                DialogueEvent::NodePresented {
                    session,
                    node,
                    speaker,
                    text,
                    choices,
                } => {
                    info!(%session, %node, "{speaker}: {text}");
                    presented.push((session, choices));
                },
                DialogueEvent::SessionEnded { session, reason } => {
                    info!(%session, ?reason, "Dialogue hidden");
                    self.talks.remove(&session);
                    match reason {
                        EndReason::Completed => self.report.conversations_completed += 1,
                        EndReason::TakenOver => self.report.conversations_taken_over += 1,
                        _ => {},
                    }
                },
            }
        }

        for (session, choices) in presented {
            self.answer(session, &choices);
        }
    }

    /// Pick a response for the node on screen, or walk away once patience runs out.
    fn answer(&mut self, session: SessionId, choices: &[PresentedChoice]) {
        let Some(talk) = self.talks.get_mut(&session) else {
            return;
        };
        let npc = talk.npc;
        if self.shop.session_for(npc) != Some(session) || choices.is_empty() {
            return;
        }

        if talk.choices >= self.config.max_dialogue_choices {
            debug!(npc = %npc, %session, "Player walks away from the conversation");
            self.shop.end_conversation(npc);
            return;
        }
        talk.choices += 1;

        // Prefer staying in the conversation while patience lasts.
        let continuing: Vec<usize> = choices
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c.action, ChoiceAction::Goto(_)))
            .map(|(i, _)| i)
            .collect();
        let index = if continuing.is_empty() || self.rng.u8(..4) == 0 {
            self.rng.usize(..choices.len())
        } else {
            continuing[self.rng.usize(..continuing.len())]
        };

        debug!(npc = %npc, %session, choice = %choices[index].text, "Player answers");
        self.report.choices_made += 1;
        if let Err(e) = self.shop.choose_response(npc, index) {
            debug!(npc = %npc, error = %e, "Answer rejected");
        }
    }
}
