//! Simulated store: layout and the collaborators customers call into.
//!
//! The floor is the `x`/`z` plane. Customers walk in straight lines at a
//! fixed speed; a closed aisle makes every destination inside it
//! unreachable. Shelf pillars block sight lines.

use std::collections::{HashMap, VecDeque};

use glam::Vec2;
use shopfloor_common::{ActorRef, ItemId, NpcId, SlotId, WorldPos};
use shopfloor_gameplay::{Counter, ItemSource, ItemTarget, NavStatus, Navigator, SightLine};
use tracing::{debug, warn};

/// Distance at which a walker counts as arrived.
const ARRIVAL_TOLERANCE: f32 = 0.05;

/// Releases after which an item is taken off the shelf for good.
const MAX_RELEASES: u32 = 2;

fn flat(pos: WorldPos) -> Vec2 {
    Vec2::new(pos.x, pos.z)
}

/// Axis-aligned region of the floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    /// Lower corner (`x`, `z`)
    pub min: Vec2,
    /// Upper corner (`x`, `z`)
    pub max: Vec2,
}

impl Zone {
    /// Returns true if `pos` lies inside the zone.
    #[must_use]
    pub fn contains(&self, pos: WorldPos) -> bool {
        let p = flat(pos);
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

/// Round pillar blocking sight lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pillar {
    /// Scenery index reported as the obstruction
    pub index: u32,
    /// Centre on the floor (`x`, `z`)
    pub center: Vec2,
    /// Radius in metres
    pub radius: f32,
}

impl Pillar {
    /// Segment parameter of the closest approach, if the segment touches the pillar.
    fn hit(&self, from: Vec2, to: Vec2) -> Option<f32> {
        let d = to - from;
        let len_sq = d.length_squared();
        let t = if len_sq <= f32::EPSILON {
            0.0
        } else {
            ((self.center - from).dot(d) / len_sq).clamp(0.0, 1.0)
        };
        let closest = from + d * t;
        (closest.distance_squared(self.center) <= self.radius * self.radius).then_some(t)
    }
}

/// Fixed store geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreLayout {
    /// Where customers appear
    pub entrance: WorldPos,
    /// Where customers leave
    pub exit: WorldPos,
    /// Where customers place their items
    pub counter: WorldPos,
    /// Where the player starts the shift
    pub player_start: WorldPos,
    /// Where the player stands behind the counter
    pub player_post: WorldPos,
    /// Aisle closed for restocking
    pub closed_aisle: Zone,
    /// Sight line blockers
    pub pillars: Vec<Pillar>,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            entrance: WorldPos::floor(-2.0, -2.0),
            exit: WorldPos::floor(6.0, -2.0),
            counter: WorldPos::floor(0.0, 12.0),
            player_start: WorldPos::floor(10.0, 18.0),
            player_post: WorldPos::floor(1.5, 13.5),
            closed_aisle: Zone {
                min: Vec2::new(-16.0, 0.0),
                max: Vec2::new(-10.0, 14.0),
            },
            pillars: vec![
                Pillar {
                    index: 0,
                    center: Vec2::new(-4.0, 10.0),
                    radius: 0.5,
                },
                Pillar {
                    index: 1,
                    center: Vec2::new(4.0, 10.0),
                    radius: 0.5,
                },
            ],
        }
    }
}

impl StoreLayout {
    /// Shelf position of the `index`-th reachable item.
    #[must_use]
    pub fn shelf_slot(index: u32) -> WorldPos {
        let row = index % 2;
        let column = (index / 2) % 13;
        WorldPos::floor(-6.0 + column as f32, 4.0 + row as f32 * 4.0)
    }

    /// Position of the `index`-th item in the closed aisle.
    #[must_use]
    pub fn closed_slot(index: u32) -> WorldPos {
        WorldPos::floor(-14.0, 2.0 + (index % 6) as f32 * 2.0)
    }
}

/// Straight-line walker.
#[derive(Debug)]
pub struct SimNavigator {
    speed: f32,
    entrance: WorldPos,
    blocked: Vec<Zone>,
    positions: HashMap<NpcId, WorldPos>,
    destinations: HashMap<NpcId, WorldPos>,
}

impl SimNavigator {
    /// Creates a navigator; new actors appear at the entrance.
    #[must_use]
    pub fn new(speed: f32, layout: &StoreLayout) -> Self {
        Self {
            speed,
            entrance: layout.entrance,
            blocked: vec![layout.closed_aisle],
            positions: HashMap::new(),
            destinations: HashMap::new(),
        }
    }

    /// Move every walker by `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        let step = self.speed * dt;
        for (npc, destination) in &self.destinations {
            if !self.is_reachable(*destination) {
                continue;
            }
            if let Some(pos) = self.positions.get_mut(npc) {
                *pos = pos.move_towards(*destination, step);
            }
        }
    }

    /// Drop everything known about an actor.
    pub fn forget(&mut self, npc: NpcId) {
        self.positions.remove(&npc);
        self.destinations.remove(&npc);
    }

    /// Actors currently walking.
    #[must_use]
    pub fn walking(&self) -> usize {
        self.destinations.len()
    }
}

impl Navigator for SimNavigator {
    fn request_move(&mut self, npc: NpcId, destination: WorldPos) {
        self.positions.entry(npc).or_insert(self.entrance);
        self.destinations.insert(npc, destination);
    }

    fn poll(&mut self, npc: NpcId) -> NavStatus {
        let Some(&destination) = self.destinations.get(&npc) else {
            return NavStatus::Unreachable;
        };
        if !self.is_reachable(destination) {
            return NavStatus::Unreachable;
        }
        let arrived = self
            .positions
            .get(&npc)
            .is_some_and(|pos| pos.is_near(destination, ARRIVAL_TOLERANCE));
        if arrived {
            self.destinations.remove(&npc);
            NavStatus::Arrived
        } else {
            NavStatus::Pending
        }
    }

    fn is_reachable(&self, destination: WorldPos) -> bool {
        !self.blocked.iter().any(|zone| zone.contains(destination))
    }

    fn position_of(&self, npc: NpcId) -> Option<WorldPos> {
        self.positions.get(&npc).copied()
    }

    fn cancel(&mut self, npc: NpcId) {
        self.destinations.remove(&npc);
    }
}

/// Shelf stock shuffled at opening time.
#[derive(Debug, Default)]
pub struct ShelfStock {
    available: VecDeque<ItemTarget>,
    reserved: HashMap<ItemId, ItemTarget>,
    releases: HashMap<ItemId, u32>,
    collected: u32,
    pulled: u32,
}

impl ShelfStock {
    /// Stock `count` items, the last `blocked` of them in the closed aisle.
    pub fn stocked(count: u32, blocked: u32, rng: &mut fastrand::Rng) -> Self {
        let blocked = blocked.min(count);
        let open = count - blocked;
        let mut items: Vec<ItemTarget> = (0..count)
            .map(|i| ItemTarget {
                item: ItemId::new(i + 1),
                position: if i < open {
                    StoreLayout::shelf_slot(i)
                } else {
                    StoreLayout::closed_slot(i - open)
                },
            })
            .collect();
        rng.shuffle(&mut items);
        Self {
            available: items.into(),
            ..Self::default()
        }
    }

    /// Items still on the shelves, reserved or not.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.available.len() + self.reserved.len()
    }

    /// Items neither reserved nor collected.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Items taken off the shelves by customers.
    #[must_use]
    pub const fn collected(&self) -> u32 {
        self.collected
    }

    /// Items withdrawn after repeated failed fetches.
    #[must_use]
    pub const fn pulled(&self) -> u32 {
        self.pulled
    }
}

impl ItemSource for ShelfStock {
    fn next_available_item(&mut self, _npc: NpcId) -> Option<ItemTarget> {
        let target = self.available.pop_front()?;
        self.reserved.insert(target.item, target);
        Some(target)
    }

    fn mark_collected(&mut self, item: ItemId) {
        if self.reserved.remove(&item).is_some() {
            self.collected += 1;
        }
    }

    fn release(&mut self, npc: NpcId, item: ItemId) {
        let Some(target) = self.reserved.remove(&item) else {
            return;
        };
        let releases = self.releases.entry(item).or_default();
        *releases += 1;
        if *releases >= MAX_RELEASES {
            warn!(npc = %npc, %item, "Item pulled from the shelf after repeated failed fetches");
            self.pulled += 1;
        } else {
            debug!(npc = %npc, %item, releases = *releases, "Item back on the shelf");
            self.available.push_back(target);
        }
    }
}

/// Service counter with numbered slots.
#[derive(Debug)]
pub struct SimCounter {
    position: WorldPos,
    slots: Vec<Option<ItemId>>,
}

impl SimCounter {
    /// Creates an empty counter.
    #[must_use]
    pub fn new(position: WorldPos, slots: u16) -> Self {
        Self {
            position,
            slots: vec![None; usize::from(slots)],
        }
    }

    /// Clear a slot, returning what was in it.
    pub fn take(&mut self, slot: SlotId) -> Option<ItemId> {
        self.slots.get_mut(usize::from(slot.raw()))?.take()
    }

    /// Slots holding an item.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Counter for SimCounter {
    fn position(&self) -> WorldPos {
        self.position
    }

    fn next_available_slot(&mut self) -> Option<SlotId> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|i| SlotId::new(i as u16))
    }

    fn place(&mut self, slot: SlotId, item: ItemId) {
        match self.slots.get_mut(usize::from(slot.raw())) {
            Some(cell) => *cell = Some(item),
            None => warn!(%slot, %item, "Placed into a slot the counter does not have"),
        }
    }
}

/// Sight lines against the store's pillars.
#[derive(Debug, Clone, Default)]
pub struct SimSightLine {
    pillars: Vec<Pillar>,
}

impl SimSightLine {
    /// Creates a sight line checker for a layout.
    #[must_use]
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            pillars: layout.pillars.clone(),
        }
    }
}

impl SightLine for SimSightLine {
    fn first_obstruction(&self, from: WorldPos, to: WorldPos) -> Option<ActorRef> {
        let (from, to) = (flat(from), flat(to));
        self.pillars
            .iter()
            .filter_map(|p| p.hit(from, to).map(|t| (t, p.index)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, index)| ActorRef::Scenery(index))
    }
}
