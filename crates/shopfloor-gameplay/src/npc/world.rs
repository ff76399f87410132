//! World collaborators the NPC state machine calls into.
//!
//! Movement, item stock and counter mechanics live outside this crate. The
//! traits here are the whole surface the state machine needs; the `Mock*`
//! types implement them for tests and headless runs.

use std::collections::VecDeque;

use ahash::AHashMap;
use shopfloor_common::{ItemId, NpcId, SlotId, WorldPos};

/// Navigation progress for one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavStatus {
    /// Still walking.
    Pending,
    /// Reached the destination.
    Arrived,
    /// The destination cannot be reached.
    Unreachable,
}

/// Pathfinding and locomotion service.
pub trait Navigator {
    /// Start moving an actor towards a destination, replacing any previous request.
    fn request_move(&mut self, npc: NpcId, destination: WorldPos);
    /// Report progress of the actor's current request.
    fn poll(&mut self, npc: NpcId) -> NavStatus;
    /// Check whether a destination can be reached at all.
    fn is_reachable(&self, destination: WorldPos) -> bool;
    /// Current position of an actor.
    fn position_of(&self, npc: NpcId) -> Option<WorldPos>;
    /// Drop any request for the actor.
    fn cancel(&mut self, _npc: NpcId) {}
}

/// An item reserved for one NPC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemTarget {
    /// The item
    pub item: ItemId,
    /// Where to pick it up
    pub position: WorldPos,
}

/// Shelf stock handing out items to collect.
pub trait ItemSource {
    /// Reserve the next item for `npc`, if any is left.
    fn next_available_item(&mut self, npc: NpcId) -> Option<ItemTarget>;
    /// The reserved item was taken off the shelf.
    fn mark_collected(&mut self, item: ItemId);
    /// Give a reservation back without collecting it.
    fn release(&mut self, _npc: NpcId, _item: ItemId) {}
}

/// Service counter receiving placed items.
pub trait Counter {
    /// Where customers stand to place items.
    fn position(&self) -> WorldPos;
    /// Next free slot, or `None` when full.
    fn next_available_slot(&mut self) -> Option<SlotId>;
    /// Put an item into a slot.
    fn place(&mut self, slot: SlotId, item: ItemId);
}

/// Bundle of collaborators shared by every NPC on a floor.
#[derive(Debug)]
pub struct ShopWorld<N, I, C> {
    /// Navigation service
    pub navigator: N,
    /// Item stock
    pub items: I,
    /// Service counter
    pub counter: C,
    /// Where customers leave
    pub exit: WorldPos,
}

impl<N: Navigator, I: ItemSource, C: Counter> ShopWorld<N, I, C> {
    /// Create a world from its collaborators.
    pub fn new(navigator: N, items: I, counter: C, exit: WorldPos) -> Self {
        Self {
            navigator,
            items,
            counter,
            exit,
        }
    }
}

/// World assembled from the mock collaborators.
pub type MockShopWorld = ShopWorld<MockNavigator, MockItemSource, MockCounter>;

impl MockShopWorld {
    /// A world with `items` items in stock and a counter with `slots` slots.
    #[must_use]
    pub fn mock(items: u32, slots: u16) -> Self {
        Self::new(
            MockNavigator::new(),
            MockItemSource::with_items(items),
            MockCounter::new(WorldPos::floor(0.0, 10.0), slots),
            WorldPos::floor(0.0, 20.0),
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct MockMove {
    destination: WorldPos,
    remaining: u32,
}

/// Mock navigator for testing.
///
/// Arrives after a fixed number of pending polls. Destinations near a blocked
/// point are unreachable.
#[derive(Debug, Default)]
pub struct MockNavigator {
    moves: AHashMap<NpcId, MockMove>,
    positions: AHashMap<NpcId, WorldPos>,
    blocked: Vec<WorldPos>,
    delay: u32,
    requests: usize,
}

impl MockNavigator {
    /// Creates a navigator that arrives on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `Pending` this many times before arriving.
    #[must_use]
    pub const fn with_delay(mut self, polls: u32) -> Self {
        self.delay = polls;
        self
    }

    /// Make destinations near `pos` unreachable.
    pub fn block(&mut self, pos: WorldPos) {
        self.blocked.push(pos);
    }

    /// Put an actor somewhere.
    pub fn place(&mut self, npc: NpcId, pos: WorldPos) {
        self.positions.insert(npc, pos);
    }

    /// Number of move requests received.
    #[must_use]
    pub const fn request_count(&self) -> usize {
        self.requests
    }
}

impl Navigator for MockNavigator {
    fn request_move(&mut self, npc: NpcId, destination: WorldPos) {
        self.requests += 1;
        self.moves.insert(
            npc,
            MockMove {
                destination,
                remaining: self.delay,
            },
        );
    }

    fn poll(&mut self, npc: NpcId) -> NavStatus {
        let Some(mv) = self.moves.get_mut(&npc) else {
            return NavStatus::Unreachable;
        };
        if self.blocked.iter().any(|b| b.is_near(mv.destination, 0.5)) {
            return NavStatus::Unreachable;
        }
        if mv.remaining > 0 {
            mv.remaining -= 1;
            return NavStatus::Pending;
        }
        let destination = mv.destination;
        self.moves.remove(&npc);
        self.positions.insert(npc, destination);
        NavStatus::Arrived
    }

    fn is_reachable(&self, destination: WorldPos) -> bool {
        !self.blocked.iter().any(|b| b.is_near(destination, 0.5))
    }

    fn position_of(&self, npc: NpcId) -> Option<WorldPos> {
        self.positions.get(&npc).copied()
    }

    fn cancel(&mut self, npc: NpcId) {
        self.moves.remove(&npc);
    }
}

/// Mock item stock for testing.
#[derive(Debug, Default)]
pub struct MockItemSource {
    available: VecDeque<ItemTarget>,
    reserved: AHashMap<ItemId, (NpcId, ItemTarget)>,
    collected: Vec<ItemId>,
}

impl MockItemSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source with `count` items laid out along a shelf.
    #[must_use]
    pub fn with_items(count: u32) -> Self {
        let mut source = Self::new();
        for i in 0..count {
            source.add(ItemId::new(i + 1), WorldPos::floor(i as f32, 0.0));
        }
        source
    }

    /// Stock an item.
    pub fn add(&mut self, item: ItemId, position: WorldPos) {
        self.available.push_back(ItemTarget { item, position });
    }

    /// Items taken so far, in order.
    #[must_use]
    pub fn collected(&self) -> &[ItemId] {
        &self.collected
    }

    /// Items neither reserved nor collected.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.available.len()
    }
}

impl ItemSource for MockItemSource {
    fn next_available_item(&mut self, npc: NpcId) -> Option<ItemTarget> {
        let target = self.available.pop_front()?;
        self.reserved.insert(target.item, (npc, target));
        Some(target)
    }

    fn mark_collected(&mut self, item: ItemId) {
        self.reserved.remove(&item);
        self.collected.push(item);
    }

    fn release(&mut self, _npc: NpcId, item: ItemId) {
        if let Some((_, target)) = self.reserved.remove(&item) {
            self.available.push_back(target);
        }
    }
}

/// Mock counter for testing.
#[derive(Debug)]
pub struct MockCounter {
    position: WorldPos,
    slots: u16,
    placed: Vec<(SlotId, ItemId)>,
}

impl MockCounter {
    /// Creates a counter with a fixed number of slots.
    #[must_use]
    pub fn new(position: WorldPos, slots: u16) -> Self {
        Self {
            position,
            slots,
            placed: Vec::new(),
        }
    }

    /// Items placed so far.
    #[must_use]
    pub fn placed(&self) -> &[(SlotId, ItemId)] {
        &self.placed
    }

    /// Empty every slot, as a register would after checkout.
    pub fn clear(&mut self) {
        self.placed.clear();
    }
}

impl Counter for MockCounter {
    fn position(&self) -> WorldPos {
        self.position
    }

    fn next_available_slot(&mut self) -> Option<SlotId> {
        let used = self.placed.len() as u16;
        (used < self.slots).then(|| SlotId::new(used))
    }

    fn place(&mut self, slot: SlotId, item: ItemId) {
        self.placed.push((slot, item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_navigator_delay() {
        let npc = NpcId::new();
        let mut nav = MockNavigator::new().with_delay(2);
        let dest = WorldPos::floor(3.0, 4.0);
        nav.request_move(npc, dest);

        assert_eq!(nav.poll(npc), NavStatus::Pending);
        assert_eq!(nav.poll(npc), NavStatus::Pending);
        assert_eq!(nav.poll(npc), NavStatus::Arrived);
        assert_eq!(nav.position_of(npc), Some(dest));
    }

    #[test]
    fn test_mock_navigator_blocked() {
        let npc = NpcId::new();
        let mut nav = MockNavigator::new();
        let dest = WorldPos::floor(1.0, 1.0);
        nav.block(dest);
        nav.request_move(npc, dest);

        assert!(!nav.is_reachable(dest));
        assert_eq!(nav.poll(npc), NavStatus::Unreachable);
    }

    #[test]
    fn test_mock_item_source_release() {
        let npc = NpcId::new();
        let mut items = MockItemSource::with_items(1);
        let target = items.next_available_item(npc).expect("stocked");
        assert!(items.next_available_item(npc).is_none());

        items.release(npc, target.item);
        assert_eq!(items.available_count(), 1);
    }

    #[test]
    fn test_mock_counter_fills() {
        let mut counter = MockCounter::new(WorldPos::ORIGIN, 1);
        let slot = counter.next_available_slot().expect("free slot");
        counter.place(slot, ItemId::new(1));
        assert!(counter.next_available_slot().is_none());

        counter.clear();
        assert!(counter.next_available_slot().is_some());
    }
}
