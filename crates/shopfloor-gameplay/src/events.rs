//! Event bus for presentation and inter-system communication.
//!
//! Every subscriber gets its own bounded channel. Dropping a [`Subscription`]
//! removes it from the bus immediately, so an actor torn down mid-conversation
//! never leaves a dangling listener behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shopfloor_common::{ItemId, NpcId, SlotId};

use crate::dialogue::{EndReason, PresentedChoice, SessionId};
use crate::npc::NpcPhase;

/// Default per-subscriber channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by NPC state machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NpcEvent {
    /// The NPC moved from one phase to another.
    StateChanged {
        /// NPC ID
        npc: NpcId,
        /// Phase being left
        from: NpcPhase,
        /// Phase being entered
        to: NpcPhase,
    },
    /// The NPC started picking up an item.
    PickupStarted {
        /// NPC ID
        npc: NpcId,
        /// Item being collected
        item: ItemId,
    },
    /// The NPC started placing an item on the counter.
    PlaceStarted {
        /// NPC ID
        npc: NpcId,
        /// Item being placed
        item: ItemId,
        /// Counter slot receiving it
        slot: SlotId,
    },
    /// Navigation was abandoned after exhausting retries.
    NavigationFailed {
        /// NPC ID
        npc: NpcId,
        /// Phase the NPC was in when it gave up
        phase: NpcPhase,
        /// Attempts made
        attempts: u32,
    },
    /// The actor was removed from the shop floor.
    Removed {
        /// NPC ID
        npc: NpcId,
    },
}

impl NpcEvent {
    /// Returns the NPC this event concerns.
    #[must_use]
    pub const fn npc(&self) -> NpcId {
        match self {
            Self::StateChanged { npc, .. }
            | Self::PickupStarted { npc, .. }
            | Self::PlaceStarted { npc, .. }
            | Self::NavigationFailed { npc, .. }
            | Self::Removed { npc } => *npc,
        }
    }
}

/// Events emitted by a dialogue engine. These are the whole UI contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DialogueEvent {
    /// A session began; the dialogue panel should be shown.
    SessionStarted {
        /// Session handle
        session: SessionId,
        /// Dialogue graph identifier
        dialogue: String,
        /// NPC the conversation is attached to, if any
        owner: Option<NpcId>,
    },
    /// A node is on screen.
    NodePresented {
        /// Session handle
        session: SessionId,
        /// Node identifier
        node: String,
        /// Resolved speaker name
        speaker: String,
        /// Body text
        text: String,
        /// Buttons to show
        choices: Vec<PresentedChoice>,
    },
    /// The session is over; the dialogue panel should be hidden.
    SessionEnded {
        /// Session handle
        session: SessionId,
        /// Why it ended
        reason: EndReason,
    },
}

impl DialogueEvent {
    /// Returns the session this event concerns.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        match self {
            Self::SessionStarted { session, .. }
            | Self::NodePresented { session, .. }
            | Self::SessionEnded { session, .. } => *session,
        }
    }
}

/// Identifier of a single subscriber on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber<E> {
    id: SubscriberId,
    sender: Sender<E>,
}

type Registry<E> = Mutex<Vec<Subscriber<E>>>;

/// Publish/subscribe bus for broadcasting events to subscribers.
pub struct EventBus<E> {
    /// Live subscribers
    subscribers: Arc<Registry<E>>,
    /// Next subscriber ID
    next_id: AtomicU64,
    /// Per-subscriber channel capacity
    capacity: usize,
    /// Events dropped because a subscriber was full
    dropped: AtomicU64,
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl<E> EventBus<E> {
    /// Creates a new event bus with the given per-subscriber capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<E> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = bounded(self.capacity);
        self.subscribers.lock().push(Subscriber { id, sender });
        Subscription {
            id,
            receiver,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns the number of events dropped because a subscriber was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the per-subscriber channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<E: Clone> EventBus<E> {
    /// Publishes an event to every subscriber.
    pub fn publish(&self, event: E) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| match sub.sender.try_send(event.clone()) {
            Ok(()) => true,
            // Non-blocking send - if full, event is dropped
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Receiving end of a bus registration. Dropping it unsubscribes.
pub struct Subscription<E> {
    id: SubscriberId,
    receiver: Receiver<E>,
    registry: Weak<Registry<E>>,
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.receiver.len())
            .finish()
    }
}

impl<E> Subscription<E> {
    /// Returns this subscriber's ID.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Takes the next pending event, if any.
    pub fn try_next(&self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    /// Drains all pending events.
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Explicitly unsubscribes. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().retain(|sub| sub.id != self.id);
        }
    }
}
