//! NPC phases and the transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Externally meaningful phase of a shop customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NpcPhase {
    /// Looking for something to collect.
    Idle,
    /// Walking to a reserved item.
    MovingToItem,
    /// Lingering at the item before taking it.
    WaitingAtItem,
    /// Taking the item.
    Pickup,
    /// Walking to the counter with held items.
    MovingToCounter,
    /// Putting held items down, one per step.
    Placing,
    /// Everything placed; waiting to be checked out.
    WaitingForCheckout,
    /// Walking out.
    MovingToExit,
    /// Left the shop. The actor should be removed.
    Terminal,
}

impl NpcPhase {
    /// Every phase, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::Idle,
        Self::MovingToItem,
        Self::WaitingAtItem,
        Self::Pickup,
        Self::MovingToCounter,
        Self::Placing,
        Self::WaitingForCheckout,
        Self::MovingToExit,
        Self::Terminal,
    ];

    /// Phases where the NPC waits on the navigator.
    #[must_use]
    pub const fn is_travelling(self) -> bool {
        matches!(
            self,
            Self::MovingToItem | Self::MovingToCounter | Self::MovingToExit
        )
    }

    /// Check if the NPC is done.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal)
    }

    /// Phase name for logs and UI.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::MovingToItem => "moving_to_item",
            Self::WaitingAtItem => "waiting_at_item",
            Self::Pickup => "pickup",
            Self::MovingToCounter => "moving_to_counter",
            Self::Placing => "placing",
            Self::WaitingForCheckout => "waiting_for_checkout",
            Self::MovingToExit => "moving_to_exit",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for NpcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that happened to an NPC that may move it to another phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NpcTrigger {
    /// The item source handed out a target.
    TargetFound,
    /// The navigator reported arrival.
    Arrived,
    /// A wait timer ran out.
    TimerElapsed,
    /// Another item is wanted and there is room to carry it.
    CollectMore,
    /// Collection is over for this trip.
    CollectionDone,
    /// The last held item was placed.
    HeldEmpty,
    /// The register asked the customer to leave.
    CheckoutTriggered,
    /// Navigation retries were exhausted.
    NavigationAbandoned,
    /// Idle while still holding items that need delivering.
    ResumeDelivery,
}

use NpcPhase as P;
use NpcTrigger as T;

/// Every legal `(from, trigger, to)` edge. Anything absent is rejected.
pub const TRANSITIONS: &[(NpcPhase, NpcTrigger, NpcPhase)] = &[
    (P::Idle, T::TargetFound, P::MovingToItem),
    (P::Idle, T::ResumeDelivery, P::MovingToCounter),
    (P::MovingToItem, T::Arrived, P::WaitingAtItem),
    (P::MovingToItem, T::NavigationAbandoned, P::Idle),
    (P::WaitingAtItem, T::TimerElapsed, P::Pickup),
    (P::Pickup, T::CollectMore, P::MovingToItem),
    (P::Pickup, T::CollectionDone, P::MovingToCounter),
    (P::MovingToCounter, T::Arrived, P::Placing),
    (P::MovingToCounter, T::NavigationAbandoned, P::Idle),
    (P::Placing, T::HeldEmpty, P::WaitingForCheckout),
    (P::WaitingForCheckout, T::CheckoutTriggered, P::MovingToExit),
    (P::MovingToExit, T::Arrived, P::Terminal),
    (P::MovingToExit, T::NavigationAbandoned, P::Terminal),
];

/// Look up the phase reached from `from` on `trigger`.
#[must_use]
pub fn transition(from: NpcPhase, trigger: NpcTrigger) -> Option<NpcPhase> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == trigger)
        .map(|(_, _, to)| *to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edges() {
        let path = [
            (T::TargetFound, P::MovingToItem),
            (T::Arrived, P::WaitingAtItem),
            (T::TimerElapsed, P::Pickup),
            (T::CollectionDone, P::MovingToCounter),
            (T::Arrived, P::Placing),
            (T::HeldEmpty, P::WaitingForCheckout),
            (T::CheckoutTriggered, P::MovingToExit),
            (T::Arrived, P::Terminal),
        ];

        let mut phase = P::Idle;
        for (trigger, expected) in path {
            phase = transition(phase, trigger).expect("edge exists");
            assert_eq!(phase, expected);
        }
    }

    #[test]
    fn test_checkout_only_from_waiting() {
        for phase in NpcPhase::ALL {
            let result = transition(phase, T::CheckoutTriggered);
            if phase == P::WaitingForCheckout {
                assert_eq!(result, Some(P::MovingToExit));
            } else {
                assert_eq!(result, None, "{phase} accepted checkout");
            }
        }
    }

    #[test]
    fn test_terminal_has_no_exits() {
        assert!(TRANSITIONS.iter().all(|(from, _, _)| *from != P::Terminal));
    }

    #[test]
    fn test_table_is_deterministic() {
        for (i, (from, trigger, _)) in TRANSITIONS.iter().enumerate() {
            let duplicates = TRANSITIONS[i + 1..]
                .iter()
                .filter(|(f, t, _)| f == from && t == trigger)
                .count();
            assert_eq!(duplicates, 0, "duplicate edge {from} / {trigger:?}");
        }
    }

    #[test]
    fn test_navigation_fallback_only_while_travelling() {
        for phase in NpcPhase::ALL {
            let has_fallback = transition(phase, T::NavigationAbandoned).is_some();
            assert_eq!(has_fallback, phase.is_travelling(), "{phase}");
        }
    }
}
