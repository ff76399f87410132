//! Conversation gate: decides when a customer can be talked to.
//!
//! Each customer gets one [`ConversationGate`]. It owns a rotation of dialogue
//! sources and starts sessions on a [`DialogueEngine`] it is handed, either
//! automatically (at most once per customer) or on request. The gate learns
//! about session ends through its engine subscription.

use std::fmt;
use std::sync::{Arc, OnceLock};

use shopfloor_common::{ActorRef, NpcId, WorldPos};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::ConversationConfig;
use crate::dialogue::{
    load, DialogueEngine, DialogueError, DialogueGraph, DialogueLoadError, DialogueLoadResult,
    DocumentFormat, SessionId,
};
use crate::events::{DialogueEvent, Subscription};
use crate::npc::{NpcPhase, NpcStateMachine};

/// Anything that can hand out a dialogue graph on demand.
pub trait DialogueSource: fmt::Debug + Send + Sync {
    /// Name used in logs.
    fn label(&self) -> &str;
    /// Produce the graph, loading it if needed.
    fn load(&self) -> DialogueLoadResult<Arc<DialogueGraph>>;
}

impl DialogueSource for Arc<DialogueGraph> {
    fn label(&self) -> &str {
        self.id()
    }

    fn load(&self) -> DialogueLoadResult<Arc<DialogueGraph>> {
        Ok(Arc::clone(self))
    }
}

/// Raw document parsed the first time it is needed.
///
/// A successful parse is cached; a failed one is retried on the next request.
pub struct DocumentSource {
    label: String,
    raw: String,
    format: DocumentFormat,
    cache: OnceLock<Arc<DialogueGraph>>,
}

impl DocumentSource {
    /// Wrap a document.
    pub fn new(label: impl Into<String>, raw: impl Into<String>, format: DocumentFormat) -> Self {
        Self {
            label: label.into(),
            raw: raw.into(),
            format,
            cache: OnceLock::new(),
        }
    }

    /// Check if the document has been parsed successfully.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cache.get().is_some()
    }
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSource")
            .field("label", &self.label)
            .field("format", &self.format)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl DialogueSource for DocumentSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn load(&self) -> DialogueLoadResult<Arc<DialogueGraph>> {
        if let Some(graph) = self.cache.get() {
            return Ok(Arc::clone(graph));
        }
        let loaded = load(&self.raw, self.format)?;
        for warning in &loaded.warnings {
            warn!(source = %self.label, "{warning}");
        }
        Ok(Arc::clone(self.cache.get_or_init(|| loaded.graph)))
    }
}

/// Line-of-sight queries.
pub trait SightLine {
    /// First actor blocking the straight line from `from` to `to`, if any.
    fn first_obstruction(&self, from: WorldPos, to: WorldPos) -> Option<ActorRef>;
}

/// Mock sight line for testing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSightLine {
    obstruction: Option<ActorRef>,
}

impl MockSightLine {
    /// Nothing in the way.
    #[must_use]
    pub const fn clear() -> Self {
        Self { obstruction: None }
    }

    /// Every ray hits `actor` first.
    #[must_use]
    pub const fn blocked_by(actor: ActorRef) -> Self {
        Self {
            obstruction: Some(actor),
        }
    }
}

impl SightLine for MockSightLine {
    fn first_obstruction(&self, _from: WorldPos, _to: WorldPos) -> Option<ActorRef> {
        self.obstruction
    }
}

/// Whoever wants to talk, usually the player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Requester {
    /// Actor identity, so a ray hitting the requester itself counts as clear
    pub actor: ActorRef,
    /// Current position
    pub position: WorldPos,
}

impl Requester {
    /// The player standing at `position`.
    #[must_use]
    pub const fn player(position: WorldPos) -> Self {
        Self {
            actor: ActorRef::Player,
            position,
        }
    }
}

/// How a conversation was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// Proximity trigger.
    Auto,
    /// Explicit request from UI or command layer.
    Manual,
}

/// Why a customer cannot be talked to right now.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Ineligible {
    /// Customer is busy
    #[error("customer is {0}, not waiting for checkout")]
    WrongPhase(NpcPhase),
    /// Requester is out of range
    #[error("requester too far: {distance:.1} > {radius:.1}")]
    TooFar {
        /// Current distance
        distance: f32,
        /// Configured radius
        radius: f32,
    },
    /// Something stands between the two
    #[error("line of sight blocked by {0:?}")]
    Obstructed(ActorRef),
    /// A conversation is already running
    #[error("{0} already in progress")]
    SessionActive(SessionId),
    /// The navigator does not know where the customer is
    #[error("customer position unknown")]
    UnknownPosition,
    /// The engine is running someone else's conversation
    #[error("engine busy with {0}")]
    EngineBusy(SessionId),
}

/// Error types for conversation requests.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// NPC not on the floor
    #[error("NPC not found: {0}")]
    UnknownNpc(NpcId),
    /// Gate conditions not met
    #[error("Conversation not allowed: {0}")]
    Ineligible(Ineligible),
    /// Nothing to say
    #[error("No dialogue sources configured")]
    NoSources,
    /// The chosen document did not load
    #[error("Dialogue source {source_label:?} failed to load: {error}")]
    Load {
        /// Source that failed
        source_label: String,
        /// Underlying failure
        error: DialogueLoadError,
    },
    /// The engine refused
    #[error(transparent)]
    Dialogue(#[from] DialogueError),
}

/// Result type for conversation requests.
pub type ConversationResult<T> = Result<T, ConversationError>;

/// Per-customer conversation policy.
pub struct ConversationGate {
    npc: NpcId,
    config: ConversationConfig,
    sources: Vec<Arc<dyn DialogueSource>>,
    next_source: usize,
    auto_fired: bool,
    in_progress: Option<SessionId>,
    since_check: f32,
    engine_events: Subscription<DialogueEvent>,
}

impl fmt::Debug for ConversationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationGate")
            .field("npc", &self.npc)
            .field("sources", &self.sources.len())
            .field("next_source", &self.next_source)
            .field("auto_fired", &self.auto_fired)
            .field("in_progress", &self.in_progress)
            .finish_non_exhaustive()
    }
}

impl ConversationGate {
    /// Create a gate for `npc`, listening to `engine`.
    #[must_use]
    pub fn new(
        npc: NpcId,
        sources: Vec<Arc<dyn DialogueSource>>,
        config: ConversationConfig,
        engine: &DialogueEngine,
    ) -> Self {
        Self {
            npc,
            config,
            sources,
            next_source: 0,
            auto_fired: false,
            in_progress: None,
            since_check: 0.0,
            engine_events: engine.subscribe(),
        }
    }

    /// NPC this gate belongs to.
    #[must_use]
    pub const fn npc(&self) -> NpcId {
        self.npc
    }

    /// Session started by this gate that has not ended yet.
    #[must_use]
    pub const fn in_progress(&self) -> Option<SessionId> {
        self.in_progress
    }

    /// Check if the automatic trigger has been used up.
    #[must_use]
    pub const fn auto_fired(&self) -> bool {
        self.auto_fired
    }

    /// Index of the source the next conversation will use.
    #[must_use]
    pub const fn next_source(&self) -> usize {
        self.next_source
    }

    /// Evaluate every automatic-trigger condition. Never mutates anything.
    pub fn eligibility<S: SightLine>(
        &self,
        npc: &NpcStateMachine,
        npc_position: Option<WorldPos>,
        requester: &Requester,
        sight: &S,
    ) -> Result<(), Ineligible> {
        if npc.phase() != NpcPhase::WaitingForCheckout {
            return Err(Ineligible::WrongPhase(npc.phase()));
        }
        if let Some(active) = self.in_progress {
            return Err(Ineligible::SessionActive(active));
        }
        let position = npc_position.ok_or(Ineligible::UnknownPosition)?;
        let distance = position.distance(requester.position);
        if distance > self.config.trigger_radius {
            return Err(Ineligible::TooFar {
                distance,
                radius: self.config.trigger_radius,
            });
        }
        match sight.first_obstruction(position, requester.position) {
            Some(actor) if actor != requester.actor => Err(Ineligible::Obstructed(actor)),
            _ => Ok(()),
        }
    }

    /// Cadenced automatic check. Starts at most one conversation per gate lifetime.
    pub fn update<S: SightLine>(
        &mut self,
        dt: f32,
        npc: &NpcStateMachine,
        npc_position: Option<WorldPos>,
        requester: Option<&Requester>,
        sight: &S,
        engine: &mut DialogueEngine,
    ) -> ConversationResult<Option<SessionId>> {
        self.sync(engine);
        if self.auto_fired {
            return Ok(None);
        }

        self.since_check += dt;
        if self.since_check < self.config.check_interval_secs {
            return Ok(None);
        }
        self.since_check = 0.0;

        let Some(requester) = requester else {
            return Ok(None);
        };
        if let Err(reason) = self.eligibility(npc, npc_position, requester, sight) {
            trace!(npc = %self.npc, %reason, "Not eligible for conversation");
            return Ok(None);
        }
        // Automatic triggers never take over; the chance is kept for a later check.
        if let Some(active) = engine.active_session() {
            let reason = Ineligible::EngineBusy(active);
            trace!(npc = %self.npc, %reason, "Not eligible for conversation");
            return Ok(None);
        }

        self.auto_fired = true;
        self.begin(engine, TriggerKind::Auto).map(Some)
    }

    /// Explicit request. Skips distance and sight checks.
    pub fn request(
        &mut self,
        npc: &NpcStateMachine,
        engine: &mut DialogueEngine,
    ) -> ConversationResult<SessionId> {
        self.sync(engine);
        if npc.phase() != NpcPhase::WaitingForCheckout {
            debug!(npc = %self.npc, phase = %npc.phase(), "Conversation request rejected");
            return Err(ConversationError::Ineligible(Ineligible::WrongPhase(npc.phase())));
        }
        if let Some(active) = self.in_progress {
            debug!(npc = %self.npc, %active, "Conversation request rejected, session running");
            return Err(ConversationError::Ineligible(Ineligible::SessionActive(active)));
        }
        self.begin(engine, TriggerKind::Manual)
    }

    /// Observe session ends and clear the in-progress marker.
    pub fn sync(&mut self, engine: &DialogueEngine) {
        for event in self.engine_events.drain() {
            if let DialogueEvent::SessionEnded { session, reason } = event {
                if self.in_progress == Some(session) {
                    debug!(npc = %self.npc, %session, ?reason, "Conversation finished");
                    self.in_progress = None;
                }
            }
        }
        // Covers events lost to a full channel.
        if let Some(session) = self.in_progress {
            if engine.active_session() != Some(session) {
                self.in_progress = None;
            }
        }
    }

    /// End this gate's conversation, if it is still on the engine.
    pub fn close(&mut self, engine: &mut DialogueEngine) -> bool {
        let ended = self.in_progress.is_some_and(|session| engine.end_if(session));
        self.sync(engine);
        self.in_progress = None;
        ended
    }

    fn begin(
        &mut self,
        engine: &mut DialogueEngine,
        kind: TriggerKind,
    ) -> ConversationResult<SessionId> {
        if self.sources.is_empty() {
            return Err(ConversationError::NoSources);
        }
        let index = self.next_source % self.sources.len();
        self.next_source = (index + 1) % self.sources.len();
        let source = Arc::clone(&self.sources[index]);

        let graph = source.load().map_err(|error| {
            warn!(npc = %self.npc, source = source.label(), %error, "Dialogue source failed to load");
            ConversationError::Load {
                source_label: source.label().to_string(),
                error,
            }
        })?;
        let session = engine.start_session(graph, Some(self.npc))?;
        self.in_progress = Some(session);
        info!(npc = %self.npc, %session, source = source.label(), ?kind, "Conversation started");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NpcConfig;
    use crate::dialogue::{load_json, ChoiceOutcome, EndReason};
    use crate::events::{EventBus, NpcEvent};
    use crate::npc::{Counter, MockShopWorld};

    const HELLO: &str = r#"{ "id": "hello", "speaker": "Customer", "start_node": "start",
        "nodes": [{ "id": "start", "text": "Hi", "responses": [{ "text": "Bye", "target": "" }] }] }"#;
    const WEATHER: &str = r#"{ "id": "weather", "speaker": "Customer", "start_node": "start",
        "nodes": [{ "id": "start", "text": "Cold out." }] }"#;

    fn sources() -> Vec<Arc<dyn DialogueSource>> {
        let hello: Arc<dyn DialogueSource> = Arc::new(load_json(HELLO).expect("valid").graph);
        let weather: Arc<dyn DialogueSource> =
            Arc::new(DocumentSource::new("weather", WEATHER, DocumentFormat::Json));
        vec![hello, weather]
    }

    fn waiting_npc() -> (NpcStateMachine, WorldPos) {
        let bus = EventBus::<NpcEvent>::default();
        let mut world = MockShopWorld::mock(1, 4);
        let mut npc = NpcStateMachine::new(NpcId::new(), 1, NpcConfig::default());
        for _ in 0..100 {
            if npc.phase() == NpcPhase::WaitingForCheckout {
                break;
            }
            npc.step(0.1, &mut world, &bus).expect("mock world is reachable");
        }
        assert_eq!(npc.phase(), NpcPhase::WaitingForCheckout);
        (npc, world.counter.position())
    }

    fn config() -> ConversationConfig {
        ConversationConfig {
            check_interval_secs: 0.0,
            ..ConversationConfig::default()
        }
    }

    fn near(pos: WorldPos) -> Requester {
        Requester::player(WorldPos::new(pos.x + 1.0, pos.y, pos.z))
    }

    #[test]
    fn test_auto_trigger_fires_once() {
        let (npc, pos) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let mut gate = ConversationGate::new(npc.id(), sources(), config(), &engine);
        let requester = near(pos);
        let sight = MockSightLine::clear();

        let first = gate
            .update(0.1, &npc, Some(pos), Some(&requester), &sight, &mut engine)
            .expect("starts");
        assert!(first.is_some());
        assert!(gate.auto_fired());

        engine.end_session();
        let second = gate
            .update(0.1, &npc, Some(pos), Some(&requester), &sight, &mut engine)
            .expect("no error");
        assert_eq!(second, None);
        assert!(!engine.is_active());
    }

    #[test]
    fn test_auto_trigger_respects_cadence() {
        let (npc, pos) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let cadence = ConversationConfig {
            check_interval_secs: 0.5,
            ..ConversationConfig::default()
        };
        let mut gate = ConversationGate::new(npc.id(), sources(), cadence, &engine);
        let requester = near(pos);
        let sight = MockSightLine::clear();

        let early = gate
            .update(0.2, &npc, Some(pos), Some(&requester), &sight, &mut engine)
            .expect("no error");
        assert_eq!(early, None);
        let due = gate
            .update(0.4, &npc, Some(pos), Some(&requester), &sight, &mut engine)
            .expect("starts");
        assert!(due.is_some());
    }

    #[test]
    fn test_eligibility_conditions() {
        let (npc, pos) = waiting_npc();
        let engine = DialogueEngine::default();
        let gate = ConversationGate::new(npc.id(), sources(), config(), &engine);
        let clear = MockSightLine::clear();

        assert_eq!(gate.eligibility(&npc, Some(pos), &near(pos), &clear), Ok(()));

        let far = Requester::player(WorldPos::new(pos.x + 10.0, pos.y, pos.z));
        assert!(matches!(
            gate.eligibility(&npc, Some(pos), &far, &clear),
            Err(Ineligible::TooFar { .. })
        ));

        let shelf = ActorRef::Scenery(3);
        assert_eq!(
            gate.eligibility(&npc, Some(pos), &near(pos), &MockSightLine::blocked_by(shelf)),
            Err(Ineligible::Obstructed(shelf))
        );

        let hits_player = MockSightLine::blocked_by(ActorRef::Player);
        assert_eq!(gate.eligibility(&npc, Some(pos), &near(pos), &hits_player), Ok(()));

        assert_eq!(
            gate.eligibility(&npc, None, &near(pos), &clear),
            Err(Ineligible::UnknownPosition)
        );
    }

    #[test]
    fn test_wrong_phase_blocks_both_triggers() {
        let npc = NpcStateMachine::new(NpcId::new(), 1, NpcConfig::default());
        let mut engine = DialogueEngine::default();
        let mut gate = ConversationGate::new(npc.id(), sources(), config(), &engine);
        let pos = WorldPos::ORIGIN;

        assert_eq!(
            gate.eligibility(&npc, Some(pos), &near(pos), &MockSightLine::clear()),
            Err(Ineligible::WrongPhase(NpcPhase::Idle))
        );
        assert!(matches!(
            gate.request(&npc, &mut engine),
            Err(ConversationError::Ineligible(Ineligible::WrongPhase(NpcPhase::Idle)))
        ));
    }

    #[test]
    fn test_manual_requests_repeat_and_rotate() {
        let (npc, _pos) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let mut gate = ConversationGate::new(npc.id(), sources(), config(), &engine);

        let mut dialogues = Vec::new();
        for _ in 0..3 {
            gate.request(&npc, &mut engine).expect("eligible");
            dialogues.push(engine.session().map(|s| s.graph().id().to_string()));
            engine.end_session();
        }

        assert_eq!(
            dialogues,
            vec![
                Some("hello".to_string()),
                Some("weather".to_string()),
                Some("hello".to_string())
            ]
        );
    }

    #[test]
    fn test_manual_rejected_while_running() {
        let (npc, _pos) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let mut gate = ConversationGate::new(npc.id(), sources(), config(), &engine);

        let session = gate.request(&npc, &mut engine).expect("eligible");
        assert!(matches!(
            gate.request(&npc, &mut engine),
            Err(ConversationError::Ineligible(Ineligible::SessionActive(s))) if s == session
        ));

        assert_eq!(engine.choose_response(0), Ok(ChoiceOutcome::Ended));
        gate.sync(&engine);
        assert_eq!(gate.in_progress(), None);
        assert!(gate.request(&npc, &mut engine).is_ok());
    }

    #[test]
    fn test_manual_skips_distance_and_sight() {
        let (npc, _pos) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let mut gate = ConversationGate::new(npc.id(), sources(), config(), &engine);

        assert!(gate.request(&npc, &mut engine).is_ok());
        assert_eq!(engine.session().and_then(|s| s.owner()), Some(npc.id()));
    }

    #[test]
    fn test_failed_source_advances_rotation() {
        let (npc, _pos) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let broken: Arc<dyn DialogueSource> =
            Arc::new(DocumentSource::new("broken", "{ not json", DocumentFormat::Json));
        let good: Arc<dyn DialogueSource> = Arc::new(load_json(HELLO).expect("valid").graph);
        let mut gate = ConversationGate::new(npc.id(), vec![broken, good], config(), &engine);

        assert!(matches!(
            gate.request(&npc, &mut engine),
            Err(ConversationError::Load { ref source_label, .. }) if source_label == "broken"
        ));
        assert!(!engine.is_active());
        assert!(gate.request(&npc, &mut engine).is_ok());
    }

    #[test]
    fn test_no_sources() {
        let (npc, _pos) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let mut gate = ConversationGate::new(npc.id(), Vec::new(), config(), &engine);
        assert!(matches!(
            gate.request(&npc, &mut engine),
            Err(ConversationError::NoSources)
        ));
    }

    #[test]
    fn test_document_source_caches() {
        let source = DocumentSource::new("weather", WEATHER, DocumentFormat::Json);
        assert!(!source.is_loaded());
        let a = source.load().expect("valid");
        let b = source.load().expect("valid");
        assert!(source.is_loaded());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_takeover_clears_other_gate() {
        let (npc_a, _) = waiting_npc();
        let (npc_b, _) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let events = engine.subscribe();
        let mut gate_a = ConversationGate::new(npc_a.id(), sources(), config(), &engine);
        let mut gate_b = ConversationGate::new(npc_b.id(), sources(), config(), &engine);

        let first = gate_a.request(&npc_a, &mut engine).expect("eligible");
        gate_b.request(&npc_b, &mut engine).expect("takes over");
        gate_a.sync(&engine);

        assert_eq!(gate_a.in_progress(), None);
        assert!(events.drain().contains(&DialogueEvent::SessionEnded {
            session: first,
            reason: EndReason::TakenOver
        }));
    }

    #[test]
    fn test_auto_trigger_waits_for_busy_engine() {
        let (npc_a, pos) = waiting_npc();
        let (npc_b, _) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let mut gate_a = ConversationGate::new(npc_a.id(), sources(), config(), &engine);
        let mut gate_b = ConversationGate::new(npc_b.id(), sources(), config(), &engine);
        let requester = near(pos);
        let sight = MockSightLine::clear();

        let first = gate_a
            .update(0.1, &npc_a, Some(pos), Some(&requester), &sight, &mut engine)
            .expect("starts");
        let blocked = gate_b
            .update(0.1, &npc_b, Some(pos), Some(&requester), &sight, &mut engine)
            .expect("no error");

        assert_eq!(blocked, None);
        assert!(!gate_b.auto_fired());
        assert_eq!(engine.active_session(), first);

        engine.end_session();
        let later = gate_b
            .update(0.1, &npc_b, Some(pos), Some(&requester), &sight, &mut engine)
            .expect("starts");
        assert!(later.is_some());
        assert!(gate_b.auto_fired());
    }

    #[test]
    fn test_close_ends_own_session_only() {
        let (npc, _) = waiting_npc();
        let mut engine = DialogueEngine::default();
        let mut gate = ConversationGate::new(npc.id(), sources(), config(), &engine);

        assert!(!gate.close(&mut engine));
        gate.request(&npc, &mut engine).expect("eligible");
        assert!(gate.close(&mut engine));
        assert!(!engine.is_active());
        assert_eq!(gate.in_progress(), None);
    }
}
