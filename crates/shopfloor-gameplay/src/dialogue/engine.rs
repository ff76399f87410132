//! Dialogue engine: one active conversation at a time.
//!
//! The engine is either idle or holds exactly one [`DialogueSession`]. Every
//! change visible to the UI goes out as a [`DialogueEvent`]; nothing else
//! couples the engine to presentation.

use std::sync::Arc;

use shopfloor_common::NpcId;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::graph::{DialogueGraph, DialogueNode};
use super::session::{
    ChoiceAction, ChoiceId, ChoiceSelector, DialogueSession, EndReason, HistoryEntry,
    PresentedChoice, SessionId, PLAYER_SPEAKER,
};
use crate::config::{ConversationConfig, TakeoverPolicy};
use crate::events::{DialogueEvent, EventBus, Subscription};

/// Error types for dialogue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialogueError {
    /// No active dialogue
    #[error("No active dialogue session")]
    NoActiveSession,
    /// Invalid choice index
    #[error("Invalid choice index: {0}")]
    InvalidChoice(usize),
    /// Choice handle belongs to a node no longer on screen
    #[error("Stale choice: {0}")]
    StaleChoice(ChoiceId),
    /// Engine refused to replace the running session
    #[error("Dialogue engine busy with {active}")]
    InvalidState {
        /// Session that is still running
        active: SessionId,
    },
    /// A response referenced a node the graph does not contain
    #[error("Dialogue {dialogue:?} references missing node {node:?}")]
    MissingNode {
        /// Dialogue identifier
        dialogue: String,
        /// Unresolved node identifier
        node: String,
    },
}

impl DialogueError {
    /// Usage errors are rejected without side effects; the session is untouched.
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        !matches!(self, Self::MissingNode { .. })
    }
}

/// Result type for dialogue operations.
pub type DialogueResult<T> = Result<T, DialogueError>;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// No session.
    Idle,
    /// A session is running.
    Active,
}

/// Result of a successful choice selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceOutcome {
    /// The named node is now presented.
    Presented(String),
    /// The session ended normally.
    Ended,
}

/// Walks dialogue graphs and publishes the UI events.
#[derive(Debug)]
pub struct DialogueEngine {
    session: Option<DialogueSession>,
    events: EventBus<DialogueEvent>,
    config: ConversationConfig,
    generation: u64,
}

impl Default for DialogueEngine {
    fn default() -> Self {
        Self::new(ConversationConfig::default())
    }
}

impl DialogueEngine {
    /// Create an idle engine.
    #[must_use]
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            session: None,
            events: EventBus::default(),
            config,
            generation: 0,
        }
    }

    /// Subscribe to the engine's events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<DialogueEvent> {
        self.events.subscribe()
    }

    /// The engine's event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus<DialogueEvent> {
        &self.events
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.session.is_some() {
            EngineState::Active
        } else {
            EngineState::Idle
        }
    }

    /// Check if a session is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// The running session.
    #[must_use]
    pub fn session(&self) -> Option<&DialogueSession> {
        self.session.as_ref()
    }

    /// ID of the running session.
    #[must_use]
    pub fn active_session(&self) -> Option<SessionId> {
        self.session.as_ref().map(DialogueSession::id)
    }

    /// Node currently on screen.
    #[must_use]
    pub fn current_node(&self) -> Option<&DialogueNode> {
        self.session.as_ref()?.current_node()
    }

    /// Choices currently on screen.
    #[must_use]
    pub fn current_choices(&self) -> &[PresentedChoice] {
        match &self.session {
            Some(session) => session.choices(),
            None => &[],
        }
    }

    /// Transcript of the running session.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.session
            .as_ref()
            .map(|s| s.history().cloned().collect())
            .unwrap_or_default()
    }

    /// Start a session on `graph`.
    ///
    /// With [`TakeoverPolicy::Replace`] a running session is ended first with
    /// [`EndReason::TakenOver`]; with [`TakeoverPolicy::Reject`] the call fails.
    pub fn start_session(
        &mut self,
        graph: Arc<DialogueGraph>,
        owner: Option<NpcId>,
    ) -> DialogueResult<SessionId> {
        if let Some(active) = self.active_session() {
            match self.config.takeover {
                TakeoverPolicy::Reject => {
                    debug!(%active, dialogue = %graph.id(), "Session start rejected, engine busy");
                    return Err(DialogueError::InvalidState { active });
                },
                TakeoverPolicy::Replace => {
                    warn!(%active, dialogue = %graph.id(), "Session taken over by new conversation");
                    self.finish(EndReason::TakenOver);
                },
            }
        }

        let start = graph.start_node_id().to_string();
        if !graph.contains(&start) {
            return Err(DialogueError::MissingNode {
                dialogue: graph.id().to_string(),
                node: start,
            });
        }

        let session = DialogueSession::new(graph, owner, self.config.history_limit);
        let id = session.id();
        info!(session = %id, dialogue = %session.graph().id(), ?owner, "Dialogue session started");
        self.events.publish(DialogueEvent::SessionStarted {
            session: id,
            dialogue: session.graph().id().to_string(),
            owner,
        });
        self.session = Some(session);
        self.present_node(&start);
        Ok(id)
    }

    /// Select one of the current node's choices.
    pub fn choose_response(
        &mut self,
        selector: impl Into<ChoiceSelector>,
    ) -> DialogueResult<ChoiceOutcome> {
        let selector = selector.into();
        let Some(session) = self.session.as_mut() else {
            debug!(?selector, "Choice ignored, no active session");
            return Err(DialogueError::NoActiveSession);
        };

        let Some(choice) = session.resolve(selector).cloned() else {
            debug!(session = %session.id(), ?selector, "Choice rejected");
            return Err(match selector {
                ChoiceSelector::Index(index) => DialogueError::InvalidChoice(index),
                ChoiceSelector::Id(id) => DialogueError::StaleChoice(id),
            });
        };

        match choice.action {
            ChoiceAction::Close => {
                self.finish(EndReason::Completed);
                Ok(ChoiceOutcome::Ended)
            },
            ChoiceAction::End => {
                session.record(PLAYER_SPEAKER, choice.text);
                self.finish(EndReason::Completed);
                Ok(ChoiceOutcome::Ended)
            },
            ChoiceAction::Goto(target) => {
                if !session.graph().contains(&target) {
                    let dialogue = session.graph().id().to_string();
                    error!(
                        session = %session.id(),
                        %dialogue,
                        node = %target,
                        "Response targets missing node, ending session"
                    );
                    self.finish(EndReason::MissingNode {
                        node: target.clone(),
                    });
                    return Err(DialogueError::MissingNode {
                        dialogue,
                        node: target,
                    });
                }
                session.record(PLAYER_SPEAKER, choice.text);
                self.present_node(&target);
                Ok(ChoiceOutcome::Presented(target))
            },
        }
    }

    /// End the running session. Returns false (and does nothing) when idle.
    pub fn end_session(&mut self) -> bool {
        if self.session.is_none() {
            return false;
        }
        self.finish(EndReason::Cancelled);
        true
    }

    /// End the running session only if it is `session`.
    pub fn end_if(&mut self, session: SessionId) -> bool {
        if self.active_session() == Some(session) {
            self.finish(EndReason::Cancelled);
            true
        } else {
            false
        }
    }

    /// Show a node: the single place where `NodePresented` is emitted.
    fn present_node(&mut self, node_id: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let graph = Arc::clone(session.graph());
        let Some(node) = graph.node(node_id) else {
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let choices: Vec<PresentedChoice> = if node.is_terminal() {
            vec![PresentedChoice {
                id: ChoiceId {
                    generation,
                    index: 0,
                },
                text: self.config.close_label.clone(),
                action: ChoiceAction::Close,
            }]
        } else {
            node.responses
                .iter()
                .enumerate()
                .map(|(index, response)| PresentedChoice {
                    id: ChoiceId {
                        generation,
                        index,
                    },
                    text: response.text.clone(),
                    action: if response.ends_conversation() {
                        ChoiceAction::End
                    } else {
                        ChoiceAction::Goto(response.target.clone())
                    },
                })
                .collect()
        };

        let speaker = graph.speaker_for(node).to_string();
        session.enter(node_id, generation, choices.clone());
        session.record(speaker.clone(), node.text.clone());
        debug!(session = %session.id(), node = node_id, "Presenting node");

        self.events.publish(DialogueEvent::NodePresented {
            session: session.id(),
            node: node_id.to_string(),
            speaker,
            text: node.text.clone(),
            choices,
        });
    }

    /// Tear down the session and announce it.
    fn finish(&mut self, reason: EndReason) {
        if let Some(session) = self.session.take() {
            info!(session = %session.id(), ?reason, "Dialogue session ended");
            self.events.publish(DialogueEvent::SessionEnded {
                session: session.id(),
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::{load_json, DialogueResponse};
    use proptest::prelude::*;

    fn engine() -> (DialogueEngine, Subscription<DialogueEvent>) {
        let engine = DialogueEngine::default();
        let events = engine.subscribe();
        (engine, events)
    }

    fn graph(raw: &str) -> Arc<DialogueGraph> {
        load_json(raw).expect("valid document").graph
    }

    fn branching() -> Arc<DialogueGraph> {
        Arc::new(
            DialogueGraph::builder("chat", "Customer", "start")
                .node(
                    DialogueNode::new("start", "Hi")
                        .with_response(DialogueResponse::new("Weather?", "weather"))
                        .with_response(DialogueResponse::end("Bye")),
                )
                .node(
                    DialogueNode::new("weather", "Raining again.")
                        .with_response(DialogueResponse::new("Back", "start")),
                )
                .node(DialogueNode::new("done", "Take care."))
                .build()
                .expect("valid graph"),
        )
    }

    #[test]
    fn test_scenario_single_goodbye() {
        let (mut engine, events) = engine();
        let g = graph(
            r#"{ "id": "a", "speaker": "Customer", "start_node": "start",
                 "nodes": [{ "id": "start", "text": "Hi", "responses": [{ "text": "Bye", "target": "" }] }] }"#,
        );

        let session = engine.start_session(g, None).expect("starts");
        assert_eq!(engine.current_node().map(|n| n.text.as_str()), Some("Hi"));

        assert_eq!(engine.choose_response(0), Ok(ChoiceOutcome::Ended));
        assert_eq!(engine.state(), EngineState::Idle);

        let received = events.drain();
        assert!(matches!(received[0], DialogueEvent::SessionStarted { .. }));
        assert!(matches!(
            &received[1],
            DialogueEvent::NodePresented { text, speaker, .. } if text == "Hi" && speaker == "Customer"
        ));
        assert_eq!(
            received[2],
            DialogueEvent::SessionEnded {
                session,
                reason: EndReason::Completed
            }
        );
    }

    #[test]
    fn test_scenario_missing_target() {
        let (mut engine, events) = engine();
        let g = graph(
            r#"{ "id": "broken", "speaker": "S", "start_node": "start",
                 "nodes": [{ "id": "start", "text": "Hi", "responses": [{ "text": "Go", "target": "missing" }] }] }"#,
        );

        engine.start_session(g, None).expect("starts");
        let result = engine.choose_response(0);

        assert_eq!(
            result,
            Err(DialogueError::MissingNode {
                dialogue: "broken".to_string(),
                node: "missing".to_string()
            })
        );
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.current_node().is_none());
        assert!(events.drain().iter().any(|e| matches!(
            e,
            DialogueEvent::SessionEnded { reason: EndReason::MissingNode { node }, .. } if node == "missing"
        )));
    }

    #[test]
    fn test_terminal_node_gets_close_choice() {
        let (mut engine, _events) = engine();
        let g = Arc::new(
            DialogueGraph::builder("t", "S", "end")
                .node(DialogueNode::new("end", "That's all."))
                .build()
                .expect("valid graph"),
        );

        engine.start_session(g, None).expect("starts");
        let choices = engine.current_choices();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].action, ChoiceAction::Close);
        assert_eq!(choices[0].text, "Close");

        assert_eq!(engine.choose_response(0), Ok(ChoiceOutcome::Ended));
        assert!(!engine.is_active());
    }

    #[test]
    fn test_navigation_and_cycles() {
        let (mut engine, _events) = engine();
        engine.start_session(branching(), None).expect("starts");

        assert_eq!(
            engine.choose_response(0),
            Ok(ChoiceOutcome::Presented("weather".to_string()))
        );
        assert_eq!(
            engine.choose_response(0),
            Ok(ChoiceOutcome::Presented("start".to_string()))
        );
        assert_eq!(engine.current_node().map(|n| n.id.as_str()), Some("start"));
    }

    #[test]
    fn test_invalid_choice_has_no_side_effect() {
        let (mut engine, events) = engine();
        engine.start_session(branching(), None).expect("starts");
        events.drain();

        assert_eq!(engine.choose_response(9), Err(DialogueError::InvalidChoice(9)));
        assert_eq!(engine.current_node().map(|n| n.id.as_str()), Some("start"));
        assert!(events.drain().is_empty());
    }

    #[test]
    fn test_stale_choice_id_rejected() {
        let (mut engine, _events) = engine();
        engine.start_session(branching(), None).expect("starts");
        let stale = engine.current_choices()[0].id;
        engine.choose_response(stale).expect("fresh id works");

        assert_eq!(engine.current_node().map(|n| n.id.as_str()), Some("weather"));
        assert_eq!(engine.choose_response(stale), Err(DialogueError::StaleChoice(stale)));
        assert_eq!(engine.current_node().map(|n| n.id.as_str()), Some("weather"));
    }

    #[test]
    fn test_choice_ids_on_wide_node() {
        let picked = 65_540;
        let mut menu = DialogueNode::new("menu", "Anything else?");
        for i in 0..70_000 {
            let response = if i == picked {
                DialogueResponse::new("That one", "picked")
            } else {
                DialogueResponse::end(format!("No {i}"))
            };
            menu = menu.with_response(response);
        }
        let graph = DialogueGraph::builder("wide", "Customer", "menu")
            .node(menu)
            .node(DialogueNode::new("picked", "Good choice."))
            .build()
            .expect("valid graph");

        let (mut engine, _events) = engine();
        engine.start_session(Arc::new(graph), None).expect("starts");
        let id = engine.current_choices()[picked].id;

        assert_eq!(id.index, picked);
        assert_eq!(
            engine.choose_response(id),
            Ok(ChoiceOutcome::Presented("picked".to_string()))
        );
    }

    #[test]
    fn test_choose_without_session() {
        let (mut engine, _events) = engine();
        assert_eq!(engine.choose_response(0), Err(DialogueError::NoActiveSession));
    }

    #[test]
    fn test_end_session_idempotent() {
        let (mut engine, events) = engine();
        engine.start_session(branching(), None).expect("starts");

        assert!(engine.end_session());
        assert!(!engine.end_session());
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.current_choices().is_empty());

        let ended = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, DialogueEvent::SessionEnded { .. }))
            .count();
        assert_eq!(ended, 1);
    }

    #[test]
    fn test_takeover_ends_previous_session() {
        let (mut engine, events) = engine();
        let first = engine.start_session(branching(), None).expect("starts");
        let second = engine.start_session(branching(), None).expect("takes over");

        assert_ne!(first, second);
        assert_eq!(engine.active_session(), Some(second));
        assert!(events.drain().contains(&DialogueEvent::SessionEnded {
            session: first,
            reason: EndReason::TakenOver
        }));
    }

    #[test]
    fn test_reject_policy_keeps_running_session() {
        let mut engine = DialogueEngine::new(ConversationConfig {
            takeover: TakeoverPolicy::Reject,
            ..ConversationConfig::default()
        });
        let first = engine.start_session(branching(), None).expect("starts");

        assert_eq!(
            engine.start_session(branching(), None),
            Err(DialogueError::InvalidState { active: first })
        );
        assert_eq!(engine.active_session(), Some(first));
    }

    #[test]
    fn test_history_records_both_sides() {
        let (mut engine, _events) = engine();
        engine.start_session(branching(), None).expect("starts");
        engine.choose_response(0).expect("valid");

        let history = engine.history();
        let lines: Vec<(&str, &str)> = history
            .iter()
            .map(|e| (e.speaker.as_str(), e.text.as_str()))
            .collect();
        assert_eq!(
            lines,
            vec![
                ("Customer", "Hi"),
                ("Player", "Weather?"),
                ("Customer", "Raining again.")
            ]
        );
    }

    #[test]
    fn test_end_if_only_matches_own_session() {
        let (mut engine, _events) = engine();
        let session = engine.start_session(branching(), None).expect("starts");
        engine.end_session();
        let other = engine.start_session(branching(), None).expect("starts");

        assert!(!engine.end_if(session));
        assert!(engine.end_if(other));
    }

    /// Acyclic graph: every response ends or points at a later node.
    fn forward_graph(nodes: usize, edges: &[Vec<u8>]) -> Arc<DialogueGraph> {
        let mut builder = DialogueGraph::builder("walk", "Customer", "n0");
        for i in 0..nodes {
            let mut node = DialogueNode::new(format!("n{i}"), format!("line {i}"));
            let later = nodes - i - 1;
            for &e in edges.get(i).map_or(&[][..], Vec::as_slice) {
                node = if later == 0 || e % 3 == 0 {
                    node.with_response(DialogueResponse::end("Bye"))
                } else {
                    let target = i + 1 + usize::from(e) % later;
                    node.with_response(DialogueResponse::new("Go on", format!("n{target}")))
                };
            }
            builder.add_node(node);
        }
        Arc::new(builder.build().expect("start node exists"))
    }

    proptest! {
        #[test]
        fn prop_forward_walk_ends_cleanly(
            nodes in 1usize..8,
            edges in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..4), 8),
            picks in prop::collection::vec(any::<u8>(), 9),
        ) {
            let (mut engine, events) = engine();
            engine.start_session(forward_graph(nodes, &edges), None).expect("starts");

            for pick in picks {
                if !engine.is_active() {
                    break;
                }
                prop_assert!(engine.current_node().is_some());
                let choices = engine.current_choices().len();
                prop_assert!(choices > 0);
                engine
                    .choose_response(usize::from(pick) % choices)
                    .expect("presented choice");
            }

            prop_assert_eq!(engine.state(), EngineState::Idle);
            prop_assert!(engine.current_node().is_none());
            prop_assert!(!engine.end_session());

            let ended = events
                .drain()
                .into_iter()
                .filter(|e| matches!(e, DialogueEvent::SessionEnded { .. }))
                .count();
            prop_assert_eq!(ended, 1);
        }
    }
}
