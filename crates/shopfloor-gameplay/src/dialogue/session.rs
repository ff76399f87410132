//! Runtime state of one conversation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shopfloor_common::NpcId;

use super::graph::{DialogueGraph, DialogueNode};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Handle identifying one dialogue session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Stable handle for a presented choice. Becomes stale once another node is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChoiceId {
    /// Presentation counter of the node the choice belongs to
    pub generation: u64,
    /// Position among that node's choices
    pub index: usize,
}

impl fmt::Display for ChoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation, self.index)
    }
}

/// What selecting a presented choice does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChoiceAction {
    /// Move to another node.
    Goto(String),
    /// Authored response that ends the conversation.
    End,
    /// Synthesized close button on a terminal node.
    Close,
}

/// A button as shown to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentedChoice {
    /// Handle to pass back when selecting
    pub id: ChoiceId,
    /// Button label
    pub text: String,
    /// Effect of selecting it
    pub action: ChoiceAction,
}

/// How a choice is picked: by position or by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceSelector {
    /// Position among the current node's choices.
    Index(usize),
    /// Handle from a `NodePresented` event.
    Id(ChoiceId),
}

impl From<usize> for ChoiceSelector {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<ChoiceId> for ChoiceSelector {
    fn from(id: ChoiceId) -> Self {
        Self::Id(id)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// An ending response or the close button was chosen.
    Completed,
    /// `end_session` was called.
    Cancelled,
    /// Another session started on the same engine.
    TakenOver,
    /// A response pointed at a node the graph does not have.
    MissingNode {
        /// The unresolved target
        node: String,
    },
}

/// One line of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who said it
    pub speaker: String,
    /// What was said
    pub text: String,
}

/// Speaker name recorded for the player's chosen responses.
pub const PLAYER_SPEAKER: &str = "Player";

/// Currently active dialogue state.
#[derive(Debug, Clone)]
pub struct DialogueSession {
    id: SessionId,
    graph: Arc<DialogueGraph>,
    owner: Option<NpcId>,
    current: String,
    generation: u64,
    choices: Vec<PresentedChoice>,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
}

impl DialogueSession {
    pub(crate) fn new(graph: Arc<DialogueGraph>, owner: Option<NpcId>, history_limit: usize) -> Self {
        let current = graph.start_node_id().to_string();
        Self {
            id: SessionId::next(),
            graph,
            owner,
            current,
            generation: 0,
            choices: Vec::new(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Session handle.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Graph being walked.
    #[must_use]
    pub fn graph(&self) -> &Arc<DialogueGraph> {
        &self.graph
    }

    /// NPC the conversation belongs to.
    #[must_use]
    pub const fn owner(&self) -> Option<NpcId> {
        self.owner
    }

    /// Current node ID.
    #[must_use]
    pub fn current_node_id(&self) -> &str {
        &self.current
    }

    /// Current node.
    #[must_use]
    pub fn current_node(&self) -> Option<&DialogueNode> {
        self.graph.node(&self.current)
    }

    /// Choices of the current node.
    #[must_use]
    pub fn choices(&self) -> &[PresentedChoice] {
        &self.choices
    }

    /// Transcript, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Number of transcript entries kept.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Find a choice of the current node.
    pub(crate) fn resolve(&self, selector: ChoiceSelector) -> Option<&PresentedChoice> {
        match selector {
            ChoiceSelector::Index(index) => self.choices.get(index),
            ChoiceSelector::Id(id) if id.generation == self.generation => {
                self.choices.get(id.index)
            },
            ChoiceSelector::Id(_) => None,
        }
    }

    /// Move the cursor to a node and replace the choice set.
    pub(crate) fn enter(&mut self, node: &str, generation: u64, choices: Vec<PresentedChoice>) {
        self.current = node.to_string();
        self.generation = generation;
        self.choices = choices;
    }

    /// Append to the transcript, trimming the oldest entries.
    pub(crate) fn record(&mut self, speaker: impl Into<String>, text: impl Into<String>) {
        self.history.push_back(HistoryEntry {
            speaker: speaker.into(),
            text: text.into(),
        });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }
}
