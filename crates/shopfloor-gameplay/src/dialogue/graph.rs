//! Immutable dialogue graph.
//!
//! A [`DialogueGraph`] is only ever produced by [`DialogueGraphBuilder::build`]
//! (directly or through the document loader), which guarantees the start node
//! resolves. Once built it is never mutated and is shared between sessions
//! behind an `Arc`.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::loader::{DialogueLoadError, DialogueLoadResult, LoadWarning};

/// A choice within a dialogue node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueResponse {
    /// Text displayed for this response.
    pub text: String,
    /// Target node ID. Empty means the response ends the conversation.
    pub target: String,
}

impl DialogueResponse {
    /// Create a response that leads to another node.
    #[must_use]
    pub fn new(text: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            target: target.into(),
        }
    }

    /// Create a response that ends the conversation.
    #[must_use]
    pub fn end(text: impl Into<String>) -> Self {
        Self::new(text, String::new())
    }

    /// Check if selecting this response ends the conversation.
    #[must_use]
    pub fn ends_conversation(&self) -> bool {
        self.target.is_empty()
    }
}

/// A single node in a dialogue graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueNode {
    /// Unique ID of this node within its graph.
    pub id: String,
    /// The text to display.
    pub text: String,
    /// Speaker override; falls back to the graph's default speaker.
    pub speaker: Option<String>,
    /// Available responses, in display order.
    pub responses: Vec<DialogueResponse>,
}

impl DialogueNode {
    /// Create a new dialogue node without responses.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            speaker: None,
            responses: Vec::new(),
        }
    }

    /// Override the speaker for this node.
    #[must_use]
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    /// Add a response to this node.
    #[must_use]
    pub fn with_response(mut self, response: DialogueResponse) -> Self {
        self.responses.push(response);
        self
    }

    /// Check if this is a terminal node (no responses).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.responses.is_empty()
    }
}

/// A complete, validated dialogue graph.
#[derive(Debug, Clone)]
pub struct DialogueGraph {
    id: String,
    default_speaker: String,
    start_node: String,
    nodes: AHashMap<String, DialogueNode>,
    /// Node IDs in source order.
    order: Vec<String>,
}

impl DialogueGraph {
    /// Start building a graph.
    #[must_use]
    pub fn builder(
        id: impl Into<String>,
        default_speaker: impl Into<String>,
        start_node: impl Into<String>,
    ) -> DialogueGraphBuilder {
        DialogueGraphBuilder::new(id, default_speaker, start_node)
    }

    /// Dialogue identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Speaker used when a node has no override.
    #[must_use]
    pub fn default_speaker(&self) -> &str {
        &self.default_speaker
    }

    /// Start node identifier.
    #[must_use]
    pub fn start_node_id(&self) -> &str {
        &self.start_node
    }

    /// Get a node by ID.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&DialogueNode> {
        self.nodes.get(id)
    }

    /// Get the start node. Always present for a built graph.
    #[must_use]
    pub fn start_node(&self) -> Option<&DialogueNode> {
        self.node(&self.start_node)
    }

    /// Resolve the speaker for a node.
    #[must_use]
    pub fn speaker_for<'a>(&'a self, node: &'a DialogueNode) -> &'a str {
        node.speaker.as_deref().unwrap_or(&self.default_speaker)
    }

    /// Iterate nodes in source order.
    pub fn nodes(&self) -> impl Iterator<Item = &DialogueNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Get node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check if a node exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }
}

/// Incrementally assembles a [`DialogueGraph`], recording soft problems.
#[derive(Debug)]
pub struct DialogueGraphBuilder {
    id: String,
    default_speaker: String,
    start_node: String,
    nodes: AHashMap<String, DialogueNode>,
    order: Vec<String>,
    warnings: Vec<LoadWarning>,
    seen: usize,
}

impl DialogueGraphBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        default_speaker: impl Into<String>,
        start_node: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            default_speaker: default_speaker.into(),
            start_node: start_node.into(),
            nodes: AHashMap::new(),
            order: Vec::new(),
            warnings: Vec::new(),
            seen: 0,
        }
    }

    /// Add a node. Empty IDs are skipped; on duplicate IDs the first one wins.
    pub fn add_node(&mut self, mut node: DialogueNode) {
        let index = self.seen;
        self.seen += 1;

        if node.speaker.as_deref().is_some_and(|s| s.trim().is_empty()) {
            node.speaker = None;
        }

        if node.id.trim().is_empty() {
            self.warnings.push(LoadWarning::EmptyNodeId { index });
            return;
        }
        if self.nodes.contains_key(&node.id) {
            self.warnings.push(LoadWarning::DuplicateNode { id: node.id, index });
            return;
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Add a node (builder pattern).
    #[must_use]
    pub fn node(mut self, node: DialogueNode) -> Self {
        self.add_node(node);
        self
    }

    /// Record an additional warning found by the caller.
    pub fn warn(&mut self, warning: LoadWarning) {
        self.warnings.push(warning);
    }

    /// Validate and produce the graph, discarding warnings after logging them.
    pub fn build(self) -> DialogueLoadResult<DialogueGraph> {
        let (graph, warnings) = self.build_with_warnings()?;
        for warning in &warnings {
            warn!(dialogue = %graph.id, "{warning}");
        }
        Ok(graph)
    }

    /// Validate and produce the graph together with every soft problem found.
    pub fn build_with_warnings(mut self) -> DialogueLoadResult<(DialogueGraph, Vec<LoadWarning>)> {
        if self.nodes.is_empty() {
            return Err(DialogueLoadError::NoUsableNodes { dialogue: self.id });
        }
        if !self.nodes.contains_key(&self.start_node) {
            return Err(DialogueLoadError::UnresolvedStart {
                dialogue: self.id,
                start: self.start_node,
            });
        }

        for id in &self.order {
            let Some(node) = self.nodes.get(id) else { continue };
            for (response, r) in node.responses.iter().enumerate() {
                if !r.ends_conversation() && !self.nodes.contains_key(&r.target) {
                    self.warnings.push(LoadWarning::DanglingTarget {
                        node: id.clone(),
                        response,
                        target: r.target.clone(),
                    });
                }
            }
        }

        let graph = DialogueGraph {
            id: self.id,
            default_speaker: self.default_speaker,
            start_node: self.start_node,
            nodes: self.nodes,
            order: self.order,
        };
        Ok((graph, self.warnings))
    }
}
