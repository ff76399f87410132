//! Dialogue document loading.
//!
//! This module provides:
//! - The serialized document shape (JSON, TOML or RON)
//! - Soft handling of empty and duplicate node IDs
//! - Hard failure only for graphs with no usable nodes or an unresolved start

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shopfloor_common::SchemaVersion;
use thiserror::Error;
use tracing::{debug, warn};

use super::graph::{DialogueGraph, DialogueGraphBuilder, DialogueNode, DialogueResponse};

/// Errors that make a dialogue document unusable.
#[derive(Debug, Error)]
pub enum DialogueLoadError {
    /// Failed to parse JSON.
    #[error("Failed to parse dialogue JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to parse TOML.
    #[error("Failed to parse dialogue TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failed to parse RON.
    #[error("Failed to parse dialogue RON: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// Every node was missing or rejected.
    #[error("Dialogue {dialogue:?} has no usable nodes")]
    NoUsableNodes {
        /// Dialogue identifier
        dialogue: String,
    },

    /// The start node does not exist.
    #[error("Dialogue {dialogue:?} start node {start:?} not found")]
    UnresolvedStart {
        /// Dialogue identifier
        dialogue: String,
        /// Declared start node
        start: String,
    },

    /// The document's version string could not be parsed.
    #[error("Dialogue {dialogue:?} has invalid version {version:?}")]
    InvalidVersion {
        /// Dialogue identifier
        dialogue: String,
        /// Raw version string
        version: String,
    },

    /// The document was written for an incompatible schema.
    #[error("Dialogue {dialogue:?} uses schema {found}, supported is {supported}")]
    IncompatibleVersion {
        /// Dialogue identifier
        dialogue: String,
        /// Version in the document
        found: SchemaVersion,
        /// Version this build reads
        supported: SchemaVersion,
    },
}

/// Result type for dialogue loading.
pub type DialogueLoadResult<T> = Result<T, DialogueLoadError>;

/// Problems found while loading that do not prevent the graph from being used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadWarning {
    /// A node had no identifier and was skipped.
    #[error("node #{index} has no id, skipped")]
    EmptyNodeId {
        /// Position of the node in the document
        index: usize,
    },
    /// A node repeated an earlier identifier and was skipped.
    #[error("duplicate node id {id:?} at #{index}, keeping the first")]
    DuplicateNode {
        /// Repeated identifier
        id: String,
        /// Position of the skipped node in the document
        index: usize,
    },
    /// A response points at a node that does not exist.
    #[error("node {node:?} response #{response} targets missing node {target:?}")]
    DanglingTarget {
        /// Node holding the response
        node: String,
        /// Response index within the node
        response: usize,
        /// Missing target identifier
        target: String,
    },
    /// The dialogue has no identifier.
    #[error("dialogue has no id")]
    EmptyDialogueId,
    /// The document is from a newer minor schema version.
    #[error("document schema {found} is newer than supported {supported}")]
    NewerMinorVersion {
        /// Version in the document
        found: SchemaVersion,
        /// Version this build reads
        supported: SchemaVersion,
    },
}

/// Serialization format of a dialogue document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFormat {
    /// JSON document.
    Json,
    /// TOML document.
    Toml,
    /// RON document.
    Ron,
}

impl DocumentFormat {
    /// Pick a format from a file extension (case-insensitive, without the dot).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            "ron" => Some(Self::Ron),
            _ => None,
        }
    }

    /// Parse raw text into a document.
    pub fn parse(self, raw: &str) -> DialogueLoadResult<DialogueDocument> {
        Ok(match self {
            Self::Json => serde_json::from_str(raw)?,
            Self::Toml => toml::from_str(raw)?,
            Self::Ron => ron::from_str(raw)?,
        })
    }
}

/// A response as written in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDocument {
    /// Display text.
    #[serde(default)]
    pub text: String,
    /// Target node ID; empty ends the conversation.
    #[serde(default, alias = "next", alias = "targetId")]
    pub target: String,
}

/// A node as written in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDocument {
    /// Node ID; missing or empty nodes are skipped.
    #[serde(default)]
    pub id: String,
    /// Body text.
    #[serde(default)]
    pub text: String,
    /// Optional speaker override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Responses in display order.
    #[serde(default)]
    pub responses: Vec<ResponseDocument>,
}

/// A whole dialogue document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueDocument {
    /// Schema version, `major.minor.patch`. Missing means current.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Dialogue identifier.
    #[serde(default, alias = "dialogueId")]
    pub id: String,
    /// Speaker for nodes without an override.
    #[serde(default, alias = "defaultSpeaker")]
    pub speaker: String,
    /// Start node ID.
    #[serde(default, alias = "startNode")]
    pub start_node: String,
    /// Nodes in source order.
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
}

impl DialogueDocument {
    /// Check the schema version, returning a warning for newer minor versions.
    fn check_version(&self) -> DialogueLoadResult<Option<LoadWarning>> {
        let Some(raw) = self.version.as_deref() else {
            return Ok(None);
        };
        let found: SchemaVersion = raw.parse().map_err(|_| DialogueLoadError::InvalidVersion {
            dialogue: self.id.clone(),
            version: raw.to_string(),
        })?;
        let supported = SchemaVersion::DIALOGUE;
        if !supported.can_read(&found) {
            return Err(DialogueLoadError::IncompatibleVersion {
                dialogue: self.id.clone(),
                found,
                supported,
            });
        }
        if supported.is_compatible_with(&found) {
            Ok(None)
        } else {
            Ok(Some(LoadWarning::NewerMinorVersion { found, supported }))
        }
    }

    /// Convert into a validated graph.
    pub fn into_graph(self) -> DialogueLoadResult<LoadedDialogue> {
        let version_warning = self.check_version()?;

        // Node IDs, the start node and targets are all compared trimmed.
        let mut builder =
            DialogueGraphBuilder::new(&self.id, self.speaker, self.start_node.trim());
        if self.id.trim().is_empty() {
            builder.warn(LoadWarning::EmptyDialogueId);
        }
        if let Some(warning) = version_warning {
            builder.warn(warning);
        }

        for node in self.nodes {
            let mut built = DialogueNode::new(node.id.trim(), node.text);
            built.speaker = node.speaker;
            built.responses = node
                .responses
                .into_iter()
                .map(|r| DialogueResponse::new(r.text, r.target.trim()))
                .collect();
            builder.add_node(built);
        }

        let (graph, warnings) = builder.build_with_warnings()?;
        for warning in &warnings {
            warn!(dialogue = %graph.id(), "{warning}");
        }
        debug!(
            dialogue = %graph.id(),
            nodes = graph.node_count(),
            warnings = warnings.len(),
            "Loaded dialogue"
        );

        Ok(LoadedDialogue {
            graph: Arc::new(graph),
            warnings,
        })
    }
}

impl From<&DialogueGraph> for DialogueDocument {
    fn from(graph: &DialogueGraph) -> Self {
        Self {
            version: Some(SchemaVersion::DIALOGUE.to_string()),
            id: graph.id().to_string(),
            speaker: graph.default_speaker().to_string(),
            start_node: graph.start_node_id().to_string(),
            nodes: graph
                .nodes()
                .map(|node| NodeDocument {
                    id: node.id.clone(),
                    text: node.text.clone(),
                    speaker: node.speaker.clone(),
                    responses: node
                        .responses
                        .iter()
                        .map(|r| ResponseDocument {
                            text: r.text.clone(),
                            target: r.target.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// A successfully loaded graph plus the soft problems found on the way.
#[derive(Debug, Clone)]
pub struct LoadedDialogue {
    /// Shareable read-only graph.
    pub graph: Arc<DialogueGraph>,
    /// Non-fatal problems.
    pub warnings: Vec<LoadWarning>,
}

/// Load a dialogue document from raw text.
pub fn load(raw: &str, format: DocumentFormat) -> DialogueLoadResult<LoadedDialogue> {
    format.parse(raw)?.into_graph()
}

/// Load a JSON dialogue document.
pub fn load_json(raw: &str) -> DialogueLoadResult<LoadedDialogue> {
    load(raw, DocumentFormat::Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP_JSON: &str = r#"{
        "id": "checkout_chat",
        "speaker": "Customer",
        "start_node": "start",
        "nodes": [
            { "id": "start", "text": "Hi", "responses": [
                { "text": "How was your day?", "target": "day" },
                { "text": "Bye", "target": "" }
            ]},
            { "id": "day", "text": "Busy!", "speaker": "Tired Customer" }
        ]
    }"#;

    #[test]
    fn test_load_json() {
        let loaded = load_json(SHOP_JSON).expect("valid document");
        let graph = &loaded.graph;

        assert!(loaded.warnings.is_empty());
        assert_eq!(graph.id(), "checkout_chat");
        assert_eq!(graph.default_speaker(), "Customer");
        assert_eq!(graph.start_node().map(|n| n.text.as_str()), Some("Hi"));
        assert_eq!(
            graph.node("day").and_then(|n| n.speaker.as_deref()),
            Some("Tired Customer")
        );
    }

    #[test]
    fn test_load_camel_case_aliases() {
        let raw = r#"{
            "dialogueId": "d", "defaultSpeaker": "Bob", "startNode": "a",
            "nodes": [{ "id": "a", "text": "x", "responses": [{ "text": "ok", "next": "" }] }]
        }"#;
        let loaded = load_json(raw).expect("valid document");

        assert_eq!(loaded.graph.id(), "d");
        assert_eq!(loaded.graph.start_node_id(), "a");
    }

    #[test]
    fn test_load_toml() {
        let raw = r#"
            id = "toml_chat"
            speaker = "Clerk"
            start_node = "a"

            [[nodes]]
            id = "a"
            text = "Need a bag?"

            [[nodes.responses]]
            text = "Yes"
            target = "b"

            [[nodes]]
            id = "b"
            text = "Here you go."
        "#;
        let loaded = load(raw, DocumentFormat::Toml).expect("valid document");

        assert_eq!(loaded.graph.node_count(), 2);
        assert_eq!(loaded.graph.node("a").map(|n| n.responses.len()), Some(1));
    }

    #[test]
    fn test_load_ron() {
        let raw = r#"(
            id: "ron_chat",
            speaker: "Clerk",
            start_node: "a",
            nodes: [(id: "a", text: "Receipt?", responses: [(text: "No", target: "")])],
        )"#;
        let loaded = load(raw, DocumentFormat::Ron).expect("valid document");
        assert_eq!(loaded.graph.id(), "ron_chat");
    }

    #[test]
    fn test_missing_and_duplicate_ids_are_soft() {
        let raw = r#"{
            "id": "d", "speaker": "S", "start_node": "a",
            "nodes": [
                { "text": "no id" },
                { "id": "a", "text": "first" },
                { "id": "a", "text": "second" }
            ]
        }"#;
        let loaded = load_json(raw).expect("still loads");

        assert_eq!(loaded.graph.node("a").map(|n| n.text.as_str()), Some("first"));
        assert_eq!(loaded.warnings.len(), 2);
        assert!(loaded.warnings.contains(&LoadWarning::EmptyNodeId { index: 0 }));
    }

    #[test]
    fn test_padded_ids_resolve() {
        let raw = r#"{
            "id": "d", "speaker": "S", "start_node": " a",
            "nodes": [
                { "id": "a ", "text": "first", "responses": [{ "text": "on", "target": "b " }] },
                { "id": "b ", "text": "second" }
            ]
        }"#;
        let loaded = load_json(raw).expect("valid document");

        assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
        assert_eq!(loaded.graph.start_node_id(), "a");
        assert_eq!(loaded.graph.node("b").map(|n| n.text.as_str()), Some("second"));
    }

    #[test]
    fn test_zero_usable_nodes_fails() {
        let raw = r#"{ "id": "d", "speaker": "S", "start_node": "a", "nodes": [{ "text": "?" }] }"#;
        assert!(matches!(load_json(raw), Err(DialogueLoadError::NoUsableNodes { .. })));
    }

    #[test]
    fn test_unresolved_start_fails() {
        let raw = r#"{ "id": "d", "speaker": "S", "start_node": "zz", "nodes": [{ "id": "a" }] }"#;
        assert!(matches!(load_json(raw), Err(DialogueLoadError::UnresolvedStart { .. })));
    }

    #[test]
    fn test_malformed_json_fails() {
        assert!(matches!(load_json("{ not json"), Err(DialogueLoadError::Json(_))));
    }

    #[test]
    fn test_version_checks() {
        let doc = |v: &str| {
            format!(r#"{{ "version": "{v}", "id": "d", "start_node": "a", "nodes": [{{ "id": "a" }}] }}"#)
        };

        assert!(load_json(&doc("1.0.0")).expect("current").warnings.is_empty());
        assert!(matches!(
            load_json(&doc("1.3")).expect("newer minor").warnings.as_slice(),
            [LoadWarning::NewerMinorVersion { .. }]
        ));
        assert!(matches!(
            load_json(&doc("2.0.0")),
            Err(DialogueLoadError::IncompatibleVersion { .. })
        ));
        assert!(matches!(
            load_json(&doc("banana")),
            Err(DialogueLoadError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_document_roundtrip_through_graph() {
        let loaded = load_json(SHOP_JSON).expect("valid document");
        let doc = DialogueDocument::from(loaded.graph.as_ref());
        let json = serde_json::to_string(&doc).expect("serializes");
        let reloaded = load_json(&json).expect("reloads");

        assert_eq!(reloaded.graph.node_count(), loaded.graph.node_count());
        assert_eq!(reloaded.graph.start_node_id(), "start");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_extension("JSON"), Some(DocumentFormat::Json));
        assert_eq!(DocumentFormat::from_extension("ron"), Some(DocumentFormat::Ron));
        assert_eq!(DocumentFormat::from_extension("yaml"), None);
    }
}
