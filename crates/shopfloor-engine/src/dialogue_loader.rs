//! Dialogue asset loading and management.
//!
//! This module provides:
//! - Loading every dialogue document under assets/dialogues (JSON, TOML, RON)
//! - A registry with lookup by dialogue ID
//! - Load statistics (files, graphs, warnings, failures)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shopfloor_gameplay::{DialogueGraph, DialogueLoadError, DialogueSource, DocumentFormat};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default asset path for dialogues.
pub const DEFAULT_DIALOGUE_PATH: &str = "assets/dialogues";

/// Errors that can occur while loading dialogue assets.
#[derive(Debug, Error)]
pub enum DialogueAssetError {
    /// Failed to read a file or directory.
    #[error("Failed to read dialogue asset: {0}")]
    Io(#[from] std::io::Error),

    /// The file extension is not a known document format.
    #[error("Unsupported dialogue file: {0:?}")]
    UnsupportedFormat(PathBuf),

    /// The document did not produce a usable graph.
    #[error("Failed to load dialogue {path:?}: {source}")]
    Load {
        /// File that failed
        path: PathBuf,
        /// Underlying failure
        source: DialogueLoadError,
    },

    /// Another file already registered this dialogue ID.
    #[error("Duplicate dialogue ID: {0}")]
    DuplicateId(String),
}

/// Result type for dialogue asset operations.
pub type DialogueAssetResult<T> = Result<T, DialogueAssetError>;

/// Loaded dialogue graphs by ID.
#[derive(Debug, Default)]
pub struct DialogueRegistry {
    by_id: BTreeMap<String, Arc<DialogueGraph>>,
}

impl DialogueRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered dialogues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Registers a graph under its own ID.
    pub fn register(&mut self, graph: Arc<DialogueGraph>) -> DialogueAssetResult<()> {
        let id = graph.id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(DialogueAssetError::DuplicateId(id));
        }
        self.by_id.insert(id, graph);
        Ok(())
    }

    /// Gets a dialogue by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<DialogueGraph>> {
        self.by_id.get(id)
    }

    /// Iterates dialogues in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DialogueGraph>> {
        self.by_id.values()
    }

    /// Every dialogue as a conversation source, in ID order.
    #[must_use]
    pub fn sources(&self) -> Vec<Arc<dyn DialogueSource>> {
        self.by_id
            .values()
            .map(|graph| Arc::new(Arc::clone(graph)) as Arc<dyn DialogueSource>)
            .collect()
    }
}

/// Statistics for the dialogue loader.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DialogueLoaderStats {
    /// Files read and parsed.
    pub files_loaded: u32,
    /// Graphs registered.
    pub dialogues_loaded: u32,
    /// Soft problems reported by the document loader.
    pub warnings: u32,
    /// Files that could not be used.
    pub failures: u32,
}

/// Directory scanner filling a [`DialogueRegistry`].
#[derive(Debug)]
pub struct DialogueLoader {
    base_path: PathBuf,
    registry: DialogueRegistry,
    stats: DialogueLoaderStats,
}

impl DialogueLoader {
    /// Creates a loader for a directory.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        debug!(path = %base_path.display(), "Initializing dialogue loader");
        Self {
            base_path,
            registry: DialogueRegistry::new(),
            stats: DialogueLoaderStats::default(),
        }
    }

    /// Returns the dialogue registry.
    #[must_use]
    pub fn registry(&self) -> &DialogueRegistry {
        &self.registry
    }

    /// Returns loader statistics.
    #[must_use]
    pub const fn stats(&self) -> DialogueLoaderStats {
        self.stats
    }

    /// Consumes the loader, keeping the registry.
    #[must_use]
    pub fn into_registry(self) -> DialogueRegistry {
        self.registry
    }

    /// Loads every dialogue document in the base path.
    ///
    /// Files with unknown extensions are skipped. A file that fails to load
    /// is counted and logged; the scan continues.
    pub fn load_all(&mut self) -> DialogueAssetResult<()> {
        if !self.base_path.exists() {
            info!(
                "Dialogue directory does not exist, creating: {}",
                self.base_path.display()
            );
            fs::create_dir_all(&self.base_path)?;
            return Ok(());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.base_path)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && format_of(path).is_some())
            .collect();
        paths.sort();

        for path in paths {
            if let Err(e) = self.load_file(&path) {
                warn!("Failed to load dialogue file {}: {e}", path.display());
                self.stats.failures += 1;
            }
        }

        info!(
            dialogues = self.stats.dialogues_loaded,
            files = self.stats.files_loaded,
            warnings = self.stats.warnings,
            failures = self.stats.failures,
            "Loaded dialogues from {}",
            self.base_path.display()
        );
        Ok(())
    }

    /// Loads a single dialogue document.
    pub fn load_file(&mut self, path: &Path) -> DialogueAssetResult<()> {
        let format =
            format_of(path).ok_or_else(|| DialogueAssetError::UnsupportedFormat(path.into()))?;
        debug!(?format, "Loading dialogue file: {}", path.display());

        let content = fs::read_to_string(path)?;
        let loaded = format
            .parse(&content)
            .and_then(|document| document.into_graph())
            .map_err(|source| DialogueAssetError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        self.stats.files_loaded += 1;
        self.stats.warnings += loaded.warnings.len() as u32;

        self.registry.register(loaded.graph)?;
        self.stats.dialogues_loaded += 1;
        Ok(())
    }
}

fn format_of(path: &Path) -> Option<DocumentFormat> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(DocumentFormat::from_extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GREETING_JSON: &str = r#"{
        "id": "greeting", "speaker": "Customer", "start_node": "start",
        "nodes": [
            { "id": "start", "text": "Hello!", "responses": [
                { "text": "Hi", "target": "" }
            ] }
        ]
    }"#;

    const WEATHER_TOML: &str = r#"
id = "weather"
speaker = "Customer"
start_node = "start"

[[nodes]]
id = "start"
text = "Lovely weather today."

[[nodes.responses]]
text = "Is it?"
target = "rain"

[[nodes]]
id = "rain"
text = "Well, it was this morning."
"#;

    const PRICES_RON: &str = r#"(
        id: "prices",
        speaker: "Customer",
        start_node: "start",
        nodes: [
            (id: "start", text: "Everything got pricier.", responses: [
                (text: "Sorry", target: "gone"),
            ]),
        ],
    )"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).expect("write asset");
        path
    }

    #[test]
    fn test_load_all_formats() {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "greeting.json", GREETING_JSON);
        write(&dir, "weather.toml", WEATHER_TOML);
        write(&dir, "prices.ron", PRICES_RON);
        write(&dir, "notes.txt", "not a dialogue");

        let mut loader = DialogueLoader::new(dir.path());
        loader.load_all().expect("scan");

        let stats = loader.stats();
        assert_eq!(stats.files_loaded, 3);
        assert_eq!(stats.dialogues_loaded, 3);
        assert_eq!(stats.failures, 0);
        // prices targets a node that does not exist
        assert_eq!(stats.warnings, 1);

        let registry = loader.registry();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("weather").map(|g| g.node_count()), Some(2));
        let ids: Vec<&str> = registry.iter().map(|g| g.id()).collect();
        assert_eq!(ids, vec!["greeting", "prices", "weather"]);
    }

    #[test]
    fn test_bad_file_counted_and_skipped() {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "greeting.json", GREETING_JSON);
        write(&dir, "broken.json", "{ not json");
        write(
            &dir,
            "no_start.json",
            r#"{ "id": "x", "start_node": "missing", "nodes": [ { "id": "a", "text": "A" } ] }"#,
        );

        let mut loader = DialogueLoader::new(dir.path());
        loader.load_all().expect("scan");

        assert_eq!(loader.stats().failures, 2);
        assert_eq!(loader.registry().len(), 1);
        assert!(loader.registry().get("greeting").is_some());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let first = write(&dir, "a.json", GREETING_JSON);
        let second = write(&dir, "b.json", GREETING_JSON);

        let mut loader = DialogueLoader::new(dir.path());
        loader.load_file(&first).expect("first load");
        let err = loader.load_file(&second).expect_err("duplicate");

        assert!(matches!(err, DialogueAssetError::DuplicateId(ref id) if id == "greeting"));
        assert_eq!(loader.registry().len(), 1);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().expect("temp dir");
        let path = write(&dir, "greeting.yaml", "id: greeting");

        let mut loader = DialogueLoader::new(dir.path());
        assert!(matches!(
            loader.load_file(&path),
            Err(DialogueAssetError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_directory_created() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("assets").join("dialogues");

        let mut loader = DialogueLoader::new(&path);
        loader.load_all().expect("scan");

        assert!(path.exists());
        assert!(loader.registry().is_empty());
    }

    #[test]
    fn test_bundled_dialogues_load_cleanly() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../assets/dialogues");
        let mut loader = DialogueLoader::new(dir);
        loader.load_all().expect("scan");

        assert_eq!(loader.stats().failures, 0);
        assert_eq!(loader.stats().warnings, 0);
        assert_eq!(loader.registry().len(), 3);
        assert!(loader.registry().get("loyalty").is_some());
    }

    #[test]
    fn test_sources_follow_registry_order() {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "weather.toml", WEATHER_TOML);
        write(&dir, "greeting.json", GREETING_JSON);

        let mut loader = DialogueLoader::new(dir.path());
        loader.load_all().expect("scan");
        let sources = loader.into_registry().sources();

        let labels: Vec<&str> = sources.iter().map(|s| s.label()).collect();
        assert_eq!(labels, vec!["greeting", "weather"]);
        let graph = sources[1].load().expect("in-memory source");
        assert_eq!(graph.start_node_id(), "start");
    }
}
