//! Dialogue system: graphs, document loading, and the conversation engine.

mod engine;
mod graph;
mod loader;
mod session;

pub use engine::{ChoiceOutcome, DialogueEngine, DialogueError, DialogueResult, EngineState};
pub use graph::{DialogueGraph, DialogueGraphBuilder, DialogueNode, DialogueResponse};
pub use loader::{
    load, load_json, DialogueDocument, DialogueLoadError, DialogueLoadResult, DocumentFormat,
    LoadWarning, LoadedDialogue, NodeDocument, ResponseDocument,
};
pub use session::{
    ChoiceAction, ChoiceId, ChoiceSelector, DialogueSession, EndReason, HistoryEntry,
    PresentedChoice, SessionId, PLAYER_SPEAKER,
};
