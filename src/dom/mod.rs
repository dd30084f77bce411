//! The DOM seam.
//!
//! Everything the pipeline does to the page goes through [`DomSurface`], a
//! narrow async trait. The production implementation ([`cdp::CdpDom`])
//! evaluates JavaScript against a live tab over the DevTools protocol; tests
//! drive the same pipeline with scripted in-memory implementations.

use async_trait::async_trait;
use thiserror::Error;

pub mod cdp;
#[cfg(test)]
pub(crate) mod stub;

pub use cdp::CdpDom;

#[derive(Debug, Error)]
pub enum DomError {
    #[error("script evaluation failed: {0}")]
    Eval(String),

    #[error("script returned an unexpected shape: {0}")]
    Shape(String),

    /// The mechanism exists in some execution contexts but not this one
    /// (e.g. `execCommand` support). Callers with a fallback path treat this
    /// as a signal to take it.
    #[error("{0} is unavailable in this page")]
    Unsupported(&'static str),

    /// The element disappeared between the query that produced its handle
    /// and the action. Handles are positional, not pinned.
    #[error("target element went away before the action ran")]
    Stale,

    #[error("clipboard read failed: {0}")]
    Clipboard(String),
}

/// Positional reference to one DOM match: the selector that produced it and
/// the index into its match list. Every operation re-resolves the handle, so
/// it stays valid exactly as long as the page keeps that match list shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub selector: String,
    pub index: usize,
}

/// A decoded attachment ready to hand to a file input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// The operations the pipeline needs from a live page.
///
/// Reads are idempotent and may be repeated freely (the pollers do). Writes
/// (`insert_text`, `replace_text`, `attach_file`) are issued at most once per
/// logical step by the callers.
#[async_trait]
pub trait DomSurface: Send + Sync {
    /// All current matches for a selector, in document order. An empty vec
    /// is a normal outcome, not an error.
    async fn query_all(&self, selector: &str) -> Result<Vec<NodeHandle>, DomError>;

    /// `textContent` of the node, or `None` if it is gone.
    async fn text_content(&self, node: &NodeHandle) -> Result<Option<String>, DomError>;

    async fn click(&self, node: &NodeHandle) -> Result<(), DomError>;

    async fn focus(&self, node: &NodeHandle) -> Result<(), DomError>;

    /// Primary text-set path: select-all, delete, then an editor-level
    /// insert that preserves rich-text state. Fails with
    /// [`DomError::Unsupported`] where the insert command is unavailable.
    async fn insert_text(&self, node: &NodeHandle, text: &str) -> Result<(), DomError>;

    /// Fallback text-set path: overwrite the content wholesale and dispatch
    /// a synthetic input event carrying the text so the host notices.
    async fn replace_text(&self, node: &NodeHandle, text: &str) -> Result<(), DomError>;

    /// Synthetic Enter keydown/keyup pair on the node.
    async fn press_enter(&self, node: &NodeHandle) -> Result<(), DomError>;

    /// Simulated file-picker selection: install the payload as the input's
    /// file list, then dispatch change/input/click so the host picks it up.
    async fn attach_file(&self, node: &NodeHandle, payload: &FilePayload) -> Result<(), DomError>;

    /// Read the shared clipboard. Requires the page context to have
    /// clipboard permission; failure is common and non-fatal to callers.
    async fn read_clipboard(&self) -> Result<String, DomError>;

    /// Current page URL, for the persisted record.
    async fn page_url(&self) -> Result<String, DomError>;

    /// Page-side key-value storage (the persistence sink's backing store).
    async fn kv_get(&self, key: &str) -> Result<Option<String>, DomError>;

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), DomError>;
}
