//! Chat-UI automation for ChatGPT via the DevTools protocol.
//!
//! Drives the chat site the way a user would: locate the composer through
//! ranked selector fallbacks, inject a prompt (optionally with a mode
//! prefix and an image attachment), click send, wait for the streamed
//! response to finish, then extract, sanitize, persist, and forward the
//! reply. The page is reached through the [`dom::DomSurface`] seam, so the
//! whole pipeline also runs against scripted in-memory pages in tests.

pub mod attach;
pub mod browser;
pub mod config;
pub mod detect;
pub mod dom;
pub mod error;
pub mod extract;
pub mod flow;
pub mod inject;
pub mod notify;
pub mod poll;
pub mod request;
pub mod selectors;
pub mod sink;

pub use browser::{BrowserError, BrowserHandle, TargetInfo};
pub use config::Config;
pub use detect::CompletionState;
pub use dom::{CdpDom, DomError, DomSurface, FilePayload, NodeHandle};
pub use error::FlowError;
pub use extract::{Citation, ExtractedResponse};
pub use flow::{FlowReport, run};
pub use notify::{LogNotifier, Notice, Notifier};
pub use request::{ImageRef, PromptMode, PromptRequest};
pub use selectors::{Hit, Pick, SelectorSet, resolve};
pub use sink::{ForwardConfig, MemoryStore, PageStore, RecordStore, ResultRecord};
