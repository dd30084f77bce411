//! Flow-level error taxonomy.
//!
//! Component modules keep their own error enums (`DomError`, `StoreError`,
//! `AttachError`, `BrowserError`); `FlowError` is what one pipeline run can
//! fail with. Forward failures are deliberately absent: forwarding is
//! non-fatal and reported through the notifier instead.

use thiserror::Error;

use crate::attach::AttachError;
use crate::dom::DomError;
use crate::sink::StoreError;

#[derive(Debug, Error)]
pub enum FlowError {
    /// None of the root selectors matched; this page is not the chat UI.
    #[error("chat UI not detected on this page")]
    NotDetected,

    /// A bounded wait ran out of attempts.
    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: &'static str, attempts: u32 },

    /// Both the primary and fallback text-set paths failed or left the
    /// composer with the wrong content.
    #[error("could not write the prompt into the composer")]
    InjectionFailed,

    #[error("prompt was inserted but no send control was found")]
    NoSendControl,

    #[error("no completion signal observed before the deadline; the response may still be generating")]
    NoCompletionSignal,

    #[error("response text did not appear after the response completed")]
    NoResponseText,

    /// The extracted text contains fragments of our own injected script,
    /// which means we scraped the wrong node. Nothing is persisted.
    #[error("extracted text echoes the injected script; refusing to persist it")]
    SelfLeakDetected,

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Attach(#[from] AttachError),
}
