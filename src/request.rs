//! Per-invocation input.
//!
//! A [`PromptRequest`] is built once at invocation start and is immutable for
//! the rest of the run. It replaces the old page-global handoff (a prompt
//! smuggled through `window` properties and consumed on read) with an
//! explicit parameter.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("prompt text is empty")]
    EmptyPrompt,

    #[error("image reference is neither an http(s) URL nor a data URI: {0}")]
    BadImageReference(String),
}

/// Conversation mode selected for this prompt.
///
/// Non-default modes are entered by typing a slash-command token into the
/// composer before the prompt itself; see
/// [`apply_mode_prefix`](crate::inject::apply_mode_prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    #[default]
    None,
    Search,
    Study,
    Deep,
}

impl PromptMode {
    /// The slash-command token the host's composer understands, or `None`
    /// for the default mode.
    pub fn command_token(&self) -> Option<&'static str> {
        match self {
            PromptMode::None => None,
            PromptMode::Search => Some("/search"),
            PromptMode::Study => Some("/study"),
            PromptMode::Deep => Some("/deep research"),
        }
    }
}

/// Where the attachment bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Fetched over HTTP at attach time.
    Url(String),
    /// `data:<mime>;base64,<payload>`, decoded locally.
    DataUri(String),
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, RequestError> {
        let reference = reference.trim();
        if reference.starts_with("data:") {
            return Ok(ImageRef::DataUri(reference.to_string()));
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(ImageRef::Url(reference.to_string()));
        }
        Err(RequestError::BadImageReference(reference.to_string()))
    }
}

/// One prompt to deliver, with its mode and optional attachment.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub text: String,
    pub mode: PromptMode,
    pub image: Option<ImageRef>,
}

impl PromptRequest {
    /// Validates that the prompt is non-empty after trimming. The text is
    /// kept verbatim; only the emptiness check trims.
    pub fn new(
        text: impl Into<String>,
        mode: PromptMode,
        image: Option<ImageRef>,
    ) -> Result<Self, RequestError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        Ok(Self { text, mode, image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prompt_is_rejected() {
        assert!(matches!(
            PromptRequest::new("   \n", PromptMode::None, None),
            Err(RequestError::EmptyPrompt)
        ));
    }

    #[test]
    fn prompt_text_is_kept_verbatim() {
        let request = PromptRequest::new("  two words  ", PromptMode::None, None).unwrap();
        assert_eq!(request.text, "  two words  ");
    }

    #[test]
    fn mode_tokens() {
        assert_eq!(PromptMode::None.command_token(), None);
        assert_eq!(PromptMode::Search.command_token(), Some("/search"));
        assert_eq!(PromptMode::Study.command_token(), Some("/study"));
        assert_eq!(PromptMode::Deep.command_token(), Some("/deep research"));
    }

    #[test]
    fn image_reference_forms() {
        assert_eq!(
            ImageRef::parse("https://example.com/cat.png").unwrap(),
            ImageRef::Url("https://example.com/cat.png".to_string())
        );
        assert!(matches!(
            ImageRef::parse("data:image/png;base64,AAAA").unwrap(),
            ImageRef::DataUri(_)
        ));
        assert!(matches!(
            ImageRef::parse("ftp://example.com/cat.png"),
            Err(RequestError::BadImageReference(_))
        ));
    }
}
