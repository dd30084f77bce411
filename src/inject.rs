//! Composer injection.
//!
//! Two text-set paths, both mandatory: the editor-level insert command keeps
//! rich-text state intact but is not available in every execution context;
//! the overwrite-plus-synthetic-input fallback works everywhere but bypasses
//! the editor. After either path the content is read back and compared, so a
//! silently ignored write cannot pass as success.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::dom::{DomError, DomSurface, NodeHandle};
use crate::error::FlowError;
use crate::request::PromptMode;

/// Put `text` into the composer, guaranteeing the element's content equals
/// it afterwards. Primary path first; fallback on unsupported/failed insert
/// or on a read-back mismatch. Both paths failing is [`FlowError::InjectionFailed`].
pub async fn set_composer_text(
    dom: &dyn DomSurface,
    node: &NodeHandle,
    text: &str,
) -> Result<(), FlowError> {
    dom.focus(node).await.map_err(FlowError::Dom)?;

    match dom.insert_text(node, text).await {
        Ok(()) => {
            if content_matches(dom, node, text).await? {
                return Ok(());
            }
            debug!("primary insert left mismatched composer content; taking the fallback path");
        }
        Err(DomError::Unsupported(what)) => {
            debug!("{what}; taking the fallback path");
        }
        Err(DomError::Eval(reason)) => {
            debug!("primary insert failed ({reason}); taking the fallback path");
        }
        Err(other) => return Err(other.into()),
    }

    if let Err(reason) = dom.replace_text(node, text).await {
        warn!("fallback content overwrite failed: {reason}");
        return Err(FlowError::InjectionFailed);
    }
    if content_matches(dom, node, text).await? {
        Ok(())
    } else {
        warn!("composer content still wrong after the fallback path");
        Err(FlowError::InjectionFailed)
    }
}

/// Non-default modes are entered by typing a slash-command token and
/// confirming it with a synthetic Enter before the prompt goes in. The host
/// sends no acknowledgment for the command; elapsed time is the only
/// confirmation available, hence the fixed settle delay.
pub async fn apply_mode_prefix(
    dom: &dyn DomSurface,
    node: &NodeHandle,
    mode: PromptMode,
    settle: Duration,
) -> Result<(), FlowError> {
    let Some(token) = mode.command_token() else {
        return Ok(());
    };
    debug!("entering {mode:?} mode via '{token}'");
    set_composer_text(dom, node, token).await?;
    dom.press_enter(node).await.map_err(FlowError::Dom)?;
    sleep(settle).await;
    Ok(())
}

/// Contenteditable hosts re-wrap inserted lines into block elements, which
/// folds newlines out of `textContent`; compare with whitespace normalized.
async fn content_matches(
    dom: &dyn DomSurface,
    node: &NodeHandle,
    text: &str,
) -> Result<bool, FlowError> {
    let Some(current) = dom.text_content(node).await.map_err(FlowError::Dom)? else {
        return Ok(false);
    };
    Ok(folded(&current) == folded(text))
}

fn folded(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::stub::StubDom;

    fn composer_node() -> NodeHandle {
        NodeHandle {
            selector: "#composer".to_string(),
            index: 0,
        }
    }

    fn composer_dom() -> StubDom {
        StubDom::new().with_composer("#composer")
    }

    #[tokio::test]
    async fn primary_path_sets_the_content() {
        let dom = composer_dom();
        set_composer_text(&dom, &composer_node(), "hello there")
            .await
            .unwrap();
        assert_eq!(*dom.composer.lock().unwrap(), "hello there");
    }

    #[tokio::test]
    async fn falls_back_when_the_insert_command_is_unsupported() {
        let dom = composer_dom().without_insert_support();
        set_composer_text(&dom, &composer_node(), "fallback text")
            .await
            .unwrap();
        assert_eq!(*dom.composer.lock().unwrap(), "fallback text");
    }

    #[tokio::test]
    async fn both_paths_failing_is_injection_failed() {
        let dom = composer_dom()
            .without_insert_support()
            .without_replace_support();
        let err = set_composer_text(&dom, &composer_node(), "never lands")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InjectionFailed));
        assert_eq!(*dom.composer.lock().unwrap(), "");
    }

    #[tokio::test]
    async fn default_mode_injects_nothing() {
        let dom = composer_dom();
        apply_mode_prefix(
            &dom,
            &composer_node(),
            PromptMode::None,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(*dom.enters.lock().unwrap(), 0);
        assert_eq!(*dom.composer.lock().unwrap(), "");
    }

    #[tokio::test]
    async fn mode_prefix_types_the_token_and_confirms_with_enter() {
        let dom = composer_dom();
        apply_mode_prefix(
            &dom,
            &composer_node(),
            PromptMode::Search,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(*dom.composer.lock().unwrap(), "/search");
        assert_eq!(*dom.enters.lock().unwrap(), 1);
    }

    #[test]
    fn folding_normalizes_block_rewrapping() {
        assert_eq!(folded("line one\nline two"), "line one line two");
        assert_eq!(folded("  spaced   out  "), "spaced out");
    }
}
