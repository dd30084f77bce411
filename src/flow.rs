//! The delivery pipeline.
//!
//! One call of [`run`] takes a prompt from validated request to persisted
//! (and optionally forwarded) record: detect the chat UI, wait for the
//! composer, stage mode and attachment, inject, send, wait out generation,
//! extract and sanitize the reply, persist, forward. Stages run strictly in
//! order; the first hard failure aborts the run with a typed error after
//! telling the notifier. Forwarding is the exception: the record is already
//! safe locally, so a forward failure only warns.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::attach;
use crate::config::Config;
use crate::detect::{self, CompletionMarkers, CompletionState, CompletionTiming};
use crate::dom::DomSurface;
use crate::error::FlowError;
use crate::extract;
use crate::inject;
use crate::notify::{Notice, Notifier};
use crate::poll::{PollOutcome, poll_until};
use crate::request::PromptRequest;
use crate::selectors::{Pick, resolve};
use crate::sink::{self, RecordStore, ResultRecord};

/// What one successful run produced.
#[derive(Debug)]
pub struct FlowReport {
    /// Storage key of the persisted record.
    pub key: String,
    pub record: ResultRecord,
    /// True when the forward endpoint is configured and accepted the record.
    pub forwarded: bool,
}

/// Drive one prompt through the full pipeline.
pub async fn run(
    dom: &dyn DomSurface,
    store: &dyn RecordStore,
    notifier: &dyn Notifier,
    http: &reqwest::Client,
    config: &Config,
    request: &PromptRequest,
) -> Result<FlowReport, FlowError> {
    let selectors = &config.selectors;
    let timing = &config.timing;

    notifier.notify(Notice::Info, "Sending prompt to ChatGPT...");

    if resolve(dom, &selectors.ui_root_set(), Pick::First)
        .await?
        .is_none()
    {
        notifier.notify(Notice::Error, "ChatGPT UI not detected on this page");
        return Err(FlowError::NotDetected);
    }

    let composer_set = selectors.composer_set();
    let outcome = poll_until(&timing.composer.config(), |_attempt| {
        resolve(dom, &composer_set, Pick::First)
    })
    .await?;
    let mut composer = match outcome {
        PollOutcome::Satisfied { value, attempts } => {
            debug!("composer located after {attempts} attempt(s)");
            value.node
        }
        PollOutcome::TimedOut { attempts } => {
            notifier.notify(
                Notice::Error,
                "Could not locate the ChatGPT composer. Try refreshing the page.",
            );
            return Err(FlowError::Timeout {
                what: "composer",
                attempts,
            });
        }
    };

    // Mode first: its confirming Enter must not fire while an attachment is
    // staged, or it would submit the attachment on its own.
    if request.mode.command_token().is_some() {
        inject::apply_mode_prefix(
            dom,
            &composer,
            request.mode,
            Duration::from_millis(timing.mode_settle_ms),
        )
        .await?;
        // The host re-renders the composer when the mode engages.
        if let Some(hit) = resolve(dom, &composer_set, Pick::First).await? {
            composer = hit.node;
        }
    }

    if let Some(image) = &request.image {
        let payload = attach::prepare(image, http).await?;
        attach::attach_image(
            dom,
            &selectors.file_input_set(),
            &payload,
            Duration::from_millis(timing.attach_settle_ms),
        )
        .await?;
    }

    inject::set_composer_text(dom, &composer, &request.text).await?;
    tokio::time::sleep(Duration::from_millis(timing.pre_send_settle_ms)).await;

    let Some(send) = resolve(dom, &selectors.send_button_set(), Pick::First).await? else {
        notifier.notify(
            Notice::Error,
            "Prompt inserted, but no send button was found.",
        );
        return Err(FlowError::NoSendControl);
    };
    dom.click(&send.node).await?;
    info!("prompt submitted");
    notifier.notify(Notice::Info, "Prompt sent! Waiting for response...");

    let markers = CompletionMarkers {
        busy: selectors.busy_marker_set(),
        idle: selectors.idle_marker_set(),
    };
    let completion_timing = CompletionTiming {
        grace: Duration::from_millis(timing.completion_grace_ms),
        poll: timing.completion.config(),
        quiet_streak: timing.quiet_streak,
    };
    match detect::await_completion(dom, &markers, &completion_timing).await? {
        CompletionState::Finished => {
            notifier.notify(Notice::Info, "Response complete! Waiting for text to load...");
        }
        _ => {
            notifier.notify(
                Notice::Warning,
                "Timeout waiting for response. Response may still be generating.",
            );
            return Err(FlowError::NoCompletionSignal);
        }
    }
    tokio::time::sleep(Duration::from_millis(timing.post_completion_settle_ms)).await;

    let raw_text = extract_response(dom, notifier, config).await?;

    let extracted = match extract::process(&raw_text) {
        Ok(extracted) => extracted,
        Err(err) => {
            if matches!(err, FlowError::SelfLeakDetected) {
                notifier.notify(
                    Notice::Warning,
                    "Extracted text echoed the injected script; nothing was saved.",
                );
            }
            return Err(err);
        }
    };

    let record = ResultRecord::new(
        request.text.clone(),
        extracted.cleaned_text.clone(),
        extracted.sources.clone(),
        dom.page_url().await?,
    );
    let key = sink::persist(store, &record).await?;
    notifier.notify(Notice::Success, &format!("Response saved as {key}"));

    let mut forwarded = false;
    if config.forward.enabled() {
        match sink::forward(http, &config.forward, &record).await {
            Ok(_) => forwarded = true,
            Err(err) => {
                warn!("forwarding failed: {err}");
                notifier.notify(
                    Notice::Warning,
                    &format!("Response saved locally but forwarding failed: {err}"),
                );
            }
        }
    }

    Ok(FlowReport {
        key,
        record,
        forwarded,
    })
}

/// Clipboard path when configured (falling back to the DOM on any trouble),
/// else the polled DOM path.
async fn extract_response(
    dom: &dyn DomSurface,
    notifier: &dyn Notifier,
    config: &Config,
) -> Result<String, FlowError> {
    if config.extraction.use_clipboard {
        let copy_set = config.selectors.copy_button_set();
        let settle = Duration::from_millis(config.timing.clipboard_settle_ms);
        match extract::clipboard_response_text(dom, &copy_set, settle).await {
            Ok(Some(text)) => return Ok(text),
            Ok(None) => debug!("clipboard path yielded nothing, falling back to DOM extraction"),
            Err(err) => warn!("clipboard path failed ({err}), falling back to DOM extraction"),
        }
    }

    let response_set = config.selectors.response_set();
    let min_len = config.extraction.min_text_len;
    let outcome = poll_until(&config.timing.response_text.config(), |_attempt| {
        extract::latest_response_text(dom, &response_set, min_len)
    })
    .await?;
    match outcome {
        PollOutcome::Satisfied { value, .. } => Ok(value),
        PollOutcome::TimedOut { .. } => {
            notifier.notify(Notice::Warning, "Response text not found after waiting");
            Err(FlowError::NoResponseText)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollSpec;
    use crate::dom::stub::StubDom;
    use crate::request::{ImageRef, PromptMode};
    use crate::sink::{INDEX_KEY, MemoryStore};
    use std::sync::Mutex;

    const UI_ROOT: &str = r#"main[id="main"]"#;
    const COMPOSER: &str = r#"div[contenteditable="true"].ProseMirror"#;
    const SEND: &str = r#"button[data-testid="composer-send-button"]"#;
    const BUSY: &str = r#"button[data-testid="stop-button"]"#;
    const IDLE: &str = r#"button[data-testid="composer-speech-button"]"#;
    const RESPONSE: &str = ".markdown.prose";
    const FILE_INPUT: &str = r#"input[type="file"]"#;

    struct RecordingNotifier {
        notices: Mutex<Vec<(Notice, String)>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                notices: Mutex::new(Vec::new()),
            }
        }

        fn kinds(&self) -> Vec<Notice> {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .map(|(kind, _)| *kind)
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, kind: Notice, message: &str) {
            self.notices
                .lock()
                .unwrap()
                .push((kind, message.to_string()));
        }
    }

    fn quick_config() -> Config {
        let mut config = Config::default();
        config.timing.composer = PollSpec {
            interval_ms: 1,
            attempts: 5,
        };
        config.timing.completion = PollSpec {
            interval_ms: 1,
            attempts: 20,
        };
        config.timing.completion_grace_ms = 0;
        config.timing.quiet_streak = 2;
        config.timing.response_text = PollSpec {
            interval_ms: 1,
            attempts: 3,
        };
        config.timing.pre_send_settle_ms = 0;
        config.timing.post_completion_settle_ms = 0;
        config.timing.mode_settle_ms = 0;
        config.timing.attach_settle_ms = 0;
        config.timing.clipboard_settle_ms = 0;
        config
    }

    fn responding_dom() -> StubDom {
        StubDom::new()
            .with_fixed(UI_ROOT, &["chat shell"])
            .with_composer(COMPOSER)
            .with_fixed(SEND, &[""])
            .with_timeline(BUSY, &[1, 1, 0])
            .with_fixed(IDLE, &[""])
            .with_fixed(
                RESPONSE,
                &["markdownCopy code\nThe capital of France is Paris.\n\n[1]: https://example.com/paris \"Paris\""],
            )
    }

    #[tokio::test]
    async fn full_run_persists_a_sanitized_record() {
        let dom = responding_dom();
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let http = reqwest::Client::new();
        let request = PromptRequest::new(
            "What is the capital of France?",
            PromptMode::None,
            None,
        )
        .unwrap();

        let report = run(&dom, &store, &notifier, &http, &quick_config(), &request)
            .await
            .unwrap();

        assert!(report.key.starts_with("chatgpt-response-"));
        assert!(!report.forwarded);
        assert_eq!(report.record.response, "The capital of France is Paris.");
        let sources = report.record.sources.as_ref().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].url, "https://example.com/paris");

        let snapshot = store.snapshot();
        let stored = snapshot.get(&report.key).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(stored).unwrap();
        assert_eq!(parsed["prompt"], "What is the capital of France?");
        assert_eq!(parsed["response"], "The capital of France is Paris.");
        let index: Vec<String> =
            serde_json::from_str(snapshot.get(INDEX_KEY).unwrap()).unwrap();
        assert_eq!(index, vec![report.key.clone()]);

        assert_eq!(dom.clicks.lock().unwrap().as_slice(), [SEND]);
        assert!(notifier.kinds().contains(&Notice::Success));
    }

    #[tokio::test]
    async fn mode_and_attachment_are_staged_before_the_prompt() {
        let dom = responding_dom().with_fixed(FILE_INPUT, &[""]);
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let http = reqwest::Client::new();
        let request = PromptRequest::new(
            "Summarize the attached chart",
            PromptMode::Search,
            Some(ImageRef::parse("data:image/png;base64,aGVsbG8=").unwrap()),
        )
        .unwrap();

        run(&dom, &store, &notifier, &http, &quick_config(), &request)
            .await
            .unwrap();

        // One Enter from the mode prefix; the prompt itself goes via the
        // send button.
        assert_eq!(*dom.enters.lock().unwrap(), 1);
        let attached = dom.attached.lock().unwrap();
        assert_eq!(attached.len(), 1);
        assert!(attached[0].ends_with(".png"));
        assert_eq!(
            *dom.composer.lock().unwrap(),
            "Summarize the attached chart"
        );
    }

    #[tokio::test]
    async fn missing_composer_times_out_without_persisting() {
        let dom = StubDom::new().with_fixed(UI_ROOT, &["chat shell"]);
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let http = reqwest::Client::new();
        let request = PromptRequest::new("hello", PromptMode::None, None).unwrap();

        let err = run(&dom, &store, &notifier, &http, &quick_config(), &request)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FlowError::Timeout {
                what: "composer",
                ..
            }
        ));
        assert!(store.snapshot().is_empty());
        assert!(notifier.kinds().contains(&Notice::Error));
    }

    #[tokio::test]
    async fn busy_marker_that_never_clears_aborts_the_run() {
        let dom = StubDom::new()
            .with_fixed(UI_ROOT, &["chat shell"])
            .with_composer(COMPOSER)
            .with_fixed(SEND, &[""])
            .with_timeline(BUSY, &[1]);
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let http = reqwest::Client::new();
        let request = PromptRequest::new("hello", PromptMode::None, None).unwrap();

        let mut config = quick_config();
        config.timing.completion = PollSpec {
            interval_ms: 1,
            attempts: 4,
        };

        let err = run(&dom, &store, &notifier, &http, &config, &request)
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::NoCompletionSignal));
        assert!(store.snapshot().is_empty());
        assert!(notifier.kinds().contains(&Notice::Warning));
    }
}
