//! Runtime configuration.
//!
//! Loaded from `config.yaml` when present; every field is optional and
//! falls back to defaults that target the public chatgpt.com UI. The
//! selector chains live here rather than in code so a host markup change
//! can be absorbed with a config edit instead of a rebuild.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::poll::PollConfig;
use crate::selectors::SelectorSet;
use crate::sink::ForwardConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub selectors: SelectorConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub forward: ForwardConfig,
}

impl Config {
    /// Load configuration from an explicit path, else `./config.yaml` if it
    /// exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidate = match path {
            Some(explicit) => explicit.to_path_buf(),
            None => {
                let fallback = PathBuf::from("config.yaml");
                if !fallback.exists() {
                    debug!("no config file found, using defaults");
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let contents = std::fs::read_to_string(&candidate).map_err(|source| ConfigError::Io {
            path: candidate.clone(),
            source,
        })?;
        let config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: candidate.clone(),
            source,
        })?;
        debug!(path = %candidate.display(), "loaded config file");
        Ok(config)
    }
}

/// How to reach (or start) the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// DevTools endpoint of an already-running browser. HTTP base or
    /// websocket URL.
    #[serde(default = "default_cdp_url")]
    pub cdp_url: String,

    /// Launch a managed browser instead of attaching.
    #[serde(default)]
    pub launch: bool,

    /// Headless mode for launched browsers. Off by default because the
    /// chat site requires an interactive login session.
    #[serde(default)]
    pub headless: bool,

    #[serde(default)]
    pub window: WindowConfig,

    /// Substring matched against tab URL and title when locating the chat
    /// tab.
    #[serde(default = "default_tab_filter")]
    pub tab_filter: Option<String>,

    /// Exact conversation URL to target. Takes precedence over
    /// `tab_index` and `tab_filter`.
    #[serde(default)]
    pub exact_url: Option<String>,

    /// Positional tab index, for setups with several chat tabs open.
    #[serde(default)]
    pub tab_index: Option<usize>,

    /// Disable web security in launched browsers.
    #[serde(default)]
    pub disable_security: bool,

    /// Persistent profile directory for launched browsers. A temp profile
    /// is generated (and cleaned up) when unset.
    #[serde(default)]
    pub chrome_data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

/// Which conversation to drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL for new conversations.
    #[serde(default = "default_chat_url")]
    pub url: String,

    /// gpt-5 variant appended as a `model` query parameter ("thinking",
    /// "instant", ...). None keeps the account default.
    #[serde(default)]
    pub model_mode: Option<String>,

    /// URL of an existing conversation to continue. When set, navigation
    /// targets it (and is skipped if the tab is already there); when unset
    /// a new chat is always opened.
    #[serde(default)]
    pub follow_up_url: Option<String>,
}

/// Ranked selector chains, tried front to back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_ui_root")]
    pub ui_root: Vec<String>,

    #[serde(default = "default_composer")]
    pub composer: Vec<String>,

    #[serde(default = "default_send_button")]
    pub send_button: Vec<String>,

    #[serde(default = "default_busy_marker")]
    pub busy_marker: Vec<String>,

    #[serde(default = "default_idle_marker")]
    pub idle_marker: Vec<String>,

    #[serde(default = "default_response")]
    pub response: Vec<String>,

    #[serde(default = "default_copy_button")]
    pub copy_button: Vec<String>,

    #[serde(default = "default_file_input")]
    pub file_input: Vec<String>,
}

impl SelectorConfig {
    pub fn ui_root_set(&self) -> SelectorSet {
        SelectorSet::new("ui-root", self.ui_root.clone())
    }

    pub fn composer_set(&self) -> SelectorSet {
        SelectorSet::new("composer", self.composer.clone())
    }

    pub fn send_button_set(&self) -> SelectorSet {
        SelectorSet::new("send-button", self.send_button.clone())
    }

    pub fn busy_marker_set(&self) -> SelectorSet {
        SelectorSet::new("busy-marker", self.busy_marker.clone())
    }

    pub fn idle_marker_set(&self) -> SelectorSet {
        SelectorSet::new("idle-marker", self.idle_marker.clone())
    }

    pub fn response_set(&self) -> SelectorSet {
        SelectorSet::new("response", self.response.clone())
    }

    pub fn copy_button_set(&self) -> SelectorSet {
        SelectorSet::new("copy-button", self.copy_button.clone())
    }

    pub fn file_input_set(&self) -> SelectorSet {
        SelectorSet::new("file-input", self.file_input.clone())
    }
}

/// Interval and attempt budget for one polling loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollSpec {
    pub interval_ms: u64,
    pub attempts: u32,
}

impl PollSpec {
    pub fn config(&self) -> PollConfig {
        PollConfig::new(Duration::from_millis(self.interval_ms), self.attempts)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Composer lookup budget.
    #[serde(default = "default_composer_poll")]
    pub composer: PollSpec,

    /// Completion marker budget. 120 x 250ms covers long streamed answers.
    #[serde(default = "default_completion_poll")]
    pub completion: PollSpec,

    /// Pause after send before completion polling starts, so the busy
    /// marker has a chance to appear.
    #[serde(default = "default_completion_grace_ms")]
    pub completion_grace_ms: u64,

    /// Consecutive quiet ticks required to call a response finished when
    /// only the busy marker's absence is available.
    #[serde(default = "default_quiet_streak")]
    pub quiet_streak: u32,

    /// Response text extraction budget.
    #[serde(default = "default_response_text_poll")]
    pub response_text: PollSpec,

    #[serde(default = "default_pre_send_settle_ms")]
    pub pre_send_settle_ms: u64,

    /// Wait after completion before reading text; the DOM keeps mutating
    /// briefly once streaming stops.
    #[serde(default = "default_post_completion_settle_ms")]
    pub post_completion_settle_ms: u64,

    #[serde(default = "default_mode_settle_ms")]
    pub mode_settle_ms: u64,

    #[serde(default = "default_attach_settle_ms")]
    pub attach_settle_ms: u64,

    #[serde(default = "default_clipboard_settle_ms")]
    pub clipboard_settle_ms: u64,

    #[serde(default = "default_nav_settle_ms")]
    pub nav_settle_ms: u64,
}

/// Text extraction behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Minimum trimmed length before a DOM node counts as response text,
    /// which skips placeholder and status fragments.
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,

    /// Read the response through the copy button and clipboard instead of
    /// the DOM. Falls back to the DOM path when the clipboard is blocked.
    #[serde(default)]
    pub use_clipboard: bool,
}

fn default_cdp_url() -> String {
    "http://localhost:9222".to_string()
}

fn default_tab_filter() -> Option<String> {
    Some("chatgpt.com".to_string())
}

fn default_window_width() -> u32 {
    1440
}

fn default_window_height() -> u32 {
    900
}

fn default_chat_url() -> String {
    "https://chatgpt.com/".to_string()
}

fn default_ui_root() -> Vec<String> {
    vec![
        r#"main[id="main"]"#.to_string(),
        "main".to_string(),
        r#"[data-testid="conversation-turn-1"]"#.to_string(),
        r#"[data-testid="conversation-turn-2"]"#.to_string(),
        ".conversation".to_string(),
        r#"div[role="main"]"#.to_string(),
        "#__next".to_string(),
        "body".to_string(),
    ]
}

fn default_composer() -> Vec<String> {
    vec![
        r#"div[contenteditable="true"].ProseMirror"#.to_string(),
        r#"div[contenteditable="true"]"#.to_string(),
        r#"textarea[placeholder*="Ask"]"#.to_string(),
        r#"textarea[placeholder*="Message"]"#.to_string(),
        r#"input[type="text"]"#.to_string(),
        ".composer-input".to_string(),
        r#"[data-testid="composer-input"]"#.to_string(),
    ]
}

fn default_send_button() -> Vec<String> {
    vec![
        r#"button[data-testid="composer-send-button"]"#.to_string(),
        r#"button[data-testid="send-button"]"#.to_string(),
        r#"button[aria-label*="Send"]"#.to_string(),
        r#"button[type="submit"]"#.to_string(),
    ]
}

fn default_busy_marker() -> Vec<String> {
    vec![r#"button[data-testid="stop-button"]"#.to_string()]
}

fn default_idle_marker() -> Vec<String> {
    vec![r#"button[data-testid="composer-speech-button"]"#.to_string()]
}

fn default_response() -> Vec<String> {
    vec![
        ".markdown.prose".to_string(),
        r#"[data-message-author-role="assistant"] .markdown"#.to_string(),
        ".prose.markdown".to_string(),
        r#"[data-testid="conversation-turn-3"] .markdown"#.to_string(),
        ".markdown".to_string(),
    ]
}

fn default_copy_button() -> Vec<String> {
    vec![
        r#"button[data-testid="copy-turn-action-button"]"#.to_string(),
        r#"button[aria-label*="Copy"]"#.to_string(),
    ]
}

fn default_file_input() -> Vec<String> {
    vec![r#"input[type="file"]"#.to_string()]
}

fn default_composer_poll() -> PollSpec {
    PollSpec {
        interval_ms: 250,
        attempts: 40,
    }
}

fn default_completion_poll() -> PollSpec {
    PollSpec {
        interval_ms: 250,
        attempts: 120,
    }
}

fn default_completion_grace_ms() -> u64 {
    1000
}

fn default_quiet_streak() -> u32 {
    3
}

fn default_response_text_poll() -> PollSpec {
    PollSpec {
        interval_ms: 500,
        attempts: 20,
    }
}

fn default_pre_send_settle_ms() -> u64 {
    150
}

fn default_post_completion_settle_ms() -> u64 {
    2000
}

fn default_mode_settle_ms() -> u64 {
    750
}

fn default_attach_settle_ms() -> u64 {
    1500
}

fn default_clipboard_settle_ms() -> u64 {
    1000
}

fn default_nav_settle_ms() -> u64 {
    2000
}

fn default_min_text_len() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            chat: ChatConfig::default(),
            selectors: SelectorConfig::default(),
            timing: TimingConfig::default(),
            extraction: ExtractionConfig::default(),
            forward: ForwardConfig::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            cdp_url: default_cdp_url(),
            launch: false,
            headless: false,
            window: WindowConfig::default(),
            tab_filter: default_tab_filter(),
            exact_url: None,
            tab_index: None,
            disable_security: false,
            chrome_data_dir: None,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: default_chat_url(),
            model_mode: None,
            follow_up_url: None,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            ui_root: default_ui_root(),
            composer: default_composer(),
            send_button: default_send_button(),
            busy_marker: default_busy_marker(),
            idle_marker: default_idle_marker(),
            response: default_response(),
            copy_button: default_copy_button(),
            file_input: default_file_input(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            composer: default_composer_poll(),
            completion: default_completion_poll(),
            completion_grace_ms: default_completion_grace_ms(),
            quiet_streak: default_quiet_streak(),
            response_text: default_response_text_poll(),
            pre_send_settle_ms: default_pre_send_settle_ms(),
            post_completion_settle_ms: default_post_completion_settle_ms(),
            mode_settle_ms: default_mode_settle_ms(),
            attach_settle_ms: default_attach_settle_ms(),
            clipboard_settle_ms: default_clipboard_settle_ms(),
            nav_settle_ms: default_nav_settle_ms(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_len: default_min_text_len(),
            use_clipboard: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_public_chat_ui() {
        let config = Config::default();
        assert_eq!(config.browser.cdp_url, "http://localhost:9222");
        assert_eq!(config.browser.tab_filter.as_deref(), Some("chatgpt.com"));
        assert_eq!(config.chat.url, "https://chatgpt.com/");
        assert_eq!(
            config.selectors.composer[0],
            r#"div[contenteditable="true"].ProseMirror"#
        );
        assert_eq!(
            config.selectors.busy_marker,
            vec![r#"button[data-testid="stop-button"]"#.to_string()]
        );
        assert_eq!(config.timing.completion.attempts, 120);
        assert_eq!(config.timing.completion.interval_ms, 250);
        assert_eq!(config.extraction.min_text_len, 10);
        assert!(!config.forward.enabled());
    }

    #[test]
    fn partial_yaml_overrides_leave_other_sections_at_defaults() {
        let yaml = r#"
chat:
  model_mode: thinking
  follow_up_url: "https://chatgpt.com/c/abc123"
timing:
  completion:
    interval_ms: 100
    attempts: 10
forward:
  endpoint: "http://localhost:8000/api/responses"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.chat.model_mode.as_deref(), Some("thinking"));
        assert_eq!(
            config.chat.follow_up_url.as_deref(),
            Some("https://chatgpt.com/c/abc123")
        );
        assert_eq!(config.chat.url, "https://chatgpt.com/");
        assert_eq!(config.timing.completion.interval_ms, 100);
        assert_eq!(config.timing.completion.attempts, 10);
        assert_eq!(config.timing.completion_grace_ms, 1000);
        assert!(config.forward.enabled());
        assert_eq!(config.selectors.ui_root.len(), 8);
    }

    #[test]
    fn selector_sets_carry_names_and_ranked_order() {
        let selectors = SelectorConfig::default();
        let set = selectors.response_set();
        assert_eq!(set.name, "response");
        assert_eq!(set.candidates[0], ".markdown.prose");
        assert_eq!(set.candidates.last().map(String::as_str), Some(".markdown"));
    }
}
