//! Browser session management.
//!
//! Two ways to get a session: attach to an already-running Chrome over its
//! DevTools endpoint (the normal path, so the user's logged-in ChatGPT tab
//! is reused), or launch a managed Chromium with an isolated profile. The
//! handle remembers which path produced it so shutdown never kills a
//! browser this process does not own.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::handler::Handler;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    LaunchFailed(String),
    #[error("could not attach to browser at {url}: {reason}")]
    AttachFailed { url: String, reason: String },
    #[error("debugger endpoint request failed: {0}")]
    Discovery(#[from] reqwest::Error),
    #[error("page operation failed: {0}")]
    Page(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn page_failure(err: chromiumoxide::error::CdpError) -> BrowserError {
    BrowserError::Page(err.to_string())
}

/// One debuggable target as reported by the DevTools `/json` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub ws_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: String,
}

/// A connected browser plus its event-handler task.
///
/// The handler task must be aborted when the session ends or it keeps
/// polling a dead websocket. `shutdown` does the full teardown; `Drop`
/// covers early-return paths by at least stopping the task.
pub struct BrowserHandle {
    browser: Browser,
    handler: JoinHandle<()>,
    temp_profile: Option<PathBuf>,
    owned: bool,
}

impl BrowserHandle {
    /// Attach to an external browser over its DevTools endpoint.
    ///
    /// `cdp_url` may be the websocket URL directly or the HTTP debug base
    /// (for example `http://localhost:9222`), in which case the websocket
    /// URL is discovered via `/json/version`.
    pub async fn attach(cdp_url: &str, http: &reqwest::Client) -> Result<Self, BrowserError> {
        let ws_url = if cdp_url.starts_with("ws://") || cdp_url.starts_with("wss://") {
            cdp_url.to_string()
        } else {
            discover_ws_url(cdp_url, http).await?
        };
        debug!(ws_url = %ws_url, "connecting to browser");
        let (browser, handler) =
            Browser::connect(&ws_url)
                .await
                .map_err(|e| BrowserError::AttachFailed {
                    url: cdp_url.to_string(),
                    reason: e.to_string(),
                })?;
        info!(url = %cdp_url, "attached to running browser");
        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            temp_profile: None,
            owned: false,
        })
    }

    /// Launch a managed Chromium instance with an isolated profile.
    ///
    /// Uses `profile_dir` when given, otherwise a per-process temp profile
    /// that is removed again on `shutdown`.
    pub async fn launch(
        headless: bool,
        window: (u32, u32),
        profile_dir: Option<PathBuf>,
        disable_security: bool,
    ) -> Result<Self, BrowserError> {
        let executable = match find_executable() {
            Some(path) => path,
            None => download_managed_browser().await?,
        };

        let (profile, generated) = match profile_dir {
            Some(dir) => (dir, false),
            None => (
                std::env::temp_dir().join(format!("chatgpt-courier-{}", std::process::id())),
                true,
            ),
        };
        let guard = ProfileGuard::new(profile, generated)?;

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .window_size(window.0, window.1)
            .user_data_dir(&guard.path)
            .chrome_executable(executable)
            .arg(format!("--user-agent={USER_AGENT}"))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-notifications")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-background-networking")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--password-store=basic")
            .arg("--hide-scrollbars")
            .arg("--mute-audio");

        builder = if headless {
            builder.headless_mode(HeadlessMode::default())
        } else {
            builder.with_head()
        };

        if disable_security {
            warn!("disabling browser security features");
            builder = builder
                .arg("--disable-web-security")
                .arg("--disable-features=IsolateOrigins,site-per-process")
                .arg("--ignore-certificate-errors");
        }

        // setuid sandboxing does not work inside containers
        if in_container() {
            info!("container environment detected, disabling sandbox");
            builder = builder.arg("--no-sandbox").arg("--disable-setuid-sandbox");
        }

        let config = builder
            .build()
            .map_err(|e| BrowserError::LaunchFailed(format!("invalid browser config: {e}")))?;

        info!(profile = %guard.path.display(), headless, "launching browser");
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            temp_profile: guard.release(),
            owned: true,
        })
    }

    /// Locate the chat tab among open pages.
    ///
    /// Match precedence: `exact_url` (normalized comparison), then
    /// `tab_index` into the page list, then case-insensitive substring
    /// `filter` against each page's URL and title.
    pub async fn find_chat_page(
        &self,
        filter: Option<&str>,
        exact_url: Option<&str>,
        tab_index: Option<usize>,
    ) -> Result<Option<Page>, BrowserError> {
        let pages = self.browser.pages().await.map_err(page_failure)?;

        if let Some(wanted) = exact_url {
            for page in &pages {
                let current = page.url().await.map_err(page_failure)?.unwrap_or_default();
                if urls_equivalent(&current, wanted) {
                    info!(url = %current, "matched tab by exact URL");
                    return Ok(Some(page.clone()));
                }
            }
            return Ok(None);
        }

        if let Some(index) = tab_index {
            let found = pages.get(index).cloned();
            if found.is_none() {
                warn!(index, total = pages.len(), "tab index out of range");
            }
            return Ok(found);
        }

        if let Some(needle) = filter {
            let needle = needle.to_lowercase();
            for page in &pages {
                let current = page.url().await.map_err(page_failure)?.unwrap_or_default();
                if current.to_lowercase().contains(&needle) {
                    info!(url = %current, "matched tab by URL filter");
                    return Ok(Some(page.clone()));
                }
                if let Some(title) = page_title(page).await
                    && title.to_lowercase().contains(&needle)
                {
                    info!(title = %title, "matched tab by title filter");
                    return Ok(Some(page.clone()));
                }
            }
        }

        Ok(None)
    }

    /// Open a fresh tab at `url`.
    pub async fn new_page(&self, url: &str) -> Result<Page, BrowserError> {
        self.browser.new_page(url).await.map_err(page_failure)
    }

    /// Tear the session down.
    ///
    /// For launched browsers this closes Chrome, waits for the process to
    /// exit, and removes the generated profile. For attached browsers it
    /// only stops the handler task; the user's browser keeps running.
    pub async fn shutdown(mut self) {
        if self.owned {
            info!("closing launched browser");
            if let Err(e) = self.browser.close().await {
                warn!("browser close failed: {e}");
            }
            if let Err(e) = self.browser.wait().await {
                warn!("browser did not exit cleanly: {e}");
            }
            self.handler.abort();
            self.remove_temp_profile();
        } else {
            debug!("detaching from external browser");
            self.handler.abort();
        }
    }

    /// Remove the generated profile directory.
    ///
    /// Must run after `browser.wait()` so Chrome has released its file
    /// handles; blocking removal because this is also reachable from drop
    /// paths where async is unavailable.
    fn remove_temp_profile(&mut self) {
        if let Some(path) = self.temp_profile.take() {
            debug!(path = %path.display(), "removing temp profile");
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "failed to remove temp profile {}: {e}. Manual cleanup may be required.",
                    path.display()
                );
            }
        }
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(path) = &self.temp_profile {
            warn!(
                "browser handle dropped without shutdown; temp profile orphaned: {}",
                path.display()
            );
        }
    }
}

/// Drive the CDP event stream until the connection closes.
///
/// Chrome emits events chromiumoxide cannot always deserialize; those
/// surface as handler errors but are routine noise
/// (https://github.com/mattsse/chromiumoxide/issues/229), so they are
/// filtered down to trace level.
fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                let benign = message
                    .contains("data did not match any variant of untagged enum Message")
                    || message.contains("Failed to deserialize WS response");
                if benign {
                    trace!("suppressed CDP deserialization noise: {message}");
                } else {
                    error!("browser handler error: {message}");
                }
            }
        }
        debug!("browser handler stream ended");
    })
}

async fn discover_ws_url(base: &str, http: &reqwest::Client) -> Result<String, BrowserError> {
    let endpoint = format!("{}/json/version", base.trim_end_matches('/'));
    let version: VersionInfo = http
        .get(&endpoint)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(version.ws_url)
}

/// List debuggable targets from the DevTools HTTP endpoint.
pub async fn list_targets(
    cdp_url: &str,
    http: &reqwest::Client,
) -> Result<Vec<TargetInfo>, BrowserError> {
    let endpoint = format!("{}/json", cdp_url.trim_end_matches('/'));
    let targets: Vec<TargetInfo> = http
        .get(&endpoint)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(targets)
}

async fn page_title(page: &Page) -> Option<String> {
    let result = page.evaluate("document.title").await.ok()?;
    result
        .value()
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Build the navigation target for a chat URL: trailing slash stripped,
/// model selector appended.
///
/// `model_mode` names the gpt-5 variant ("thinking", "instant", ...); the
/// site reads it from the `model` query parameter.
pub fn prepare_chat_url(base: &str, model_mode: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match model_mode {
        Some(mode) if !mode.is_empty() => {
            let sep = if base.contains('?') { '&' } else { '?' };
            format!("{base}{sep}model=gpt-5-{mode}")
        }
        _ => base.to_string(),
    }
}

/// Compare two URLs ignoring trailing slashes and query-parameter order.
pub fn urls_equivalent(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(left), Ok(right)) => {
            left.scheme() == right.scheme()
                && left.host_str() == right.host_str()
                && left.port_or_known_default() == right.port_or_known_default()
                && left.path().trim_end_matches('/') == right.path().trim_end_matches('/')
                && sorted_query(&left) == sorted_query(&right)
        }
        _ => a.trim_end_matches('/') == b.trim_end_matches('/'),
    }
}

fn sorted_query(url: &Url) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    pairs
}

/// Navigate the chat tab to `target`.
///
/// Follow-up turns stay on the current conversation: when the tab is
/// already at an equivalent URL, navigation is skipped so the existing
/// thread (and its composer state) survives.
pub async fn goto_chat(
    page: &Page,
    target: &str,
    follow_up: bool,
    settle: Duration,
) -> Result<(), BrowserError> {
    if follow_up {
        let current = page.url().await.map_err(page_failure)?.unwrap_or_default();
        if urls_equivalent(&current, target) {
            debug!(url = %current, "already on requested conversation, keeping tab as-is");
            return Ok(());
        }
    }
    info!(url = %target, "navigating chat tab");
    page.goto(target).await.map_err(page_failure)?;
    page.wait_for_navigation().await.map_err(page_failure)?;
    tokio::time::sleep(settle).await;
    Ok(())
}

/// Find a Chrome/Chromium executable, checking `CHROMIUM_PATH` first, then
/// well-known install locations, then `which`.
fn find_executable() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(path = %path.display(), "using browser from CHROMIUM_PATH");
            return Some(path);
        }
        warn!(path = %path.display(), "CHROMIUM_PATH points to a non-existent file");
    }

    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(path = %path.display(), "found browser executable");
            return Some(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for name in ["google-chrome", "chromium", "chromium-browser", "chrome"] {
            if let Ok(output) = Command::new("which").arg(name).output()
                && output.status.success()
            {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    let path = PathBuf::from(found);
                    info!(path = %path.display(), "found browser via which");
                    return Some(path);
                }
            }
        }
    }

    None
}

/// Download a Chromium revision into the cache directory and return its
/// executable path.
async fn download_managed_browser() -> Result<PathBuf, BrowserError> {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chatgpt-courier/chromium");
    std::fs::create_dir_all(&cache_dir)?;

    info!(dir = %cache_dir.display(), "no local browser found, downloading Chromium");
    let options = BrowserFetcherOptions::builder()
        .with_path(&cache_dir)
        .build()
        .map_err(|e| BrowserError::LaunchFailed(format!("fetcher options: {e}")))?;
    let info = BrowserFetcher::new(options)
        .fetch()
        .await
        .map_err(|e| BrowserError::LaunchFailed(format!("browser download failed: {e}")))?;
    Ok(info.executable_path)
}

fn in_container() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}

/// Removes a generated profile directory unless released to the handle.
struct ProfileGuard {
    path: PathBuf,
    generated: bool,
    released: bool,
}

impl ProfileGuard {
    fn new(path: PathBuf, generated: bool) -> Result<Self, BrowserError> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            generated,
            released: false,
        })
    }

    /// Hand the directory over to the handle. Returns `Some` only for
    /// generated profiles, which are the ones shutdown should delete.
    fn release(mut self) -> Option<PathBuf> {
        self.released = true;
        self.generated.then(|| self.path.clone())
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        if self.generated && !self.released {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    "failed to clean up profile after launch failure {}: {e}",
                    self.path.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_urls_ignore_trailing_slash_and_query_order() {
        assert!(urls_equivalent(
            "https://chatgpt.com/",
            "https://chatgpt.com"
        ));
        assert!(urls_equivalent(
            "https://chatgpt.com/?model=gpt-5-thinking&temporary-chat=true",
            "https://chatgpt.com?temporary-chat=true&model=gpt-5-thinking"
        ));
        assert!(!urls_equivalent(
            "https://chatgpt.com/c/abc",
            "https://chatgpt.com/c/def"
        ));
        assert!(!urls_equivalent(
            "https://chatgpt.com/?model=gpt-5-thinking",
            "https://chatgpt.com/"
        ));
    }

    #[test]
    fn non_urls_compare_as_plain_strings() {
        assert!(urls_equivalent("about:blank", "about:blank"));
        assert!(!urls_equivalent("about:blank", "chrome://newtab"));
    }

    #[test]
    fn model_mode_appends_query_parameter() {
        assert_eq!(
            prepare_chat_url("https://chatgpt.com/", Some("thinking")),
            "https://chatgpt.com?model=gpt-5-thinking"
        );
        assert_eq!(
            prepare_chat_url("https://chatgpt.com/?temporary-chat=true", Some("instant")),
            "https://chatgpt.com/?temporary-chat=true&model=gpt-5-instant"
        );
        assert_eq!(
            prepare_chat_url("https://chatgpt.com/c/abc/", Some("thinking")),
            "https://chatgpt.com/c/abc?model=gpt-5-thinking"
        );
        assert_eq!(
            prepare_chat_url("https://chatgpt.com/", None),
            "https://chatgpt.com"
        );
        assert_eq!(
            prepare_chat_url("https://chatgpt.com/", Some("")),
            "https://chatgpt.com"
        );
    }

    #[test]
    fn target_listing_deserializes_devtools_shape() {
        let raw = r#"[
          {"type": "page", "title": "ChatGPT", "url": "https://chatgpt.com/",
           "webSocketDebuggerUrl": "ws://localhost:9222/devtools/page/1"},
          {"type": "service_worker", "title": "sw", "url": "https://chatgpt.com/sw.js"}
        ]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(raw).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets[0].is_page());
        assert!(!targets[1].is_page());
        assert_eq!(
            targets[0].ws_url.as_deref(),
            Some("ws://localhost:9222/devtools/page/1")
        );
        assert!(targets[1].ws_url.is_none());
    }
}
