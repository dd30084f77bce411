//! chatgpt-courier CLI.
//!
//! Delivers prompts to the ChatGPT web UI over the DevTools protocol and
//! captures the responses.
//!
//! Usage examples:
//!   Attach to a running Chrome (started with --remote-debugging-port=9222):
//!     $ chatgpt-courier send "Explain pin projection in plain words"
//!   Launch a managed browser and use search mode:
//!     $ chatgpt-courier send --launch --mode search "latest rustc release"
//!   Inspect debuggable tabs and previously captured records:
//!     $ chatgpt-courier targets
//!     $ chatgpt-courier records --export responses.json

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chromiumoxide::page::Page;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatgpt_courier::browser::{self, BrowserHandle};
use chatgpt_courier::config::Config;
use chatgpt_courier::dom::CdpDom;
use chatgpt_courier::flow;
use chatgpt_courier::notify::LogNotifier;
use chatgpt_courier::request::{ImageRef, PromptMode, PromptRequest};
use chatgpt_courier::sink::{PageStore, RecordStore};

#[derive(Parser)]
#[command(
    name = "chatgpt-courier",
    author,
    version,
    about = "Deliver prompts to the ChatGPT web UI and capture the responses"
)]
struct Cli {
    /// Path to a YAML config file (defaults to ./config.yaml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a prompt and capture the response.
    Send(SendArgs),
    /// List debuggable targets of the attached browser.
    Targets(TargetsArgs),
    /// List or export previously captured records.
    Records(RecordsArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Prompt text. Read interactively when omitted.
    prompt: Option<String>,

    /// Conversation mode entered before the prompt.
    #[arg(long, value_enum, default_value_t = PromptMode::None)]
    mode: PromptMode,

    /// Image to attach: an http(s) URL or a data: URI.
    #[arg(long)]
    image: Option<String>,

    /// DevTools endpoint of a running browser.
    #[arg(long)]
    cdp: Option<String>,

    /// Launch a managed browser instead of attaching.
    #[arg(long)]
    launch: bool,

    /// Run the launched browser headless.
    #[arg(long)]
    headless: bool,

    /// Substring matched against tab URL and title when picking the chat tab.
    #[arg(long)]
    filter: Option<String>,

    /// Exact conversation URL to target.
    #[arg(long)]
    exact_url: Option<String>,

    /// Tab index to target.
    #[arg(long)]
    tab_index: Option<usize>,

    /// Base URL for new conversations.
    #[arg(long)]
    chat_url: Option<String>,

    /// gpt-5 variant for the model query parameter (thinking, instant, ...).
    #[arg(long)]
    model_mode: Option<String>,

    /// Continue an existing conversation at this URL.
    #[arg(long)]
    follow_up: Option<String>,

    /// Forward endpoint override.
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token for the forward endpoint.
    #[arg(long)]
    api_key: Option<String>,

    /// Extract via the copy button and clipboard instead of the DOM.
    #[arg(long)]
    clipboard: bool,
}

#[derive(Args)]
struct TargetsArgs {
    /// DevTools endpoint of a running browser.
    #[arg(long)]
    cdp: Option<String>,
}

#[derive(Args)]
struct RecordsArgs {
    /// DevTools endpoint of a running browser.
    #[arg(long)]
    cdp: Option<String>,

    /// Substring matched against tab URL and title when picking the chat tab.
    #[arg(long)]
    filter: Option<String>,

    /// Write all records to this file as a JSON array.
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Send(args) => run_send(config, args).await,
        Command::Targets(args) => run_targets(config, args).await,
        Command::Records(args) => run_records(config, args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatgpt_courier=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_send(mut config: Config, args: SendArgs) -> Result<()> {
    apply_overrides(&mut config, &args);

    let prompt_text = match args.prompt {
        Some(text) => text,
        None => read_prompt_interactively()?,
    };
    let image = args.image.as_deref().map(ImageRef::parse).transpose()?;
    let request = PromptRequest::new(prompt_text, args.mode, image)?;

    let http = reqwest::Client::new();
    let handle = open_session(&config, &http).await?;

    // Tear the session down on every path before surfacing the outcome.
    let result = drive(&handle, &http, &config, &request).await;
    handle.shutdown().await;
    let report = result?;

    println!("{}", report.record.response);
    if let Some(sources) = &report.record.sources {
        println!();
        for source in sources {
            if source.title.is_empty() {
                println!("[{}] {}", source.index, source.url);
            } else {
                println!("[{}] {} ({})", source.index, source.url, source.title);
            }
        }
    }
    Ok(())
}

async fn drive(
    handle: &BrowserHandle,
    http: &reqwest::Client,
    config: &Config,
    request: &PromptRequest,
) -> Result<flow::FlowReport> {
    let page = locate_chat_page(handle, config).await?;

    let model_mode = config.chat.model_mode.as_deref();
    let (target, follow_up) = match &config.chat.follow_up_url {
        Some(existing) => (browser::prepare_chat_url(existing, model_mode), true),
        None => (browser::prepare_chat_url(&config.chat.url, model_mode), false),
    };
    browser::goto_chat(
        &page,
        &target,
        follow_up,
        Duration::from_millis(config.timing.nav_settle_ms),
    )
    .await?;

    let dom = CdpDom::new(page);
    let store = PageStore::new(&dom);
    let notifier = LogNotifier;
    let report = flow::run(&dom, &store, &notifier, http, config, request).await?;
    Ok(report)
}

async fn open_session(config: &Config, http: &reqwest::Client) -> Result<BrowserHandle> {
    if config.browser.launch {
        BrowserHandle::launch(
            config.browser.headless,
            (config.browser.window.width, config.browser.window.height),
            config.browser.chrome_data_dir.clone(),
            config.browser.disable_security,
        )
        .await
        .context("failed to launch a managed browser")
    } else {
        BrowserHandle::attach(&config.browser.cdp_url, http)
            .await
            .with_context(|| {
                format!(
                    "failed to attach to {} (start Chrome with --remote-debugging-port=9222 \
                     or pass --launch)",
                    config.browser.cdp_url
                )
            })
    }
}

async fn locate_chat_page(handle: &BrowserHandle, config: &Config) -> Result<Page> {
    let found = handle
        .find_chat_page(
            config.browser.tab_filter.as_deref(),
            config.browser.exact_url.as_deref(),
            config.browser.tab_index,
        )
        .await?;
    match found {
        Some(page) => Ok(page),
        None => {
            info!("no existing chat tab matched, opening a new one");
            Ok(handle.new_page("about:blank").await?)
        }
    }
}

async fn run_targets(config: Config, args: TargetsArgs) -> Result<()> {
    let http = reqwest::Client::new();
    let cdp_url = args.cdp.as_deref().unwrap_or(&config.browser.cdp_url);
    let targets = browser::list_targets(cdp_url, &http)
        .await
        .with_context(|| format!("failed to list targets at {cdp_url}"))?;

    if targets.is_empty() {
        println!("no debuggable targets");
        return Ok(());
    }
    for (index, target) in targets.iter().enumerate() {
        println!("[{index}] {:<16} {}  {}", target.kind, target.title, target.url);
    }
    Ok(())
}

async fn run_records(config: Config, args: RecordsArgs) -> Result<()> {
    let http = reqwest::Client::new();
    let cdp_url = args.cdp.as_deref().unwrap_or(&config.browser.cdp_url);
    let handle = BrowserHandle::attach(cdp_url, &http).await?;

    let filter = args
        .filter
        .as_deref()
        .or(config.browser.tab_filter.as_deref());
    let result = collect_records(&handle, filter).await;
    handle.shutdown().await;
    let records = result?;

    if records.is_empty() {
        println!("no captured records");
        return Ok(());
    }

    match args.export {
        Some(path) => {
            let values: Vec<&serde_json::Value> = records.iter().map(|(_, v)| v).collect();
            let json = serde_json::to_string_pretty(&values)?;
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {} record(s) to {}", records.len(), path.display());
        }
        None => {
            for (key, _) in &records {
                println!("{key}");
            }
        }
    }
    Ok(())
}

async fn collect_records(
    handle: &BrowserHandle,
    filter: Option<&str>,
) -> Result<Vec<(String, serde_json::Value)>> {
    let Some(page) = handle.find_chat_page(filter, None, None).await? else {
        bail!("no chat tab matched; open chatgpt.com in the attached browser first");
    };
    let dom = CdpDom::new(page);
    let store = PageStore::new(&dom);

    let mut records = Vec::new();
    for key in store.index().await? {
        match store.get(&key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("record {key} is not valid JSON"))?;
                records.push((key, value));
            }
            None => tracing::warn!("index lists {key} but the record is missing"),
        }
    }
    Ok(records)
}

fn apply_overrides(config: &mut Config, args: &SendArgs) {
    if let Some(cdp) = &args.cdp {
        config.browser.cdp_url = cdp.clone();
    }
    if args.launch {
        config.browser.launch = true;
    }
    if args.headless {
        config.browser.headless = true;
    }
    if let Some(filter) = &args.filter {
        config.browser.tab_filter = Some(filter.clone());
    }
    if let Some(exact) = &args.exact_url {
        config.browser.exact_url = Some(exact.clone());
    }
    if let Some(index) = args.tab_index {
        config.browser.tab_index = Some(index);
    }
    if let Some(url) = &args.chat_url {
        config.chat.url = url.clone();
    }
    if let Some(mode) = &args.model_mode {
        config.chat.model_mode = Some(mode.clone());
    }
    if let Some(url) = &args.follow_up {
        config.chat.follow_up_url = Some(url.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.forward.endpoint = endpoint.clone();
    }
    if let Some(key) = &args.api_key {
        config.forward.api_key = key.clone();
    }
    if args.clipboard {
        config.extraction.use_clipboard = true;
    }
}

fn read_prompt_interactively() -> Result<String> {
    eprint!("Prompt to send to ChatGPT: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let text = line.trim_end_matches(['\r', '\n']).to_string();
    if text.trim().is_empty() {
        bail!("no prompt provided");
    }
    Ok(text)
}
