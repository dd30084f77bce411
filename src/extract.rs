//! Response extraction and sanitization.
//!
//! The DOM path scans ranked container selectors, newest match first, and
//! takes the first node with enough real text. The clipboard path clicks the
//! host's own copy affordance instead, for markup states where the rendered
//! text is unreliable. Whatever comes back is scrubbed of known UI
//! boilerplate, checked against fragments of our own injected script (the
//! page occasionally echoes it), and finally mined for a trailing citation
//! block.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;

use crate::dom::{DomError, DomSurface};
use crate::error::FlowError;
use crate::selectors::{Pick, SelectorSet, resolve};

/// One entry of a trailing citation block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub index: u32,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedResponse {
    pub raw_text: String,
    pub cleaned_text: String,
    pub sources: Vec<Citation>,
    /// True when no citation block was found. Not an error; most responses
    /// have no sources.
    pub sourceless: bool,
}

/// Substrings of the injected automation script. Extracted text containing
/// any of these means we scraped our own code instead of a response.
const SCRIPT_LEAK_MARKERS: [&str; 3] = ["const sleep=", "window.__oai_", "async()=>{"];

/// Scan the ranked container candidates; within each, walk matches from most
/// recent to least recent and take the first whose trimmed text is longer
/// than `min_len`. The length floor filters empty placeholder nodes the host
/// renders before text streams in.
pub async fn latest_response_text(
    dom: &dyn DomSurface,
    set: &SelectorSet,
    min_len: usize,
) -> Result<Option<String>, DomError> {
    for (rank, selector) in set.candidates.iter().enumerate() {
        let matches = dom.query_all(selector).await?;
        for node in matches.iter().rev() {
            if let Some(text) = dom.text_content(node).await? {
                let trimmed = text.trim();
                if trimmed.len() > min_len {
                    debug!(
                        "response text found via '{selector}' (rank {rank}, {} chars)",
                        trimmed.len()
                    );
                    return Ok(Some(trimmed.to_string()));
                }
            }
        }
    }
    Ok(None)
}

/// Clipboard alternative: click the newest copy affordance, wait out the
/// settle delay (the copy is async with no completion event), then read the
/// shared clipboard. `Ok(None)` when there is no affordance or the clipboard
/// came back empty; clipboard errors propagate so the caller can fall back.
pub async fn clipboard_response_text(
    dom: &dyn DomSurface,
    copy_set: &SelectorSet,
    settle: Duration,
) -> Result<Option<String>, DomError> {
    let Some(hit) = resolve(dom, copy_set, Pick::Last).await? else {
        debug!("no copy affordance found; clipboard path unavailable");
        return Ok(None);
    };
    dom.click(&hit.node).await?;
    sleep(settle).await;
    let text = dom.read_clipboard().await?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

/// Sanitize, leak-check, and parse citations out of raw extracted text.
pub fn process(raw: &str) -> Result<ExtractedResponse, FlowError> {
    let cleaned = clean_response(raw);
    if leaks_own_script(&cleaned) {
        return Err(FlowError::SelfLeakDetected);
    }
    let (content, sources) = split_citations(&cleaned);
    Ok(ExtractedResponse {
        raw_text: raw.to_string(),
        cleaned_text: content,
        sourceless: sources.is_empty(),
        sources,
    })
}

/// Strip copy-button captions ("Copy code", possibly glued to a code-block
/// language tag like "markdownCopy code") off the leading and trailing
/// edges. The remainder is left byte-identical.
pub fn clean_response(raw: &str) -> String {
    let mut rest = raw;
    loop {
        let Some((first, tail)) = rest.split_once('\n') else {
            break;
        };
        if is_copy_caption(first.trim()) {
            rest = tail;
        } else {
            break;
        }
    }
    loop {
        let trimmed = rest.trim_end();
        let Some(idx) = trimmed.rfind('\n') else {
            break;
        };
        if is_copy_caption(trimmed[idx + 1..].trim()) {
            rest = &rest[..idx];
        } else {
            break;
        }
    }
    if is_copy_caption(rest.trim()) {
        return String::new();
    }
    rest.to_string()
}

pub fn leaks_own_script(text: &str) -> bool {
    SCRIPT_LEAK_MARKERS.iter().any(|marker| text.contains(marker))
}

/// A copy-button caption, optionally prefixed by the short lowercase
/// language tag code-block rendering glues onto it.
fn is_copy_caption(line: &str) -> bool {
    let Some(tag) = line.strip_suffix("Copy code") else {
        return false;
    };
    tag.len() <= 16
        && tag
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '#'))
}

/// Recognize a trailing block of `[n]: <url> "<title>"` (or `[n]: <url> —
/// <title>`) lines. Matched lines, interleaved blanks, and one dangling
/// separator line above the block are removed from the content; citations
/// come back ordered by `n`. No matching lines leaves the text untouched.
pub fn split_citations(text: &str) -> (String, Vec<Citation>) {
    let lines: Vec<&str> = text.lines().collect();
    let mut cut = lines.len();
    let mut citations: Vec<Citation> = Vec::new();

    while cut > 0 {
        let line = lines[cut - 1].trim();
        if line.is_empty() && !citations.is_empty() {
            cut -= 1;
            continue;
        }
        match parse_citation_line(line) {
            Some(citation) => {
                citations.push(citation);
                cut -= 1;
            }
            None => break,
        }
    }

    if citations.is_empty() {
        return (text.to_string(), Vec::new());
    }

    while cut > 0 {
        let line = lines[cut - 1].trim();
        if line.is_empty() || is_separator(line) {
            cut -= 1;
        } else {
            break;
        }
    }

    citations.sort_by_key(|c| c.index);
    (lines[..cut].join("\n"), citations)
}

fn is_separator(line: &str) -> bool {
    matches!(line, "---" | "***" | "___")
        || line.eq_ignore_ascii_case("sources:")
        || line.eq_ignore_ascii_case("sources")
}

fn parse_citation_line(line: &str) -> Option<Citation> {
    let rest = line.strip_prefix('[')?;
    let (number, rest) = rest.split_once("]:")?;
    let index: u32 = number.trim().parse().ok()?;
    let rest = rest.trim_start();
    if !rest.starts_with("http://") && !rest.starts_with("https://") {
        return None;
    }
    let (url, title_part) = match rest.find(char::is_whitespace) {
        Some(pos) => (&rest[..pos], rest[pos..].trim_start()),
        None => (rest, ""),
    };
    let title = parse_title(title_part)?;
    Some(Citation {
        index,
        url: url.to_string(),
        title,
    })
}

/// Accepts `"quoted"`, an em-dash/hyphen form, or nothing. Anything else
/// means the line is prose, not a citation.
fn parse_title(part: &str) -> Option<String> {
    if part.is_empty() {
        return Some(String::new());
    }
    if let Some(quoted) = part.strip_prefix('"') {
        return quoted.strip_suffix('"').map(str::to_string);
    }
    for dash in ["—", "--", "-"] {
        if let Some(titled) = part.strip_prefix(dash) {
            return Some(titled.trim_start().to_string());
        }
    }
    None
}
