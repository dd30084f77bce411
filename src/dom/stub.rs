//! Scripted in-memory `DomSurface` used by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DomError, DomSurface, FilePayload, NodeHandle};

/// Per-selector presence schedule: entry `n` is the match count returned by
/// the `n`-th query of that selector; the last entry repeats forever.
struct Timeline {
    counts: Vec<usize>,
    cursor: usize,
}

/// Configurable fake page. Selectors can be bound to a constant list of node
/// texts (`with_fixed`), to a query-indexed presence schedule
/// (`with_timeline`), or to the single editable composer (`with_composer`).
pub(crate) struct StubDom {
    fixed: Mutex<HashMap<String, Vec<String>>>,
    timelines: Mutex<HashMap<String, Timeline>>,
    composer_selector: Option<String>,
    pub composer: Mutex<String>,
    pub insert_supported: bool,
    pub replace_supported: bool,
    pub enters: Mutex<u32>,
    pub clicks: Mutex<Vec<String>>,
    pub attached: Mutex<Vec<String>>,
    clipboard: Option<String>,
    pub kv: Mutex<HashMap<String, String>>,
}

impl StubDom {
    pub fn new() -> Self {
        Self {
            fixed: Mutex::new(HashMap::new()),
            timelines: Mutex::new(HashMap::new()),
            composer_selector: None,
            composer: Mutex::new(String::new()),
            insert_supported: true,
            replace_supported: true,
            enters: Mutex::new(0),
            clicks: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
            clipboard: None,
            kv: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fixed(self, selector: &str, texts: &[&str]) -> Self {
        self.fixed.lock().unwrap().insert(
            selector.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_timeline(self, selector: &str, counts: &[usize]) -> Self {
        assert!(!counts.is_empty());
        self.timelines.lock().unwrap().insert(
            selector.to_string(),
            Timeline {
                counts: counts.to_vec(),
                cursor: 0,
            },
        );
        self
    }

    pub fn with_composer(mut self, selector: &str) -> Self {
        self.composer_selector = Some(selector.to_string());
        self
    }

    pub fn without_insert_support(mut self) -> Self {
        self.insert_supported = false;
        self
    }

    pub fn without_replace_support(mut self) -> Self {
        self.replace_supported = false;
        self
    }

    pub fn with_clipboard(mut self, text: &str) -> Self {
        self.clipboard = Some(text.to_string());
        self
    }

    fn handles(selector: &str, count: usize) -> Vec<NodeHandle> {
        (0..count)
            .map(|index| NodeHandle {
                selector: selector.to_string(),
                index,
            })
            .collect()
    }
}

#[async_trait]
impl DomSurface for StubDom {
    async fn query_all(&self, selector: &str) -> Result<Vec<NodeHandle>, DomError> {
        if self.composer_selector.as_deref() == Some(selector) {
            return Ok(Self::handles(selector, 1));
        }
        if let Some(timeline) = self.timelines.lock().unwrap().get_mut(selector) {
            let at = timeline.cursor.min(timeline.counts.len() - 1);
            timeline.cursor += 1;
            return Ok(Self::handles(selector, timeline.counts[at]));
        }
        let count = self
            .fixed
            .lock()
            .unwrap()
            .get(selector)
            .map(|texts| texts.len())
            .unwrap_or(0);
        Ok(Self::handles(selector, count))
    }

    async fn text_content(&self, node: &NodeHandle) -> Result<Option<String>, DomError> {
        if self.composer_selector.as_deref() == Some(node.selector.as_str()) {
            return Ok(Some(self.composer.lock().unwrap().clone()));
        }
        if self.timelines.lock().unwrap().contains_key(&node.selector) {
            return Ok(Some(String::new()));
        }
        Ok(self
            .fixed
            .lock()
            .unwrap()
            .get(&node.selector)
            .and_then(|texts| texts.get(node.index))
            .cloned())
    }

    async fn click(&self, node: &NodeHandle) -> Result<(), DomError> {
        self.clicks.lock().unwrap().push(node.selector.clone());
        Ok(())
    }

    async fn focus(&self, _node: &NodeHandle) -> Result<(), DomError> {
        Ok(())
    }

    async fn insert_text(&self, _node: &NodeHandle, text: &str) -> Result<(), DomError> {
        if !self.insert_supported {
            return Err(DomError::Unsupported("insertText command"));
        }
        *self.composer.lock().unwrap() = text.to_string();
        Ok(())
    }

    async fn replace_text(&self, _node: &NodeHandle, text: &str) -> Result<(), DomError> {
        if !self.replace_supported {
            return Err(DomError::Eval("content overwrite failed".to_string()));
        }
        *self.composer.lock().unwrap() = text.to_string();
        Ok(())
    }

    async fn press_enter(&self, _node: &NodeHandle) -> Result<(), DomError> {
        *self.enters.lock().unwrap() += 1;
        Ok(())
    }

    async fn attach_file(&self, _node: &NodeHandle, payload: &FilePayload) -> Result<(), DomError> {
        self.attached.lock().unwrap().push(payload.filename.clone());
        Ok(())
    }

    async fn read_clipboard(&self) -> Result<String, DomError> {
        self.clipboard
            .clone()
            .ok_or_else(|| DomError::Clipboard("permission denied".to_string()))
    }

    async fn page_url(&self) -> Result<String, DomError> {
        Ok("https://chatgpt.com/c/stub-conversation".to_string())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, DomError> {
        Ok(self.kv.lock().unwrap().get(key).cloned())
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), DomError> {
        self.kv
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
