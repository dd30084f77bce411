//! `DomSurface` over a live DevTools-protocol tab.
//!
//! Every operation evaluates a small JavaScript snippet in the page. Values
//! cross the boundary as JSON: arguments are embedded via JSON string
//! quoting (never string concatenation, prompts contain quotes and
//! newlines), and snippets report back `"ok"`, `"gone"`, `"unsupported"`, or
//! `"error:<message>"` so failures inside the page surface as typed errors
//! here instead of silent no-ops.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;

use super::{DomError, DomSurface, FilePayload, NodeHandle};

pub struct CdpDom {
    page: Page,
}

impl CdpDom {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Evaluate an expression with promises awaited and the result returned
    /// by value, so object-shaped returns come back as JSON.
    async fn eval(&self, expression: String) -> Result<serde_json::Value, DomError> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(DomError::Eval)?;
        let result = self.page.evaluate(params).await.map_err(cdp_failure)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn run_action(&self, expression: String, what: &'static str) -> Result<(), DomError> {
        let value = self.eval(expression).await?;
        expect_ok(&value, what)
    }
}

fn cdp_failure(err: CdpError) -> DomError {
    DomError::Eval(err.to_string())
}

/// JSON-quote a string for embedding into a snippet.
fn js_str(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// `document.querySelectorAll(sel)[idx]` for a handle.
fn node_expr(node: &NodeHandle) -> String {
    format!(
        "document.querySelectorAll({})[{}]",
        js_str(&node.selector),
        node.index
    )
}

fn expect_ok(value: &serde_json::Value, what: &'static str) -> Result<(), DomError> {
    match value.as_str() {
        Some("ok") => Ok(()),
        Some("gone") => Err(DomError::Stale),
        Some(tagged) if tagged.starts_with("error:") => {
            Err(DomError::Eval(tagged["error:".len()..].trim().to_string()))
        }
        _ => Err(DomError::Shape(format!("{what}: {value}"))),
    }
}

#[async_trait]
impl DomSurface for CdpDom {
    async fn query_all(&self, selector: &str) -> Result<Vec<NodeHandle>, DomError> {
        let expression = format!("document.querySelectorAll({}).length", js_str(selector));
        let value = self.eval(expression).await?;
        let count = value
            .as_u64()
            .ok_or_else(|| DomError::Shape(format!("match count: {value}")))?;
        Ok((0..count as usize)
            .map(|index| NodeHandle {
                selector: selector.to_string(),
                index,
            })
            .collect())
    }

    async fn text_content(&self, node: &NodeHandle) -> Result<Option<String>, DomError> {
        let expression = format!(
            "(() => {{ const el = {}; return el ? el.textContent : null; }})()",
            node_expr(node)
        );
        match self.eval(expression).await? {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(text) => Ok(Some(text)),
            other => Err(DomError::Shape(format!("textContent: {other}"))),
        }
    }

    async fn click(&self, node: &NodeHandle) -> Result<(), DomError> {
        let expression = format!(
            r#"(() => {{
  const el = {node};
  if (!el) return "gone";
  try {{ el.click(); return "ok"; }} catch (err) {{ return "error:" + err.message; }}
}})()"#,
            node = node_expr(node)
        );
        self.run_action(expression, "click").await
    }

    async fn focus(&self, node: &NodeHandle) -> Result<(), DomError> {
        let expression = format!(
            r#"(() => {{
  const el = {node};
  if (!el) return "gone";
  try {{ el.focus(); return "ok"; }} catch (err) {{ return "error:" + err.message; }}
}})()"#,
            node = node_expr(node)
        );
        self.run_action(expression, "focus").await
    }

    async fn insert_text(&self, node: &NodeHandle, text: &str) -> Result<(), DomError> {
        // Select-all + delete + editor-level insert. execCommand reports
        // false where the command is unavailable; that becomes Unsupported
        // so the caller takes the fallback path.
        let expression = format!(
            r#"(() => {{
  const el = {node};
  if (!el) return "gone";
  try {{
    el.focus();
    const range = document.createRange();
    range.selectNodeContents(el);
    range.deleteContents();
    const selection = window.getSelection();
    selection.removeAllRanges();
    selection.addRange(range);
    const ok = document.execCommand("insertText", false, {text});
    return ok ? "ok" : "unsupported";
  }} catch (err) {{
    return "error:" + err.message;
  }}
}})()"#,
            node = node_expr(node),
            text = js_str(text)
        );
        let value = self.eval(expression).await?;
        if value.as_str() == Some("unsupported") {
            return Err(DomError::Unsupported("the insertText command"));
        }
        expect_ok(&value, "insert_text")
    }

    async fn replace_text(&self, node: &NodeHandle, text: &str) -> Result<(), DomError> {
        let expression = format!(
            r#"(() => {{
  const el = {node};
  if (!el) return "gone";
  try {{
    el.focus();
    if (el.isContentEditable) {{
      el.innerHTML = "";
      el.textContent = {text};
    }} else {{
      el.value = {text};
    }}
    el.dispatchEvent(new InputEvent("input", {{ data: {text}, bubbles: true, composed: true }}));
    return "ok";
  }} catch (err) {{
    return "error:" + err.message;
  }}
}})()"#,
            node = node_expr(node),
            text = js_str(text)
        );
        self.run_action(expression, "replace_text").await
    }

    async fn press_enter(&self, node: &NodeHandle) -> Result<(), DomError> {
        let expression = format!(
            r#"(() => {{
  const el = {node};
  if (!el) return "gone";
  try {{
    const init = {{ key: "Enter", code: "Enter", keyCode: 13, which: 13, bubbles: true, cancelable: true }};
    el.dispatchEvent(new KeyboardEvent("keydown", init));
    el.dispatchEvent(new KeyboardEvent("keyup", init));
    return "ok";
  }} catch (err) {{
    return "error:" + err.message;
  }}
}})()"#,
            node = node_expr(node)
        );
        self.run_action(expression, "press_enter").await
    }

    async fn attach_file(&self, node: &NodeHandle, payload: &FilePayload) -> Result<(), DomError> {
        let encoded = BASE64.encode(&payload.bytes);
        let expression = format!(
            r#"(() => {{
  const el = {node};
  if (!el) return "gone";
  try {{
    const binary = atob({bytes});
    const data = new Uint8Array(binary.length);
    for (let i = 0; i < binary.length; i += 1) data[i] = binary.charCodeAt(i);
    const file = new File([data], {name}, {{ type: {mime} }});
    const transfer = new DataTransfer();
    transfer.items.add(file);
    el.files = transfer.files;
    el.dispatchEvent(new Event("change", {{ bubbles: true }}));
    el.dispatchEvent(new Event("input", {{ bubbles: true }}));
    el.dispatchEvent(new MouseEvent("click", {{ bubbles: true }}));
    return "ok";
  }} catch (err) {{
    return "error:" + err.message;
  }}
}})()"#,
            node = node_expr(node),
            bytes = js_str(&encoded),
            name = js_str(&payload.filename),
            mime = js_str(&payload.mime)
        );
        self.run_action(expression, "attach_file").await
    }

    async fn read_clipboard(&self) -> Result<String, DomError> {
        let expression = r#"navigator.clipboard.readText().then(
  (text) => ({ ok: text }),
  (err) => ({ err: String(err) })
)"#
        .to_string();
        let value = self.eval(expression).await?;
        if let Some(text) = value.get("ok").and_then(|v| v.as_str()) {
            return Ok(text.to_string());
        }
        let reason = value
            .get("err")
            .and_then(|v| v.as_str())
            .unwrap_or("no result")
            .to_string();
        Err(DomError::Clipboard(reason))
    }

    async fn page_url(&self) -> Result<String, DomError> {
        let url = self.page.url().await.map_err(cdp_failure)?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, DomError> {
        let expression = format!("localStorage.getItem({})", js_str(key));
        match self.eval(expression).await? {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(value) => Ok(Some(value)),
            other => Err(DomError::Shape(format!("storage value: {other}"))),
        }
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), DomError> {
        let expression = format!(
            r#"(() => {{
  try {{ localStorage.setItem({key}, {value}); return "ok"; }}
  catch (err) {{ return "error:" + err.message; }}
}})()"#,
            key = js_str(key),
            value = js_str(value)
        );
        self.run_action(expression, "kv_set").await
    }
}
