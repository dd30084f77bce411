//! Attachment handling.
//!
//! An image reference arrives as either an http(s) URL or a base64 data URI.
//! Both are reduced to a [`FilePayload`] (bytes + mime + generated filename)
//! and handed to the page as a simulated file-picker selection.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

use crate::dom::{DomSurface, FilePayload};
use crate::error::FlowError;
use crate::request::ImageRef;
use crate::selectors::{Pick, SelectorSet, resolve};

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("image reference is not usable: {0}")]
    BadReference(String),

    #[error("fetching the image failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("decoding the data URI failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("no file input found to attach the image to")]
    NoFileInput,
}

/// Turn an image reference into bytes. URLs are fetched; the mime type comes
/// from the response's Content-Type (defaulting to PNG, which is what the
/// host's uploads almost always are).
pub async fn prepare(image: &ImageRef, http: &reqwest::Client) -> Result<FilePayload, AttachError> {
    match image {
        ImageRef::DataUri(uri) => decode_data_uri(uri),
        ImageRef::Url(reference) => {
            let parsed = Url::parse(reference)
                .map_err(|e| AttachError::BadReference(format!("{reference}: {e}")))?;
            debug!("fetching attachment from {parsed}");
            let response = http.get(parsed).send().await?.error_for_status()?;
            let mime = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
                .unwrap_or_else(|| "image/png".to_string());
            let bytes = response.bytes().await?.to_vec();
            Ok(named_payload(mime, bytes))
        }
    }
}

pub fn decode_data_uri(uri: &str) -> Result<FilePayload, AttachError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| AttachError::BadReference("not a data URI".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| AttachError::BadReference("data URI has no payload".to_string()))?;
    let (mime, encoding) = match header.split_once(';') {
        Some((mime, encoding)) => (mime, Some(encoding)),
        None => (header, None),
    };
    if encoding != Some("base64") {
        return Err(AttachError::BadReference(
            "only base64 data URIs are supported".to_string(),
        ));
    }
    let bytes = BASE64.decode(payload.as_bytes())?;
    let mime = if mime.is_empty() { "image/png" } else { mime };
    Ok(named_payload(mime.to_string(), bytes))
}

/// Hand the payload to the host's (usually hidden) file input and give it
/// the settle delay to render the upload preview.
pub async fn attach_image(
    dom: &dyn DomSurface,
    file_input: &SelectorSet,
    payload: &FilePayload,
    settle: Duration,
) -> Result<(), FlowError> {
    let Some(hit) = resolve(dom, file_input, Pick::First)
        .await
        .map_err(FlowError::Dom)?
    else {
        return Err(AttachError::NoFileInput.into());
    };
    dom.attach_file(&hit.node, payload)
        .await
        .map_err(FlowError::Dom)?;
    info!(
        "attached {} ({} bytes) to the composer",
        payload.filename,
        payload.bytes.len()
    );
    sleep(settle).await;
    Ok(())
}

fn named_payload(mime: String, bytes: Vec<u8>) -> FilePayload {
    let filename = format!(
        "attachment-{}.{}",
        Utc::now().timestamp_millis(),
        extension_for(&mime)
    );
    FilePayload {
        filename,
        mime,
        bytes,
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::stub::StubDom;

    #[test]
    fn data_uri_round_trips_to_bytes() {
        let uri = format!("data:image/webp;base64,{}", BASE64.encode(b"not-a-real-webp"));
        let payload = decode_data_uri(&uri).unwrap();
        assert_eq!(payload.mime, "image/webp");
        assert_eq!(payload.bytes, b"not-a-real-webp");
        assert!(payload.filename.starts_with("attachment-"));
        assert!(payload.filename.ends_with(".webp"));
    }

    #[test]
    fn missing_payload_or_encoding_is_rejected() {
        assert!(matches!(
            decode_data_uri("data:image/png;base64"),
            Err(AttachError::BadReference(_))
        ));
        assert!(matches!(
            decode_data_uri("data:text/plain,hello"),
            Err(AttachError::BadReference(_))
        ));
    }

    #[test]
    fn unknown_mime_defaults_to_png() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("application/octet-stream"), "png");
    }

    #[tokio::test]
    async fn attaches_through_the_file_input() {
        let dom = StubDom::new().with_fixed("input[type=\"file\"]", &[""]);
        let set = SelectorSet::new("file_input", ["input[type=\"file\"]"]);
        let payload = named_payload("image/png".to_string(), vec![1, 2, 3]);
        attach_image(&dom, &set, &payload, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(
            dom.attached.lock().unwrap().as_slice(),
            [payload.filename.clone()]
        );
    }

    #[tokio::test]
    async fn missing_file_input_is_an_error() {
        let dom = StubDom::new();
        let set = SelectorSet::new("file_input", ["input[type=\"file\"]"]);
        let payload = named_payload("image/png".to_string(), vec![1]);
        let err = attach_image(&dom, &set, &payload, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Attach(AttachError::NoFileInput)));
    }
}
