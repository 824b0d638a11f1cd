//! Collapses the two inbound encodings of `/decide` into one `DecisionRequest`.
//!
//! JSON bodies carry the screenshot inline as base64. Multipart forms carry it as a
//! binary attachment, which is persisted to a scratch file keyed by session and
//! timestamp. Scratch files are never cleaned up here.

use crate::error::GatewayError;
use crate::schema::{DecisionRequest, DecisionRequestBody, GoalItem, HistoryItem, Screenshot};
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_SESSION_ID: &str = "device-local";
const DEFAULT_GOAL_ID: &str = "idle";
const DEFAULT_EXTENSION: &str = "png";
const MAX_STEM_BYTES: usize = 200;
const MAX_EXTENSION_BYTES: usize = 16;

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid filename regex"));

/// Keeps only alphanumerics, hyphen, underscore and dot.
pub fn sanitize_filename(name: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(name, "").into_owned()
}

pub fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Dispatches on content type; the result carries no trace of the transport used.
pub async fn normalize(request: Request, scratch_dir: &Path) -> Result<DecisionRequest, GatewayError> {
    if is_multipart(&request) {
        decode_multipart(request, scratch_dir).await
    } else {
        decode_json(request).await
    }
}

pub async fn decode_json(request: Request) -> Result<DecisionRequest, GatewayError> {
    let Json(body) = Json::<DecisionRequestBody>::from_request(request, &())
        .await
        .map_err(|rejection| GatewayError::InvalidBody(rejection.body_text()))?;
    Ok(body.into())
}

#[derive(Default)]
struct FormFields {
    session_id: Option<String>,
    timestamp_ms: Option<String>,
    current_goal_id: Option<String>,
    goal_list_json: Option<String>,
    history_json: Option<String>,
    screenshot: Option<(Option<String>, Bytes)>,
}

fn multipart_error(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::MultipartParse(err.to_string())
}

async fn read_form(mut multipart: Multipart) -> Result<FormFields, GatewayError> {
    let mut form = FormFields::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "screenshot_file" => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                form.screenshot = Some((file_name, bytes));
            }
            "session_id" | "timestamp_ms" | "current_goal_id" | "goal_list_json"
            | "history_json" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::MultipartParse(format!("{}: {}", name, e)))?;
                let slot = match name.as_str() {
                    "session_id" => &mut form.session_id,
                    "timestamp_ms" => &mut form.timestamp_ms,
                    "current_goal_id" => &mut form.current_goal_id,
                    "goal_list_json" => &mut form.goal_list_json,
                    _ => &mut form.history_json,
                };
                *slot = Some(text);
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    Ok(form)
}

fn parse_embedded<T: DeserializeOwned>(field: &str, raw: Option<&str>) -> Result<Vec<T>, GatewayError> {
    match raw {
        None => Ok(Vec::new()),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| GatewayError::MultipartParse(format!("{}: {}", field, e))),
    }
}

fn scratch_file_name(session_id: &str, timestamp_ms: i64, upload_name: Option<&str>) -> String {
    let extension = upload_name
        .and_then(|n| Path::new(n).extension())
        .map(|ext| {
            let mut ext = sanitize_filename(&ext.to_string_lossy());
            ext.truncate(MAX_EXTENSION_BYTES);
            ext
        })
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    let mut stem = sanitize_filename(&format!("{}_{}", session_id, timestamp_ms));
    // Sanitized names are ASCII, so byte truncation stays on a char boundary.
    stem.truncate(MAX_STEM_BYTES);
    format!("{}.{}", stem, extension)
}

pub async fn decode_multipart(request: Request, scratch_dir: &Path) -> Result<DecisionRequest, GatewayError> {
    let multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| GatewayError::MultipartParse(rejection.body_text()))?;
    let form = read_form(multipart).await?;

    let session_id = form
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
    let timestamp_ms = match form.timestamp_ms.as_deref() {
        None => 0,
        Some(raw) => raw.trim().parse::<i64>().map_err(|e| {
            GatewayError::MultipartParse(format!("timestamp_ms: {}: {:?}", e, raw))
        })?,
    };
    let current_goal_id = form
        .current_goal_id
        .unwrap_or_else(|| DEFAULT_GOAL_ID.to_string());
    let goal_list: Vec<GoalItem> = parse_embedded("goal_list_json", form.goal_list_json.as_deref())?;
    let history: Vec<HistoryItem> = parse_embedded("history_json", form.history_json.as_deref())?;

    let (upload_name, bytes) = match form.screenshot {
        Some((name, bytes)) if !bytes.is_empty() => (name, bytes),
        _ => return Err(GatewayError::MissingAttachment),
    };

    tokio::fs::create_dir_all(scratch_dir).await?;
    let path: PathBuf =
        scratch_dir.join(scratch_file_name(&session_id, timestamp_ms, upload_name.as_deref()));
    tokio::fs::write(&path, &bytes).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "screenshot written to scratch");

    Ok(DecisionRequest {
        session_id,
        timestamp_ms,
        goal_list,
        current_goal_id,
        history,
        screenshot: Screenshot::File(path),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;

    pub const BOUNDARY: &str = "gatewayboundary";

    /// Builds a multipart/form-data request. Each part is (name, optional filename, bytes).
    pub fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &str)]) -> Request {
        let mut body: Vec<u8> = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(file) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                            name, file
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                    );
                }
            }
            body.extend_from_slice(data.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(body: &str) -> Request {
        http::Request::builder()
            .method("POST")
            .uri("/decide")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_sanitize_strips_path_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_filename("dev ice#1_0.png"), "device1_0.png");
        assert_eq!(sanitize_filename("ok-name_1.jpg"), "ok-name_1.jpg");
    }

    #[test]
    fn test_scratch_file_name() {
        assert_eq!(scratch_file_name("device-local", 42, Some("frame.jpg")), "device-local_42.jpg");
        assert_eq!(scratch_file_name("a/b", 1, None), "ab_1.png");
        assert_eq!(scratch_file_name("s", 1, Some("noext")), "s_1.png");
    }

    #[test]
    fn test_scratch_file_name_is_capped() {
        let name = scratch_file_name(&"a".repeat(400), 5, Some("f.png"));
        assert_eq!(name.len(), MAX_STEM_BYTES + ".png".len());
        assert!(name.ends_with("a.png"));
    }

    #[tokio::test]
    async fn test_multipart_long_session_id_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = "a".repeat(400);
        let req = multipart_request(
            "/decide",
            &[("session_id", None, session_id.as_str()), ("screenshot_file", Some("f.png"), "img")],
        );
        let decoded = normalize(req, dir.path()).await.unwrap();
        assert_eq!(decoded.session_id, session_id);
        let path = decoded.screenshot.file_path().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"img");
    }

    #[tokio::test]
    async fn test_json_body_is_inline() {
        let dir = tempfile::tempdir().unwrap();
        let req = json_request(
            r#"{"session_id":"s1","timestamp_ms":7,"goal_list":[{"id":"g1","desc":"d"}],
                "current_goal_id":"g1","history":[],"screenshot_base64":"QUJD"}"#,
        );
        let decoded = normalize(req, dir.path()).await.unwrap();
        assert_eq!(decoded.session_id, "s1");
        assert_eq!(decoded.goal_list[0].priority, 99);
        assert_eq!(decoded.screenshot, Screenshot::Inline("QUJD".to_string()));
    }

    #[tokio::test]
    async fn test_json_body_missing_field_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = normalize(json_request(r#"{"session_id":"s1"}"#), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request_body");
    }

    #[tokio::test]
    async fn test_multipart_writes_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let req = multipart_request(
            "/decide",
            &[
                ("session_id", None, "../evil"),
                ("timestamp_ms", None, "1730000000000"),
                ("current_goal_id", None, "mainline_unlock"),
                ("goal_list_json", None, r#"[{"id":"mainline_unlock","desc":"main","done":false,"priority":1}]"#),
                ("history_json", None, r#"[{"action":"wait","x":0,"y":0,"result":"ok"}]"#),
                ("screenshot_file", Some("frame.png"), "PNG-bytes"),
            ],
        );
        let decoded = normalize(req, dir.path()).await.unwrap();
        assert_eq!(decoded.current_goal_id, "mainline_unlock");
        assert_eq!(decoded.history.len(), 1);

        let path = decoded.screenshot.file_path().unwrap().clone();
        assert_eq!(path, dir.path().join("..evil_1730000000000.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"PNG-bytes");
    }

    #[tokio::test]
    async fn test_multipart_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let req = multipart_request("/decide", &[("screenshot_file", Some("f.png"), "img")]);
        let decoded = normalize(req, dir.path()).await.unwrap();
        assert_eq!(decoded.session_id, "device-local");
        assert_eq!(decoded.timestamp_ms, 0);
        assert_eq!(decoded.current_goal_id, "idle");
        assert!(decoded.goal_list.is_empty());
        assert!(decoded.history.is_empty());
    }

    #[tokio::test]
    async fn test_multipart_bad_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let req = multipart_request(
            "/decide",
            &[("timestamp_ms", None, "soon"), ("screenshot_file", Some("f.png"), "img")],
        );
        let err = normalize(req, dir.path()).await.unwrap_err();
        assert_eq!(err.code(), "multipart_parse_error");
        assert!(err.to_string().contains("timestamp_ms"));
    }

    #[tokio::test]
    async fn test_multipart_bad_embedded_json() {
        let dir = tempfile::tempdir().unwrap();
        let req = multipart_request(
            "/decide",
            &[("goal_list_json", None, "[{"), ("screenshot_file", Some("f.png"), "img")],
        );
        let err = normalize(req, dir.path()).await.unwrap_err();
        assert_eq!(err.code(), "multipart_parse_error");
        assert!(err.to_string().contains("goal_list_json"));
    }

    #[tokio::test]
    async fn test_multipart_missing_attachment_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("frames");
        let req = multipart_request("/decide", &[("session_id", None, "s1")]);
        let err = normalize(req, &scratch).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingAttachment));
        assert!(!scratch.exists());
    }
}
