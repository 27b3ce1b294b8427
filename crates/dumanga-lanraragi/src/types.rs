//! Wire types for the LANraragi JSON API.

use serde::{Deserialize, Deserializer};

use crate::LanraragiError;

/// One entry of `GET /api/archives`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveEntry {
    pub arcid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: String,
    /// The server has sent both `true` and `"true"` over the years.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub isnew: bool,
    #[serde(default)]
    pub pagecount: usize,
    #[serde(default)]
    pub progress: usize,
}

/// Body of `POST /api/archives/:id/extract`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractResponse {
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Generic `{operation, success, error}` envelope used by mutating endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct OperationResponse {
    #[serde(default)]
    pub error: Option<String>,
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        serde_json::Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    })
}

/// Parse the archive index body.
pub fn parse_archive_index(body: &[u8]) -> Result<Vec<ArchiveEntry>, LanraragiError> {
    serde_json::from_slice(body).map_err(|e| LanraragiError::Decode(e.to_string()))
}

/// Parse an extraction body into its ordered page identifiers.
///
/// A body carrying an `error` field is a server-side failure even when the
/// HTTP status was 200.
pub fn parse_extract(body: &[u8]) -> Result<Vec<String>, LanraragiError> {
    let resp: ExtractResponse =
        serde_json::from_slice(body).map_err(|e| LanraragiError::Decode(e.to_string()))?;
    match resp.error {
        Some(msg) if !msg.is_empty() => Err(LanraragiError::Server(msg)),
        _ => Ok(resp.pages),
    }
}

/// Check an operation envelope for an embedded error. Empty or non-JSON
/// bodies count as success.
pub(crate) fn check_operation(body: &[u8]) -> Result<(), LanraragiError> {
    match serde_json::from_slice::<OperationResponse>(body) {
        Ok(OperationResponse {
            error: Some(msg), ..
        }) if !msg.is_empty() => Err(LanraragiError::Server(msg)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_index_accepts_string_and_bool_isnew() {
        let body = br#"[
            {"arcid": "abc", "title": "Vol 1", "tags": "artist:x", "isnew": "true", "pagecount": 20, "progress": 3},
            {"arcid": "def", "title": "Vol 2", "tags": "", "isnew": false}
        ]"#;
        let entries = parse_archive_index(body).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].isnew);
        assert_eq!(entries[0].pagecount, 20);
        assert_eq!(entries[0].progress, 3);
        assert!(!entries[1].isnew);
        assert_eq!(entries[1].pagecount, 0);
    }

    #[test]
    fn archive_index_rejects_garbage() {
        let err = parse_archive_index(b"<html>").unwrap_err();
        assert!(matches!(err, LanraragiError::Decode(_)));
    }

    #[test]
    fn extract_returns_pages_in_order() {
        let body = br#"{"pages": ["./api/archives/abc/page?path=01.jpg", "./api/archives/abc/page?path=02.jpg"]}"#;
        let pages = parse_extract(body).unwrap();
        assert_eq!(
            pages,
            vec![
                "./api/archives/abc/page?path=01.jpg",
                "./api/archives/abc/page?path=02.jpg"
            ]
        );
    }

    #[test]
    fn extract_surfaces_embedded_error() {
        let err = parse_extract(br#"{"error": "archive not found"}"#).unwrap_err();
        match err {
            LanraragiError::Server(msg) => assert_eq!(msg, "archive not found"),
            other => panic!("expected Server, got {other:?}"),
        }
    }

    #[test]
    fn operation_body_variants() {
        assert!(check_operation(br#"{"operation": "clear_new", "success": 1}"#).is_ok());
        assert!(check_operation(b"").is_ok());
        assert!(check_operation(br#"{"success": 0, "error": "nope"}"#).is_err());
    }
}
