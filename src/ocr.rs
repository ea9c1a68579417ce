//! OCR service seam.
//!
//! The OCR engine is an opaque collaborator reached over HTTP. The pipeline
//! only depends on the [`OcrEngine`] trait, so tests substitute fakes.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::models::OcrPage;

/// Failure reported by the OCR service. Empty output is not an error.
#[derive(Debug, Clone)]
pub struct OcrError {
    pub reason: String,
}

impl fmt::Display for OcrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCR failed: {}", self.reason)
    }
}

impl std::error::Error for OcrError {}

/// Text recognition over a file's bytes.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Run OCR on `path` in the given mode ("fast" or "thorough") and
    /// return the recognized pages in order. Zero pages is a valid result:
    /// "no extractable text" is a content category, not a failure.
    async fn recognize(&self, path: &Path, mode: &str) -> Result<Vec<OcrPage>, OcrError>;
}

/// HTTP client for an OCR sidecar service.
///
/// POSTs `{host}/ocr` with the file's bytes base64-encoded and expects
/// `{"pages": [{"page_number", "text", "confidence"}]}` back.
pub struct HttpOcr {
    host: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrResponsePage>,
}

#[derive(Deserialize)]
struct OcrResponsePage {
    page_number: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f64,
}

impl HttpOcr {
    pub fn new(host: &str, timeout_secs: u64) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| OcrError {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn recognize(&self, path: &Path, mode: &str) -> Result<Vec<OcrPage>, OcrError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| OcrError {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let body = serde_json::json!({
            "file_name": file_name,
            "mode": mode,
            "data": base64::engine::general_purpose::STANDARD.encode(&bytes),
        });

        let response = self
            .client
            .post(format!("{}/ocr", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError {
                reason: format!("OCR service unreachable: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(OcrError {
                reason: format!("OCR service error {}: {}", status, body_text),
            });
        }

        let parsed: OcrResponse = response.json().await.map_err(|e| OcrError {
            reason: format!("invalid OCR response: {}", e),
        })?;

        let mut pages: Vec<OcrPage> = parsed
            .pages
            .into_iter()
            .map(|p| OcrPage {
                page_number: p.page_number,
                text: p.text,
                confidence: p.confidence,
            })
            .collect();
        pages.sort_by_key(|p| p.page_number);

        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing_tolerates_missing_fields() {
        let parsed: OcrResponse =
            serde_json::from_str(r#"{"pages": [{"page_number": 1}]}"#).unwrap();
        assert_eq!(parsed.pages.len(), 1);
        assert_eq!(parsed.pages[0].text, "");
        assert_eq!(parsed.pages[0].confidence, 0.0);
    }

    #[test]
    fn empty_pages_is_success_shape() {
        let parsed: OcrResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.pages.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_an_ocr_error() {
        let ocr = HttpOcr::new("http://localhost:8884", 5).unwrap();
        let err = ocr
            .recognize(Path::new("/nonexistent/nowhere.pdf"), "fast")
            .await
            .unwrap_err();
        assert!(err.reason.contains("failed to read"));
    }
}
