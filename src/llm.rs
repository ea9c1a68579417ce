//! LLM classification seam.
//!
//! The classifier is an Ollama-compatible HTTP service. Its failure kinds
//! matter to the pipeline: a missing model is recoverable (auto-pull and
//! retry), a timeout or transport error is not.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::{ClassifyResult, Tag};

#[derive(Debug, Clone)]
pub enum LlmError {
    /// The configured model is not provisioned on the service.
    ModelNotFound(String),
    Timeout,
    Transport(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ModelNotFound(model) => write!(f, "model '{}' not found", model),
            LlmError::Timeout => write!(f, "classification call timed out"),
            LlmError::Transport(reason) => write!(f, "classification transport error: {}", reason),
        }
    }
}

impl std::error::Error for LlmError {}

/// Document classification via an external LLM service.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<ClassifyResult, LlmError>;

    /// The model this classifier is configured to use.
    fn model(&self) -> &str;
}

/// Build the classification prompt from OCR text and file metadata.
///
/// When no text was extracted the prompt falls back to metadata only; the
/// absence of text is a content category for the model to tag, not an
/// error.
pub fn build_prompt(file_name: &str, file_type: &str, ocr_text: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a document archivist. Classify the document below and respond with a \
         single JSON object: {\"tags\": [{\"number\": <int>, \"label\": <string>}], \
         \"description\": <string>, \"confidence\": <float 0..1>}.\n\n",
    );
    prompt.push_str(&format!("File name: {}\n", file_name));
    prompt.push_str(&format!("File type: {}\n", file_type));

    if ocr_text.trim().is_empty() {
        prompt.push_str(
            "\nNo text could be extracted from this document. Classify it from the file \
             metadata alone and tag it as non-textual content.\n",
        );
    } else {
        prompt.push_str("\nExtracted text:\n---\n");
        prompt.push_str(ocr_text);
        prompt.push_str("\n---\n");
    }

    prompt
}

/// Ollama-compatible classifier calling `POST {host}/api/generate`.
pub struct OllamaClassifier {
    host: String,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl OllamaClassifier {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(&self, prompt: &str) -> Result<ClassifyResult, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "temperature": self.temperature },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            // Ollama reports an unpulled model as 404 {"error": "model '...' not found"}
            if status.as_u16() == 404 || body_text.contains("not found") {
                return Err(LlmError::ModelNotFound(self.model.clone()));
            }
            return Err(LlmError::Transport(format!(
                "LLM service error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("invalid LLM response: {}", e)))?;

        let inner = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| {
                LlmError::Transport("invalid LLM response: missing response field".to_string())
            })?;

        let model = json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model);

        Ok(parse_classify_payload(inner, model))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Parse the model's JSON payload leniently.
///
/// Models drift: tags arrive as objects or bare strings, confidence may be
/// missing. Anything unparseable degrades to an empty field rather than a
/// failed item.
pub fn parse_classify_payload(payload: &str, model: &str) -> ClassifyResult {
    let value: serde_json::Value = serde_json::from_str(payload).unwrap_or_default();

    let mut tags = Vec::new();
    if let Some(raw_tags) = value.get("tags").and_then(|t| t.as_array()) {
        for (i, raw) in raw_tags.iter().enumerate() {
            match raw {
                serde_json::Value::String(label) => tags.push(Tag {
                    number: i as i64 + 1,
                    label: label.clone(),
                }),
                serde_json::Value::Object(_) => {
                    let label = raw
                        .get("label")
                        .and_then(|l| l.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if label.is_empty() {
                        continue;
                    }
                    let number = raw
                        .get("number")
                        .and_then(|n| n.as_i64())
                        .unwrap_or(i as i64 + 1);
                    tags.push(Tag { number, label });
                }
                _ => {}
            }
        }
    }

    let description = value
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or_default()
        .to_string();

    let confidence = value
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    ClassifyResult {
        tags,
        description,
        confidence,
        model: model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_extracted_text() {
        let prompt = build_prompt("invoice.pdf", "pdf", "Total due: $42");
        assert!(prompt.contains("invoice.pdf"));
        assert!(prompt.contains("Total due: $42"));
        assert!(!prompt.contains("No text could be extracted"));
    }

    #[test]
    fn prompt_without_text_is_content_only() {
        let prompt = build_prompt("photo.jpg", "jpg", "   ");
        assert!(prompt.contains("No text could be extracted"));
    }

    #[test]
    fn parses_well_formed_payload() {
        let result = parse_classify_payload(
            r#"{"tags": [{"number": 7, "label": "invoice"}], "description": "An invoice", "confidence": 0.92}"#,
            "llama3.2-vision",
        );
        assert_eq!(result.tags.len(), 1);
        assert_eq!(result.tags[0].number, 7);
        assert_eq!(result.tags[0].label, "invoice");
        assert_eq!(result.description, "An invoice");
        assert!((result.confidence - 0.92).abs() < 1e-9);
        assert_eq!(result.model, "llama3.2-vision");
    }

    #[test]
    fn parses_string_tags_with_generated_numbers() {
        let result = parse_classify_payload(r#"{"tags": ["receipt", "2024"]}"#, "m");
        assert_eq!(result.tags.len(), 2);
        assert_eq!(result.tags[0].number, 1);
        assert_eq!(result.tags[1].label, "2024");
    }

    #[test]
    fn garbage_payload_degrades_to_empty_result() {
        let result = parse_classify_payload("not json at all", "m");
        assert!(result.tags.is_empty());
        assert!(result.description.is_empty());
        assert!((result.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped() {
        let result = parse_classify_payload(r#"{"confidence": 7.0}"#, "m");
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }
}
