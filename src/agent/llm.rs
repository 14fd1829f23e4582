//! Chat-completions backed field extractor.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint. Every
//! request or parse failure falls back to [`RuleExtractor`], so a flaky
//! model never stalls a registration.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::draft::Field;
use crate::agent::extractor::{Extraction, FieldExtractor, RuleExtractor};
use crate::config::ExtractorConfig;
use crate::error::ExtractionError;

const PROVIDER: &str = "openai_chat";

const SYSTEM_PROMPT: &str = "You extract pharmacy registration details from a caller's message. \
Reply with a single JSON object with the keys name, email, city, state and prescriptions. \
Use null for anything the message does not state. prescriptions is a list of drug names. \
Never guess values that are not in the message.";

/// LLM extractor with a rule-based fallback.
pub struct LlmExtractor {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    fallback: RuleExtractor,
}

impl LlmExtractor {
    /// Build from config. Fails when no API key is configured.
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractionError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ExtractionError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: "no API key configured".to_string(),
            })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build LLM client, using defaults: {}", e);
                Client::new()
            });

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            fallback: RuleExtractor::new(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn complete(&self, text: &str, remaining: &[Field]) -> Result<String, ExtractionError> {
        let wanted: Vec<&str> = remaining.iter().map(Field::as_str).collect();
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatCompletionMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatCompletionMessage {
                    role: "user",
                    content: format!(
                        "Still needed: {}\nMessage: {}",
                        if wanted.is_empty() {
                            "nothing".to_string()
                        } else {
                            wanted.join(", ")
                        },
                        text
                    ),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = self.api_url("chat/completions");
        tracing::debug!("Sending extraction request to {}", url);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Extraction response status: {}", status);

        if !status.is_success() {
            return Err(ExtractionError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {}: {}", status, body),
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| ExtractionError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("JSON parse error: {}", e),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExtractionError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "No content in response".to_string(),
            })
    }
}

#[async_trait]
impl FieldExtractor for LlmExtractor {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn extract(&self, text: &str, remaining: &[Field]) -> Result<Extraction, ExtractionError> {
        let outcome = match self.complete(text, remaining).await {
            Ok(content) => parse_extraction(&content),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(extraction) => Ok(extraction),
            Err(e) => {
                tracing::warn!("LLM extraction failed, using rules: {}", e);
                Ok(self.fallback.extract_now(text, remaining))
            }
        }
    }
}

/// Parse the model's reply. Prose around the JSON object is ignored.
pub(crate) fn parse_extraction(content: &str) -> Result<Extraction, ExtractionError> {
    let invalid = |reason: String| ExtractionError::InvalidResponse {
        provider: PROVIDER.to_string(),
        reason,
    };

    let start = content
        .find('{')
        .ok_or_else(|| invalid("no JSON object in reply".to_string()))?;
    let end = content
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| invalid("unterminated JSON object".to_string()))?;
    let value: Value = serde_json::from_str(&content[start..=end])
        .map_err(|e| invalid(format!("JSON parse error: {}", e)))?;

    let mut out = Extraction::default();
    for field in [Field::Name, Field::City, Field::State, Field::Email] {
        if let Some(Value::String(v)) = value.get(field.as_str()) {
            out.insert(field, v.as_str());
        }
    }

    if let Some(Value::Array(items)) = value.get("prescriptions") {
        out.prescriptions = items
            .iter()
            .filter_map(|item| match item {
                Value::String(drug) => Some(drug.trim().to_string()),
                Value::Object(map) => map
                    .get("drug")
                    .and_then(Value::as_str)
                    .map(|d| d.trim().to_string()),
                _ => None,
            })
            .filter(|drug| !drug.is_empty())
            .collect();
    }

    Ok(out)
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionReply,
}

#[derive(Deserialize)]
struct ChatCompletionReply {
    content: Option<String>,
}
