/// LLM Client — the single point of entry for Claude API calls in the
/// discovery engine. The classifier signal is the only consumer; no other
/// module may call the Anthropic API directly.
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Exhausted {retries} retries")]
    RetriesExhausted { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Thin Anthropic Messages API wrapper with retry on 429/5xx and a JSON
/// convenience path for structured classification output.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(
        api_key: String,
        model: String,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            model,
        })
    }

    /// Sends one prompt and returns the text of the first text block.
    /// Retries transient failures (429 and 5xx) with exponential backoff.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        let request_body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = std::time::Duration::from_millis(500 * (1 << attempt));
                warn!(
                    "LLM attempt {attempt} failed, retrying after {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: MessagesResponse = response.json().await?;
            let text = parsed
                .content
                .iter()
                .find(|b| b.block_type == "text")
                .and_then(|b| b.text.clone())
                .ok_or(LlmError::EmptyContent)?;

            debug!("LLM call succeeded ({} chars)", text.len());
            return Ok(text);
        }

        Err(last_error.unwrap_or(LlmError::RetriesExhausted {
            retries: MAX_RETRIES,
        }))
    }

    /// Calls the LLM and deserializes the response as JSON. The prompt must
    /// instruct the model to return valid JSON; stray markdown fences are
    /// stripped before parsing.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let text = self.call(prompt, system).await?;
        serde_json::from_str(strip_json_fences(&text)).map_err(LlmError::Parse)
    }
}

/// Strips ```json ... ``` or ``` ... ``` fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let stripped = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    stripped
        .trim_start()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or_else(|| stripped.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        assert_eq!(
            strip_json_fences("```json\n{\"confidence\": 0.8}\n```"),
            "{\"confidence\": 0.8}"
        );
    }

    #[test]
    fn test_strip_json_fences_plain_fence() {
        assert_eq!(strip_json_fences("```\n{}\n```"), "{}");
    }

    #[test]
    fn test_strip_json_fences_passthrough() {
        assert_eq!(strip_json_fences("{\"a\": 1}"), "{\"a\": 1}");
    }
}
