#[cfg(test)]
mod tests;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{KbError, Result};

/// Maximum characters of raw model output echoed in parse failures.
const PARSE_PREVIEW_CHARS: usize = 200;

/// A JSON-constrained completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

/// Raw completion output plus usage accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub content: String,
    pub tokens_used: u64,
    pub model: String,
    pub provider: String,
}

/// Language model service boundary. Implementations must support
/// JSON-constrained output; truncated responses are tolerated because the
/// caller repairs them before parsing.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_json(&self, request: &CompletionRequest) -> Result<CompletionResponse>;
}

/// Parse a model response as JSON, attempting one repair pass first.
///
/// The repair strips Markdown code fences, closes an unterminated string,
/// balances brackets/braces, and as a last resort drops a trailing
/// incomplete key-value pair. If all of that fails the parse error surfaces
/// with a truncated content preview for diagnostics.
#[inline]
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let stripped = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str(stripped) {
        return Ok(value);
    }

    let balanced = balance_delimiters(stripped);
    if let Ok(value) = serde_json::from_str(&balanced) {
        debug!("Recovered model response by balancing delimiters");
        return Ok(value);
    }

    if let Some(truncated) = drop_trailing_fragment(stripped) {
        let balanced = balance_delimiters(&truncated);
        if let Ok(value) = serde_json::from_str(&balanced) {
            debug!("Recovered model response by dropping a trailing fragment");
            return Ok(value);
        }
    }

    let preview: String = raw.chars().take(PARSE_PREVIEW_CHARS).collect();
    Err(KbError::Parse(format!(
        "Model response is not valid JSON after repair: {}",
        preview
    )))
}

/// Strip a surrounding Markdown code fence (```json ... ```), if present.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip the language tag on the fence line.
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim()
}

/// Close an unterminated string and append closers for any open braces and
/// brackets, in reverse order of opening.
fn balance_delimiters(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(c),
            '}' if !in_string => {
                if stack.last() == Some(&'{') {
                    stack.pop();
                }
            }
            ']' if !in_string => {
                if stack.last() == Some(&'[') {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = s.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    // A dangling separator would make the balanced form invalid.
    while out.ends_with(',') || out.ends_with(':') {
        out.pop();
    }
    for opener in stack.into_iter().rev() {
        out.push(if opener == '{' { '}' } else { ']' });
    }
    out
}

/// Cut the input at its last comma outside any string, discarding a trailing
/// incomplete key-value pair. Returns `None` when there is no comma to cut at.
fn drop_trailing_fragment(s: &str) -> Option<String> {
    let mut in_string = false;
    let mut escaped = false;
    let mut last_comma = None;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ',' if !in_string => last_comma = Some(i),
            _ => {}
        }
    }

    last_comma.map(|i| s[..i].to_string())
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    response_format: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

/// Chat client for OpenAI-compatible `/chat/completions` endpoints with
/// JSON-constrained output.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    base_url: Url,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    #[inline]
    pub fn new(base_url: Url, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KbError::LanguageModel(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            api_key,
            model,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn complete_json(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let url = self.base_url.join("chat/completions").map_err(|e| {
            KbError::LanguageModel(format!("Failed to build completion URL: {}", e))
        })?;

        debug!("Requesting JSON completion from {}", url);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
            response_format: serde_json::json!({ "type": "json_object" }),
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KbError::LanguageModel(format!("Completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KbError::LanguageModel(format!(
                "Language model service returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            KbError::LanguageModel(format!("Failed to parse completion response: {}", e))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            KbError::LanguageModel("Completion response contained no choices".to_string())
        })?;

        let tokens_used = parsed.usage.map_or_else(
            || {
                warn!("Completion response missing usage block");
                0
            },
            |u| u.total_tokens,
        );

        Ok(CompletionResponse {
            content: choice.message.content,
            tokens_used,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            provider: "openai".to_string(),
        })
    }
}
