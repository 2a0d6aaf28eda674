// Remote language-model collaborator.
//
// The interpretation engine only needs "prompt in, text out"; `ChatCompletionsClient`
// speaks the OpenAI-compatible chat-completions protocol (DeepSeek by default).

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::InterpretationConfig;

/// Prompt in, completion text out.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, system: &str, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct ChatCompletionsClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatCompletionsClient {
    /// `None` when no API key is configured.
    pub fn from_config(config: &InterpretationConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        // The engine enforces its own deadline; this one only guards against hung sockets
        let http_client = reqwest::Client::builder()
            .timeout(config.remote_timeout() + Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Some(Self {
            http_client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!("Sending chat completion request to {}", self.endpoint);
        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Language model server error {}: {}", status, body);
            anyhow::bail!("HTTP {}: {}", status, body);
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("Failed to parse chat completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .context("Chat completion response has no content")
    }
}
