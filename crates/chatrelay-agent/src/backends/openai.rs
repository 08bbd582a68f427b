use crate::config::{LlmProvider, ModelConfig};
use crate::gateway::CompletionGateway;
use async_trait::async_trait;
use chatrelay_core::{RelayError, RelayResult};
use chatrelay_session::Session;
use tracing::debug;

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, OpenRouter, Groq and any other provider implementing
/// `POST /v1/chat/completions`.
pub struct OpenAiGateway {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiGateway {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// System prompt, then every completed exchange as a user/assistant
    /// pair, then the prompt awaiting its reply.
    fn build_messages(&self, session: &Session) -> RelayResult<Vec<serde_json::Value>> {
        let current = session.current().ok_or(RelayError::NoActiveExchange)?;
        let mut api_messages = Vec::with_capacity(session.history().len() * 2 + 2);

        if let Some(sys) = &self.config.system_prompt {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for exchange in session.history() {
            api_messages.push(serde_json::json!({
                "role": "user",
                "content": exchange.prompt
            }));
            api_messages.push(serde_json::json!({
                "role": "assistant",
                "content": exchange.reply
            }));
        }

        api_messages.push(serde_json::json!({
            "role": "user",
            "content": current.prompt
        }));

        Ok(api_messages)
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");

        // OpenRouter requires extra headers
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request.header("X-Title", "chatrelay")
        } else {
            request
        }
    }
}

#[async_trait]
impl CompletionGateway for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, session: &Session) -> RelayResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": self.build_messages(session)?,
        });

        debug!(chat_id = %session.id(), model = %self.config.model_id, "Requesting completion");

        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_text = resp
            .text()
            .await
            .map_err(|e| RelayError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(RelayError::Gateway(format!(
                "completion API error {status}: {resp_text}"
            )));
        }

        let resp_body: serde_json::Value = serde_json::from_str(&resp_text)?;
        parse_completion(&resp_body)
    }
}

/// Extracts the first choice's message content.
pub fn parse_completion(body: &serde_json::Value) -> RelayResult<String> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .trim();
    if content.is_empty() {
        return Err(RelayError::Gateway("empty completion".into()));
    }
    Ok(content.to_string())
}
