//! Draft generation providers
//!
//! The cascade order is: hosted LLM service, then the self-hosted model
//! server (when enabled), then the deterministic local synthesizer. The
//! hosted client walks a model-candidate list with a single bounded retry on
//! rate-limit responses before falling through to the next candidate.

use async_trait::async_trait;
use docmill_common::db::models::{Language, Source, Tier};
use docmill_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::prompt::PromptVersion;

const HOSTED_TIMEOUT_SECS: u64 = 60;
const LOCAL_TIMEOUT_SECS: u64 = 120;
/// Cap on how long a provider-supplied retry-after hint is honored
const MAX_RETRY_AFTER_SECS: u64 = 10;

/// Everything a provider needs to produce a draft
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub topic: String,
    pub language: Language,
    pub tier: Tier,
    /// Evidence in citation order; positions are the citation indices
    pub sources: Vec<Source>,
}

/// Coarse provider class, used by the paid-tier availability policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Hosted large-language-model service
    Hosted,
    /// Self-hosted model server
    LocalModel,
    /// Deterministic local synthesizer (guaranteed backstop)
    Synthesizer,
}

/// A generation backend in the content cascade
#[async_trait]
pub trait DraftProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ProviderKind;

    /// Produce a markdown draft for the request
    async fn generate(&self, request: &DraftRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Hosted LLM client (OpenAI-compatible chat completions)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Client for the hosted generation service
#[derive(Debug)]
pub struct HostedLlmClient {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
    prompt_version: PromptVersion,
}

impl HostedLlmClient {
    pub fn new(
        api_key: String,
        models: Vec<String>,
        prompt_version: PromptVersion,
    ) -> Result<Self> {
        Self::with_base_url(
            api_key,
            models,
            prompt_version,
            "https://api.openai.com/v1".to_string(),
        )
    }

    /// Base URL override for tests
    pub fn with_base_url(
        api_key: String,
        models: Vec<String>,
        prompt_version: PromptVersion,
        base_url: String,
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::Config(
                "hosted LLM client requires at least one model candidate".to_string(),
            ));
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HOSTED_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            base_url,
            models,
            prompt_version,
        })
    }

    async fn request_once(&self, model: &str, prompt: &str) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        self.http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("hosted LLM request failed: {}", e)))
    }

    /// One attempt per model, plus one bounded retry when rate-limited
    async fn generate_with_model(&self, model: &str, prompt: &str) -> Result<String> {
        let mut retried = false;

        loop {
            let response = self.request_once(model, prompt).await?;
            let status = response.status();

            if status.as_u16() == 429 {
                if retried {
                    return Err(Error::Provider(format!(
                        "model {} rate-limited beyond retry budget",
                        model
                    )));
                }
                let wait = retry_after_secs(&response).min(MAX_RETRY_AFTER_SECS);
                tracing::warn!(model, wait_secs = wait, "Rate limited, retrying once");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                retried = true;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Provider(format!(
                    "hosted LLM returned {} for model {}: {}",
                    status, model, text
                )));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| Error::Provider(format!("hosted LLM parse failed: {}", e)))?;

            return parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| Error::Provider("hosted LLM returned no choices".to_string()));
        }
    }
}

/// Parse a Retry-After header as whole seconds; missing/garbled hints fall
/// back to 1s
fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(1)
}

#[async_trait]
impl DraftProvider for HostedLlmClient {
    fn name(&self) -> &'static str {
        "hosted-llm"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Hosted
    }

    async fn generate(&self, request: &DraftRequest) -> Result<String> {
        let prompt = self.prompt_version.build_prompt(request);
        let mut last_error = None;

        for model in &self.models {
            match self.generate_with_model(model, &prompt).await {
                Ok(draft) => {
                    tracing::info!(model, chars = draft.len(), "Hosted LLM produced draft");
                    return Ok(draft);
                }
                Err(e) => {
                    tracing::warn!(model, error = %e, "Model candidate failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Provider("no hosted model candidates".to_string())))
    }
}

// ---------------------------------------------------------------------------
// Self-hosted model server client (Ollama-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LocalGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct LocalGenerateResponse {
    response: String,
}

/// Client for the self-hosted model server; only constructed when explicitly
/// enabled by configuration
#[derive(Debug)]
pub struct LocalModelClient {
    http_client: reqwest::Client,
    endpoint: String,
    models: Vec<String>,
    prompt_version: PromptVersion,
}

impl LocalModelClient {
    pub fn new(
        endpoint: String,
        models: Vec<String>,
        prompt_version: PromptVersion,
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::Config(
                "local model client requires at least one model candidate".to_string(),
            ));
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LOCAL_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint,
            models,
            prompt_version,
        })
    }

    async fn generate_with_model(&self, model: &str, prompt: &str) -> Result<String> {
        let body = LocalGenerateRequest {
            model,
            prompt,
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("local model request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "local model server returned {} for model {}: {}",
                status, model, text
            )));
        }

        let parsed: LocalGenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("local model parse failed: {}", e)))?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl DraftProvider for LocalModelClient {
    fn name(&self) -> &'static str {
        "local-model"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalModel
    }

    async fn generate(&self, request: &DraftRequest) -> Result<String> {
        let prompt = self.prompt_version.build_prompt(request);
        let mut last_error = None;

        for model in &self.models {
            match self.generate_with_model(model, &prompt).await {
                Ok(draft) => {
                    tracing::info!(model, chars = draft.len(), "Local model produced draft");
                    return Ok(draft);
                }
                Err(e) => {
                    tracing::warn!(model, error = %e, "Local model candidate failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Provider("no local model candidates".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_client_requires_models() {
        let result = HostedLlmClient::new(
            "key".to_string(),
            Vec::new(),
            PromptVersion::V2,
        );
        assert!(matches!(result.unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn local_client_requires_models() {
        let result = LocalModelClient::new(
            "http://127.0.0.1:11434".to_string(),
            Vec::new(),
            PromptVersion::V2,
        );
        assert!(result.is_err());
    }
}
