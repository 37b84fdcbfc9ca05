use std::time::Duration;

use lineage_core::{LineageError, LlmConfig};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::analyzer::{Analyzer, HeuristicAnalyzer};
use crate::prompt::{build_analysis_prompt, build_system_prompt, parse_analysis_response};
use crate::types::{AnalysisMode, AnalysisRequest, AnalysisResult};

/// A message in a chat conversation with the model.
///
/// # Examples
///
/// ```
/// use lineage_analysis::llm::{ChatMessage, Role};
///
/// let turn = ChatMessage {
///     role: Role::User,
///     content: "Summarize this change".into(),
/// };
/// assert_eq!(turn.role, Role::User);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Who is speaking.
    pub role: Role,
    /// Message text.
    pub content: String,
}

/// Speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions framing the conversation.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider exposing `/v1/chat/completions`: Ollama,
/// OpenAI, vLLM, LiteLLM.
///
/// # Examples
///
/// ```
/// use lineage_core::LlmConfig;
/// use lineage_analysis::llm::LlmClient;
///
/// let client = LlmClient::new(&LlmConfig::default()).unwrap();
/// assert_eq!(client.model(), "mistral:latest");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Analyzer`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, LineageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LineageError::Analyzer(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Model name from the configuration.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Provider name from the configuration.
    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    /// Send the conversation and return the first choice's content.
    ///
    /// Asks for a JSON object at temperature 0.1. The key, when configured,
    /// goes out as a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Analyzer`] when the request fails, the provider
    /// answers with a non-success status, or the body has no choices.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LineageError> {
        let endpoint = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let payload = CompletionRequest {
            model: &self.config.model,
            messages: &messages,
            temperature: 0.1,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut builder = self.client.post(&endpoint).json(&payload);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LineageError::Analyzer(format!("request to {endpoint} failed: {e}")))?;

        if !response.status().is_success() {
            let code = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(LineageError::Analyzer(format!(
                "{} returned {code}: {detail}",
                self.config.provider
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LineageError::Analyzer(format!("unreadable completion: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LineageError::Analyzer("completion had no choices".into()))
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// [`Analyzer`] backed by a chat-completions model.
///
/// Brief and deep modes call the model; pattern mode never leaves the
/// process and is answered by [`HeuristicAnalyzer`]. The analyzer owns a
/// small tokio runtime so it can be called from plain worker threads.
pub struct LlmAnalyzer {
    client: LlmClient,
    runtime: Runtime,
}

impl LlmAnalyzer {
    /// Build the client and its runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Analyzer`] if either cannot be created.
    pub fn new(config: &LlmConfig) -> Result<Self, LineageError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| LineageError::Analyzer(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            client: LlmClient::new(config)?,
            runtime,
        })
    }
}

impl Analyzer for LlmAnalyzer {
    fn name(&self) -> &str {
        self.client.provider()
    }

    fn analyze(
        &self,
        request: &AnalysisRequest,
        mode: AnalysisMode,
        status: &dyn Fn(&str),
    ) -> Result<AnalysisResult, LineageError> {
        if mode == AnalysisMode::Pattern {
            return HeuristicAnalyzer.analyze(request, mode, status);
        }

        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: build_system_prompt(),
            },
            ChatMessage {
                role: Role::User,
                content: build_analysis_prompt(request, mode),
            },
        ];

        status(&format!("asking {}", self.client.model()));
        debug!(model = self.client.model(), %mode, "sending analysis request");
        let response = self.runtime.block_on(self.client.chat(messages))?;

        status("parsing response");
        Ok(parse_analysis_response(&response, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_reports_configured_names() {
        let client = LlmClient::new(&LlmConfig {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            ..LlmConfig::default()
        })
        .unwrap();
        assert_eq!(client.provider(), "openai");
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn request_body_shape() {
        let messages = [ChatMessage {
            role: Role::User,
            content: "diff".into(),
        }];
        let body = serde_json::to_value(CompletionRequest {
            model: "m",
            messages: &messages,
            temperature: 0.1,
            response_format: ResponseFormat { kind: "json_object" },
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn completion_without_choices_decodes_empty() {
        let parsed: CompletionResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(parsed.choices.is_empty());
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"{}"}}]}"#)
                .unwrap();
        assert_eq!(parsed.choices[0].message.content, "{}");
    }

    #[test]
    fn pattern_mode_stays_local() {
        // nothing listens here; pattern mode must not try
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..LlmConfig::default()
        };
        let analyzer = LlmAnalyzer::new(&config).unwrap();
        let result = analyzer
            .analyze(
                &AnalysisRequest::new("a", "b", ""),
                AnalysisMode::Pattern,
                &|_: &str| {},
            )
            .unwrap();
        assert_eq!(result.provider, "heuristic");
    }

    #[test]
    fn unreachable_endpoint_is_analyzer_error() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let analyzer = LlmAnalyzer::new(&config).unwrap();
        let err = analyzer
            .analyze(
                &AnalysisRequest::new("a", "b", ""),
                AnalysisMode::Brief,
                &|_: &str| {},
            )
            .unwrap_err();
        assert!(matches!(err, LineageError::Analyzer(_)));
    }
}
