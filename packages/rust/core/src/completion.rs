//! Completion service seam and the OpenAI-compatible HTTP client behind it.
//!
//! Capability units never talk to an LLM directly: they hand a
//! [`CompletionRequest`] to a [`CompletionService`] and get back either text or
//! a batch of tool calls. [`OpenRouterClient`] implements the trait against any
//! `/chat/completions` endpoint with function calling.

use async_trait::async_trait;
use dossier_shared::{DossierError, Message, MessageKind, OpenRouterConfig, Result, StageId, resolve_secret};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

/// Default timeout in seconds for completion requests.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Request / response model
// ---------------------------------------------------------------------------

/// Function-calling description of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// One tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A tool call paired with the output it produced during the current turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExchange {
    pub call: ToolInvocation,
    pub output: Value,
}

/// Everything the model gets for one stage turn.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub stage: &'a StageId,
    pub instructions: &'a str,
    /// The stage's filtered view of the transcript.
    pub history: &'a [Message],
    /// Tool calls already executed in this turn (used when reflecting).
    pub exchanges: &'a [ToolExchange],
    pub tools: &'a [ToolSpec],
}

/// What the model answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text {
        content: String,
        thought: Option<String>,
    },
    ToolCalls {
        calls: Vec<ToolInvocation>,
        thought: Option<String>,
    },
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            thought: None,
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCalls {
            calls: vec![ToolInvocation {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
            thought: None,
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion>;
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

/// Chat completions client for OpenRouter or any OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DossierError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
        })
    }

    /// Build a client from the `[openrouter]` config section.
    pub fn from_config(config: &OpenRouterConfig) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env)?;
        Ok(Self::new(api_key, &config.default_model)?.with_base_url(&config.base_url))
    }

    /// Set a custom base URL (proxies, local OpenAI-compatible servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": chat_messages(request),
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

/// Render the stage's view as chat messages. Own text becomes `assistant`,
/// everyone else's text becomes `user`; tool traffic from other stages is
/// already summarized in their text messages and is left out.
fn chat_messages(request: &CompletionRequest<'_>) -> Vec<Value> {
    let mut messages = vec![json!({"role": "system", "content": request.instructions})];

    for message in request.history.iter().filter(|m| m.kind == MessageKind::Text) {
        let content = message.content.to_text();
        if &message.source == request.stage {
            messages.push(json!({"role": "assistant", "content": content}));
        } else {
            messages.push(json!({
                "role": "user",
                "name": message.source.as_str(),
                "content": content,
            }));
        }
    }

    if !request.exchanges.is_empty() {
        let calls: Vec<Value> = request
            .exchanges
            .iter()
            .map(|ex| {
                json!({
                    "id": ex.call.id,
                    "type": "function",
                    "function": {
                        "name": ex.call.name,
                        "arguments": ex.call.arguments.to_string(),
                    }
                })
            })
            .collect();
        messages.push(json!({"role": "assistant", "content": null, "tool_calls": calls}));

        for ex in request.exchanges {
            let output = match &ex.output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            messages.push(json!({
                "role": "tool",
                "tool_call_id": ex.call.id,
                "content": output,
            }));
        }
    }

    messages
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[async_trait]
impl CompletionService for OpenRouterClient {
    #[instrument(skip_all, fields(stage = %request.stage, model = %self.model))]
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| DossierError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DossierError::Network(format!(
                "completion API returned HTTP {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            DossierError::Network(format!("failed to parse completion response: {e}"))
        })?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DossierError::validation("completion response had no choices"))?
            .message;
        let thought = message.reasoning.filter(|r| !r.trim().is_empty());

        match message.tool_calls {
            Some(calls) if !calls.is_empty() => {
                let calls = calls
                    .into_iter()
                    .map(|call| {
                        let arguments = if call.function.arguments.trim().is_empty() {
                            json!({})
                        } else {
                            serde_json::from_str(&call.function.arguments).map_err(|e| {
                                DossierError::validation(format!(
                                    "tool `{}` arguments are not valid JSON: {e}",
                                    call.function.name
                                ))
                            })?
                        };
                        Ok(ToolInvocation {
                            id: call.id,
                            name: call.function.name,
                            arguments,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                debug!(calls = calls.len(), "model requested tool calls");
                Ok(Completion::ToolCalls { calls, thought })
            }
            _ => Ok(Completion::Text {
                content: message.content.unwrap_or_default(),
                thought,
            }),
        }
    }
}
