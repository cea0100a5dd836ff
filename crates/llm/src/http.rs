//! Vision-capable HTTP transport for the reasoning backend.
//!
//! Two wire formats: OpenAI-style chat completions (also spoken by Gemini,
//! DeepSeek and most proxies) and Anthropic Messages. Both carry image parts,
//! so one `HttpProvider` type serves the quality model and the vision model.

use crate::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, ContentPart, LlmError, LlmProvider, Role,
    StopReason,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Backend family, inferred from the model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    /// Anything else is assumed to speak the OpenAI format.
    Unknown,
}

/// Model-name prefixes, checked in order.
const MODEL_PREFIXES: &[(&str, ProviderKind)] = &[
    ("gpt-", ProviderKind::OpenAi),
    ("o1-", ProviderKind::OpenAi),
    ("o3-", ProviderKind::OpenAi),
    ("o4-", ProviderKind::OpenAi),
    ("claude-", ProviderKind::Anthropic),
    ("gemini-", ProviderKind::Google),
    ("deepseek-", ProviderKind::DeepSeek),
];

impl ProviderKind {
    pub fn from_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        MODEL_PREFIXES
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::DeepSeek => "deepseek",
            Self::Unknown => "openai-compatible",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Unknown => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com",
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::Anthropic => "/v1/messages",
            _ => "/chat/completions",
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

// ── OpenAI-compatible wire format ──

#[derive(Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: OaiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OaiContent {
    Text(String),
    Parts(Vec<OaiPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OaiPart {
    Text { text: String },
    ImageUrl { image_url: OaiImageUrl },
}

#[derive(Serialize)]
struct OaiImageUrl {
    url: String,
}

impl From<&ChatMessage> for OaiMessage {
    fn from(m: &ChatMessage) -> Self {
        let content = match m.content_parts.as_slice() {
            [] => OaiContent::Text(m.content.clone()),
            parts => OaiContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => OaiPart::Text { text: text.clone() },
                        ContentPart::ImageUrl { url } => OaiPart::ImageUrl {
                            image_url: OaiImageUrl { url: url.clone() },
                        },
                    })
                    .collect(),
            ),
        };
        Self { role: role_name(m.role), content }
    }
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiReply,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OaiReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<OaiResponse> for CompletionResponse {
    fn from(api: OaiResponse) -> Self {
        let (content, finish) = api
            .choices
            .into_iter()
            .next()
            .map(|c| (c.message.content.unwrap_or_default(), c.finish_reason))
            .unwrap_or_default();
        let usage = api.usage.map_or((0, 0), |u| (u.prompt_tokens, u.completion_tokens));
        Self {
            content,
            stop_reason: if finish.as_deref() == Some("length") { StopReason::MaxTokens } else { StopReason::EndTurn },
            input_tokens: usage.0,
            output_tokens: usage.1,
        }
    }
}

// ── Anthropic Messages wire format ──

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

impl AnthropicImageSource {
    /// Data URIs are sent inline; anything else by reference.
    fn from_url(url: &str) -> Self {
        match url.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
            Some((media_type, data)) => Self::Base64 {
                media_type: media_type.to_owned(),
                data: data.to_owned(),
            },
            None => Self::Url { url: url.to_owned() },
        }
    }
}

impl AnthropicMessage {
    fn from_chat(m: &ChatMessage) -> Self {
        let content = if m.content_parts.is_empty() {
            vec![AnthropicBlock::Text { text: m.content.clone() }]
        } else {
            m.content_parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => AnthropicBlock::Text { text: text.clone() },
                    ContentPart::ImageUrl { url } => AnthropicBlock::Image {
                        source: AnthropicImageSource::from_url(url),
                    },
                })
                .collect()
        };
        Self { role: role_name(m.role), content }
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicReplyBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicReplyBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl From<AnthropicResponse> for CompletionResponse {
    fn from(api: AnthropicResponse) -> Self {
        let content = api
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicReplyBlock::Text { text } => Some(text),
                AnthropicReplyBlock::Other => None,
            })
            .collect::<String>();
        let usage = api.usage.map_or((0, 0), |u| (u.input_tokens, u.output_tokens));
        Self {
            content,
            stop_reason: if api.stop_reason.as_deref() == Some("max_tokens") {
                StopReason::MaxTokens
            } else {
                StopReason::EndTurn
            },
            input_tokens: usage.0,
            output_tokens: usage.1,
        }
    }
}

// ── Provider ──

/// One model behind one HTTP endpoint.
pub struct HttpProvider {
    kind: ProviderKind,
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// `base_url` overrides the family default (proxies, local gateways).
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let kind = ProviderKind::from_model(&model);
        let base_url = base_url
            .as_deref()
            .unwrap_or(kind.default_base_url())
            .trim_end_matches('/')
            .to_owned();
        Self { kind, model, client: reqwest::Client::new(), base_url, api_key }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.kind.path())
    }

    fn openai_body(&self, request: &CompletionRequest) -> OaiRequest {
        OaiRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(OaiMessage::from).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    /// System turns are hoisted to the top-level `system` field, joined in
    /// order; the rest keep their position.
    fn anthropic_body(&self, request: &CompletionRequest) -> AnthropicRequest {
        let (system, rest): (Vec<&ChatMessage>, Vec<&ChatMessage>) =
            request.messages.iter().partition(|m| m.role == Role::System);
        let system = system.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n\n");
        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system: (!system.is_empty()).then_some(system),
            messages: rest.into_iter().map(AnthropicMessage::from_chat).collect(),
            temperature: request.temperature,
        }
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, body: &B) -> Result<R, LlmError> {
        let builder = self.client.post(self.endpoint()).json(body);
        let builder = match self.kind {
            ProviderKind::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            _ => builder.bearer_auth(&self.api_key),
        };
        let resp = builder.send().await.map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("{status}: {text}")));
        }
        resp.json().await.map_err(|e| LlmError::RequestFailed(e.to_string()))
    }

    async fn complete_http(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tracing::debug!(
            provider = self.kind.label(),
            model = %self.model,
            messages = request.messages.len(),
            vision = request.messages.iter().any(ChatMessage::has_image),
            "llm request"
        );
        let response: CompletionResponse = match self.kind {
            ProviderKind::Anthropic => {
                self.post::<_, AnthropicResponse>(&self.anthropic_body(&request)).await?.into()
            }
            _ => self.post::<_, OaiResponse>(&self.openai_body(&request)).await?.into(),
        };
        tracing::debug!(
            provider = self.kind.label(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "llm response"
        );
        Ok(response)
    }
}

impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        self.kind.label()
    }

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        Box::pin(self.complete_http(request))
    }
}

// ── Environment ──

/// Build a provider from `<model_var>`, `MILTON_LLM_API_KEY` and the optional
/// `MILTON_LLM_BASE_URL`. `None` when the model or key is missing.
pub fn from_env_with_model_var(model_var: &str) -> Option<HttpProvider> {
    let model = std::env::var(model_var).ok().filter(|m| !m.is_empty())?;
    let api_key = std::env::var("MILTON_LLM_API_KEY").ok()?;
    Some(HttpProvider::new(model, api_key, std::env::var("MILTON_LLM_BASE_URL").ok()))
}

/// Quality model: `MILTON_LLM_MODEL`.
pub fn from_env() -> Option<HttpProvider> {
    from_env_with_model_var("MILTON_LLM_MODEL")
}

/// Vision model: `MILTON_VISION_MODEL`.
pub fn vision_from_env() -> Option<HttpProvider> {
    from_env_with_model_var("MILTON_VISION_MODEL")
}

/// Tried after the quality model fails: `MILTON_FALLBACK_MODEL`.
pub fn fallback_from_env() -> Option<HttpProvider> {
    from_env_with_model_var("MILTON_FALLBACK_MODEL")
}
