//! Message model and the provider seam shared by every reasoning backend.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// One turn sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Text of the turn; for multi-part turns, the text parts joined.
    pub content: String,
    /// Structured content parts. Empty means the message is plain text only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_parts: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), content_parts: vec![] }
    }

    pub fn from_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        let content = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect();
        Self { role, content, content_parts: parts }
    }

    pub fn has_image(&self) -> bool {
        self.content_parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Part of a multi-part turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// `url` is either an http(s) URL or a `data:` URI.
    ImageUrl { url: String },
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub stop_reason: StopReason,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stop_reason: StopReason::EndTurn,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("all providers exhausted")]
    AllProvidersExhausted,
}

/// A reasoning backend. Implementations must not retry internally; fallback
/// is composed with [`LlmRouter`].
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>>;
}

/// Answers every request with the same text.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub response: String,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into() }
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        let response = CompletionResponse::text(self.response.clone());
        Box::pin(std::future::ready(Ok(response)))
    }
}

type CallHook = Box<dyn Fn(usize, &CompletionRequest) + Send + Sync>;

/// Replays canned results in order and records every request. Once the
/// script runs dry each call fails with `Unavailable`.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    hook: Option<CallHook>,
}

impl ScriptedProvider {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())))
    }

    pub fn from_results(results: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            hook: None,
        }
    }

    /// Run `hook(call_index, request)` before each call is answered.
    /// Call indices start at 0.
    pub fn with_hook(mut self, hook: impl Fn(usize, &CompletionRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        let index = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(request.clone());
            requests.len() - 1
        };
        if let Some(hook) = &self.hook {
            hook(index, &request);
        }
        let next = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        Box::pin(async move {
            match next {
                Some(Ok(content)) => Ok(CompletionResponse::text(content)),
                Some(Err(e)) => Err(e),
                None => Err(LlmError::Unavailable("script exhausted".into())),
            }
        })
    }
}

/// Ordered fallback over several providers.
///
/// A provider that fails `max_failures` times in a row is skipped for
/// `cooldown`. After that it gets one attempt: success clears its failures,
/// another failure skips it for a fresh cooldown.
pub struct LlmRouter {
    backends: Vec<Backend>,
    max_failures: u32,
    cooldown: Duration,
}

struct Backend {
    provider: Box<dyn LlmProvider>,
    failures: AtomicU32,
    skipped_until: Mutex<Option<Instant>>,
}

impl Backend {
    fn is_ready(&self, max_failures: u32, now: Instant) -> bool {
        if self.failures.load(Ordering::Relaxed) < max_failures {
            return true;
        }
        self.skipped_until
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none_or(|until| now >= until)
    }

    fn succeeded(&self) {
        self.failures.store(0, Ordering::Relaxed);
        *self.skipped_until.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Record a failure; returns the consecutive count.
    fn failed(&self, max_failures: u32, cooldown: Duration) -> u32 {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= max_failures {
            *self.skipped_until.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + cooldown);
        }
        failures
    }
}

const MAX_CONSECUTIVE_FAILURES: u32 = 3;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

impl LlmRouter {
    pub fn new(providers: Vec<Box<dyn LlmProvider>>) -> Self {
        let backends = providers
            .into_iter()
            .map(|provider| Backend {
                provider,
                failures: AtomicU32::new(0),
                skipped_until: Mutex::new(None),
            })
            .collect();
        Self { backends, max_failures: MAX_CONSECUTIVE_FAILURES, cooldown: DEFAULT_COOLDOWN }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// True if some provider would be tried right now.
    pub fn is_available(&self) -> bool {
        let now = Instant::now();
        self.backends.iter().any(|b| b.is_ready(self.max_failures, now))
    }

    async fn route(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let now = Instant::now();
        for backend in self.backends.iter().filter(|b| b.is_ready(self.max_failures, now)) {
            let err = match backend.provider.complete(request.clone()).await {
                Ok(response) => {
                    backend.succeeded();
                    return Ok(response);
                }
                Err(err) => err,
            };
            let failures = backend.failed(self.max_failures, self.cooldown);
            tracing::warn!(provider = backend.provider.name(), failures, error = %err, "reasoning backend failed");
        }
        Err(LlmError::AllProvidersExhausted)
    }
}

impl LlmProvider for LlmRouter {
    fn name(&self) -> &str {
        "router"
    }

    fn complete(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>> {
        Box::pin(self.route(request))
    }
}
