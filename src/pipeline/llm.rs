//! Text completion: the backend seam, retries and provider resolution.
//!
//! Every pipeline stage talks to the model through [`LlmClient`], which wraps
//! a [`CompletionBackend`] with a per-call timeout, exponential backoff and
//! usage counters. The production backend is [`ProviderBackend`] over an
//! `edgequake_llm` provider; tests plug in a scripted backend that answers by
//! [`Stage`].
//!
//! ## Retry Strategy
//!
//! Rate limits and gateway errors are common when lessons are generated
//! concurrently. Attempt `n` (n ≥ 1) waits `retry_backoff_ms * 2^(n-1)`
//! before retrying: with the 2 s default and two retries the waits are
//! 2 s then 4 s.

use crate::config::CourseConfig;
use crate::error::Book2CourseError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Default model for named providers when none is configured.
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

/// Default model when only `OPENAI_API_KEY` is available.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";

/// Which pipeline stage a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Summary,
    Quality,
    Overview,
    Structure,
    Lesson,
    Quiz,
    Toc,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Summary => "section summary",
            Stage::Quality => "quality detection",
            Stage::Overview => "book overview",
            Stage::Structure => "course structure",
            Stage::Lesson => "lesson content",
            Stage::Quiz => "quiz",
            Stage::Toc => "table of contents",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prompt sent to the model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub stage: Stage,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl CompletionRequest {
    pub fn new(stage: Stage, prompt: impl Into<String>) -> Self {
        Self {
            stage,
            system: None,
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }
}

/// A model reply with token accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Anything that can answer a [`CompletionRequest`].
///
/// Errors are plain strings: they are logged, retried and finally folded into
/// [`Book2CourseError::LlmApiError`] by [`LlmClient`].
pub trait CompletionBackend: Send + Sync {
    fn complete<'a>(&'a self, request: &'a CompletionRequest)
        -> BoxFuture<'a, Result<Completion, String>>;
}

/// [`CompletionBackend`] over an `edgequake_llm` chat provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

impl CompletionBackend for ProviderBackend {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<Completion, String>> {
        Box::pin(async move {
            let mut messages = Vec::with_capacity(2);
            if let Some(ref system) = request.system {
                messages.push(ChatMessage::system(system.as_str()));
            }
            messages.push(ChatMessage::user(request.prompt.as_str()));

            let options = CompletionOptions {
                temperature: Some(request.temperature),
                max_tokens: Some(request.max_tokens),
                ..Default::default()
            };

            let response = self
                .provider
                .chat(&messages, Some(&options))
                .await
                .map_err(|e| e.to_string())?;

            Ok(Completion {
                content: response.content,
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            })
        })
    }
}

/// Token and call counters for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LlmUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A backend plus the retry policy from [`CourseConfig`].
pub struct LlmClient {
    backend: Arc<dyn CompletionBackend>,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
    calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &CourseConfig) -> Self {
        Self {
            backend,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs.max(1),
            calls: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    /// Resolve a backend from `config` and wrap it.
    pub async fn from_config(config: &CourseConfig) -> Result<Self, Book2CourseError> {
        let backend = resolve_backend(config).await?;
        Ok(Self::new(backend, config))
    }

    /// Send `request`, retrying failures and timeouts. Returns the reply text.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, Book2CourseError> {
        let stage = request.stage;
        let mut last_err = String::new();
        let mut timed_out = false;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    stage, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            self.calls.fetch_add(1, Ordering::Relaxed);
            let call = self.backend.complete(request);
            match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(reply)) => {
                    self.input_tokens
                        .fetch_add(reply.input_tokens, Ordering::Relaxed);
                    self.output_tokens
                        .fetch_add(reply.output_tokens, Ordering::Relaxed);
                    debug!(
                        "{}: {} input tokens, {} output tokens",
                        stage, reply.input_tokens, reply.output_tokens
                    );
                    return Ok(reply.content);
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed: {}", stage, attempt + 1, e);
                    last_err = e;
                    timed_out = false;
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        stage,
                        attempt + 1,
                        self.timeout_secs
                    );
                    timed_out = true;
                }
            }
        }

        if timed_out {
            Err(Book2CourseError::ApiTimeout {
                stage: stage.to_string(),
                secs: self.timeout_secs,
            })
        } else {
            Err(Book2CourseError::LlmApiError {
                stage: stage.to_string(),
                message: last_err,
            })
        }
    }

    pub fn usage(&self) -> LlmUsage {
        LlmUsage {
            calls: self.calls.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("timeout_secs", &self.timeout_secs)
            .field("usage", &self.usage())
            .finish()
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Book2CourseError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        Book2CourseError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the completion backend, from most-specific to least-specific:
///
/// 1. `config.backend`, used as-is.
/// 2. `config.provider`, wrapped in a [`ProviderBackend`].
/// 3. `config.provider_name` with `config.model` (or [`DEFAULT_MODEL`]).
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 5. OpenAI when `OPENAI_API_KEY` is set.
/// 6. `ProviderFactory::from_env` auto-detection.
pub async fn resolve_backend(
    config: &CourseConfig,
) -> Result<Arc<dyn CompletionBackend>, Book2CourseError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(ProviderBackend::new(provider)))
}

fn resolve_provider(config: &CourseConfig) -> Result<Arc<dyn LLMProvider>, Book2CourseError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Book2CourseError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENROUTER_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` calls, then answers "ok".
    struct Flaky {
        failures: usize,
        seen: AtomicUsize,
    }

    impl CompletionBackend for Flaky {
        fn complete<'a>(
            &'a self,
            _request: &'a CompletionRequest,
        ) -> BoxFuture<'a, Result<Completion, String>> {
            Box::pin(async move {
                let n = self.seen.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(format!("429 rate limited ({n})"))
                } else {
                    Ok(Completion {
                        content: "ok".into(),
                        input_tokens: 10,
                        output_tokens: 3,
                    })
                }
            })
        }
    }

    struct Slow;

    impl CompletionBackend for Slow {
        fn complete<'a>(
            &'a self,
            _request: &'a CompletionRequest,
        ) -> BoxFuture<'a, Result<Completion, String>> {
            Box::pin(async move {
                sleep(Duration::from_secs(30)).await;
                Ok(Completion::text("late"))
            })
        }
    }

    fn config(retries: u32) -> CourseConfig {
        CourseConfig::builder()
            .max_retries(retries)
            .retry_backoff_ms(0)
            .api_timeout_secs(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn retries_until_success_and_counts_usage() {
        let backend = Arc::new(Flaky {
            failures: 2,
            seen: AtomicUsize::new(0),
        });
        let client = LlmClient::new(backend, &config(2));
        let reply = client
            .complete(&CompletionRequest::new(Stage::Summary, "hi"))
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        let usage = client.usage();
        assert_eq!(usage.calls, 3);
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_stage_and_last_error() {
        let backend = Arc::new(Flaky {
            failures: 10,
            seen: AtomicUsize::new(0),
        });
        let client = LlmClient::new(backend, &config(1));
        let err = client
            .complete(&CompletionRequest::new(Stage::Structure, "hi"))
            .await
            .unwrap_err();
        match err {
            Book2CourseError::LlmApiError { stage, message } => {
                assert_eq!(stage, "course structure");
                assert!(message.contains("(1)"), "got: {message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.usage().calls, 2);
    }

    #[tokio::test]
    async fn timeout_maps_to_api_timeout() {
        let client = LlmClient::new(Arc::new(Slow), &config(0));
        let err = client
            .complete(&CompletionRequest::new(Stage::Lesson, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Book2CourseError::ApiTimeout { secs: 1, .. }));
    }

    #[tokio::test]
    async fn explicit_backend_wins_resolution() {
        let backend: Arc<dyn CompletionBackend> = Arc::new(Slow);
        let config = CourseConfig::builder()
            .backend(Arc::clone(&backend))
            .provider_name("definitely-not-a-provider")
            .build()
            .unwrap();
        let resolved = resolve_backend(&config).await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &backend));
    }

    #[test]
    fn request_builder_sets_fields() {
        let r = CompletionRequest::new(Stage::Toc, "p")
            .system("s")
            .temperature(0.2)
            .max_tokens(100);
        assert_eq!(r.system.as_deref(), Some("s"));
        assert_eq!(r.temperature, 0.2);
        assert_eq!(r.max_tokens, 100);
    }
}
