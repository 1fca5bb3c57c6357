use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{fingerprint, FingerprintCache, DEFAULT_CACHE_TTL};
use crate::errors::{RelayError, Result};
use crate::fault::{FaultInjector, NoFaults};
use crate::invoker::{Invocation, RemoteInvoker};
use crate::rate_limit::{RateLimiter, DEFAULT_MIN_INTERVAL};
use crate::retry::{RetryController, RetryPolicy, Sleeper};
use crate::sanitize::ResponseSanitizer;

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub cache_ttl: Duration,
    pub min_interval: Duration,
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
    pub key_includes_target: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            min_interval: DEFAULT_MIN_INTERVAL,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry: RetryPolicy::default(),
            key_includes_target: false,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry = self.retry.with_max_attempts(max_attempts);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Namespace cache keys by target, for dispatchers that talk to more
    /// than one agent.
    pub fn with_target_in_key(mut self, include: bool) -> Self {
        self.key_includes_target = include;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchRequest {
    pub raw_query: String,
    /// The exact prompt sent upstream; the cache key is derived from it.
    pub augmented_query: String,
    pub target_identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl DispatchRequest {
    pub fn plain(query: impl Into<String>, target_identity: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            augmented_query: query.clone(),
            raw_query: query,
            target_identity: target_identity.into(),
            session_id: None,
        }
    }

    pub fn augmented(
        raw_query: impl Into<String>,
        augmented_query: impl Into<String>,
        target_identity: impl Into<String>,
    ) -> Self {
        Self {
            raw_query: raw_query.into(),
            augmented_query: augmented_query.into(),
            target_identity: target_identity.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchResult {
    Success { body: String, cached: bool },
    Failure {
        error_message: String,
        #[serde(default)]
        cached: bool,
    },
    Degraded { body: String, note: String },
}

impl DispatchResult {
    /// Failures are never served from the cache.
    pub fn failure(error_message: impl Into<String>) -> Self {
        DispatchResult::Failure {
            error_message: error_message.into(),
            cached: false,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            DispatchResult::Success { body, .. } | DispatchResult::Degraded { body, .. } => {
                Some(body)
            }
            DispatchResult::Failure { .. } => None,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, DispatchResult::Success { cached: true, .. })
    }

    /// Collapses the result into the `{ body } | { error }` shape callers see.
    pub fn into_outcome(self) -> std::result::Result<String, String> {
        match self {
            DispatchResult::Success { body, .. } | DispatchResult::Degraded { body, .. } => {
                Ok(body)
            }
            DispatchResult::Failure { error_message, .. } => Err(error_message),
        }
    }
}

impl Display for DispatchResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DispatchResult::Success { cached: true, .. } => "cached",
            DispatchResult::Success { cached: false, .. } => "success",
            DispatchResult::Failure { .. } => "failure",
            DispatchResult::Degraded { .. } => "degraded",
        };
        f.write_str(label)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    config: DispatcherConfig,
    cache: Arc<FingerprintCache>,
    limiter: Arc<RateLimiter>,
    retry: RetryController,
    invoker: Arc<dyn RemoteInvoker>,
    sanitizer: ResponseSanitizer,
    faults: Arc<dyn FaultInjector>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, invoker: Arc<dyn RemoteInvoker>) -> Self {
        let cache = Arc::new(FingerprintCache::new(config.cache_ttl));
        let limiter = Arc::new(RateLimiter::new(config.min_interval));
        Self::with_components(config, invoker, cache, limiter)
    }

    /// Builds a dispatcher around an existing cache and limiter, so several
    /// dispatchers in one process can share pacing and deduplication.
    pub fn with_components(
        config: DispatcherConfig,
        invoker: Arc<dyn RemoteInvoker>,
        cache: Arc<FingerprintCache>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let retry = RetryController::new(config.retry.clone());
        Self {
            config,
            cache,
            limiter,
            retry,
            invoker,
            sanitizer: ResponseSanitizer::default(),
            faults: Arc::new(NoFaults),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: ResponseSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = RetryController::with_sleeper(self.config.retry.clone(), sleeper);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResult {
        self.dispatch_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Never fails: terminal errors come back as [`DispatchResult::Failure`].
    pub async fn dispatch_cancellable(
        &self,
        request: DispatchRequest,
        cancellation: &CancellationToken,
    ) -> DispatchResult {
        match self.try_dispatch(request, cancellation).await {
            Ok(result) => result,
            Err(err) => DispatchResult::failure(err.to_string()),
        }
    }

    /// Like [`Dispatcher::dispatch_cancellable`] but keeps the error kind of
    /// a terminal failure for callers that map kinds to their own fallbacks.
    #[instrument(skip_all, fields(target = %request.target_identity))]
    pub async fn try_dispatch(
        &self,
        request: DispatchRequest,
        cancellation: &CancellationToken,
    ) -> Result<DispatchResult> {
        if request.target_identity.trim().is_empty() {
            return Err(RelayError::Configuration(
                "target identity is required".to_string(),
            ));
        }

        let target = self
            .config
            .key_includes_target
            .then_some(request.target_identity.as_str());
        let key = fingerprint(&request.augmented_query, target);

        let now = Instant::now().into_std();
        self.cache.purge_expired(now);
        if let Some(entry) = self.cache.lookup(&key, now) {
            info!(key = %short_key(&key), "cache hit, skipping remote call");
            return Ok(DispatchResult::Success {
                body: entry.value,
                cached: true,
            });
        }
        debug!(key = %short_key(&key), "cache miss");

        let invocation = Invocation {
            target: request.target_identity,
            prompt: request.augmented_query,
            session_id: request.session_id,
        };
        let body = {
            let invocation = &invocation;
            let timeout = self.config.attempt_timeout;
            self.retry
                .execute(cancellation, move |attempt| async move {
                    self.limiter.wait_turn().await;
                    self.faults.before_attempt(attempt)?;
                    match tokio::time::timeout(timeout, self.invoker.invoke(invocation)).await {
                        Ok(result) => result,
                        Err(_) => Err(RelayError::Timeout(timeout)),
                    }
                })
                .await?
        };

        let sanitized = self.sanitizer.sanitize(&body);
        self.cache
            .store(key, sanitized.body.clone(), Instant::now().into_std());
        match sanitized.degraded {
            Some(note) => {
                warn!(note = %note, "remote response degraded to fallback");
                Ok(DispatchResult::Degraded {
                    body: sanitized.body,
                    note,
                })
            }
            None => {
                info!("remote call succeeded");
                Ok(DispatchResult::Success {
                    body: sanitized.body,
                    cached: false,
                })
            }
        }
    }
}

fn short_key(key: &str) -> &str {
    &key[..key.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::RandomFaults;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const TARGET: &str = "arn:aws:bedrock-agentcore:us-east-1:123:runtime/primary";

    /// Replays scripted responses; once the script runs out it keeps
    /// returning the fallback.
    struct StubInvoker {
        script: Mutex<VecDeque<Result<String>>>,
        fallback: fn() -> Result<String>,
        delay: Option<Duration>,
        calls: Mutex<Vec<(Instant, Invocation)>>,
    }

    impl StubInvoker {
        fn new(script: Vec<Result<String>>, fallback: fn() -> Result<String>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                delay: None,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn answering(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::from(vec![Ok(body.to_string())])),
                fallback: || Ok(r#"{"output":"again"}"#.to_string()),
                delay: None,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl RemoteInvoker for StubInvoker {
        async fn invoke(&self, invocation: &Invocation) -> Result<String> {
            self.calls.lock().push((Instant::now(), invocation.clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| (self.fallback)())
        }
    }

    fn dispatcher(invoker: Arc<StubInvoker>) -> Dispatcher {
        Dispatcher::new(DispatcherConfig::new(), invoker)
    }

    #[tokio::test(start_paused = true)]
    async fn second_identical_dispatch_is_served_from_cache() {
        let invoker = StubInvoker::answering(r#"{"output":"Feed 2 cups twice daily"}"#);
        let dispatcher = dispatcher(invoker.clone());
        let request = DispatchRequest::plain("What should I feed a 20lb dog?", TARGET);

        let first = dispatcher.dispatch(request.clone()).await;
        assert_eq!(
            first,
            DispatchResult::Success {
                body: r#"{"output":"Feed 2 cups twice daily"}"#.to_string(),
                cached: false,
            }
        );

        tokio::time::advance(Duration::from_secs(120)).await;
        let second = dispatcher.dispatch(request).await;
        assert_eq!(
            second,
            DispatchResult::Success {
                body: r#"{"output":"Feed 2 cups twice daily"}"#.to_string(),
                cached: true,
            }
        );
        assert_eq!(invoker.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_triggers_fresh_call() {
        let invoker = StubInvoker::answering(r#"{"output":"first"}"#);
        let dispatcher = dispatcher(invoker.clone());
        let request = DispatchRequest::plain("How much should my cat eat?", TARGET);

        dispatcher.dispatch(request.clone()).await;
        tokio::time::advance(DEFAULT_CACHE_TTL + Duration::from_secs(1)).await;
        let result = dispatcher.dispatch(request).await;

        assert_eq!(result.body(), Some(r#"{"output":"again"}"#));
        assert!(!result.is_cached());
        assert_eq!(invoker.call_count(), 2);
        assert_eq!(dispatcher.cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn augmentation_changes_the_fingerprint() {
        let invoker = StubInvoker::answering(r#"{"output":"a"}"#);
        let dispatcher = dispatcher(invoker.clone());

        dispatcher
            .dispatch(DispatchRequest::plain("Best food for a puppy?", TARGET))
            .await;
        let annotated = dispatcher
            .dispatch(DispatchRequest::augmented(
                "Best food for a puppy?",
                "Best food for a puppy?\n\nNote: Our nutrition specialist agent ARN is arn:n",
                TARGET,
            ))
            .await;

        assert!(!annotated.is_cached());
        assert_eq!(invoker.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_calls_are_spaced_by_min_interval() {
        let invoker = StubInvoker::new(Vec::new(), || Ok(r#"{"output":"x"}"#.to_string()));
        let dispatcher = dispatcher(invoker.clone());

        for idx in 0..4 {
            dispatcher
                .dispatch(DispatchRequest::plain(format!("question {idx}"), TARGET))
                .await;
        }

        let stamps: Vec<Instant> = invoker.calls.lock().iter().map(|(at, _)| *at).collect();
        assert_eq!(stamps.len(), 4);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= DEFAULT_MIN_INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_failure_and_are_not_cached() {
        let invoker = StubInvoker::new(Vec::new(), || {
            Err(RelayError::Network("connection refused".to_string()))
        });
        let dispatcher = dispatcher(invoker.clone());
        let request = DispatchRequest::plain("Can dogs eat grapes?", TARGET);

        let result = dispatcher.dispatch(request.clone()).await;
        match &result {
            DispatchResult::Failure { error_message, cached } => {
                assert!(error_message.contains("connection refused"));
                assert!(!cached);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(invoker.call_count(), 3);
        assert!(dispatcher.cache().is_empty());

        dispatcher.dispatch(request).await;
        assert_eq!(invoker.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_recovers_within_budget() {
        let invoker = StubInvoker::new(
            vec![
                Err(RelayError::Throttled("busy".to_string())),
                Ok(r#"{"output":"recovered"}"#.to_string()),
            ],
            || Ok(String::new()),
        );
        let dispatcher = dispatcher(invoker.clone());

        let started = Instant::now();
        let result = dispatcher
            .dispatch(DispatchRequest::plain("Are onions safe?", TARGET))
            .await;

        assert_eq!(result.body(), Some(r#"{"output":"recovered"}"#));
        assert_eq!(invoker.call_count(), 2);
        assert!(Instant::now() - started >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_body_degrades_and_fallback_is_cached() {
        let invoker = StubInvoker::new(Vec::new(), || Ok(r#"{"foo": 1}"#.to_string()));
        let dispatcher = dispatcher(invoker.clone());
        let request = DispatchRequest::plain("Which supplements for an old cat?", TARGET);

        let result = dispatcher.dispatch(request.clone()).await;
        match &result {
            DispatchResult::Degraded { body, note } => {
                assert!(body.contains(crate::sanitize::FALLBACK_MESSAGE));
                assert!(note.contains("output"));
            }
            other => panic!("expected degraded, got {other:?}"),
        }
        let repeat = dispatcher.dispatch(request).await;
        assert!(repeat.is_cached());
        assert_eq!(repeat.body(), result.body());
        assert_eq!(invoker.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_target_fails_without_calling() {
        let invoker = StubInvoker::answering(r#"{"output":"x"}"#);
        let dispatcher = dispatcher(invoker.clone());

        let result = dispatcher.dispatch(DispatchRequest::plain("hello", "")).await;
        match result {
            DispatchResult::Failure { error_message, .. } => {
                assert!(error_message.contains("configuration error"))
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let invoker = Arc::new(StubInvoker {
            script: Mutex::new(VecDeque::new()),
            fallback: || Ok(r#"{"output":"late"}"#.to_string()),
            delay: Some(Duration::from_secs(60)),
            calls: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(
            DispatcherConfig::new()
                .with_attempt_timeout(Duration::from_secs(2))
                .with_max_attempts(2),
            invoker.clone(),
        );

        let result = dispatcher
            .dispatch(DispatchRequest::plain("slow question", TARGET))
            .await;
        match result {
            DispatchResult::Failure { error_message, .. } => {
                assert!(error_message.contains("timed out"))
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
        assert_eq!(invoker.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_dispatch_issues_no_call() {
        let invoker = StubInvoker::answering(r#"{"output":"x"}"#);
        let dispatcher = dispatcher(invoker.clone());
        let token = CancellationToken::new();
        token.cancel();

        let result = dispatcher
            .dispatch_cancellable(DispatchRequest::plain("hello", TARGET), &token)
            .await;
        assert_eq!(result, DispatchResult::failure("dispatch cancelled"));
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_faults_replace_the_remote_call() {
        let invoker = StubInvoker::answering(r#"{"output":"x"}"#);
        let dispatcher =
            dispatcher(invoker.clone()).with_faults(Arc::new(RandomFaults::seeded(1.0, 42)));

        let result = dispatcher
            .dispatch(DispatchRequest::plain("hello", TARGET))
            .await;
        assert!(matches!(result, DispatchResult::Failure { .. }));
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_and_prompt_reach_the_invoker() {
        let invoker = StubInvoker::answering(r#"{"output":"x"}"#);
        let dispatcher = dispatcher(invoker.clone());

        dispatcher
            .dispatch(
                DispatchRequest::augmented("raw", "raw + hint", TARGET)
                    .with_session(Some("clinic-session-9".to_string())),
            )
            .await;

        let calls = invoker.calls.lock();
        let (_, invocation) = &calls[0];
        assert_eq!(invocation.prompt, "raw + hint");
        assert_eq!(invocation.target, TARGET);
        assert_eq!(invocation.session_id.as_deref(), Some("clinic-session-9"));
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let value = serde_json::to_value(DispatchResult::Success {
            body: "b".to_string(),
            cached: true,
        })
        .unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["cached"], true);
        let failure = serde_json::to_value(DispatchResult::failure("e")).unwrap();
        assert_eq!(failure["status"], "failure");
        assert_eq!(failure["cached"], false);
        assert_eq!(
            DispatchResult::failure("e").into_outcome(),
            Err("e".to_string())
        );
    }
}
