//! Challenge-token acquisition.
//!
//! Fetches the vendor's challenge script, keeps the raw body in a short-lived
//! cache, wraps it in the harness with the current fingerprint values, and
//! runs the result through a [`ScriptExecutor`] to obtain a one-shot token.
//!
//! Cache discipline: readers share the lock; storing a fresh body and
//! clearing are exclusive, and body and timestamp always change together.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::challenges::core::{UpstreamHttpClient, convert_headers};
use crate::challenges::harness::{HarnessInputs, HarnessTemplate};
use crate::external_deps::interpreters::{InterpreterError, ScriptExecutor};
use crate::modules::events::{ChallengeEvent, EventDispatcher, FallbackEvent, RelayEvent};
use crate::modules::spoofing::FingerprintGenerator;

/// Failure states of a token acquisition.
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("failed to fetch challenge script{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Fetch { status: Option<u16>, message: String },
    #[error("failed to execute challenge script: {0}")]
    Execution(#[from] InterpreterError),
    #[error("header conversion failed: {0}")]
    InvalidHeader(String),
    #[error("token acquisition cancelled")]
    Cancelled,
}

/// Fixed inputs of the provider.
#[derive(Debug, Clone)]
pub struct ChallengeSettings {
    pub script_url: Url,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
    /// Pins the harness user agent; the live fingerprint is used otherwise.
    pub user_agent: Option<String>,
    pub cache_ttl: Duration,
}

#[derive(Debug, Default)]
struct ScriptCache {
    body: String,
    fetched_at: Option<Instant>,
}

impl ScriptCache {
    fn usable(&self) -> Option<&str> {
        (!self.body.is_empty()).then_some(self.body.as_str())
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        !self.body.is_empty() && self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }

    fn store(&mut self, body: String) {
        self.body = body;
        self.fetched_at = Some(Instant::now());
    }

    fn clear(&mut self) {
        self.body.clear();
        self.fetched_at = None;
    }
}

/// Produces challenge tokens for chat requests.
pub struct ChallengeTokenProvider {
    client: Arc<dyn UpstreamHttpClient>,
    executor: Arc<dyn ScriptExecutor>,
    fingerprint: Arc<FingerprintGenerator>,
    harness: HarnessTemplate,
    settings: ChallengeSettings,
    cache: RwLock<ScriptCache>,
    events: Arc<EventDispatcher>,
}

impl ChallengeTokenProvider {
    pub fn new(
        client: Arc<dyn UpstreamHttpClient>,
        executor: Arc<dyn ScriptExecutor>,
        fingerprint: Arc<FingerprintGenerator>,
        settings: ChallengeSettings,
    ) -> Self {
        Self {
            client,
            executor,
            fingerprint,
            harness: HarnessTemplate::default(),
            settings,
            cache: RwLock::new(ScriptCache::default()),
            events: Arc::new(EventDispatcher::new()),
        }
    }

    pub fn with_harness(mut self, harness: HarnessTemplate) -> Self {
        self.harness = harness;
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &ChallengeSettings {
        &self.settings
    }

    /// Runs the full check-cache / fetch / compile / execute cycle.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<String, ChallengeError> {
        if cancel.is_cancelled() {
            return Err(ChallengeError::Cancelled);
        }

        let (script, cached) = self.script_body(cancel).await?;

        let program = self.compile(&script);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChallengeError::Cancelled),
            outcome = self.executor.execute(&program) => outcome,
        };

        let token = match outcome {
            Ok(token) => token.trim().to_string(),
            Err(err) => {
                // Tokens are one-shot; never retry against a script that just failed.
                self.clear_cache();
                return Err(ChallengeError::Execution(err));
            }
        };

        if token.is_empty() {
            self.clear_cache();
            return Err(ChallengeError::Execution(InterpreterError::EmptyOutput));
        }

        self.events.dispatch(RelayEvent::ChallengeFetched(ChallengeEvent {
            script_url: self.settings.script_url.to_string(),
            cached,
            token_len: token.len(),
            timestamp: chrono::Utc::now(),
        }));

        Ok(token)
    }

    /// Drops the cached script so the next acquisition re-fetches it.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .expect("script cache lock poisoned")
            .clear();
    }

    /// True while a cached body younger than the TTL exists.
    pub fn has_fresh_script(&self) -> bool {
        self.cache
            .read()
            .expect("script cache lock poisoned")
            .is_fresh(self.settings.cache_ttl)
    }

    async fn script_body(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(String, bool), ChallengeError> {
        let stale = {
            let guard = self.cache.read().expect("script cache lock poisoned");
            if guard.is_fresh(self.settings.cache_ttl) {
                return Ok((guard.body.clone(), true));
            }
            guard.usable().map(str::to_owned)
        };

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChallengeError::Cancelled),
            fetched = self.fetch_script() => fetched,
        };

        match fetched {
            Ok(body) => {
                self.cache
                    .write()
                    .expect("script cache lock poisoned")
                    .store(body.clone());
                Ok((body, false))
            }
            Err(err @ ChallengeError::InvalidHeader(_)) => Err(err),
            Err(err) => match stale {
                Some(body) => {
                    self.events.dispatch(RelayEvent::ChallengeFallback(FallbackEvent {
                        script_url: self.settings.script_url.to_string(),
                        reason: err.to_string(),
                        timestamp: chrono::Utc::now(),
                    }));
                    Ok((body, true))
                }
                None => {
                    self.clear_cache();
                    Err(err)
                }
            },
        }
    }

    async fn fetch_script(&self) -> Result<String, ChallengeError> {
        let headers = convert_headers(&self.fingerprint.challenge_headers())
            .map_err(|err| ChallengeError::InvalidHeader(err.to_string()))?;

        let response = self
            .client
            .get(&self.settings.script_url, &headers)
            .await
            .map_err(|err| ChallengeError::Fetch {
                status: None,
                message: err.to_string(),
            })?;

        if !response.is_ok() {
            return Err(ChallengeError::Fetch {
                status: Some(response.status),
                message: response.body.trim().to_string(),
            });
        }

        Ok(response.body)
    }

    fn compile(&self, script: &str) -> String {
        let profile = self.fingerprint.profile();
        let user_agent = self
            .settings
            .user_agent
            .as_deref()
            .unwrap_or_else(|| profile.user_agent());

        let inputs = HarnessInputs {
            script_url: self.settings.script_url.as_str(),
            webgl_vendor: &self.settings.webgl_vendor,
            webgl_renderer: &self.settings.webgl_renderer,
            user_agent,
        };

        self.harness.compile(&inputs, script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::core::{ChatResponse, ScriptResponse, TransportError};
    use crate::external_deps::interpreters::InterpreterResult;
    use crate::modules::spoofing::HostPlatform;
    use async_trait::async_trait;
    use http::HeaderMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        responses: Mutex<VecDeque<Result<ScriptResponse, TransportError>>>,
        gets: AtomicUsize,
    }

    impl StubClient {
        fn new(responses: Vec<Result<ScriptResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                gets: AtomicUsize::new(0),
            }
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamHttpClient for StubClient {
        async fn get(
            &self,
            _url: &Url,
            _headers: &HeaderMap,
        ) -> Result<ScriptResponse, TransportError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(script("fallback();")))
        }

        async fn post_json(
            &self,
            _url: &Url,
            _headers: &HeaderMap,
            _body: Vec<u8>,
        ) -> Result<ChatResponse, TransportError> {
            unreachable!("token provider never posts")
        }
    }

    struct StubExecutor {
        results: Mutex<VecDeque<InterpreterResult<String>>>,
        programs: Mutex<Vec<String>>,
    }

    impl StubExecutor {
        fn new(results: Vec<InterpreterResult<String>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                programs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScriptExecutor for StubExecutor {
        async fn execute(&self, program: &str) -> InterpreterResult<String> {
            self.programs.lock().unwrap().push(program.to_string());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("token".into()))
        }
    }

    fn script(body: &str) -> ScriptResponse {
        ScriptResponse {
            status: 200,
            body: body.into(),
        }
    }

    fn settings(ttl: Duration) -> ChallengeSettings {
        ChallengeSettings {
            script_url: Url::parse("https://cursor.com/challenge/c.js").unwrap(),
            webgl_vendor: "Google Inc. (Intel)".into(),
            webgl_renderer: "ANGLE (Intel)".into(),
            user_agent: None,
            cache_ttl: ttl,
        }
    }

    fn provider(
        client: Arc<StubClient>,
        executor: Arc<StubExecutor>,
        ttl: Duration,
    ) -> ChallengeTokenProvider {
        ChallengeTokenProvider::new(
            client,
            executor,
            Arc::new(FingerprintGenerator::new(HostPlatform::Windows)),
            settings(ttl),
        )
    }

    #[tokio::test]
    async fn does_not_refetch_within_ttl() {
        let client = Arc::new(StubClient::new(vec![Ok(script("vendor();"))]));
        let executor = Arc::new(StubExecutor::new(vec![Ok(" tok-1 \n".into()), Ok("tok-2".into())]));
        let provider = provider(client.clone(), executor.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        assert_eq!(provider.acquire(&cancel).await.unwrap(), "tok-1");
        assert_eq!(provider.acquire(&cancel).await.unwrap(), "tok-2");
        assert_eq!(client.gets(), 1);
        assert!(provider.has_fresh_script());
    }

    #[tokio::test(start_paused = true)]
    async fn refetches_after_ttl_expires() {
        let client = Arc::new(StubClient::new(vec![]));
        let executor = Arc::new(StubExecutor::new(vec![]));
        let provider = provider(client.clone(), executor, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        provider.acquire(&cancel).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        provider.acquire(&cancel).await.unwrap();
        assert_eq!(client.gets(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        provider.acquire(&cancel).await.unwrap();
        assert_eq!(client.gets(), 2);
    }

    #[tokio::test]
    async fn execution_failure_clears_cache_and_forces_refetch() {
        let client = Arc::new(StubClient::new(vec![]));
        let executor = Arc::new(StubExecutor::new(vec![
            Err(InterpreterError::Execution("boom".into())),
            Ok("tok".into()),
        ]));
        let provider = provider(client.clone(), executor, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let err = provider.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, ChallengeError::Execution(_)));
        assert!(!provider.has_fresh_script());

        assert_eq!(provider.acquire(&cancel).await.unwrap(), "tok");
        assert_eq!(client.gets(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_without_cache_is_an_error() {
        let client = Arc::new(StubClient::new(vec![Ok(ScriptResponse {
            status: 503,
            body: " unavailable ".into(),
        })]));
        let executor = Arc::new(StubExecutor::new(vec![]));
        let provider = provider(client, executor.clone(), Duration::from_secs(60));

        let err = provider.acquire(&CancellationToken::new()).await.unwrap_err();
        match err {
            ChallengeError::Fetch { status, message } => {
                assert_eq!(status, Some(503));
                assert_eq!(message, "unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(executor.programs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_cache_covers_fetch_failure() {
        let client = Arc::new(StubClient::new(vec![
            Ok(script("stale_vendor();")),
            Err(TransportError::Transport("connection reset".into())),
        ]));
        let executor = Arc::new(StubExecutor::new(vec![]));
        // Zero TTL: every call goes to the network.
        let provider = provider(client.clone(), executor.clone(), Duration::ZERO);
        let cancel = CancellationToken::new();

        provider.acquire(&cancel).await.unwrap();
        provider.acquire(&cancel).await.unwrap();

        assert_eq!(client.gets(), 2);
        let programs = executor.programs.lock().unwrap();
        assert!(programs[1].contains("stale_vendor();"));
    }

    #[tokio::test]
    async fn harness_receives_fingerprint_values() {
        let client = Arc::new(StubClient::new(vec![Ok(script("vendor_body();"))]));
        let executor = Arc::new(StubExecutor::new(vec![]));
        let fingerprint = Arc::new(FingerprintGenerator::new(HostPlatform::Linux));
        let provider = ChallengeTokenProvider::new(
            client,
            executor.clone(),
            fingerprint.clone(),
            settings(Duration::from_secs(60)),
        );

        provider.acquire(&CancellationToken::new()).await.unwrap();

        let programs = executor.programs.lock().unwrap();
        let program = &programs[0];
        assert!(program.contains("vendor_body();"));
        assert!(program.contains(fingerprint.profile().user_agent()));
        assert!(program.contains("https://cursor.com/challenge/c.js"));
        assert!(program.contains("ANGLE (Intel)"));
    }

    #[tokio::test]
    async fn pinned_user_agent_wins() {
        let client = Arc::new(StubClient::new(vec![]));
        let executor = Arc::new(StubExecutor::new(vec![]));
        let mut pinned = settings(Duration::from_secs(60));
        pinned.user_agent = Some("PinnedAgent/1.0".into());
        let provider = ChallengeTokenProvider::new(
            client,
            executor.clone(),
            Arc::new(FingerprintGenerator::new(HostPlatform::Windows)),
            pinned,
        );

        provider.acquire(&CancellationToken::new()).await.unwrap();
        assert!(executor.programs.lock().unwrap()[0].contains("PinnedAgent/1.0"));
    }

    #[tokio::test]
    async fn cancelled_before_fetch() {
        let client = Arc::new(StubClient::new(vec![]));
        let executor = Arc::new(StubExecutor::new(vec![]));
        let provider = provider(client.clone(), executor.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        for _ in 0..200 {
            let err = provider.acquire(&cancel).await.unwrap_err();
            assert!(matches!(err, ChallengeError::Cancelled));
        }
        assert_eq!(client.gets(), 0);
        assert!(executor.programs.lock().unwrap().is_empty());
        assert!(!provider.has_fresh_script());
    }

    #[tokio::test]
    async fn cancelled_with_cached_script_skips_execution() {
        let client = Arc::new(StubClient::new(vec![Ok(script("vendor();"))]));
        let executor = Arc::new(StubExecutor::new(vec![]));
        let provider = provider(client.clone(), executor.clone(), Duration::from_secs(60));
        provider.acquire(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        for _ in 0..50 {
            assert!(matches!(
                provider.acquire(&cancel).await,
                Err(ChallengeError::Cancelled)
            ));
        }
        assert_eq!(client.gets(), 1);
        assert_eq!(executor.programs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn boa_runs_default_harness() {
        let client = Arc::new(StubClient::new(vec![Ok(script(
            "var xhr = new XMLHttpRequest(); xhr.open('POST', '/api/chat'); xhr.setRequestHeader('x-is-human', 'boa-token');",
        ))]));
        let provider = ChallengeTokenProvider::new(
            client,
            Arc::new(crate::external_deps::interpreters::BoaScriptExecutor::new()),
            Arc::new(FingerprintGenerator::new(HostPlatform::Windows)),
            settings(Duration::from_secs(60)),
        );

        let token = provider.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(token, "boa-token");
    }
}
