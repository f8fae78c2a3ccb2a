use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::challenges::core::{
	BackoffPolicy, ReqwestUpstreamClient, UpstreamHttpClient, convert_headers,
};
use crate::challenges::detectors::classify_rejection;
use crate::challenges::harness::HarnessTemplate;
use crate::challenges::token::{ChallengeError, ChallengeSettings, ChallengeTokenProvider};
use crate::config::{RelayConfig, ScriptRuntime};
use crate::external_deps::interpreters::{BoaScriptExecutor, NodeScriptExecutor, ScriptExecutor};
use crate::messages::{VendorRequest, to_vendor_messages, truncate_messages};
use crate::modules::events::{
	AttemptEvent, BlockedEvent, ErrorEvent, EventDispatcher, EventHandler, LoggingHandler,
	RelayEvent, RetryEvent, StreamEvent,
};
use crate::modules::spoofing::{FingerprintGenerator, HostPlatform};
use crate::openai::ChatCompletionRequest;
use crate::stream::{UpstreamStream, spawn_decoder};

/// Convenience result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Failures surfaced by [`CursorRelay`].
#[derive(Debug, Error)]
pub enum RelayError {
	#[error("failed to fetch challenge script: {message}")]
	ChallengeFetch { status: Option<u16>, message: String },
	#[error("failed to produce challenge token: {0}")]
	ChallengeExecution(String),
	#[error("upstream blocked the request ({status}): {message}")]
	UpstreamBlocked { status: u16, message: String },
	#[error("upstream returned {status}: {message}")]
	UpstreamHttp { status: u16, message: String },
	#[error("cursor request failed: {0}")]
	UpstreamTransport(String),
	#[error("{0}")]
	StreamDecode(String),
	#[error("request cancelled")]
	Cancelled,
	#[error("failed after {attempts} attempts")]
	Exhausted { attempts: usize },
	#[error("failed to encode payload: {0}")]
	Serialization(#[from] serde_json::Error),
	#[error("header conversion failed: {0}")]
	InvalidHeader(String),
	#[error("invalid url: {0}")]
	Url(#[from] url::ParseError),
	#[error("failed to load harness: {0}")]
	Harness(#[source] std::io::Error),
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
}

impl RelayError {
	/// HTTP status a front end should answer with.
	pub fn status_code(&self) -> u16 {
		match self {
			RelayError::UpstreamBlocked { status, .. } | RelayError::UpstreamHttp { status, .. } => {
				*status
			}
			RelayError::ChallengeFetch {
				status: Some(status),
				..
			} => *status,
			RelayError::UpstreamTransport(_) | RelayError::StreamDecode(_) => 502,
			_ => 500,
		}
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, RelayError::Cancelled)
	}

	/// True for failures that originate at the vendor rather than in the relay.
	pub fn is_upstream(&self) -> bool {
		matches!(
			self,
			RelayError::ChallengeFetch { .. }
				| RelayError::UpstreamBlocked { .. }
				| RelayError::UpstreamHttp { .. }
				| RelayError::UpstreamTransport(_)
				| RelayError::StreamDecode(_)
		)
	}
}

impl From<ChallengeError> for RelayError {
	fn from(err: ChallengeError) -> Self {
		match err {
			ChallengeError::Fetch { status, message } => RelayError::ChallengeFetch { status, message },
			ChallengeError::Execution(inner) => RelayError::ChallengeExecution(inner.to_string()),
			ChallengeError::InvalidHeader(name) => RelayError::InvalidHeader(name),
			ChallengeError::Cancelled => RelayError::Cancelled,
		}
	}
}

/// State shared by every request of one relay: the fingerprint and the
/// challenge-token provider with its script cache.
pub struct RelayContext {
	fingerprint: Arc<FingerprintGenerator>,
	tokens: ChallengeTokenProvider,
}

impl RelayContext {
	pub fn new(fingerprint: Arc<FingerprintGenerator>, tokens: ChallengeTokenProvider) -> Self {
		Self { fingerprint, tokens }
	}

	pub fn fingerprint(&self) -> &FingerprintGenerator {
		&self.fingerprint
	}

	pub fn tokens(&self) -> &ChallengeTokenProvider {
		&self.tokens
	}

	/// Rolls a new identity and forgets the challenge script together.
	pub fn invalidate(&self) {
		self.fingerprint.refresh();
		self.tokens.clear_cache();
	}
}

/// Fluent builder for [`CursorRelay`].
pub struct RelayBuilder {
	config: RelayConfig,
	http_client: Option<Arc<dyn UpstreamHttpClient>>,
	executor: Option<Arc<dyn ScriptExecutor>>,
	harness: Option<HarnessTemplate>,
	handlers: Vec<Arc<dyn EventHandler>>,
	logging: bool,
}

impl RelayBuilder {
	pub fn new() -> Self {
		Self {
			config: RelayConfig::default(),
			http_client: None,
			executor: None,
			harness: None,
			handlers: Vec::new(),
			logging: true,
		}
	}

	pub fn with_config(mut self, config: RelayConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_http_client(mut self, client: Arc<dyn UpstreamHttpClient>) -> Self {
		self.http_client = Some(client);
		self
	}

	pub fn with_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
		self.executor = Some(executor);
		self
	}

	pub fn with_harness(mut self, harness: HarnessTemplate) -> Self {
		self.harness = Some(harness);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_logging(mut self) -> Self {
		self.logging = false;
		self
	}

	pub fn with_platform(mut self, platform: HostPlatform) -> Self {
		self.config.platform = Some(platform);
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.config.timeout = timeout;
		self
	}

	pub fn with_script_runtime(mut self, runtime: ScriptRuntime) -> Self {
		self.config.script_runtime = runtime;
		self
	}

	pub fn with_max_input_length(mut self, length: usize) -> Self {
		self.config.max_input_length = length;
		self
	}

	pub fn with_script_url(mut self, url: impl Into<String>) -> Self {
		self.config.script_url = url.into();
		self
	}

	pub fn with_chat_url(mut self, url: impl Into<String>) -> Self {
		self.config.chat_url = url.into();
		self
	}

	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.config.fingerprint.user_agent = Some(user_agent.into());
		self
	}

	pub fn with_webgl(mut self, vendor: impl Into<String>, renderer: impl Into<String>) -> Self {
		self.config.fingerprint.webgl_vendor = vendor.into();
		self.config.fingerprint.webgl_renderer = renderer.into();
		self
	}

	pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
		self.config.cache_ttl = ttl;
		self
	}

	pub fn with_max_attempts(mut self, attempts: usize) -> Self {
		self.config.max_attempts = attempts.max(1);
		self
	}

	pub fn with_backoff_base(mut self, base: Duration) -> Self {
		self.config.backoff_base = base;
		self
	}

	pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
		self.config.queue_capacity = capacity.max(1);
		self
	}

	pub fn with_system_prompt_inject(mut self, inject: impl Into<String>) -> Self {
		self.config.system_prompt_inject = Some(inject.into());
		self
	}

	pub fn with_model_alias(mut self, public: impl Into<String>, internal: impl Into<String>) -> Self {
		self.config.model_aliases.insert(public.into(), internal.into());
		self
	}

	pub fn build(self) -> RelayResult<CursorRelay> {
		let config = self.config;

		let client: Arc<dyn UpstreamHttpClient> = match self.http_client {
			Some(client) => client,
			None => Arc::new(ReqwestUpstreamClient::new(config.timeout)?),
		};

		let executor: Arc<dyn ScriptExecutor> = match self.executor {
			Some(executor) => executor,
			None => default_executor(&config),
		};

		let harness = match (self.harness, &config.harness_dir) {
			(Some(harness), _) => harness,
			(None, Some(dir)) => HarnessTemplate::from_dir(dir).map_err(RelayError::Harness)?,
			(None, None) => HarnessTemplate::default(),
		};

		let mut dispatcher = EventDispatcher::new();
		if self.logging {
			dispatcher.register_handler(Arc::new(LoggingHandler));
		}
		for handler in self.handlers {
			dispatcher.register_handler(handler);
		}
		let events = Arc::new(dispatcher);

		let fingerprint = Arc::new(FingerprintGenerator::new(
			config.platform.unwrap_or_else(HostPlatform::current),
		));

		let settings = ChallengeSettings {
			script_url: Url::parse(&config.script_url)?,
			webgl_vendor: config.fingerprint.webgl_vendor.clone(),
			webgl_renderer: config.fingerprint.webgl_renderer.clone(),
			user_agent: config.fingerprint.user_agent.clone(),
			cache_ttl: config.cache_ttl,
		};
		let tokens = ChallengeTokenProvider::new(client.clone(), executor, fingerprint.clone(), settings)
			.with_harness(harness)
			.with_events(events.clone());

		Ok(CursorRelay {
			chat_url: Url::parse(&config.chat_url)?,
			backoff: BackoffPolicy::new(config.backoff_base, config.max_attempts),
			context: RelayContext::new(fingerprint, tokens),
			client,
			events,
			config,
		})
	}
}

impl Default for RelayBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Relays OpenAI-style chat requests to the vendor chat endpoint.
pub struct CursorRelay {
	config: RelayConfig,
	chat_url: Url,
	backoff: BackoffPolicy,
	context: RelayContext,
	client: Arc<dyn UpstreamHttpClient>,
	events: Arc<EventDispatcher>,
}

impl CursorRelay {
	/// Relay with default configuration, reqwest transport and Node executor.
	pub fn new() -> RelayResult<Self> {
		RelayBuilder::new().build()
	}

	/// Relay configured from the process environment.
	pub fn from_env() -> RelayResult<Self> {
		RelayBuilder::new().with_config(RelayConfig::from_env()).build()
	}

	pub fn builder() -> RelayBuilder {
		RelayBuilder::new()
	}

	pub fn config(&self) -> &RelayConfig {
		&self.config
	}

	pub fn context(&self) -> &RelayContext {
		&self.context
	}

	/// Sends `request` upstream and returns the live event stream.
	///
	/// Returns as soon as the vendor accepts the request; the reply is decoded
	/// by a background task. Cancelling `cancel` aborts any pending step and
	/// closes the returned stream.
	pub async fn submit(
		&self,
		request: ChatCompletionRequest,
		cancel: CancellationToken,
	) -> RelayResult<UpstreamStream> {
		let messages = truncate_messages(&request.messages, self.config.max_input_length);
		let vendor_messages =
			to_vendor_messages(&messages, self.config.system_prompt_inject.as_deref());
		let payload = VendorRequest::new(self.config.internal_model_id(&request.model), vendor_messages);
		let body = serde_json::to_vec(&payload)?;

		let max_attempts = self.backoff.max_attempts();
		for attempt in 1..=max_attempts {
			if cancel.is_cancelled() {
				return Err(RelayError::Cancelled);
			}

			self.events.dispatch(RelayEvent::Attempt(AttemptEvent {
				model: request.model.clone(),
				attempt,
				max_attempts,
				payload_len: body.len(),
				timestamp: chrono::Utc::now(),
			}));

			let token = match self.context.tokens.acquire(&cancel).await {
				Ok(token) => token,
				Err(ChallengeError::Cancelled) => return Err(RelayError::Cancelled),
				Err(err) if !self.backoff.is_final(attempt) => {
					log::warn!(
						"Failed to fetch challenge token (attempt {}/{}), retrying: {}",
						attempt,
						max_attempts,
						err
					);
					self.pause(attempt, err.to_string(), &cancel).await?;
					continue;
				}
				Err(err) => return Err(self.fail(err.into())),
			};

			let headers = convert_headers(&self.context.fingerprint.chat_headers(&token))
				.map_err(|err| RelayError::InvalidHeader(err.to_string()))?;

			log::debug!(
				"Sending request to {} (model={}, attempt={}/{}, payload={} bytes, token={}...)",
				self.chat_url,
				request.model,
				attempt,
				max_attempts,
				body.len(),
				token_preview(&token)
			);

			let sent = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(RelayError::Cancelled),
				sent = self.client.post_json(&self.chat_url, &headers, body.clone()) => sent,
			};

			let response = match sent {
				Ok(response) => response,
				Err(err) if !self.backoff.is_final(attempt) => {
					log::warn!(
						"Cursor request failed (attempt {}/{}), retrying: {}",
						attempt,
						max_attempts,
						err
					);
					self.pause(attempt, err.to_string(), &cancel).await?;
					continue;
				}
				Err(err) => return Err(self.fail(RelayError::UpstreamTransport(err.to_string()))),
			};

			let status = response.status;
			if response.is_success() {
				self.events.dispatch(RelayEvent::StreamOpened(StreamEvent {
					model: request.model.clone(),
					status,
					timestamp: chrono::Utc::now(),
				}));
				return Ok(spawn_decoder(response.body, self.config.queue_capacity, &cancel));
			}

			let text = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(RelayError::Cancelled),
				text = response.text() => text.unwrap_or_else(|err| err.to_string()),
			};
			let rejection = classify_rejection(status, &text);
			log::error!(
				"Cursor API returned status {} on attempt {}/{}: {}",
				status,
				attempt,
				max_attempts,
				rejection.message
			);

			if rejection.is_blocked() && !self.backoff.is_final(attempt) {
				self.context.invalidate();
				let profile = self.context.fingerprint.profile();
				self.events.dispatch(RelayEvent::Blocked(BlockedEvent {
					status,
					attempt,
					platform: profile.platform.clone(),
					chrome_version: profile.chrome_version,
					timestamp: chrono::Utc::now(),
				}));
				self.pause(attempt, format!("blocked with status {status}"), &cancel).await?;
				continue;
			}

			let err = if rejection.is_blocked() {
				RelayError::UpstreamBlocked {
					status,
					message: rejection.message,
				}
			} else {
				RelayError::UpstreamHttp {
					status,
					message: rejection.message,
				}
			};
			return Err(self.fail(err));
		}

		Err(self.fail(RelayError::Exhausted {
			attempts: max_attempts,
		}))
	}

	async fn pause(&self, attempt: usize, reason: String, cancel: &CancellationToken) -> RelayResult<()> {
		let delay = self.backoff.delay_for(attempt);
		self.events.dispatch(RelayEvent::Retry(RetryEvent {
			attempt,
			reason,
			scheduled_after: delay,
			timestamp: chrono::Utc::now(),
		}));

		tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(RelayError::Cancelled),
			_ = tokio::time::sleep(delay) => Ok(()),
		}
	}

	fn fail(&self, err: RelayError) -> RelayError {
		self.events.dispatch(RelayEvent::Error(ErrorEvent {
			status: err.is_upstream().then(|| err.status_code()),
			error: err.to_string(),
			timestamp: chrono::Utc::now(),
		}));
		err
	}
}

fn default_executor(config: &RelayConfig) -> Arc<dyn ScriptExecutor> {
	match config.script_runtime {
		ScriptRuntime::Node => {
			let mut node = NodeScriptExecutor::new().with_timeout(config.timeout);
			if let Some(path) = &config.node_path {
				node = node.with_binary(path.clone());
			}
			Arc::new(node)
		}
		ScriptRuntime::Boa => Arc::new(BoaScriptExecutor::new().with_timeout(config.timeout)),
	}
}

fn token_preview(token: &str) -> &str {
	match token.char_indices().nth(16) {
		Some((idx, _)) => &token[..idx],
		None => token,
	}
}
