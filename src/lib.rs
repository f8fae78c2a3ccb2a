//! # cursor-relay
//!
//! An OpenAI-compatible relay for the Cursor web chat endpoint.
//!
//! Chat requests are truncated to a byte budget, translated into the vendor
//! payload, and sent with a challenge token produced by running the vendor's
//! anti-automation script against a synthetic browser fingerprint. The
//! streamed reply is decoded into [`UpstreamEvent`]s which can be forwarded
//! as OpenAI chunks or folded into a single completion.
//!
//! ## Features
//!
//! - Synthetic Chrome fingerprints with client hints, refreshed on blocks
//! - Challenge-script caching with stale fallback and invalidation
//! - Linear retry backoff with cancellation at every suspension point
//! - Bounded, backpressured event streams
//! - Node.js or embedded Boa script execution
//!
//! ## Example
//!
//! ```no_run
//! use cursor_relay::{ChatCompletionRequest, ChatMessage, CursorRelay, collect_completion};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = CursorRelay::from_env()?;
//!     let request = ChatCompletionRequest::new("claude-4-sonnet", vec![ChatMessage::user("Hi")]);
//!     let stream = relay.submit(request, CancellationToken::new()).await?;
//!     let response = collect_completion(stream, "claude-4-sonnet").await?;
//!     println!("{}", response.content());
//!     Ok(())
//! }
//! ```

mod relay;

pub mod challenges;
pub mod config;
pub mod external_deps;
pub mod messages;
pub mod modules;
pub mod openai;
pub mod stream;

pub use crate::relay::{CursorRelay, RelayBuilder, RelayContext, RelayError, RelayResult};

pub use crate::challenges::core::{
    BackoffPolicy,
    ChatResponse,
    ReqwestUpstreamClient,
    ScriptResponse,
    TransportError,
    UpstreamHttpClient,
};

pub use crate::challenges::{
    ChallengeError,
    ChallengeSettings,
    ChallengeTokenProvider,
    HarnessInputs,
    HarnessTemplate,
};

pub use crate::config::{FingerprintSeed, RelayConfig, ScriptRuntime};

pub use crate::external_deps::interpreters::{
    BoaScriptExecutor,
    InterpreterError,
    InterpreterResult,
    NodeScriptExecutor,
    ScriptExecutor,
};

pub use crate::messages::{ChatMessage, ContentPart, MessageContent, truncate_messages};

pub use crate::modules::{
    EventDispatcher,
    EventHandler,
    FingerprintGenerator,
    FingerprintProfile,
    HostPlatform,
    LoggingHandler,
    RelayEvent,
};

pub use crate::openai::{
    ChatCompletionChunk,
    ChatCompletionRequest,
    ChatCompletionResponse,
    ErrorResponse,
    chunk_for_event,
    collect_completion,
    completion_id,
};

pub use crate::stream::{UpstreamEvent, UpstreamStream, Usage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
