//! Event system for the relay.
//!
//! Provides hooks for logging and custom reactions around upstream activity:
//! attempts, challenge fetches, blocks, retries, and opened streams.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AttemptEvent {
    pub model: String,
    pub attempt: usize,
    pub max_attempts: usize,
    pub payload_len: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub script_url: String,
    /// True when the script body came from the cache rather than the network.
    pub cached: bool,
    pub token_len: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FallbackEvent {
    pub script_url: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BlockedEvent {
    pub status: u16,
    pub attempt: usize,
    pub platform: String,
    pub chrome_version: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub attempt: usize,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub model: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub status: Option<u16>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RelayEvent {
    Attempt(AttemptEvent),
    ChallengeFetched(ChallengeEvent),
    ChallengeFallback(FallbackEvent),
    Blocked(BlockedEvent),
    Retry(RetryEvent),
    StreamOpened(StreamEvent),
    Error(ErrorEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &RelayEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: RelayEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &RelayEvent) {
        match event {
            RelayEvent::Attempt(attempt) => {
                log::debug!(
                    "-> chat {} attempt {}/{} ({} bytes)",
                    attempt.model,
                    attempt.attempt,
                    attempt.max_attempts,
                    attempt.payload_len
                );
            }
            RelayEvent::ChallengeFetched(challenge) => {
                log::debug!(
                    "challenge token ready (cached={}, len={}) from {}",
                    challenge.cached,
                    challenge.token_len,
                    challenge.script_url
                );
            }
            RelayEvent::ChallengeFallback(fallback) => {
                log::warn!(
                    "challenge script fetch failed, using cached copy: {}",
                    fallback.reason
                );
            }
            RelayEvent::Blocked(blocked) => {
                log::warn!(
                    "upstream returned {} on attempt {}; refreshed fingerprint to {} / Chrome {}",
                    blocked.status,
                    blocked.attempt,
                    blocked.platform,
                    blocked.chrome_version
                );
            }
            RelayEvent::Retry(retry) => {
                log::info!(
                    "retry attempt {} after {:.2}s: {}",
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            RelayEvent::StreamOpened(stream) => {
                log::debug!("<- chat {} -> {} (streaming)", stream.model, stream.status);
            }
            RelayEvent::Error(error) => match error.status {
                Some(status) => log::error!("upstream error {status}: {}", error.error),
                None => log::error!("upstream error: {}", error.error),
            },
        }
    }
}
