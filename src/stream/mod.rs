//! Normalized upstream events and the handle callers read them from.

pub mod decoder;

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

pub use decoder::{DEFAULT_QUEUE_CAPACITY, spawn_decoder};

/// Token accounting reported by the vendor at the end of a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One decoded event of an upstream reply.
///
/// A stream ends with exactly one `End` or `Error`, unless it was
/// cancelled, in which case it simply closes. `Usage` appears at most once
/// and directly before `End`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    TextDelta(String),
    Usage(Usage),
    Error(String),
    End,
}

impl UpstreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpstreamEvent::Error(_) | UpstreamEvent::End)
    }
}

/// Receiving side of a relayed reply.
///
/// Dropping the handle stops the decoder task feeding it.
pub struct UpstreamStream {
    rx: mpsc::Receiver<UpstreamEvent>,
    _guard: DropGuard,
}

impl UpstreamStream {
    pub(crate) fn new(rx: mpsc::Receiver<UpstreamEvent>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            _guard: cancel.drop_guard(),
        }
    }

    /// A stream replaying fixed events, mostly useful for tests of consumers.
    pub fn from_events(events: impl IntoIterator<Item = UpstreamEvent>) -> Self {
        let events: Vec<_> = events.into_iter().collect();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity matches the event count, so this cannot fail.
            let _ = tx.try_send(event);
        }
        Self::new(rx, CancellationToken::new())
    }

    pub async fn recv(&mut self) -> Option<UpstreamEvent> {
        self.rx.recv().await
    }
}

impl Stream for UpstreamStream {
    type Item = UpstreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream").finish_non_exhaustive()
    }
}
