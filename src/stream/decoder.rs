//! Line decoder for the vendor's `data:` event feed.

use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use super::{UpstreamEvent, UpstreamStream, Usage};
use crate::challenges::core::ByteStream;

pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Longest line accepted from the vendor before the stream is failed.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VendorEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    error_text: Option<String>,
    #[serde(default)]
    message_metadata: Option<MessageMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageMetadata {
    #[serde(default)]
    usage: Option<VendorUsage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VendorUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl From<VendorUsage> for Usage {
    fn from(usage: VendorUsage) -> Self {
        Usage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// What one line means for the stream.
#[derive(Debug, PartialEq, Eq)]
enum LineOutcome {
    Ignore,
    Delta(String),
    Finish(Option<Usage>),
    Failed(String),
    Done,
}

/// Payload of a `data:` line, with at most one leading space removed.
pub fn parse_data_line(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?;
    Some(payload.strip_prefix(' ').unwrap_or(payload))
}

fn classify_line(line: &str) -> LineOutcome {
    let Some(payload) = parse_data_line(line) else {
        return LineOutcome::Ignore;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return LineOutcome::Ignore;
    }
    if payload == DONE_SENTINEL {
        return LineOutcome::Done;
    }

    let event: VendorEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(err) => {
            log::debug!("Skipping malformed stream payload ({}): {}", err, payload);
            return LineOutcome::Ignore;
        }
    };

    match event.kind.as_deref() {
        Some("error") => match event.error_text.filter(|text| !text.is_empty()) {
            Some(text) => LineOutcome::Failed(format!("cursor API error: {text}")),
            None => LineOutcome::Ignore,
        },
        Some("finish") => LineOutcome::Finish(
            event
                .message_metadata
                .and_then(|meta| meta.usage)
                .map(Usage::from),
        ),
        _ => match event.delta.filter(|delta| !delta.is_empty()) {
            Some(delta) => LineOutcome::Delta(delta),
            None => LineOutcome::Ignore,
        },
    }
}

/// Starts a decoder task over `body` and returns the handle to its events.
pub fn spawn_decoder(body: ByteStream, capacity: usize, cancel: &CancellationToken) -> UpstreamStream {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task_cancel = cancel.child_token();
    tokio::spawn(decode(StreamReader::new(body), MAX_LINE_LENGTH, tx, task_cancel.clone()));
    UpstreamStream::new(rx, task_cancel)
}

/// Reads lines from `reader` and forwards normalized events to `tx`.
///
/// A line longer than `max_line` fails the stream. Stops without emitting
/// anything further once `cancel` fires or the receiver is gone.
pub async fn decode<R>(
    reader: R,
    max_line: usize,
    tx: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line));

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("Stream decoding cancelled");
                return;
            }
            line = lines.next() => line,
        };

        let line = match line {
            Some(Ok(line)) => line,
            None => {
                emit(&tx, &cancel, UpstreamEvent::End).await;
                return;
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                log::warn!("Upstream line exceeded {} bytes", max_line);
                let message = format!("stream line exceeded {max_line} bytes");
                emit(&tx, &cancel, UpstreamEvent::Error(message)).await;
                return;
            }
            Some(Err(LinesCodecError::Io(err))) => {
                log::warn!("Upstream stream read failed: {}", err);
                emit(&tx, &cancel, UpstreamEvent::Error(format!("stream read failed: {err}"))).await;
                return;
            }
        };

        match classify_line(&line) {
            LineOutcome::Ignore => {}
            LineOutcome::Delta(delta) => {
                if !emit(&tx, &cancel, UpstreamEvent::TextDelta(delta)).await {
                    return;
                }
            }
            LineOutcome::Finish(usage) => {
                if let Some(usage) = usage
                    && !emit(&tx, &cancel, UpstreamEvent::Usage(usage)).await
                {
                    return;
                }
                emit(&tx, &cancel, UpstreamEvent::End).await;
                return;
            }
            LineOutcome::Failed(message) => {
                log::warn!("Upstream reported an error: {}", message);
                emit(&tx, &cancel, UpstreamEvent::Error(message)).await;
                return;
            }
            LineOutcome::Done => {
                emit(&tx, &cancel, UpstreamEvent::End).await;
                return;
            }
        }
    }
}

/// Sends one event, waiting for queue space. False once the stream should stop.
async fn emit(tx: &mpsc::Sender<UpstreamEvent>, cancel: &CancellationToken, event: UpstreamEvent) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => {
            if sent.is_err() {
                log::debug!("Stream consumer went away");
            }
            sent.is_ok()
        }
    }
}
