//! Byte-budget truncation of a conversation.

use super::ChatMessage;

/// Trims `messages` so their flattened text fits in `budget` bytes.
///
/// A leading system message is always kept and charged against the budget.
/// The rest is scanned newest to oldest; a message that would overflow is
/// skipped while older ones are still considered, so the kept set need not
/// be a contiguous suffix. A budget of zero disables truncation.
pub fn truncate_messages(messages: &[ChatMessage], budget: usize) -> Vec<ChatMessage> {
    if messages.is_empty() || budget == 0 {
        return messages.to_vec();
    }

    let total: usize = messages.iter().map(ChatMessage::text_len).sum();
    if total <= budget {
        return messages.to_vec();
    }

    let mut remaining = budget;
    let mut head = None;
    let mut rest = messages;

    if let Some(first) = messages.first()
        && first.is_system()
    {
        remaining = remaining.saturating_sub(first.text_len());
        head = Some(first.clone());
        rest = &messages[1..];
    }

    let mut used = 0;
    let mut kept: Vec<&ChatMessage> = Vec::new();
    for message in rest.iter().rev() {
        let len = message.text_len();
        if len == 0 || used + len > remaining {
            continue;
        }
        kept.push(message);
        used += len;
    }

    head.into_iter()
        .chain(kept.into_iter().rev().cloned())
        .collect()
}
