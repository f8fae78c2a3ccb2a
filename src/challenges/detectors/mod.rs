//! Classification of rejected chat responses.
//!
//! Decides whether a non-2xx answer is an anti-automation block worth a
//! fingerprint refresh, and shortens known blocking-provider pages to a
//! readable label.

use once_cell::sync::Lazy;
use regex::Regex;

static CLOUDFLARE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Attention Required!\s*\|\s*Cloudflare").expect("cloudflare pattern is valid")
});

/// Label used in place of the raw Cloudflare block page.
pub const CLOUDFLARE_BLOCK_LABEL: &str = "Cloudflare 403";

/// What a rejected response means for the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    /// Anti-automation block; the identity should be rolled before retrying.
    Blocked,
    /// Any other upstream failure.
    Http,
}

/// A classified non-2xx chat response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub status: u16,
    pub message: String,
}

impl Rejection {
    pub fn is_blocked(&self) -> bool {
        self.kind == RejectionKind::Blocked
    }
}

pub fn is_block_status(status: u16) -> bool {
    status == 403
}

pub fn is_cloudflare_block(body: &str) -> bool {
    CLOUDFLARE_BLOCK_RE.is_match(body)
}

/// Classifies a rejected response from its status and raw body.
pub fn classify_rejection(status: u16, body: &str) -> Rejection {
    let trimmed = body.trim();
    let message = if is_cloudflare_block(trimmed) {
        CLOUDFLARE_BLOCK_LABEL.to_string()
    } else {
        trimmed.to_string()
    };

    let kind = if is_block_status(status) {
        RejectionKind::Blocked
    } else {
        RejectionKind::Http
    };

    Rejection {
        kind,
        status,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOUDFLARE_PAGE: &str = "<!DOCTYPE html><html><head><title>Attention Required! | Cloudflare</title></head><body>blocked</body></html>";

    #[test]
    fn cloudflare_page_becomes_label() {
        let rejection = classify_rejection(403, CLOUDFLARE_PAGE);
        assert!(rejection.is_blocked());
        assert_eq!(rejection.message, CLOUDFLARE_BLOCK_LABEL);
        assert_eq!(rejection.status, 403);
    }

    #[test]
    fn plain_forbidden_keeps_message() {
        let rejection = classify_rejection(403, "  Access denied\n");
        assert!(rejection.is_blocked());
        assert_eq!(rejection.message, "Access denied");
    }

    #[test]
    fn other_statuses_are_http_errors() {
        let rejection = classify_rejection(500, "{\"error\":\"boom\"}");
        assert_eq!(rejection.kind, RejectionKind::Http);
        assert_eq!(rejection.message, "{\"error\":\"boom\"}");
    }
}
