//! Cross-cutting services module
//!
//! Browser identity spoofing and the relay event system.

pub mod events;
pub mod spoofing;

// Re-export commonly used types
pub use events::{
    AttemptEvent,
    BlockedEvent,
    ChallengeEvent,
    ErrorEvent,
    EventDispatcher,
    EventHandler,
    FallbackEvent,
    LoggingHandler,
    RelayEvent,
    RetryEvent,
    StreamEvent,
};
pub use spoofing::{FingerprintGenerator, FingerprintProfile, HostPlatform, TOKEN_HEADER};
