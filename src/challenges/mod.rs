// Challenge-token acquisition: transport seam, harness, block detection and the cached provider.

pub mod core;
pub mod detectors;
pub mod harness;
pub mod token;

pub use harness::{HarnessInputs, HarnessTemplate};
pub use token::{ChallengeError, ChallengeSettings, ChallengeTokenProvider};
