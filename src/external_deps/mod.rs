//! Integrations that rely on external runtimes.
//!
//! This module groups the JavaScript execution backends that bridge the
//! challenge harness with the outside world.

pub mod interpreters;

pub use interpreters::{BoaScriptExecutor, NodeScriptExecutor};
