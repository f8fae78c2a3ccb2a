//! Core utilities shared by the challenge provider and the relay orchestrator.

pub mod reqwest_client;
pub mod timing;
pub mod transport;
pub mod types;

pub use reqwest_client::ReqwestUpstreamClient;
pub use timing::BackoffPolicy;
pub use transport::{TransportError, UpstreamHttpClient, convert_headers};
pub use types::{ByteStream, ChatResponse, ScriptResponse};
