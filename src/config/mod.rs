//! Relay configuration.
//!
//! Every value has a default; [`RelayConfig::from_env`] overrides them from
//! the process environment, and [`crate::RelayBuilder`] from code.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::modules::spoofing::HostPlatform;
use crate::stream::DEFAULT_QUEUE_CAPACITY;

pub const DEFAULT_CHAT_URL: &str = "https://cursor.com/api/chat";

pub const DEFAULT_SCRIPT_URL: &str = "https://cursor.com/149e9513-01fa-4fb0-aad4-566afd725d1b/2d206a39-8ed7-437e-a3be-862e0f06eea3/a-4-a/c.js?i=0&v=3&h=cursor.com";

pub const DEFAULT_WEBGL_VENDOR: &str = "Google Inc. (Intel)";

pub const DEFAULT_WEBGL_RENDERER: &str =
    "ANGLE (Intel, Intel(R) UHD Graphics 620 Direct3D11 vs_5_0 ps_5_0, D3D11)";

/// JavaScript runtime used to execute the challenge harness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScriptRuntime {
    #[default]
    Node,
    Boa,
}

impl FromStr for ScriptRuntime {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "node" => Ok(ScriptRuntime::Node),
            "boa" => Ok(ScriptRuntime::Boa),
            other => Err(format!("unknown script runtime '{other}'")),
        }
    }
}

/// Values fed into the challenge harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintSeed {
    /// Pins the harness user agent. When unset the live profile's agent is
    /// used, so a refresh after a block also changes what the script sees.
    pub user_agent: Option<String>,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
}

impl Default for FingerprintSeed {
    fn default() -> Self {
        Self {
            user_agent: None,
            webgl_vendor: DEFAULT_WEBGL_VENDOR.to_string(),
            webgl_renderer: DEFAULT_WEBGL_RENDERER.to_string(),
        }
    }
}

/// Configuration consumed by [`crate::CursorRelay`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bounds each upstream call and each script execution.
    pub timeout: Duration,
    /// Byte budget for conversation text; `0` disables truncation.
    pub max_input_length: usize,
    pub script_url: String,
    pub chat_url: String,
    pub fingerprint: FingerprintSeed,
    pub cache_ttl: Duration,
    pub max_attempts: usize,
    pub backoff_base: Duration,
    pub queue_capacity: usize,
    pub system_prompt_inject: Option<String>,
    /// Public model id -> vendor model id.
    pub model_aliases: HashMap<String, String>,
    pub script_runtime: ScriptRuntime,
    pub node_path: Option<PathBuf>,
    /// Directory holding `main.js` and `env.js`; the built-in harness otherwise.
    pub harness_dir: Option<PathBuf>,
    pub platform: Option<HostPlatform>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_input_length: 200_000,
            script_url: DEFAULT_SCRIPT_URL.to_string(),
            chat_url: DEFAULT_CHAT_URL.to_string(),
            fingerprint: FingerprintSeed::default(),
            cache_ttl: Duration::from_secs(60),
            max_attempts: 2,
            backoff_base: Duration::from_secs(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            system_prompt_inject: None,
            model_aliases: HashMap::new(),
            script_runtime: ScriptRuntime::Node,
            node_path: None,
            harness_dir: None,
            platform: None,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(secs) = parse_number::<u64>(&get, "TIMEOUT", 30) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(length) = parse_number::<usize>(&get, "MAX_INPUT_LENGTH", config.max_input_length) {
            config.max_input_length = length;
        }
        if let Some(url) = get("SCRIPT_URL") {
            config.script_url = url;
        }
        if let Some(agent) = get("USER_AGENT") {
            config.fingerprint.user_agent = Some(agent);
        }
        if let Some(vendor) = get("UNMASKED_VENDOR_WEBGL") {
            config.fingerprint.webgl_vendor = vendor;
        }
        if let Some(renderer) = get("UNMASKED_RENDERER_WEBGL") {
            config.fingerprint.webgl_renderer = renderer;
        }
        if let Some(inject) = get("SYSTEM_PROMPT_INJECT") {
            config.system_prompt_inject = Some(inject);
        }
        if let Some(raw) = get("SCRIPT_RUNTIME") {
            match raw.parse() {
                Ok(runtime) => config.script_runtime = runtime,
                Err(err) => log::warn!("{}, using default: node", err),
            }
        }
        if let Some(path) = get("NODE_PATH") {
            config.node_path = Some(PathBuf::from(path));
        }

        config
    }

    /// Vendor model id for a public model id.
    pub fn internal_model_id(&self, model: &str) -> String {
        self.model_aliases
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }
}

fn parse_number<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Option<T>
where
    T: FromStr + std::fmt::Display,
{
    let raw = get(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Invalid value for {}: {:?}, using default: {}", key, raw, default);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_input_length, 200_000);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.chat_url, "https://cursor.com/api/chat");
        assert!(config.fingerprint.user_agent.is_none());
    }

    #[test]
    fn environment_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("TIMEOUT", "45"),
            ("MAX_INPUT_LENGTH", "1000"),
            ("SCRIPT_URL", "https://example.test/c.js"),
            ("USER_AGENT", "Agent/1"),
            ("UNMASKED_VENDOR_WEBGL", "Vendor"),
            ("UNMASKED_RENDERER_WEBGL", "Renderer"),
            ("SYSTEM_PROMPT_INJECT", "Be kind"),
            ("NODE_PATH", "/opt/node/bin/node"),
            ("SCRIPT_RUNTIME", "Boa"),
        ]));
        assert_eq!(config.script_runtime, ScriptRuntime::Boa);
        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.max_input_length, 1000);
        assert_eq!(config.script_url, "https://example.test/c.js");
        assert_eq!(config.fingerprint.user_agent.as_deref(), Some("Agent/1"));
        assert_eq!(config.fingerprint.webgl_vendor, "Vendor");
        assert_eq!(config.fingerprint.webgl_renderer, "Renderer");
        assert_eq!(config.system_prompt_inject.as_deref(), Some("Be kind"));
        assert_eq!(config.node_path, Some(PathBuf::from("/opt/node/bin/node")));
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("TIMEOUT", "soon"),
            ("MAX_INPUT_LENGTH", "-1"),
            ("SCRIPT_RUNTIME", "deno"),
        ]));
        assert_eq!(config.script_runtime, ScriptRuntime::Node);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_input_length, 200_000);
    }

    #[test]
    fn model_aliases_default_to_identity() {
        let mut config = RelayConfig::default();
        assert_eq!(config.internal_model_id("claude-4-sonnet"), "claude-4-sonnet");
        config
            .model_aliases
            .insert("gpt-4o".into(), "openai/gpt-4o".into());
        assert_eq!(config.internal_model_id("gpt-4o"), "openai/gpt-4o");
    }
}
