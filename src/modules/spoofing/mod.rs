//! Browser fingerprint spoofing utilities.
//!
//! Maintains a synthetic Chrome identity (platform, client hints, user agent)
//! and produces the header sets sent with challenge-script fetches and chat
//! requests. Secondary presentation fields are re-rolled on every call so two
//! header sets built from the same profile differ slightly.

use rand::{Rng, seq::SliceRandom};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const CHROME_VERSIONS: &[u32] = &[120, 121, 122, 123, 124, 125, 126, 127, 128, 129, 130];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "zh-CN,zh;q=0.9,en;q=0.8",
    "en-GB,en;q=0.9",
];

const REFERERS: &[&str] = &[
    "https://cursor.com/en-US/learn/how-ai-models-work",
    "https://cursor.com/cn/learn/how-ai-models-work",
    "https://cursor.com/",
];

/// Header carrying the challenge token on chat requests.
pub const TOKEN_HEADER: &str = "x-is-human";

/// Operating system family used to pick a plausible candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostPlatform {
    Windows,
    MacOs,
    Linux,
}

impl HostPlatform {
    /// Platform of the running process; anything unknown is treated as Windows.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => HostPlatform::MacOs,
            "linux" => HostPlatform::Linux,
            _ => HostPlatform::Windows,
        }
    }
}

/// Immutable description of the synthetic browser.
///
/// The user agent is derived from the other fields when the profile is
/// sampled and cannot be set on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintProfile {
    pub platform: String,
    pub platform_version: String,
    pub architecture: String,
    pub bitness: String,
    pub chrome_version: u32,
    pub mobile: bool,
    user_agent: String,
}

impl FingerprintProfile {
    fn from_template(template: &ProfileTemplate, chrome_version: u32) -> Self {
        let mut profile = Self {
            platform: template.platform.to_string(),
            platform_version: template.platform_version.to_string(),
            architecture: template.architecture.to_string(),
            bitness: template.bitness.to_string(),
            chrome_version,
            mobile: false,
            user_agent: String::new(),
        };
        profile.user_agent = derive_user_agent(&profile);
        profile
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

fn derive_user_agent(profile: &FingerprintProfile) -> String {
    let version = profile.chrome_version;
    match profile.platform.as_str() {
        // Chrome freezes the macOS token regardless of the real architecture.
        "macOS" => format!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version}.0.0.0 Safari/537.36"
        ),
        "Linux" => format!(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version}.0.0.0 Safari/537.36"
        ),
        _ => format!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version}.0.0.0 Safari/537.36"
        ),
    }
}

#[derive(Debug, Clone, Copy)]
struct ProfileTemplate {
    platform: &'static str,
    platform_version: &'static str,
    architecture: &'static str,
    bitness: &'static str,
}

const fn template(
    platform: &'static str,
    platform_version: &'static str,
    architecture: &'static str,
) -> ProfileTemplate {
    ProfileTemplate {
        platform,
        platform_version,
        architecture,
        bitness: "64",
    }
}

const WINDOWS_TEMPLATES: &[ProfileTemplate] = &[
    template("Windows", "10.0.0", "x86"),
    template("Windows", "11.0.0", "x86"),
    template("Windows", "15.0.0", "x86"),
];

const MACOS_TEMPLATES: &[ProfileTemplate] = &[
    template("macOS", "13.0.0", "arm"),
    template("macOS", "14.0.0", "arm"),
    template("macOS", "15.0.0", "arm"),
    template("macOS", "13.0.0", "x86"),
    template("macOS", "14.0.0", "x86"),
];

const LINUX_TEMPLATES: &[ProfileTemplate] = &[template("Linux", "", "x86")];

fn templates_for_platform(platform: HostPlatform) -> &'static [ProfileTemplate] {
    match platform {
        HostPlatform::Windows => WINDOWS_TEMPLATES,
        HostPlatform::MacOs => MACOS_TEMPLATES,
        HostPlatform::Linux => LINUX_TEMPLATES,
    }
}

fn sample_profile(platform: HostPlatform) -> FingerprintProfile {
    let mut rng = rand::thread_rng();
    let templates = templates_for_platform(platform);
    let template = templates.choose(&mut rng).unwrap_or(&templates[0]);
    let chrome_version = CHROME_VERSIONS.choose(&mut rng).copied().unwrap_or(130);
    FingerprintProfile::from_template(template, chrome_version)
}

/// Owns the current fingerprint and renders per-request header sets.
///
/// The profile is replaced wholesale, so a single pointer swap under the lock
/// is enough for concurrent readers.
#[derive(Debug)]
pub struct FingerprintGenerator {
    platform: HostPlatform,
    profile: RwLock<Arc<FingerprintProfile>>,
}

impl FingerprintGenerator {
    pub fn new(platform: HostPlatform) -> Self {
        Self {
            platform,
            profile: RwLock::new(Arc::new(sample_profile(platform))),
        }
    }

    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    /// Snapshot of the current profile.
    pub fn profile(&self) -> Arc<FingerprintProfile> {
        self.profile
            .read()
            .expect("fingerprint lock poisoned")
            .clone()
    }

    /// Rolls a new profile from the platform pool.
    pub fn refresh(&self) {
        let next = Arc::new(sample_profile(self.platform));
        *self.profile.write().expect("fingerprint lock poisoned") = next;
    }

    /// Headers for the chat POST, carrying `token` under [`TOKEN_HEADER`].
    pub fn chat_headers(&self, token: &str) -> HashMap<String, String> {
        let profile = self.profile();
        let mut rng = rand::thread_rng();

        let mut headers = HashMap::new();
        headers.insert("sec-ch-ua-platform".into(), quoted(&profile.platform));
        headers.insert("x-path".into(), "/api/chat".into());
        headers.insert("x-method".into(), "POST".into());
        headers.insert("referer".into(), pick(&mut rng, REFERERS));
        headers.insert("sec-ch-ua".into(), sec_ch_ua(&mut rng, profile.chrome_version));
        headers.insert("sec-ch-ua-mobile".into(), mobile_hint(&profile));
        headers.insert(TOKEN_HEADER.into(), token.to_string());
        headers.insert("user-agent".into(), profile.user_agent().to_string());
        headers.insert("content-type".into(), "application/json".into());
        headers.insert("accept-language".into(), pick(&mut rng, ACCEPT_LANGUAGES));

        if !profile.architecture.is_empty() {
            headers.insert("sec-ch-ua-arch".into(), quoted(&profile.architecture));
        }
        if !profile.bitness.is_empty() {
            headers.insert("sec-ch-ua-bitness".into(), quoted(&profile.bitness));
        }
        if !profile.platform_version.is_empty() {
            headers.insert(
                "sec-ch-ua-platform-version".into(),
                quoted(&profile.platform_version),
            );
        }

        headers
    }

    /// Headers for fetching the challenge script.
    pub fn challenge_headers(&self) -> HashMap<String, String> {
        let profile = self.profile();
        let mut rng = rand::thread_rng();

        let mut headers = HashMap::new();
        headers.insert("user-agent".into(), profile.user_agent().to_string());
        headers.insert("sec-ch-ua-arch".into(), quoted(&profile.architecture));
        headers.insert("sec-ch-ua-platform".into(), quoted(&profile.platform));
        headers.insert("sec-ch-ua".into(), sec_ch_ua(&mut rng, profile.chrome_version));
        headers.insert("sec-ch-ua-bitness".into(), quoted(&profile.bitness));
        headers.insert("sec-ch-ua-mobile".into(), mobile_hint(&profile));
        headers.insert("sec-fetch-site".into(), "same-origin".into());
        headers.insert("sec-fetch-mode".into(), "no-cors".into());
        headers.insert("sec-fetch-dest".into(), "script".into());
        headers.insert("referer".into(), pick(&mut rng, REFERERS));
        headers.insert("accept-language".into(), pick(&mut rng, ACCEPT_LANGUAGES));

        if !profile.platform_version.is_empty() {
            headers.insert(
                "sec-ch-ua-platform-version".into(),
                quoted(&profile.platform_version),
            );
        }

        headers
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new(HostPlatform::current())
    }
}

fn quoted(value: &str) -> String {
    format!("\"{value}\"")
}

fn mobile_hint(profile: &FingerprintProfile) -> String {
    let hint = if profile.mobile { "?1" } else { "?0" };
    hint.to_string()
}

fn pick<R: Rng>(rng: &mut R, items: &[&str]) -> String {
    items.choose(rng).copied().unwrap_or_default().to_string()
}

fn sec_ch_ua<R: Rng>(rng: &mut R, chrome_version: u32) -> String {
    let not_a_brand: u32 = rng.gen_range(24..=33);
    format!(
        r#""Google Chrome";v="{chrome_version}", "Chromium";v="{chrome_version}", "Not(A:Brand";v="{not_a_brand}""#
    )
}
