//! JavaScript harness wrapped around the vendor challenge script.
//!
//! The harness is a template with four fingerprint placeholders plus two
//! slots for the environment shim and the vendor script body. Substituted
//! values land inside double-quoted string literals, so they are escaped for
//! that context.

use std::fs;
use std::io;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const ENV_SLOT: &str = "$$env_jscode$$";
const SCRIPT_SLOT: &str = "$$cursor_jscode$$";

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\$\$(currentScriptSrc|UNMASKED_VENDOR_WEBGL|UNMASKED_RENDERER_WEBGL|userAgent)\$\$",
    )
    .expect("placeholder pattern is valid")
});

const DEFAULT_MAIN: &str = r#"var __fp = {
    currentScriptSrc: "$$currentScriptSrc$$",
    webglVendor: "$$UNMASKED_VENDOR_WEBGL$$",
    webglRenderer: "$$UNMASKED_RENDERER_WEBGL$$",
    userAgent: "$$userAgent$$"
};
var __emitted = false;
var __captured = null;
function __emit(token) {
    if (__emitted || token === undefined || token === null || token === "") return;
    __emitted = true;
    console.log(typeof token === "string" ? token : JSON.stringify(token));
}
function __capture(name, value) {
    if (String(name).toLowerCase() === "x-is-human") {
        __captured = value;
        __emit(value);
    }
}
$$env_jscode$$
;(function () {
$$cursor_jscode$$
})();
setTimeout(function () {
    if (!__emitted && __captured !== null) __emit(__captured);
    if (!__emitted && typeof window.__xIsHuman !== "undefined") __emit(window.__xIsHuman);
}, 0);
"#;

const DEFAULT_ENV: &str = r#"var __webgl = {
    getParameter: function (p) {
        if (p === 37445) return __fp.webglVendor;
        if (p === 37446) return __fp.webglRenderer;
        return null;
    },
    getExtension: function (name) {
        if (name === "WEBGL_debug_renderer_info") {
            return { UNMASKED_VENDOR_WEBGL: 37445, UNMASKED_RENDERER_WEBGL: 37446 };
        }
        return null;
    },
    getSupportedExtensions: function () { return ["WEBGL_debug_renderer_info"]; }
};
var __element = function (tag) {
    return {
        tagName: String(tag).toUpperCase(),
        style: {},
        setAttribute: function () {},
        getAttribute: function () { return null; },
        appendChild: function (c) { return c; },
        addEventListener: function () {},
        getContext: function (kind) {
            return String(kind).indexOf("webgl") === 0 ? __webgl : null;
        }
    };
};
window.navigator = {
    userAgent: __fp.userAgent,
    language: "en-US",
    languages: ["en-US", "en"],
    platform: "Win32",
    vendor: "Google Inc.",
    webdriver: false,
    hardwareConcurrency: 8,
    cookieEnabled: true
};
window.location = {
    href: "https://cursor.com/",
    origin: "https://cursor.com",
    hostname: "cursor.com",
    protocol: "https:",
    pathname: "/"
};
window.document = {
    currentScript: { src: __fp.currentScriptSrc },
    cookie: "",
    referrer: "https://cursor.com/",
    createElement: __element,
    getElementsByTagName: function () { return []; },
    querySelector: function () { return null; },
    addEventListener: function () {},
    body: __element("body"),
    documentElement: __element("html")
};
window.screen = { width: 1920, height: 1080, availWidth: 1920, availHeight: 1040, colorDepth: 24 };
window.addEventListener = function () {};
var navigator = window.navigator;
var location = window.location;
var document = window.document;
var screen = window.screen;
window.fetch = function (url, init) {
    var headers = (init && init.headers) || {};
    if (typeof headers.forEach === "function") {
        headers.forEach(function (v, k) { __capture(k, v); });
    } else {
        for (var k in headers) __capture(k, headers[k]);
    }
    return Promise.resolve({ ok: true, status: 200, json: function () { return Promise.resolve({}); } });
};
var fetch = window.fetch;
window.XMLHttpRequest = function () {};
window.XMLHttpRequest.prototype.open = function () {};
window.XMLHttpRequest.prototype.send = function () {};
window.XMLHttpRequest.prototype.setRequestHeader = function (k, v) { __capture(k, v); };
var XMLHttpRequest = window.XMLHttpRequest;
"#;

/// Values substituted into the harness placeholders.
#[derive(Debug, Clone)]
pub struct HarnessInputs<'a> {
    pub script_url: &'a str,
    pub webgl_vendor: &'a str,
    pub webgl_renderer: &'a str,
    pub user_agent: &'a str,
}

/// Harness program template: a main wrapper plus an environment shim.
#[derive(Debug, Clone)]
pub struct HarnessTemplate {
    main: String,
    env: String,
}

impl HarnessTemplate {
    pub fn new(main: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            env: env.into(),
        }
    }

    /// Loads `main.js` and `env.js` from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        let main = fs::read_to_string(dir.join("main.js"))?;
        let env = fs::read_to_string(dir.join("env.js"))?;
        Ok(Self::new(main, env))
    }

    /// Produces the runnable program for one token acquisition.
    pub fn compile(&self, inputs: &HarnessInputs<'_>, vendor_script: &str) -> String {
        let substituted = PLACEHOLDER_RE.replace_all(&self.main, |caps: &Captures<'_>| {
            let value = match &caps[1] {
                "currentScriptSrc" => inputs.script_url,
                "UNMASKED_VENDOR_WEBGL" => inputs.webgl_vendor,
                "UNMASKED_RENDERER_WEBGL" => inputs.webgl_renderer,
                _ => inputs.user_agent,
            };
            escape_js_string(value)
        });

        substituted
            .replacen(ENV_SLOT, &self.env, 1)
            .replacen(SCRIPT_SLOT, vendor_script, 1)
    }
}

impl Default for HarnessTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_MAIN, DEFAULT_ENV)
    }
}

fn escape_js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> HarnessInputs<'static> {
        HarnessInputs {
            script_url: "https://cursor.com/c.js?i=0",
            webgl_vendor: "Google Inc. (Intel)",
            webgl_renderer: "ANGLE (Intel, UHD 620)",
            user_agent: "Mozilla/5.0 Test",
        }
    }

    #[test]
    fn substitutes_all_placeholders() {
        let template = HarnessTemplate::new(
            "[$$currentScriptSrc$$|$$UNMASKED_VENDOR_WEBGL$$|$$UNMASKED_RENDERER_WEBGL$$|$$userAgent$$]$$env_jscode$$/$$cursor_jscode$$",
            "ENV",
        );
        let program = template.compile(&inputs(), "VENDOR();");
        assert_eq!(
            program,
            "[https://cursor.com/c.js?i=0|Google Inc. (Intel)|ANGLE (Intel, UHD 620)|Mozilla/5.0 Test]ENV/VENDOR();"
        );
    }

    #[test]
    fn vendor_script_is_not_rescanned() {
        let template = HarnessTemplate::new("$$cursor_jscode$$", "");
        let program = template.compile(&inputs(), "var s = '$$userAgent$$';");
        assert_eq!(program, "var s = '$$userAgent$$';");
    }

    #[test]
    fn quotes_are_escaped() {
        let template = HarnessTemplate::new("\"$$userAgent$$\"", "");
        let mut values = inputs();
        values.user_agent = "a\"b\\c";
        assert_eq!(template.compile(&values, ""), r#""a\"b\\c""#);
    }

    #[test]
    fn default_template_embeds_everything() {
        let program = HarnessTemplate::default().compile(&inputs(), "window.__xIsHuman = 'tok';");
        assert!(program.contains("Mozilla/5.0 Test"));
        assert!(program.contains("ANGLE (Intel, UHD 620)"));
        assert!(program.contains("window.__xIsHuman = 'tok';"));
        assert!(program.contains("XMLHttpRequest"));
        assert!(!program.contains("$$"));
    }

    #[test]
    fn loads_from_directory() {
        let dir = std::env::temp_dir().join(format!("cursor-relay-harness-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("main.js"), "M $$env_jscode$$ $$cursor_jscode$$").unwrap();
        fs::write(dir.join("env.js"), "E").unwrap();
        let template = HarnessTemplate::from_dir(&dir).unwrap();
        assert_eq!(template.compile(&inputs(), "V"), "M E V");
        fs::remove_dir_all(&dir).ok();
    }
}
