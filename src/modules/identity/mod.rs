//! Browser-like request header generation.
//!
//! Every call picks a fresh browser template; nothing is remembered between
//! calls, ports, or hostnames.

use http::header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use once_cell::sync::Lazy;
use rand::Rng;
use rand::seq::SliceRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserType {
    Chrome,
    Firefox,
    Safari,
    Edge,
    MobileChrome,
    MobileSafari,
}

impl BrowserType {
    pub const ALL: [BrowserType; 6] = [
        BrowserType::Chrome,
        BrowserType::Firefox,
        BrowserType::Safari,
        BrowserType::Edge,
        BrowserType::MobileChrome,
        BrowserType::MobileSafari,
    ];

    fn is_chromium(self) -> bool {
        matches!(self, BrowserType::Chrome | BrowserType::Edge | BrowserType::MobileChrome)
    }
}

struct IdentityTemplate {
    browser: BrowserType,
    user_agents: &'static [&'static str],
    accept: &'static str,
    accept_languages: &'static [&'static str],
    accept_encoding: &'static str,
    platform: &'static str,
    mobile: bool,
}

static TEMPLATES: Lazy<Vec<IdentityTemplate>> = Lazy::new(|| {
    vec![
        IdentityTemplate {
            browser: BrowserType::Chrome,
            user_agents: &[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            ],
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
            accept_languages: &["en-US,en;q=0.9", "en-GB,en;q=0.9", "en-US,en;q=0.9,de;q=0.8"],
            accept_encoding: "gzip, deflate, br",
            platform: "\"Windows\"",
            mobile: false,
        },
        IdentityTemplate {
            browser: BrowserType::Edge,
            user_agents: &[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
            ],
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
            accept_languages: &["en-US,en;q=0.9"],
            accept_encoding: "gzip, deflate, br",
            platform: "\"Windows\"",
            mobile: false,
        },
        IdentityTemplate {
            browser: BrowserType::Firefox,
            user_agents: &[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
                "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
            ],
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            accept_languages: &["en-US,en;q=0.5", "en-GB,en;q=0.7,fr;q=0.3"],
            accept_encoding: "gzip, deflate, br",
            platform: "",
            mobile: false,
        },
        IdentityTemplate {
            browser: BrowserType::Safari,
            user_agents: &[
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
            ],
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            accept_languages: &["en-US,en;q=0.9", "en-AU,en;q=0.9"],
            accept_encoding: "gzip, deflate, br",
            platform: "",
            mobile: false,
        },
        IdentityTemplate {
            browser: BrowserType::MobileChrome,
            user_agents: &[
                "Mozilla/5.0 (Linux; Android 14; Pixel 8 Pro) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
                "Mozilla/5.0 (Linux; Android 13; SM-S911B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Mobile Safari/537.36",
            ],
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            accept_languages: &["en-US,en;q=0.9", "es-ES,es;q=0.9,en;q=0.8"],
            accept_encoding: "gzip, deflate, br",
            platform: "\"Android\"",
            mobile: true,
        },
        IdentityTemplate {
            browser: BrowserType::MobileSafari,
            user_agents: &[
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
            ],
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            accept_languages: &["en-US,en;q=0.9", "ja-JP,ja;q=0.9,en;q=0.8"],
            accept_encoding: "gzip, deflate, br",
            platform: "",
            mobile: true,
        },
    ]
});

/// Produces a plausible browser header set on every call.
#[derive(Debug, Clone, Default)]
pub struct HeaderIdentityGenerator {
    browsers: Option<Vec<BrowserType>>,
}

impl HeaderIdentityGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts generation to the given browser families.
    pub fn with_browsers(mut self, browsers: impl IntoIterator<Item = BrowserType>) -> Self {
        let browsers: Vec<_> = browsers.into_iter().collect();
        self.browsers = (!browsers.is_empty()).then_some(browsers);
        self
    }

    pub fn generate(&self) -> HeaderMap {
        let mut rng = rand::thread_rng();
        let candidates: Vec<&IdentityTemplate> = TEMPLATES
            .iter()
            .filter(|t| {
                self.browsers
                    .as_ref()
                    .map(|allowed| allowed.contains(&t.browser))
                    .unwrap_or(true)
            })
            .collect();
        let template = candidates
            .choose(&mut rng)
            .copied()
            .unwrap_or(&TEMPLATES[0]);

        let mut headers = HeaderMap::new();
        let user_agent = template.user_agents.choose(&mut rng).copied().unwrap_or_default();
        let accept_language = template
            .accept_languages
            .choose(&mut rng)
            .copied()
            .unwrap_or("en-US,en;q=0.9");

        headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
        headers.insert(ACCEPT, HeaderValue::from_static(template.accept));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(accept_language));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(template.accept_encoding));
        headers.insert(
            HeaderName::from_static("upgrade-insecure-requests"),
            HeaderValue::from_static("1"),
        );

        if template.browser.is_chromium() {
            headers.insert(
                HeaderName::from_static("sec-ch-ua-mobile"),
                HeaderValue::from_static(if template.mobile { "?1" } else { "?0" }),
            );
            if !template.platform.is_empty() {
                headers.insert(
                    HeaderName::from_static("sec-ch-ua-platform"),
                    HeaderValue::from_static(template.platform),
                );
            }
        }

        if rng.gen_bool(0.5) {
            headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));
        }

        headers
    }

    /// Generated identity overlaid with caller headers; caller values win.
    pub fn merge(&self, overrides: &HeaderMap) -> HeaderMap {
        let mut headers = self.generate();
        for name in overrides.keys() {
            headers.remove(name);
        }
        for (name, value) in overrides.iter() {
            headers.append(name.clone(), value.clone());
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_core_browser_headers() {
        let headers = HeaderIdentityGenerator::new().generate();
        assert!(headers.contains_key(USER_AGENT));
        assert!(headers.contains_key(ACCEPT));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
        assert!(
            headers[USER_AGENT]
                .to_str()
                .unwrap()
                .starts_with("Mozilla/5.0")
        );
    }

    #[test]
    fn caller_headers_win_on_conflict() {
        let mut overrides = HeaderMap::new();
        overrides.insert(USER_AGENT, HeaderValue::from_static("custom-agent/1.0"));
        overrides.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("abc"),
        );
        let merged = HeaderIdentityGenerator::new().merge(&overrides);
        assert_eq!(merged.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(merged[USER_AGENT], "custom-agent/1.0");
        assert_eq!(merged["x-api-key"], "abc");
        assert!(merged.contains_key(ACCEPT));
    }

    #[test]
    fn restricted_generator_only_emits_allowed_browsers() {
        let generator = HeaderIdentityGenerator::new().with_browsers([BrowserType::Firefox]);
        for _ in 0..20 {
            let headers = generator.generate();
            assert!(headers[USER_AGENT].to_str().unwrap().contains("Firefox"));
            assert!(!headers.contains_key("sec-ch-ua-mobile"));
        }
    }
}
