//! Request shaping and cookie lifecycle.
//!
//! Derives the concrete header set, header ordering, and TLS negotiation
//! parameters from a session's fingerprint profile. The derivation is
//! seeded by the session id, so one session always presents exactly one
//! shape: two requests on the same session are indistinguishable from each
//! other at the fingerprint level.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::modules::fingerprint::{BrowserFamily, FingerprintProfile};

/// Ordered headers plus transport negotiation parameters for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestShape {
    /// Headers in presentation order. Order matters: it is itself a
    /// fingerprintable signal.
    pub headers: Vec<(String, String)>,
    pub alpn: Vec<String>,
    pub ja3: String,
}

impl RequestShape {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Cookie tiers with different rotation treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookieCategory {
    Session,
    Persistent,
    Tracking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub category: CookieCategory,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Per-category rotation probabilities and the realistic age window after
/// which cookies are dropped outright.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pub session_rotation: f64,
    pub persistent_rotation: f64,
    pub tracking_rotation: f64,
    pub max_cookie_age: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            session_rotation: 0.0,
            persistent_rotation: 0.05,
            tracking_rotation: 0.25,
            max_cookie_age: Duration::from_secs(12 * 3600),
        }
    }
}

impl RotationPolicy {
    fn probability_for(&self, category: CookieCategory) -> f64 {
        match category {
            CookieCategory::Session => self.session_rotation,
            CookieCategory::Persistent => self.persistent_rotation,
            CookieCategory::Tracking => self.tracking_rotation,
        }
    }
}

/// Cookie jar bound to one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: HashMap<String, StoredCookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&StoredCookie> {
        self.cookies.get(name)
    }

    pub fn insert(&mut self, cookie: StoredCookie) {
        self.cookies.insert(cookie.name.clone(), cookie);
    }

    /// Merge `set-cookie` values from a response into the jar.
    pub fn merge_response(&mut self, set_cookie_values: &[String]) {
        for raw in set_cookie_values {
            if let Some(cookie) = parse_set_cookie(raw) {
                self.cookies.insert(cookie.name.clone(), cookie);
            }
        }
    }

    /// Prepare the jar for reuse: drop cookies past the age window or their
    /// own expiry, then rotate a category-weighted fraction with fresh
    /// values so no token stays trackable for long while the jar still
    /// looks continuous.
    pub fn prepare_for_reuse(&mut self, policy: &RotationPolicy, rng: &mut StdRng) {
        let now = Utc::now();
        let max_age =
            chrono::Duration::from_std(policy.max_cookie_age).unwrap_or(chrono::Duration::hours(12));

        self.cookies.retain(|_, cookie| {
            if let Some(expiry) = cookie.expires_at
                && expiry <= now
            {
                return false;
            }
            now - cookie.stored_at < max_age
        });

        for cookie in self.cookies.values_mut() {
            let probability = policy.probability_for(cookie.category);
            if probability > 0.0 && rng.gen_bool(probability.clamp(0.0, 1.0)) {
                cookie.value = fresh_token(rng);
                cookie.stored_at = now;
            }
        }
    }

    /// Render the jar as a `cookie` request header value.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut parts: Vec<String> = self
            .cookies
            .values()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        parts.sort();
        Some(parts.join("; "))
    }
}

/// Shapes outbound requests from session identity.
#[derive(Debug, Clone, Default)]
pub struct RequestObfuscator;

impl RequestObfuscator {
    pub fn new() -> Self {
        Self
    }

    /// Derive the request shape for a session. Deterministic in
    /// `(session_id, profile)`: repeated calls yield byte-identical header
    /// order and values.
    pub fn prepare(
        &self,
        session_id: &str,
        profile: &FingerprintProfile,
        jar: &CookieJar,
    ) -> RequestShape {
        let mut rng = StdRng::seed_from_u64(seed_from(session_id));

        let mut headers = Vec::with_capacity(10);
        for &name in header_order(profile.headers.family) {
            let value = match name {
                "user-agent" => profile.headers.user_agent.clone(),
                "accept" => {
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string()
                }
                "accept-language" => profile.headers.accept_language.clone(),
                "accept-encoding" => "gzip, deflate, br".to_string(),
                "sec-ch-ua-platform" => format!("\"{}\"", profile.headers.platform),
                "upgrade-insecure-requests" => "1".to_string(),
                "sec-fetch-site" => "none".to_string(),
                "sec-fetch-mode" => "navigate".to_string(),
                "dnt" => {
                    // A stable per-session coin flip; most users never touch it.
                    if rng.gen_bool(0.2) { "1" } else { "0" }.to_string()
                }
                other => {
                    log::warn!("unknown shaped header {other}");
                    continue;
                }
            };
            headers.push((name.to_string(), value));
        }

        if let Some(cookie_header) = jar.header_value() {
            headers.push(("cookie".to_string(), cookie_header));
        }

        RequestShape {
            headers,
            alpn: profile.tls.alpn.clone(),
            ja3: profile.tls.ja3.clone(),
        }
    }
}

/// Canonical header presentation order per browser family.
fn header_order(family: BrowserFamily) -> &'static [&'static str] {
    match family {
        BrowserFamily::Chrome => &[
            "user-agent",
            "accept",
            "accept-language",
            "accept-encoding",
            "sec-ch-ua-platform",
            "sec-fetch-site",
            "sec-fetch-mode",
            "upgrade-insecure-requests",
            "dnt",
        ],
        BrowserFamily::Firefox => &[
            "user-agent",
            "accept",
            "accept-language",
            "accept-encoding",
            "upgrade-insecure-requests",
            "sec-fetch-site",
            "sec-fetch-mode",
            "dnt",
        ],
        BrowserFamily::Safari => &[
            "user-agent",
            "accept",
            "accept-language",
            "accept-encoding",
            "upgrade-insecure-requests",
            "dnt",
        ],
    }
}

fn seed_from(session_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    hasher.finish()
}

fn fresh_token(rng: &mut StdRng) -> String {
    let token: u128 = rng.r#gen();
    format!("{token:032x}")
}

fn parse_set_cookie(raw: &str) -> Option<StoredCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim().to_string();
    let value = value.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut expires_at = None;
    let mut persistent = false;
    for attr in parts {
        let attr = attr.trim();
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        match key.to_ascii_lowercase().as_str() {
            "max-age" => {
                if let Ok(secs) = val.trim().parse::<i64>() {
                    expires_at = Some(Utc::now() + chrono::Duration::seconds(secs));
                    persistent = true;
                }
            }
            "expires" => {
                if let Ok(parsed) = DateTime::parse_from_rfc2822(val.trim()) {
                    expires_at = Some(parsed.with_timezone(&Utc));
                }
                persistent = true;
            }
            _ => {}
        }
    }

    let category = categorize(&name, persistent);
    Some(StoredCookie {
        name,
        value,
        category,
        stored_at: Utc::now(),
        expires_at,
    })
}

fn categorize(name: &str, persistent: bool) -> CookieCategory {
    let lowered = name.to_ascii_lowercase();
    let tracker = ["_ga", "_gid", "_utm", "_fbp", "track", "visitor"]
        .iter()
        .any(|prefix| lowered.starts_with(prefix) || lowered.contains(prefix));
    if tracker {
        CookieCategory::Tracking
    } else if persistent {
        CookieCategory::Persistent
    } else {
        CookieCategory::Session
    }
}
