//! Response classification.
//!
//! Pattern-based identification of what the target actually sent back:
//! results, a confirmed empty result set, a block page, or an interactive
//! challenge. Classification is deliberately pessimistic; an unrecognized
//! page is treated as a soft block rather than a negative result.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::external_deps::challenge::{ChallengeDescriptor, ChallengeKind};

/// Response context handed to the classifier.
#[derive(Debug, Clone)]
pub struct ReplyContext<'a> {
    pub url: &'a Url,
    pub status: u16,
    pub body: &'a str,
}

/// What the reply turned out to be.
#[derive(Debug, Clone)]
pub enum Classification {
    /// Result markup present. Carries the raw payload for the caller.
    Success { raw_payload: String },
    /// The target explicitly reported an empty result set.
    NotFound,
    /// Block page, rate limit, or an unrecognizable page.
    Detected { reason: String },
    /// Interactive verification required before results are served.
    Challenged(ChallengeDescriptor),
}

static BLOCK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"access denied",
        r"unusual traffic from your (computer|network)",
        r"automated (requests|queries|access)",
        r"your (request|ip) has been blocked",
        r"you are being rate limited",
        r"suspicious activity",
    ]
    .iter()
    .map(|pattern| build_regex(pattern))
    .collect()
});

static CHALLENGE_PATTERNS: Lazy<Vec<(Regex, ChallengeKind)>> = Lazy::new(|| {
    vec![
        (
            build_regex(r#"class="(g-recaptcha|cf-turnstile|h-captcha)""#),
            ChallengeKind::Interactive,
        ),
        (
            build_regex(r"(verify|prove) (that )?you('| a)re (a )?human"),
            ChallengeKind::Interactive,
        ),
        (
            build_regex(r"complete the (security check|captcha)"),
            ChallengeKind::Interactive,
        ),
        (
            build_regex(r"checking your browser before accessing"),
            ChallengeKind::JavaScript,
        ),
        (
            build_regex(r#"<noscript>.*enable javascript.*</noscript>"#),
            ChallengeKind::JavaScript,
        ),
    ]
});

static NOT_FOUND_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"no (results|records|matches) (were )?found",
        r"your search (did not|didn't) (match|return)",
        r"0 results for",
        r#"<div[^>]*class="[^"]*empty-results[^"]*""#,
    ]
    .iter()
    .map(|pattern| build_regex(pattern))
    .collect()
});

static RESULT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"<(div|section|ul)[^>]*(id|class)="[^"]*(search-)?results?[^"]*""#,
        r#"<table[^>]*class="[^"]*(records|people|matches)[^"]*""#,
        r#""results"\s*:\s*\["#,
    ]
    .iter()
    .map(|pattern| build_regex(pattern))
    .collect()
});

static SITE_KEY: Lazy<Regex> =
    Lazy::new(|| build_regex(r#"data-sitekey="([0-9A-Za-z_-]{20,})""#));

/// Classify one reply. Order matters: challenge markers outrank block
/// markers because a challenge page often contains both.
pub fn classify(reply: &ReplyContext<'_>) -> Classification {
    if let Some(kind) = detect_challenge(reply.body) {
        let mut descriptor = ChallengeDescriptor::new(kind, reply.url.clone());
        if let Some(captures) = SITE_KEY.captures(reply.body)
            && let Some(site_key) = captures.get(1)
        {
            descriptor = descriptor.with_site_key(site_key.as_str());
        }
        return Classification::Challenged(descriptor);
    }

    if matches!(reply.status, 403 | 429)
        || reply.status == 503
        || BLOCK_PATTERNS
            .iter()
            .any(|pattern| pattern.is_match(reply.body))
    {
        return Classification::Detected {
            reason: format!("block signature (status {})", reply.status),
        };
    }

    if NOT_FOUND_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(reply.body))
    {
        return Classification::NotFound;
    }

    if reply.status < 300
        && RESULT_PATTERNS
            .iter()
            .any(|pattern| pattern.is_match(reply.body))
    {
        return Classification::Success {
            raw_payload: reply.body.to_string(),
        };
    }

    // A page that looks like nothing we know is a soft block: the target
    // may serve deliberately empty markup to suspected bots, and reading
    // that as "person not found" would be a false negative.
    Classification::Detected {
        reason: format!("unrecognized page (status {})", reply.status),
    }
}

fn detect_challenge(body: &str) -> Option<ChallengeKind> {
    CHALLENGE_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(body))
        .map(|(_, kind)| *kind)
}

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid detection regex `{}`: {}", pattern, err))
}
