//! Vendor rate-limit header relay.
//!
//! OpenAI sends `x-ratelimit-limit-requests` and friends; Anthropic sends
//! `anthropic-ratelimit-requests-limit`. Both are read into
//! [`RateLimitInfo`] and written back to clients under the OpenAI names.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::canonical::RateLimitInfo;

/// `(normalized name, anthropic name)` per field.
const HEADER_NAMES: [(&str, &str); 6] = [
    ("x-ratelimit-limit-requests", "anthropic-ratelimit-requests-limit"),
    ("x-ratelimit-remaining-requests", "anthropic-ratelimit-requests-remaining"),
    ("x-ratelimit-reset-requests", "anthropic-ratelimit-requests-reset"),
    ("x-ratelimit-limit-tokens", "anthropic-ratelimit-tokens-limit"),
    ("x-ratelimit-remaining-tokens", "anthropic-ratelimit-tokens-remaining"),
    ("x-ratelimit-reset-tokens", "anthropic-ratelimit-tokens-reset"),
];

fn slot(info: &mut RateLimitInfo, i: usize) -> &mut Option<String> {
    match i {
        0 => &mut info.limit_requests,
        1 => &mut info.remaining_requests,
        2 => &mut info.reset_requests,
        3 => &mut info.limit_tokens,
        4 => &mut info.remaining_tokens,
        _ => &mut info.reset_tokens,
    }
}

fn value(info: &RateLimitInfo, i: usize) -> Option<&str> {
    match i {
        0 => info.limit_requests.as_deref(),
        1 => info.remaining_requests.as_deref(),
        2 => info.reset_requests.as_deref(),
        3 => info.limit_tokens.as_deref(),
        4 => info.remaining_tokens.as_deref(),
        _ => info.reset_tokens.as_deref(),
    }
}

/// Read rate-limit state from upstream headers, whichever naming the vendor
/// uses. `None` when the vendor sent none.
pub fn extract(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let mut info = RateLimitInfo::default();

    for (i, (openai, anthropic)) in HEADER_NAMES.iter().enumerate() {
        let found = headers
            .get(*openai)
            .or_else(|| headers.get(*anthropic))
            .and_then(|v| v.to_str().ok());
        if let Some(found) = found {
            *slot(&mut info, i) = Some(found.to_string());
        }
    }

    (!info.is_empty()).then_some(info)
}

/// Write `info` onto a client response under the normalized names.
pub fn apply(info: &RateLimitInfo, headers: &mut HeaderMap) {
    for (i, (name, _)) in HEADER_NAMES.iter().enumerate() {
        let Some(v) = value(info, i) else {
            continue;
        };
        match HeaderValue::from_str(v) {
            Ok(header_value) => {
                headers.insert(HeaderName::from_static(name), header_value);
            }
            Err(_) => tracing::debug!(header = %name, "Skipping non-ASCII rate-limit header"),
        }
    }
}
