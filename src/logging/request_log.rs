//! Privacy-safe request/response records.
//!
//! A [`RequestLog`] keeps the method, a redacted endpoint and an allow-listed
//! subset of headers. Path segments and query values are cut down to their
//! first few characters, and credential-bearing headers are replaced by a
//! fixed mask. The records are only ever used for logging.

use std::borrow::Cow;
use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{REDACTION_MASK, REDACTION_VISIBLE_CHARS};

/// Headers that may appear in a logged request (compared case-insensitively).
const LOGGED_HEADERS: &[&str] = &[
    "accept",
    "accept-charset",
    "authorization",
    "set-cookie",
    "access-control-expose-headers",
    "date",
    "location",
    "request-id",
    "strict-transport-security",
    "vary",
    "accept-ranges",
    "age",
    "connection",
    "content-length",
    "content-type",
    "etag",
    "last-modified",
    "server",
    "via",
    "x-amz-cf-id",
    "x-amz-cf-pop",
    "x-amz-meta-user",
    "x-cache",
    "sec-websocket-key",
    "sec-websocket-accept",
];

/// Allow-listed headers whose value is replaced by [`REDACTION_MASK`].
const MASKED_HEADERS: &[&str] = &[
    "authorization",
    "set-cookie",
    "sec-websocket-key",
    "sec-websocket-accept",
];

/// Redacted record of an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLog {
    /// HTTP method (`GET` for WebSocket upgrades).
    pub method: String,
    /// Host plus truncated path and redacted query.
    pub endpoint: String,
    /// Allow-listed headers, sensitive values masked.
    pub headers: BTreeMap<String, String>,
}

impl RequestLog {
    /// Build a record from raw request parts.
    pub fn new<'a, I>(method: &str, url: &Url, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let headers = headers
            .into_iter()
            .filter_map(|(name, value)| {
                let lower = name.to_ascii_lowercase();
                if !LOGGED_HEADERS.contains(&lower.as_str()) {
                    return None;
                }
                let value = if MASKED_HEADERS.contains(&lower.as_str()) {
                    REDACTION_MASK.to_string()
                } else {
                    value.to_string()
                };
                Some((name.to_string(), value))
            })
            .collect();

        Self {
            method: method.to_string(),
            endpoint: endpoint_description(url),
            headers,
        }
    }

    /// Build a record from a prepared reqwest request.
    pub fn from_reqwest(request: &reqwest::Request) -> Self {
        let headers: Vec<(&str, &str)> = request
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
            .collect();
        Self::new(request.method().as_str(), request.url(), headers)
    }
}

/// Redacted record of a received response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseLog {
    /// Host plus truncated path and redacted query.
    pub endpoint: String,
    /// HTTP status code.
    pub status: u16,
}

impl ResponseLog {
    /// Build a record for a response to `url`.
    pub fn new(url: &Url, status: u16) -> Self {
        Self {
            endpoint: endpoint_description(url),
            status,
        }
    }
}

/// Describe `url` for logs: `host/seg/seg?key=val`.
///
/// Each path segment keeps [`REDACTION_VISIBLE_CHARS`] characters and each
/// query value is redacted to at most that many. Components are
/// percent-decoded first, so the cut never lands inside an escape.
pub fn endpoint_description(url: &Url) -> String {
    let mut endpoint = url.host_str().unwrap_or_default().to_string();

    let path: Vec<String> = url
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| truncated(&decoded(segment), REDACTION_VISIBLE_CHARS))
        .collect();
    if !path.is_empty() {
        if !endpoint.is_empty() {
            endpoint.push('/');
        }
        endpoint.push_str(&path.join("/"));
    }

    if let Some(query) = url.query() {
        let items: Vec<String> = query
            .split('&')
            .map(|item| match item.split_once('=') {
                Some((key, value)) => format!(
                    "{}={}",
                    decoded(key),
                    redacted_and_truncated(&decoded(value), REDACTION_VISIBLE_CHARS)
                ),
                None => decoded(item).into_owned(),
            })
            .collect();
        endpoint.push('?');
        endpoint.push_str(&items.join("&"));
    }

    endpoint
}

fn decoded(component: &str) -> Cow<'_, str> {
    percent_decode_str(component).decode_utf8_lossy()
}

/// Keep the first `visible` characters and append one `*` per hidden
/// character, capped at `visible` stars.
pub fn truncated(value: &str, visible: usize) -> String {
    let count = value.chars().count();
    let fill = count.saturating_sub(visible).min(visible);
    let mut out: String = value.chars().take(visible).collect();
    out.push_str(&"*".repeat(fill));
    out
}

/// Like [`truncated`], but values no longer than `visible` are fully starred.
pub fn redacted_and_truncated(value: &str, visible: usize) -> String {
    let count = value.chars().count();
    if count <= visible {
        "*".repeat(count)
    } else {
        truncated(value, visible)
    }
}
