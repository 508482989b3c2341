//! `x-bare-*` header encoding.
//!
//! Remote headers travel as a JSON object inside a single request/response
//! header. Values longer than [`MAX_HEADER_VALUE`] are split across
//! `<name>-0`, `<name>-1`, … each prefixed with `;`.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::bare::error::BareError;

pub const X_BARE_URL: &str = "x-bare-url";
pub const X_BARE_HEADERS: &str = "x-bare-headers";
pub const X_BARE_FORWARD_HEADERS: &str = "x-bare-forward-headers";
pub const X_BARE_PASS_HEADERS: &str = "x-bare-pass-headers";
pub const X_BARE_PASS_STATUS: &str = "x-bare-pass-status";
pub const X_BARE_STATUS: &str = "x-bare-status";
pub const X_BARE_STATUS_TEXT: &str = "x-bare-status-text";

pub const MAX_HEADER_VALUE: usize = 3072;

/// Client headers always forwarded to the remote.
pub const DEFAULT_FORWARD_HEADERS: &[&str] = &[
    "accept-encoding",
    "accept-language",
    "sec-websocket-extensions",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Remote headers always copied onto the relay response.
pub const DEFAULT_PASS_HEADERS: &[&str] = &["content-encoding", "content-length", "last-modified"];

pub const CACHE_FORWARD_HEADERS: &[&str] = &["if-modified-since", "if-none-match", "cache-control"];
pub const CACHE_PASS_HEADERS: &[&str] = &["cache-control", "etag"];
pub const CACHE_PASS_STATUS: &[u16] = &[304];

pub(crate) const FORBIDDEN_FORWARD_HEADERS: &[&str] = &["connection", "transfer-encoding", "host", "origin", "referer"];

const FORBIDDEN_PASS_HEADERS: &[&str] = &[
    "vary",
    "connection",
    "transfer-encoding",
    "access-control-allow-headers",
    "access-control-allow-methods",
    "access-control-expose-headers",
    "access-control-max-age",
    "access-control-request-headers",
    "access-control-request-method",
];

/// Headers the relay must never copy to the outbound request.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "host",
];

/// A header value in the JSON form: single or repeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderField {
    One(String),
    Many(Vec<String>),
}

pub type BareHeaders = BTreeMap<String, HeaderField>;

/// Permissive cross-origin headers for every relay response.
pub fn apply_cors(headers: &mut HeaderMap) {
    for name in [
        "access-control-allow-origin",
        "access-control-allow-headers",
        "access-control-allow-methods",
        "access-control-expose-headers",
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static("*"));
    }
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("7200"),
    );
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, BareError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| BareError::invalid(name, "Header value is not valid text.")),
    }
}

/// Read a possibly split header, joining `<name>-N` parts when needed.
pub fn read_joined(headers: &HeaderMap, name: &str) -> Result<Option<String>, BareError> {
    if let Some(value) = header_str(headers, name)? {
        return Ok(Some(value.to_string()));
    }

    let mut joined = String::new();
    let mut index = 0;
    while let Some(part) = header_str(headers, &format!("{name}-{index}"))? {
        let part = part
            .strip_prefix(';')
            .ok_or_else(|| BareError::invalid(&format!("{name}-{index}"), "Value didn't begin with semi-colon."))?;
        joined.push_str(part);
        index += 1;
    }

    Ok((index > 0).then_some(joined))
}

/// Write a header, splitting it when the value is too long.
pub fn write_split(headers: &mut HeaderMap, name: &str, value: &str) {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= MAX_HEADER_VALUE {
        insert(headers, name, value);
        return;
    }
    for (index, chunk) in chars.chunks(MAX_HEADER_VALUE).enumerate() {
        let part: String = std::iter::once(';').chain(chunk.iter().copied()).collect();
        insert(headers, &format!("{name}-{index}"), &part);
    }
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = %name, "Dropping unencodable relay header"),
    }
}

/// Parse the required `x-bare-headers` object.
pub fn parse_bare_headers(headers: &HeaderMap) -> Result<BareHeaders, BareError> {
    let raw = read_joined(headers, X_BARE_HEADERS)?.ok_or_else(|| BareError::missing(X_BARE_HEADERS))?;
    serde_json::from_str(&raw)
        .map_err(|e| BareError::invalid(X_BARE_HEADERS, format!("Header contained invalid JSON. ({e})")))
}

/// Parse an optional JSON array of header names, lowercased.
pub fn parse_name_list(headers: &HeaderMap, name: &str) -> Result<Vec<String>, BareError> {
    let Some(raw) = header_str(headers, name)? else {
        return Ok(Vec::new());
    };
    let names: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| BareError::invalid(name, format!("Header contained invalid JSON. ({e})")))?;
    Ok(names.into_iter().map(|n| n.to_ascii_lowercase()).collect())
}

/// Parse an optional JSON array of status codes.
pub fn parse_status_list(headers: &HeaderMap, name: &str) -> Result<Vec<u16>, BareError> {
    let Some(raw) = header_str(headers, name)? else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw)
        .map_err(|e| BareError::invalid(name, format!("Header contained invalid JSON. ({e})")))
}

/// Names the client asked to forward, with forbidden ones rejected.
pub fn forward_list(headers: &HeaderMap, cache: bool) -> Result<Vec<String>, BareError> {
    let mut names = parse_name_list(headers, X_BARE_FORWARD_HEADERS)?;
    if let Some(bad) = names.iter().find(|n| FORBIDDEN_FORWARD_HEADERS.contains(&n.as_str())) {
        return Err(BareError::forbidden(
            X_BARE_FORWARD_HEADERS,
            format!("A forbidden header was passed: {bad}"),
        ));
    }
    names.extend(DEFAULT_FORWARD_HEADERS.iter().map(|s| s.to_string()));
    if cache {
        names.extend(CACHE_FORWARD_HEADERS.iter().map(|s| s.to_string()));
    }
    Ok(names)
}

/// Names of remote headers to copy, with forbidden ones rejected.
pub fn pass_list(headers: &HeaderMap, cache: bool) -> Result<Vec<String>, BareError> {
    let mut names = parse_name_list(headers, X_BARE_PASS_HEADERS)?;
    if let Some(bad) = names.iter().find(|n| FORBIDDEN_PASS_HEADERS.contains(&n.as_str())) {
        return Err(BareError::forbidden(
            X_BARE_PASS_HEADERS,
            format!("A forbidden header was passed: {bad}"),
        ));
    }
    names.extend(DEFAULT_PASS_HEADERS.iter().map(|s| s.to_string()));
    if cache {
        names.extend(CACHE_PASS_HEADERS.iter().map(|s| s.to_string()));
    }
    Ok(names)
}

/// Convert the JSON form into outbound request headers.
pub fn to_header_map(bare: &BareHeaders) -> Result<HeaderMap, BareError> {
    let mut map = HeaderMap::new();
    for (name, field) in bare {
        if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        let header_name = HeaderName::try_from(name.as_str())
            .map_err(|_| BareError::invalid(X_BARE_HEADERS, format!("Invalid header name: {name}")))?;
        let values = match field {
            HeaderField::One(value) => std::slice::from_ref(value),
            HeaderField::Many(values) => values.as_slice(),
        };
        for value in values {
            let value = HeaderValue::from_str(value).map_err(|_| {
                BareError::invalid(X_BARE_HEADERS, format!("Invalid value for header: {name}"))
            })?;
            map.append(header_name.clone(), value);
        }
    }
    Ok(map)
}

/// Convert remote response headers into the JSON form.
pub fn from_header_map(headers: &HeaderMap) -> BareHeaders {
    let mut bare = BareHeaders::new();
    for name in headers.keys() {
        let mut values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        let field = if values.len() == 1 {
            HeaderField::One(values.remove(0))
        } else {
            HeaderField::Many(values)
        };
        bare.insert(name.as_str().to_string(), field);
    }
    bare
}
