//! HTTP relay: one client request in, one remote request out.
//!
//! # Design Decisions
//! - Hostnames resolve through the destination policy inside the client,
//!   so the checked addresses are the dialed ones
//! - IP-literal URLs never reach a resolver and are checked up front

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use url::{Host, Url};

use crate::bare::error::BareError;
use crate::bare::headers::{
    apply_cors, forward_list, from_header_map, parse_bare_headers, parse_status_list, pass_list,
    to_header_map, write_split, CACHE_PASS_STATUS, X_BARE_HEADERS, X_BARE_PASS_STATUS, X_BARE_STATUS,
    X_BARE_STATUS_TEXT, X_BARE_URL,
};
use crate::config::BareConfig;
use crate::net::DestinationPolicy;
use crate::observability::metrics;

/// Forwards described requests to their remote and wraps the answer.
#[derive(Debug, Clone)]
pub struct Relay {
    client: reqwest::Client,
    policy: DestinationPolicy,
    timeout: Duration,
    max_body_bytes: usize,
}

impl Relay {
    pub fn new(config: &BareConfig, policy: DestinationPolicy) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .dns_resolver(Arc::new(policy.clone()))
            .build()?;
        Ok(Self {
            client,
            policy,
            timeout,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Relay a `v3` request.
    pub async fn forward(&self, req: Request<Body>) -> Result<Response, BareError> {
        let start = Instant::now();
        let result = self.forward_inner(req).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) if e.status().is_client_error() => "rejected",
            Err(_) => "remote_error",
        };
        metrics::record_bare_request(outcome, start);
        result
    }

    async fn forward_inner(&self, req: Request<Body>) -> Result<Response, BareError> {
        let (parts, body) = req.into_parts();
        let cache = wants_cache(parts.uri.query());

        let remote = remote_url(&parts.headers)?;
        if let Some(ip) = literal_ip(&remote) {
            self.policy.check(ip)?;
        }
        let mut outbound = to_header_map(&parse_bare_headers(&parts.headers)?)?;
        for name in forward_list(&parts.headers, cache)? {
            if let Some(value) = parts.headers.get(name.as_str()) {
                if let Ok(name) = HeaderName::try_from(name.as_str()) {
                    outbound.insert(name, value.clone());
                }
            }
        }
        let pass_headers = pass_list(&parts.headers, cache)?;
        let mut pass_status = parse_status_list(&parts.headers, X_BARE_PASS_STATUS)?;
        if cache {
            pass_status.extend_from_slice(CACHE_PASS_STATUS);
        }

        tracing::debug!(method = %parts.method, remote = %remote, "Relaying request");

        let mut builder = self
            .client
            .request(parts.method.clone(), remote.clone())
            .headers(outbound);
        if parts.method != Method::GET && parts.method != Method::HEAD {
            let bytes = axum::body::to_bytes(body, self.max_body_bytes)
                .await
                .map_err(|_| BareError::BodyTooLarge)?;
            if !bytes.is_empty() {
                builder = builder.body(bytes);
            }
        }

        let remote_response = match tokio::time::timeout(self.timeout, builder.send()).await {
            Err(_) => return Err(BareError::ConnectionTimeout),
            Ok(Err(e)) => {
                tracing::debug!(remote = %remote, error = %e, "Remote request failed");
                return Err(BareError::from(e));
            }
            Ok(Ok(response)) => response,
        };

        let remote_status = remote_response.status();
        let status = if pass_status.contains(&remote_status.as_u16()) {
            remote_status
        } else {
            StatusCode::OK
        };

        let mut headers = HeaderMap::new();
        apply_cors(&mut headers);
        write_split(&mut headers, X_BARE_STATUS, remote_status.as_str());
        write_split(&mut headers, X_BARE_STATUS_TEXT, &status_text(remote_status));
        let encoded = serde_json::to_string(&from_header_map(remote_response.headers()))
            .map_err(|e| BareError::Unknown(e.to_string()))?;
        write_split(&mut headers, X_BARE_HEADERS, &encoded);
        for name in &pass_headers {
            let Ok(header) = HeaderName::try_from(name.as_str()) else {
                continue;
            };
            for value in remote_response.headers().get_all(&header) {
                headers.append(header.clone(), value.clone());
            }
        }

        let mut response = Response::new(Body::from_stream(remote_response.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// `?cache` opts the request into conditional-request passthrough.
fn wants_cache(query: Option<&str>) -> bool {
    query
        .map(|q| q.split('&').any(|pair| pair == "cache" || pair.starts_with("cache=")))
        .unwrap_or(false)
}

/// Reason phrase, or the numeric code for statuses without one.
fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string())
}

/// The destination address when the URL names one directly.
fn literal_ip(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        Host::Domain(_) => None,
    }
}

/// The required absolute http(s) destination.
fn remote_url(headers: &HeaderMap) -> Result<Url, BareError> {
    let raw = headers
        .get(X_BARE_URL)
        .ok_or_else(|| BareError::missing(X_BARE_URL))?
        .to_str()
        .map_err(|_| BareError::invalid(X_BARE_URL, "Header value is not valid text."))?;
    let url = Url::parse(raw).map_err(|e| BareError::invalid(X_BARE_URL, format!("Invalid URL. ({e})")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(BareError::invalid(
            X_BARE_URL,
            format!("Invalid protocol '{other}'. Only http and https are relayed."),
        )),
    }
}
