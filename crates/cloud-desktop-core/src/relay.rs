//! HTTP Relay
//!
//! Executes HTTP requests on behalf of the unprivileged UI, attaching the
//! shared cookie jar on the way out and capturing `Set-Cookie` on the way back.
//!
//! # Flow (one call)
//!
//! 1. Read cookies in scope for the URL
//! 2. Apply caller headers, then the jar-derived `Cookie` header (jar wins)
//! 3. Send once (no retry, no relay-imposed timeout)
//! 4. Upsert every `Set-Cookie` into the jar; store failures are logged only
//! 5. On a redirect, repeat 1-4 against the `Location` target
//! 6. Read the whole body of the final response and decode it by `content-type`
//!
//! Redirects are followed here rather than by the HTTP client so every hop
//! reads from and writes to the jar. 301/302 turn a POST into a GET, 303
//! turns anything into a GET, 307/308 replay method and body. Caller
//! `Authorization` and `Cookie` headers are dropped when a redirect changes
//! host.

use crate::cookie::parse_set_cookie;
use crate::cookie_jar::{CookieStore, CookieStoreError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    LOCATION, SET_COOKIE,
};
use reqwest::redirect::Policy;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Request as described by the caller
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    /// Header name → value, in caller order
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Normalized response returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub status_code: u16,
    pub headers: BTreeMap<String, HeaderField>,
    pub data: Value,
}

/// A response header: single value, or every value of a repeated header
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HeaderField {
    One(String),
    Many(Vec<String>),
}

impl HeaderField {
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderField::One(v) => Some(v),
            HeaderField::Many(vs) => vs.first().map(String::as_str),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid method '{0}'")]
    InvalidMethod(String),
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
    #[error("cookie lookup failed: {0}")]
    CookieStore(#[from] CookieStoreError),
    #[error("HTTP client unavailable: {0}")]
    Client(String),
    #[error("too many redirects (last: {0})")]
    TooManyRedirects(String),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

impl RelayError {
    /// Stable error code for the RPC boundary
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidUrl { .. }
            | RelayError::InvalidMethod(_)
            | RelayError::InvalidHeader(_) => "INVALID_REQUEST",
            RelayError::CookieStore(_) => "COOKIE_STORE_ERROR",
            RelayError::Client(_) => "HTTP_CLIENT_ERROR",
            RelayError::TooManyRedirects(_) | RelayError::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}

const MAX_REDIRECTS: usize = 10;

/// Cookie-aware HTTP relay
pub struct Relay {
    client: Client,
    cookies: Arc<dyn CookieStore>,
}

impl Relay {
    pub fn new(cookies: Arc<dyn CookieStore>) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .redirect(Policy::none())
            .build()
            .map_err(|e| RelayError::Client(e.to_string()))?;
        Ok(Self { client, cookies })
    }

    pub fn cookies(&self) -> &Arc<dyn CookieStore> {
        &self.cookies
    }

    /// Execute a single request
    ///
    /// Only transport failures (and malformed requests) are errors; a non-2xx
    /// status is a normal envelope.
    pub fn execute(&self, request: &RequestDescriptor) -> Result<ResponseEnvelope, RelayError> {
        let mut url = parse_target(&request.url)?;
        let mut method = parse_method(request.method.as_deref())?;
        let mut headers = caller_headers(&request.headers)?;
        let mut body = request.body.clone();
        let mut redirects = 0;

        let response = loop {
            let response = self.send_hop(&method, &url, &headers, body.as_deref())?;
            self.capture_cookies(&url, response.headers());

            let Some(next) = redirect_target(&url, &response) else {
                break response;
            };
            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(RelayError::TooManyRedirects(next.to_string()));
            }

            let status = response.status();
            if status == StatusCode::SEE_OTHER
                || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
                    && method == Method::POST)
            {
                method = Method::GET;
                body = None;
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            if next.host_str() != url.host_str() {
                headers.remove(AUTHORIZATION);
                headers.remove(COOKIE);
            }

            tracing::debug!(
                op = "core.http.redirect",
                status = status.as_u16(),
                from = %url,
                to = %next,
                "Following redirect"
            );
            url = next;
        };

        let status_code = response.status().as_u16();
        let response_headers = collect_headers(response.headers());

        let bytes = response.bytes().map_err(|e| {
            tracing::warn!(op = "core.http.transport_error", url = %url, error = %e, "Body read failed");
            RelayError::Transport(e)
        })?;

        let content_type = response_headers
            .get(CONTENT_TYPE.as_str())
            .and_then(HeaderField::first);
        let data = decode_body(content_type, &bytes);

        tracing::info!(
            op = "core.http.response",
            method = %method,
            url = %url,
            status = status_code,
            redirects = redirects,
            bytes = bytes.len(),
            "Relay complete"
        );

        Ok(ResponseEnvelope {
            status_code,
            headers: response_headers,
            data,
        })
    }

    /// One request/response exchange with the jar's cookies for `url`
    fn send_hop(
        &self,
        method: &Method,
        url: &Url,
        caller: &HeaderMap,
        body: Option<&str>,
    ) -> Result<Response, RelayError> {
        let mut headers = caller.clone();

        let jar_cookies = self.cookies.get(url)?;
        if !jar_cookies.is_empty() {
            let cookie_header = jar_cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            // Jar-derived cookies replace any caller-supplied Cookie header
            let value = HeaderValue::from_str(&cookie_header)
                .map_err(|_| RelayError::InvalidHeader(COOKIE.to_string()))?;
            headers.insert(COOKIE, value);
        }

        tracing::info!(
            op = "core.http.request",
            method = %method,
            url = %url,
            cookies = jar_cookies.len(),
            "Relaying request"
        );

        let mut builder = self.client.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }

        builder.send().map_err(|e| {
            tracing::warn!(op = "core.http.transport_error", url = %url, error = %e, "Request failed");
            RelayError::Transport(e)
        })
    }

    /// Upsert each Set-Cookie independently; never fails the call
    fn capture_cookies(&self, url: &Url, headers: &HeaderMap) {
        let now = Utc::now();
        for raw in headers.get_all(SET_COOKIE) {
            let raw = String::from_utf8_lossy(raw.as_bytes());
            let Some(record) = parse_set_cookie(&raw, now) else {
                tracing::debug!(op = "core.cookie.skipped", url = %url, "Skipping malformed Set-Cookie");
                continue;
            };
            let name = record.name.clone();
            if let Err(e) = self.cookies.upsert(url, record) {
                tracing::warn!(
                    op = "core.cookie.set_failed",
                    url = %url,
                    cookie = %name,
                    error = %e,
                    "Failed to set cookie"
                );
            }
        }
    }
}

/// Next URL when `response` is a followable redirect with a usable `Location`
fn redirect_target(current: &Url, response: &Response) -> Option<Url> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let next = current.join(location.trim()).ok()?;
    matches!(next.scheme(), "http" | "https").then_some(next)
}

fn parse_target(raw: &str) -> Result<Url, RelayError> {
    let url = Url::parse(raw).map_err(|e| RelayError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

fn parse_method(raw: Option<&str>) -> Result<Method, RelayError> {
    let raw = raw.map(str::trim).filter(|m| !m.is_empty()).unwrap_or("GET");
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| RelayError::InvalidMethod(raw.to_string()))
}

/// Caller headers, last write wins for names differing only in case
fn caller_headers(raw: &Map<String, Value>) -> Result<HeaderMap, RelayError> {
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RelayError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(&value).map_err(|_| RelayError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Response headers keyed by lower-case name; Set-Cookie is always a list
fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, HeaderField> {
    let mut out = BTreeMap::new();
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();

        let field = if *name == SET_COOKIE || values.len() > 1 {
            HeaderField::Many(values)
        } else {
            match values.into_iter().next() {
                Some(v) => HeaderField::One(v),
                None => continue,
            }
        };
        out.insert(name.as_str().to_string(), field);
    }
    out
}

/// Decode a body by content type
///
/// - `application/json` → parsed JSON, falling back to the raw string
/// - `image/*` → `data:{content-type};base64,...`
/// - anything else → UTF-8 string
pub fn decode_body(content_type: Option<&str>, bytes: &[u8]) -> Value {
    match content_type {
        Some(ct) if ct.contains("application/json") => serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
        Some(ct) if ct.contains("image/") => {
            Value::String(format!("data:{};base64,{}", ct, BASE64.encode(bytes)))
        }
        _ => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
