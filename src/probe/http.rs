//! HTTP probe implementation.

use std::collections::BTreeMap;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{redirect, Client, Method};
use url::Url;

use super::{ProbeError, ProbeOptions, ProbeResult};

/// User agent sent with every probe request.
pub const PROBE_USER_AGENT: &str = concat!("punch/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by every attempt in a cycle.
pub fn build_http_client(options: &ProbeOptions) -> Result<Client, ProbeError> {
    let policy = if options.follow_redirects {
        redirect::Policy::default()
    } else {
        redirect::Policy::none()
    };

    Client::builder()
        .timeout(options.timeout)
        .danger_accept_invalid_certs(options.insecure)
        .redirect(policy)
        .pool_max_idle_per_host(0)
        .build()
        .map_err(|e| ProbeError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Whether a status code counts as healthy.
///
/// A non-empty `expected` set is authoritative; otherwise 2xx and 3xx pass.
pub fn is_success_code(code: u16, expected: &[u16]) -> bool {
    if expected.is_empty() {
        (200..400).contains(&code)
    } else {
        expected.contains(&code)
    }
}

/// Request headers: user agent, JSON content type for bodies, then caller
/// headers, which override both.
pub fn request_headers(options: &ProbeOptions) -> Result<HeaderMap, ProbeError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(PROBE_USER_AGENT));
    if options.body.is_some() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    for (key, value) in &options.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ProbeError::Config(format!("invalid header name {:?}: {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ProbeError::Config(format!("invalid value for header {}: {}", key, e)))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Run a single HTTP attempt against `url`.
///
/// The body is drained to measure its size; the duration covers the whole
/// request, response, and body read.
pub async fn run_http_probe(
    client: &Client,
    target: &str,
    url: &Url,
    options: &ProbeOptions,
) -> ProbeResult {
    let start = Instant::now();

    let method = match Method::from_bytes(options.method.to_ascii_uppercase().as_bytes()) {
        Ok(m) => m,
        Err(e) => {
            return ProbeResult::failed(
                target,
                ProbeError::Config(format!("invalid method {:?}: {}", options.method, e)),
                start.elapsed(),
            )
        }
    };
    let headers = match request_headers(options) {
        Ok(h) => h,
        Err(e) => return ProbeResult::failed(target, e, start.elapsed()),
    };

    let mut request = client.request(method, url.clone()).headers(headers);
    if let Some(body) = &options.body {
        request = request.body(body.clone());
    }

    let mut response = match request.send().await {
        Ok(r) => r,
        Err(e) => return ProbeResult::failed(target, transport_error(e, options), start.elapsed()),
    };

    let status = response.status();
    let response_headers = collect_headers(response.headers());

    let mut size: u64 = 0;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => size += chunk.len() as u64,
            Ok(None) => break,
            Err(e) => {
                let mut result =
                    ProbeResult::failed(target, transport_error(e, options), start.elapsed());
                result.status_code = Some(status.as_u16());
                result.status = Some(status.to_string());
                result.headers = response_headers;
                return result;
            }
        }
    }

    let duration = start.elapsed();
    tracing::debug!("HTTP {} -> {} ({} bytes, {:?})", url, status, size, duration);

    ProbeResult {
        target: target.to_string(),
        success: is_success_code(status.as_u16(), &options.expected_codes),
        status_code: Some(status.as_u16()),
        status: Some(status.to_string()),
        duration,
        size: Some(size),
        headers: response_headers,
        ..Default::default()
    }
}

fn transport_error(e: reqwest::Error, options: &ProbeOptions) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(options.timeout)
    } else {
        ProbeError::Transport(e.to_string())
    }
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut collected: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        collected
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    collected
}
