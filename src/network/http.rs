// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - HTTP Probe Layer
 * Canonical request/response probing with proxy support, manual
 * redirect handling, retries and resource-bounded body reads
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tracing::debug;

use crate::errors::NetworkError;
use crate::str_utils::{random_ipv4, random_string};
use crate::types::{HttpRequest, HttpResponse, UrlRecord};

/// Response bodies are read through this cap; evaluator-visible bytes
/// never exceed it.
pub const MAX_BODY_SIZE: usize = 512 * 1024;

/// Per-proxy client cache bound. The whole cache is reset when it grows
/// past this.
const MAX_CLIENTS: usize = 100;

const MAX_REDIRECTS: usize = 5;

const RETRY_GAP: Duration = Duration::from_secs(2);

const DEFAULT_ACCEPT: &str = "application/x-shockwave-flash, image/gif, image/x-xbitmap, \
image/jpeg, image/pjpeg, application/vnd.ms-excel, application/vnd.ms-powerpoint, \
application/msword, */*";

/// Realistic browser User-Agents across a browser/platform matrix.
const BROWSER_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Chrome on macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Chrome on Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    // Firefox on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    // Firefox on Linux
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0",
    // Safari on macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

pub fn random_user_agent() -> &'static str {
    let i = rand::thread_rng().gen_range(0..BROWSER_USER_AGENTS.len());
    BROWSER_USER_AGENTS[i]
}

/// Per-request options threaded down from the rule being evaluated.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub proxy: String,
    pub timeout: Duration,
    pub retries: u32,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub insecure_skip_verify: bool,
    pub custom_headers: HashMap<String, String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            proxy: String::new(),
            timeout: Duration::from_secs(5),
            retries: 2,
            follow_redirects: true,
            max_redirects: MAX_REDIRECTS,
            insecure_skip_verify: true,
            custom_headers: HashMap::new(),
        }
    }
}

/// HTTP probe service. One reqwest client is built per proxy URL and
/// reused; connection keep-alive is disabled so responses cannot be
/// correlated across probes under high fan-out.
pub struct HttpClient {
    clients: RwLock<HashMap<String, reqwest::Client>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Periodic cache maintenance; resets the per-proxy client map once
    /// it outgrows the cap. Run by the orchestrator on a 5-minute tick.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(300));
            tick.tick().await;
            loop {
                tick.tick().await;
                this.maintain();
            }
        })
    }

    pub fn maintain(&self) {
        let mut clients = self.clients.write();
        if clients.len() > MAX_CLIENTS {
            debug!("transport cache over {} entries, resetting", MAX_CLIENTS);
            clients.clear();
        }
    }

    /// Drop every cached client, closing their idle connections.
    pub fn reset(&self) {
        self.clients.write().clear();
    }

    fn client_for(&self, proxy: &str, insecure: bool) -> Result<reqwest::Client, NetworkError> {
        let key = format!("{}|{}", proxy, insecure);
        if let Some(c) = self.clients.read().get(&key) {
            return Ok(c.clone());
        }

        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .min_tls_version(reqwest::tls::Version::TLS_1_0)
            .redirect(reqwest::redirect::Policy::none())
            // Connection reuse off: every probe gets a fresh connection.
            .pool_max_idle_per_host(0)
            .tcp_nodelay(true);

        if !proxy.is_empty() {
            let p = reqwest::Proxy::all(proxy).map_err(|e| NetworkError::Protocol {
                url: proxy.to_string(),
                reason: format!("invalid proxy: {}", e),
            })?;
            builder = builder.proxy(p);
        }

        let client = builder.build().map_err(|e| NetworkError::Protocol {
            url: proxy.to_string(),
            reason: format!("client build failed: {}", e),
        })?;

        let mut clients = self.clients.write();
        if clients.len() >= MAX_CLIENTS {
            clients.clear();
        }
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Issue a probe and build the canonical request/response records.
    ///
    /// Retries apply only to connect and timeout failures, with a fixed
    /// 2 s gap between attempts.
    pub async fn send(
        &self,
        method: &str,
        url: &str,
        body: &str,
        options: &RequestOptions,
    ) -> Result<(HttpRequest, HttpResponse), NetworkError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(method, url, body, options).await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < options.retries => {
                    attempt += 1;
                    debug!("retrying {} (attempt {}): {}", url, attempt, e);
                    tokio::time::sleep(RETRY_GAP).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        method: &str,
        url: &str,
        body: &str,
        options: &RequestOptions,
    ) -> Result<(HttpRequest, HttpResponse), NetworkError> {
        let client = self.client_for(&options.proxy, options.insecure_skip_verify)?;

        let mut current_url = url::Url::parse(url).map_err(|e| NetworkError::Protocol {
            url: url.to_string(),
            reason: format!("invalid url: {}", e),
        })?;
        let mut current_method =
            Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET);
        let mut current_body = body.to_string();
        let mut harvested_cookies: Vec<String> = Vec::new();
        let mut hops = 0usize;

        loop {
            let headers = self.build_headers(&current_method, options, &harvested_cookies);

            let mut builder = client
                .request(current_method.clone(), current_url.clone())
                .headers(headers)
                .timeout(options.timeout);
            if !current_body.is_empty() {
                builder = builder.body(current_body.clone());
            }

            let request = builder.build().map_err(|e| NetworkError::Protocol {
                url: current_url.to_string(),
                reason: e.to_string(),
            })?;
            let request_record =
                build_request_record(&current_method, &current_url, request.headers(), &current_body);

            let start = Instant::now();
            let resp = client.execute(request).await.map_err(|e| {
                NetworkError::from_reqwest(e, current_url.as_str(), options.timeout)
            })?;
            let latency_ms = start.elapsed().as_millis() as i64;

            if resp.status().is_redirection() && options.follow_redirects {
                if let Some(location) = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    hops += 1;
                    if hops > options.max_redirects {
                        return Err(NetworkError::RedirectLimit {
                            url: url.to_string(),
                            max_redirects: options.max_redirects,
                        });
                    }

                    // Cookies from every hop ride along on the follow-up.
                    for sc in resp.headers().get_all(reqwest::header::SET_COOKIE) {
                        if let Ok(v) = sc.to_str() {
                            if let Some(pair) = v.split(';').next() {
                                harvested_cookies.push(pair.trim().to_string());
                            }
                        }
                    }

                    let next = current_url.join(location).map_err(|e| NetworkError::Protocol {
                        url: current_url.to_string(),
                        reason: format!("bad redirect location {:?}: {}", location, e),
                    })?;
                    // Browsers demote the method on legacy redirects.
                    let code = resp.status().as_u16();
                    if (code == 301 || code == 302 || code == 303)
                        && current_method != Method::GET
                        && current_method != Method::HEAD
                    {
                        current_method = Method::GET;
                        current_body.clear();
                    }
                    debug!("redirect {} -> {}", current_url, next);
                    current_url = next;
                    continue;
                }
            }

            let response_record =
                read_response_record(resp, &current_url, latency_ms, options.timeout).await?;
            return Ok((request_record, response_record));
        }
    }

    fn build_headers(
        &self,
        method: &Method,
        options: &RequestOptions,
        harvested_cookies: &[String],
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut cookie = format!("cookie={}", random_string(15));
        for c in harvested_cookies {
            cookie.push_str("; ");
            cookie.push_str(c);
        }

        let defaults: [(&str, String); 7] = [
            ("User-Agent", random_user_agent().to_string()),
            ("Accept", DEFAULT_ACCEPT.to_string()),
            ("X-Forwarded-For", random_ipv4()),
            ("Pragma", "no-cache".to_string()),
            ("Cache-Control", "no-cache".to_string()),
            ("Cookie", cookie),
            ("Connection", "close".to_string()),
        ];
        for (name, value) in defaults {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(n, v);
            }
        }

        if *method == Method::POST && !options.custom_headers.contains_key("Content-Type") {
            headers.insert(
                reqwest::header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
        }

        for (name, value) in &options.custom_headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(n, v);
            }
        }
        headers
    }

    /// Resolve the scheme of a scheme-less target by HEAD-probing
    /// https:// first, then http://. Targets that already carry a scheme
    /// pass through untouched.
    pub async fn check_protocol(
        &self,
        target: &str,
        proxy: &str,
    ) -> Result<String, NetworkError> {
        let trimmed = target.trim();
        if trimmed.is_empty() {
            return Err(NetworkError::Protocol {
                url: target.to_string(),
                reason: "empty target".to_string(),
            });
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(trimmed.to_string());
        }

        let port = url::Url::parse(&format!("http://{}", trimmed))
            .ok()
            .and_then(|u| u.port());

        let candidates: Vec<String> = match port {
            Some(80) => vec![format!("http://{}", trimmed)],
            Some(443) => vec![format!("https://{}", trimmed)],
            _ => vec![
                format!("https://{}", trimmed),
                format!("http://{}", trimmed),
            ],
        };

        let options = RequestOptions {
            proxy: proxy.to_string(),
            timeout: Duration::from_secs(3),
            retries: 0,
            follow_redirects: false,
            ..Default::default()
        };
        let mut last_err = None;
        for candidate in &candidates {
            match self.send_once("HEAD", candidate, "", &options).await {
                Ok(_) => return Ok(candidate.clone()),
                Err(e) => {
                    debug!("protocol probe {} failed: {}", candidate, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(NetworkError::Protocol {
            url: target.to_string(),
            reason: "no scheme resolved".to_string(),
        }))
    }
}

fn build_request_record(
    method: &Method,
    url: &url::Url,
    headers: &HeaderMap,
    body: &str,
) -> HttpRequest {
    let mut header_map = HashMap::with_capacity(headers.len());
    let mut raw_header = String::new();
    for (name, value) in headers {
        let v = value.to_str().unwrap_or_default();
        header_map.insert(name.as_str().to_string(), v.to_string());
        raw_header.push_str(name.as_str());
        raw_header.push_str(": ");
        raw_header.push_str(v);
        raw_header.push('\n');
    }
    let raw_header = raw_header.trim_end().to_string();

    let content_type = header_map
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    let raw = format!(
        "{} {} HTTP/1.1\nHost: {}\n{}\n\n{}",
        method,
        url.path(),
        url.host_str().unwrap_or_default(),
        raw_header,
        body
    );

    HttpRequest {
        method: method.to_string(),
        url: UrlRecord::from_url(url),
        headers: header_map,
        content_type,
        body: body.as_bytes().to_vec(),
        raw: raw.into_bytes(),
        raw_header: raw_header.into_bytes(),
    }
}

async fn read_response_record(
    resp: reqwest::Response,
    url: &url::Url,
    latency_ms: i64,
    timeout: Duration,
) -> Result<HttpResponse, NetworkError> {
    let status = resp.status().as_u16() as i32;
    let version = format!("{:?}", resp.version());

    let mut headers = HashMap::with_capacity(resp.headers().len());
    let mut raw_header = format!("{} {}\n", version, resp.status());
    for (name, value) in resp.headers() {
        let v = value.to_str().unwrap_or_default();
        headers.insert(name.as_str().to_lowercase(), v.to_string());
        raw_header.push_str(name.as_str());
        raw_header.push_str(": ");
        raw_header.push_str(v);
        raw_header.push('\n');
    }
    let raw_header = raw_header.trim_end().to_string();
    let content_type = headers.get("content-type").cloned().unwrap_or_default();

    let body = read_capped_body(resp, url, timeout).await?;

    let mut raw = Vec::with_capacity(raw_header.len() + 2 + body.len());
    raw.extend_from_slice(raw_header.as_bytes());
    raw.extend_from_slice(b"\n\n");
    raw.extend_from_slice(&body);

    Ok(HttpResponse {
        status,
        url: UrlRecord::from_url(url),
        headers,
        content_type,
        body,
        raw,
        raw_header: raw_header.into_bytes(),
        latency_ms,
        icon_hash: String::new(),
    })
}

async fn read_capped_body(
    mut resp: reqwest::Response,
    url: &url::Url,
    timeout: Duration,
) -> Result<Vec<u8>, NetworkError> {
    let mut body: Vec<u8> = Vec::new();
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = MAX_BODY_SIZE - body.len();
                if chunk.len() >= remaining {
                    body.extend_from_slice(&chunk[..remaining]);
                    return Ok(body);
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => return Ok(body),
            Err(e) => {
                // A truncated body is still usable for matching.
                debug!("body read ended early for {}: {}", url, e);
                if body.is_empty() {
                    return Err(NetworkError::from_reqwest(e, url.as_str(), timeout));
                }
                return Ok(body);
            }
        }
    }
}
