// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Core Data Types
 * Wire-level request/response records, base info and scan results
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rules::model::Fingerprint;
use crate::techdetect::TechStack;

/// Decomposed URL carried on request/response records.
///
/// `host` includes the port when one is present, `domain` never does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub scheme: String,
    pub domain: String,
    pub host: String,
    pub port: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl UrlRecord {
    pub fn from_url(u: &url::Url) -> Self {
        Self {
            scheme: u.scheme().to_string(),
            domain: u.host_str().unwrap_or_default().to_string(),
            host: match u.port() {
                Some(p) => format!("{}:{}", u.host_str().unwrap_or_default(), p),
                None => u.host_str().unwrap_or_default().to_string(),
            },
            port: u.port().map(|p| p.to_string()).unwrap_or_default(),
            path: u.path().to_string(),
            query: u.query().unwrap_or_default().to_string(),
            fragment: u.fragment().unwrap_or_default().to_string(),
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        url::Url::parse(s).ok().map(|u| Self::from_url(&u))
    }

    /// Reassemble the textual form. Used when a `set` variable evaluates
    /// to a URL value and is substituted into a path or body.
    pub fn to_url_string(&self) -> String {
        let mut out = format!("{}://{}{}", self.scheme, self.host, self.path);
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query);
        }
        if !self.fragment.is_empty() {
            out.push('#');
            out.push_str(&self.fragment);
        }
        out
    }
}

/// Canonical record of a request as it went out on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: UrlRecord,
    /// Header names as sent; last writer wins on duplicates.
    pub headers: HashMap<String, String>,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Serialised wire form of the whole request.
    pub raw: Vec<u8>,
    /// Headers exactly as they appeared on the wire.
    pub raw_header: Vec<u8>,
}

/// Canonical record of a response.
///
/// `body` is capped at 512 KiB by the probe layer before this record is
/// built, so evaluator-visible bytes never exceed that bound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: i32,
    pub url: UrlRecord,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub content_type: String,
    pub body: Vec<u8>,
    pub raw: Vec<u8>,
    pub raw_header: Vec<u8>,
    pub latency_ms: i64,
    /// Mmh3-32 of the favicon, serialised as a decimal string. Empty when
    /// no favicon was resolved for this response.
    pub icon_hash: String,
}

impl HttpResponse {
    pub fn placeholder(status: i32) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Out-of-band interaction handle produced by `newReverse()` / `newJNDI()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reverse {
    pub url: UrlRecord,
    pub domain: String,
    pub ip: String,
    pub is_domain_name_server: bool,
}

/// Parsed `Server` banner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub original: String,
    pub product: String,
    pub version: String,
}

impl ServerInfo {
    pub fn new(original: &str, product: &str, version: &str) -> Self {
        Self {
            original: original.to_string(),
            product: product.to_string(),
            version: version.to_string(),
        }
    }
}

/// Per-target facts gathered before any rule runs.
#[derive(Debug, Clone, Default)]
pub struct BaseInfo {
    pub title: String,
    pub server: ServerInfo,
    pub status_code: i32,
}

/// A fingerprint that matched a target, with the probe snapshot captured
/// at match time.
#[derive(Debug, Clone)]
pub struct FingerMatch {
    pub finger: Arc<Fingerprint>,
    pub result: bool,
    pub request: Option<HttpRequest>,
    pub response: Option<HttpResponse>,
}

/// Final per-target result published to the output sinks.
///
/// Heavy fields (`matches[].request/response`, `last_request`,
/// `last_response`) are released after output fan-out to keep steady-state
/// memory bounded.
#[derive(Debug, Clone, Default)]
pub struct TargetResult {
    pub url: String,
    pub status_code: i32,
    pub title: String,
    pub server: ServerInfo,
    pub matches: Vec<FingerMatch>,
    pub technologies: Option<TechStack>,
    pub last_request: Option<HttpRequest>,
    pub last_response: Option<HttpResponse>,
}

impl TargetResult {
    pub fn empty(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Drop the request/response payloads once they have been written out.
    pub fn release_heavy_fields(&mut self) {
        for m in &mut self.matches {
            m.request = None;
            m.response = None;
        }
        self.last_request = None;
        self.last_response = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_record_decomposition() {
        let u = UrlRecord::from_str("https://example.com:8443/admin/login?x=1#frag").unwrap();
        assert_eq!(u.scheme, "https");
        assert_eq!(u.domain, "example.com");
        assert_eq!(u.host, "example.com:8443");
        assert_eq!(u.port, "8443");
        assert_eq!(u.path, "/admin/login");
        assert_eq!(u.query, "x=1");
        assert_eq!(u.fragment, "frag");
    }

    #[test]
    fn test_url_record_default_port_omitted() {
        let u = UrlRecord::from_str("http://example.com/").unwrap();
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, "");
        assert_eq!(u.to_url_string(), "http://example.com/");
    }

    #[test]
    fn test_response_header_lookup_is_lowercased() {
        let mut r = HttpResponse::placeholder(200);
        r.headers.insert("server".into(), "nginx/1.18.0".into());
        assert_eq!(r.header("Server"), Some("nginx/1.18.0"));
        assert_eq!(r.header("SERVER"), Some("nginx/1.18.0"));
    }

    #[test]
    fn test_release_heavy_fields() {
        let mut result = TargetResult::empty("http://t");
        result.last_response = Some(HttpResponse::placeholder(200));
        result.release_heavy_fields();
        assert!(result.last_response.is_none());
    }
}
