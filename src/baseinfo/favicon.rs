// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Favicon Hash
 * Icon link extraction from HTML, payload validation and the Mmh3-32
 * hash over wrapped base64
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::network::{HttpClient, RequestOptions};
use crate::types::{HttpRequest, HttpResponse};

/// Recognised icon payload prefixes (hex of the leading bytes): PNG, ICO,
/// GIF, JPEG variants, SVG and XML-prologued SVG.
const FILE_MAGIC_HEX: &[&str] = &[
    "89504e470", "00000100", "474946383", "ffd8ffe00", "ffd8ffe10", "3c7376672", "3c3f786d6",
];

/// Link/meta tags whose href or content may point at an icon, roughly
/// ordered by how often they carry the real favicon.
const ICON_TAGS: &[&str] = &[
    "<link rel=\"icon\"",
    "<link rel='icon'",
    "<link rel=icon",
    "<link rel=\"shortcut icon\"",
    "<link rel=shortcut icon",
    "<link type=\"image/x-icon\"",
    "<link type=image/x-icon",
    "<link rel=\"apple-touch-icon\"",
    "<link rel=\"apple-touch-icon-precomposed\"",
    "<link id=\"favicon\"",
    "<link id=favicon",
    "<link rel=\"fluid-icon\"",
    "<link rel=\"mask-icon\"",
    "<link rel=\"alternate icon\"",
    "<link rel=\"icon shortcut\"",
    "<link rel=icon shortcut",
    "<meta name=\"msapplication-TileImage\"",
    "<meta property=\"og:image\"",
    "<meta itemprop=\"image\"",
    "<meta itemprop=image",
];

static ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:href|content)=["']?([^"'>\s]+)"#).unwrap());
static ICO_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<link[^>]+href=["']([^"']+\.ico)"#).unwrap());
static IMG_ICON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img[^>]+src=["']([^"']+(?:favicon|icon)[^"']*)["']"#).unwrap());
static ANY_IMAGE_HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href=["']([^"']+\.(?:ico|png|jpg|jpeg|gif|svg|webp))["']"#).unwrap());

/// Standard base64 wrapped at 76 columns with a trailing newline; the
/// exact framing the Mmh3-32 favicon convention hashes.
pub fn stand_base64(raw: &[u8]) -> Vec<u8> {
    if raw.is_empty() {
        return Vec::new();
    }
    let encoded = BASE64.encode(raw);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 76 + 2);
    for (i, b) in encoded.bytes().enumerate() {
        out.push(b);
        if (i + 1) % 76 == 0 {
            out.push(b'\n');
        }
    }
    out.push(b'\n');
    out
}

pub fn mmh3_32(data: &[u8]) -> i32 {
    murmur3::murmur3_32(&mut Cursor::new(data), 0).unwrap_or(0) as i32
}

/// Favicon pipeline bound to the probe layer.
pub struct FaviconHasher {
    http: Arc<HttpClient>,
    proxy: String,
}

impl FaviconHasher {
    pub fn new(http: Arc<HttpClient>, proxy: &str) -> Self {
        Self {
            http,
            proxy: proxy.to_string(),
        }
    }

    /// Fill in `icon_hash` on a response when it is eligible: the base
    /// request was `GET`, targeted the root, and the answer is HTML.
    pub async fn enrich(&self, request: &HttpRequest, response: &mut HttpResponse) {
        if request.method != "GET" {
            return;
        }
        let path = request.url.path.as_str();
        if !(path.is_empty() || path == "/") {
            return;
        }
        if !response.content_type.to_lowercase().contains("text/html") {
            return;
        }
        let page_url = response.url.to_url_string();
        let html = String::from_utf8_lossy(&response.body);
        let icon_url = extract_icon_url(&page_url, &html);
        debug!("favicon candidate for {}: {}", page_url, icon_url);
        response.icon_hash = self.run(&icon_url, &page_url).await;
    }

    /// Hash an icon URL, falling back to `/favicon.ico` when the primary
    /// candidate yields nothing. The result is the decimal rendering of
    /// the Mmh3-32 value, "0" when no icon was retrievable.
    pub async fn run(&self, icon_url: &str, page_url: &str) -> String {
        let mut hash = 0i32;
        if !icon_url.is_empty() {
            hash = self.hash_icon(icon_url).await;
        }
        if hash == 0 {
            if let Some(fallback) = default_icon_url(page_url) {
                if fallback != icon_url {
                    hash = self.hash_icon(&fallback).await;
                }
            }
        }
        hash.to_string()
    }

    async fn hash_icon(&self, icon_url: &str) -> i32 {
        if let Some(data_part) = icon_url.strip_prefix("data:") {
            return hash_data_url(data_part);
        }

        let options = RequestOptions {
            proxy: self.proxy.clone(),
            timeout: Duration::from_secs(5),
            retries: 1,
            follow_redirects: true,
            max_redirects: 1,
            ..Default::default()
        };
        let (_, resp) = match self.http.send("GET", icon_url, "", &options).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!("favicon fetch failed for {}: {}", icon_url, e);
                return 0;
            }
        };
        if resp.status != 200 || resp.body.is_empty() {
            return 0;
        }
        if !is_image_payload(&resp.content_type, &resp.body) {
            return 0;
        }
        mmh3_32(&stand_base64(&resp.body))
    }
}

fn hash_data_url(data_part: &str) -> i32 {
    let Some((_, b64)) = data_part.split_once(',') else {
        return 0;
    };
    // '+' characters survive URL extraction as %20; undo that first.
    let b64 = b64.replace("%20", "+");
    match BASE64.decode(b64.as_bytes()) {
        Ok(bytes) => mmh3_32(&stand_base64(&bytes)),
        Err(e) => {
            debug!("data-url base64 decode failed: {}", e);
            0
        }
    }
}

/// Accept payloads the server labels as images, or whose leading bytes
/// match a known icon format.
fn is_image_payload(content_type: &str, body: &[u8]) -> bool {
    if content_type.to_lowercase().starts_with("image") {
        return true;
    }
    let head: String = body
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect();
    FILE_MAGIC_HEX.iter().any(|m| head.starts_with(m))
}

fn default_icon_url(page_url: &str) -> Option<String> {
    let u = url::Url::parse(page_url).ok()?;
    Some(format!(
        "{}://{}/favicon.ico",
        u.scheme(),
        u.host_str().unwrap_or_default()
    ))
}

/// Pick the most likely icon URL out of a page, `.ico` candidates first,
/// falling back to `/favicon.ico`.
pub fn extract_icon_url(page_url: &str, html: &str) -> String {
    let Ok(parsed) = url::Url::parse(page_url) else {
        return String::new();
    };
    let base_url = format!("{}://{}/", parsed.scheme(), parsed.host_str().unwrap_or_default());

    // Case folding must not shift byte offsets; fall back to the raw
    // text when lowercasing changes the length.
    let html_lower = html.to_lowercase();
    let haystack: &str = if html_lower.len() == html.len() {
        &html_lower
    } else {
        html
    };
    let mut candidates: Vec<String> = Vec::new();

    for tag in ICON_TAGS {
        let mut start = 0;
        while let Some(idx) = haystack.get(start..).and_then(|h| h.find(tag)) {
            let tag_start = start + idx;
            let rest = match html.get(tag_start..) {
                Some(r) => r,
                None => break,
            };
            if let Some(end_off) = rest.find('>') {
                let tag_text = &rest[..end_off];
                if let Some(caps) = ATTR_RE.captures(tag_text) {
                    let path = caps[1].to_string();
                    if is_image_path(&path)
                        || tag_text.contains("icon")
                        || tag_text.contains("favicon")
                        || tag_text.contains("logo")
                        || tag_text.contains("image")
                    {
                        candidates.push(path);
                    }
                }
            }
            start = tag_start + 1;
            if start >= haystack.len() {
                break;
            }
        }
    }

    if candidates.is_empty() {
        for caps in ICO_LINK_RE.captures_iter(html) {
            candidates.push(caps[1].to_string());
        }
    }
    for caps in IMG_ICON_RE.captures_iter(html) {
        candidates.push(caps[1].to_string());
    }
    if candidates.is_empty() {
        for caps in ANY_IMAGE_HREF_RE.captures_iter(html) {
            candidates.push(caps[1].to_string());
        }
    }

    // Dedup on the query-stripped form, keeping the first original.
    let mut seen: Vec<(String, String)> = Vec::new();
    for icon in &candidates {
        let cleaned = match url::Url::parse(icon) {
            Ok(mut u) => {
                u.set_query(None);
                u.to_string()
            }
            Err(_) => icon.split('?').next().unwrap_or(icon).to_string(),
        };
        if !seen.iter().any(|(c, _)| *c == cleaned) {
            seen.push((cleaned, icon.clone()));
        }
    }
    // `.ico` candidates outrank everything else; otherwise keep order.
    seen.sort_by_key(|(cleaned, _)| !cleaned.to_lowercase().ends_with(".ico"));

    for (_, icon) in &seen {
        if let Some(abs) = build_absolute_url(&parsed, &base_url, icon) {
            return normalize_favicon_url(&abs);
        }
    }

    normalize_favicon_url(&format!("{}favicon.ico", base_url))
}

fn build_absolute_url(parsed: &url::Url, base_url: &str, icon_path: &str) -> Option<String> {
    if icon_path.is_empty() {
        return None;
    }
    if icon_path.starts_with("http://") || icon_path.starts_with("https://") || icon_path.starts_with("data:") {
        return Some(icon_path.to_string());
    }
    if let Some(rest) = icon_path.strip_prefix("//") {
        return Some(format!("{}://{}", parsed.scheme(), rest));
    }
    if let Ok(abs) = parsed.join(icon_path) {
        return Some(abs.to_string());
    }
    if let Some(rest) = icon_path.strip_prefix('/') {
        return Some(format!("{}{}", base_url, rest));
    }
    None
}

fn normalize_favicon_url(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let mut result = raw.to_string();

    // Collapse duplicate slashes after the scheme.
    for scheme in ["http://", "https://"] {
        let stripped = result.strip_prefix(scheme).map(|r| r.replace("//", "/"));
        if let Some(rest) = stripped {
            result = format!("{}{}", scheme, rest);
        }
    }

    result = result
        .replace(' ', "%20")
        .replace('"', "%22")
        .replace('\'', "%27")
        .replace('<', "%3C")
        .replace('>', "%3E");

    if let Some(idx) = result.find('#') {
        result.truncate(idx);
    }

    if !result.starts_with("http://") && !result.starts_with("https://") && !result.starts_with("data:") {
        let rest = result.strip_prefix("//").map(|r| r.to_string());
        result = match rest {
            Some(r) => format!("https://{}", r),
            None => format!("https://{}", result),
        };
    }
    result
}

fn is_image_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    [".ico", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stand_base64_wraps_at_76() {
        let data = vec![b'x'; 100];
        let wrapped = stand_base64(&data);
        let text = String::from_utf8(wrapped).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0].len(), 76);
        assert!(text.ends_with('\n'));
        assert!(stand_base64(&[]).is_empty());
    }

    #[test]
    fn test_hash_is_stable() {
        let payload = b"\x89PNG\r\n\x1a\nfake icon";
        let a = mmh3_32(&stand_base64(payload));
        let b = mmh3_32(&stand_base64(payload));
        assert_eq!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn test_extract_prefers_ico_links() {
        let html = r#"
            <head>
            <link rel="apple-touch-icon" href="/img/touch.png">
            <link rel="icon" href="/static/fav.ico?v=3">
            </head>"#;
        let got = extract_icon_url("http://example.com/", html);
        assert_eq!(got, "http://example.com/static/fav.ico?v=3");
    }

    #[test]
    fn test_extract_falls_back_to_default() {
        let got = extract_icon_url("https://example.com/", "<html><body>nothing</body></html>");
        assert_eq!(got, "https://example.com/favicon.ico");
    }

    #[test]
    fn test_extract_resolves_relative_and_protocol_urls() {
        let html = r#"<link rel="icon" href="//cdn.example.net/f.ico">"#;
        let got = extract_icon_url("https://example.com/app/", html);
        assert_eq!(got, "https://cdn.example.net/f.ico");

        let html = r#"<link rel="icon" href="assets/f.ico">"#;
        let got = extract_icon_url("https://example.com/app/", html);
        assert_eq!(got, "https://example.com/app/assets/f.ico");
    }

    #[test]
    fn test_image_payload_validation() {
        assert!(is_image_payload("image/x-icon", b"anything"));
        assert!(is_image_payload("text/plain", b"\x89PNG\r\n\x1a\n"));
        assert!(is_image_payload("", b"<svg xmlns=..."));
        assert!(!is_image_payload("text/html", b"<html>"));
    }

    #[test]
    fn test_data_url_hash() {
        let b64 = BASE64.encode(b"\x00\x00\x01\x00icon");
        let h = hash_data_url(&format!("image/x-icon;base64,{}", b64));
        assert_ne!(h, 0);
        assert_eq!(hash_data_url("image/png;base64,!!!"), 0);
    }
}
