// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Server banner parsing: product and version out of the `Server` header.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{HttpResponse, ServerInfo};

static SLASH_VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d+(\.\d+)*)").unwrap());
static PAREN_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(.*?(\d+\.\d+(\.\d+)*).*?\)").unwrap());
static ANY_VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.\d+(\.\d+)?)").unwrap());
static PAREN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").unwrap());

/// Version recognisers applied in order: `name/ver`, `(… ver …)`, then
/// any bare `d.d(.d)?`.
pub fn extract_version(server: &str) -> String {
    if let Some(caps) = SLASH_VERSION_RE.captures(server) {
        return caps[1].to_string();
    }
    if let Some(caps) = PAREN_VERSION_RE.captures(server) {
        return caps[1].to_string();
    }
    if let Some(caps) = ANY_VERSION_RE.captures(server) {
        return caps[1].to_string();
    }
    String::new()
}

fn clean_server_string(server: &str) -> String {
    let no_parens = PAREN_RE.replace_all(server, "");
    no_parens
        .trim()
        .replace("powered by ", "")
        .replace("running on ", "")
}

/// Parse the `Server` header into `(original, product, version)`.
pub fn extract_server_info(server_value: &str) -> ServerInfo {
    if server_value.is_empty() {
        return ServerInfo::default();
    }

    let version = extract_version(server_value);
    let mut product = clean_server_string(server_value);
    if !version.is_empty() {
        product = product.replace(&format!("/{}", version), "");
    }
    let product = product.trim().to_string();

    ServerInfo::new(server_value, &product, &version)
}

pub fn server_info_from_response(response: &HttpResponse) -> ServerInfo {
    match response.header("server") {
        Some(banner) => extract_server_info(banner),
        None => ServerInfo::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_version() {
        let info = extract_server_info("nginx/1.18.0");
        assert_eq!(info.original, "nginx/1.18.0");
        assert_eq!(info.product, "nginx");
        assert_eq!(info.version, "1.18.0");
    }

    #[test]
    fn test_parenthesised_version() {
        let info = extract_server_info("Apache (2.4.41)");
        assert_eq!(info.product, "Apache");
        assert_eq!(info.version, "2.4.41");
    }

    #[test]
    fn test_os_suffix_stripped() {
        let info = extract_server_info("Apache/2.4.41 (Ubuntu)");
        assert_eq!(info.product, "Apache");
        assert_eq!(info.version, "2.4.41");
        assert_eq!(info.original, "Apache/2.4.41 (Ubuntu)");
    }

    #[test]
    fn test_bare_version() {
        let info = extract_server_info("lighttpd 1.4");
        assert_eq!(info.version, "1.4");
    }

    #[test]
    fn test_versionless_banner() {
        let info = extract_server_info("cloudflare");
        assert_eq!(info.product, "cloudflare");
        assert_eq!(info.version, "");
    }

    #[test]
    fn test_missing_header() {
        let resp = HttpResponse::placeholder(200);
        assert_eq!(server_info_from_response(&resp), ServerInfo::default());
    }
}
