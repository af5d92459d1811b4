// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! String and target-normalisation helpers shared across the scan engine.

use encoding_rs::{Encoding, GB18030, UTF_8};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

/// Strip one trailing slash so cache keys for `http://a/` and `http://a`
/// collide.
pub fn remove_trailing_slash(s: &str) -> &str {
    s.strip_suffix('/').unwrap_or(s)
}

/// Join a target root with a rule path, tolerating targets that already
/// carry a path of their own.
pub fn parse_target(target: &str, path: &str) -> String {
    let base = remove_trailing_slash(target.trim());
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Normalise a rule path: leading slash enforced, `^` anchor stripped,
/// spaces and fragments percent-encoded.
pub fn format_path(path: &str) -> String {
    let mut p = path.trim().to_string();
    if let Some(rest) = p.strip_prefix('^') {
        p = format!("/{}", rest);
    }
    if !p.starts_with('/') && !p.is_empty() {
        p = format!("/{}", p);
    }
    p.replace(' ', "%20").replace('#', "%23")
}

/// Decode bytes into UTF-8, honouring an optional charset label and
/// falling back to GB18030 for undeclared legacy pages.
pub fn to_utf8(bytes: &[u8], charset: Option<&str>) -> String {
    if let Some(label) = charset {
        if let Some(enc) = Encoding::for_label(label.trim().as_bytes()) {
            let (text, _, _) = enc.decode(bytes);
            return text.into_owned();
        }
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    let (text, encoding, had_errors) = UTF_8.decode(bytes);
    if !had_errors && encoding == UTF_8 {
        return text.into_owned();
    }
    let (text, _, _) = GB18030.decode(bytes);
    text.into_owned()
}

/// Reverse by character, used by `toUintString(s, "<")`.
pub fn reverse_string(s: &str) -> String {
    s.chars().rev().collect()
}

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random lowercase letters, length `n`.
pub fn random_letters(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| LOWERCASE[rng.gen_range(0..LOWERCASE.len())] as char)
        .collect()
}

/// Random lowercase alphanumerics, length `n`. Used for collaborator
/// subdomains and the default cookie value.
pub fn random_string(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| ALNUM[rng.gen_range(0..ALNUM.len())] as char)
        .collect()
}

/// Random public-looking IPv4 for the X-Forwarded-For header.
pub fn random_ipv4() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}.{}.{}.{}",
        rng.gen_range(1..=223u8),
        rng.gen_range(0..=255u8),
        rng.gen_range(0..=255u8),
        rng.gen_range(1..=254u8)
    )
}

/// Decode a hex payload (`data-type: hex` in tcp/udp rules); bad input is
/// returned unchanged as bytes.
pub fn from_hex(data: &str) -> Vec<u8> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return data.as_bytes().to_vec();
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&cleaned[i..i + 2], 16).unwrap_or(0))
        .collect()
}

static MULTIPART_BARE_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^\r])\n").unwrap());

/// Multipart rule bodies are authored with bare newlines; the wire format
/// requires CRLF pairs.
pub fn normalize_multipart(content_type: &str, body: &str) -> String {
    if !content_type.to_lowercase().starts_with("multipart/form-data") || !body.contains("\n\n") {
        return body.to_string();
    }
    MULTIPART_BARE_NEWLINE.replace_all(body, "${1}\r\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_joins_paths() {
        assert_eq!(parse_target("http://a.com/", "/admin"), "http://a.com/admin");
        assert_eq!(parse_target("http://a.com", "admin"), "http://a.com/admin");
        assert_eq!(parse_target("http://a.com/", ""), "http://a.com");
    }

    #[test]
    fn test_format_path() {
        assert_eq!(format_path("admin"), "/admin");
        assert_eq!(format_path("^console"), "/console");
        assert_eq!(format_path("/a b#c"), "/a%20b%23c");
        assert_eq!(format_path(""), "");
    }

    #[test]
    fn test_to_utf8_gb18030_fallback() {
        // "你好" in GB18030
        let gbk = [0xc4u8, 0xe3, 0xba, 0xc3];
        assert_eq!(to_utf8(&gbk, None), "你好");
        assert_eq!(to_utf8(&gbk, Some("gb18030")), "你好");
        assert_eq!(to_utf8("plain".as_bytes(), None), "plain");
    }

    #[test]
    fn test_from_hex() {
        assert_eq!(from_hex("48656c6c6f"), b"Hello".to_vec());
        assert_eq!(from_hex("zz"), b"zz".to_vec());
    }

    #[test]
    fn test_random_helpers_have_requested_length() {
        assert_eq!(random_letters(12).len(), 12);
        assert_eq!(random_string(15).len(), 15);
        let ip = random_ipv4();
        assert_eq!(ip.split('.').count(), 4);
    }

    #[test]
    fn test_reverse_string_is_char_aware() {
        assert_eq!(reverse_string("ab你"), "你ba");
    }
}
