// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Title Extraction
 * Charset-aware <title> extraction with document.title and i18n
 * bundle refinement
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::network::{HttpClient, RequestOptions};
use crate::str_utils::to_utf8;
use crate::types::HttpResponse;

static CHARSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)charset=["']?([\w-]+)["']?"#).unwrap());
static META_CHARSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<meta\s+[^>]*?charset=["']?([\w-]+)["']?[^>]*?>"#).unwrap());
static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static DOM_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)document\.title.*?=.*?\((.*?)\)").unwrap());
static I18N_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)type="text/javascript".*?src="(.*?)""#).unwrap());
static I18N_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""top\.login\.title": "(.*?)","#).unwrap());

/// Fragments that disqualify a JS-assigned title as real content.
const INVALID_DOM_TITLE_MARKERS: &[&str] =
    &["title", ".title", "top.", ".login", "=", "||", "''", "null"];

/// Extract the page title from a base response, decoding the body to
/// UTF-8 first and optionally chasing an i18n bundle for the real login
/// title.
pub async fn get_title(http: &Arc<HttpClient>, proxy: &str, url: &str, response: &HttpResponse) -> String {
    let body_text = decode_body(response);

    let mut title = TITLE_RE
        .captures(&body_text)
        .map(|c| clean_title(&c[1]))
        .unwrap_or_default();

    // A script-assigned document.title wins when the static title is a
    // template shell and the assignment looks like actual content.
    if let Some(caps) = DOM_TITLE_RE.captures(&body_text) {
        let dom_title = caps[1].replace('"', "");
        let lower = dom_title.to_lowercase();
        let invalid = dom_title.is_empty()
            || INVALID_DOM_TITLE_MARKERS.iter().any(|m| dom_title.contains(m))
            || lower.contains("null")
            || lower.contains("--");
        if !invalid
            && !title.contains(".title")
            && !title.contains("document")
            && title.len() as i64 - dom_title.len() as i64 > 30
        {
            debug!("using document.title assignment: {}", dom_title);
            title = dom_title;
        }
    }

    // Internationalised consoles park the real title in an i18n bundle.
    if let Some(js_url) = find_i18n_url(url, &body_text) {
        if let Some(i18n_title) = fetch_i18n_title(http, proxy, &js_url).await {
            debug!("i18n bundle title: {}", i18n_title);
            title = i18n_title;
        }
    }

    title
}

fn decode_body(response: &HttpResponse) -> String {
    let mut charset = CHARSET_RE
        .captures(&response.content_type)
        .map(|c| c[1].to_string());
    if charset.is_none() {
        // No charset in the header; look at the meta tags on a lossy
        // first pass.
        let lossy = String::from_utf8_lossy(&response.body);
        charset = META_CHARSET_RE.captures(&lossy).map(|c| c[1].to_string());
    }
    to_utf8(&response.body, charset.as_deref())
}

fn find_i18n_url(page_url: &str, body: &str) -> Option<String> {
    let parsed = url::Url::parse(page_url).ok()?;
    for caps in I18N_SRC_RE.captures_iter(body) {
        let src = &caps[1];
        if src.ends_with(".js") && src.contains("i18n") {
            return parsed.join(src).ok().map(|u| u.to_string());
        }
    }
    None
}

async fn fetch_i18n_title(http: &Arc<HttpClient>, proxy: &str, js_url: &str) -> Option<String> {
    let options = RequestOptions {
        proxy: proxy.to_string(),
        timeout: Duration::from_secs(3),
        retries: 2,
        follow_redirects: true,
        ..Default::default()
    };
    match http.send("GET", js_url, "", &options).await {
        Ok((_, resp)) if resp.status == 200 => {
            let js = to_utf8(&resp.body, None);
            I18N_TITLE_RE.captures(&js).map(|c| c[1].to_string())
        }
        Ok(_) => None,
        Err(e) => {
            debug!("i18n fetch failed for {}: {}", js_url, e);
            None
        }
    }
}

/// Normalise whitespace in a raw title.
pub fn clean_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if c == '\r' || c == '\n' || c == '\t' { ' ' } else { c })
        .collect();
    let mut out = String::with_capacity(replaced.len());
    let mut in_space = false;
    for c in replaced.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out.trim().to_string()
}
