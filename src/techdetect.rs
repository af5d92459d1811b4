// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Technology Catalog Adaptor
 * Groups header/body technology detections into fixed category buckets
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Technology summary grouped by the fixed category buckets the output
/// formats expose.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TechStack {
    pub web_servers: Vec<String>,
    pub reverse_proxies: Vec<String>,
    pub javascript_frameworks: Vec<String>,
    pub javascript_libraries: Vec<String>,
    pub web_frameworks: Vec<String>,
    pub static_site_generator: Vec<String>,
    pub programming_languages: Vec<String>,
    pub caching: Vec<String>,
    pub security: Vec<String>,
    pub hosting_panels: Vec<String>,
    pub other: Vec<String>,
}

impl TechStack {
    pub fn is_empty(&self) -> bool {
        self.web_servers.is_empty()
            && self.reverse_proxies.is_empty()
            && self.javascript_frameworks.is_empty()
            && self.javascript_libraries.is_empty()
            && self.web_frameworks.is_empty()
            && self.static_site_generator.is_empty()
            && self.programming_languages.is_empty()
            && self.caching.is_empty()
            && self.security.is_empty()
            && self.hosting_panels.is_empty()
            && self.other.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    WebServer,
    ReverseProxy,
    JsFramework,
    JsLibrary,
    WebFramework,
    StaticSiteGenerator,
    ProgrammingLanguage,
    Caching,
    Security,
    HostingPanel,
    Other,
}

enum Probe {
    /// Case-insensitive regex on a named (lowercased) header value.
    Header(&'static str, &'static str),
    /// Case-insensitive regex on the body.
    Body(&'static str),
}

struct TechPattern {
    name: &'static str,
    category: Category,
    probe: Probe,
}

/// The built-in pattern table. The catalog is deliberately small: it
/// covers the stacks the output buckets report on, and rule fingerprints
/// carry the long tail.
static PATTERNS: &[TechPattern] = &[
    // Web servers
    TechPattern { name: "Nginx", category: Category::WebServer, probe: Probe::Header("server", r"nginx") },
    TechPattern { name: "Apache", category: Category::WebServer, probe: Probe::Header("server", r"apache(?:/|\s|$)") },
    TechPattern { name: "Microsoft IIS", category: Category::WebServer, probe: Probe::Header("server", r"microsoft-iis") },
    TechPattern { name: "LiteSpeed", category: Category::WebServer, probe: Probe::Header("server", r"litespeed") },
    TechPattern { name: "Caddy", category: Category::WebServer, probe: Probe::Header("server", r"caddy") },
    TechPattern { name: "OpenResty", category: Category::WebServer, probe: Probe::Header("server", r"openresty") },
    TechPattern { name: "Tomcat", category: Category::WebServer, probe: Probe::Body(r"apache tomcat") },
    TechPattern { name: "Jetty", category: Category::WebServer, probe: Probe::Header("server", r"jetty") },
    // Reverse proxies / CDN edges
    TechPattern { name: "Cloudflare", category: Category::ReverseProxy, probe: Probe::Header("server", r"cloudflare") },
    TechPattern { name: "Envoy", category: Category::ReverseProxy, probe: Probe::Header("server", r"envoy") },
    TechPattern { name: "Traefik", category: Category::ReverseProxy, probe: Probe::Header("server", r"traefik") },
    TechPattern { name: "HAProxy", category: Category::ReverseProxy, probe: Probe::Header("server", r"haproxy") },
    // JavaScript frameworks
    TechPattern { name: "React", category: Category::JsFramework, probe: Probe::Body(r"react(?:\.production)?(?:\.min)?\.js|data-reactroot|__react") },
    TechPattern { name: "Vue.js", category: Category::JsFramework, probe: Probe::Body(r"vue(?:\.runtime)?(?:\.global)?(?:\.min)?\.js|data-v-app|__vue__") },
    TechPattern { name: "AngularJS", category: Category::JsFramework, probe: Probe::Body(r"ng-app|angular(?:\.min)?\.js") },
    TechPattern { name: "Next.js", category: Category::JsFramework, probe: Probe::Body(r"__next_data__|/_next/static/") },
    // JavaScript libraries
    TechPattern { name: "jQuery", category: Category::JsLibrary, probe: Probe::Body(r"jquery[.\-]?[\d.]*(?:\.min)?\.js") },
    TechPattern { name: "Lodash", category: Category::JsLibrary, probe: Probe::Body(r"lodash(?:\.min)?\.js") },
    TechPattern { name: "Moment.js", category: Category::JsLibrary, probe: Probe::Body(r"moment(?:\.min)?\.js") },
    // Web frameworks / CMS
    TechPattern { name: "WordPress", category: Category::WebFramework, probe: Probe::Body(r"/wp-content/|/wp-includes/") },
    TechPattern { name: "Drupal", category: Category::WebFramework, probe: Probe::Body(r"drupal-settings-json|/sites/default/files") },
    TechPattern { name: "Django", category: Category::WebFramework, probe: Probe::Body(r"csrfmiddlewaretoken") },
    TechPattern { name: "Laravel", category: Category::WebFramework, probe: Probe::Body(r"laravel_session|xsrf-token") },
    TechPattern { name: "Spring", category: Category::WebFramework, probe: Probe::Body(r"whitelabel error page") },
    TechPattern { name: "Express", category: Category::WebFramework, probe: Probe::Header("x-powered-by", r"express") },
    TechPattern { name: "ASP.NET", category: Category::WebFramework, probe: Probe::Header("x-powered-by", r"asp\.net") },
    TechPattern { name: "Ruby on Rails", category: Category::WebFramework, probe: Probe::Header("x-powered-by", r"phusion passenger") },
    // Static site generators
    TechPattern { name: "Hugo", category: Category::StaticSiteGenerator, probe: Probe::Body(r#"generator"? content="hugo"#) },
    TechPattern { name: "Jekyll", category: Category::StaticSiteGenerator, probe: Probe::Body(r#"generator"? content="jekyll"#) },
    // Programming languages
    TechPattern { name: "PHP", category: Category::ProgrammingLanguage, probe: Probe::Header("x-powered-by", r"php") },
    TechPattern { name: "PHP", category: Category::ProgrammingLanguage, probe: Probe::Header("set-cookie", r"phpsessid") },
    TechPattern { name: "Java", category: Category::ProgrammingLanguage, probe: Probe::Header("set-cookie", r"jsessionid") },
    TechPattern { name: "Python", category: Category::ProgrammingLanguage, probe: Probe::Header("server", r"gunicorn|uvicorn|werkzeug") },
    TechPattern { name: "Go", category: Category::ProgrammingLanguage, probe: Probe::Header("server", r"(?:^|\s)go(?:lang)?(?:\s|/|$)") },
    TechPattern { name: "Node.js", category: Category::ProgrammingLanguage, probe: Probe::Header("x-powered-by", r"express|node") },
    // Caching
    TechPattern { name: "Varnish", category: Category::Caching, probe: Probe::Header("via", r"varnish") },
    TechPattern { name: "Squid", category: Category::Caching, probe: Probe::Header("via", r"squid") },
    TechPattern { name: "Fastly", category: Category::Caching, probe: Probe::Header("x-served-by", r"cache-") },
    // Security
    TechPattern { name: "ModSecurity", category: Category::Security, probe: Probe::Header("server", r"mod_security") },
    TechPattern { name: "Cloudflare WAF", category: Category::Security, probe: Probe::Header("cf-ray", r".") },
    // Hosting panels
    TechPattern { name: "cPanel", category: Category::HostingPanel, probe: Probe::Body(r"cpanel") },
    TechPattern { name: "Plesk", category: Category::HostingPanel, probe: Probe::Header("x-powered-by", r"plesk") },
    TechPattern { name: "BT Panel", category: Category::HostingPanel, probe: Probe::Body(r"宝塔|bt\.cn") },
];

static COMPILED: Lazy<Vec<(usize, Regex)>> = Lazy::new(|| {
    PATTERNS
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let source = match &p.probe {
                Probe::Header(_, re) => re,
                Probe::Body(re) => re,
            };
            Regex::new(&format!("(?i){}", source)).ok().map(|re| (i, re))
        })
        .collect()
});

/// Built-in technology catalog.
pub struct TechCatalog;

impl Default for TechCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TechCatalog {
    pub fn new() -> Self {
        Self
    }

    /// Detect technologies from lowercased response headers and the body,
    /// grouped into the fixed buckets.
    pub fn detect(&self, headers: &HashMap<String, String>, body: &[u8]) -> TechStack {
        let body_text = String::from_utf8_lossy(body);
        let mut stack = TechStack::default();

        for (idx, re) in COMPILED.iter() {
            let pattern = &PATTERNS[*idx];
            let matched = match &pattern.probe {
                Probe::Header(header, _) => headers
                    .get(*header)
                    .map(|v| re.is_match(v))
                    .unwrap_or(false),
                Probe::Body(_) => re.is_match(&body_text),
            };
            if matched {
                push_unique(bucket(&mut stack, pattern.category), pattern.name);
            }
        }
        stack
    }
}

fn bucket(stack: &mut TechStack, category: Category) -> &mut Vec<String> {
    match category {
        Category::WebServer => &mut stack.web_servers,
        Category::ReverseProxy => &mut stack.reverse_proxies,
        Category::JsFramework => &mut stack.javascript_frameworks,
        Category::JsLibrary => &mut stack.javascript_libraries,
        Category::WebFramework => &mut stack.web_frameworks,
        Category::StaticSiteGenerator => &mut stack.static_site_generator,
        Category::ProgrammingLanguage => &mut stack.programming_languages,
        Category::Caching => &mut stack.caching,
        Category::Security => &mut stack.security,
        Category::HostingPanel => &mut stack.hosting_panels,
        Category::Other => &mut stack.other,
    }
}

fn push_unique(bucket: &mut Vec<String>, name: &str) {
    if !bucket.iter().any(|n| n == name) {
        bucket.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_server_header_detection() {
        let catalog = TechCatalog::new();
        let stack = catalog.detect(&headers(&[("server", "nginx/1.18.0")]), b"");
        assert_eq!(stack.web_servers, vec!["Nginx"]);
    }

    #[test]
    fn test_body_detection_buckets() {
        let catalog = TechCatalog::new();
        let body =
            br#"<script src="/js/jquery-3.6.0.min.js"></script><link href="/wp-content/t.css">"#;
        let stack = catalog.detect(&HashMap::new(), body);
        assert_eq!(stack.javascript_libraries, vec!["jQuery"]);
        assert_eq!(stack.web_frameworks, vec!["WordPress"]);
    }

    #[test]
    fn test_language_from_cookie() {
        let catalog = TechCatalog::new();
        let stack = catalog.detect(&headers(&[("set-cookie", "PHPSESSID=abc; path=/")]), b"");
        assert_eq!(stack.programming_languages, vec!["PHP"]);
    }

    #[test]
    fn test_no_duplicates() {
        let catalog = TechCatalog::new();
        let stack = catalog.detect(
            &headers(&[("x-powered-by", "PHP/8.1"), ("set-cookie", "PHPSESSID=x")]),
            b"",
        );
        assert_eq!(stack.programming_languages, vec!["PHP"]);
    }

    #[test]
    fn test_empty_stack() {
        let catalog = TechCatalog::new();
        let stack = catalog.detect(&HashMap::new(), b"plain body");
        assert!(stack.is_empty());
    }
}
