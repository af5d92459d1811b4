// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Scan Engine Integration Tests
 * End-to-end scenarios against a mock HTTP server: matching, cache
 * reuse, passive gating, redirect chains and deduplication
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::io::Write;
use std::path::PathBuf;

use tunnistin::config::ScanConfig;
use tunnistin::rules::RuleInput;
use tunnistin::scanner::Runner;
use wiremock::matchers::{header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_rule(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    path
}

fn scan_config(targets: Vec<String>, rule_files: Vec<PathBuf>, active: bool) -> ScanConfig {
    ScanConfig {
        targets,
        targets_file: None,
        output: None,
        json: false,
        sock: None,
        proxy: String::new(),
        url_workers: 2,
        rule_workers: 200,
        timeout: 5,
        retries: 0,
        max_redirects: 5,
        active,
        rule_input: RuleInput {
            files: rule_files,
            dir: None,
        },
    }
}

async fn run_scan(config: ScanConfig) -> tunnistin::ScanSummary {
    let runner = Runner::new(config).unwrap();
    runner.rules.load(&runner.config.rule_input).unwrap();
    runner.run().await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_positive_match_on_status_and_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Server", "nginx/1.18.0")
                .insert_header("Content-Type", "text/html")
                .set_body_string("<html><title>Welcome</title></html>"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let rule = write_rule(
        &dir,
        "nginx.yaml",
        r#"
id: nginx
rules:
  r0:
    request:
      method: GET
      path: /
    expression: response.status == 200 && response.headers["server"].icontains("nginx")
expression: r0()
info:
  name: Nginx
"#,
    );

    let summary = run_scan(scan_config(vec![server.uri()], vec![rule], false)).await;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.unmatched, 0);

    let result = summary.results.values().next().unwrap();
    assert_eq!(result.status_code, 200);
    assert_eq!(result.title, "Welcome");
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].finger.id, "nginx");
    // Server banner decomposition.
    assert_eq!(result.server.original, "nginx/1.18.0");
    assert_eq!(result.server.product, "nginx");
    assert_eq!(result.server.version, "1.18.0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_collapses_identical_root_probes() {
    let server = MockServer::start().await;
    // Only ONE request may reach the server: the base probe. Both rules
    // must bind their request/response from the cache.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Server", "unit-test")
                .insert_header("Content-Type", "text/plain")
                .set_body_string("cache me"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let rule = write_rule(
        &dir,
        "double.yaml",
        r#"
id: double-probe
rules:
  first:
    request:
      method: GET
      path: /
    expression: response.status == 200
  second:
    request:
      method: GET
      path: /
    expression: response.body.bcontains(b"cache me")
expression: first() && second()
info:
  name: Double Probe
"#,
    );

    let summary = run_scan(scan_config(vec![server.uri()], vec![rule], false)).await;
    assert_eq!(summary.matched, 1);
    // The expect(1) assertion fires on server drop.
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_passive_mode_gates_non_root_probes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "text/plain"))
        .mount(&server)
        .await;
    // The /admin probe must never go out without --active.
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let rule = write_rule(
        &dir,
        "active.yaml",
        r#"
id: admin-panel
rules:
  r0:
    request:
      method: GET
      path: /admin
    expression: response.status == 200
expression: r0()
info:
  name: Admin Panel
"#,
    );

    let summary = run_scan(scan_config(vec![server.uri()], vec![rule], false)).await;
    assert_eq!(summary.matched, 0);
    assert_eq!(summary.unmatched, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_active_mode_allows_non_root_probes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "text/plain"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("admin console"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let rule = write_rule(
        &dir,
        "active.yaml",
        r#"
id: admin-panel
rules:
  r0:
    request:
      method: GET
      path: /admin
    expression: response.status == 200 && response.body.bcontains(b"admin console")
expression: r0()
info:
  name: Admin Panel
"#,
    );

    let summary = run_scan(scan_config(vec![server.uri()], vec![rule], true)).await;
    assert_eq!(summary.matched, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redirect_chain_with_cookie_propagation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/final")
                .insert_header("Set-Cookie", "session=abc123; Path=/"),
        )
        .mount(&server)
        .await;
    // The follow-up must carry the cookie harvested from the 302.
    Mock::given(method("GET"))
        .and(path("/final"))
        .and(header_regex("cookie", "session=abc123"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Server", "Apache")
                .insert_header("Content-Type", "text/plain")
                .set_body_string("landed"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let rule = write_rule(
        &dir,
        "redirect.yaml",
        r#"
id: redirect-landing
rules:
  r0:
    request:
      method: GET
      path: /
    expression: response.status == 200
expression: r0()
info:
  name: Redirect Landing
"#,
    );

    let target = format!("{}/start", server.uri());
    let summary = run_scan(scan_config(vec![target], vec![rule], false)).await;
    assert_eq!(summary.matched, 1);

    let result = summary.results.values().next().unwrap();
    // Base info reflects the final hop.
    assert!(result.url.ends_with("/final"));
    assert_eq!(result.server.product, "Apache");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_targets_processed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "text/plain"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let rule = write_rule(
        &dir,
        "any.yaml",
        r#"
id: any
rules:
  r0:
    request:
      method: GET
      path: /
    expression: response.status == 200
expression: r0()
info:
  name: Any
"#,
    );

    let targets = vec![server.uri(), server.uri(), format!(" {} ", server.uri())];
    let summary = run_scan(scan_config(targets, vec![rule], false)).await;
    // Exactly one TargetResult despite three occurrences of the target.
    assert_eq!(summary.total, 1);
    assert_eq!(summary.results.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_target_still_emits_a_result() {
    // Nothing listens here; the scan must finish cleanly with an
    // unmatched result rather than an error.
    let dir = tempfile::tempdir().unwrap();
    let rule = write_rule(
        &dir,
        "any.yaml",
        r#"
id: any
rules:
  r0:
    request:
      method: GET
      path: /
    expression: response.status == 200
expression: r0()
info:
  name: Any
"#,
    );

    let summary = run_scan(scan_config(
        vec!["http://127.0.0.1:1".to_string()],
        vec![rule],
        false,
    ))
    .await;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.matched, 0);
    assert_eq!(summary.results.len(), 1);
    let result = summary.results.values().next().unwrap();
    assert_eq!(result.status_code, 0);
    assert!(result.matches.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_if_mismatch_short_circuits_later_rules() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/plain")
                .set_body_string("nothing to see"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/never"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let rule = write_rule(
        &dir,
        "stop.yaml",
        r#"
id: stop-early
rules:
  gate:
    request:
      method: GET
      path: /
    expression: response.body.bcontains(b"not present")
    stop_if_mismatch: true
  probe:
    request:
      method: GET
      path: /never
    expression: response.status == 200
expression: gate() && probe()
info:
  name: Stop Early
"#,
    );

    let summary = run_scan(scan_config(vec![server.uri()], vec![rule], true)).await;
    assert_eq!(summary.matched, 0);
}
