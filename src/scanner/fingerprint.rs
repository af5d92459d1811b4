// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Fingerprint Evaluation
 * Runs one fingerprint against one target: variable bundle seeding,
 * per-rule probes with cache reuse, expression evaluation and
 * flow-control flags
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::baseinfo::favicon::FaviconHasher;
use crate::cache::ProbeCache;
use crate::errors::ScannerError;
use crate::eval::{CelContext, TypeTag, Value};
use crate::network::raw::{probe_records, send_raw_request};
use crate::network::{parse_address, HttpClient, RequestOptions, SocketClient, SocketConfig, Transport};
use crate::rules::model::{Fingerprint, Rule, TRANSPORT_GO, TRANSPORT_SSL, TRANSPORT_TCP, TRANSPORT_UDP};
use crate::str_utils::{format_path, from_hex, normalize_multipart, parse_target};
use crate::types::{BaseInfo, FingerMatch, HttpResponse};

/// Shared collaborators of every rule task.
pub struct RuleDeps {
    pub http: Arc<HttpClient>,
    pub cache: Arc<ProbeCache>,
    /// Probes beyond the canonical root GET are only allowed in active
    /// mode.
    pub active: bool,
}

/// Evaluate one fingerprint against one target, honouring rule order,
/// cache reuse, stop flags and the top-level expression.
pub async fn evaluate_fingerprint(
    deps: &RuleDeps,
    finger: &Arc<Fingerprint>,
    target: &str,
    base_info: &BaseInfo,
    proxy: &str,
    timeout: u64,
) -> FingerMatch {
    let mut ctx = CelContext::new();
    let mut vars: HashMap<String, Value> = HashMap::new();

    debug!("evaluating fingerprint {} against {}", finger.id, target);

    vars.insert("title".to_string(), Value::Str(base_info.title.clone()));
    vars.insert(
        "server".to_string(),
        Value::Str(base_info.server.original.clone()),
    );
    vars.insert(
        "response".to_string(),
        Value::Response(Arc::new(HttpResponse::placeholder(base_info.status_code))),
    );

    ctx.apply_var_defs(&finger.set, &mut vars);
    ctx.apply_var_defs(&finger.payloads.payloads, &mut vars);

    for named in &finger.rules {
        let rule = &named.rule;
        let path = substitute(rule.request.path.trim(), &vars);
        let url_str = parse_target(target, &format_path(&path));

        // Passive scans only issue the canonical root GET; anything else
        // is bound false without a probe.
        if !deps.active && !is_passive_probe(rule, &path) {
            debug!("rule {} gated by passive mode", named.name);
            ctx.set_rule_result(&named.name, false);
            continue;
        }

        if rule.before_sleep > 0 {
            tokio::time::sleep(Duration::from_millis(rule.before_sleep)).await;
        }

        match deps.cache.lookup(&rule.request, &url_str) {
            Some(entry) => {
                debug!("rule {} served from cache", named.name);
                vars.insert(
                    "request".to_string(),
                    Value::Request(Arc::new(entry.request)),
                );
                vars.insert(
                    "response".to_string(),
                    Value::Response(Arc::new(entry.response)),
                );
            }
            None => {
                if let Err(e) =
                    send_rule_probe(deps, target, &url_str, rule, &mut ctx, &mut vars, proxy, timeout)
                        .await
                {
                    debug!("rule {} probe failed: {}", named.name, e);
                    ctx.set_rule_result(&named.name, false);
                    continue;
                }
            }
        }

        let result = eval_rule_expression(&mut ctx, &named.name, rule, &vars);
        ctx.set_rule_result(&named.name, result);

        if !rule.output.is_empty() {
            ctx.apply_var_defs(&rule.output, &mut vars);
        }

        if result && rule.stop_if_match {
            break;
        }
        if !result && rule.stop_if_mismatch {
            break;
        }
    }

    let matched = match ctx.evaluate_bool(&finger.expression, &vars) {
        Ok(v) => v,
        Err(e) => {
            debug!("fingerprint {} expression failed: {}", finger.id, e);
            false
        }
    };

    let mut out = FingerMatch {
        finger: Arc::clone(finger),
        result: matched,
        request: None,
        response: None,
    };
    if matched {
        if let Some(Value::Request(r)) = vars.get("request") {
            out.request = Some((**r).clone());
        }
        if let Some(Value::Response(r)) = vars.get("response") {
            out.response = Some((**r).clone());
        }
    }
    out
}

/// A probe the passive mode may issue: root path, GET, no extra headers.
fn is_passive_probe(rule: &Rule, path: &str) -> bool {
    (path.is_empty() || path == "/")
        && rule.request.method_or_get() == "GET"
        && rule.request.headers.is_empty()
}

fn eval_rule_expression(
    ctx: &mut CelContext,
    name: &str,
    rule: &Rule,
    vars: &HashMap<String, Value>,
) -> bool {
    let sources: Vec<&String> = if !rule.expression.is_empty() {
        vec![&rule.expression]
    } else {
        rule.expressions.iter().collect()
    };
    for source in sources {
        match ctx.evaluate_bool(source, vars) {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => debug!("rule {} expression error: {}", name, e),
        }
    }
    false
}

/// Replace `{{var}}` tokens against the bundle; map-typed variables are
/// not substitutable.
pub fn substitute(input: &str, vars: &HashMap<String, Value>) -> String {
    if !input.contains("{{") {
        return input.to_string();
    }
    let mut out = input.to_string();
    for (key, value) in vars {
        let token = format!("{{{{{}}}}}", key);
        if !out.contains(&token) {
            continue;
        }
        if let Some(rendered) = value.render() {
            out = out.replace(&token, &rendered);
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
async fn send_rule_probe(
    deps: &RuleDeps,
    target: &str,
    url_str: &str,
    rule: &Rule,
    ctx: &mut CelContext,
    vars: &mut HashMap<String, Value>,
    proxy: &str,
    timeout: u64,
) -> Result<(), ScannerError> {
    let timeout = Duration::from_secs(if timeout == 0 { 5 } else { timeout });
    let req_type = rule.request.req_type.to_lowercase();

    match req_type.as_str() {
        TRANSPORT_TCP | TRANSPORT_UDP | TRANSPORT_SSL => {
            let host = substitute(&rule.request.host, vars);
            let addr = parse_address(&host)?;
            let conf = SocketConfig {
                transport: if req_type == TRANSPORT_UDP {
                    Transport::Udp
                } else {
                    Transport::Tcp
                },
                read_size: rule.request.read_size,
                read_timeout: if rule.request.read_timeout > 0 {
                    Duration::from_secs(rule.request.read_timeout)
                } else {
                    timeout
                },
                dial_timeout: timeout,
                write_timeout: timeout,
                max_retries: 1,
                proxy: proxy.to_string(),
                use_tls: addr.use_tls || req_type == TRANSPORT_SSL,
                server_name: addr.host.clone(),
                ..Default::default()
            };

            let mut data = rule.request.data.clone().into_bytes();
            if rule.request.data_type.eq_ignore_ascii_case("hex") {
                data = from_hex(&rule.request.data);
            }

            let mut client = SocketClient::connect(&addr.address, conf).await?;
            if let Err(e) = client.send(&data).await {
                debug!("socket send failed for {}: {}", addr.address, e);
            }
            let received = client.receive().await.unwrap_or_default();

            let (req, resp, fulltarget) = probe_records(&addr.address, &data, &received);
            vars.insert("request".to_string(), Value::Request(Arc::new(req)));
            vars.insert("response".to_string(), Value::Response(Arc::new(resp)));
            vars.insert("fulltarget".to_string(), Value::Str(fulltarget));
            ctx.declare("fulltarget", TypeTag::Str);
            Ok(())
        }
        TRANSPORT_GO => Err(ScannerError::Evaluation(
            "go-transport rules delegate to native detection scripts, which this engine does not run".to_string(),
        )),
        _ => {
            if !rule.request.raw.is_empty() {
                let blob = substitute(&rule.request.raw, vars);
                let (req, resp) = send_raw_request(&blob, target, proxy, timeout).await?;
                vars.insert("request".to_string(), Value::Request(Arc::new(req)));
                vars.insert("response".to_string(), Value::Response(Arc::new(resp)));
                return Ok(());
            }

            let content_type = rule
                .request
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            let body = substitute(rule.request.body.trim(), vars);
            let body = normalize_multipart(&content_type, &body);

            let options = RequestOptions {
                proxy: proxy.to_string(),
                timeout,
                retries: 2,
                follow_redirects: rule.request.follow_redirects,
                insecure_skip_verify: true,
                custom_headers: rule.request.headers.clone(),
                ..Default::default()
            };

            // Targets reach rules with a resolved scheme; anything else
            // goes through one more protocol probe.
            let url_final = if url_str.starts_with("http://") || url_str.starts_with("https://") {
                url_str.to_string()
            } else {
                deps.http.check_protocol(url_str, proxy).await?
            };

            let method = rule.request.method_or_get();
            debug!("probing {} {}", method, url_final);
            let (req, mut resp) = deps.http.send(&method, &url_final, &body, &options).await?;

            let hasher = FaviconHasher::new(Arc::clone(&deps.http), proxy);
            hasher.enrich(&req, &mut resp).await;

            // Idempotent probes are written through for the next rule.
            if rule.request.headers.is_empty() {
                deps.cache
                    .store(url_str, rule.request.follow_redirects, &req, &resp);
            }

            vars.insert("request".to_string(), Value::Request(Arc::new(req)));
            vars.insert("response".to_string(), Value::Response(Arc::new(resp)));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_replaces_known_tokens() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), Value::Str("admin".into()));
        vars.insert("num".to_string(), Value::Int(7));
        vars.insert("m".to_string(), Value::Map(HashMap::new()));
        let got = substitute("/user/{{name}}/{{num}}/{{m}}/{{unknown}}", &vars);
        assert_eq!(got, "/user/admin/7/{{m}}/{{unknown}}");
    }

    #[test]
    fn test_passive_probe_gate() {
        let mut rule = Rule::default();
        assert!(is_passive_probe(&rule, ""));
        assert!(is_passive_probe(&rule, "/"));
        assert!(!is_passive_probe(&rule, "/admin"));

        rule.request.method = "POST".into();
        assert!(!is_passive_probe(&rule, "/"));

        let mut rule = Rule::default();
        rule.request.headers.insert("X-Probe".into(), "1".into());
        assert!(!is_passive_probe(&rule, "/"));
    }
}
