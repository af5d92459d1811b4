// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Fingerprint Rule Model
 * Declarative YAML fingerprint schema with order-preserving parsing
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;

use crate::errors::ScannerError;

pub const TRANSPORT_HTTP: &str = "http";
pub const TRANSPORT_TCP: &str = "tcp";
pub const TRANSPORT_UDP: &str = "udp";
pub const TRANSPORT_SSL: &str = "ssl";
pub const TRANSPORT_GO: &str = "go";

const ALLOWED_TRANSPORTS: &[&str] = &[
    TRANSPORT_HTTP,
    TRANSPORT_TCP,
    TRANSPORT_UDP,
    TRANSPORT_SSL,
    TRANSPORT_GO,
];

/// Ordered `key: expression` pairs. YAML mapping order is part of the
/// contract for `set`, `payloads` and `output`: variables are evaluated
/// left-to-right.
pub type VarDefs = Vec<(String, String)>;

/// A loaded fingerprint (rule-set). Immutable once loaded; shared behind
/// `Arc` through rule snapshots.
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    pub id: String,
    /// One of `http` (default), `tcp`, `udp`, `ssl`, `go`.
    pub transport: String,
    pub set: VarDefs,
    pub payloads: Payloads,
    /// Rules in declaration order, each carrying its order index.
    pub rules: Vec<NamedRule>,
    /// Boolean combination of rule names deciding the overall match.
    pub expression: String,
    pub info: Info,
    /// Name of an external native detection script; carried through for
    /// tooling, not executed by this engine.
    pub gopoc: String,
}

#[derive(Debug, Clone, Default)]
pub struct Payloads {
    pub continue_on_match: bool,
    pub payloads: VarDefs,
}

#[derive(Debug, Clone)]
pub struct NamedRule {
    pub name: String,
    pub rule: Rule,
    pub order: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub request: RuleRequest,
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub expressions: Vec<String>,
    #[serde(default, deserialize_with = "de_vardefs", rename = "output")]
    pub output: VarDefs,
    #[serde(default)]
    pub stop_if_match: bool,
    #[serde(default)]
    pub stop_if_mismatch: bool,
    /// Milliseconds to wait before this rule's probe goes out.
    #[serde(default)]
    pub before_sleep: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleRequest {
    /// Probe transport for this single rule; empty means HTTP.
    #[serde(rename = "type")]
    pub req_type: String,
    /// tcp/udp target, `host:port`, optionally `tls://` prefixed.
    pub host: String,
    /// tcp/udp payload.
    pub data: String,
    #[serde(rename = "data-type")]
    pub data_type: String,
    #[serde(rename = "read-size")]
    pub read_size: usize,
    #[serde(rename = "read-timeout")]
    pub read_timeout: u64,
    /// Pre-formatted request blob for raw mode.
    pub raw: String,
    pub method: String,
    pub path: String,
    pub headers: std::collections::HashMap<String, String>,
    pub body: String,
    pub follow_redirects: bool,
}

impl Default for RuleRequest {
    fn default() -> Self {
        Self {
            req_type: String::new(),
            host: String::new(),
            data: String::new(),
            data_type: String::new(),
            read_size: 0,
            read_timeout: 0,
            raw: String::new(),
            method: String::new(),
            path: String::new(),
            headers: std::collections::HashMap::new(),
            body: String::new(),
            // Redirects are followed unless a rule opts out.
            follow_redirects: true,
        }
    }
}

impl RuleRequest {
    pub fn is_http(&self) -> bool {
        self.req_type.is_empty() || self.req_type.eq_ignore_ascii_case(TRANSPORT_HTTP)
    }

    pub fn method_or_get(&self) -> String {
        if self.method.is_empty() {
            "GET".to_string()
        } else {
            self.method.to_uppercase()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Info {
    pub name: String,
    pub author: String,
    pub severity: String,
    pub verified: bool,
    pub description: String,
    pub reference: Vec<String>,
    pub affected: String,
    pub solutions: String,
    pub tags: String,
    pub classification: Classification,
    pub created: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Classification {
    #[serde(rename = "cvss-metrics")]
    pub cvss_metrics: String,
    #[serde(rename = "cvss-score")]
    pub cvss_score: f64,
    #[serde(rename = "cve-id")]
    pub cve_id: String,
    #[serde(rename = "cwe-id")]
    pub cwe_id: String,
}

impl Fingerprint {
    /// Whether any rule in this fingerprint probes over HTTP.
    pub fn is_http(&self) -> bool {
        self.rules.iter().any(|r| r.rule.request.is_http())
    }

    /// Parse a fingerprint from YAML text, preserving rule order and
    /// validating the schema.
    pub fn parse(source: &str, origin: &str) -> Result<Self, ScannerError> {
        let doc: Yaml = serde_yaml::from_str(source)
            .map_err(|e| ScannerError::RuleLoad(format!("{}: {}", origin, e)))?;
        let map = doc
            .as_mapping()
            .ok_or_else(|| ScannerError::RuleLoad(format!("{}: not a mapping document", origin)))?;

        let mut fp = Fingerprint {
            transport: TRANSPORT_HTTP.to_string(),
            ..Default::default()
        };

        for (k, v) in map {
            let key = k.as_str().unwrap_or_default();
            match key {
                "id" => fp.id = v.as_str().unwrap_or_default().to_string(),
                "transport" => {
                    if let Some(t) = v.as_str() {
                        if !t.is_empty() {
                            fp.transport = t.to_lowercase();
                        }
                    }
                }
                "set" => fp.set = yaml_vardefs(v, origin)?,
                "payloads" => fp.payloads = parse_payloads(v, origin)?,
                "rules" => fp.rules = parse_rules(v, origin)?,
                "expression" => fp.expression = v.as_str().unwrap_or_default().to_string(),
                "info" => {
                    fp.info = serde_yaml::from_value(v.clone())
                        .map_err(|e| ScannerError::RuleLoad(format!("{}: info: {}", origin, e)))?;
                }
                "gopoc" => fp.gopoc = v.as_str().unwrap_or_default().to_string(),
                _ => {}
            }
        }

        fp.validate(origin)?;
        Ok(fp)
    }

    fn validate(&self, origin: &str) -> Result<(), ScannerError> {
        if self.id.is_empty() {
            return Err(ScannerError::RuleLoad(format!("{}: missing id", origin)));
        }
        if self.rules.is_empty() {
            return Err(ScannerError::RuleLoad(format!(
                "{}: fingerprint {} has no rules",
                origin, self.id
            )));
        }
        if !ALLOWED_TRANSPORTS.contains(&self.transport.as_str()) {
            return Err(ScannerError::RuleLoad(format!(
                "{}: fingerprint {} has unsupported transport {:?}",
                origin, self.id, self.transport
            )));
        }
        // The top-level expression may only reference rule names, the
        // variables the fingerprint introduces, and the core namespace.
        let mut known: Vec<&str> = self.rules.iter().map(|r| r.name.as_str()).collect();
        known.extend(["request", "response", "title", "server", "fulltarget"]);
        known.extend(self.set.iter().map(|(k, _)| k.as_str()));
        known.extend(self.payloads.payloads.iter().map(|(k, _)| k.as_str()));
        for nr in &self.rules {
            known.extend(nr.rule.output.iter().map(|(k, _)| k.as_str()));
        }
        for ident in expression_idents(&self.expression) {
            if !known.contains(&ident.as_str()) && !crate::eval::functions::is_builtin(&ident) {
                return Err(ScannerError::RuleLoad(format!(
                    "{}: fingerprint {} expression references undefined rule {:?}",
                    origin, self.id, ident
                )));
            }
        }
        Ok(())
    }
}

fn parse_payloads(v: &Yaml, origin: &str) -> Result<Payloads, ScannerError> {
    let mut out = Payloads::default();
    if let Some(map) = v.as_mapping() {
        for (k, val) in map {
            match k.as_str().unwrap_or_default() {
                "continue" => out.continue_on_match = val.as_bool().unwrap_or(false),
                "payloads" => out.payloads = yaml_vardefs(val, origin)?,
                _ => {}
            }
        }
    }
    Ok(out)
}

fn parse_rules(v: &Yaml, origin: &str) -> Result<Vec<NamedRule>, ScannerError> {
    let map = v
        .as_mapping()
        .ok_or_else(|| ScannerError::RuleLoad(format!("{}: rules is not a mapping", origin)))?;
    let mut rules = Vec::with_capacity(map.len());
    let mut order: u32 = 0;
    for (k, val) in map {
        let name = k
            .as_str()
            .ok_or_else(|| ScannerError::RuleLoad(format!("{}: rule name is not a string", origin)))?
            .to_string();
        let rule: Rule = serde_yaml::from_value(val.clone())
            .map_err(|e| ScannerError::RuleLoad(format!("{}: rule {}: {}", origin, name, e)))?;
        rules.push(NamedRule { name, rule, order });
        order += 1;
    }
    rules.sort_by_key(|r| r.order);
    Ok(rules)
}

/// Flatten a YAML mapping into ordered `(key, expression)` pairs. Scalars
/// other than strings keep their YAML rendering so `set: {num: 3}` still
/// evaluates as the literal `3`.
fn yaml_vardefs(v: &Yaml, origin: &str) -> Result<VarDefs, ScannerError> {
    let map = match v.as_mapping() {
        Some(m) => m,
        None if v.is_null() => return Ok(Vec::new()),
        None => {
            return Err(ScannerError::RuleLoad(format!(
                "{}: expected a mapping of variable definitions",
                origin
            )))
        }
    };
    let mut defs = Vec::with_capacity(map.len());
    for (k, val) in map {
        let key = k.as_str().unwrap_or_default().to_string();
        let value = match val {
            Yaml::String(s) => s.clone(),
            Yaml::Number(n) => n.to_string(),
            Yaml::Bool(b) => b.to_string(),
            other => serde_yaml::to_string(other)
                .unwrap_or_default()
                .trim_end()
                .to_string(),
        };
        defs.push((key, value));
    }
    Ok(defs)
}

fn de_vardefs<'de, D>(deserializer: D) -> Result<VarDefs, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Yaml::deserialize(deserializer)?;
    yaml_vardefs(&v, "output").map_err(serde::de::Error::custom)
}

/// Identifier tokens of a top-level expression, with operators, literals,
/// member-access names and call parentheses stripped.
fn expression_idents(expr: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_str: Option<char> = None;
    let mut after_dot = false;
    for c in expr.chars() {
        if let Some(q) = in_str {
            if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_str = Some(c),
            c if c.is_alphanumeric() || c == '_' => cur.push(c),
            _ => {
                let had_token = !cur.is_empty();
                push_ident(&mut out, &mut cur, after_dot);
                if c == '.' {
                    after_dot = true;
                } else if had_token || !c.is_whitespace() {
                    after_dot = false;
                }
            }
        }
    }
    push_ident(&mut out, &mut cur, after_dot);
    out
}

fn push_ident(out: &mut Vec<String>, cur: &mut String, after_dot: bool) {
    if cur.is_empty() {
        return;
    }
    let token = std::mem::take(cur);
    if after_dot {
        return;
    }
    if token.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        return;
    }
    if matches!(token.as_str(), "true" | "false" | "null" | "in") {
        return;
    }
    if !out.contains(&token) {
        out.push(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
id: demo-app
transport: http
set:
  rand: randomLowercase(6)
  num: 8
rules:
  r0:
    request:
      method: GET
      path: /
    expression: response.status == 200
  r1:
    request:
      method: GET
      path: /version
    expression: response.body.bcontains(b"demo")
    stop_if_match: true
expression: r0() && r1()
info:
  name: Demo App
  severity: info
"#;

    #[test]
    fn test_parse_preserves_rule_order() {
        let fp = Fingerprint::parse(SAMPLE, "sample").unwrap();
        assert_eq!(fp.id, "demo-app");
        assert_eq!(fp.rules.len(), 2);
        assert_eq!(fp.rules[0].name, "r0");
        assert_eq!(fp.rules[0].order, 0);
        assert_eq!(fp.rules[1].name, "r1");
        assert_eq!(fp.rules[1].order, 1);
        assert!(fp.rules[1].rule.stop_if_match);
        assert_eq!(fp.set[0].0, "rand");
        assert_eq!(fp.set[1], ("num".to_string(), "8".to_string()));
    }

    #[test]
    fn test_missing_id_rejected() {
        let err = Fingerprint::parse("rules:\n  r0:\n    expression: 'true'\nexpression: r0()", "x")
            .unwrap_err();
        assert!(err.to_string().contains("missing id"));
    }

    #[test]
    fn test_empty_rules_rejected() {
        let err = Fingerprint::parse("id: x\nexpression: r0()", "x").unwrap_err();
        assert!(err.to_string().contains("no rules"));
    }

    #[test]
    fn test_unknown_rule_reference_rejected() {
        let src = r#"
id: x
rules:
  r0:
    expression: 'true'
expression: r0() && r9()
"#;
        let err = Fingerprint::parse(src, "x").unwrap_err();
        assert!(err.to_string().contains("r9"));
    }

    #[test]
    fn test_expression_may_mix_rules_and_core_namespace() {
        let src = r#"
id: x
rules:
  r0:
    expression: 'true'
expression: r0() && response.status == 200 && title.icontains("login")
"#;
        assert!(Fingerprint::parse(src, "x").is_ok());
    }

    #[test]
    fn test_bad_transport_rejected() {
        let src = "id: x\ntransport: icmp\nrules:\n  r0:\n    expression: 'true'\nexpression: r0()";
        let err = Fingerprint::parse(src, "x").unwrap_err();
        assert!(err.to_string().contains("icmp"));
    }

    #[test]
    fn test_follow_redirects_defaults_true() {
        let fp = Fingerprint::parse(SAMPLE, "sample").unwrap();
        assert!(fp.rules[0].rule.request.follow_redirects);
    }
}
