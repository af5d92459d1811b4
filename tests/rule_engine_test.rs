// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Rule Store & Expression Engine Tests
 * Snapshot semantics under concurrent loads and evaluator laws
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::Arc;

use tunnistin::eval::{CelContext, Value};
use tunnistin::rules::{RuleInput, RuleStore};
use tunnistin::types::HttpResponse;

const ORDERED_RULES: &str = r#"
id: ordered
rules:
  alpha:
    request:
      method: GET
      path: /
    expression: response.status == 200
  beta:
    request:
      method: GET
      path: /b
    expression: response.status == 200
  gamma:
    request:
      method: GET
      path: /c
    expression: response.status == 200
expression: alpha() && beta() && gamma()
info:
  name: Ordered
"#;

#[test]
fn test_rule_order_preserved_from_yaml() {
    let fp = tunnistin::Fingerprint::parse(ORDERED_RULES, "ordered").unwrap();
    let names: Vec<&str> = fp.rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    let orders: Vec<u32> = fp.rules.iter().map(|r| r.order).collect();
    assert_eq!(orders, vec![0, 1, 2]);
}

#[test]
fn test_snapshot_stable_under_concurrent_loads() {
    let store = Arc::new(RuleStore::new());
    store.load(&RuleInput::default()).unwrap();
    let baseline = store.count();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                store.load(&RuleInput::default()).unwrap();
                // Every observed snapshot is internally consistent: its
                // length equals what count() reported between write locks.
                let snap = store.snapshot();
                assert_eq!(snap.len(), baseline);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.count(), baseline);
}

#[test]
fn test_held_snapshot_unaffected_by_reload() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("one.yaml"), ORDERED_RULES).unwrap();

    let store = RuleStore::new();
    store.load(&RuleInput::default()).unwrap();
    let snapshot = store.snapshot();
    let ids: Vec<String> = snapshot.iter().map(|f| f.id.clone()).collect();

    store
        .load(&RuleInput {
            files: vec![],
            dir: Some(dir.path().to_path_buf()),
        })
        .unwrap();
    assert_eq!(store.count(), 1);

    // The earlier snapshot still lists the embedded fingerprints.
    let ids_after: Vec<String> = snapshot.iter().map(|f| f.id.clone()).collect();
    assert_eq!(ids, ids_after);
}

fn vars_with_status(status: i32) -> HashMap<String, Value> {
    let mut vars = HashMap::new();
    vars.insert(
        "response".to_string(),
        Value::Response(Arc::new(HttpResponse::placeholder(status))),
    );
    vars
}

#[test]
fn test_conjunction_law_over_all_binding_combinations() {
    // r0 && r1 && r2 is true iff every binding is true.
    let vars = vars_with_status(200);
    for mask in 0..8u8 {
        let mut ctx = CelContext::new();
        ctx.set_rule_result("r0", mask & 1 != 0);
        ctx.set_rule_result("r1", mask & 2 != 0);
        ctx.set_rule_result("r2", mask & 4 != 0);
        let got = ctx.evaluate_bool("r0() && r1() && r2()", &vars).unwrap();
        assert_eq!(got, mask == 7, "mask {:03b}", mask);
    }
}

#[test]
fn test_disjunction_over_bindings() {
    let vars = vars_with_status(200);
    for mask in 0..4u8 {
        let mut ctx = CelContext::new();
        ctx.set_rule_result("r0", mask & 1 != 0);
        ctx.set_rule_result("r1", mask & 2 != 0);
        let got = ctx.evaluate_bool("r0() || r1()", &vars).unwrap();
        assert_eq!(got, mask != 0, "mask {:02b}", mask);
    }
}

#[test]
fn test_unbound_rule_reference_is_a_compile_error() {
    let vars = vars_with_status(200);
    let mut ctx = CelContext::new();
    ctx.set_rule_result("r0", true);
    assert!(ctx.evaluate_bool("r0() || r9()", &vars).is_err());
}

#[test]
fn test_compile_error_is_reported_not_panicked() {
    let vars = vars_with_status(200);
    let mut ctx = CelContext::new();
    assert!(ctx.evaluate_bool("response.status ==", &vars).is_err());
    assert!(ctx.evaluate_bool("(((", &vars).is_err());
    assert!(ctx.evaluate_bool("", &vars).is_err());
}

#[test]
fn test_compiled_expression_reuse_across_evaluations() {
    let mut ctx = CelContext::new();
    // The same source text evaluated against different variable maps.
    for status in [200, 404, 500, 200] {
        let vars = vars_with_status(status);
        let got = ctx.evaluate_bool("response.status == 200", &vars).unwrap();
        assert_eq!(got, status == 200);
    }
}

#[test]
fn test_set_variables_feed_rule_expressions() {
    let mut ctx = CelContext::new();
    let mut vars = vars_with_status(200);
    ctx.apply_var_defs(
        &[
            ("marker".to_string(), r#"md5("admin")"#.to_string()),
            ("prefix".to_string(), r#"substr(marker, 0, 8)"#.to_string()),
        ],
        &mut vars,
    );
    assert!(ctx
        .evaluate_bool(r#"prefix == "21232f29""#, &vars)
        .unwrap());
}
