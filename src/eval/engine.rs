// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Expression Engine
 * Compile-once evaluation of rule expressions over a typed variable map,
 * with per-ruleset environments and rule-name result bindings
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::ScannerError;
use crate::eval::functions;
use crate::eval::parser::{parse, BinOp, Expr, UnOp};
use crate::eval::value::{TypeTag, Value};
use crate::eval::collab;

/// Per-ruleset evaluation context.
///
/// Holds the declared variable environment, the compiled-expression cache
/// and the current boolean binding of every rule name. One context serves
/// one (target, fingerprint) task; contexts are never shared across
/// threads.
pub struct CelContext {
    env: HashMap<String, TypeTag>,
    compiled: HashMap<String, Arc<Expr>>,
    rule_results: HashMap<String, bool>,
}

impl Default for CelContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CelContext {
    pub fn new() -> Self {
        let mut env = HashMap::new();
        env.insert("request".to_string(), TypeTag::Request);
        env.insert("response".to_string(), TypeTag::Response);
        env.insert("title".to_string(), TypeTag::Str);
        env.insert("server".to_string(), TypeTag::Str);
        Self {
            env,
            compiled: HashMap::new(),
            rule_results: HashMap::new(),
        }
    }

    /// Declare (or re-declare) a variable for compile-time checking.
    pub fn declare(&mut self, name: &str, tag: TypeTag) {
        self.env.insert(name.to_string(), tag);
    }

    /// Bind the boolean result of a rule name, making `rN()` (and bare
    /// `rN`) usable from later expressions.
    pub fn set_rule_result(&mut self, name: &str, result: bool) {
        self.rule_results.insert(name.to_string(), result);
    }

    pub fn rule_result(&self, name: &str) -> Option<bool> {
        self.rule_results.get(name).copied()
    }

    /// Compile (cached) and evaluate an expression against the variable
    /// map. Compile errors and runtime errors both surface as
    /// `ScannerError::Evaluation`; callers demote the owning rule to
    /// false.
    pub fn evaluate(
        &mut self,
        source: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<Value, ScannerError> {
        let ast = match self.compiled.get(source) {
            Some(ast) => Arc::clone(ast),
            None => {
                let ast = Arc::new(parse(source)?);
                self.compiled.insert(source.to_string(), Arc::clone(&ast));
                ast
            }
        };
        self.check_idents(&ast, source)?;
        let run = EvalRun {
            vars,
            rules: &self.rule_results,
        };
        run.eval(&ast)
    }

    /// Evaluate expecting a boolean outcome.
    pub fn evaluate_bool(
        &mut self,
        source: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<bool, ScannerError> {
        let v = self.evaluate(source, vars)?;
        v.as_bool().ok_or_else(|| {
            ScannerError::Evaluation(format!(
                "expression {:?} produced {} instead of bool",
                source,
                v.type_name()
            ))
        })
    }

    /// Evaluate the ordered variable definitions of a `set`, `payloads`
    /// or `output` block, updating both the variable map and the declared
    /// environment left-to-right.
    pub fn apply_var_defs(
        &mut self,
        defs: &[(String, String)],
        vars: &mut HashMap<String, Value>,
    ) {
        for (key, source) in defs {
            // Collaborator handles never go through the evaluator; their
            // construction is a side effect, not an expression.
            if source == "newReverse()" {
                vars.insert(key.clone(), Value::Reverse(Arc::new(collab::new_reverse())));
                self.declare(key, TypeTag::Reverse);
                continue;
            }
            if source == "newJNDI()" {
                vars.insert(key.clone(), Value::Reverse(Arc::new(collab::new_jndi())));
                self.declare(key, TypeTag::Reverse);
                continue;
            }

            match self.evaluate(source, vars) {
                Ok(value) => {
                    let tag = value.type_tag().unwrap_or(TypeTag::Str);
                    let stored = match value {
                        v @ (Value::Int(_)
                        | Value::Map(_)
                        | Value::Url(_)
                        | Value::Reverse(_)
                        | Value::Str(_)) => v,
                        other => Value::Str(other.to_string()),
                    };
                    vars.insert(key.clone(), stored);
                    self.declare(key, tag);
                }
                Err(e) => {
                    // Unevaluable definitions fall back to their literal
                    // text, matching the reference dialect.
                    debug!("variable {} kept literal: {}", key, e);
                    vars.insert(key.clone(), Value::Str(source.clone()));
                    self.declare(key, TypeTag::Str);
                }
            }
        }
    }

    /// Reject expressions referencing names that are neither declared
    /// variables, bound rule names, nor builtins.
    fn check_idents(&self, ast: &Expr, source: &str) -> Result<(), ScannerError> {
        match ast {
            Expr::Ident(name) => {
                if self.env.contains_key(name) || self.rule_results.contains_key(name) {
                    Ok(())
                } else {
                    Err(ScannerError::Evaluation(format!(
                        "undeclared reference to {:?} in {:?}",
                        name, source
                    )))
                }
            }
            Expr::Member(base, _) => self.check_idents(base, source),
            Expr::Index(base, idx) => {
                self.check_idents(base, source)?;
                self.check_idents(idx, source)
            }
            Expr::Call {
                receiver,
                name,
                args,
            } => {
                if let Some(r) = receiver {
                    self.check_idents(r, source)?;
                    if !functions::is_builtin(name) {
                        return Err(ScannerError::Evaluation(format!(
                            "unknown member function {:?} in {:?}",
                            name, source
                        )));
                    }
                } else if !functions::is_builtin(name) && !self.rule_results.contains_key(name) {
                    return Err(ScannerError::Evaluation(format!(
                        "unknown function {:?} in {:?}",
                        name, source
                    )));
                }
                for a in args {
                    self.check_idents(a, source)?;
                }
                Ok(())
            }
            Expr::Unary(_, inner) => self.check_idents(inner, source),
            Expr::Binary(_, lhs, rhs) => {
                self.check_idents(lhs, source)?;
                self.check_idents(rhs, source)
            }
            _ => Ok(()),
        }
    }
}

struct EvalRun<'a> {
    vars: &'a HashMap<String, Value>,
    rules: &'a HashMap<String, bool>,
}

impl<'a> EvalRun<'a> {
    fn eval(&self, expr: &Expr) -> Result<Value, ScannerError> {
        match expr {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bytes(b) => Ok(Value::Bytes(b.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name) => self.lookup(name),
            Expr::Member(base, field) => {
                let base = self.eval(base)?;
                member_access(&base, field)
            }
            Expr::Index(base, idx) => {
                let base = self.eval(base)?;
                let idx = self.eval(idx)?;
                index_access(&base, &idx)
            }
            Expr::Call {
                receiver,
                name,
                args,
            } => {
                if receiver.is_none() {
                    if let Some(result) = self.rules.get(name) {
                        if !args.is_empty() {
                            return Err(ScannerError::Evaluation(format!(
                                "rule binding {}() takes no arguments",
                                name
                            )));
                        }
                        return Ok(Value::Bool(*result));
                    }
                }
                let arg_values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                match receiver {
                    Some(r) => {
                        let recv = self.eval(r)?;
                        functions::call_member(name, &recv, &arg_values)
                    }
                    None => functions::call_free(name, &arg_values),
                }
            }
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                match (op, v) {
                    (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
                    (op, v) => Err(ScannerError::Evaluation(format!(
                        "unary {:?} not applicable to {}",
                        op,
                        v.type_name()
                    ))),
                }
            }
            Expr::Binary(BinOp::And, lhs, rhs) => self.eval_and(lhs, rhs),
            Expr::Binary(BinOp::Or, lhs, rhs) => self.eval_or(lhs, rhs),
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary_op(*op, &l, &r)
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ScannerError> {
        if let Some(v) = self.vars.get(name) {
            return Ok(v.clone());
        }
        // Bare rule-name references resolve to the bound result.
        if let Some(b) = self.rules.get(name) {
            return Ok(Value::Bool(*b));
        }
        Err(ScannerError::Evaluation(format!(
            "no such attribute {:?}",
            name
        )))
    }

    /// Short-circuit AND with error absorption: a false side wins even if
    /// the other side errored.
    fn eval_and(&self, lhs: &Expr, rhs: &Expr) -> Result<Value, ScannerError> {
        match self.eval(lhs) {
            Ok(Value::Bool(false)) => Ok(Value::Bool(false)),
            Ok(Value::Bool(true)) => match self.eval(rhs)? {
                Value::Bool(b) => Ok(Value::Bool(b)),
                v => Err(non_bool("&&", &v)),
            },
            Ok(v) => Err(non_bool("&&", &v)),
            Err(e) => match self.eval(rhs) {
                Ok(Value::Bool(false)) => Ok(Value::Bool(false)),
                _ => Err(e),
            },
        }
    }

    /// Short-circuit OR with error absorption: a true side wins even if
    /// the other side errored.
    fn eval_or(&self, lhs: &Expr, rhs: &Expr) -> Result<Value, ScannerError> {
        match self.eval(lhs) {
            Ok(Value::Bool(true)) => Ok(Value::Bool(true)),
            Ok(Value::Bool(false)) => match self.eval(rhs)? {
                Value::Bool(b) => Ok(Value::Bool(b)),
                v => Err(non_bool("||", &v)),
            },
            Ok(v) => Err(non_bool("||", &v)),
            Err(e) => match self.eval(rhs) {
                Ok(Value::Bool(true)) => Ok(Value::Bool(true)),
                _ => Err(e),
            },
        }
    }
}

fn non_bool(op: &str, v: &Value) -> ScannerError {
    ScannerError::Evaluation(format!("{} operand is {}, not bool", op, v.type_name()))
}

fn binary_op(op: BinOp, l: &Value, r: &Value) -> Result<Value, ScannerError> {
    use BinOp::*;
    match op {
        Eq | Ne => {
            let eq = l.try_eq(r).ok_or_else(|| {
                ScannerError::Evaluation(format!(
                    "cannot compare {} with {}",
                    l.type_name(),
                    r.type_name()
                ))
            })?;
            Ok(Value::Bool(if op == Eq { eq } else { !eq }))
        }
        Lt | Le | Gt | Ge => {
            let ord = match (l, r) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => {
                    return Err(ScannerError::Evaluation(format!(
                        "cannot order {} against {}",
                        l.type_name(),
                        r.type_name()
                    )))
                }
            };
            let ok = match op {
                Lt => ord.is_lt(),
                Le => ord.is_le(),
                Gt => ord.is_gt(),
                Ge => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(ok))
        }
        Add => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            (Value::Bytes(a), Value::Bytes(b)) => {
                let mut out = a.clone();
                out.extend_from_slice(b);
                Ok(Value::Bytes(out))
            }
            _ => Err(ScannerError::Evaluation(format!(
                "cannot add {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        },
        Sub | Mul | Div | Rem => {
            let (a, b) = match (l, r) {
                (Value::Int(a), Value::Int(b)) => (*a, *b),
                _ => {
                    return Err(ScannerError::Evaluation(format!(
                        "arithmetic needs ints, got {} and {}",
                        l.type_name(),
                        r.type_name()
                    )))
                }
            };
            let out = match op {
                Sub => a.wrapping_sub(b),
                Mul => a.wrapping_mul(b),
                Div => {
                    if b == 0 {
                        return Err(ScannerError::Evaluation("division by zero".to_string()));
                    }
                    a / b
                }
                Rem => {
                    if b == 0 {
                        return Err(ScannerError::Evaluation("remainder by zero".to_string()));
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            Ok(Value::Int(out))
        }
        And | Or => unreachable!("handled with short-circuit evaluation"),
    }
}

fn member_access(base: &Value, field: &str) -> Result<Value, ScannerError> {
    let out = match base {
        Value::Response(r) => match field {
            "status" => Value::Int(r.status as i64),
            "url" => Value::Url(r.url.clone()),
            "headers" => Value::Map(r.headers.clone()),
            "content_type" => Value::Str(r.content_type.clone()),
            "body" => Value::Bytes(r.body.clone()),
            "raw" => Value::Bytes(r.raw.clone()),
            "raw_header" => Value::Bytes(r.raw_header.clone()),
            "latency" => Value::Int(r.latency_ms),
            "icon_hash" => Value::Str(r.icon_hash.clone()),
            _ => return no_field("Response", field),
        },
        Value::Request(r) => match field {
            "method" => Value::Str(r.method.clone()),
            "url" => Value::Url(r.url.clone()),
            "headers" => Value::Map(r.headers.clone()),
            "content_type" => Value::Str(r.content_type.clone()),
            "body" => Value::Bytes(r.body.clone()),
            "raw" => Value::Bytes(r.raw.clone()),
            "raw_header" => Value::Bytes(r.raw_header.clone()),
            _ => return no_field("Request", field),
        },
        Value::Url(u) => match field {
            "scheme" => Value::Str(u.scheme.clone()),
            "domain" => Value::Str(u.domain.clone()),
            "host" => Value::Str(u.host.clone()),
            "port" => Value::Str(u.port.clone()),
            "path" => Value::Str(u.path.clone()),
            "query" => Value::Str(u.query.clone()),
            "fragment" => Value::Str(u.fragment.clone()),
            _ => return no_field("UrlType", field),
        },
        Value::Reverse(r) => match field {
            "url" => Value::Url(r.url.clone()),
            "domain" => Value::Str(r.domain.clone()),
            "ip" => Value::Str(r.ip.clone()),
            "is_domain_name_server" => Value::Bool(r.is_domain_name_server),
            _ => return no_field("Reverse", field),
        },
        Value::Map(m) => match m.get(field) {
            Some(v) => Value::Str(v.clone()),
            None => {
                return Err(ScannerError::Evaluation(format!(
                    "no such key {:?} in map",
                    field
                )))
            }
        },
        other => {
            return Err(ScannerError::Evaluation(format!(
                "{} has no members",
                other.type_name()
            )))
        }
    };
    Ok(out)
}

fn no_field(ty: &str, field: &str) -> Result<Value, ScannerError> {
    Err(ScannerError::Evaluation(format!(
        "{} has no field {:?}",
        ty, field
    )))
}

fn index_access(base: &Value, idx: &Value) -> Result<Value, ScannerError> {
    match (base, idx) {
        (Value::Map(m), Value::Str(k)) => match m.get(k) {
            Some(v) => Ok(Value::Str(v.clone())),
            None => Err(ScannerError::Evaluation(format!(
                "no such key {:?} in map",
                k
            ))),
        },
        (b, i) => Err(ScannerError::Evaluation(format!(
            "cannot index {} with {}",
            b.type_name(),
            i.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpResponse;

    fn ctx_and_vars(status: i32, server: &str, body: &[u8]) -> (CelContext, HashMap<String, Value>) {
        let mut resp = HttpResponse::placeholder(status);
        resp.headers.insert("server".into(), server.to_string());
        resp.body = body.to_vec();
        let mut vars = HashMap::new();
        vars.insert("response".to_string(), Value::Response(Arc::new(resp)));
        vars.insert("title".to_string(), Value::Str("Login".into()));
        vars.insert("server".to_string(), Value::Str(server.to_string()));
        (CelContext::new(), vars)
    }

    #[test]
    fn test_status_and_header_match() {
        let (mut ctx, vars) = ctx_and_vars(200, "nginx/1.18.0", b"");
        let ok = ctx
            .evaluate_bool(
                r#"response.status == 200 && response.headers["server"].icontains("nginx")"#,
                &vars,
            )
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_missing_header_is_absorbed_by_or() {
        let (mut ctx, vars) = ctx_and_vars(200, "nginx", b"Jenkins dashboard");
        // The left side errors on the missing key; the true right side wins.
        let ok = ctx
            .evaluate_bool(
                r#"response.headers["x-jenkins"] != "" || response.body.bcontains(b"Jenkins")"#,
                &vars,
            )
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_missing_header_error_propagates_when_unrescued() {
        let (mut ctx, vars) = ctx_and_vars(200, "nginx", b"");
        let err = ctx
            .evaluate_bool(r#"response.headers["x-jenkins"] == "1""#, &vars)
            .unwrap_err();
        assert!(err.to_string().contains("x-jenkins"));
    }

    #[test]
    fn test_rule_bindings_conjunction() {
        // Invariant: r0 && r1 && r2 is true iff every binding is true.
        let (mut ctx, vars) = ctx_and_vars(200, "nginx", b"");
        ctx.set_rule_result("r0", true);
        ctx.set_rule_result("r1", true);
        ctx.set_rule_result("r2", true);
        assert!(ctx.evaluate_bool("r0() && r1() && r2()", &vars).unwrap());
        ctx.set_rule_result("r1", false);
        assert!(!ctx.evaluate_bool("r0() && r1() && r2()", &vars).unwrap());
        // Bare references behave like the call form.
        assert!(!ctx.evaluate_bool("r0 && r1 && r2", &vars).unwrap());
    }

    #[test]
    fn test_undeclared_identifier_is_compile_error() {
        let (mut ctx, vars) = ctx_and_vars(200, "nginx", b"");
        assert!(ctx.evaluate_bool("nosuchvar == 1", &vars).is_err());
        assert!(ctx.evaluate_bool("nosuchfn(1)", &vars).is_err());
    }

    #[test]
    fn test_apply_var_defs_types_and_literal_fallback() {
        let (mut ctx, mut vars) = ctx_and_vars(200, "nginx", b"");
        let defs = vec![
            ("num".to_string(), "40 + 2".to_string()),
            ("name".to_string(), r#""admin""#.to_string()),
            ("broken".to_string(), "this is not an expression".to_string()),
        ];
        ctx.apply_var_defs(&defs, &mut vars);
        assert!(matches!(vars.get("num"), Some(Value::Int(42))));
        assert!(matches!(vars.get("name"), Some(Value::Str(s)) if s == "admin"));
        assert!(
            matches!(vars.get("broken"), Some(Value::Str(s)) if s == "this is not an expression")
        );
        // Later definitions see earlier ones.
        let defs2 = vec![("doubled".to_string(), "num * 2".to_string())];
        ctx.apply_var_defs(&defs2, &mut vars);
        assert!(matches!(vars.get("doubled"), Some(Value::Int(84))));
    }

    #[test]
    fn test_string_concat_and_compare() {
        let (mut ctx, vars) = ctx_and_vars(200, "nginx", b"");
        assert!(ctx
            .evaluate_bool(r#""ab" + "cd" == "abcd""#, &vars)
            .unwrap());
        assert!(ctx.evaluate_bool(r#""a" < "b""#, &vars).unwrap());
    }

    #[test]
    fn test_url_members() {
        let mut resp = HttpResponse::placeholder(200);
        resp.url = crate::types::UrlRecord::from_str("https://example.com:8443/x?q=1").unwrap();
        let mut vars = HashMap::new();
        vars.insert("response".to_string(), Value::Response(Arc::new(resp)));
        let mut ctx = CelContext::new();
        assert!(ctx
            .evaluate_bool(r#"response.url.port == "8443" && response.url.path == "/x""#, &vars)
            .unwrap());
    }

    #[test]
    fn test_division_by_zero_is_runtime_error() {
        let (mut ctx, vars) = ctx_and_vars(200, "nginx", b"");
        assert!(ctx.evaluate_bool("1 / 0 == 1", &vars).is_err());
    }
}
