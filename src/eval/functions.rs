// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Expression Builtin Functions
 * The fixed helper-function library available to rule expressions
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use md5::{Digest, Md5};
use rand::Rng;

use crate::baseinfo::favicon::{mmh3_32, stand_base64};
use crate::errors::ScannerError;
use crate::eval::collab;
use crate::eval::value::Value;
use crate::str_utils;

/// Free functions callable without a receiver.
const FREE_FUNCTIONS: &[&str] = &[
    "substr",
    "replaceAll",
    "printable",
    "toUintString",
    "md5",
    "base64",
    "base64Decode",
    "urlencode",
    "urldecode",
    "hexdecode",
    "faviconHash",
    "randomInt",
    "randomLowercase",
    "sleep",
    "year",
    "shortyear",
    "month",
    "day",
    "timestamp_second",
    "newReverse",
    "newJNDI",
];

/// Member functions dispatched on a receiver value.
const MEMBER_FUNCTIONS: &[&str] = &[
    "icontains",
    "bcontains",
    "ibcontains",
    "bstartsWith",
    "bmatches",
    "submatch",
    "bsubmatch",
    "wait",
    "jndi",
];

pub fn is_builtin(name: &str) -> bool {
    FREE_FUNCTIONS.contains(&name) || MEMBER_FUNCTIONS.contains(&name)
}

fn type_err(func: &str, v: &Value) -> ScannerError {
    ScannerError::Evaluation(format!(
        "unexpected type '{}' passed to {}",
        v.type_name(),
        func
    ))
}

fn arity_err(func: &str, want: usize, got: usize) -> ScannerError {
    ScannerError::Evaluation(format!("{} expects {} argument(s), got {}", func, want, got))
}

fn want_str(func: &str, v: &Value) -> Result<String, ScannerError> {
    match v {
        Value::Str(s) => Ok(s.clone()),
        _ => Err(type_err(func, v)),
    }
}

fn want_bytes(func: &str, v: &Value) -> Result<Vec<u8>, ScannerError> {
    match v {
        Value::Bytes(b) => Ok(b.clone()),
        _ => Err(type_err(func, v)),
    }
}

fn want_int(func: &str, v: &Value) -> Result<i64, ScannerError> {
    match v {
        Value::Int(i) => Ok(*i),
        _ => Err(type_err(func, v)),
    }
}

fn one<'a>(func: &str, args: &'a [Value]) -> Result<&'a Value, ScannerError> {
    if args.len() != 1 {
        return Err(arity_err(func, 1, args.len()));
    }
    Ok(&args[0])
}

/// Dispatch a member function call.
pub fn call_member(name: &str, recv: &Value, args: &[Value]) -> Result<Value, ScannerError> {
    match name {
        "icontains" => {
            let s = want_str(name, recv)?;
            let t = want_str(name, one(name, args)?)?;
            Ok(Value::Bool(s.to_lowercase().contains(&t.to_lowercase())))
        }
        "bcontains" => {
            let b = want_bytes(name, recv)?;
            let t = want_bytes(name, one(name, args)?)?;
            Ok(Value::Bool(contains_subslice(&b, &t)))
        }
        "ibcontains" => {
            let b = want_bytes(name, recv)?.to_ascii_lowercase();
            let t = want_bytes(name, one(name, args)?)?.to_ascii_lowercase();
            Ok(Value::Bool(contains_subslice(&b, &t)))
        }
        "bstartsWith" => {
            let b = want_bytes(name, recv)?;
            let t = want_bytes(name, one(name, args)?)?;
            Ok(Value::Bool(b.starts_with(&t)))
        }
        "bmatches" => {
            let pattern = want_str(name, recv)?;
            let data = want_bytes(name, one(name, args)?)?;
            let re = regex::bytes::Regex::new(&pattern)
                .map_err(|e| ScannerError::Evaluation(format!("bmatches: {}", e)))?;
            Ok(Value::Bool(re.is_match(&data)))
        }
        "submatch" => {
            let pattern = want_str(name, recv)?;
            let data = want_str(name, one(name, args)?)?;
            named_captures(&pattern, data.as_bytes())
        }
        "bsubmatch" => {
            let pattern = want_str(name, recv)?;
            let data = want_bytes(name, one(name, args)?)?;
            named_captures(&pattern, &data)
        }
        "wait" => {
            let reverse = match recv {
                Value::Reverse(r) => r.clone(),
                other => return Err(type_err(name, other)),
            };
            let timeout = want_int(name, one(name, args)?)?;
            Ok(Value::Bool(collab::reverse_check(&reverse, timeout)))
        }
        "jndi" => {
            let reverse = match recv {
                Value::Reverse(r) => r.clone(),
                other => return Err(type_err(name, other)),
            };
            let timeout = want_int(name, one(name, args)?)?;
            Ok(Value::Bool(collab::jndi_check(&reverse, timeout)))
        }
        _ => Err(ScannerError::Evaluation(format!(
            "unknown member function {:?}",
            name
        ))),
    }
}

/// Dispatch a free function call.
pub fn call_free(name: &str, args: &[Value]) -> Result<Value, ScannerError> {
    match name {
        "substr" => {
            if args.len() != 3 {
                return Err(arity_err(name, 3, args.len()));
            }
            let s = want_str(name, &args[0])?;
            let start = want_int(name, &args[1])?;
            let length = want_int(name, &args[2])?;
            let runes: Vec<char> = s.chars().collect();
            if start < 0 || length < 0 || (start + length) as usize > runes.len() {
                return Err(ScannerError::Evaluation(
                    "invalid start or length to 'substr'".to_string(),
                ));
            }
            let out: String = runes[start as usize..(start + length) as usize].iter().collect();
            Ok(Value::Str(out))
        }
        "replaceAll" => {
            if args.len() != 3 {
                return Err(arity_err(name, 3, args.len()));
            }
            let s = want_str(name, &args[0])?;
            let old = want_str(name, &args[1])?;
            let new = want_str(name, &args[2])?;
            Ok(Value::Str(s.replace(&old, &new)))
        }
        "printable" => {
            let s = want_str(name, one(name, args)?)?;
            let clean: String = s.chars().filter(|c| !c.is_control()).collect();
            Ok(Value::Str(clean))
        }
        "toUintString" => {
            if args.len() != 2 {
                return Err(arity_err(name, 2, args.len()));
            }
            let mut s = want_str(name, &args[0])?;
            let direction = want_str(name, &args[1])?;
            if direction == "<" {
                s = str_utils::reverse_string(&s);
            }
            s.parse::<i64>()
                .map_err(|e| ScannerError::Evaluation(format!("toUintString: {}", e)))?;
            Ok(Value::Str(s))
        }
        "md5" => {
            let s = want_str(name, one(name, args)?)?;
            let mut hasher = Md5::new();
            hasher.update(s.as_bytes());
            Ok(Value::Str(format!("{:x}", hasher.finalize())))
        }
        "base64" => {
            let encoded = match one(name, args)? {
                Value::Str(s) => BASE64.encode(s.as_bytes()),
                Value::Bytes(b) => BASE64.encode(b),
                other => return Err(type_err(name, other)),
            };
            Ok(Value::Str(encoded))
        }
        "base64Decode" => {
            let data = match one(name, args)? {
                Value::Str(s) => s.clone().into_bytes(),
                Value::Bytes(b) => b.clone(),
                other => return Err(type_err(name, other)),
            };
            let decoded = BASE64
                .decode(data)
                .map_err(|e| ScannerError::Evaluation(format!("base64Decode: {}", e)))?;
            Ok(Value::Str(String::from_utf8_lossy(&decoded).into_owned()))
        }
        "urlencode" => {
            let data = match one(name, args)? {
                Value::Str(s) => s.clone(),
                Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                other => return Err(type_err(name, other)),
            };
            Ok(Value::Str(urlencode(&data)))
        }
        "urldecode" => {
            let data = match one(name, args)? {
                Value::Str(s) => s.clone(),
                Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                other => return Err(type_err(name, other)),
            };
            let decoded = urldecode(&data)
                .map_err(|e| ScannerError::Evaluation(format!("urldecode: {}", e)))?;
            Ok(Value::Str(decoded))
        }
        "hexdecode" => {
            let s = want_str(name, one(name, args)?)?;
            if s.len() % 2 != 0 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ScannerError::Evaluation(format!(
                    "hexdecode: invalid hex input {:?}",
                    s
                )));
            }
            let bytes = str_utils::from_hex(&s);
            Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
        }
        "faviconHash" => {
            let data = match one(name, args)? {
                Value::Str(s) => s.clone().into_bytes(),
                Value::Bytes(b) => b.clone(),
                other => return Err(type_err(name, other)),
            };
            Ok(Value::Int(mmh3_32(&stand_base64(&data)) as i64))
        }
        "randomInt" => {
            if args.len() != 2 {
                return Err(arity_err(name, 2, args.len()));
            }
            let min = want_int(name, &args[0])?;
            let max = want_int(name, &args[1])?;
            if max <= min {
                return Err(ScannerError::Evaluation(
                    "randomInt: max must be greater than min".to_string(),
                ));
            }
            Ok(Value::Int(rand::thread_rng().gen_range(min..max)))
        }
        "randomLowercase" => {
            let n = want_int(name, one(name, args)?)?;
            if n < 0 {
                return Err(ScannerError::Evaluation(
                    "randomLowercase: negative length".to_string(),
                ));
            }
            Ok(Value::Str(str_utils::random_letters(n as usize)))
        }
        "sleep" => {
            let n = want_int(name, one(name, args)?)?;
            if n > 0 {
                collab::blocking_sleep(std::time::Duration::from_secs(n as u64));
            }
            Ok(Value::Null)
        }
        // Time helpers keep the legacy signature: one int argument, ignored.
        "year" => legacy_time(name, args, "%Y"),
        "shortyear" => legacy_time(name, args, "%y"),
        "month" => legacy_time(name, args, "%m"),
        "day" => legacy_time(name, args, "%d"),
        "timestamp_second" => {
            check_legacy_arg(name, args)?;
            Ok(Value::Str(Local::now().timestamp().to_string()))
        }
        "newReverse" => Ok(Value::Reverse(std::sync::Arc::new(collab::new_reverse()))),
        "newJNDI" => Ok(Value::Reverse(std::sync::Arc::new(collab::new_jndi()))),
        _ => Err(ScannerError::Evaluation(format!(
            "unknown function {:?}",
            name
        ))),
    }
}

fn legacy_time(name: &str, args: &[Value], fmt: &str) -> Result<Value, ScannerError> {
    check_legacy_arg(name, args)?;
    Ok(Value::Str(Local::now().format(fmt).to_string()))
}

fn check_legacy_arg(name: &str, args: &[Value]) -> Result<(), ScannerError> {
    if args.len() != 1 {
        return Err(arity_err(name, 1, args.len()));
    }
    want_int(name, &args[0]).map(|_| ())
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn named_captures(pattern: &str, data: &[u8]) -> Result<Value, ScannerError> {
    let re = regex::bytes::Regex::new(pattern)
        .map_err(|e| ScannerError::Evaluation(format!("submatch: {}", e)))?;
    let mut out = std::collections::HashMap::new();
    if let Some(caps) = re.captures(data) {
        for cap_name in re.capture_names().flatten() {
            if let Some(m) = caps.name(cap_name) {
                out.insert(
                    cap_name.to_string(),
                    String::from_utf8_lossy(m.as_bytes()).into_owned(),
                );
            }
        }
    }
    Ok(Value::Map(out))
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*b as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn urldecode(s: &str) -> Result<String, String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = s
                    .get(i + 1..i + 3)
                    .ok_or_else(|| "truncated percent escape".to_string())?;
                let v = u8::from_str_radix(hex, 16).map_err(|e| e.to_string())?;
                out.push(v);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    fn b(v: &[u8]) -> Value {
        Value::Bytes(v.to_vec())
    }

    #[test]
    fn test_icontains() {
        let got = call_member("icontains", &s("Server: NGINX/1.18"), &[s("nginx")]).unwrap();
        assert_eq!(got.as_bool(), Some(true));
        let got = call_member("icontains", &s("apache"), &[s("nginx")]).unwrap();
        assert_eq!(got.as_bool(), Some(false));
    }

    #[test]
    fn test_byte_predicates() {
        assert_eq!(
            call_member("bcontains", &b(b"hello world"), &[b(b"lo wo")])
                .unwrap()
                .as_bool(),
            Some(true)
        );
        assert_eq!(
            call_member("ibcontains", &b(b"HELLO"), &[b(b"hello")])
                .unwrap()
                .as_bool(),
            Some(true)
        );
        assert_eq!(
            call_member("bstartsWith", &b(b"\x89PNG"), &[b(b"\x89P")])
                .unwrap()
                .as_bool(),
            Some(true)
        );
    }

    #[test]
    fn test_substr_rune_indexed() {
        let got = call_free("substr", &[s("你好世界"), Value::Int(1), Value::Int(2)]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "好世"));
        assert!(call_free("substr", &[s("ab"), Value::Int(1), Value::Int(5)]).is_err());
        assert!(call_free("substr", &[s("ab"), Value::Int(-1), Value::Int(1)]).is_err());
    }

    #[test]
    fn test_to_uint_string() {
        let got = call_free("toUintString", &[s("321"), s("<")]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "123"));
        assert!(call_free("toUintString", &[s("abc"), s(">")]).is_err());
    }

    #[test]
    fn test_codecs() {
        let got = call_free("md5", &[s("admin")]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "21232f297a57a5a743894a0e4a801fc3"));

        let got = call_free("base64", &[s("admin")]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "YWRtaW4="));

        let got = call_free("base64Decode", &[s("YWRtaW4=")]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "admin"));
        assert!(call_free("base64Decode", &[s("!!")]).is_err());

        let got = call_free("urlencode", &[s("a b&c")]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "a+b%26c"));

        let got = call_free("urldecode", &[s("a+b%26c")]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "a b&c"));

        let got = call_free("hexdecode", &[s("414243")]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "ABC"));
        assert!(call_free("hexdecode", &[s("41424")]).is_err());
    }

    #[test]
    fn test_submatch_named_captures() {
        let got = call_member(
            "submatch",
            &s(r"version (?P<major>\d+)\.(?P<minor>\d+)"),
            &[s("running version 2.14 now")],
        )
        .unwrap();
        match got {
            Value::Map(m) => {
                assert_eq!(m.get("major").map(String::as_str), Some("2"));
                assert_eq!(m.get("minor").map(String::as_str), Some("14"));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_bmatches() {
        let got = call_member("bmatches", &s(r"^HTTP/1\.\d"), &[b(b"HTTP/1.1 200 OK")]).unwrap();
        assert_eq!(got.as_bool(), Some(true));
    }

    #[test]
    fn test_random_helpers() {
        for _ in 0..50 {
            let got = call_free("randomInt", &[Value::Int(5), Value::Int(10)]).unwrap();
            match got {
                Value::Int(n) => assert!((5..10).contains(&n)),
                other => panic!("{:?}", other),
            }
        }
        let got = call_free("randomLowercase", &[Value::Int(8)]).unwrap();
        match got {
            Value::Str(v) => {
                assert_eq!(v.len(), 8);
                assert!(v.chars().all(|c| c.is_ascii_lowercase()));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_legacy_time_signature() {
        // The int argument is accepted and ignored.
        let year = call_free("year", &[Value::Int(0)]).unwrap();
        match year {
            Value::Str(v) => assert_eq!(v.len(), 4),
            other => panic!("{:?}", other),
        }
        assert!(call_free("year", &[]).is_err());
        let ts = call_free("timestamp_second", &[Value::Int(0)]).unwrap();
        match ts {
            Value::Str(v) => assert!(v.parse::<i64>().unwrap() > 1_600_000_000),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_favicon_hash_stability() {
        let a = call_free("faviconHash", &[b(b"\x89PNG fake image bytes")]).unwrap();
        let b2 = call_free("faviconHash", &[b(b"\x89PNG fake image bytes")]).unwrap();
        match (a, b2) {
            (Value::Int(x), Value::Int(y)) => assert_eq!(x, y),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_printable_strips_control_bytes() {
        let got = call_free("printable", &[s("ab\x01\x02cd\n")]).unwrap();
        assert!(matches!(got, Value::Str(ref v) if v == "abcd"));
    }
}
