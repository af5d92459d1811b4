// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Expression Value Model
 * Typed values flowing through the rule expression evaluator
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::types::{HttpRequest, HttpResponse, Reverse, UrlRecord};

/// Runtime value of the expression dialect.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Map(HashMap<String, String>),
    Request(Arc<HttpRequest>),
    Response(Arc<HttpResponse>),
    Url(UrlRecord),
    Reverse(Arc<Reverse>),
    Null,
}

/// Declared type of an environment variable; checked when an expression
/// is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Int,
    Str,
    Bytes,
    Bool,
    Map,
    Request,
    Response,
    Url,
    Reverse,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Bool(_) => "bool",
            Value::Map(_) => "map",
            Value::Request(_) => "Request",
            Value::Response(_) => "Response",
            Value::Url(_) => "UrlType",
            Value::Reverse(_) => "Reverse",
            Value::Null => "null",
        }
    }

    pub fn type_tag(&self) -> Option<TypeTag> {
        Some(match self {
            Value::Int(_) => TypeTag::Int,
            Value::Str(_) => TypeTag::Str,
            Value::Bytes(_) => TypeTag::Bytes,
            Value::Bool(_) => TypeTag::Bool,
            Value::Map(_) => TypeTag::Map,
            Value::Request(_) => TypeTag::Request,
            Value::Response(_) => TypeTag::Response,
            Value::Url(_) => TypeTag::Url,
            Value::Reverse(_) => TypeTag::Reverse,
            Value::Null => return None,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Textual rendering used for `{{var}}` substitution in paths and
    /// bodies. Maps are not substitutable.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Int(i) => Some(i.to_string()),
            Value::Str(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Url(u) => Some(u.to_url_string()),
            Value::Reverse(r) => Some(r.url.to_url_string()),
            Value::Null => Some(String::new()),
            Value::Map(_) | Value::Request(_) | Value::Response(_) => None,
        }
    }

    /// Loose equality matching the reference dialect: same-typed scalar
    /// comparison; anything else is a type error handled by the caller.
    pub fn try_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Str(a), Value::Str(b)) => Some(a == b),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a == b),
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            (Value::Null, Value::Null) => Some(true),
            (Value::Null, _) | (_, Value::Null) => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "<{}>", self.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_scalars() {
        assert_eq!(Value::Int(42).render().as_deref(), Some("42"));
        assert_eq!(Value::Str("x".into()).render().as_deref(), Some("x"));
        assert_eq!(Value::Null.render().as_deref(), Some(""));
        assert!(Value::Map(HashMap::new()).render().is_none());
    }

    #[test]
    fn test_try_eq_type_discipline() {
        assert_eq!(Value::Int(1).try_eq(&Value::Int(1)), Some(true));
        assert_eq!(Value::Int(1).try_eq(&Value::Str("1".into())), None);
        assert_eq!(Value::Null.try_eq(&Value::Int(1)), Some(false));
    }
}
