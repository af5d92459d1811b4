// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! CEL-style expression evaluator for fingerprint rules.
//!
//! Expressions are compiled once per ruleset and evaluated against a
//! typed variable map; rule names bind as zero-argument boolean
//! functions.

pub mod collab;
pub mod engine;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use engine::CelContext;
pub use value::{TypeTag, Value};
