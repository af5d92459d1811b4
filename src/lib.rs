// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Batch Web-Application Fingerprint Scanner
 * Declarative YAML fingerprints, a CEL-style expression engine and
 * two-level worker pooling over an HTTP/TCP/UDP probe layer
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod baseinfo;
pub mod cache;
pub mod config;
pub mod errors;
pub mod eval;
pub mod network;
pub mod output;
pub mod rules;
pub mod scanner;
pub mod str_utils;
pub mod techdetect;
pub mod types;
pub mod worker;

pub use cache::ProbeCache;
pub use config::{CliArgs, ScanConfig};
pub use errors::{NetworkError, ScannerError};
pub use rules::{Fingerprint, RuleInput, RuleStore};
pub use scanner::{Runner, ScanSummary};
pub use types::{FingerMatch, HttpRequest, HttpResponse, TargetResult};
