// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Scanner Error Types
 * Error taxonomy for the fingerprint scan engine, built on thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::time::Duration;
use thiserror::Error;

/// Main scanner error type
#[derive(Error, Debug)]
pub enum ScannerError {
    /// Network-related errors (probe layer)
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Configuration errors - fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fingerprint rule loading errors - fatal at startup
    #[error("Rule load error: {0}")]
    RuleLoad(String),

    /// Target string could not be parsed into a scannable URL/host
    #[error("Target parse error: {0}")]
    TargetParse(String),

    /// Expression compile or runtime failure; demotes the rule to false
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Probe cache failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Output sink failure; logged, never fatal for the scan
    #[error("Output error: {0}")]
    Output(String),

    /// Worker pool rejected a task submit after backoff
    #[error("Pool submit failed: {0}")]
    PoolSubmit(String),

    /// A worker task panicked; recovered by the pool
    #[error("Internal panic in worker: {0}")]
    InternalPanic(String),
}

/// Network errors with per-probe classification.
///
/// Retries apply only to `Connect` and `Timeout`.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("DNS resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("Connection failed for {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("TLS handshake failed for {host}: {reason}")]
    Tls { host: String, reason: String },

    #[error("Request timed out after {timeout:?} for {url}")]
    Timeout { url: String, timeout: Duration },

    #[error("Too many redirects (>{max_redirects}) for {url}")]
    RedirectLimit { url: String, max_redirects: usize },

    #[error("Protocol error for {url}: {reason}")]
    Protocol { url: String, reason: String },

    #[error("Failed to read response body for {url}: {reason}")]
    BodyRead { url: String, reason: String },
}

impl NetworkError {
    /// Whether the probe layer should retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Connect { .. } | NetworkError::Timeout { .. })
    }

    /// Classify a reqwest failure into the scanner taxonomy.
    pub fn from_reqwest(err: reqwest::Error, url: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            return NetworkError::Timeout { url: url.to_string(), timeout };
        }
        let reason = err.to_string();
        if err.is_connect() {
            // reqwest folds DNS and TLS failures into connect errors; pick
            // them apart by the underlying message.
            let lower = reason.to_lowercase();
            let host = host_of(url);
            if lower.contains("dns") || lower.contains("resolve") {
                return NetworkError::Dns { host, reason };
            }
            if lower.contains("tls") || lower.contains("ssl") || lower.contains("certificate") {
                return NetworkError::Tls { host, reason };
            }
            return NetworkError::Connect { url: url.to_string(), reason };
        }
        if err.is_body() || err.is_decode() {
            return NetworkError::BodyRead { url: url.to_string(), reason };
        }
        NetworkError::Protocol { url: url.to_string(), reason }
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

pub type Result<T> = std::result::Result<T, ScannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let connect = NetworkError::Connect {
            url: "http://a".into(),
            reason: "refused".into(),
        };
        let timeout = NetworkError::Timeout {
            url: "http://a".into(),
            timeout: Duration::from_secs(5),
        };
        let redirect = NetworkError::RedirectLimit {
            url: "http://a".into(),
            max_redirects: 5,
        };
        assert!(connect.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!redirect.is_retryable());
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = ScannerError::from(NetworkError::Dns {
            host: "internal.example".into(),
            reason: "no such host".into(),
        });
        let msg = err.to_string();
        assert!(msg.contains("internal.example"));
        assert!(msg.contains("DNS"));
    }
}
