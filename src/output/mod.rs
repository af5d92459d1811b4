// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Output Fan-out
 * Console lines, file sink and socket sink for scan results
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod file;
pub mod sock;

use std::path::Path;

use tracing::error;

use crate::errors::ScannerError;
use crate::types::TargetResult;

pub use file::{FileSink, OutputFormat, ResultFields};
pub use sock::SockSink;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Fan-out of finished targets to every configured sink. Sinks are
/// best-effort: one failing leaves the others running.
pub struct OutputManager {
    file: Option<FileSink>,
    sock: Option<SockSink>,
}

impl OutputManager {
    pub fn new(
        output_path: Option<&Path>,
        json: bool,
        sock_path: Option<&Path>,
    ) -> Result<Self, ScannerError> {
        let file = match output_path {
            Some(path) => {
                let format = OutputFormat::resolve(json, path);
                Some(FileSink::open(path, format)?)
            }
            None => None,
        };
        let sock = match sock_path {
            Some(path) => Some(SockSink::bind(path)?),
            None => None,
        };
        Ok(Self { file, sock })
    }

    /// Console line plus sink writes for one finished target.
    pub async fn handle_result<F: Fn(String)>(&self, result: &TargetResult, print: F) {
        let fields = ResultFields::from_result(result);
        print(console_line(result, &fields));

        if let Some(file) = &self.file {
            if let Err(e) = file.write(&fields) {
                error!("file sink write failed: {}", e);
            }
        }
        if let Some(sock) = &self.sock {
            if let Err(e) = sock.write(&fields).await {
                error!("socket sink write failed: {}", e);
            }
        }
    }

    pub async fn close(&self) {
        if let Some(sock) = &self.sock {
            sock.close().await;
        }
    }
}

fn console_line(result: &TargetResult, fields: &ResultFields) -> String {
    let status = if result.status_code > 0 {
        format!("({})", result.status_code)
    } else {
        String::new()
    };

    let mut line = format!(
        "URL: {} {}  Title: {}  Server: {}",
        result.url, status, result.title, fields.server
    );

    if let Some(tech) = &result.technologies {
        if !tech.is_empty() {
            let mut parts = Vec::new();
            if !tech.web_servers.is_empty() {
                parts.push(format!("WebServers: [{}]", tech.web_servers.join(", ")));
            }
            if !tech.programming_languages.is_empty() {
                parts.push(format!(
                    "Languages: [{}]",
                    tech.programming_languages.join(", ")
                ));
            }
            if !tech.web_frameworks.is_empty() {
                parts.push(format!("WebFrameworks: [{}]", tech.web_frameworks.join(", ")));
            }
            let js: Vec<String> = tech
                .javascript_frameworks
                .iter()
                .chain(tech.javascript_libraries.iter())
                .cloned()
                .collect();
            if !js.is_empty() {
                parts.push(format!("JS: [{}]", js.join(", ")));
            }
            if !parts.is_empty() {
                line.push_str("  ");
                line.push_str(&parts.join(" "));
            }
        }
    }

    if fields.matched {
        line.push_str(&format!(
            "  Fingers: [{}]  Match: {}matched{}",
            fields.finger_names.join(", "),
            GREEN,
            RESET
        ));
    } else {
        line.push_str(&format!("  Match: {}no match{}", RED, RESET));
    }
    line
}

/// Per-run summary, printed regardless of intermediate errors.
pub fn summary_line(total: usize, matched: usize) -> String {
    let unmatched = total.saturating_sub(matched);
    format!(
        "Scan summary: {} targets, {} matched, {} unmatched",
        total, matched, unmatched
    )
}
