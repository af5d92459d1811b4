// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - CLI Surface & Scan Configuration
 * Flag parsing, validation and bound clamping
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tracing::warn;

use crate::errors::ScannerError;
use crate::rules::RuleInput;

pub const DEFAULT_URL_WORKERS: usize = 5;
pub const DEFAULT_RULE_WORKERS: usize = 200;
pub const MIN_RULE_WORKERS: usize = 200;
pub const MAX_RULE_WORKERS: usize = 5000;

/// Web-application fingerprint scanner
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "tunnistin",
    author = "Bountyy Oy <info@bountyy.fi>",
    version,
    about = "Batch web-application fingerprint scanner",
    disable_version_flag = true
)]
pub struct CliArgs {
    /// Scan targets: URLs, hosts or host:port, comma separated or repeated
    #[arg(short = 'u', long = "url", value_delimiter = ',')]
    pub url: Vec<String>,

    /// File with one scan target per line
    #[arg(short = 'l', long = "list")]
    pub list: Option<PathBuf>,

    /// Output file; .txt or .csv by extension, or JSON with --json
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Force JSON output format for the output file
    #[arg(long)]
    pub json: bool,

    /// Unix-domain socket result output (.sock)
    #[arg(long)]
    pub sock: Option<PathBuf>,

    /// HTTP client proxy: [http|https|socks5://][user[:pass]@]host[:port]
    #[arg(short = 'p', long = "proxy")]
    pub proxy: Option<String>,

    /// Concurrent target workers
    #[arg(short = 't', long = "threads", default_value_t = DEFAULT_URL_WORKERS as i64)]
    pub threads: i64,

    /// Concurrent rule workers
    #[arg(long = "rule-threads", default_value_t = DEFAULT_RULE_WORKERS as i64)]
    pub rule_threads: i64,

    /// Read timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub timeout: i64,

    /// Retries for failed probes
    #[arg(long, default_value_t = 2)]
    pub retries: i64,

    /// Maximum HTTP redirect hops
    #[arg(long = "max-redirects", default_value_t = 5)]
    pub max_redirects: i64,

    /// Fingerprint YAML files
    #[arg(short = 'f', long = "finger", value_delimiter = ',')]
    pub finger: Vec<PathBuf>,

    /// Fingerprint directory, walked recursively
    #[arg(long = "finger-path")]
    pub finger_path: Option<PathBuf>,

    /// Enable active probes (non-root paths, non-GET methods)
    #[arg(short = 'a', long)]
    pub active: bool,

    /// Print debug logs
    #[arg(long)]
    pub debug: bool,

    /// Drop timestamps from log lines
    #[arg(long = "no-timestamp")]
    pub no_timestamp: bool,

    /// Also write logs to a file
    #[arg(long = "file-log")]
    pub file_log: bool,

    /// Write a configuration template and exit
    #[arg(long = "init-config")]
    pub init_config: bool,

    /// Print the preset configuration and exit
    #[arg(long = "print")]
    pub print_preset: bool,

    /// Configuration file path
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Print version information and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    pub version: bool,
}

/// Optional YAML configuration file; CLI flags win over it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub proxy: Option<String>,
    pub threads: Option<i64>,
    pub rule_threads: Option<i64>,
    pub timeout: Option<i64>,
    pub retries: Option<i64>,
    pub max_redirects: Option<i64>,
}

pub const CONFIG_TEMPLATE: &str = "\
# tunnistin configuration
# CLI flags take precedence over values set here.

# proxy: socks5://127.0.0.1:1080
# threads: 5
# rule_threads: 200
# timeout: 5
# retries: 2
# max_redirects: 5
";

/// Validated scan configuration handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub targets: Vec<String>,
    pub targets_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub json: bool,
    pub sock: Option<PathBuf>,
    pub proxy: String,
    pub url_workers: usize,
    pub rule_workers: usize,
    pub timeout: u64,
    pub retries: u32,
    pub max_redirects: usize,
    pub active: bool,
    pub rule_input: RuleInput,
}

impl CliArgs {
    /// Merge a config file (when present) under the CLI values, then
    /// validate and clamp into a `ScanConfig`.
    pub fn into_scan_config(mut self) -> Result<ScanConfig, ScannerError> {
        if let Ok(raw) = std::fs::read_to_string(&self.config) {
            match serde_yaml::from_str::<ConfigFile>(&raw) {
                Ok(file) => self.merge_config_file(file),
                Err(e) => {
                    return Err(ScannerError::Configuration(format!(
                        "{}: {}",
                        self.config.display(),
                        e
                    )))
                }
            }
        }

        if self.url.is_empty() && self.list.is_none() {
            return Err(ScannerError::Configuration(
                "a scan target is required: use -u/--url or -l/--list".to_string(),
            ));
        }

        if let Some(output) = &self.output {
            if !self.json {
                let ext = output
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase())
                    .unwrap_or_default();
                if ext != "txt" && ext != "csv" {
                    return Err(ScannerError::Configuration(
                        "output file must end in .txt or .csv; use --json for JSON output"
                            .to_string(),
                    ));
                }
            }
        }

        if let Some(sock) = &self.sock {
            let ext = sock
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if ext != "sock" {
                return Err(ScannerError::Configuration(
                    "socket output path must end in .sock".to_string(),
                ));
            }
        }

        let url_workers = if self.threads <= 0 {
            warn!("invalid thread count, falling back to {}", DEFAULT_URL_WORKERS);
            DEFAULT_URL_WORKERS
        } else {
            self.threads as usize
        };

        // Rule workers are clamped into their bounds no matter what the
        // flag said.
        let rule_workers = if self.rule_threads <= 0 {
            DEFAULT_RULE_WORKERS
        } else {
            self.rule_threads as usize
        }
        .clamp(MIN_RULE_WORKERS, MAX_RULE_WORKERS);

        let timeout = if self.timeout <= 0 {
            warn!("invalid timeout, falling back to 5s");
            5
        } else {
            self.timeout as u64
        };
        let retries = if self.retries < 0 {
            warn!("invalid retry count, falling back to 1");
            1
        } else {
            self.retries as u32
        };
        let max_redirects = if self.max_redirects < 0 {
            warn!("invalid redirect bound, falling back to 5");
            5
        } else {
            self.max_redirects as usize
        };

        Ok(ScanConfig {
            targets: self.url,
            targets_file: self.list,
            output: self.output,
            json: self.json,
            sock: self.sock,
            proxy: self.proxy.unwrap_or_default(),
            url_workers,
            rule_workers,
            timeout,
            retries,
            max_redirects,
            active: self.active,
            rule_input: RuleInput {
                files: self.finger,
                dir: self.finger_path,
            },
        })
    }

    fn merge_config_file(&mut self, file: ConfigFile) {
        if self.proxy.is_none() {
            self.proxy = file.proxy;
        }
        if self.threads == DEFAULT_URL_WORKERS as i64 {
            if let Some(v) = file.threads {
                self.threads = v;
            }
        }
        if self.rule_threads == DEFAULT_RULE_WORKERS as i64 {
            if let Some(v) = file.rule_threads {
                self.rule_threads = v;
            }
        }
        if self.timeout == 5 {
            if let Some(v) = file.timeout {
                self.timeout = v;
            }
        }
        if self.retries == 2 {
            if let Some(v) = file.retries {
                self.retries = v;
            }
        }
        if self.max_redirects == 5 {
            if let Some(v) = file.max_redirects {
                self.max_redirects = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            url: vec!["http://example.com".into()],
            threads: DEFAULT_URL_WORKERS as i64,
            rule_threads: DEFAULT_RULE_WORKERS as i64,
            timeout: 5,
            retries: 2,
            max_redirects: 5,
            config: PathBuf::from("does-not-exist.yaml"),
            ..Default::default()
        }
    }

    #[test]
    fn test_rule_threads_clamped_both_ways() {
        let mut args = base_args();
        args.rule_threads = 1;
        assert_eq!(args.into_scan_config().unwrap().rule_workers, 200);

        let mut args = base_args();
        args.rule_threads = 50_000;
        assert_eq!(args.into_scan_config().unwrap().rule_workers, 5000);

        let mut args = base_args();
        args.rule_threads = 1234;
        assert_eq!(args.into_scan_config().unwrap().rule_workers, 1234);

        let mut args = base_args();
        args.rule_threads = -3;
        assert_eq!(args.into_scan_config().unwrap().rule_workers, 200);
    }

    #[test]
    fn test_target_required() {
        let mut args = base_args();
        args.url.clear();
        assert!(args.into_scan_config().is_err());
    }

    #[test]
    fn test_output_extension_enforced() {
        let mut args = base_args();
        args.output = Some(PathBuf::from("results.xml"));
        assert!(args.into_scan_config().is_err());

        let mut args = base_args();
        args.output = Some(PathBuf::from("results.xml"));
        args.json = true;
        assert!(args.into_scan_config().is_ok());

        let mut args = base_args();
        args.output = Some(PathBuf::from("results.csv"));
        assert!(args.into_scan_config().is_ok());
    }

    #[test]
    fn test_sock_extension_enforced() {
        let mut args = base_args();
        args.sock = Some(PathBuf::from("out.socket"));
        assert!(args.into_scan_config().is_err());

        let mut args = base_args();
        args.sock = Some(PathBuf::from("out.sock"));
        assert!(args.into_scan_config().is_ok());
    }

    #[test]
    fn test_config_file_fills_unset_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "proxy: socks5://127.0.0.1:1080\ntimeout: 9\n").unwrap();

        let mut args = base_args();
        args.config = path;
        let config = args.into_scan_config().unwrap();
        assert_eq!(config.proxy, "socks5://127.0.0.1:1080");
        assert_eq!(config.timeout, 9);
    }

    #[test]
    fn test_cli_wins_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "timeout: 9\n").unwrap();

        let mut args = base_args();
        args.config = path;
        args.timeout = 30;
        let config = args.into_scan_config().unwrap();
        assert_eq!(config.timeout, 30);
    }
}
