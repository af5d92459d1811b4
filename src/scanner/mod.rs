// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Scan Orchestrator
 * Target ingestion and deduplication, two-level worker pooling,
 * result aggregation and output fan-out
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod fingerprint;
pub mod monitor;

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::baseinfo::get_base_info;
use crate::cache::ProbeCache;
use crate::config::ScanConfig;
use crate::errors::ScannerError;
use crate::network::HttpClient;
use crate::output::OutputManager;
use crate::rules::model::Fingerprint;
use crate::rules::RuleStore;
use crate::scanner::fingerprint::{evaluate_fingerprint, RuleDeps};
use crate::techdetect::TechCatalog;
use crate::types::{BaseInfo, FingerMatch, TargetResult};
use crate::worker::{PoolStatsSnapshot, WorkerPool};

/// Per-target result channel capacity bound.
const RESULT_CHANNEL_CAP: usize = 512;

/// One (target, fingerprint) unit of work for the rule pool.
pub struct RuleTask {
    pub target: String,
    pub finger: Arc<Fingerprint>,
    pub base_info: Arc<BaseInfo>,
    pub proxy: String,
    pub timeout: u64,
    pub result_tx: mpsc::Sender<FingerMatch>,
}

struct TargetTask {
    target: String,
    _done: mpsc::Sender<()>,
}

#[derive(Debug)]
pub struct ScanSummary {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub rule_pool: PoolStatsSnapshot,
    /// One entry per unique target, keyed by the target string.
    pub results: HashMap<String, TargetResult>,
}

/// The scan engine: owns the rule store, probe cache, HTTP layer and
/// output sinks for one run.
pub struct Runner {
    pub config: ScanConfig,
    pub rules: Arc<RuleStore>,
    pub cache: Arc<ProbeCache>,
    pub http: Arc<HttpClient>,
    pub catalog: Arc<TechCatalog>,
    pub output: Arc<OutputManager>,
    running: AtomicBool,
}

struct ScanEnv {
    config: ScanConfig,
    cache: Arc<ProbeCache>,
    http: Arc<HttpClient>,
    catalog: Arc<TechCatalog>,
    output: Arc<OutputManager>,
    snapshot: Arc<Vec<Arc<Fingerprint>>>,
    rule_pool: Arc<WorkerPool<RuleTask>>,
    progress: ProgressBar,
    results: parking_lot::Mutex<HashMap<String, TargetResult>>,
    matched: AtomicUsize,
}

impl Runner {
    pub fn new(config: ScanConfig) -> Result<Self, ScannerError> {
        let output = OutputManager::new(
            config.output.as_deref(),
            config.json,
            config.sock.as_deref(),
        )?;
        Ok(Self {
            config,
            rules: Arc::new(RuleStore::new()),
            cache: Arc::new(ProbeCache::new()),
            http: Arc::new(HttpClient::new()),
            catalog: Arc::new(TechCatalog::new()),
            output: Arc::new(output),
            running: AtomicBool::new(false),
        })
    }

    /// Run the full scan: ingest targets, fan out across the target and
    /// rule pools, aggregate results and emit them to every sink.
    pub async fn run(&self) -> Result<ScanSummary, ScannerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScannerError::Configuration(
                "scanner is already running".to_string(),
            ));
        }
        let _running = RunningGuard(&self.running);

        let targets = gather_targets(&self.config)?;
        if targets.is_empty() {
            return Err(ScannerError::TargetParse(
                "no valid scan targets".to_string(),
            ));
        }
        info!("scanning {} targets", targets.len());

        let snapshot = self.rules.snapshot();
        info!(
            "{} fingerprints loaded, {} target workers, {} rule workers",
            snapshot.len(),
            self.config.url_workers,
            self.config.rule_workers
        );

        // Background maintenance for the run, released on every exit path.
        let sweeper = TaskGuard(self.cache.spawn_sweeper());
        let maintenance = TaskGuard(self.http.spawn_maintenance());

        let progress = ProgressBar::new(targets.len() as u64);
        progress.set_style(
            ProgressStyle::with_template("fingerprinting [{bar:50}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        // Periodic redraw tolerates lost updates from racing println calls.
        let redraw = {
            let pb = progress.clone();
            TaskGuard(tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_millis(500));
                loop {
                    tick.tick().await;
                    pb.tick();
                }
            }))
        };

        let deps = Arc::new(RuleDeps {
            http: Arc::clone(&self.http),
            cache: Arc::clone(&self.cache),
            active: self.config.active,
        });
        let rule_pool = Arc::new(WorkerPool::new("rule", self.config.rule_workers, {
            let deps = Arc::clone(&deps);
            move |task: RuleTask| {
                let deps = Arc::clone(&deps);
                async move {
                    let result = evaluate_fingerprint(
                        &deps,
                        &task.finger,
                        &task.target,
                        &task.base_info,
                        &task.proxy,
                        task.timeout,
                    )
                    .await;
                    if result.result && task.result_tx.try_send(result).is_err() {
                        debug!("result channel full, dropping a match");
                    }
                }
            }
        }));

        let env = Arc::new(ScanEnv {
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            http: Arc::clone(&self.http),
            catalog: Arc::clone(&self.catalog),
            output: Arc::clone(&self.output),
            snapshot: Arc::clone(&snapshot),
            rule_pool: Arc::clone(&rule_pool),
            progress: progress.clone(),
            results: parking_lot::Mutex::new(HashMap::with_capacity(targets.len())),
            matched: AtomicUsize::new(0),
        });

        let target_pool = WorkerPool::new("target", self.config.url_workers, {
            let env = Arc::clone(&env);
            move |task: TargetTask| {
                let env = Arc::clone(&env);
                async move {
                    run_target(&env, &task.target).await;
                }
            }
        });

        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        for target in &targets {
            let task = TargetTask {
                target: target.clone(),
                _done: done_tx.clone(),
            };
            if let Err(e) = target_pool.submit_wait(task).await {
                debug!("target {} not submitted: {}", target, e);
                env.progress.inc(1);
            }
        }
        drop(done_tx);
        // The latch: every task holds a sender clone; the channel closes
        // when the last one finishes.
        while done_rx.recv().await.is_some() {}

        drop(redraw);
        progress.finish_and_clear();
        drop(sweeper);
        drop(maintenance);

        let rule_stats = rule_pool.stats();
        info!(
            "rule pool stats - submitted: {}, completed: {}, failed: {}",
            rule_stats.submitted, rule_stats.completed, rule_stats.failed
        );

        self.cache.clear();

        let matched = env.matched.load(Ordering::SeqCst);
        let results = std::mem::take(&mut *env.results.lock());
        Ok(ScanSummary {
            total: targets.len(),
            matched,
            unmatched: targets.len().saturating_sub(matched),
            rule_pool: rule_stats,
            results,
        })
    }

}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Aborts a background task on drop.
struct TaskGuard(tokio::task::JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_target(env: &Arc<ScanEnv>, target: &str) {
    let mut result = process_target(env, target).await;

    let pb = env.progress.clone();
    env.output
        .handle_result(&result, move |line| pb.println(line))
        .await;

    if !result.matches.is_empty() {
        env.matched.fetch_add(1, Ordering::SeqCst);
    }
    // Sinks are done with the payloads; drop them before the result is
    // retained.
    result.release_heavy_fields();
    env.results.lock().insert(target.to_string(), result);
    env.progress.inc(1);
}

/// Process one target: base info, rule fan-out, cache invalidation.
async fn process_target(env: &Arc<ScanEnv>, target: &str) -> TargetResult {
    let mut result = TargetResult::empty(target);

    let base = match get_base_info(
        &env.http,
        &env.catalog,
        target,
        &env.config.proxy,
        env.config.timeout,
        env.config.retries,
    )
    .await
    {
        Ok(base) => base,
        Err(e) => {
            debug!("base info failed for {}: {}", target, e);
            return result;
        }
    };

    result.url = base.url.clone();
    result.status_code = base.status_code;
    result.title = base.title.clone();
    result.server = base.server.clone();
    result.technologies = base.technologies.clone();
    result.last_request = Some(base.request.clone());
    result.last_response = Some(base.response.clone());

    // Seed the cache with the canonical root pair so passive rules reuse
    // it instead of re-probing.
    env.cache.store(&base.url, true, &base.request, &base.response);

    if env.snapshot.is_empty() {
        return result;
    }

    let base_info = Arc::new(BaseInfo {
        title: base.title.clone(),
        server: base.server.clone(),
        status_code: base.status_code,
    });

    let cap = env.snapshot.len().clamp(1, RESULT_CHANNEL_CAP);
    let (result_tx, mut result_rx) = mpsc::channel::<FingerMatch>(cap);

    for finger in env.snapshot.iter() {
        let task = RuleTask {
            target: base.url.clone(),
            finger: Arc::clone(finger),
            base_info: Arc::clone(&base_info),
            proxy: env.config.proxy.clone(),
            timeout: env.config.timeout,
            result_tx: result_tx.clone(),
        };
        if let Err(e) = env.rule_pool.submit(task).await {
            // The missing rule contributes false to this target.
            debug!("fingerprint {} not submitted: {}", finger.id, e);
        }
    }
    drop(result_tx);

    let mut matches = Vec::new();
    while let Some(m) = result_rx.recv().await {
        matches.push(m);
    }
    debug!(
        "target {} matched {}/{} fingerprints",
        base.url,
        matches.len(),
        env.snapshot.len()
    );
    result.matches = matches;

    // Bound long-tail memory once the target is finished.
    env.cache.invalidate_target(&base.url);

    result
}

/// Collect scan targets from the CLI list or the targets file, trimmed
/// and deduplicated, reporting (original, duplicates, unique) counts.
pub fn gather_targets(config: &ScanConfig) -> Result<Vec<String>, ScannerError> {
    if !config.targets.is_empty() {
        let original = config.targets.len();
        let unique = dedupe(config.targets.iter().map(|s| s.as_str()));
        info!(
            "targets: {} given, {} duplicates, {} unique",
            original,
            original - unique.len(),
            unique.len()
        );
        return Ok(unique);
    }

    let Some(path) = &config.targets_file else {
        return Err(ScannerError::Configuration(
            "no targets and no target file".to_string(),
        ));
    };
    let file = std::fs::File::open(path)
        .map_err(|e| ScannerError::Configuration(format!("{}: {}", path.display(), e)))?;
    // Streamed with a wide buffer so unusually long lines survive.
    let reader = std::io::BufReader::with_capacity(1024 * 1024, file);

    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut total = 0usize;
    for line in reader.lines() {
        let line = line.map_err(|e| ScannerError::Configuration(format!("{}: {}", path.display(), e)))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        total += 1;
        if seen.insert(trimmed.to_string()) {
            unique.push(trimmed.to_string());
        }
    }
    info!(
        "targets: {} read, {} duplicates, {} unique",
        total,
        total - unique.len(),
        unique.len()
    );
    Ok(unique)
}

fn dedupe<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleInput;
    use std::io::Write;

    fn config_with_targets(targets: Vec<String>) -> ScanConfig {
        ScanConfig {
            targets,
            targets_file: None,
            output: None,
            json: false,
            sock: None,
            proxy: String::new(),
            url_workers: 2,
            rule_workers: 200,
            timeout: 5,
            retries: 2,
            max_redirects: 5,
            active: false,
            rule_input: RuleInput::default(),
        }
    }

    #[test]
    fn test_dedupe_preserves_order() {
        let got = dedupe(["b", "a", "b", " a ", "c", ""].into_iter());
        assert_eq!(got, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_gather_targets_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http://a.example.com").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  http://b.example.com  ").unwrap();
        writeln!(file, "http://a.example.com").unwrap();

        let mut config = config_with_targets(vec![]);
        config.targets_file = Some(file.path().to_path_buf());
        let targets = gather_targets(&config).unwrap();
        assert_eq!(targets, vec!["http://a.example.com", "http://b.example.com"]);
    }

    #[test]
    fn test_gather_targets_missing_file_fails() {
        let mut config = config_with_targets(vec![]);
        config.targets_file = Some("no-such-file.txt".into());
        assert!(gather_targets(&config).is_err());
    }

    #[tokio::test]
    async fn test_runner_refuses_empty_targets() {
        let runner = Runner::new(config_with_targets(vec!["  ".into()])).unwrap();
        assert!(runner.run().await.is_err());
    }
}
