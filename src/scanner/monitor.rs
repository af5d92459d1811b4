// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Memory Monitor
 * Periodic process-memory watchdog; releases scanner-owned caches
 * under pressure
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::System;
use tracing::{debug, info};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HIGH: u64 = 2 * 1024 * 1024 * 1024;
const DEFAULT_CRITICAL: u64 = 4 * 1024 * 1024 * 1024;
const USAGE_RATIO_LIMIT: f64 = 85.0;
const MAX_RELEASE_GAP: Duration = Duration::from_secs(120);

/// Hook invoked under memory pressure; wired to probe-cache and
/// transport-cache release by the orchestrator.
pub type ReleaseHook = Arc<dyn Fn(bool) + Send + Sync>;

pub struct MemoryMonitor {
    enabled: Arc<AtomicBool>,
    high_threshold: u64,
    critical_threshold: u64,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self::with_thresholds(DEFAULT_HIGH, DEFAULT_CRITICAL)
    }

    pub fn with_thresholds(high: u64, critical: u64) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(false)),
            high_threshold: high,
            critical_threshold: critical,
            handle: None,
        }
    }

    /// Start the 30-second watchdog loop. Idempotent.
    pub fn start(&mut self, release: ReleaseHook) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("memory monitor started");

        let enabled = Arc::clone(&self.enabled);
        let high = self.high_threshold;
        let critical = self.critical_threshold;
        self.handle = Some(tokio::spawn(async move {
            let mut sys = System::new();
            let mut last_release = Instant::now();
            let mut tick = tokio::time::interval(CHECK_INTERVAL);
            tick.tick().await;
            while enabled.load(Ordering::SeqCst) {
                tick.tick().await;
                check_pressure(&mut sys, high, critical, &mut last_release, &release);
            }
        }));
    }

    pub fn stop(&mut self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        info!("memory monitor stopped");
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn check_pressure(
    sys: &mut System,
    high: u64,
    critical: u64,
    last_release: &mut Instant,
    release: &ReleaseHook,
) {
    sys.refresh_memory();
    let Ok(pid) = sysinfo::get_current_pid() else {
        return;
    };
    if !sys.refresh_process(pid) {
        return;
    }
    let Some(process) = sys.process(pid) else {
        return;
    };

    let used = process.memory();
    let total = sys.total_memory().max(1);
    let ratio = used as f64 / total as f64 * 100.0;

    debug!(
        "memory usage: {:.2} MB ({:.1}% of system)",
        used as f64 / 1024.0 / 1024.0,
        ratio
    );

    let mut should_release = false;
    if used > high {
        debug!("process memory above high threshold");
        should_release = true;
    }
    if ratio > USAGE_RATIO_LIMIT {
        debug!("system memory ratio above {}%", USAGE_RATIO_LIMIT);
        should_release = true;
    }
    if last_release.elapsed() > MAX_RELEASE_GAP {
        should_release = true;
    }

    if should_release {
        let critical_hit = used > critical;
        if critical_hit {
            debug!("process memory above critical threshold, deep release");
        }
        release(critical_hit);
        *last_release = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let hook: ReleaseHook = Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let mut monitor = MemoryMonitor::new();
        monitor.start(Arc::clone(&hook));
        monitor.start(hook);
        monitor.stop();
        monitor.stop();
    }
}
