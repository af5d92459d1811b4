// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - CLI Entry Point
 * Lifecycle: logging, flags, rules, cache, sinks, memory monitor,
 * scan, flush
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tunnistin::config::{CliArgs, CONFIG_TEMPLATE};
use tunnistin::scanner::monitor::MemoryMonitor;
use tunnistin::scanner::Runner;
use tunnistin::{output, RuleStore};

const BANNER: &str = r#"
  _                   _     _   _
 | |_ _  _ _ _  _ _  (_)___| |_(_)_ _
 |  _| || | ' \| ' \ | (_-<|  _| | ' \
  \__|\_,_|_||_|_||_||_/__/ \__|_|_||_|
"#;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    if args.version {
        println!("tunnistin {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if args.init_config {
        if let Err(e) = std::fs::write(&args.config, CONFIG_TEMPLATE) {
            eprintln!("failed to write {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
        println!("configuration template written to {}", args.config.display());
        return;
    }
    if args.print_preset {
        print_presets();
        return;
    }

    init_logging(&args);
    println!("{}", BANNER);

    let config = match args.into_scan_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let runner = match Runner::new(config) {
        Ok(runner) => runner,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    match runner.rules.load(&runner.config.rule_input) {
        Ok(count) => info!("{} fingerprints loaded", count),
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }

    // Under memory pressure release the probe cache; on critical
    // pressure also drop the HTTP transports.
    let mut monitor = MemoryMonitor::new();
    {
        let cache = Arc::clone(&runner.cache);
        let http = Arc::clone(&runner.http);
        monitor.start(Arc::new(move |critical| {
            cache.sweep();
            if critical {
                cache.clear();
                http.reset();
            }
        }));
    }

    let exit_code = match runner.run().await {
        Ok(summary) => {
            println!("{}", output::summary_line(summary.total, summary.matched));
            0
        }
        Err(e) => {
            error!("scan failed: {}", e);
            1
        }
    };

    runner.output.close().await;
    monitor.stop();
    std::process::exit(exit_code);
}

fn init_logging(args: &CliArgs) {
    let level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tunnistin={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if args.file_log {
        let appender = tracing_appender::rolling::never(".", "tunnistin.log");
        if args.no_timestamp {
            builder.without_time().with_writer(appender).init();
        } else {
            builder.with_writer(appender).init();
        }
        return;
    }
    if args.no_timestamp {
        builder.without_time().init();
    } else {
        builder.init();
    }
}

fn print_presets() {
    println!("target workers:   {}", tunnistin::config::DEFAULT_URL_WORKERS);
    println!(
        "rule workers:     {} (clamped to [{}, {}])",
        tunnistin::config::DEFAULT_RULE_WORKERS,
        tunnistin::config::MIN_RULE_WORKERS,
        tunnistin::config::MAX_RULE_WORKERS
    );
    println!("timeout:          5s");
    println!("retries:          2");
    println!("max redirects:    5");

    let store = RuleStore::new();
    match store.load(&tunnistin::RuleInput::default()) {
        Ok(count) => {
            println!("embedded rules:   {}", count);
            for finger in store.snapshot().iter() {
                println!("  - {} ({})", finger.id, finger.info.name);
            }
        }
        Err(e) => println!("embedded rules:   unavailable ({})", e),
    }
}
