mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pipewatch::config::{self, WatchdogConfig};
use pipewatch::engine::WatchdogEngine;
use pipewatch::sink::{EventSink, NullSink, WebhookSink};

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.tracing_filter());

    let cfg = match config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    if cli.status {
        print_status(&cfg);
        return ExitCode::SUCCESS;
    }

    match run_engine(cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn print_status(cfg: &WatchdogConfig) {
    println!("log file:        {}", cfg.log_file_path.display());
    println!("monitor interval: {}s", cfg.monitor_interval);
    println!("state rules:      {}", cfg.rules.len());
    for rule in &cfg.rules {
        let path: Vec<String> = std::iter::once(rule.start_node.clone())
            .chain(rule.transitions.iter().map(|t| t.target_node.clone()))
            .collect();
        println!("  {} : {}", rule.name, path.join(" -> "));
    }
    println!("entry nodes:      {}", cfg.entries.len());
    println!("completion nodes: {}", cfg.completion_nodes.len());
}

fn run_engine(cfg: WatchdogConfig) -> Result<()> {
    let sink: Arc<dyn EventSink> = match cfg.webhook.clone() {
        Some(target) => Arc::new(WebhookSink::new(target, cfg.notify_when.clone())),
        None => Arc::new(NullSink),
    };

    let interval = Duration::from_secs_f64(cfg.monitor_interval);
    let mut engine = WatchdogEngine::new(&cfg.log_file_path, interval);
    for rule in cfg.rules {
        engine.add_state_rule(rule.name, rule.start_node, rule.transitions, rule.description);
    }
    for entry in cfg.entries {
        engine.add_entry_node(entry.name, entry.node_name, entry.description);
    }
    engine.set_completion_nodes(cfg.completion_nodes);
    engine.set_callback(sink);

    let stop = engine.stop_handle();
    ctrlc::set_handler(move || stop.stop())?;

    engine.run()
}
