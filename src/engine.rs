//! Engine loop (C4) — ties the tailer, line parser and state machine
//! together and drives them against a wall-clock tick, forwarding every
//! emitted event to a sink.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::node_parser;
use crate::sink::EventSink;
use crate::state_machine::{EntryNode, RuleStatus, StateMachine, StateRule, Transition};
use crate::tailer::LogTailer;

/// Builder-style engine: declare rules/entries/completions, attach a sink,
/// then `run()`.
pub struct WatchdogEngine {
    log_path: PathBuf,
    monitor_interval: Duration,
    rules: Vec<StateRule>,
    entries: Vec<EntryNode>,
    completion_nodes: std::collections::HashSet<String>,
    sink: Option<Arc<dyn EventSink>>,
    stop_flag: Arc<AtomicBool>,
}

impl WatchdogEngine {
    pub fn new(log_path: impl AsRef<Path>, monitor_interval: Duration) -> Self {
        Self {
            log_path: log_path.as_ref().to_path_buf(),
            monitor_interval,
            rules: Vec::new(),
            entries: Vec::new(),
            completion_nodes: std::collections::HashSet::new(),
            sink: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_state_rule(
        &mut self,
        name: impl Into<String>,
        start_node: impl Into<String>,
        transitions: Vec<Transition>,
        description: impl Into<String>,
    ) -> &mut Self {
        self.rules.push(StateRule::new(name, start_node, transitions, description));
        self
    }

    pub fn add_entry_node(
        &mut self,
        name: impl Into<String>,
        node_name: impl Into<String>,
        description: impl Into<String>,
    ) -> &mut Self {
        self.entries.push(EntryNode::new(name, node_name, description));
        self
    }

    pub fn set_completion_nodes(&mut self, nodes: impl IntoIterator<Item = String>) -> &mut Self {
        self.completion_nodes = nodes.into_iter().collect();
        self
    }

    pub fn set_callback(&mut self, sink: Arc<dyn EventSink>) -> &mut Self {
        self.sink = Some(sink);
        self
    }

    /// A clone of the atomic flag `run()` polls, so callers (e.g. a Ctrl-C
    /// handler on another thread) can request shutdown — the only datum
    /// shared across threads.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_flag.clone())
    }

    /// Blocks, tailing the log file and driving the state machine, until
    /// `stop()` is called via a [`StopHandle`]. Returns once shutdown is
    /// observed at a sleep boundary.
    pub fn run(&mut self) -> Result<()> {
        let mut tailer = LogTailer::open(&self.log_path)
            .with_context(|| format!("failed to open log file: {}", self.log_path.display()))?;
        let mut state_machine = StateMachine::new(
            std::mem::take(&mut self.rules),
            std::mem::take(&mut self.entries),
            std::mem::take(&mut self.completion_nodes),
        );
        let sink = self.sink.clone().unwrap_or_else(|| Arc::new(crate::sink::NullSink));
        let start = Instant::now();

        info!(log_path = %self.log_path.display(), "watchdog engine started");

        while !self.stop_flag.load(Ordering::Relaxed) {
            std::thread::sleep(self.monitor_interval);
            if self.stop_flag.load(Ordering::Relaxed) {
                break;
            }

            let (lines, notices) = tailer.poll()?;

            for notice in notices {
                debug!(%notice, "tailer notice");
                emit_guarded(&sink, &Event::engine_log(notice));
            }

            let now = now_ms(start);
            for line in &lines {
                if let Some(node) = node_parser::extract(line) {
                    debug!(node, "matched node-execution log line");
                    emit_guarded(&sink, &Event::engine_log(format!("detected node: {node}")));
                    for event in state_machine.on_node(&node, now) {
                        emit_guarded(&sink, &event);
                    }
                }
            }

            for event in state_machine.on_tick(now_ms(start)) {
                emit_guarded(&sink, &event);
            }
        }

        info!("watchdog engine stopped");
        Ok(())
    }

    /// Status snapshot for `--status` and diagnostics; does not require
    /// `run()` to have been called (all rules start idle).
    pub fn status(&self) -> Vec<RuleStatus> {
        self.rules
            .iter()
            .map(|r| RuleStatus { name: r.name.clone(), active: false, waiting_for: None })
            .collect()
    }
}

fn now_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Delivers `event` to `sink`, catching a panicking sink so a misbehaving
/// `EventSink` implementation can't take the engine thread down with it. On
/// panic, logs the failure and makes a best-effort attempt to notify the
/// sink via `EngineLog` — itself guarded, so a sink that panics on every
/// call can't recurse into a panic loop.
fn emit_guarded(sink: &Arc<dyn EventSink>, event: &Event) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.emit(event))).is_err() {
        warn!(kind = ?event.kind, "event sink panicked while handling an event, continuing");
        let notice =
            Event::engine_log(format!("event sink panicked while handling a {:?} event", event.kind));
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.emit(&notice)));
    }
}

/// A cloneable stop switch for [`WatchdogEngine::run`]. Setting it is
/// idempotent and safe from any thread.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
