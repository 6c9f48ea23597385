//! Config loader — parses the INI-style watchdog configuration into a
//! [`WatchdogConfig`].
//!
//! This is a pure function from bytes (plus the config file's own location,
//! for relative-path resolution) to a validated value. No I/O beyond the one
//! read happens here; the engine never re-reads this file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::event::EventKind;
use crate::state_machine::{EntryNode, StateRule, Transition};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config is missing monitoring.Log_File_Path")]
    MissingLogPath,
    #[error("config declares no state rules under [states]")]
    NoStateRules,
    #[error("malformed state rule at line {line}: {raw}")]
    MalformedStateRule { line: usize, raw: String },
}

/// How to reach the chat webhook that receives formatted alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookTarget {
    Generic { url: String },
    Telegram { bot_token: String, chat_id: String },
    Wechat { webhook_key: String },
}

/// The fully parsed, validated configuration.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub log_file_path: PathBuf,
    pub monitor_interval: f64,
    pub rules: Vec<StateRule>,
    pub entries: Vec<EntryNode>,
    pub completion_nodes: HashSet<String>,
    /// `None` means "notify on every event kind" (the default when
    /// `NotifyWhen` is absent from the config).
    pub notify_when: Option<HashSet<EventKind>>,
    pub webhook: Option<WebhookTarget>,
}

impl WatchdogConfig {
    pub fn should_notify(&self, kind: EventKind) -> bool {
        match &self.notify_when {
            None => true,
            Some(set) => set.contains(&kind),
        }
    }
}

/// Parse a config file from disk. `Log_File_Path` is resolved relative to
/// this file's parent directory when not absolute.
pub fn load(path: &Path) -> Result<WatchdogConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().map(Path::to_path_buf);
    parse(&contents, base_dir.as_deref())
}

/// Parse already-read config text. `base_dir`, when given, resolves a
/// relative `Log_File_Path`.
pub fn parse(text: &str, base_dir: Option<&Path>) -> Result<WatchdogConfig, ConfigError> {
    let mut builder = Builder::default();
    let mut section: Option<String> = None;

    for (line_num, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = Some(line[1..line.len() - 1].to_ascii_lowercase());
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = strip_braces(value.trim());

        match section.as_deref() {
            Some("monitoring") => builder.monitoring(key, value),
            Some("notification") => builder.notification(key, value),
            Some("states") => builder.state_rule(key, value, line_num + 1),
            Some("entries") => builder.entry(key, value, line_num + 1),
            Some("completed") => builder.completion(key, value, line_num + 1),
            Some(other) => {
                warn!(section = other, line = line_num + 1, "ignoring unknown config section");
            }
            None => {}
        }
    }

    builder.finish(base_dir)
}

fn strip_braces(value: &str) -> &str {
    if value.starts_with('{') && value.ends_with('}') && value.len() >= 2 {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[derive(Default)]
struct Builder {
    log_file_path: Option<String>,
    monitor_interval: f64,
    interval_set: bool,
    rules: Vec<StateRule>,
    entries: Vec<EntryNode>,
    completion_nodes: HashSet<String>,
    notify_when: Option<HashSet<EventKind>>,
    webhook_url: Option<String>,
    webhook_kind: Option<String>,
    bot_token: Option<String>,
    chat_id: Option<String>,
    webhook_key: Option<String>,
}

impl Builder {
    fn monitoring(&mut self, key: &str, value: &str) {
        match key {
            "Log_File_Path" => {
                if !value.is_empty() {
                    self.log_file_path = Some(value.to_string());
                }
            }
            "Monitor_Interval" => match value.parse::<f64>() {
                Ok(v) if v > 0.0 => {
                    self.monitor_interval = v;
                    self.interval_set = true;
                }
                _ => {
                    warn!(value, "invalid Monitor_Interval, using default 1.0");
                }
            },
            _ => warn!(key, "ignoring unknown monitoring key"),
        }
    }

    fn notification(&mut self, key: &str, value: &str) {
        match key {
            "NotifyWhen" => {
                let mut set = HashSet::new();
                for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    match EventKind::from_config_name(part) {
                        Some(kind) => {
                            set.insert(kind);
                        }
                        None => warn!(event = part, "unknown notification event type"),
                    }
                }
                self.notify_when = Some(set);
            }
            "Webhook_URL" => self.webhook_url = Some(value.to_string()),
            "Webhook_Kind" => self.webhook_kind = Some(value.to_ascii_lowercase()),
            "Bot_Token" => self.bot_token = Some(value.to_string()),
            "Chat_ID" => self.chat_id = Some(value.to_string()),
            "Webhook_Key" => self.webhook_key = Some(value.to_string()),
            _ => warn!(key, "ignoring unknown notification key"),
        }
    }

    /// Parses `{start, t_ms, target, t_ms, target, …, [description]}`: walk
    /// tokens consuming `(timeout, target)` pairs while the next token parses
    /// as an integer; the first non-integer token where one was expected
    /// begins the free-text description.
    fn state_rule(&mut self, name: &str, value: &str, line_num: usize) {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            warn!(
                "{}",
                ConfigError::MalformedStateRule { line: line_num, raw: value.to_string() }
            );
            return;
        }

        let start_node = parts[0].to_string();
        let mut transitions = Vec::new();
        let mut description = String::new();
        let mut i = 1;

        while i < parts.len() {
            match parts[i].parse::<u64>() {
                Ok(timeout_ms) if timeout_ms > 0 && i + 1 < parts.len() => {
                    let target = parts[i + 1].to_string();
                    transitions.push(Transition::new(target, timeout_ms));
                    i += 2;
                }
                Ok(0) => {
                    // A zero timeout is not a valid transition; treat the
                    // same as a non-integer token and stop consuming pairs.
                    warn!(
                        name,
                        line = line_num,
                        "zero timeout is not a valid transition deadline, ignoring trailing tokens"
                    );
                    description = parts[i..].join(", ");
                    break;
                }
                Ok(_) => {
                    // Timeout with no following target: malformed tail.
                    break;
                }
                Err(_) => {
                    description = parts[i..].join(", ");
                    break;
                }
            }
        }

        if transitions.is_empty() {
            warn!(
                "{}",
                ConfigError::MalformedStateRule { line: line_num, raw: value.to_string() }
            );
            return;
        }

        self.rules.push(StateRule::new(name, start_node, transitions, description));
    }

    fn entry(&mut self, name: &str, value: &str, line_num: usize) {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        if parts.is_empty() || parts[0].is_empty() {
            warn!(name, line = line_num, "entry node has no node_name, skipping");
            return;
        }
        let description = parts.get(1).copied().unwrap_or("").to_string();
        self.entries.push(EntryNode::new(name, parts[0], description));
    }

    fn completion(&mut self, name: &str, value: &str, line_num: usize) {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        if parts.is_empty() || parts[0].is_empty() {
            warn!(name, line = line_num, "completion node has no node_name, skipping");
            return;
        }
        self.completion_nodes.insert(parts[0].to_string());
    }

    fn finish(self, base_dir: Option<&Path>) -> Result<WatchdogConfig, ConfigError> {
        let raw_path = self.log_file_path.ok_or(ConfigError::MissingLogPath)?;
        if self.rules.is_empty() {
            return Err(ConfigError::NoStateRules);
        }

        let mut log_file_path = PathBuf::from(&raw_path);
        if log_file_path.is_relative() {
            if let Some(dir) = base_dir {
                log_file_path = dir.join(&log_file_path);
            }
        }

        let webhook = if let (Some(token), Some(chat_id)) = (self.bot_token, self.chat_id) {
            Some(WebhookTarget::Telegram { bot_token: token, chat_id })
        } else if let Some(key) = self.webhook_key {
            Some(WebhookTarget::Wechat { webhook_key: key })
        } else if let Some(url) = self.webhook_url {
            match self.webhook_kind.as_deref() {
                Some("telegram") | Some("wechat") => {
                    warn!("Webhook_Kind requires matching credentials, falling back to generic webhook");
                    Some(WebhookTarget::Generic { url })
                }
                _ => Some(WebhookTarget::Generic { url }),
            }
        } else {
            None
        };

        Ok(WatchdogConfig {
            log_file_path,
            monitor_interval: if self.interval_set { self.monitor_interval } else { 1.0 },
            rules: self.rules,
            entries: self.entries,
            completion_nodes: self.completion_nodes,
            notify_when: self.notify_when,
            webhook,
        })
    }
}
