//! Domain events emitted by the state machine and forwarded to the sink.
//!
//! Mirrors the data model in the watchdog spec: every event carries the
//! fields needed to render a human-readable alert without looking anything
//! up back in the declared rule set.

use serde::Serialize;

/// The kind of domain event emitted by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A rule observed its `start_node` and began waiting for its first
    /// transition.
    StateActivated,
    /// A rule observed its final transition's target node.
    StateCompleted,
    /// A rule's current step exceeded its declared timeout.
    StateTimeout,
    /// An entry node reset an active rule back to idle.
    StateInterrupted,
    /// An entry node was observed (emitted once per entry, alongside any
    /// `StateInterrupted` events it caused).
    EntryDetected,
    /// Engine self-reporting: rotation notices, transient-failure retries,
    /// detection traces. Not a rule-level event.
    EngineLog,
}

impl EventKind {
    /// Parse a `NotifyWhen` config entry name into its `EventKind`.
    /// `timeout` is accepted as an alias for `StateTimeout` to match the
    /// shorter spelling operators tend to write in config files.
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "stateactivated" => Some(EventKind::StateActivated),
            "statecompleted" => Some(EventKind::StateCompleted),
            "timeout" | "statetimeout" => Some(EventKind::StateTimeout),
            "stateinterrupted" => Some(EventKind::StateInterrupted),
            "entrydetected" => Some(EventKind::EntryDetected),
            _ => None,
        }
    }
}

/// A single domain event. `elapsed_ms` is zero when not applicable to the
/// event's kind.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub state_name: String,
    pub node_name: String,
    pub description: String,
    pub elapsed_ms: u64,
}

impl Event {
    pub fn new(
        kind: EventKind,
        state_name: impl Into<String>,
        node_name: impl Into<String>,
        description: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            kind,
            state_name: state_name.into(),
            node_name: node_name.into(),
            description: description.into(),
            elapsed_ms,
        }
    }

    pub fn engine_log(message: impl Into<String>) -> Self {
        Self::new(EventKind::EngineLog, "", "", message, 0)
    }
}
