//! State machine (C3) — tracks declared rules against observed nodes and
//! clock ticks, emitting domain events.
//!
//! `now` is a monotonic millisecond counter supplied by the caller (the
//! engine loop reads it once per line or tick from a `Clock`). Using a plain
//! `u64` instead of `std::time::Instant` lets tests drive the machine with
//! the literal tick numbers from the spec's scenarios.

use crate::event::{Event, EventKind};

/// One hop in a rule's expected path: observe `target_node` within
/// `timeout_ms` of the previous step.
#[derive(Debug, Clone)]
pub struct Transition {
    pub target_node: String,
    pub timeout_ms: u64,
}

impl Transition {
    pub fn new(target_node: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            target_node: target_node.into(),
            timeout_ms,
        }
    }
}

/// A declared, immutable expected path through nodes with per-step
/// deadlines.
#[derive(Debug, Clone)]
pub struct StateRule {
    pub name: String,
    pub start_node: String,
    pub transitions: Vec<Transition>,
    pub description: String,
}

impl StateRule {
    /// Builds a rule. Panics if `transitions` is empty or any `timeout_ms`
    /// is zero — the spec declares both as load-time invariants, so a
    /// violation here is a config-loader bug, not a runtime condition.
    pub fn new(
        name: impl Into<String>,
        start_node: impl Into<String>,
        transitions: Vec<Transition>,
        description: impl Into<String>,
    ) -> Self {
        assert!(!transitions.is_empty(), "state rule must have a non-empty transition sequence");
        assert!(
            transitions.iter().all(|t| t.timeout_ms > 0),
            "state rule transition timeouts must be positive"
        );
        Self {
            name: name.into(),
            start_node: start_node.into(),
            transitions,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active,
}

/// Mutable runtime counterpart of a [`StateRule`].
#[derive(Debug, Clone)]
struct RuleRuntime {
    phase: Phase,
    current_transition_index: usize,
    /// Clock reading of the most recent node observation that activated or
    /// advanced this rule.
    last_advance_time: u64,
    /// Clock reading of the activation that began the rule's current run.
    /// `StateCompleted.elapsed_ms` is measured from here — the whole run's
    /// duration, not just the final hop's.
    activation_time: u64,
}

impl RuleRuntime {
    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            current_transition_index: 0,
            last_advance_time: 0,
            activation_time: 0,
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.current_transition_index = 0;
    }
}

/// A declared entry node: observing it resets every active rule.
#[derive(Debug, Clone)]
pub struct EntryNode {
    pub name: String,
    pub node_name: String,
    pub description: String,
}

impl EntryNode {
    pub fn new(name: impl Into<String>, node_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_name: node_name.into(),
            description: description.into(),
        }
    }
}

/// Holds declared rules/entries/completions and their runtime state, and
/// implements the node/tick transition logic that drives them.
pub struct StateMachine {
    rules: Vec<StateRule>,
    runtime: Vec<RuleRuntime>,
    entry_nodes: Vec<EntryNode>,
    completion_nodes: std::collections::HashSet<String>,
}

/// Snapshot of one rule's runtime status, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStatus {
    pub name: String,
    pub active: bool,
    pub waiting_for: Option<String>,
}

impl StateMachine {
    pub fn new(
        rules: Vec<StateRule>,
        entry_nodes: Vec<EntryNode>,
        completion_nodes: std::collections::HashSet<String>,
    ) -> Self {
        let runtime = rules.iter().map(|_| RuleRuntime::idle()).collect();
        Self {
            rules,
            runtime,
            entry_nodes,
            completion_nodes,
        }
    }

    /// Process one observed node: interrupt active rules matching an entry
    /// node, then activate idle rules whose `start_node` matches, then
    /// advance rules that were already active before this call. A rule
    /// just (re-)activated this call is never also advanced in the same
    /// call, even if its `start_node` equals its first transition's
    /// target — that degenerate case counts as one activation and zero
    /// advancement.
    pub fn on_node(&mut self, node: &str, now: u64) -> Vec<Event> {
        let mut events = Vec::new();

        self.interrupt_pass(node, now, &mut events);
        let just_activated = self.activation_pass(node, now, &mut events);
        self.advancement_pass(node, now, &just_activated, &mut events);

        events
    }

    /// Timeout check only; does not consume a node observation.
    pub fn on_tick(&mut self, now: u64) -> Vec<Event> {
        let mut events = Vec::new();

        for i in 0..self.rules.len() {
            if self.runtime[i].phase != Phase::Active {
                continue;
            }
            let idx = self.runtime[i].current_transition_index;
            let transition = &self.rules[i].transitions[idx];
            let elapsed = now.saturating_sub(self.runtime[i].last_advance_time);
            if elapsed > transition.timeout_ms {
                if self.completion_nodes.contains(&transition.target_node) {
                    // Completion-destined transitions never time out.
                    continue;
                }
                events.push(Event::new(
                    EventKind::StateTimeout,
                    self.rules[i].name.clone(),
                    transition.target_node.clone(),
                    self.rules[i].description.clone(),
                    elapsed,
                ));
                self.runtime[i].reset();
            }
        }

        events
    }

    /// Diagnostic snapshot of every declared rule's current status.
    pub fn snapshot(&self) -> Vec<RuleStatus> {
        self.rules
            .iter()
            .zip(self.runtime.iter())
            .map(|(rule, rt)| RuleStatus {
                name: rule.name.clone(),
                active: rt.phase == Phase::Active,
                waiting_for: (rt.phase == Phase::Active)
                    .then(|| rule.transitions[rt.current_transition_index].target_node.clone()),
            })
            .collect()
    }

    fn interrupt_pass(&mut self, node: &str, _now: u64, events: &mut Vec<Event>) {
        let Some(entry) = self.entry_nodes.iter().find(|e| e.node_name == node) else {
            return;
        };

        for i in 0..self.rules.len() {
            if self.runtime[i].phase == Phase::Active {
                events.push(Event::new(
                    EventKind::StateInterrupted,
                    self.rules[i].name.clone(),
                    entry.node_name.clone(),
                    self.rules[i].description.clone(),
                    0,
                ));
                self.runtime[i].reset();
            }
        }

        events.push(Event::new(
            EventKind::EntryDetected,
            entry.name.clone(),
            node.to_string(),
            entry.description.clone(),
            0,
        ));
    }

    /// Activates idle rules and re-arms already-active ones whose
    /// `start_node` matches `node`. Returns the indices touched this call,
    /// so `advancement_pass` can exclude them — a rule just (re-)armed is
    /// awaiting its first transition as of *this* observation, not a
    /// second one satisfied by the same node.
    fn activation_pass(&mut self, node: &str, now: u64, events: &mut Vec<Event>) -> std::collections::HashSet<usize> {
        let mut touched = std::collections::HashSet::new();
        for i in 0..self.rules.len() {
            if self.rules[i].start_node != node {
                continue;
            }
            touched.insert(i);
            match self.runtime[i].phase {
                Phase::Idle => {
                    self.runtime[i].phase = Phase::Active;
                    self.runtime[i].current_transition_index = 0;
                    self.runtime[i].last_advance_time = now;
                    self.runtime[i].activation_time = now;
                    events.push(Event::new(
                        EventKind::StateActivated,
                        self.rules[i].name.clone(),
                        node.to_string(),
                        self.rules[i].description.clone(),
                        0,
                    ));
                }
                Phase::Active => {
                    // Re-activation: own start node re-arms without an event.
                    self.runtime[i].current_transition_index = 0;
                    self.runtime[i].last_advance_time = now;
                    self.runtime[i].activation_time = now;
                }
            }
        }
        touched
    }

    fn advancement_pass(
        &mut self,
        node: &str,
        now: u64,
        just_activated: &std::collections::HashSet<usize>,
        events: &mut Vec<Event>,
    ) {
        for i in 0..self.rules.len() {
            if just_activated.contains(&i) {
                continue;
            }
            if self.runtime[i].phase != Phase::Active {
                continue;
            }
            let idx = self.runtime[i].current_transition_index;
            if self.rules[i].transitions[idx].target_node != node {
                continue;
            }

            if idx + 1 < self.rules[i].transitions.len() {
                self.runtime[i].current_transition_index = idx + 1;
                self.runtime[i].last_advance_time = now;
            } else {
                let elapsed = now.saturating_sub(self.runtime[i].activation_time);
                events.push(Event::new(
                    EventKind::StateCompleted,
                    self.rules[i].name.clone(),
                    node.to_string(),
                    self.rules[i].description.clone(),
                    elapsed,
                ));
                self.runtime[i].reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn rule_r() -> StateRule {
        StateRule::new(
            "R",
            "A",
            vec![Transition::new("B", 1000), Transition::new("C", 1000)],
            "happy path rule",
        )
    }

    #[test]
    fn happy_path() {
        let mut sm = StateMachine::new(vec![rule_r()], vec![], HashSet::new());

        let e = sm.on_node("A", 0);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].kind, EventKind::StateActivated);

        let e = sm.on_node("B", 500);
        assert!(e.is_empty());

        let e = sm.on_node("C", 900);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].kind, EventKind::StateCompleted);
        assert_eq!(e[0].node_name, "C");
        assert_eq!(e[0].elapsed_ms, 900);

        // No timeout should ever have fired.
        let e = sm.on_tick(950);
        assert!(e.is_empty());
    }

    #[test]
    fn timeout_on_middle_step() {
        let mut sm = StateMachine::new(vec![rule_r()], vec![], HashSet::new());
        sm.on_node("A", 0);

        let e = sm.on_tick(1000);
        assert!(e.is_empty(), "exactly at threshold must not fire yet");

        let e = sm.on_tick(1500);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].kind, EventKind::StateTimeout);
        assert!(e[0].elapsed_ms >= 1500);

        let statuses = sm.snapshot();
        assert!(!statuses[0].active);
    }

    #[test]
    fn completion_node_exemption() {
        let rule = StateRule::new("R", "A", vec![Transition::new("END", 100)], "");
        let mut completions = HashSet::new();
        completions.insert("END".to_string());
        let mut sm = StateMachine::new(vec![rule], vec![], completions);

        sm.on_node("A", 0);
        assert!(sm.on_tick(500).is_empty());
        assert!(sm.on_tick(1000).is_empty());

        let e = sm.on_node("END", 2000);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].kind, EventKind::StateCompleted);
        assert_eq!(e[0].elapsed_ms, 2000);
    }

    #[test]
    fn interrupt_by_entry_node() {
        let rule = StateRule::new("R", "A", vec![Transition::new("B", 10000)], "");
        let entries = vec![EntryNode::new("RESET", "Z", "")];
        let mut sm = StateMachine::new(vec![rule], entries, HashSet::new());

        sm.on_node("A", 0);
        let e = sm.on_node("Z", 100);
        assert_eq!(e.len(), 2);
        assert_eq!(e[0].kind, EventKind::StateInterrupted);
        assert_eq!(e[0].node_name, "Z");
        assert_eq!(e[1].kind, EventKind::EntryDetected);

        let statuses = sm.snapshot();
        assert!(!statuses[0].active);
    }

    #[test]
    fn reentry_of_start_node_rearms_without_second_activation() {
        let mut sm = StateMachine::new(vec![rule_r()], vec![], HashSet::new());

        sm.on_node("A", 0);
        let e = sm.on_node("A", 500);
        assert!(e.is_empty(), "re-activation emits no event");

        assert!(sm.on_tick(1100).is_empty(), "clock was reset at 500");

        let e = sm.on_tick(1600);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].kind, EventKind::StateTimeout);
    }

    #[test]
    fn activation_on_own_first_target_does_not_also_advance() {
        // Degenerate case: start_node == transitions[0].target_node. A
        // single on_node call activates the rule but must not also advance
        // or complete it against that same observation.
        let rule = StateRule::new("loop", "A", vec![Transition::new("A", 1000)], "");
        let mut sm = StateMachine::new(vec![rule], vec![], HashSet::new());

        let events = sm.on_node("A", 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::StateActivated);

        let statuses = sm.snapshot();
        assert!(statuses[0].active);
        assert_eq!(statuses[0].waiting_for.as_deref(), Some("A"));
    }

    #[test]
    fn simultaneous_entry_and_start_node_interrupts_then_activates() {
        // A node that is both an entry node and some other rule's start_node
        // must interrupt active rules, then activate matching idle rules, in
        // that order within the same on_node call.
        let watched = StateRule::new("watched", "A", vec![Transition::new("B", 1000)], "");
        let reentrant = StateRule::new("reentrant", "A", vec![Transition::new("B", 1000)], "");
        let entries = vec![EntryNode::new("RESET", "A", "")];
        let mut sm = StateMachine::new(vec![watched, reentrant], entries, HashSet::new());

        // Activate "watched" via a different path first isn't possible here
        // since both rules share start_node A; instead, prove A interrupts
        // an already-active "watched" while simultaneously (re)activating it.
        sm.on_node("A", 0); // both rules activate
        let events = sm.on_node("A", 50); // A is also the entry node
        // Expect: interrupt both active rules, emit EntryDetected, then
        // activate both again.
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StateInterrupted,
                EventKind::StateInterrupted,
                EventKind::EntryDetected,
                EventKind::StateActivated,
                EventKind::StateActivated,
            ]
        );
    }

    #[test]
    fn unrelated_node_is_ignored() {
        let mut sm = StateMachine::new(vec![rule_r()], vec![], HashSet::new());
        assert!(sm.on_node("unrelated", 0).is_empty());
        sm.on_node("A", 0);
        assert!(sm.on_node("unrelated", 10).is_empty());
    }

    #[test]
    fn timed_out_rule_is_not_rearmed_until_start_node_seen_again() {
        let mut sm = StateMachine::new(vec![rule_r()], vec![], HashSet::new());
        sm.on_node("A", 0);
        sm.on_tick(1500); // times out, resets to idle

        // Observing the final target now (without re-seeing start) does nothing.
        let e = sm.on_node("C", 1600);
        assert!(e.is_empty());

        let e = sm.on_node("A", 1700);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].kind, EventKind::StateActivated);
    }
}
