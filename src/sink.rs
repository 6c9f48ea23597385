//! Event sink (C5/C7) — the engine's one-way notification boundary and a
//! concrete webhook-backed implementation of it.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Local};
use tracing::warn;

use crate::config::WebhookTarget;
use crate::event::{Event, EventKind};

/// The engine's only outbound dependency: deliver an event somewhere. The
/// engine never learns whether delivery succeeded — a failing sink is
/// swallowed entirely below this boundary, never propagated back up.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Discards every event. Used by `--status` and by tests that only care
/// about the engine's own state, not notification delivery.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

/// Forwards events to a chat webhook, formatted into a human-readable
/// message per event kind.
pub struct WebhookSink {
    target: WebhookTarget,
    notify_when: Option<HashSet<EventKind>>,
}

impl WebhookSink {
    pub fn new(target: WebhookTarget, notify_when: Option<HashSet<EventKind>>) -> Self {
        Self { target, notify_when }
    }

    fn should_notify(&self, kind: EventKind) -> bool {
        match &self.notify_when {
            None => true,
            Some(set) => set.contains(&kind),
        }
    }

    /// Formats an event for delivery. `now` is the wall-clock reading taken
    /// at emit time — the state machine itself only ever sees a monotonic
    /// tick counter, so timestamp formatting happens here, at the sink
    /// boundary.
    fn format(event: &Event, now: DateTime<Local>) -> String {
        let stamp = now.format("%Y-%m-%d %H:%M:%S%z");
        match event.kind {
            EventKind::StateActivated => format!(
                "WATCHDOG STATE ACTIVATED [{stamp}]\n\nState: {}\nStart Node: {}\nDescription: {}",
                event.state_name, event.node_name, event.description
            ),
            EventKind::StateCompleted => format!(
                "WATCHDOG STATE COMPLETED [{stamp}]\n\nState: {}\nCompletion Node: {}\nElapsed Time: {}ms\nDescription: {}",
                event.state_name, event.node_name, event.elapsed_ms, event.description
            ),
            EventKind::StateTimeout => format!(
                "WATCHDOG STATE TIMEOUT [{stamp}]\n\nState: {}\nWaiting For: {}\nElapsed Time: {}ms\nDescription: {}",
                event.state_name, event.node_name, event.elapsed_ms, event.description
            ),
            EventKind::StateInterrupted => format!(
                "WATCHDOG STATE INTERRUPTED [{stamp}]\n\nState: {}\nInterrupted By: {}\nDescription: {}",
                event.state_name, event.node_name, event.description
            ),
            EventKind::EntryDetected => format!(
                "WATCHDOG ENTRY NODE DETECTED [{stamp}]\n\nEntry: {}\nNode: {}\nDescription: {}\n\nAll active states have been reset.",
                event.state_name, event.node_name, event.description
            ),
            EventKind::EngineLog => format!("WATCHDOG ENGINE LOG [{stamp}]\n\n{}", event.description),
        }
    }

    fn post(&self, message: &str) -> Result<()> {
        match &self.target {
            WebhookTarget::Generic { url } => {
                ureq::post(url).send_json(serde_json::json!({ "text": message }))?;
            }
            WebhookTarget::Telegram { bot_token, chat_id } => {
                let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
                ureq::post(&url).send_json(serde_json::json!({
                    "chat_id": chat_id,
                    "text": message,
                }))?;
            }
            WebhookTarget::Wechat { webhook_key } => {
                let url =
                    format!("https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key={webhook_key}");
                ureq::post(&url).send_json(serde_json::json!({
                    "msgtype": "text",
                    "text": { "content": message },
                }))?;
            }
        }
        Ok(())
    }
}

impl EventSink for WebhookSink {
    fn emit(&self, event: &Event) {
        if !self.should_notify(event.kind) {
            return;
        }
        let message = Self::format(event, Local::now());
        if let Err(err) = self.post(&message) {
            warn!(%err, kind = ?event.kind, "failed to deliver webhook notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activated() -> Event {
        Event::new(EventKind::StateActivated, "Fetch", "start_fetch", "desc", 0)
    }

    #[test]
    fn notify_when_excludes_unlisted_kind() {
        let mut set = HashSet::new();
        set.insert(EventKind::StateCompleted);
        let sink = WebhookSink::new(WebhookTarget::Generic { url: "http://unused".into() }, Some(set));
        assert!(!sink.should_notify(EventKind::StateActivated));
        assert!(sink.should_notify(EventKind::StateCompleted));
    }

    #[test]
    fn default_notify_when_is_all_kinds() {
        let sink = WebhookSink::new(WebhookTarget::Generic { url: "http://unused".into() }, None);
        assert!(sink.should_notify(EventKind::StateTimeout));
    }

    #[test]
    fn message_bodies_carry_required_fields() {
        let event = Event::new(EventKind::StateCompleted, "Fetch", "done_node", "desc here", 4200);
        let msg = WebhookSink::format(&event, Local::now());
        assert!(msg.contains("Fetch"));
        assert!(msg.contains("done_node"));
        assert!(msg.contains("4200"));
        assert!(msg.contains("desc here"));
    }

    #[test]
    fn entry_detected_mentions_reset() {
        let event = Event::new(EventKind::EntryDetected, "RESET", "reset_node", "", 0);
        let msg = WebhookSink::format(&event, Local::now());
        assert!(msg.contains("reset"));
    }

    #[test]
    fn activated_event_not_mistaken_for_completed() {
        let msg = WebhookSink::format(&activated(), Local::now());
        assert!(msg.contains("ACTIVATED"));
        assert!(!msg.contains("COMPLETED"));
    }

    #[test]
    fn message_carries_a_wall_clock_stamp() {
        let now = Local::now();
        let msg = WebhookSink::format(&activated(), now);
        assert!(msg.contains(&now.format("%Y-%m-%d").to_string()));
    }
}
