//! Bounded diagnostics log.
//!
//! A fixed-capacity ring of [`DiagnosticEvent`]s: the oldest event is evicted
//! when a new one arrives at capacity. Each record is also emitted through
//! `tracing` at the matching level and fanned out to live subscribers on a
//! `broadcast` channel. Slow subscribers lag and lose events; the ring is
//! unaffected.

use std::collections::VecDeque;

use plexus_core::types::{DiagnosticEvent, DiagnosticLevel, TimestampMs};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const SUBSCRIBER_BUFFER: usize = 64;

pub struct DiagnosticsLog {
    events: VecDeque<DiagnosticEvent>,
    capacity: usize,
    tx: broadcast::Sender<DiagnosticEvent>,
}

impl DiagnosticsLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            tx,
        }
    }

    pub fn record(
        &mut self,
        level: DiagnosticLevel,
        code: &str,
        message: impl Into<String>,
        source: &str,
        context: Option<serde_json::Value>,
        now: TimestampMs,
    ) {
        let event = DiagnosticEvent {
            level,
            code: code.to_string(),
            message: message.into(),
            source: source.to_string(),
            timestamp: now,
            context,
        };
        match event.level {
            DiagnosticLevel::Info => info!(code, source, message = %event.message, "diagnostics: event"),
            DiagnosticLevel::Warn => warn!(code, source, message = %event.message, "diagnostics: event"),
            DiagnosticLevel::Error => error!(code, source, message = %event.message, "diagnostics: event"),
        }

        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        // No receivers is not an error.
        let _ = self.tx.send(event.clone());
        self.events.push_back(event);
    }

    /// Up to `n` most recent events, newest first.
    pub fn recent(&self, n: usize) -> Vec<DiagnosticEvent> {
        self.events.iter().rev().take(n).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn info(log: &mut DiagnosticsLog, code: &str, now: TimestampMs) {
        log.record(DiagnosticLevel::Info, code, "msg", "test", None, now);
    }

    #[test]
    fn recent_is_newest_first() {
        let mut log = DiagnosticsLog::new(10);
        info(&mut log, "a", 1);
        info(&mut log, "b", 2);
        info(&mut log, "c", 3);
        let codes: Vec<_> = log.recent(2).into_iter().map(|e| e.code).collect();
        assert_eq!(codes, vec!["c", "b"]);
        assert_eq!(log.len(), 3, "recent does not consume");
    }

    #[test]
    fn oldest_evicted_at_capacity() {
        let mut log = DiagnosticsLog::new(2);
        info(&mut log, "a", 1);
        info(&mut log, "b", 2);
        info(&mut log, "c", 3);
        assert_eq!(log.len(), 2);
        let codes: Vec<_> = log.recent(10).into_iter().map(|e| e.code).collect();
        assert_eq!(codes, vec!["c", "b"]);
    }

    #[test]
    fn context_is_kept() {
        let mut log = DiagnosticsLog::new(4);
        log.record(
            DiagnosticLevel::Warn,
            "validation.field",
            "bad ttl",
            "protocol",
            Some(json!({"peer": "p1", "suppressed": 3})),
            5,
        );
        let ev = &log.recent(1)[0];
        assert_eq!(ev.level, DiagnosticLevel::Warn);
        assert_eq!(ev.context.as_ref().unwrap()["suppressed"], 3);
        assert_eq!(ev.timestamp, 5);
    }

    #[test]
    fn zero_capacity_clamped_to_one() {
        let mut log = DiagnosticsLog::new(0);
        info(&mut log, "a", 1);
        info(&mut log, "b", 2);
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.recent(5)[0].code, "b");
    }

    #[tokio::test]
    async fn subscribers_receive_new_events() {
        let mut log = DiagnosticsLog::new(4);
        let mut rx = log.subscribe();
        info(&mut log, "live", 9);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.code, "live");
    }
}
