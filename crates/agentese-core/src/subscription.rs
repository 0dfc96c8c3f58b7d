//! Subscription manager: pattern-bound event streams.
//!
//! Patterns use `*` for one segment and `**` for any run of segments, with an
//! optional `:aspect` filter (`world.**:manifest`). Delivery is AT_MOST_ONCE
//! (bounded ring, drop oldest, metric recorded) or AT_LEAST_ONCE (ack-gated
//! FIFO; the emitter suspends on a full buffer and raises after the expiry
//! window). Closing an AT_LEAST_ONCE subscription requeues unacknowledged
//! events for the next subscriber on the same pattern.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AgentesError, Result};

/// How long an AT_LEAST_ONCE emitter waits on a full buffer before raising.
pub const DEFAULT_BACKPRESSURE_EXPIRY: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Invoked,
    Changed,
    Error,
    Refused,
    Heartbeat,
}

/// One fabric event. `offset` is monotonic per manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect: Option<String>,
    pub payload: Value,
    pub offset: u64,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seg {
    Literal(String),
    Star,
    DoubleStar,
}

/// Compiled subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Seg>,
    aspect: Option<String>,
    text: String,
}

impl Pattern {
    pub fn compile(text: &str) -> Result<Self> {
        let (path_part, aspect) = match text.split_once(':') {
            Some((p, a)) if !a.is_empty() => (p, Some(a.to_string())),
            Some((_, _)) => {
                return Err(AgentesError::PathSyntax {
                    locus: crate::error::Locus::at(text.len()),
                    reason: "empty aspect filter in pattern".into(),
                })
            }
            None => (text, None),
        };
        if path_part.is_empty() {
            return Err(AgentesError::PathSyntax {
                locus: crate::error::Locus::at(0),
                reason: "empty pattern".into(),
            });
        }
        let segments = path_part
            .split('.')
            .map(|s| match s {
                "*" => Ok(Seg::Star),
                "**" => Ok(Seg::DoubleStar),
                other if !other.is_empty() => Ok(Seg::Literal(other.to_string())),
                _ => Err(AgentesError::PathSyntax {
                    locus: crate::error::Locus::at(0),
                    reason: format!("empty segment in pattern '{text}'"),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments, aspect, text: text.to_string() })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Match a dotted path plus optional aspect against this pattern.
    pub fn matches(&self, path: &str, aspect: Option<&str>) -> bool {
        if let Some(want) = &self.aspect {
            if aspect != Some(want.as_str()) {
                return false;
            }
        }
        let parts: Vec<&str> = path.split('.').collect();
        Self::match_segments(&self.segments, &parts)
    }

    fn match_segments(pattern: &[Seg], parts: &[&str]) -> bool {
        match pattern.first() {
            None => parts.is_empty(),
            Some(Seg::Literal(lit)) => parts
                .first()
                .map(|p| p == lit && Self::match_segments(&pattern[1..], &parts[1..]))
                .unwrap_or(false),
            Some(Seg::Star) => !parts.is_empty() && Self::match_segments(&pattern[1..], &parts[1..]),
            Some(Seg::DoubleStar) => {
                // Zero or more segments.
                (0..=parts.len()).any(|skip| Self::match_segments(&pattern[1..], &parts[skip..]))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Delivery {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderingMode {
    PerPathFifo,
    GlobalFifo,
    Unordered,
}

#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub delivery: Delivery,
    pub ordering: OrderingMode,
    pub buffer_size: usize,
    pub heartbeat_interval: Option<Duration>,
    pub replay_from: Option<DateTime<Utc>>,
    pub replay_offset: Option<u64>,
    /// Narrow by aspect name in addition to the pattern's `:aspect` filter.
    pub aspect: Option<String>,
    pub backpressure_expiry: Duration,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            delivery: Delivery::AtMostOnce,
            ordering: OrderingMode::PerPathFifo,
            buffer_size: 64,
            heartbeat_interval: None,
            replay_from: None,
            replay_offset: None,
            aspect: None,
            backpressure_expiry: DEFAULT_BACKPRESSURE_EXPIRY,
        }
    }
}

// ---------------------------------------------------------------------------
// Replay log source
// ---------------------------------------------------------------------------

/// External append-only event log a subscription can replay from. When no
/// log is installed, replay yields nothing and a warning is logged.
pub trait ReplayLog: Send + Sync {
    fn events_from_offset(&self, offset: u64) -> Vec<Event>;
    fn events_from_timestamp(&self, at: DateTime<Utc>) -> Vec<Event>;
}

/// A replay log the manager can also write: installed via
/// [`SubscriptionManager::set_journal`], every published event is appended
/// before fan-out so late subscribers can catch up.
pub trait EventJournal: ReplayLog {
    fn append(&self, event: &Event);
}

// ---------------------------------------------------------------------------
// Subscription internals
// ---------------------------------------------------------------------------

struct SubShared {
    id: Uuid,
    pattern: Pattern,
    delivery: Delivery,
    #[allow(dead_code)]
    ordering: OrderingMode,
    capacity: usize,
    aspect_filter: Option<String>,
    buffer: Mutex<VecDeque<Event>>,
    /// AT_LEAST_ONCE in-flight delivery awaiting acknowledgement.
    pending: Mutex<Option<(Uuid, Event)>>,
    readable: Notify,
    writable: Notify,
    closed: AtomicBool,
    backpressure_expiry: Duration,
}

impl SubShared {
    fn accepts(&self, event: &Event) -> bool {
        if let Some(want) = &self.aspect_filter {
            if event.aspect.as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        self.pattern.matches(&event.path, event.aspect.as_deref())
            || matches!(event.kind, EventKind::Heartbeat)
    }
}

/// One delivered event; AT_LEAST_ONCE consumers must acknowledge `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub id: Uuid,
    pub event: Event,
}

/// Consumer handle. Dropping without `close()` leaks pending events, so
/// AT_LEAST_ONCE consumers should close explicitly.
pub struct Subscription {
    shared: Arc<SubShared>,
    manager: Arc<SubscriptionManager>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn pattern(&self) -> &str {
        self.shared.pattern.text()
    }

    /// Next event. AT_LEAST_ONCE redelivers the unacknowledged in-flight
    /// event until `acknowledge` clears it. Returns `None` once closed and
    /// drained.
    pub async fn next(&self) -> Option<Delivered> {
        loop {
            if self.shared.delivery == Delivery::AtLeastOnce {
                let pending = self.shared.pending.lock().expect("pending poisoned");
                if let Some((id, event)) = pending.clone() {
                    return Some(Delivered { id, event });
                }
            }
            {
                let mut buffer = self.shared.buffer.lock().expect("buffer poisoned");
                if let Some(event) = buffer.pop_front() {
                    drop(buffer);
                    self.shared.writable.notify_one();
                    let id = Uuid::new_v4();
                    if self.shared.delivery == Delivery::AtLeastOnce {
                        *self.shared.pending.lock().expect("pending poisoned") =
                            Some((id, event.clone()));
                    }
                    return Some(Delivered { id, event });
                }
            }
            if self.shared.closed.load(AtomicOrdering::SeqCst) {
                return None;
            }
            self.shared.readable.notified().await;
        }
    }

    /// Acknowledge an AT_LEAST_ONCE delivery.
    pub fn acknowledge(&self, id: Uuid) -> Result<()> {
        let mut pending = self.shared.pending.lock().expect("pending poisoned");
        match pending.take() {
            Some((expected, _)) if expected == id => Ok(()),
            other => {
                *pending = other;
                Err(AgentesError::Handler {
                    path: self.shared.pattern.text().to_string(),
                    aspect: "acknowledge".into(),
                    inner: format!("no pending delivery with id {id}"),
                })
            }
        }
    }

    /// Close the subscription. AT_LEAST_ONCE: the unacknowledged in-flight
    /// event and anything still buffered are requeued for the next
    /// subscriber on the same pattern.
    pub fn close(&self) {
        self.manager.close_subscription(&self.shared);
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct SubscriptionManager {
    subs: DashMap<Uuid, Arc<SubShared>>,
    next_offset: AtomicU64,
    dropped: AtomicU64,
    replay_log: Mutex<Option<Arc<dyn ReplayLog>>>,
    journal: Mutex<Option<Arc<dyn EventJournal>>>,
    /// Events orphaned by closed AT_LEAST_ONCE subscriptions, keyed by
    /// pattern text, waiting for the next subscriber.
    orphaned: Mutex<Vec<(String, Vec<Event>)>>,
}

impl SubscriptionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subs: DashMap::new(),
            next_offset: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            replay_log: Mutex::new(None),
            journal: Mutex::new(None),
            orphaned: Mutex::new(Vec::new()),
        })
    }

    pub fn set_replay_log(&self, log: Arc<dyn ReplayLog>) {
        *self.replay_log.lock().expect("replay log poisoned") = Some(log);
    }

    /// Install a journal: publishes append to it, subscribes replay from it.
    pub fn set_journal(&self, journal: Arc<dyn EventJournal>) {
        *self.journal.lock().expect("journal poisoned") = Some(journal);
    }

    /// Events dropped by AT_MOST_ONCE overflow since startup.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(AtomicOrdering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.subs.len()
    }

    /// Open a subscription. Replays history first (when a log source and a
    /// cursor are configured), then adopts events orphaned by earlier
    /// same-pattern subscribers, then starts the heartbeat task if asked.
    pub fn subscribe(self: &Arc<Self>, pattern: &str, options: SubscribeOptions) -> Result<Subscription> {
        let compiled = Pattern::compile(pattern)?;
        let shared = Arc::new(SubShared {
            id: Uuid::new_v4(),
            pattern: compiled,
            delivery: options.delivery,
            ordering: options.ordering,
            capacity: options.buffer_size.max(1),
            aspect_filter: options.aspect.clone(),
            buffer: Mutex::new(VecDeque::new()),
            pending: Mutex::new(None),
            readable: Notify::new(),
            writable: Notify::new(),
            closed: AtomicBool::new(false),
            backpressure_expiry: options.backpressure_expiry,
        });

        // Replay history before live events.
        if options.replay_from.is_some() || options.replay_offset.is_some() {
            fn drain<L: ReplayLog + ?Sized>(log: &L, options: &SubscribeOptions) -> Vec<Event> {
                match (options.replay_offset, options.replay_from) {
                    (Some(offset), _) => log.events_from_offset(offset),
                    (None, Some(at)) => log.events_from_timestamp(at),
                    (None, None) => Vec::new(),
                }
            }
            let replay = self.replay_log.lock().expect("replay log poisoned").clone();
            let journal = self.journal.lock().expect("journal poisoned").clone();
            let history = match (&replay, &journal) {
                (Some(log), _) => Some(drain(log.as_ref(), &options)),
                (None, Some(journal)) => Some(drain(journal.as_ref(), &options)),
                (None, None) => None,
            };
            match history {
                Some(history) => {
                    let mut buffer = shared.buffer.lock().expect("buffer poisoned");
                    for event in history.into_iter().filter(|e| shared.accepts(e)) {
                        buffer.push_back(event);
                    }
                }
                None => {
                    warn!(
                        target: "agentese::subscription",
                        pattern, "replay requested but no replay log source installed"
                    );
                }
            }
        }

        // Adopt orphaned AT_LEAST_ONCE events from closed same-pattern subscribers.
        {
            let mut orphaned = self.orphaned.lock().expect("orphan stash poisoned");
            let mut keep = Vec::new();
            for (text, events) in orphaned.drain(..) {
                if text == pattern {
                    let mut buffer = shared.buffer.lock().expect("buffer poisoned");
                    buffer.extend(events);
                } else {
                    keep.push((text, events));
                }
            }
            *orphaned = keep;
        }

        self.subs.insert(shared.id, shared.clone());
        debug!(target: "agentese::subscription", pattern, id = %shared.id, "subscription opened");

        if let Some(interval) = options.heartbeat_interval {
            let weak = Arc::downgrade(&shared);
            let manager = Arc::downgrade(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await; // first tick is immediate; skip it
                loop {
                    ticker.tick().await;
                    let (Some(shared), Some(manager)) = (weak.upgrade(), manager.upgrade()) else {
                        return;
                    };
                    if shared.closed.load(AtomicOrdering::SeqCst) {
                        return;
                    }
                    let heartbeat = Event {
                        kind: EventKind::Heartbeat,
                        path: shared.pattern.text().to_string(),
                        aspect: None,
                        payload: Value::Null,
                        offset: manager.next_offset.fetch_add(1, AtomicOrdering::SeqCst),
                        at: Utc::now(),
                    };
                    let mut buffer = shared.buffer.lock().expect("buffer poisoned");
                    if buffer.len() < shared.capacity {
                        buffer.push_back(heartbeat);
                        drop(buffer);
                        shared.readable.notify_one();
                    }
                }
            });
        }

        Ok(Subscription { shared, manager: self.clone() })
    }

    /// Publish an event to every matching subscription.
    ///
    /// AT_MOST_ONCE overflow drops the oldest buffered event and counts it.
    /// AT_LEAST_ONCE overflow suspends this emitter until the consumer makes
    /// room or the backpressure window expires, then raises.
    pub async fn publish(
        &self,
        kind: EventKind,
        path: &str,
        aspect: Option<&str>,
        payload: Value,
    ) -> Result<()> {
        let event = Event {
            kind,
            path: path.to_string(),
            aspect: aspect.map(str::to_string),
            payload,
            offset: self.next_offset.fetch_add(1, AtomicOrdering::SeqCst),
            at: Utc::now(),
        };
        let journal = self.journal.lock().expect("journal poisoned").clone();
        if let Some(journal) = journal {
            journal.append(&event);
        }
        let targets: Vec<Arc<SubShared>> = self
            .subs
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| s.accepts(&event) && !matches!(event.kind, EventKind::Heartbeat))
            .collect();
        for shared in targets {
            self.enqueue(&shared, event.clone()).await?;
        }
        Ok(())
    }

    async fn enqueue(&self, shared: &Arc<SubShared>, event: Event) -> Result<()> {
        loop {
            if shared.closed.load(AtomicOrdering::SeqCst) {
                return Ok(());
            }
            {
                let mut buffer = shared.buffer.lock().expect("buffer poisoned");
                if buffer.len() < shared.capacity {
                    buffer.push_back(event);
                    drop(buffer);
                    shared.readable.notify_one();
                    return Ok(());
                }
                match shared.delivery {
                    Delivery::AtMostOnce => {
                        buffer.pop_front();
                        buffer.push_back(event);
                        drop(buffer);
                        self.dropped.fetch_add(1, AtomicOrdering::SeqCst);
                        shared.readable.notify_one();
                        return Ok(());
                    }
                    Delivery::AtLeastOnce => {}
                }
            }
            // AT_LEAST_ONCE: wait for room, bounded by the expiry window.
            let waited =
                tokio::time::timeout(shared.backpressure_expiry, shared.writable.notified()).await;
            if waited.is_err() {
                return Err(AgentesError::BufferOverflow {
                    subscription: shared.id.to_string(),
                    capacity: shared.capacity,
                });
            }
        }
    }

    fn close_subscription(&self, shared: &Arc<SubShared>) {
        if shared.closed.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        self.subs.remove(&shared.id);
        shared.readable.notify_waiters();
        shared.writable.notify_waiters();
        if shared.delivery == Delivery::AtLeastOnce {
            let mut events = Vec::new();
            if let Some((_, event)) = shared.pending.lock().expect("pending poisoned").take() {
                events.push(event);
            }
            let mut buffer = shared.buffer.lock().expect("buffer poisoned");
            events.extend(buffer.drain(..));
            drop(buffer);
            if !events.is_empty() {
                debug!(
                    target: "agentese::subscription",
                    pattern = shared.pattern.text(),
                    count = events.len(),
                    "requeueing unconsumed events for the next subscriber"
                );
                self.orphaned
                    .lock()
                    .expect("orphan stash poisoned")
                    .push((shared.pattern.text().to_string(), events));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(delivery: Delivery, buffer: usize) -> SubscribeOptions {
        SubscribeOptions { delivery, buffer_size: buffer, ..Default::default() }
    }

    #[test]
    fn pattern_wildcards() {
        let p = Pattern::compile("world.**:manifest").unwrap();
        assert!(p.matches("world.garden", Some("manifest")));
        assert!(p.matches("world.garden.rows", Some("manifest")));
        assert!(!p.matches("world.garden", Some("tend")));
        assert!(!p.matches("self.memory", Some("manifest")));

        let single = Pattern::compile("world.*").unwrap();
        assert!(single.matches("world.garden", None));
        assert!(!single.matches("world.garden.rows", None));

        let literal = Pattern::compile("self.memory").unwrap();
        assert!(literal.matches("self.memory", Some("engram")));
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscription_once() {
        let manager = SubscriptionManager::new();
        let sub = manager.subscribe("world.**", opts(Delivery::AtMostOnce, 8)).unwrap();
        let other = manager.subscribe("self.**", opts(Delivery::AtMostOnce, 8)).unwrap();

        manager
            .publish(EventKind::Invoked, "world.garden", Some("manifest"), json!({"ok": true}))
            .await
            .unwrap();

        let delivered = sub.next().await.unwrap();
        assert_eq!(delivered.event.kind, EventKind::Invoked);
        assert_eq!(delivered.event.path, "world.garden");

        // Non-matching subscription sees nothing.
        let nothing =
            tokio::time::timeout(Duration::from_millis(50), other.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn at_most_once_drops_oldest_on_overflow() {
        let manager = SubscriptionManager::new();
        let sub = manager.subscribe("world.**", opts(Delivery::AtMostOnce, 2)).unwrap();
        for i in 0..4 {
            manager
                .publish(EventKind::Invoked, "world.garden", Some("manifest"), json!({"seq": i}))
                .await
                .unwrap();
        }
        assert_eq!(manager.dropped_events(), 2);
        let first = sub.next().await.unwrap();
        assert_eq!(first.event.payload["seq"], 2);
    }

    #[tokio::test]
    async fn at_least_once_redelivers_until_acked() {
        let manager = SubscriptionManager::new();
        let sub = manager.subscribe("world.**", opts(Delivery::AtLeastOnce, 8)).unwrap();
        manager
            .publish(EventKind::Invoked, "world.garden", Some("manifest"), json!({"n": 1}))
            .await
            .unwrap();
        manager
            .publish(EventKind::Invoked, "world.garden", Some("manifest"), json!({"n": 2}))
            .await
            .unwrap();

        let first = sub.next().await.unwrap();
        // Unacked: the same event comes back.
        let again = sub.next().await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.event.payload, again.event.payload);

        sub.acknowledge(first.id).unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(second.event.payload["n"], 2);
        sub.acknowledge(second.id).unwrap();
    }

    #[tokio::test]
    async fn unacked_events_requeue_to_next_subscriber() {
        let manager = SubscriptionManager::new();
        let sub = manager.subscribe("world.**:manifest", opts(Delivery::AtLeastOnce, 8)).unwrap();
        for i in 0..3 {
            manager
                .publish(EventKind::Invoked, "world.garden", Some("manifest"), json!({"seq": i}))
                .await
                .unwrap();
        }
        let a = sub.next().await.unwrap();
        sub.acknowledge(a.id).unwrap();
        let b = sub.next().await.unwrap();
        sub.acknowledge(b.id).unwrap();
        let c = sub.next().await.unwrap();
        // c is never acknowledged.
        assert_eq!(c.event.payload["seq"], 2);
        sub.close();

        let successor =
            manager.subscribe("world.**:manifest", opts(Delivery::AtLeastOnce, 8)).unwrap();
        let redelivered = successor.next().await.unwrap();
        assert_eq!(redelivered.event.payload["seq"], 2);
        successor.acknowledge(redelivered.id).unwrap();
    }

    #[tokio::test]
    async fn at_least_once_backpressure_raises_after_expiry() {
        let manager = SubscriptionManager::new();
        let mut options = opts(Delivery::AtLeastOnce, 1);
        options.backpressure_expiry = Duration::from_millis(50);
        let _sub = manager.subscribe("world.**", options).unwrap();
        manager
            .publish(EventKind::Invoked, "world.garden", None, json!({}))
            .await
            .unwrap();
        let err = manager
            .publish(EventKind::Invoked, "world.garden", None, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "buffer_overflow");
    }

    #[tokio::test]
    async fn heartbeats_are_synthesized() {
        let manager = SubscriptionManager::new();
        let mut options = opts(Delivery::AtMostOnce, 8);
        options.heartbeat_interval = Some(Duration::from_millis(20));
        let sub = manager.subscribe("world.**", options).unwrap();
        let delivered =
            tokio::time::timeout(Duration::from_millis(500), sub.next()).await.unwrap().unwrap();
        assert_eq!(delivered.event.kind, EventKind::Heartbeat);
        sub.close();
    }

    #[tokio::test]
    async fn replay_without_log_yields_nothing() {
        let manager = SubscriptionManager::new();
        let mut options = opts(Delivery::AtMostOnce, 8);
        options.replay_offset = Some(0);
        let sub = manager.subscribe("world.**", options).unwrap();
        let nothing = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(nothing.is_err());
    }

    struct FixedLog(Vec<Event>);

    impl ReplayLog for FixedLog {
        fn events_from_offset(&self, offset: u64) -> Vec<Event> {
            self.0.iter().filter(|e| e.offset >= offset).cloned().collect()
        }

        fn events_from_timestamp(&self, at: DateTime<Utc>) -> Vec<Event> {
            self.0.iter().filter(|e| e.at >= at).cloned().collect()
        }
    }

    #[tokio::test]
    async fn replay_drains_history_before_live_events() {
        let manager = SubscriptionManager::new();
        manager.set_replay_log(Arc::new(FixedLog(vec![
            Event {
                kind: EventKind::Invoked,
                path: "world.garden".into(),
                aspect: Some("manifest".into()),
                payload: json!({"replayed": true}),
                offset: 0,
                at: Utc::now(),
            },
            Event {
                kind: EventKind::Invoked,
                path: "self.memory".into(),
                aspect: Some("engram".into()),
                payload: json!({"replayed": true}),
                offset: 1,
                at: Utc::now(),
            },
        ])));
        let mut options = opts(Delivery::AtMostOnce, 8);
        options.replay_offset = Some(0);
        let sub = manager.subscribe("world.**", options).unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first.event.payload["replayed"], true);
        assert_eq!(first.event.path, "world.garden");
    }
}
