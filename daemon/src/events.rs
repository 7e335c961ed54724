//! Event bus (C5): a `tokio::sync::broadcast` channel carrying
//! [`jeeves_core::JeevesEvent`], with per-subscriber [`EventFilter`]
//! narrowing and subscription bookkeeping over the handful of event kinds
//! the viewer stream cares about (`state`, `logs`, `worker-*`, `sdk-*`).
use chrono::{DateTime, Utc};
use jeeves_core::events::JeevesEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Bound on the broadcast channel's internal ring buffer; a slow subscriber
/// that falls this far behind sees a `Lagged` error on its next `recv` and
/// must re-sync from a fresh snapshot rather than replay the gap.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Narrows a subscription to one issue's events (empty = every issue this
/// daemon is driving).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventFilter {
    #[serde(default)]
    pub issue_refs: Vec<String>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_issue(issue_ref: String) -> Self {
        Self { issue_refs: vec![issue_ref] }
    }

    pub fn matches(&self, event: &JeevesEvent) -> bool {
        if self.issue_refs.is_empty() {
            return true;
        }
        match event {
            JeevesEvent::State(p) => self.issue_refs.contains(&p.issue_ref),
            // Log/SDK/worker events carry a run id rather than an issue ref;
            // a daemon driving one run per issue treats run id membership the
            // same way until multi-issue fan-out needs finer routing.
            JeevesEvent::Logs(_) | JeevesEvent::ViewerLogs(_) => true,
            JeevesEvent::WorkerLogs(_) | JeevesEvent::WorkerSdk(_) => true,
            JeevesEvent::SdkInit(_)
            | JeevesEvent::SdkMessage(_)
            | JeevesEvent::SdkToolStart(_)
            | JeevesEvent::SdkToolComplete(_)
            | JeevesEvent::SdkComplete(_) => true,
        }
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    filter: EventFilter,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    pub total_events_published: u64,
    pub active_subscriptions: usize,
}

/// Publishes [`JeevesEvent`]s from the run driver and the file tailers to
/// every connected WebSocket subscriber.
pub struct EventBus {
    tx: broadcast::Sender<JeevesEvent>,
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
    stats: Arc<RwLock<EventBusStats>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(EventBusStats::default())),
        }
    }

    pub fn sender(&self) -> broadcast::Sender<JeevesEvent> {
        self.tx.clone()
    }

    pub async fn publish(&self, event: JeevesEvent) {
        self.stats.write().await.total_events_published += 1;
        let _ = self.tx.send(event);
    }

    pub async fn subscribe(&self, filter: Option<EventFilter>) -> (String, broadcast::Receiver<JeevesEvent>) {
        let id = Uuid::new_v4().to_string();
        self.subscriptions.write().await.insert(
            id.clone(),
            Subscription { filter: filter.unwrap_or_default(), created_at: Utc::now() },
        );
        self.stats.write().await.active_subscriptions = self.subscriptions.read().await.len();
        (id, self.tx.subscribe())
    }

    pub async fn unsubscribe(&self, id: &str) {
        self.subscriptions.write().await.remove(id);
        self.stats.write().await.active_subscriptions = self.subscriptions.read().await.len();
    }

    pub async fn filter_for(&self, id: &str) -> EventFilter {
        self.subscriptions
            .read()
            .await
            .get(id)
            .map(|s| s.filter.clone())
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jeeves_core::events::StatePayload;

    fn state_event(issue_ref: &str) -> JeevesEvent {
        JeevesEvent::State(StatePayload {
            issue_ref: issue_ref.to_string(),
            phase: "design".into(),
            status: serde_json::json!({}),
            run_id: "run.1".into(),
            iteration: 1,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn filter_all_matches_everything() {
        assert!(EventFilter::all().matches(&state_event("acme/widgets#1")));
    }

    #[test]
    fn filter_for_issue_excludes_other_issues() {
        let filter = EventFilter::for_issue("acme/widgets#1".into());
        assert!(filter.matches(&state_event("acme/widgets#1")));
        assert!(!filter.matches(&state_event("acme/widgets#2")));
    }

    #[tokio::test]
    async fn publish_is_observed_by_subscriber() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe(None).await;
        bus.publish(state_event("acme/widgets#1")).await;
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, JeevesEvent::State(_)));
        assert_eq!(bus.stats().await.total_events_published, 1);
    }

    #[tokio::test]
    async fn unsubscribe_drops_bookkeeping() {
        let bus = EventBus::new();
        let (id, _rx) = bus.subscribe(None).await;
        assert_eq!(bus.stats().await.active_subscriptions, 1);
        bus.unsubscribe(&id).await;
        assert_eq!(bus.stats().await.active_subscriptions, 0);
    }
}
