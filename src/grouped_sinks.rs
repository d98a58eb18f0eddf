//! The registry mapping app-id → sinks and subscription-id → firehose
//! group, and the broadcast engine that fans an envelope out across both.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};

use crate::container_metric::ContainerMetricSink;
use crate::dump::DumpSink;
use crate::envelope::Envelope;
use crate::firehose::FirehoseGroup;
use crate::sink::{SinkKind, SinkWrapper};
use crate::telemetry::events::{DopplerEvent, SinkPopulationKind};
use crate::telemetry::sinks::{emit, MetricSink};

/// Outcome of an atomic get-or-create. Carries whether the caller's call
/// was the one that created the sink, so `SinkManager` only spawns a `run`
/// task on the creating call.
pub enum EnsureOutcome<T> {
    Existing(T),
    Created(T, mpsc::Receiver<Envelope>),
}

struct AppEntry {
    sinks: HashMap<String, SinkWrapper>,
}

impl AppEntry {
    fn new() -> Self {
        Self { sinks: HashMap::new() }
    }
}

/// The registry, guarded by a single `RwLock`. Readers: broadcast*,
/// count_for, drain*, dump_for, container_metrics_for, websocket_sinks_for,
/// is_firehose_registered. Writers: register*, close_and_delete*,
/// delete_all, ensure_*.
pub struct GroupedSinks<M: MetricSink> {
    apps: RwLock<HashMap<String, AppEntry>>,
    firehoses: RwLock<HashMap<String, Arc<FirehoseGroup<M>>>>,
    metrics: Arc<AsyncMutex<M>>,
}

impl<M: MetricSink> GroupedSinks<M> {
    pub fn new(metrics: Arc<AsyncMutex<M>>) -> Self {
        Self { apps: RwLock::new(HashMap::new()), firehoses: RwLock::new(HashMap::new()), metrics }
    }

    async fn population_changed(&self, kind: SinkPopulationKind, delta: i64) {
        let mut metrics = self.metrics.lock().await;
        emit(&mut *metrics, DopplerEvent::SinkPopulationChanged { kind, delta }).await;
    }

    /// The population gauges cover dump, syslog, websocket, and firehose
    /// sinks only — a container-metric sink has no dedicated gauge, so it
    /// reports no population change.
    fn population_kind(sink: &SinkKind) -> Option<SinkPopulationKind> {
        match sink {
            SinkKind::Dump(_) => Some(SinkPopulationKind::Dump),
            SinkKind::ContainerMetric(_) => None,
            SinkKind::Syslog(_) => Some(SinkPopulationKind::Syslog),
            SinkKind::Websocket(_) => Some(SinkPopulationKind::Websocket),
            SinkKind::FirehoseMember(_) => Some(SinkPopulationKind::Firehose),
        }
    }

    /// Inserts `sink` under its `app_id()`/`identifier()`. Rejects an empty
    /// app-id, an empty identifier, or a collision with an already
    /// registered identifier for that app.
    pub async fn register_app_sink(&self, input: mpsc::Sender<Envelope>, sink: SinkKind) -> bool {
        let app_id = sink.app_id().to_string();
        let identifier = sink.identifier().to_string();
        if app_id.is_empty() || identifier.is_empty() {
            return false;
        }
        let kind = Self::population_kind(&sink);
        {
            let mut apps = self.apps.write().await;
            let entry = apps.entry(app_id).or_insert_with(AppEntry::new);
            if entry.sinks.contains_key(&identifier) {
                return false;
            }
            entry.sinks.insert(identifier, SinkWrapper::new(sink, input));
        }
        if let Some(kind) = kind {
            self.population_changed(kind, 1).await;
        }
        true
    }

    /// Inserts `sink` into the firehose group named by `subscription_id`,
    /// creating the group if this is its first member.
    pub async fn register_firehose_sink(
        &self,
        subscription_id: &str,
        input: mpsc::Sender<Envelope>,
        sink: SinkKind,
    ) -> bool {
        if subscription_id.is_empty() || sink.identifier().is_empty() {
            return false;
        }
        let group = {
            let mut firehoses = self.firehoses.write().await;
            firehoses
                .entry(subscription_id.to_string())
                .or_insert_with(|| Arc::new(FirehoseGroup::new(subscription_id, self.metrics.clone())))
                .clone()
        };
        let added = group.add_sink(sink, input);
        if added {
            self.population_changed(SinkPopulationKind::Firehose, 1).await;
        }
        added
    }

    pub async fn is_firehose_registered(&self, subscription_id: &str, identifier: &str) -> bool {
        let firehoses = self.firehoses.read().await;
        firehoses.get(subscription_id).map(|g| g.exists(identifier)).unwrap_or(false)
    }

    /// Fans `envelope` out to every sink registered under `app_id`
    /// (non-blocking; full queues are dropped and counted independently —
    /// one full queue never stops delivery to the rest), then dispatches it
    /// to every firehose group: firehose subscribers see every app's
    /// traffic, not just one app's.
    pub async fn broadcast(&self, app_id: &str, envelope: Envelope) {
        let any_dropped = {
            let apps = self.apps.read().await;
            match apps.get(app_id) {
                Some(entry) => entry
                    .sinks
                    .values()
                    .map(|wrapper| wrapper.input.try_send(envelope.clone()).is_err())
                    .fold(false, |acc, dropped| acc || dropped),
                None => false,
            }
        };
        if any_dropped {
            self.report_dropped(app_id).await;
        }
        self.broadcast_to_firehoses(envelope).await;
    }

    async fn broadcast_to_firehoses(&self, envelope: Envelope) {
        let groups: Vec<Arc<FirehoseGroup<M>>> = self.firehoses.read().await.values().cloned().collect();
        for group in groups {
            group.broadcast(envelope.clone()).await;
        }
    }

    async fn report_dropped(&self, app_id: &str) {
        let mut metrics = self.metrics.lock().await;
        emit(&mut *metrics, DopplerEvent::SinkDropped { app_id: app_id.to_string() }).await;
    }

    /// As `broadcast`, but only delivered to sinks where
    /// `should_receive_errors()` is true, and a full queue increments
    /// `sinks.errors.dropped` instead.
    pub async fn broadcast_error(&self, app_id: &str, envelope: Envelope) {
        let apps = self.apps.read().await;
        let Some(entry) = apps.get(app_id) else { return };
        let mut dropped = false;
        for wrapper in entry.sinks.values() {
            if !wrapper.sink.should_receive_errors() {
                continue;
            }
            if wrapper.input.try_send(envelope.clone()).is_err() {
                dropped = true;
            }
        }
        drop(apps);
        if dropped {
            let mut metrics = self.metrics.lock().await;
            emit(&mut *metrics, DopplerEvent::SinkErrorDropped { app_id: app_id.to_string() }).await;
        }
    }

    pub async fn count_for(&self, app_id: &str) -> usize {
        self.apps.read().await.get(app_id).map(|e| e.sinks.len()).unwrap_or(0)
    }

    pub async fn drain_for(&self, app_id: &str, identifier: &str) -> Option<SinkKind> {
        self.apps.read().await.get(app_id).and_then(|e| e.sinks.get(identifier)).map(|w| w.sink.clone())
    }

    pub async fn drains_for(&self, app_id: &str) -> Vec<SinkKind> {
        self.apps
            .read()
            .await
            .get(app_id)
            .map(|e| e.sinks.values().map(|w| w.sink.clone()).filter(|s| s.is_syslog()).collect())
            .unwrap_or_default()
    }

    pub async fn dump_for(&self, app_id: &str) -> Option<Arc<DumpSink>> {
        let apps = self.apps.read().await;
        let entry = apps.get(app_id)?;
        entry.sinks.values().find_map(|w| match &w.sink {
            SinkKind::Dump(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub async fn container_metrics_for(&self, app_id: &str) -> Option<Arc<ContainerMetricSink>> {
        let apps = self.apps.read().await;
        let entry = apps.get(app_id)?;
        entry.sinks.values().find_map(|w| match &w.sink {
            SinkKind::ContainerMetric(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Held for the whole iteration, guarding against the source's bug of
    /// releasing the lock before iterating the map.
    pub async fn websocket_sinks_for(&self, app_id: &str) -> Vec<SinkKind> {
        let apps = self.apps.read().await;
        apps.get(app_id)
            .map(|e| e.sinks.values().map(|w| w.sink.clone()).filter(|s| s.is_websocket()).collect())
            .unwrap_or_default()
    }

    /// Atomically ensures a `DumpSink` exists for `app_id`, creating one
    /// under the same write-lock acquisition as the existence check — never
    /// split across a read-check and a separate write-insert.
    pub async fn ensure_dump_sink(
        &self,
        app_id: &str,
        capacity: usize,
        inactivity_timeout: std::time::Duration,
    ) -> EnsureOutcome<Arc<DumpSink>> {
        let mut apps = self.apps.write().await;
        let entry = apps.entry(app_id.to_string()).or_insert_with(AppEntry::new);
        if let Some(existing) = entry.sinks.values().find_map(|w| match &w.sink {
            SinkKind::Dump(s) => Some(s.clone()),
            _ => None,
        }) {
            return EnsureOutcome::Existing(existing);
        }
        let sink = Arc::new(DumpSink::new(app_id, capacity, inactivity_timeout));
        let (tx, rx) = mpsc::channel(crate::sink::SINK_QUEUE_CAPACITY);
        entry.sinks.insert(sink.identifier().to_string(), SinkWrapper::new(SinkKind::Dump(sink.clone()), tx));
        drop(apps);
        self.population_changed(SinkPopulationKind::Dump, 1).await;
        EnsureOutcome::Created(sink, rx)
    }

    /// As `ensure_dump_sink`, for the container-metric cache.
    pub async fn ensure_container_metric_sink(
        &self,
        app_id: &str,
        ttl: std::time::Duration,
        inactivity_timeout: std::time::Duration,
    ) -> EnsureOutcome<Arc<ContainerMetricSink>> {
        let mut apps = self.apps.write().await;
        let entry = apps.entry(app_id.to_string()).or_insert_with(AppEntry::new);
        if let Some(existing) = entry.sinks.values().find_map(|w| match &w.sink {
            SinkKind::ContainerMetric(s) => Some(s.clone()),
            _ => None,
        }) {
            return EnsureOutcome::Existing(existing);
        }
        let sink = Arc::new(ContainerMetricSink::new(app_id, ttl, inactivity_timeout));
        let (tx, rx) = mpsc::channel(crate::sink::SINK_QUEUE_CAPACITY);
        let identifier = sink.identifier();
        entry.sinks.insert(identifier, SinkWrapper::new(SinkKind::ContainerMetric(sink.clone()), tx));
        drop(apps);
        EnsureOutcome::Created(sink, rx)
    }

    /// Removes the sink with `identifier` under `app_id`, dropping its
    /// input-queue sender exactly once. Returns true iff one was removed.
    pub async fn close_and_delete(&self, app_id: &str, identifier: &str) -> bool {
        let removed = {
            let mut apps = self.apps.write().await;
            let Some(entry) = apps.get_mut(app_id) else { return false };
            let wrapper = entry.sinks.remove(identifier);
            if entry.sinks.is_empty() {
                apps.remove(app_id);
            }
            wrapper
        };
        match removed {
            Some(wrapper) => {
                if let Some(kind) = Self::population_kind(&wrapper.sink) {
                    self.population_changed(kind, -1).await;
                }
                true
            }
            None => false,
        }
    }

    /// Removes `identifier` from the firehose group `subscription_id`,
    /// deleting the group entirely if it becomes empty.
    pub async fn close_and_delete_firehose(&self, subscription_id: &str, identifier: &str) -> bool {
        let (removed, now_empty) = {
            let firehoses = self.firehoses.read().await;
            let Some(group) = firehoses.get(subscription_id) else { return false };
            let removed = group.remove_sink(identifier);
            (removed, group.is_empty())
        };
        if removed && now_empty {
            self.firehoses.write().await.remove(subscription_id);
        }
        if removed {
            self.population_changed(SinkPopulationKind::Firehose, -1).await;
        }
        removed
    }

    /// Drops every input-queue sender exactly once, across every app and
    /// every firehose group.
    pub async fn delete_all(&self) {
        self.apps.write().await.clear();
        self.firehoses.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventKind;
    use crate::sink::{WebsocketSendError, WebsocketSink, WebsocketTransport};
    use crate::telemetry::sinks::NullMetricSink;
    use std::time::Duration;

    fn registry() -> GroupedSinks<NullMetricSink> {
        GroupedSinks::new(Arc::new(AsyncMutex::new(NullMetricSink)))
    }

    struct NoopTransport;

    #[async_trait::async_trait]
    impl WebsocketTransport for NoopTransport {
        async fn send(&self, _envelope: &Envelope) -> Result<(), WebsocketSendError> {
            Ok(())
        }
    }

    fn websocket_sink(identifier: &str, app_id: &str) -> (SinkKind, mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(4);
        (SinkKind::Websocket(WebsocketSink::new(identifier, app_id, Arc::new(NoopTransport))), tx, rx)
    }

    #[tokio::test]
    async fn register_app_sink_rejects_empty_app_id() {
        let registry = registry();
        let (sink, tx, _rx) = websocket_sink("conn-1", "");
        assert!(!registry.register_app_sink(tx, sink).await);
    }

    #[tokio::test]
    async fn register_app_sink_rejects_duplicate_identifier() {
        let registry = registry();
        let (s1, tx1, _rx1) = websocket_sink("conn-1", "app-1");
        let (s2, tx2, _rx2) = websocket_sink("conn-1", "app-1");
        assert!(registry.register_app_sink(tx1, s1).await);
        assert!(!registry.register_app_sink(tx2, s2).await);
    }

    #[tokio::test]
    async fn broadcast_delivers_to_all_registered_sinks_for_app() {
        let registry = registry();
        let (s1, tx1, mut rx1) = websocket_sink("conn-1", "app-1");
        let (s2, tx2, mut rx2) = websocket_sink("conn-2", "app-1");
        registry.register_app_sink(tx1, s1).await;
        registry.register_app_sink(tx2, s2).await;

        registry.broadcast("app-1", Envelope::new("app-1", EventKind::Log, "rtr", 1, "hi")).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_also_reaches_firehose_members() {
        let registry = registry();
        let (s1, tx1, mut rx1) = websocket_sink("fh-1", "");
        registry.register_firehose_sink("sub-1", tx1, SinkKind::FirehoseMember(match s1 {
            SinkKind::Websocket(w) => w,
            _ => unreachable!(),
        })).await;

        registry.broadcast("app-1", Envelope::new("app-1", EventKind::Log, "rtr", 1, "hi")).await;
        assert!(rx1.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_error_skips_syslog_sinks_and_reaches_others() {
        let registry = registry();
        let (s1, tx1, mut rx1) = websocket_sink("conn-1", "app-1");
        registry.register_app_sink(tx1, s1).await;

        registry.broadcast_error("app-1", Envelope::error("app-1", 1, "boom")).await;
        assert!(rx1.try_recv().is_ok());
    }

    #[tokio::test]
    async fn close_and_delete_removes_exactly_once() {
        let registry = registry();
        let (s1, tx1, _rx1) = websocket_sink("conn-1", "app-1");
        registry.register_app_sink(tx1, s1).await;

        assert!(registry.close_and_delete("app-1", "conn-1").await);
        assert!(!registry.close_and_delete("app-1", "conn-1").await);
    }

    #[tokio::test]
    async fn ensure_dump_sink_is_idempotent_across_concurrent_callers() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.ensure_dump_sink("app-1", 10, Duration::from_secs(60)).await
            }));
        }
        let mut created = 0;
        for h in handles {
            if matches!(h.await.unwrap(), EnsureOutcome::Created(_, _)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(registry.count_for("app-1").await, 1);
    }

    #[tokio::test]
    async fn dump_for_and_container_metrics_for_use_asymmetric_identifiers() {
        let registry = registry();
        registry.ensure_dump_sink("app-1", 10, Duration::from_secs(60)).await;
        registry.ensure_container_metric_sink("app-1", Duration::from_secs(10), Duration::from_secs(60)).await;

        assert!(registry.drain_for("app-1", "app-1").await.is_some());
        assert!(registry.drain_for("app-1", "container-metrics-app-1").await.is_some());
        assert!(registry.dump_for("app-1").await.is_some());
        assert!(registry.container_metrics_for("app-1").await.is_some());
    }

    #[tokio::test]
    async fn delete_all_clears_every_app_and_firehose() {
        let registry = registry();
        let (s1, tx1, _rx1) = websocket_sink("conn-1", "app-1");
        registry.register_app_sink(tx1, s1).await;
        let (s2, tx2, _rx2) = websocket_sink("fh-1", "");
        registry.register_firehose_sink("sub-1", tx2, SinkKind::FirehoseMember(match s2 {
            SinkKind::Websocket(w) => w,
            _ => unreachable!(),
        })).await;

        registry.delete_all().await;
        assert_eq!(registry.count_for("app-1").await, 0);
        assert!(!registry.is_firehose_registered("sub-1", "fh-1").await);
    }
}
