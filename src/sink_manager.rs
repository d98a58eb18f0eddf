//! The orchestrator: owns `GroupedSinks`, consumes the service-discovery
//! feed, lazily ensures per-app caches, runs each sink on its own
//! cooperative task, and reports sink errors back through the broadcast
//! engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::blacklist::UrlBlacklistManager;
use crate::clock::{Clock, MonotonicClock};
use crate::config::DopplerConfig;
use crate::envelope::{AppService, Envelope};
use crate::grouped_sinks::{EnsureOutcome, GroupedSinks};
use crate::sink::SinkKind;
use crate::syslog::{SyslogSink, SyslogWriterFactory};
use crate::telemetry::sinks::MetricSink;

/// Capacity of the internal channel syslog sinks use to report write
/// failures back to the broadcast engine.
const ERROR_CHANNEL_CAPACITY: usize = 100;

pub struct SinkManager<M: MetricSink> {
    sinks: Arc<GroupedSinks<M>>,
    config: DopplerConfig,
    blacklist: Arc<UrlBlacklistManager>,
    writer_factory: Arc<dyn SyslogWriterFactory>,
    error_tx: mpsc::Sender<Envelope>,
    error_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Envelope>>>,
    clock: Arc<dyn Clock>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    stopped: AtomicBool,
}

impl<M: MetricSink> SinkManager<M> {
    pub fn new(
        sinks: Arc<GroupedSinks<M>>,
        config: DopplerConfig,
        blacklist: Arc<UrlBlacklistManager>,
        writer_factory: Arc<dyn SyslogWriterFactory>,
    ) -> Self {
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            sinks,
            config,
            blacklist,
            writer_factory,
            error_tx,
            error_rx: tokio::sync::Mutex::new(Some(error_rx)),
            clock: Arc::new(MonotonicClock::default()),
            done_tx,
            done_rx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawns the three feed-consumer tasks: new-service
    /// announcements, deleted-service announcements, and the internal error
    /// fan-in. Each loop exits when the `done` signal flips or its feed
    /// closes. Takes ownership of an `Arc` handle so each task can hold its
    /// own clone across `.await` points.
    pub fn start(
        self: Arc<Self>,
        mut new_app_services: mpsc::Receiver<AppService>,
        mut deleted_app_services: mpsc::Receiver<AppService>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut done = manager.done_rx.clone();
            loop {
                tokio::select! {
                    _ = done.changed() => return,
                    service = new_app_services.recv() => {
                        match service {
                            Some(service) => manager.open_syslog_sink(service).await,
                            None => return,
                        }
                    }
                }
            }
        });

        let manager = self.clone();
        tokio::spawn(async move {
            let mut done = manager.done_rx.clone();
            loop {
                tokio::select! {
                    _ = done.changed() => return,
                    service = deleted_app_services.recv() => {
                        match service {
                            Some(service) => manager.close_syslog_sink(&service).await,
                            None => return,
                        }
                    }
                }
            }
        });

        let manager = self;
        tokio::spawn(async move {
            let mut error_rx = manager.error_rx.lock().await.take().expect("error feed already taken");
            let mut done = manager.done_rx.clone();
            loop {
                tokio::select! {
                    _ = done.changed() => return,
                    envelope = error_rx.recv() => {
                        match envelope {
                            Some(envelope) => {
                                let app_id = envelope.app_id().to_string();
                                manager.sinks.broadcast_error(&app_id, envelope).await;
                            }
                            None => return,
                        }
                    }
                }
            }
        });
    }

    /// Ensures the dump sink and container-metric sink for `app_id` exist
    /// (lazy materialization on first use), then broadcasts `envelope`.
    pub async fn send_to(&self, app_id: &str, envelope: Envelope) {
        if app_id.is_empty() {
            return;
        }
        if let EnsureOutcome::Created(sink, rx) = self
            .sinks
            .ensure_dump_sink(app_id, self.config.max_retained_log_messages, self.config.sink_inactivity_timeout)
            .await
        {
            self.spawn_dump_run(sink, rx);
        }
        if let EnsureOutcome::Created(sink, rx) = self
            .sinks
            .ensure_container_metric_sink(
                app_id,
                self.config.container_metric_ttl,
                self.config.sink_inactivity_timeout,
            )
            .await
        {
            self.spawn_container_metric_run(sink, rx);
        }
        self.sinks.broadcast(app_id, envelope).await;
    }

    fn spawn_dump_run(&self, sink: Arc<crate::dump::DumpSink>, rx: mpsc::Receiver<Envelope>) {
        let sinks = self.sinks.clone();
        let app_id = sink.app_id().to_string();
        let identifier = sink.identifier().to_string();
        tokio::spawn(async move {
            sink.run(rx).await;
            sinks.close_and_delete(&app_id, &identifier).await;
        });
    }

    fn spawn_container_metric_run(
        &self,
        sink: Arc<crate::container_metric::ContainerMetricSink>,
        rx: mpsc::Receiver<Envelope>,
    ) {
        let sinks = self.sinks.clone();
        let app_id = sink.app_id().to_string();
        let identifier = sink.identifier();
        tokio::spawn(async move {
            sink.run(rx).await;
            sinks.close_and_delete(&app_id, &identifier).await;
        });
    }

    /// Registers `sink` with `GroupedSinks`, allocates its input queue, and
    /// spawns its `run` task. Returns false (and registers nothing) on an
    /// identifier collision.
    pub async fn register_sink(&self, sink: SinkKind) -> bool {
        let (tx, rx) = mpsc::channel(crate::sink::SINK_QUEUE_CAPACITY);
        if !self.sinks.register_app_sink(tx, sink.clone()).await {
            return false;
        }
        let sinks = self.sinks.clone();
        let app_id = sink.app_id().to_string();
        let identifier = sink.identifier().to_string();
        tokio::spawn(async move {
            sink.run(rx).await;
            sinks.close_and_delete(&app_id, &identifier).await;
            if let SinkKind::Syslog(syslog) = &sink {
                syslog.disconnect();
            }
        });
        true
    }

    /// Idempotent: `close_and_delete` only fires its population event on the
    /// call that actually removes the entry.
    pub async fn unregister_sink(&self, app_id: &str, identifier: &str) {
        self.sinks.close_and_delete(app_id, identifier).await;
    }

    pub async fn register_firehose_sink(&self, subscription_id: &str, sink: SinkKind) -> bool {
        let (tx, rx) = mpsc::channel(crate::sink::SINK_QUEUE_CAPACITY);
        if !self.sinks.register_firehose_sink(subscription_id, tx, sink.clone()).await {
            return false;
        }
        let sinks = self.sinks.clone();
        let subscription_id = subscription_id.to_string();
        let identifier = sink.identifier().to_string();
        tokio::spawn(async move {
            sink.run(rx).await;
            sinks.close_and_delete_firehose(&subscription_id, &identifier).await;
        });
        true
    }

    pub async fn unregister_firehose_sink(&self, subscription_id: &str, identifier: &str) {
        self.sinks.close_and_delete_firehose(subscription_id, identifier).await;
    }

    pub async fn recent_logs_for(&self, app_id: &str) -> Vec<Envelope> {
        match self.sinks.dump_for(app_id).await {
            Some(sink) => sink.dump(),
            None => Vec::new(),
        }
    }

    pub async fn latest_container_metrics(&self, app_id: &str) -> Vec<Envelope> {
        match self.sinks.container_metrics_for(app_id).await {
            Some(sink) => sink.get_latest(),
            None => Vec::new(),
        }
    }

    /// Wraps `message` in an `EventKind::Error` envelope addressed to
    /// `app_id` and enqueues it on the internal error channel; on a full
    /// channel the envelope is dropped (the error path must never block the
    /// sink task reporting it).
    pub fn send_syslog_error_to_loggregator(&self, message: impl Into<String>, app_id: &str) {
        let envelope = Envelope::error(app_id, self.clock.now_millis(), message.into());
        if self.error_tx.try_send(envelope).is_err() {
            tracing::debug!(app_id, "error fan-in channel full, dropping error envelope");
        }
    }

    async fn open_syslog_sink(&self, service: AppService) {
        let url = match self.blacklist.check_url(&service.drain_url) {
            Ok(url) => url,
            Err(err) => {
                self.send_syslog_error_to_loggregator(
                    format!("rejected syslog drain {}: {}", service.drain_url, err),
                    &service.app_id,
                );
                return;
            }
        };

        let writer = match self.writer_factory.build(&url, &self.config) {
            Ok(writer) => writer,
            Err(err) => {
                self.send_syslog_error_to_loggregator(err.to_string(), &service.app_id);
                return;
            }
        };

        let sink = match SyslogSink::new(
            service.app_id.clone(),
            service.drain_url.clone(),
            writer,
            self.config.sink_io_timeout,
            self.error_tx.clone(),
        ) {
            Ok(sink) => sink,
            Err(err) => {
                self.send_syslog_error_to_loggregator(
                    format!("failed to construct syslog sink for {}: {}", service.drain_url, err),
                    &service.app_id,
                );
                return;
            }
        };

        self.register_sink(SinkKind::Syslog(Arc::new(sink))).await;
    }

    async fn close_syslog_sink(&self, service: &AppService) {
        self.unregister_sink(&service.app_id, &service.drain_url).await;
    }

    /// Idempotent: only the first call flips the done signal.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.done_tx.send(true);
        let sinks = self.sinks.clone();
        tokio::spawn(async move { sinks.delete_all().await });
    }
}
