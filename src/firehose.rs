//! A named shared subscription that round-robins an envelope to exactly one
//! member. A firehose is a load-balanced tap, not a per-member
//! duplication — drop-on-saturation preserves liveness over completeness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::envelope::Envelope;
use crate::sink::SinkKind;
use crate::telemetry::events::DopplerEvent;
use crate::telemetry::sinks::{emit, MetricSink};

/// Membership and the round-robin cursor, guarded by their own mutex —
/// separate from `GroupedSinks`' registry lock — so dispatch never blocks
/// registry writers beyond the brief cursor update.
pub struct FirehoseGroup<M: MetricSink> {
    subscription_id: String,
    members: Mutex<Vec<(SinkKind, mpsc::Sender<Envelope>)>>,
    cursor: AtomicUsize,
    metrics: Arc<AsyncMutex<M>>,
}

impl<M: MetricSink> FirehoseGroup<M> {
    pub fn new(subscription_id: impl Into<String>, metrics: Arc<AsyncMutex<M>>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            members: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            metrics,
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Appends a member; rejects a duplicate identifier within this group.
    pub fn add_sink(&self, sink: SinkKind, input: mpsc::Sender<Envelope>) -> bool {
        let mut members = self.members.lock().unwrap_or_else(|p| p.into_inner());
        if members.iter().any(|(s, _)| s.identifier() == sink.identifier()) {
            return false;
        }
        members.push((sink, input));
        true
    }

    /// Removes the first member whose identifier matches. Dropping its
    /// sender closes that member's input queue.
    pub fn remove_sink(&self, identifier: &str) -> bool {
        let mut members = self.members.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pos) = members.iter().position(|(s, _)| s.identifier() == identifier) {
            members.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn exists(&self, identifier: &str) -> bool {
        self.members.lock().unwrap_or_else(|p| p.into_inner()).iter().any(|(s, _)| s.identifier() == identifier)
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().unwrap_or_else(|p| p.into_inner()).is_empty()
    }

    pub fn remove_all_sinks(&self) {
        self.members.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Delivers `envelope` to exactly one member, selected by a cursor that
    /// advances on every call. If the selected member's queue is full, tries
    /// the next member, bounded to one full sweep of the membership; if all
    /// are full (or the group is empty), increments `firehose.dropped` and
    /// discards.
    pub async fn broadcast(&self, envelope: Envelope) {
        let all_full = {
            let members = self.members.lock().unwrap_or_else(|p| p.into_inner());
            let n = members.len();
            if n == 0 {
                return;
            }
            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            let mut delivered = false;
            for offset in 0..n {
                let idx = (start + offset) % n;
                if members[idx].1.try_send(envelope.clone()).is_ok() {
                    delivered = true;
                    break;
                }
            }
            !delivered
        };

        if all_full {
            let mut metrics = self.metrics.lock().await;
            emit(&mut *metrics, DopplerEvent::FirehoseDropped { subscription_id: self.subscription_id.clone() })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventKind;
    use crate::sink::{WebsocketSendError, WebsocketSink, WebsocketTransport};
    use crate::telemetry::sinks::{MemoryMetricSink, NullMetricSink};

    fn env(tag: u64) -> Envelope {
        Envelope::new("app", EventKind::Log, "rtr", tag, "x")
    }

    struct NoopTransport;

    #[async_trait::async_trait]
    impl WebsocketTransport for NoopTransport {
        async fn send(&self, _envelope: &Envelope) -> Result<(), WebsocketSendError> {
            Ok(())
        }
    }

    fn member(identifier: &str) -> (SinkKind, mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(1);
        let sink = SinkKind::FirehoseMember(WebsocketSink::new(identifier, "", Arc::new(NoopTransport)));
        (sink, tx, rx)
    }

    fn group() -> FirehoseGroup<NullMetricSink> {
        FirehoseGroup::new("sub", Arc::new(AsyncMutex::new(NullMetricSink)))
    }

    #[test]
    fn add_sink_rejects_duplicate_identifier() {
        let g = group();
        let (s1, tx1, _rx1) = member("m1");
        let (s2, tx2, _rx2) = member("m1");
        assert!(g.add_sink(s1, tx1));
        assert!(!g.add_sink(s2, tx2));
    }

    #[test]
    fn remove_sink_reports_whether_one_was_removed() {
        let g = group();
        let (s1, tx1, _rx1) = member("m1");
        g.add_sink(s1, tx1);
        assert!(g.remove_sink("m1"));
        assert!(!g.remove_sink("m1"));
    }

    #[tokio::test]
    async fn s2_two_members_round_robin_deterministically_from_fixed_start() {
        let g = group();
        let (s1, tx1, mut rx1) = member("m1");
        let (s2, tx2, mut rx2) = member("m2");
        g.add_sink(s1, tx1);
        g.add_sink(s2, tx2);

        g.broadcast(env(1)).await;
        g.broadcast(env(2)).await;

        let got1 = rx1.try_recv().expect("member 0 gets the first envelope");
        assert_eq!(got1.timestamp_nanos(), 1);
        let got2 = rx2.try_recv().expect("member 1 gets the second envelope");
        assert_eq!(got2.timestamp_nanos(), 2);
    }

    #[tokio::test]
    async fn distributes_evenly_across_non_saturated_members() {
        let g = group();
        let (s1, tx1, mut rx1) = member("m1");
        let (s2, tx2, mut rx2) = member("m2");
        let (s3, tx3, mut rx3) = member("m3");
        // Use unbounded-ish capacity by draining frequently isn't needed for
        // this property test — capacity 1 + immediate drains keeps every
        // queue non-full across 9 envelopes / 3 members.
        g.add_sink(s1, tx1);
        g.add_sink(s2, tx2);
        g.add_sink(s3, tx3);

        let mut counts = [0usize; 3];
        for i in 0..9u64 {
            g.broadcast(env(i)).await;
            if rx1.try_recv().is_ok() {
                counts[0] += 1;
            }
            if rx2.try_recv().is_ok() {
                counts[1] += 1;
            }
            if rx3.try_recv().is_ok() {
                counts[2] += 1;
            }
        }
        assert_eq!(counts, [3, 3, 3]);
    }

    #[tokio::test]
    async fn full_sweep_skips_saturated_member_and_delivers_to_next() {
        let g = group();
        let (s1, tx1, _rx1_unused) = member("m1"); // never drained: capacity-1 queue fills on first send
        let (s2, tx2, mut rx2) = member("m2");
        g.add_sink(s1, tx1);
        g.add_sink(s2, tx2);

        g.broadcast(env(1)).await; // cursor selects m1 first, fills it
        g.broadcast(env(2)).await; // cursor selects m2 first this time... but even if it selected m1, m1 is full now

        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn all_members_full_increments_dropped_metric() {
        let metrics = Arc::new(AsyncMutex::new(MemoryMetricSink::new()));
        let g = FirehoseGroup::new("sub", metrics.clone());
        let (s1, tx1, _rx1) = member("m1");
        g.add_sink(s1, tx1);

        g.broadcast(env(1)).await; // fills the only member's queue (capacity 1)
        g.broadcast(env(2)).await; // now full, must be dropped

        let events = metrics.lock().await.events();
        assert!(events.iter().any(|e| matches!(e, DopplerEvent::FirehoseDropped { .. })));
    }

    #[tokio::test]
    async fn broadcast_on_empty_group_is_a_noop() {
        let g = group();
        g.broadcast(env(1)).await;
    }
}
