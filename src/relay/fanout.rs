//! Broadcast fan-out

use tracing::{debug, warn};

use crate::connection::ConnectionRegistry;
use crate::metrics::Metrics;
use crate::protocol::ConnectionId;

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Size of the snapshot the pass worked from
    pub recipients: usize,
    pub delivered: Vec<ConnectionId>,
    /// Recipients that failed, with the failure reason; all were unregistered
    pub failed: Vec<(ConnectionId, &'static str)>,
}

impl FanoutReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Forward `payload` to every registered connection except `sender`
///
/// Each recipient gets exactly one send attempt. A failed recipient is
/// recorded and skipped; once the pass is over every failed recipient is
/// removed from the registry and its handle closed. Nothing is reported back
/// to the sender.
pub async fn broadcast(
    registry: &ConnectionRegistry,
    metrics: &Metrics,
    sender: &ConnectionId,
    payload: &str,
) -> FanoutReport {
    let snapshot = registry.snapshot_others(sender);
    let mut report = FanoutReport {
        recipients: snapshot.len(),
        ..FanoutReport::default()
    };
    let mut dead = Vec::new();

    for (recipient, handle) in snapshot {
        match handle.send_text(payload).await {
            Ok(()) => {
                debug!(from = %sender, to = %recipient, "Forwarded message");
                report.delivered.push(recipient);
            }
            Err(e) => {
                warn!(
                    from = %sender,
                    to = %recipient,
                    reason = e.reason(),
                    "Delivery failed, dropping recipient: {}",
                    e
                );
                metrics.record_delivery_failure(e.reason());
                report.failed.push((recipient, e.reason()));
                dead.push((recipient, handle));
            }
        }
    }

    for (recipient, handle) in dead {
        handle.mark_closed();
        if registry.unregister(&recipient).is_some() {
            debug!(connection_id = %recipient, "Removed dead connection");
        }
    }

    metrics.record_fanout(report.recipients, report.delivered.len());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{channel_handle, failing_handle, stalled_handle};
    use axum::extract::ws::Message;
    use futures_util::StreamExt;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_delivers_to_everyone_but_sender() {
        let registry = ConnectionRegistry::new();
        let metrics = Metrics::new();

        let (a, mut a_rx) = channel_handle(TIMEOUT);
        let (b, mut b_rx) = channel_handle(TIMEOUT);
        let (c, mut c_rx) = channel_handle(TIMEOUT);
        let (ida, idb, idc) = (ConnectionId::generate(), ConnectionId::generate(), ConnectionId::generate());
        registry.register(ida, a).unwrap();
        registry.register(idb, b).unwrap();
        registry.register(idc, c).unwrap();

        let report = broadcast(&registry, &metrics, &ida, "hello").await;

        assert_eq!(report.recipients, 2);
        assert!(report.is_complete());
        assert_eq!(b_rx.next().await, Some(Message::Text("hello".to_string())));
        assert_eq!(c_rx.next().await, Some(Message::Text("hello".to_string())));
        assert!(a_rx.try_next().is_err(), "sender must not receive its own message");
        assert_eq!(metrics.counters().deliveries, 2);
    }

    #[tokio::test]
    async fn test_lone_sender_fans_out_to_nobody() {
        let registry = ConnectionRegistry::new();
        let metrics = Metrics::new();
        let (a, _a_rx) = channel_handle(TIMEOUT);
        let ida = ConnectionId::generate();
        registry.register(ida, a).unwrap();

        let started = Instant::now();
        let report = broadcast(&registry, &metrics, &ida, "anyone?").await;

        assert_eq!(report, FanoutReport::default());
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(metrics.counters().delivery_failures, 0);
        assert!(registry.contains(&ida));
    }

    #[tokio::test]
    async fn test_failed_recipient_is_isolated_and_pruned() {
        let registry = ConnectionRegistry::new();
        let metrics = Metrics::new();

        let (a, _a_rx) = channel_handle(TIMEOUT);
        let dead = failing_handle(TIMEOUT);
        let (c, mut c_rx) = channel_handle(TIMEOUT);
        let (d, mut d_rx) = channel_handle(TIMEOUT);
        let (ida, idb, idc, idd) = (
            ConnectionId::generate(),
            ConnectionId::generate(),
            ConnectionId::generate(),
            ConnectionId::generate(),
        );
        registry.register(ida, a).unwrap();
        registry.register(idb, dead.clone()).unwrap();
        registry.register(idc, c).unwrap();
        registry.register(idd, d).unwrap();

        let report = broadcast(&registry, &metrics, &ida, r#"{"sdp":"..."}"#).await;

        assert_eq!(report.failed, vec![(idb, "transport")]);
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(c_rx.next().await, Some(Message::Text(r#"{"sdp":"..."}"#.to_string())));
        assert_eq!(d_rx.next().await, Some(Message::Text(r#"{"sdp":"..."}"#.to_string())));

        assert!(!registry.contains(&idb));
        assert!(dead.is_closed());
        assert_eq!(registry.len(), 3);
        assert_eq!(metrics.delivery_failures_for("transport"), 1);
    }

    #[tokio::test]
    async fn test_stalled_recipient_times_out_and_is_pruned() {
        let registry = ConnectionRegistry::new();
        let metrics = Metrics::new();

        let (a, _a_rx) = channel_handle(TIMEOUT);
        let stalled = stalled_handle(Duration::from_millis(50));
        let (c, mut c_rx) = channel_handle(TIMEOUT);
        let (ida, idb, idc) = (ConnectionId::generate(), ConnectionId::generate(), ConnectionId::generate());
        registry.register(ida, a).unwrap();
        registry.register(idb, stalled).unwrap();
        registry.register(idc, c).unwrap();

        let report = broadcast(&registry, &metrics, &ida, "ping").await;

        assert_eq!(report.failed, vec![(idb, "timeout")]);
        assert_eq!(c_rx.next().await, Some(Message::Text("ping".to_string())));
        assert!(!registry.contains(&idb));
        assert_eq!(metrics.delivery_failures_for("timeout"), 1);
    }

    #[tokio::test]
    async fn test_recipient_removed_after_snapshot_fails_as_closed() {
        let registry = ConnectionRegistry::new();
        let metrics = Metrics::new();

        let (a, _a_rx) = channel_handle(TIMEOUT);
        let (b, _b_rx) = channel_handle(TIMEOUT);
        let (ida, idb) = (ConnectionId::generate(), ConnectionId::generate());
        registry.register(ida, a).unwrap();
        registry.register(idb, b.clone()).unwrap();

        // B's own loop already cleaned up; a later broadcast cannot reach it
        b.close().await;
        let report = broadcast(&registry, &metrics, &ida, "late").await;

        assert_eq!(report.failed, vec![(idb, "closed")]);
        assert!(!registry.contains(&idb));
        assert!(registry.contains(&ida));
        assert_eq!(metrics.delivery_failures_for("closed"), 1);
    }
}
