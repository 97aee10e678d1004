use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::MonitorError;
use crate::status::{StatusType, TargetStatus};
use crate::store::StatusStore;

/// Whether a freshly polled status is worth reporting.
///
/// A known previous status makes any change of type notable. With no live
/// previous status (never seen, or expired) every non-OK status is notable,
/// and OK only when `notify_first_ok` is set.
pub fn is_notable(previous: Option<StatusType>, current: StatusType, notify_first_ok: bool) -> bool {
    match previous {
        Some(previous) => previous != current,
        None => current != StatusType::Ok || notify_first_ok,
    }
}

/// Compares each poll result with the stored one, emits notable results and
/// records the new status.
pub(crate) struct ChangeDetector {
    store: Box<dyn StatusStore>,
    status_ttl: Duration,
    notify_first_ok: bool,
    updates_tx: mpsc::Sender<TargetStatus>,
    errors_tx: Option<mpsc::Sender<MonitorError>>,
}

impl ChangeDetector {
    pub(crate) fn new(
        store: Box<dyn StatusStore>,
        status_ttl: Duration,
        notify_first_ok: bool,
        updates_tx: mpsc::Sender<TargetStatus>,
    ) -> Self {
        Self {
            store,
            status_ttl,
            notify_first_ok,
            updates_tx,
            errors_tx: None,
        }
    }

    pub(crate) fn set_errors(&mut self, errors_tx: mpsc::Sender<MonitorError>) {
        self.errors_tx = Some(errors_tx);
    }

    /// Returns true when the result was emitted as an update.
    pub(crate) async fn process(&mut self, result: TargetStatus) -> bool {
        let target_id = result.target.id;

        let previous = match self.store.get(&result.target).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(target_id, error = %e, "Failed to read stored status, treating as unknown");
                report(self.errors_tx.as_ref(), MonitorError::StoreRead { target_id, source: e }).await;
                None
            }
        };

        let previous_type = previous.as_ref().map(|s| s.status_type);
        let notable = is_notable(previous_type, result.status.status_type, self.notify_first_ok);

        if notable {
            info!(
                target_id,
                url = %result.target.url,
                previous = previous_type.map(|t| t.as_str()).unwrap_or("unknown"),
                current = %result.status.status_type,
                "Status changed"
            );
            if self.updates_tx.send(result.clone()).await.is_err() {
                debug!(target_id, "Updates receiver dropped, discarding update");
            }
        }

        if let Err(e) = self
            .store
            .set(&result.target, &result.status, self.status_ttl)
            .await
        {
            warn!(target_id, error = %e, "Failed to store status");
            report(self.errors_tx.as_ref(), MonitorError::StoreWrite { target_id, source: e })
                .await;
        }

        notable
    }
}

async fn report(errors_tx: Option<&mpsc::Sender<MonitorError>>, error: MonitorError) {
    if let Some(tx) = errors_tx {
        let _ = tx.send(error).await;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::status::{Status, Target};
    use crate::store::{MemoryStore, StoreError};

    use crate::status::StatusType::{DnsLookupError, GenericError, HttpError, Timeout};
    const UP: StatusType = StatusType::Ok;

    fn result(status_type: StatusType) -> TargetStatus {
        let status = match status_type {
            UP => Status::ok(200, Duration::from_millis(20)),
            HttpError => Status::http_error(503, "Service Unavailable", Duration::from_millis(20)),
            other => Status::failure(other, "boom", Duration::from_millis(20)),
        };
        TargetStatus::new(Target::new(1, "Example", "http://example.com"), status)
    }

    fn detector(
        store: Box<dyn StatusStore>,
        ttl: Duration,
        notify_first_ok: bool,
    ) -> (ChangeDetector, mpsc::Receiver<TargetStatus>) {
        let (tx, rx) = mpsc::channel(16);
        (ChangeDetector::new(store, ttl, notify_first_ok, tx), rx)
    }

    /// Fails every read or every write.
    struct BrokenStore {
        fail_get: bool,
        fail_set: bool,
    }

    #[async_trait]
    impl StatusStore for BrokenStore {
        async fn get(&mut self, _target: &Target) -> Result<Option<Status>, StoreError> {
            if self.fail_get {
                Err(StoreError::Options("connection reset".into()))
            } else {
                Ok(None)
            }
        }

        async fn set(
            &mut self,
            _target: &Target,
            _status: &Status,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            if self.fail_set {
                Err(StoreError::Options("read only replica".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn unchanged_type_is_never_notable() {
        for t in StatusType::ALL {
            assert!(!is_notable(Some(t), t, false), "{}", t);
            assert!(!is_notable(Some(t), t, true), "{}", t);
        }
    }

    #[test]
    fn changed_type_is_always_notable() {
        for a in StatusType::ALL {
            for b in StatusType::ALL {
                if a != b {
                    assert!(is_notable(Some(a), b, false), "{} -> {}", a, b);
                }
            }
        }
    }

    #[test]
    fn first_failure_is_notable() {
        for t in StatusType::ALL.into_iter().filter(|t| *t != UP) {
            assert!(is_notable(None, t, false), "{}", t);
        }
    }

    #[test]
    fn first_ok_depends_on_flag() {
        assert!(!is_notable(None, UP, false));
        assert!(is_notable(None, UP, true));
    }

    #[tokio::test(start_paused = true)]
    async fn emits_only_transitions() {
        let (mut detector, mut rx) =
            detector(Box::new(MemoryStore::new()), Duration::from_secs(60), false);

        let sequence = [UP, UP, Timeout, Timeout, HttpError, UP, UP];
        let mut emitted = Vec::new();
        for t in sequence {
            if detector.process(result(t)).await {
                emitted.push(rx.try_recv().unwrap().status.status_type);
            }
        }

        assert_eq!(emitted, vec![Timeout, HttpError, UP]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_status_counts_as_unknown() {
        let (mut detector, mut rx) =
            detector(Box::new(MemoryStore::new()), Duration::from_secs(5), false);

        assert!(detector.process(result(Timeout)).await);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(detector.process(result(Timeout)).await);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!detector.process(result(UP)).await);

        assert_eq!(rx.try_recv().unwrap().status.status_type, Timeout);
        assert_eq!(rx.try_recv().unwrap().status.status_type, Timeout);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_results_refresh_the_stored_status() {
        let (mut detector, mut rx) =
            detector(Box::new(MemoryStore::new()), Duration::from_millis(1500), false);

        assert!(detector.process(result(Timeout)).await);
        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(1000)).await;
            assert!(!detector.process(result(Timeout)).await);
        }

        assert_eq!(rx.try_recv().unwrap().status.status_type, Timeout);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_failure_is_reported_and_treated_as_unknown() {
        let store = BrokenStore {
            fail_get: true,
            fail_set: false,
        };
        let (mut detector, mut rx) = detector(Box::new(store), Duration::from_secs(60), false);
        let (errors_tx, mut errors_rx) = mpsc::channel(4);
        detector.set_errors(errors_tx);

        assert!(detector.process(result(DnsLookupError)).await);
        assert!(!detector.process(result(UP)).await);

        assert_eq!(rx.try_recv().unwrap().status.status_type, DnsLookupError);
        for _ in 0..2 {
            let err = errors_rx.try_recv().unwrap();
            assert!(matches!(err, MonitorError::StoreRead { target_id: 1, .. }), "{}", err);
        }
        assert!(errors_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_failure_is_reported_after_emitting() {
        let store = BrokenStore {
            fail_get: false,
            fail_set: true,
        };
        let (mut detector, mut rx) = detector(Box::new(store), Duration::from_secs(60), false);
        let (errors_tx, mut errors_rx) = mpsc::channel(4);
        detector.set_errors(errors_tx);

        assert!(detector.process(result(GenericError)).await);

        assert_eq!(rx.try_recv().unwrap().status.status_type, GenericError);
        let err = errors_rx.try_recv().unwrap();
        assert!(matches!(err, MonitorError::StoreWrite { target_id: 1, .. }), "{}", err);
    }

    #[tokio::test]
    async fn dropped_updates_receiver_does_not_stop_processing() {
        let (mut detector, rx) =
            detector(Box::new(MemoryStore::new()), Duration::from_secs(60), true);
        drop(rx);

        assert!(detector.process(result(UP)).await);
        assert!(!detector.process(result(UP)).await);
    }
}
