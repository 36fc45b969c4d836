//! Scoped compensating action.
//!
//! A protocol arms a [`RollbackGuard`] when it enters a state whose durable
//! effect must be undone if the owning request goes away, and disarms it
//! as soon as it leaves that state.  Dropping an armed guard (early return,
//! `?`, panic unwinding, a cancelled future) spawns the compensating RPC on
//! the current tokio runtime.

use std::future::Future;
use std::pin::Pin;

use metrics::counter;
use tracing::{error, info};

use super::result::OperationResult;
use crate::metrics::UBNS_ROLLBACKS_TOTAL;

/// Boxed compensating RPC.
pub type Compensation = Pin<Box<dyn Future<Output = OperationResult> + Send + 'static>>;

type CompensationFn = Box<dyn FnOnce() -> Compensation + Send + 'static>;

pub struct RollbackGuard {
    protocol: &'static str,
    bucket: String,
    request_id: String,
    action: Option<CompensationFn>,
}

impl RollbackGuard {
    pub fn arm<F>(protocol: &'static str, bucket: &str, request_id: &str, action: F) -> Self
    where
        F: FnOnce() -> Compensation + Send + 'static,
    {
        Self {
            protocol,
            bucket: bucket.to_string(),
            request_id: request_id.to_string(),
            action: Some(Box::new(action)),
        }
    }

    /// Cancel the compensation.
    pub fn disarm(mut self) {
        self.action = None;
    }

    pub fn is_armed(&self) -> bool {
        self.action.is_some()
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        let Some(action) = self.action.take() else {
            return;
        };

        let protocol = self.protocol;
        let bucket = std::mem::take(&mut self.bucket);
        let request_id = std::mem::take(&mut self.request_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                info!(
                    request_id = %request_id,
                    "{} protocol for bucket '{}' abandoned mid-flight, rolling back",
                    protocol, bucket
                );
                let compensation = action();
                handle.spawn(async move {
                    let result = compensation.await;
                    report_rollback(protocol, &bucket, &request_id, &result);
                });
            }
            Err(_) => {
                let result = OperationResult::failure(
                    tonic::Code::Aborted as i32,
                    "no async runtime available to run the compensating RPC",
                );
                report_rollback(protocol, &bucket, &request_id, &result);
            }
        }
    }
}

/// Log and count the outcome of a compensating RPC.
pub fn report_rollback(protocol: &'static str, bucket: &str, request_id: &str, result: &OperationResult) {
    if result.is_ok() {
        info!(request_id = %request_id, "{} rollback for bucket '{}' succeeded", protocol, bucket);
        counter!(UBNS_ROLLBACKS_TOTAL, "protocol" => protocol, "outcome" => "ok").increment(1);
    } else {
        error!(
            request_id = %request_id,
            "{} rollback for bucket '{}' FAILED, naming entry needs repair: {}",
            protocol, bucket, result
        );
        counter!(UBNS_ROLLBACKS_TOTAL, "protocol" => protocol, "outcome" => "error").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_guard(runs: &Arc<AtomicUsize>) -> RollbackGuard {
        let runs = Arc::clone(runs);
        RollbackGuard::arm("create", "foo", "REQ", move || {
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                OperationResult::success()
            })
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_drop_runs_compensation() {
        let runs = Arc::new(AtomicUsize::new(0));
        let guard = counting_guard(&runs);
        assert!(guard.is_armed());
        drop(guard);
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disarm_cancels_compensation() {
        let runs = Arc::new(AtomicUsize::new(0));
        counting_guard(&runs).disarm();
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_early_return_runs_compensation() {
        let runs = Arc::new(AtomicUsize::new(0));

        fn risky(runs: &Arc<AtomicUsize>, fail: bool) -> Result<(), &'static str> {
            let guard = counting_guard(runs);
            if fail {
                return Err("physical create failed");
            }
            guard.disarm();
            Ok(())
        }

        assert!(risky(&runs, false).is_ok());
        assert!(risky(&runs, true).is_err());
        tokio::time::sleep(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_outside_runtime_does_not_panic() {
        let runs = Arc::new(AtomicUsize::new(0));
        drop(counting_guard(&runs));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
