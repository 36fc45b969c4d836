//! Bucket create/delete flows coordinated with the naming authority.
//!
//! The gateway's CreateBucket and DeleteBucket handlers call into these
//! with the physical step (metadata row, storage directory, ...) as a
//! closure.  The naming step wraps it:
//!
//! - create: reserve the name, run the physical create, then confirm the
//!   reservation, or release it if the physical create failed.
//! - delete: mark the name deleting, run the physical delete, then
//!   release the name, or restore it if the physical delete failed.
//!
//! If the returned future is dropped while the physical step runs, the
//! protocol's rollback guard undoes the naming step in the background.
//! Confirm and release retries are spaced by the channel's reconnect
//! schedule, so a retry is not swallowed by an open backoff window.

use std::future::Future;

use backon::{BackoffBuilder, ExponentialBackoff};
use tracing::{debug, error, warn};

use crate::errors::GatewayError;
use crate::ubns::channel::reconnect_schedule;
use crate::ubns::{
    ConnectionArgs, CreateProtocol, CreateState, DeleteProtocol, DeleteState, OperationResult,
    RequestContext,
};
use crate::UbnsState;

// -- Bucket name validation ---------------------------------------------------

/// Validate that a bucket name conforms to S3 naming rules.
///
/// Rules:
/// - 3-63 characters long
/// - Only lowercase letters, numbers, hyphens, and periods
/// - Must begin and end with a letter or number
/// - Cannot be formatted as an IP address (e.g., 192.168.5.4)
/// - Must not start with `xn--` or end with `-s3alias` or `--ol-s3`
pub fn validate_bucket_name(name: &str) -> Result<(), GatewayError> {
    let invalid = || {
        Err(GatewayError::InvalidBucketName {
            name: name.to_string(),
        })
    };

    if !(3..=63).contains(&name.len()) {
        return invalid();
    }

    // Must only contain lowercase letters, digits, hyphens, periods.
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '.')
    {
        return invalid();
    }

    // Must begin and end with a letter or digit.
    let alnum = |ch: char| ch.is_ascii_lowercase() || ch.is_ascii_digit();
    if !name.starts_with(alnum) || !name.ends_with(alnum) {
        return invalid();
    }

    if looks_like_ip(name) {
        return invalid();
    }

    if name.starts_with("xn--") || name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return invalid();
    }

    Ok(())
}

/// Check whether a string looks like an IPv4 address (e.g., "192.168.5.4").
fn looks_like_ip(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| p.parse::<u8>().is_ok())
}

// -- Flows --------------------------------------------------------------------

/// Create `bucket` for `owner`, running `create_physical` between the
/// reservation and its confirmation.
///
/// With UBNS disabled only the name check and the physical step run.
/// When confirmation keeps failing after the physical create succeeded the
/// reservation is left in place (the bucket exists locally) and the last
/// naming failure is returned.
pub async fn create_bucket<F, Fut, T>(
    state: &UbnsState,
    ctx: RequestContext,
    bucket: &str,
    owner: &str,
    create_physical: F,
) -> Result<T, GatewayError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    validate_bucket_name(bucket)?;
    if !state.enabled() {
        return create_physical().await;
    }

    let mut protocol = CreateProtocol::new(
        ctx,
        state.client.clone(),
        bucket,
        &state.config.cluster_id,
        owner,
    );

    if !protocol.set_state(CreateState::CreateStart).await {
        return Err(naming_failure(bucket, protocol.saved_result()));
    }

    let value = match create_physical().await {
        Ok(value) => value,
        Err(e) => {
            debug!("physical create of '{}' failed, releasing reservation: {}", bucket, e);
            if !protocol.set_state(CreateState::RollbackCreateStart).await {
                error!(
                    "reservation for '{}' could not be released after failed create",
                    bucket
                );
            }
            return Err(e);
        }
    };

    let mut pause = RetryPause::new(state);
    let mut confirmed = false;
    for attempt in 1..=state.config.max_confirm_attempts {
        if attempt > 1 {
            pause.wait(bucket).await;
        }
        if protocol.set_state(CreateState::UpdateStart).await {
            confirmed = true;
            break;
        }
        debug!("confirm of '{}' failed (attempt {})", bucket, attempt);
    }
    if !confirmed {
        warn!(
            "bucket '{}' created but its reservation could not be confirmed",
            bucket
        );
        return Err(naming_failure(bucket, protocol.saved_result()));
    }

    protocol.set_state(CreateState::Complete).await;
    Ok(value)
}

/// Delete `bucket`, running `delete_physical` while its name is marked
/// deleting.
///
/// When the release keeps failing after the physical delete succeeded the
/// entry stays `DELETING`, which keeps the name blocked until an operator
/// or a later delete releases it.
pub async fn delete_bucket<F, Fut, T>(
    state: &UbnsState,
    ctx: RequestContext,
    bucket: &str,
    owner: &str,
    delete_physical: F,
) -> Result<T, GatewayError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    if !state.enabled() {
        return delete_physical().await;
    }

    let mut protocol = DeleteProtocol::new(
        ctx,
        state.client.clone(),
        bucket,
        &state.config.cluster_id,
        owner,
    );

    if !protocol.set_state(DeleteState::UpdateStart).await {
        return Err(naming_failure(bucket, protocol.saved_result()));
    }

    let value = match delete_physical().await {
        Ok(value) => value,
        Err(e) => {
            debug!("physical delete of '{}' failed, restoring entry: {}", bucket, e);
            if !protocol.set_state(DeleteState::RollbackUpdateStart).await {
                error!(
                    "naming entry for '{}' left DELETING after failed delete",
                    bucket
                );
            }
            return Err(e);
        }
    };

    let mut pause = RetryPause::new(state);
    let mut released = false;
    for attempt in 1..=state.config.max_confirm_attempts {
        if attempt > 1 {
            pause.wait(bucket).await;
        }
        if protocol.set_state(DeleteState::DeleteStart).await {
            released = true;
            break;
        }
        debug!("release of '{}' failed (attempt {})", bucket, attempt);
    }
    if !released {
        warn!("bucket '{}' deleted but its name could not be released", bucket);
        return Err(naming_failure(bucket, protocol.saved_result()));
    }

    protocol.set_state(DeleteState::Complete).await;
    Ok(value)
}

/// Spacing between confirm/release attempts.
struct RetryPause<'a> {
    state: &'a UbnsState,
    args: ConnectionArgs,
    delays: ExponentialBackoff,
}

impl<'a> RetryPause<'a> {
    fn new(state: &'a UbnsState) -> Self {
        let args = state
            .channels
            .args()
            .unwrap_or_else(|| state.channels.get_default_args(&state.config));
        Self {
            state,
            args,
            delays: reconnect_schedule(&args).build(),
        }
    }

    /// Sleep for the next step of the schedule, or until the channel's
    /// backoff window closes if that is later.
    async fn wait(&mut self, bucket: &str) {
        let step = self
            .delays
            .next()
            .unwrap_or(self.args.max_reconnect_backoff)
            .min(self.args.max_reconnect_backoff);
        let wait = self
            .state
            .client
            .backoff_remaining()
            .map_or(step, |remaining| remaining.max(step));
        debug!("retrying naming step for '{}' in {}ms", bucket, wait.as_millis());
        tokio::time::sleep(wait).await;
    }
}

fn naming_failure(bucket: &str, saved: Option<&OperationResult>) -> GatewayError {
    GatewayError::from_result(bucket, &saved.cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UbnsConfig;
    use crate::ubns::{
        BucketEntryStatus, MemoryChannelFactory, MemoryNamingAuthority, NamingRpc,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tonic::Code;

    fn test_config() -> UbnsConfig {
        UbnsConfig {
            enabled: true,
            uri: "mem://authority".to_string(),
            cluster_id: "cluster1".to_string(),
            initial_reconnect_backoff_ms: 10,
            min_reconnect_backoff_ms: 10,
            max_reconnect_backoff_ms: 50,
            ..UbnsConfig::default()
        }
    }

    fn enabled_state() -> (Arc<MemoryNamingAuthority>, UbnsState) {
        let authority = Arc::new(MemoryNamingAuthority::new());
        let state = UbnsState::init(
            test_config(),
            Arc::new(MemoryChannelFactory::new(Arc::clone(&authority))),
        )
        .unwrap();
        (authority, state)
    }

    /// Like [`enabled_state`], but the channel fails fast while backing off.
    fn gated_state() -> (Arc<MemoryNamingAuthority>, UbnsState) {
        let authority = Arc::new(MemoryNamingAuthority::new());
        let state = UbnsState::init(
            test_config(),
            Arc::new(MemoryChannelFactory::with_reconnect_backoff(Arc::clone(
                &authority,
            ))),
        )
        .unwrap();
        (authority, state)
    }

    async fn ok_step(runs: &AtomicUsize) -> Result<&'static str, GatewayError> {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok("done")
    }

    #[test]
    fn test_validate_bucket_name_valid() {
        assert!(validate_bucket_name("valid-bucket").is_ok());
        assert!(validate_bucket_name("my.bucket.name").is_ok());
        assert!(validate_bucket_name("abc").is_ok());
        assert!(validate_bucket_name("a-b-c").is_ok());
        assert!(validate_bucket_name("123").is_ok());
    }

    #[test]
    fn test_validate_bucket_name_length() {
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("").is_err());
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_bucket_name_bad_chars() {
        assert!(validate_bucket_name("InvalidBucket").is_err());
        assert!(validate_bucket_name("bucket_name").is_err());
        assert!(validate_bucket_name("bucket name").is_err());
        assert!(validate_bucket_name("-bucket").is_err());
        assert!(validate_bucket_name("bucket.").is_err());
    }

    #[test]
    fn test_validate_bucket_name_reserved_forms() {
        assert!(validate_bucket_name("192.168.1.1").is_err());
        assert!(validate_bucket_name("xn--example").is_err());
        assert!(validate_bucket_name("example-s3alias").is_err());
        assert!(validate_bucket_name("example--ol-s3").is_err());
    }

    #[test]
    fn test_looks_like_ip() {
        assert!(looks_like_ip("10.0.0.1"));
        assert!(!looks_like_ip("192.168.1"));
        assert!(!looks_like_ip("not.an.ip.address"));
        assert!(!looks_like_ip("999.999.999.999"));
    }

    #[tokio::test]
    async fn test_disabled_runs_physical_step_only() {
        let authority = Arc::new(MemoryNamingAuthority::new());
        let state = UbnsState::init(
            UbnsConfig::default(),
            Arc::new(MemoryChannelFactory::new(Arc::clone(&authority))),
        )
        .unwrap();
        let runs = AtomicUsize::new(0);

        let created = create_bucket(&state, RequestContext::new(), "foo", "alice", || {
            ok_step(&runs)
        })
        .await;
        assert_eq!(created.unwrap(), "done");
        let deleted = delete_bucket(&state, RequestContext::new(), "foo", "alice", || {
            ok_step(&runs)
        })
        .await;
        assert!(deleted.is_ok());

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(authority.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_name_skips_everything() {
        let (authority, state) = enabled_state();
        let runs = AtomicUsize::new(0);

        let err = create_bucket(&state, RequestContext::new(), "Bad_Name", "alice", || {
            ok_step(&runs)
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "InvalidBucketName");
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(authority.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_delete() {
        let (authority, state) = enabled_state();
        let runs = AtomicUsize::new(0);

        create_bucket(&state, RequestContext::new(), "foo", "alice", || ok_step(&runs))
            .await
            .unwrap();
        let entry = authority.entry("foo").unwrap();
        assert_eq!(entry.status, BucketEntryStatus::Created);
        assert_eq!(entry.cluster_id, "cluster1");
        assert_eq!(entry.owner, "alice");

        delete_bucket(&state, RequestContext::new(), "foo", "alice", || ok_step(&runs))
            .await
            .unwrap();
        assert!(authority.entry("foo").is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_create_taken_name() {
        let (authority, state) = enabled_state();
        authority.seed_entry("foo", "cluster2", "bob", BucketEntryStatus::Created);
        let runs = AtomicUsize::new(0);

        let err = create_bucket(&state, RequestContext::new(), "foo", "alice", || {
            ok_step(&runs)
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "BucketAlreadyExists");
        assert_eq!(err.status_code(), http::StatusCode::CONFLICT);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(authority.entry("foo").unwrap().cluster_id, "cluster2");
    }

    #[tokio::test]
    async fn test_create_physical_failure_releases_name() {
        let (authority, state) = enabled_state();

        let err = create_bucket(&state, RequestContext::new(), "foo", "alice", || async {
            Err::<(), _>(GatewayError::InternalError(anyhow::anyhow!("disk full")))
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "InternalError");
        assert!(authority.entry("foo").is_none());
        assert_eq!(authority.call_count(NamingRpc::Delete), 1);
    }

    #[tokio::test]
    async fn test_create_confirm_retries() {
        let (authority, state) = enabled_state();
        authority.fail_next(NamingRpc::Update, 2, Code::Unavailable, "flaky");
        let runs = AtomicUsize::new(0);

        create_bucket(&state, RequestContext::new(), "foo", "alice", || ok_step(&runs))
            .await
            .unwrap();
        assert_eq!(authority.call_count(NamingRpc::Update), 3);
        assert_eq!(
            authority.entry("foo").unwrap().status,
            BucketEntryStatus::Created
        );
    }

    #[tokio::test]
    async fn test_create_confirm_exhausted_keeps_reservation() {
        let (authority, state) = enabled_state();
        authority.fail_next(NamingRpc::Update, 3, Code::Unavailable, "down");
        let runs = AtomicUsize::new(0);

        let err = create_bucket(&state, RequestContext::new(), "foo", "alice", || {
            ok_step(&runs)
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "ServiceUnavailable");

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            authority.entry("foo").unwrap().status,
            BucketEntryStatus::Unspecified
        );
        assert_eq!(authority.call_count(NamingRpc::Delete), 0);
    }

    #[tokio::test]
    async fn test_abandoned_create_releases_name() {
        let (authority, state) = enabled_state();

        let slow = create_bucket(&state, RequestContext::new(), "foo", "alice", || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), slow)
            .await
            .is_err());

        for _ in 0..200 {
            if authority.entry("foo").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(authority.entry("foo").is_none());
    }

    #[tokio::test]
    async fn test_delete_physical_failure_restores_entry() {
        let (authority, state) = enabled_state();
        authority.seed_entry("foo", "cluster1", "alice", BucketEntryStatus::Created);

        let err = delete_bucket(&state, RequestContext::new(), "foo", "alice", || async {
            Err::<(), _>(GatewayError::BucketNotEmpty {
                bucket: "foo".to_string(),
            })
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "BucketNotEmpty");
        assert_eq!(
            authority.entry("foo").unwrap().status,
            BucketEntryStatus::Created
        );
    }

    #[tokio::test]
    async fn test_delete_naming_rejections() {
        let (authority, state) = enabled_state();
        authority.seed_entry("theirs", "cluster2", "bob", BucketEntryStatus::Created);
        let runs = AtomicUsize::new(0);

        let missing = delete_bucket(&state, RequestContext::new(), "ghost", "alice", || {
            ok_step(&runs)
        })
        .await
        .unwrap_err();
        assert_eq!(missing.code(), "NoSuchBucket");

        let foreign = delete_bucket(&state, RequestContext::new(), "theirs", "alice", || {
            ok_step(&runs)
        })
        .await
        .unwrap_err();
        assert_eq!(foreign.code(), "AccessDenied");
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_release_retries() {
        let (authority, state) = enabled_state();
        authority.seed_entry("foo", "cluster1", "alice", BucketEntryStatus::Created);
        authority.fail_next(NamingRpc::Delete, 2, Code::DeadlineExceeded, "slow");
        let runs = AtomicUsize::new(0);

        delete_bucket(&state, RequestContext::new(), "foo", "alice", || ok_step(&runs))
            .await
            .unwrap();
        assert_eq!(authority.call_count(NamingRpc::Delete), 3);
        assert!(authority.entry("foo").is_none());
    }

    #[tokio::test]
    async fn test_confirm_retries_reach_authority_through_backoff() {
        let (authority, state) = gated_state();
        authority.fail_next(NamingRpc::Update, 2, Code::Unavailable, "restarting");
        let runs = AtomicUsize::new(0);

        create_bucket(&state, RequestContext::new(), "foo", "alice", || ok_step(&runs))
            .await
            .unwrap();

        // Every attempt got past the backoff window to the authority.
        assert_eq!(authority.call_count(NamingRpc::Update), 3);
        assert_eq!(
            authority.entry("foo").unwrap().status,
            BucketEntryStatus::Created
        );
        assert!(state.client.backoff_remaining().is_none());
    }

    #[tokio::test]
    async fn test_release_retries_reach_authority_through_backoff() {
        let (authority, state) = gated_state();
        authority.seed_entry("foo", "cluster1", "alice", BucketEntryStatus::Created);
        authority.fail_next(NamingRpc::Delete, 2, Code::Unavailable, "restarting");
        let runs = AtomicUsize::new(0);

        delete_bucket(&state, RequestContext::new(), "foo", "alice", || ok_step(&runs))
            .await
            .unwrap();

        assert_eq!(authority.call_count(NamingRpc::Delete), 3);
        assert!(authority.entry("foo").is_none());
    }

    #[tokio::test]
    async fn test_retry_pause_waits_out_backoff_window() {
        let (authority, state) = gated_state();
        authority.set_reachable(false);
        let down = state.client.add_entry("foo", "cluster1", "alice").await;
        assert!(down.is_err());
        assert!(state.client.backoff_remaining().is_some());

        let mut pause = RetryPause::new(&state);
        pause.wait("foo").await;
        assert!(state.client.backoff_remaining().is_none());

        authority.set_reachable(true);
        assert!(state.client.add_entry("foo", "cluster1", "alice").await.is_ok());
        assert_eq!(authority.call_count(NamingRpc::Add), 2);
    }
}
