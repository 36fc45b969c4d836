//! In-memory naming authority.
//!
//! Applies the authority's rules (name uniqueness, cluster ownership,
//! status transitions) to a `HashMap` behind a `Mutex`.  Every call is
//! recorded, failures can be injected per RPC, and the whole authority can
//! be made unreachable.  Useful for tests and local development.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tonic::{Code, Status};

use super::channel::{
    normalize_uri, ChannelFactory, ConnectionArgs, NamingChannel, ReconnectBackoff, RpcFuture,
};
use super::client::NamingRpc;
use super::proto::{
    AddBucketEntryRequest, AddBucketEntryResponse, BucketEntryStatus, DeleteBucketEntryRequest,
    DeleteBucketEntryResponse, UpdateBucketEntryRequest, UpdateBucketEntryResponse,
};
use crate::errors::UbnsError;

/// A naming entry as the authority stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    pub cluster_id: String,
    pub owner: String,
    pub status: BucketEntryStatus,
}

/// One RPC as received by the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Add {
        bucket: String,
        cluster_id: String,
        owner: String,
    },
    Delete {
        bucket: String,
        cluster_id: String,
    },
    Update {
        bucket: String,
        cluster_id: String,
        status: BucketEntryStatus,
    },
}

impl RecordedCall {
    pub fn rpc(&self) -> NamingRpc {
        match self {
            RecordedCall::Add { .. } => NamingRpc::Add,
            RecordedCall::Delete { .. } => NamingRpc::Delete,
            RecordedCall::Update { .. } => NamingRpc::Update,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, BucketEntry>,
    calls: Vec<RecordedCall>,
    faults: HashMap<NamingRpc, VecDeque<(Code, String)>>,
    unreachable: bool,
}

impl Inner {
    /// Record `call` and return an injected or connectivity failure, if any.
    fn intercept(&mut self, call: RecordedCall) -> Option<Status> {
        let rpc = call.rpc();
        self.calls.push(call);
        if self.unreachable {
            return Some(Status::unavailable("connection refused"));
        }
        self.faults
            .get_mut(&rpc)
            .and_then(VecDeque::pop_front)
            .map(|(code, message)| Status::new(code, message))
    }
}

#[derive(Debug, Default)]
pub struct MemoryNamingAuthority {
    inner: Mutex<Inner>,
}

impl MemoryNamingAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry directly, bypassing the RPC rules.
    pub fn seed_entry(&self, bucket: &str, cluster_id: &str, owner: &str, status: BucketEntryStatus) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.entries.insert(
            bucket.to_string(),
            BucketEntry {
                cluster_id: cluster_id.to_string(),
                owner: owner.to_string(),
                status,
            },
        );
    }

    pub fn entry(&self, bucket: &str) -> Option<BucketEntry> {
        let inner = self.inner.lock().expect("mutex poisoned");
        inner.entries.get(bucket).cloned()
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        let inner = self.inner.lock().expect("mutex poisoned");
        inner.calls.clone()
    }

    pub fn call_count(&self, rpc: NamingRpc) -> usize {
        let inner = self.inner.lock().expect("mutex poisoned");
        inner.calls.iter().filter(|c| c.rpc() == rpc).count()
    }

    /// Fail the next `times` calls of `rpc` with `code`.
    pub fn fail_next(&self, rpc: NamingRpc, times: usize, code: Code, message: &str) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let queue = inner.faults.entry(rpc).or_default();
        for _ in 0..times {
            queue.push_back((code, message.to_string()));
        }
    }

    /// Simulate the authority going away (`false`) or coming back (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.unreachable = !reachable;
    }

    fn add(&self, request: AddBucketEntryRequest) -> Result<AddBucketEntryResponse, Status> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if let Some(status) = inner.intercept(RecordedCall::Add {
            bucket: request.bucket.clone(),
            cluster_id: request.cluster_id.clone(),
            owner: request.owner.clone(),
        }) {
            return Err(status);
        }

        if inner.entries.contains_key(&request.bucket) {
            return Err(Status::already_exists(format!(
                "bucket entry '{}' already exists",
                request.bucket
            )));
        }
        inner.entries.insert(
            request.bucket,
            BucketEntry {
                cluster_id: request.cluster_id,
                owner: request.owner,
                status: BucketEntryStatus::Unspecified,
            },
        );
        Ok(AddBucketEntryResponse {})
    }

    fn delete(&self, request: DeleteBucketEntryRequest) -> Result<DeleteBucketEntryResponse, Status> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if let Some(status) = inner.intercept(RecordedCall::Delete {
            bucket: request.bucket.clone(),
            cluster_id: request.cluster_id.clone(),
        }) {
            return Err(status);
        }

        owned_entry(&inner.entries, &request.bucket, &request.cluster_id)?;
        inner.entries.remove(&request.bucket);
        Ok(DeleteBucketEntryResponse {})
    }

    fn update(&self, request: UpdateBucketEntryRequest) -> Result<UpdateBucketEntryResponse, Status> {
        let target = request.status();
        let mut inner = self.inner.lock().expect("mutex poisoned");
        if let Some(status) = inner.intercept(RecordedCall::Update {
            bucket: request.bucket.clone(),
            cluster_id: request.cluster_id.clone(),
            status: target,
        }) {
            return Err(status);
        }

        if target == BucketEntryStatus::Unspecified {
            return Err(Status::invalid_argument("target status must be specified"));
        }
        let current = owned_entry(&inner.entries, &request.bucket, &request.cluster_id)?.status;
        let allowed = matches!(
            (current, target),
            (_, BucketEntryStatus::Created)
                | (BucketEntryStatus::Created, BucketEntryStatus::Deleting)
                | (BucketEntryStatus::Deleting, BucketEntryStatus::Deleting)
        );
        if !allowed {
            return Err(Status::failed_precondition(format!(
                "bucket entry '{}' cannot move from {} to {}",
                request.bucket,
                current.as_str_name(),
                target.as_str_name()
            )));
        }
        if let Some(entry) = inner.entries.get_mut(&request.bucket) {
            entry.status = target;
        }
        Ok(UpdateBucketEntryResponse {})
    }
}

fn owned_entry<'a>(
    entries: &'a HashMap<String, BucketEntry>,
    bucket: &str,
    cluster_id: &str,
) -> Result<&'a BucketEntry, Status> {
    let entry = entries
        .get(bucket)
        .ok_or_else(|| Status::not_found(format!("bucket entry '{bucket}' not found")))?;
    if entry.cluster_id != cluster_id {
        return Err(Status::permission_denied(format!(
            "bucket entry '{bucket}' belongs to cluster '{}'",
            entry.cluster_id
        )));
    }
    Ok(entry)
}

impl NamingChannel for MemoryNamingAuthority {
    fn target(&self) -> &str {
        "memory"
    }

    fn add_bucket_entry(&self, request: AddBucketEntryRequest) -> RpcFuture<'_, AddBucketEntryResponse> {
        let result = self.add(request);
        Box::pin(async move { result })
    }

    fn delete_bucket_entry(
        &self,
        request: DeleteBucketEntryRequest,
    ) -> RpcFuture<'_, DeleteBucketEntryResponse> {
        let result = self.delete(request);
        Box::pin(async move { result })
    }

    fn update_bucket_entry(
        &self,
        request: UpdateBucketEntryRequest,
    ) -> RpcFuture<'_, UpdateBucketEntryResponse> {
        let result = self.update(request);
        Box::pin(async move { result })
    }
}

/// A channel handle onto a shared [`MemoryNamingAuthority`], optionally
/// behind the same reconnect backoff gate the gRPC channel uses.
#[derive(Debug)]
pub struct MemoryChannel {
    target: String,
    authority: Arc<MemoryNamingAuthority>,
    backoff: Option<ReconnectBackoff>,
}

impl MemoryChannel {
    fn rpc<'a, T, Fut>(&'a self, call: Fut) -> RpcFuture<'a, T>
    where
        T: Send + 'a,
        Fut: Future<Output = Result<T, Status>> + Send + 'a,
    {
        match &self.backoff {
            Some(backoff) => Box::pin(backoff.gate(&self.target, call)),
            None => Box::pin(call),
        }
    }
}

impl NamingChannel for MemoryChannel {
    fn target(&self) -> &str {
        &self.target
    }

    fn backoff_remaining(&self) -> Option<Duration> {
        self.backoff
            .as_ref()
            .and_then(|backoff| backoff.check(Instant::now()).err())
    }

    fn add_bucket_entry(&self, request: AddBucketEntryRequest) -> RpcFuture<'_, AddBucketEntryResponse> {
        let authority = &self.authority;
        self.rpc(async move { authority.add(request) })
    }

    fn delete_bucket_entry(
        &self,
        request: DeleteBucketEntryRequest,
    ) -> RpcFuture<'_, DeleteBucketEntryResponse> {
        let authority = &self.authority;
        self.rpc(async move { authority.delete(request) })
    }

    fn update_bucket_entry(
        &self,
        request: UpdateBucketEntryRequest,
    ) -> RpcFuture<'_, UpdateBucketEntryResponse> {
        let authority = &self.authority;
        self.rpc(async move { authority.update(request) })
    }
}

/// Hands out [`MemoryChannel`]s, all backed by one authority.
#[derive(Debug)]
pub struct MemoryChannelFactory {
    authority: Arc<MemoryNamingAuthority>,
    reconnect_backoff: bool,
    built: AtomicUsize,
}

impl MemoryChannelFactory {
    pub fn new(authority: Arc<MemoryNamingAuthority>) -> Self {
        Self {
            authority,
            reconnect_backoff: false,
            built: AtomicUsize::new(0),
        }
    }

    /// Channels that fail fast after `UNAVAILABLE`, like the gRPC channel.
    pub fn with_reconnect_backoff(authority: Arc<MemoryNamingAuthority>) -> Self {
        Self {
            reconnect_backoff: true,
            ..Self::new(authority)
        }
    }

    /// Number of channels built so far.
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl ChannelFactory for MemoryChannelFactory {
    fn create_channel(
        &self,
        uri: &str,
        args: &ConnectionArgs,
    ) -> Result<Arc<dyn NamingChannel>, UbnsError> {
        let target = normalize_uri(uri)?;
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryChannel {
            target,
            authority: Arc::clone(&self.authority),
            backoff: self.reconnect_backoff.then(|| ReconnectBackoff::new(*args)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(bucket: &str, cluster_id: &str, owner: &str) -> AddBucketEntryRequest {
        AddBucketEntryRequest {
            bucket: bucket.to_string(),
            cluster_id: cluster_id.to_string(),
            owner: owner.to_string(),
        }
    }

    fn update(bucket: &str, cluster_id: &str, status: BucketEntryStatus) -> UpdateBucketEntryRequest {
        UpdateBucketEntryRequest {
            bucket: bucket.to_string(),
            cluster_id: cluster_id.to_string(),
            status: status as i32,
        }
    }

    #[tokio::test]
    async fn test_add_reserves_name() {
        let authority = MemoryNamingAuthority::new();
        authority.add_bucket_entry(add("foo", "c1", "alice")).await.unwrap();

        let entry = authority.entry("foo").unwrap();
        assert_eq!(entry.cluster_id, "c1");
        assert_eq!(entry.owner, "alice");
        assert_eq!(entry.status, BucketEntryStatus::Unspecified);

        let err = authority.add_bucket_entry(add("foo", "c2", "bob")).await.unwrap_err();
        assert_eq!(err.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn test_delete_checks_cluster() {
        let authority = MemoryNamingAuthority::new();
        authority.seed_entry("foo", "c1", "alice", BucketEntryStatus::Created);

        let wrong = DeleteBucketEntryRequest {
            bucket: "foo".to_string(),
            cluster_id: "c2".to_string(),
        };
        let err = authority.delete_bucket_entry(wrong).await.unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
        assert!(authority.entry("foo").is_some());

        let right = DeleteBucketEntryRequest {
            bucket: "foo".to_string(),
            cluster_id: "c1".to_string(),
        };
        authority.delete_bucket_entry(right.clone()).await.unwrap();
        assert!(authority.entry("foo").is_none());

        let err = authority.delete_bucket_entry(right).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_update_transitions() {
        let authority = MemoryNamingAuthority::new();
        authority.add_bucket_entry(add("foo", "c1", "alice")).await.unwrap();

        let err = authority
            .update_bucket_entry(update("foo", "c1", BucketEntryStatus::Deleting))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);

        authority
            .update_bucket_entry(update("foo", "c1", BucketEntryStatus::Created))
            .await
            .unwrap();
        authority
            .update_bucket_entry(update("foo", "c1", BucketEntryStatus::Deleting))
            .await
            .unwrap();
        assert_eq!(authority.entry("foo").unwrap().status, BucketEntryStatus::Deleting);

        authority
            .update_bucket_entry(update("foo", "c1", BucketEntryStatus::Created))
            .await
            .unwrap();
        assert_eq!(authority.entry("foo").unwrap().status, BucketEntryStatus::Created);

        let err = authority
            .update_bucket_entry(update("foo", "c1", BucketEntryStatus::Unspecified))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = authority
            .update_bucket_entry(update("bar", "c1", BucketEntryStatus::Created))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_fault_injection_and_reachability() {
        let authority = MemoryNamingAuthority::new();
        authority.fail_next(NamingRpc::Add, 2, Code::Internal, "boom");

        for _ in 0..2 {
            let err = authority.add_bucket_entry(add("foo", "c1", "alice")).await.unwrap_err();
            assert_eq!(err.code(), Code::Internal);
        }
        authority.add_bucket_entry(add("foo", "c1", "alice")).await.unwrap();
        assert_eq!(authority.call_count(NamingRpc::Add), 3);

        authority.set_reachable(false);
        let err = authority
            .update_bucket_entry(update("foo", "c1", BucketEntryStatus::Created))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(authority.entry("foo").unwrap().status, BucketEntryStatus::Unspecified);

        authority.set_reachable(true);
        authority
            .update_bucket_entry(update("foo", "c1", BucketEntryStatus::Created))
            .await
            .unwrap();
        assert_eq!(authority.calls().len(), 5);
    }

    #[test]
    fn test_factory_shares_one_authority() {
        let authority = Arc::new(MemoryNamingAuthority::new());
        let factory = MemoryChannelFactory::new(Arc::clone(&authority));
        let args = ConnectionArgs {
            initial_reconnect_backoff: std::time::Duration::from_millis(1),
            min_reconnect_backoff: std::time::Duration::from_millis(1),
            max_reconnect_backoff: std::time::Duration::from_millis(1),
            connect_timeout: std::time::Duration::from_millis(1),
            rpc_timeout: std::time::Duration::from_millis(1),
        };

        let one = factory.create_channel("mem://a", &args).unwrap();
        let two = factory.create_channel("b:1", &args).unwrap();
        assert_eq!(one.target(), "mem://a");
        assert_eq!(two.target(), "http://b:1");
        assert_eq!(factory.built(), 2);
        assert!(factory.create_channel("", &args).is_err());
        assert_eq!(factory.built(), 2);
    }

    #[tokio::test]
    async fn test_gated_channel_fails_fast_while_backing_off() {
        let authority = Arc::new(MemoryNamingAuthority::new());
        let factory = MemoryChannelFactory::with_reconnect_backoff(Arc::clone(&authority));
        let args = ConnectionArgs {
            initial_reconnect_backoff: Duration::from_millis(20),
            min_reconnect_backoff: Duration::from_millis(20),
            max_reconnect_backoff: Duration::from_millis(40),
            connect_timeout: Duration::from_millis(100),
            rpc_timeout: Duration::from_millis(100),
        };
        let channel = factory.create_channel("mem://gated", &args).unwrap();

        authority.set_reachable(false);
        let down = channel.add_bucket_entry(add("foo", "c1", "alice")).await.unwrap_err();
        assert_eq!(down.code(), Code::Unavailable);
        assert!(channel.backoff_remaining().is_some());

        authority.set_reachable(true);
        let fast = channel.add_bucket_entry(add("foo", "c1", "alice")).await.unwrap_err();
        assert!(fast.message().contains("reconnect backoff"));
        assert_eq!(authority.call_count(NamingRpc::Add), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        channel.add_bucket_entry(add("foo", "c1", "alice")).await.unwrap();
        assert_eq!(authority.call_count(NamingRpc::Add), 2);
        assert!(channel.backoff_remaining().is_none());
    }
}
