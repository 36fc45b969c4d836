//! Naming-authority client.
//!
//! Stateless: every call fetches the manager's current channel, issues one
//! RPC and folds whatever happened (no channel, transport failure, service
//! rejection) into an [`OperationResult`].  Nothing here retries; retries
//! belong to the protocols that know which calls are safe to repeat.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tonic::Status;
use tracing::{debug, warn};

use super::manager::ChannelManager;
use super::proto::{
    AddBucketEntryRequest, BucketEntryStatus, DeleteBucketEntryRequest, UpdateBucketEntryRequest,
};
use super::result::OperationResult;
use crate::metrics::{UBNS_RPC_DURATION_SECONDS, UBNS_RPC_TOTAL};

/// The naming RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamingRpc {
    Add,
    Delete,
    Update,
}

impl NamingRpc {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamingRpc::Add => "AddBucketEntry",
            NamingRpc::Delete => "DeleteBucketEntry",
            NamingRpc::Update => "UpdateBucketEntry",
        }
    }
}

impl fmt::Display for NamingRpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct NamingServiceClient {
    channels: Arc<ChannelManager>,
}

impl NamingServiceClient {
    pub fn new(channels: Arc<ChannelManager>) -> Self {
        Self { channels }
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// Time until the current channel will try the wire again, if it is
    /// backing off after a connection failure.
    pub fn backoff_remaining(&self) -> Option<Duration> {
        self.channels.get_channel()?.backoff_remaining()
    }

    /// Reserve `bucket` for `owner` on `cluster_id`.
    pub async fn add_entry(&self, bucket: &str, cluster_id: &str, owner: &str) -> OperationResult {
        let Some(channel) = self.channels.get_channel() else {
            return no_channel(NamingRpc::Add, bucket);
        };
        let request = AddBucketEntryRequest {
            bucket: bucket.to_string(),
            cluster_id: cluster_id.to_string(),
            owner: owner.to_string(),
        };
        let started = Instant::now();
        let outcome = channel.add_bucket_entry(request).await.map(|_| ());
        finish(NamingRpc::Add, bucket, started, outcome)
    }

    /// Release `bucket`, which must be held by `cluster_id`.
    pub async fn delete_entry(&self, bucket: &str, cluster_id: &str) -> OperationResult {
        let Some(channel) = self.channels.get_channel() else {
            return no_channel(NamingRpc::Delete, bucket);
        };
        let request = DeleteBucketEntryRequest {
            bucket: bucket.to_string(),
            cluster_id: cluster_id.to_string(),
        };
        let started = Instant::now();
        let outcome = channel.delete_bucket_entry(request).await.map(|_| ());
        finish(NamingRpc::Delete, bucket, started, outcome)
    }

    /// Move `bucket` to `status`.  Which transitions are legal is up to
    /// the authority; any rejection comes back as a service error.
    pub async fn update_entry(
        &self,
        bucket: &str,
        cluster_id: &str,
        status: BucketEntryStatus,
    ) -> OperationResult {
        let Some(channel) = self.channels.get_channel() else {
            return no_channel(NamingRpc::Update, bucket);
        };
        let request = UpdateBucketEntryRequest {
            bucket: bucket.to_string(),
            cluster_id: cluster_id.to_string(),
            status: status as i32,
        };
        let started = Instant::now();
        let outcome = channel.update_bucket_entry(request).await.map(|_| ());
        finish(NamingRpc::Update, bucket, started, outcome)
    }
}

fn no_channel(rpc: NamingRpc, bucket: &str) -> OperationResult {
    warn!("{} for bucket '{}' skipped: no naming channel configured", rpc, bucket);
    counter!(UBNS_RPC_TOTAL, "rpc" => rpc.as_str(), "outcome" => "no_channel").increment(1);
    OperationResult::transport_error("naming authority channel is not configured")
}

fn finish(
    rpc: NamingRpc,
    bucket: &str,
    started: Instant,
    outcome: Result<(), Status>,
) -> OperationResult {
    histogram!(UBNS_RPC_DURATION_SECONDS, "rpc" => rpc.as_str())
        .record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(()) => {
            debug!("{} for bucket '{}' succeeded", rpc, bucket);
            counter!(UBNS_RPC_TOTAL, "rpc" => rpc.as_str(), "outcome" => "ok").increment(1);
            OperationResult::success()
        }
        Err(status) => {
            let result = OperationResult::from_status(&status);
            let outcome = if result.is_transport_error() {
                "transport_error"
            } else {
                "service_error"
            };
            warn!("{} for bucket '{}' failed: {}", rpc, bucket, result);
            counter!(UBNS_RPC_TOTAL, "rpc" => rpc.as_str(), "outcome" => outcome).increment(1);
            result
        }
    }
}
