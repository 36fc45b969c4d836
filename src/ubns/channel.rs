//! Transport channels to the naming authority.
//!
//! [`NamingChannel`] is the seam between the naming client and the wire:
//! production code talks gRPC through [`GrpcNamingChannel`], tests plug in
//! the in-memory authority.  Channels are built by a [`ChannelFactory`] and
//! handed around as `Arc<dyn NamingChannel>`, so an RPC that already holds
//! a handle keeps using it even after the manager swaps in a new one.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, warn};

use super::proto::ubns_service_client::UbnsServiceClient;
use super::proto::{
    AddBucketEntryRequest, AddBucketEntryResponse, DeleteBucketEntryRequest,
    DeleteBucketEntryResponse, UpdateBucketEntryRequest, UpdateBucketEntryResponse,
};
use crate::errors::UbnsError;

/// Growth factor between consecutive reconnect backoffs.
const BACKOFF_MULTIPLIER: f32 = 1.6;

/// Boxed future returned by every [`NamingChannel`] RPC.
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Status>> + Send + 'a>>;

/// Connection arguments a channel is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionArgs {
    /// Backoff after the first connection failure.
    pub initial_reconnect_backoff: Duration,
    /// No backoff is shorter than this.
    pub min_reconnect_backoff: Duration,
    /// No backoff is longer than this.
    pub max_reconnect_backoff: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Deadline applied to every RPC.
    pub rpc_timeout: Duration,
}

/// The three naming RPCs over some transport.
pub trait NamingChannel: Send + Sync {
    /// Endpoint this channel was built for.
    fn target(&self) -> &str;

    /// Time left in the reconnect backoff window, if one is open.
    fn backoff_remaining(&self) -> Option<Duration> {
        None
    }

    fn add_bucket_entry(&self, request: AddBucketEntryRequest) -> RpcFuture<'_, AddBucketEntryResponse>;

    fn delete_bucket_entry(
        &self,
        request: DeleteBucketEntryRequest,
    ) -> RpcFuture<'_, DeleteBucketEntryResponse>;

    fn update_bucket_entry(
        &self,
        request: UpdateBucketEntryRequest,
    ) -> RpcFuture<'_, UpdateBucketEntryResponse>;
}

impl fmt::Debug for dyn NamingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingChannel")
            .field("target", &self.target())
            .finish()
    }
}

/// Builds channels for an endpoint.
pub trait ChannelFactory: Send + Sync {
    /// Build a channel bound to `uri`.  Must not block on connectivity.
    fn create_channel(
        &self,
        uri: &str,
        args: &ConnectionArgs,
    ) -> Result<Arc<dyn NamingChannel>, UbnsError>;
}

/// Prefix bare `host:port` endpoints with `http://`.
pub fn normalize_uri(uri: &str) -> Result<String, UbnsError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(UbnsError::InvalidUri {
            uri: uri.to_string(),
            reason: "empty".to_string(),
        });
    }
    let full = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let parsed: http::Uri = full.parse().map_err(|e: http::uri::InvalidUri| {
        UbnsError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        }
    })?;
    if parsed.authority().is_none() {
        return Err(UbnsError::InvalidUri {
            uri: uri.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(full)
}

// -- Reconnect backoff --------------------------------------------------------

/// Exponential schedule for `args`: starts at the initial backoff, grows
/// by [`BACKOFF_MULTIPLIER`] per step, capped at the max backoff, jittered.
pub fn reconnect_schedule(args: &ConnectionArgs) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(args.initial_reconnect_backoff)
        .with_max_delay(args.max_reconnect_backoff)
        .with_factor(BACKOFF_MULTIPLIER)
        .with_jitter()
        .with_max_times(usize::MAX)
}

struct BackoffState {
    delays: ExponentialBackoff,
    retry_at: Option<Instant>,
}

/// Fail-fast window after a connection failure.
///
/// After an `UNAVAILABLE` failure no RPC is sent until the window
/// elapses; each consecutive failure widens the window.
pub struct ReconnectBackoff {
    args: ConnectionArgs,
    state: Mutex<BackoffState>,
}

impl ReconnectBackoff {
    pub fn new(args: ConnectionArgs) -> Self {
        Self {
            args,
            state: Mutex::new(BackoffState {
                delays: reconnect_schedule(&args).build(),
                retry_at: None,
            }),
        }
    }

    /// `Err(remaining)` while inside a backoff window.
    pub fn check(&self, now: Instant) -> Result<(), Duration> {
        let state = self.state.lock().expect("mutex poisoned");
        match state.retry_at {
            Some(retry_at) if now < retry_at => Err(retry_at - now),
            _ => Ok(()),
        }
    }

    /// Open a new window starting at `now` and return its length.
    pub fn record_failure(&self, now: Instant) -> Duration {
        let mut state = self.state.lock().expect("mutex poisoned");
        let delay = state
            .delays
            .next()
            .unwrap_or(self.args.max_reconnect_backoff)
            .min(self.args.max_reconnect_backoff)
            .max(self.args.min_reconnect_backoff);
        state.retry_at = Some(now + delay);
        delay
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("mutex poisoned");
        state.retry_at = None;
        state.delays = reconnect_schedule(&self.args).build();
    }

    /// Run `call` unless a window is open.  `UNAVAILABLE` opens (or
    /// widens) the window; any success closes it.
    pub async fn gate<T, Fut>(&self, target: &str, call: Fut) -> Result<T, Status>
    where
        Fut: Future<Output = Result<T, Status>>,
    {
        if let Err(remaining) = self.check(Instant::now()) {
            return Err(Status::unavailable(format!(
                "channel to {} in reconnect backoff for another {}ms",
                target,
                remaining.as_millis()
            )));
        }

        match call.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(status) => {
                if status.code() == Code::Unavailable {
                    let delay = self.record_failure(Instant::now());
                    warn!(
                        "naming authority {} unavailable, backing off {}ms: {}",
                        target,
                        delay.as_millis(),
                        status.message()
                    );
                }
                Err(status)
            }
        }
    }
}

impl fmt::Debug for ReconnectBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry_at = self.state.lock().expect("mutex poisoned").retry_at;
        f.debug_struct("ReconnectBackoff")
            .field("args", &self.args)
            .field("retry_at", &retry_at)
            .finish()
    }
}

// -- gRPC ---------------------------------------------------------------------

/// Lazily-connected gRPC channel with reconnect backoff.
pub struct GrpcNamingChannel {
    target: String,
    channel: Channel,
    backoff: ReconnectBackoff,
}

impl GrpcNamingChannel {
    /// Build the endpoint without connecting; the first RPC dials.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect_lazy(uri: &str, args: &ConnectionArgs) -> Result<Self, UbnsError> {
        let target = normalize_uri(uri)?;
        let endpoint = Endpoint::from_shared(target.clone())
            .map_err(|e| UbnsError::ChannelBuild {
                uri: target.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(args.connect_timeout)
            .timeout(args.rpc_timeout);

        debug!("Creating lazy gRPC channel to: {}", target);
        Ok(Self {
            channel: endpoint.connect_lazy(),
            backoff: ReconnectBackoff::new(*args),
            target,
        })
    }

    async fn invoke<T, F, Fut>(&self, call: F) -> Result<T, Status>
    where
        F: FnOnce(UbnsServiceClient) -> Fut,
        Fut: Future<Output = Result<tonic::Response<T>, Status>>,
    {
        let client = UbnsServiceClient::new(self.channel.clone());
        self.backoff
            .gate(&self.target, async move { call(client).await.map(tonic::Response::into_inner) })
            .await
    }
}

impl NamingChannel for GrpcNamingChannel {
    fn target(&self) -> &str {
        &self.target
    }

    fn backoff_remaining(&self) -> Option<Duration> {
        self.backoff.check(Instant::now()).err()
    }

    fn add_bucket_entry(&self, request: AddBucketEntryRequest) -> RpcFuture<'_, AddBucketEntryResponse> {
        Box::pin(self.invoke(|mut client| async move { client.add_bucket_entry(request).await }))
    }

    fn delete_bucket_entry(
        &self,
        request: DeleteBucketEntryRequest,
    ) -> RpcFuture<'_, DeleteBucketEntryResponse> {
        Box::pin(self.invoke(|mut client| async move { client.delete_bucket_entry(request).await }))
    }

    fn update_bucket_entry(
        &self,
        request: UpdateBucketEntryRequest,
    ) -> RpcFuture<'_, UpdateBucketEntryResponse> {
        Box::pin(self.invoke(|mut client| async move { client.update_bucket_entry(request).await }))
    }
}

/// Production factory: lazy tonic channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrpcChannelFactory;

impl ChannelFactory for GrpcChannelFactory {
    fn create_channel(
        &self,
        uri: &str,
        args: &ConnectionArgs,
    ) -> Result<Arc<dyn NamingChannel>, UbnsError> {
        Ok(Arc::new(GrpcNamingChannel::connect_lazy(uri, args)?))
    }
}
