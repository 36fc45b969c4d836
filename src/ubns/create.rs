//! Bucket creation protocol.
//!
//! ```text
//! INIT ─▶ CREATE_START ─▶ CREATE_RPC_SUCCEEDED ─▶ UPDATE_START ─▶ UPDATE_RPC_SUCCEEDED ─▶ COMPLETE
//!               │                 │      ▲              │
//!               ▼                 │      └──────── UPDATE_RPC_FAILED
//!       CREATE_RPC_FAILED         ▼                     │
//!                        ROLLBACK_CREATE_START ◀────────┘
//!                           │              │
//!                           ▼              ▼
//!       ROLLBACK_CREATE_SUCCEEDED   ROLLBACK_CREATE_FAILED
//! ```
//!
//! The name is reserved by `AddBucketEntry` before the gateway creates the
//! bucket, then confirmed with `UpdateBucketEntry(CREATED)`.  A protocol
//! dropped in `CREATE_RPC_SUCCEEDED` releases the reservation.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::client::NamingServiceClient;
use super::guard::{report_rollback, RollbackGuard};
use super::proto::BucketEntryStatus;
use super::result::OperationResult;
use super::{ProtocolOutcome, RequestContext};

const PROTOCOL: &str = "create";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateState {
    Init,
    CreateStart,
    CreateRpcSucceeded,
    CreateRpcFailed,
    UpdateStart,
    UpdateRpcSucceeded,
    UpdateRpcFailed,
    RollbackCreateStart,
    RollbackCreateSucceeded,
    RollbackCreateFailed,
    Complete,
}

impl CreateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreateState::Init => "INIT",
            CreateState::CreateStart => "CREATE_START",
            CreateState::CreateRpcSucceeded => "CREATE_RPC_SUCCEEDED",
            CreateState::CreateRpcFailed => "CREATE_RPC_FAILED",
            CreateState::UpdateStart => "UPDATE_START",
            CreateState::UpdateRpcSucceeded => "UPDATE_RPC_SUCCEEDED",
            CreateState::UpdateRpcFailed => "UPDATE_RPC_FAILED",
            CreateState::RollbackCreateStart => "ROLLBACK_CREATE_START",
            CreateState::RollbackCreateSucceeded => "ROLLBACK_CREATE_SUCCEEDED",
            CreateState::RollbackCreateFailed => "ROLLBACK_CREATE_FAILED",
            CreateState::Complete => "COMPLETE",
        }
    }

    /// States a caller may pass to [`CreateProtocol::set_state`].
    pub fn is_requestable(&self) -> bool {
        matches!(
            self,
            CreateState::CreateStart
                | CreateState::UpdateStart
                | CreateState::RollbackCreateStart
                | CreateState::Complete
        )
    }

    /// States from which no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CreateState::CreateRpcFailed
                | CreateState::RollbackCreateSucceeded
                | CreateState::RollbackCreateFailed
                | CreateState::Complete
        )
    }
}

impl fmt::Display for CreateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bucket creation's conversation with the naming authority.
///
/// Transitions are strictly sequential (`&mut self`); each RPC-bearing
/// transition returns only once its RPC has completed.
pub struct CreateProtocol {
    ctx: RequestContext,
    client: Arc<NamingServiceClient>,
    bucket: String,
    cluster_id: String,
    owner: String,
    state: CreateState,
    saved_result: Option<OperationResult>,
    rollback: Option<RollbackGuard>,
}

impl CreateProtocol {
    pub fn new(
        ctx: RequestContext,
        client: Arc<NamingServiceClient>,
        bucket: &str,
        cluster_id: &str,
        owner: &str,
    ) -> Self {
        Self {
            ctx,
            client,
            bucket: bucket.to_string(),
            cluster_id: cluster_id.to_string(),
            owner: owner.to_string(),
            state: CreateState::Init,
            saved_result: None,
            rollback: None,
        }
    }

    pub fn state(&self) -> CreateState {
        self.state
    }

    /// The most recent failed RPC, if any.
    pub fn saved_result(&self) -> Option<&OperationResult> {
        self.saved_result.as_ref()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Drive the protocol towards `target`.
    ///
    /// Returns `true` when `target` (or, for an RPC step, its success
    /// state) was reached.  A step whose RPC fails moves to the matching
    /// failure state and returns `false`; a step not allowed from the
    /// current state returns `false` and changes nothing.
    ///
    /// # Panics
    ///
    /// If `target` is not requestable (see [`CreateState::is_requestable`]);
    /// those states are only ever entered by the protocol itself.
    pub async fn set_state(&mut self, target: CreateState) -> bool {
        match target {
            CreateState::CreateStart => self.reserve().await,
            CreateState::UpdateStart => self.confirm().await,
            CreateState::RollbackCreateStart => self.roll_back().await,
            CreateState::Complete => self.complete(),
            internal => panic!(
                "bucket '{}': {} cannot be requested on the create protocol (current state {})",
                self.bucket, internal, self.state
            ),
        }
    }

    /// Run any pending rollback inline and report where the protocol ended.
    pub async fn finish(mut self) -> ProtocolOutcome<CreateState> {
        if self.state == CreateState::CreateRpcSucceeded {
            self.roll_back().await;
        }
        ProtocolOutcome {
            state: self.state,
            saved_result: self.saved_result.take(),
        }
    }

    async fn reserve(&mut self) -> bool {
        if self.state != CreateState::Init {
            return self.reject(CreateState::CreateStart);
        }
        self.enter(CreateState::CreateStart);

        let result = self
            .client
            .add_entry(&self.bucket, &self.cluster_id, &self.owner)
            .await;
        if result.is_ok() {
            self.enter(CreateState::CreateRpcSucceeded);
            self.arm_rollback();
            true
        } else {
            self.fail(CreateState::CreateRpcFailed, result)
        }
    }

    async fn confirm(&mut self) -> bool {
        if !matches!(
            self.state,
            CreateState::CreateRpcSucceeded | CreateState::UpdateRpcFailed
        ) {
            return self.reject(CreateState::UpdateStart);
        }
        self.disarm_rollback();
        self.enter(CreateState::UpdateStart);

        let result = self
            .client
            .update_entry(&self.bucket, &self.cluster_id, BucketEntryStatus::Created)
            .await;
        if result.is_ok() {
            self.enter(CreateState::UpdateRpcSucceeded);
            true
        } else {
            self.fail(CreateState::UpdateRpcFailed, result)
        }
    }

    async fn roll_back(&mut self) -> bool {
        if !matches!(
            self.state,
            CreateState::CreateRpcSucceeded | CreateState::UpdateRpcFailed
        ) {
            return self.reject(CreateState::RollbackCreateStart);
        }
        self.disarm_rollback();
        self.enter(CreateState::RollbackCreateStart);

        let result = self.client.delete_entry(&self.bucket, &self.cluster_id).await;
        report_rollback(PROTOCOL, &self.bucket, &self.ctx.request_id, &result);
        if result.is_ok() {
            self.enter(CreateState::RollbackCreateSucceeded);
            true
        } else {
            self.fail(CreateState::RollbackCreateFailed, result)
        }
    }

    fn complete(&mut self) -> bool {
        if self.state != CreateState::UpdateRpcSucceeded {
            return self.reject(CreateState::Complete);
        }
        self.enter(CreateState::Complete);
        true
    }

    fn arm_rollback(&mut self) {
        let client = Arc::clone(&self.client);
        let bucket = self.bucket.clone();
        let cluster_id = self.cluster_id.clone();
        self.rollback = Some(RollbackGuard::arm(
            PROTOCOL,
            &self.bucket,
            &self.ctx.request_id,
            move || Box::pin(async move { client.delete_entry(&bucket, &cluster_id).await }),
        ));
    }

    fn disarm_rollback(&mut self) {
        if let Some(guard) = self.rollback.take() {
            guard.disarm();
        }
    }

    fn enter(&mut self, next: CreateState) {
        debug!(
            request_id = %self.ctx.request_id,
            owner = %self.owner,
            "create protocol for bucket '{}': {} -> {}",
            self.bucket, self.state, next
        );
        self.state = next;
    }

    fn fail(&mut self, next: CreateState, result: OperationResult) -> bool {
        self.enter(next);
        self.saved_result = Some(result);
        false
    }

    fn reject(&self, target: CreateState) -> bool {
        warn!(
            request_id = %self.ctx.request_id,
            owner = %self.owner,
            "create protocol for bucket '{}': {} not allowed from {}",
            self.bucket, target, self.state
        );
        false
    }
}

impl fmt::Debug for CreateProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateProtocol")
            .field("request_id", &self.ctx.request_id)
            .field("bucket", &self.bucket)
            .field("cluster_id", &self.cluster_id)
            .field("owner", &self.owner)
            .field("state", &self.state)
            .field("saved_result", &self.saved_result)
            .finish()
    }
}
