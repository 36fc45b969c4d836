//! Bucket deletion protocol.
//!
//! ```text
//! INIT ─▶ UPDATE_START ─▶ UPDATE_RPC_SUCCEEDED ─▶ DELETE_START ─▶ DELETE_RPC_SUCCEEDED ─▶ COMPLETE
//!               │                 │      ▲              │
//!               ▼                 │      └──────── DELETE_RPC_FAILED
//!       UPDATE_RPC_FAILED         ▼                     │
//!                        ROLLBACK_UPDATE_START ◀────────┘
//!                           │              │
//!                           ▼              ▼
//!       ROLLBACK_UPDATE_SUCCEEDED   ROLLBACK_UPDATE_FAILED
//! ```
//!
//! The entry is marked `DELETING` before the gateway removes the bucket,
//! which blocks new claims on the name, and released afterwards.  A
//! protocol dropped in `UPDATE_RPC_SUCCEEDED` restores the entry to
//! `CREATED`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::client::NamingServiceClient;
use super::guard::{report_rollback, RollbackGuard};
use super::proto::BucketEntryStatus;
use super::result::OperationResult;
use super::{ProtocolOutcome, RequestContext};

const PROTOCOL: &str = "delete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeleteState {
    Init,
    UpdateStart,
    UpdateRpcSucceeded,
    UpdateRpcFailed,
    DeleteStart,
    DeleteRpcSucceeded,
    DeleteRpcFailed,
    RollbackUpdateStart,
    RollbackUpdateSucceeded,
    RollbackUpdateFailed,
    Complete,
}

impl DeleteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteState::Init => "INIT",
            DeleteState::UpdateStart => "UPDATE_START",
            DeleteState::UpdateRpcSucceeded => "UPDATE_RPC_SUCCEEDED",
            DeleteState::UpdateRpcFailed => "UPDATE_RPC_FAILED",
            DeleteState::DeleteStart => "DELETE_START",
            DeleteState::DeleteRpcSucceeded => "DELETE_RPC_SUCCEEDED",
            DeleteState::DeleteRpcFailed => "DELETE_RPC_FAILED",
            DeleteState::RollbackUpdateStart => "ROLLBACK_UPDATE_START",
            DeleteState::RollbackUpdateSucceeded => "ROLLBACK_UPDATE_SUCCEEDED",
            DeleteState::RollbackUpdateFailed => "ROLLBACK_UPDATE_FAILED",
            DeleteState::Complete => "COMPLETE",
        }
    }

    /// States a caller may pass to [`DeleteProtocol::set_state`].
    pub fn is_requestable(&self) -> bool {
        matches!(
            self,
            DeleteState::UpdateStart
                | DeleteState::DeleteStart
                | DeleteState::RollbackUpdateStart
                | DeleteState::Complete
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeleteState::UpdateRpcFailed
                | DeleteState::RollbackUpdateSucceeded
                | DeleteState::RollbackUpdateFailed
                | DeleteState::Complete
        )
    }
}

impl fmt::Display for DeleteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bucket deletion's conversation with the naming authority.
pub struct DeleteProtocol {
    ctx: RequestContext,
    client: Arc<NamingServiceClient>,
    bucket: String,
    cluster_id: String,
    owner: String,
    state: DeleteState,
    saved_result: Option<OperationResult>,
    rollback: Option<RollbackGuard>,
}

impl DeleteProtocol {
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
            state: DeleteState::Init,
            saved_result: None,
            rollback: None,
        }
    }

    pub fn state(&self) -> DeleteState {
        self.state
    }

    pub fn saved_result(&self) -> Option<&OperationResult> {
        self.saved_result.as_ref()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Drive the protocol towards `target`; same contract as
    /// [`CreateProtocol::set_state`](super::create::CreateProtocol::set_state).
    ///
    /// # Panics
    ///
    /// If `target` is not requestable (see [`DeleteState::is_requestable`]).
    pub async fn set_state(&mut self, target: DeleteState) -> bool {
        match target {
            DeleteState::UpdateStart => self.mark_deleting().await,
            DeleteState::DeleteStart => self.release().await,
            DeleteState::RollbackUpdateStart => self.roll_back().await,
            DeleteState::Complete => self.complete(),
            internal => panic!(
                "bucket '{}': {} cannot be requested on the delete protocol (current state {})",
                self.bucket, internal, self.state
            ),
        }
    }

    /// Run any pending rollback inline and report where the protocol ended.
    pub async fn finish(mut self) -> ProtocolOutcome<DeleteState> {
        if self.state == DeleteState::UpdateRpcSucceeded {
            self.roll_back().await;
        }
        ProtocolOutcome {
            state: self.state,
            saved_result: self.saved_result.take(),
        }
    }

    async fn mark_deleting(&mut self) -> bool {
        if self.state != DeleteState::Init {
            return self.reject(DeleteState::UpdateStart);
        }
        self.enter(DeleteState::UpdateStart);

        let result = self
            .client
            .update_entry(&self.bucket, &self.cluster_id, BucketEntryStatus::Deleting)
            .await;
        if result.is_ok() {
            self.enter(DeleteState::UpdateRpcSucceeded);
            self.arm_rollback();
            true
        } else {
            self.fail(DeleteState::UpdateRpcFailed, result)
        }
    }

    async fn release(&mut self) -> bool {
        if !matches!(
            self.state,
            DeleteState::UpdateRpcSucceeded | DeleteState::DeleteRpcFailed
        ) {
            return self.reject(DeleteState::DeleteStart);
        }
        self.disarm_rollback();
        self.enter(DeleteState::DeleteStart);

        let result = self.client.delete_entry(&self.bucket, &self.cluster_id).await;
        if result.is_ok() {
            self.enter(DeleteState::DeleteRpcSucceeded);
            true
        } else {
            self.fail(DeleteState::DeleteRpcFailed, result)
        }
    }

    async fn roll_back(&mut self) -> bool {
        if !matches!(
            self.state,
            DeleteState::UpdateRpcSucceeded | DeleteState::DeleteRpcFailed
        ) {
            return self.reject(DeleteState::RollbackUpdateStart);
        }
        self.disarm_rollback();
        self.enter(DeleteState::RollbackUpdateStart);

        let result = self
            .client
            .update_entry(&self.bucket, &self.cluster_id, BucketEntryStatus::Created)
            .await;
        report_rollback(PROTOCOL, &self.bucket, &self.ctx.request_id, &result);
        if result.is_ok() {
            self.enter(DeleteState::RollbackUpdateSucceeded);
            true
        } else {
            self.fail(DeleteState::RollbackUpdateFailed, result)
        }
    }

    fn complete(&mut self) -> bool {
        if self.state != DeleteState::DeleteRpcSucceeded {
            return self.reject(DeleteState::Complete);
        }
        self.enter(DeleteState::Complete);
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
            move || {
                Box::pin(async move {
                    client
                        .update_entry(&bucket, &cluster_id, BucketEntryStatus::Created)
                        .await
                })
            },
        ));
    }

    fn disarm_rollback(&mut self) {
        if let Some(guard) = self.rollback.take() {
            guard.disarm();
        }
    }

    fn enter(&mut self, next: DeleteState) {
        debug!(
            request_id = %self.ctx.request_id,
            owner = %self.owner,
            "delete protocol for bucket '{}': {} -> {}",
            self.bucket, self.state, next
        );
        self.state = next;
    }

    fn fail(&mut self, next: DeleteState, result: OperationResult) -> bool {
        self.enter(next);
        self.saved_result = Some(result);
        false
    }

    fn reject(&self, target: DeleteState) -> bool {
        warn!(
            request_id = %self.ctx.request_id,
            owner = %self.owner,
            "delete protocol for bucket '{}': {} not allowed from {}",
            self.bucket, target, self.state
        );
        false
    }
}

impl fmt::Debug for DeleteProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteProtocol")
            .field("request_id", &self.ctx.request_id)
            .field("bucket", &self.bucket)
            .field("cluster_id", &self.cluster_id)
            .field("owner", &self.owner)
            .field("state", &self.state)
            .field("saved_result", &self.saved_result)
            .finish()
    }
}
