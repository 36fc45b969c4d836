//! Universal Bucket Name Service client.
//!
//! Bucket names are global across every cluster that shares a naming
//! authority.  Before a gateway creates a bucket it reserves the name with
//! the authority, and before it deletes one it marks the name as going
//! away.  This module holds everything the gateway side of that exchange
//! needs:
//!
//! - [`ChannelManager`]: the process-wide, runtime-replaceable channel.
//! - [`NamingServiceClient`]: one method per naming RPC, folding every
//!   outcome into an [`OperationResult`].
//! - [`CreateProtocol`] / [`DeleteProtocol`]: per-request state machines
//!   with automatic compensation when a request is abandoned mid-flight.

pub mod channel;
pub mod client;
pub mod create;
pub mod delete;
pub mod guard;
pub mod manager;
pub mod memory;
pub mod proto;
pub mod result;

pub use channel::{ChannelFactory, ConnectionArgs, GrpcChannelFactory, NamingChannel};
pub use client::{NamingRpc, NamingServiceClient};
pub use create::{CreateProtocol, CreateState};
pub use delete::{DeleteProtocol, DeleteState};
pub use manager::{ChannelConfigObserver, ChannelConfigurable, ChannelManager};
pub use memory::{MemoryChannelFactory, MemoryNamingAuthority};
pub use proto::BucketEntryStatus;
pub use result::OperationResult;

use crate::errors::generate_request_id;

/// Identifies the gateway request that drives a protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    /// A context with a freshly generated request id.
    pub fn new() -> Self {
        Self {
            request_id: generate_request_id(),
        }
    }

    pub fn with_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a protocol ended up, returned by `finish`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolOutcome<S> {
    pub state: S,
    pub saved_result: Option<OperationResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_ids() {
        let a = RequestContext::new();
        let b = RequestContext::default();
        assert_eq!(a.request_id.len(), 16);
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(RequestContext::with_id("REQ1").request_id, "REQ1");
    }
}
