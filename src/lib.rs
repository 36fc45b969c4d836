//! BleepStore UBNS -- global bucket naming for S3 gateways.
//!
//! This crate lets a BleepStore gateway coordinate bucket creation and
//! deletion with a Unique Bucket Naming System authority, so that bucket
//! names stay unique across every cluster sharing that authority.  It
//! provides the naming channel and client, the create/delete protocols,
//! and the bucket handler flows that drive them.

use std::sync::Arc;

use tracing::info;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod ubns;

use crate::config::UbnsConfig;
use crate::errors::UbnsError;
use crate::ubns::{
    ChannelConfigObserver, ChannelFactory, ChannelManager, GrpcChannelFactory, NamingServiceClient,
};

/// Process-wide naming state shared by all request handlers.
#[derive(Debug)]
pub struct UbnsState {
    /// UBNS configuration the state was built from.
    pub config: UbnsConfig,
    /// The single naming channel, replaceable at runtime.
    pub channels: Arc<ChannelManager>,
    /// Stateless RPC wrapper over `channels`.
    pub client: Arc<NamingServiceClient>,
}

impl UbnsState {
    /// Validate `config` and, when UBNS is enabled, build the first
    /// channel through `factory`.
    pub fn init(config: UbnsConfig, factory: Arc<dyn ChannelFactory>) -> Result<Self, UbnsError> {
        config.validate()?;

        let channels = Arc::new(ChannelManager::new(factory));
        let client = Arc::new(NamingServiceClient::new(Arc::clone(&channels)));
        let state = Self {
            config,
            channels,
            client,
        };

        if state.config.enabled {
            if !state.observer().apply(&state.config) {
                return Err(UbnsError::ChannelBuild {
                    uri: state.config.uri.clone(),
                    reason: "initial naming channel could not be built".to_string(),
                });
            }
            info!(
                "UBNS enabled: cluster '{}' naming authority at {}",
                state.config.cluster_id,
                state.channels.uri()
            );
        } else {
            info!("UBNS disabled: bucket names are not coordinated globally");
        }
        Ok(state)
    }

    /// [`UbnsState::init`] with the gRPC channel factory.  Must run inside
    /// a tokio runtime.
    pub fn with_grpc(config: UbnsConfig) -> Result<Self, UbnsError> {
        Self::init(config, Arc::new(GrpcChannelFactory))
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// An observer that pushes later config changes into this state's channel.
    pub fn observer(&self) -> ChannelConfigObserver {
        ChannelConfigObserver::new(self.channels.clone())
    }

    /// Drop the naming channel.  In-flight RPCs keep their own handle.
    pub fn shutdown(&self) {
        self.channels.clear();
        info!("UBNS channel closed");
    }
}
