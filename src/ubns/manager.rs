//! Hot-swappable naming-authority channel.
//!
//! [`ChannelManager`] holds exactly one live channel plus the endpoint and
//! connection arguments it was built from, behind a single `RwLock`.
//! Readers clone the `Arc` handle under the shared lock and release it
//! before issuing RPCs, so a reconfiguration never waits for in-flight
//! calls and never exposes a half-built channel.

use std::fmt;
use std::sync::{Arc, RwLock};

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::{ChannelFactory, ConnectionArgs, NamingChannel};
use crate::config::UbnsConfig;
use crate::metrics::UBNS_CHANNEL_UPDATES_TOTAL;

/// Configuration surface a config observer drives.
pub trait ChannelConfigurable: Send + Sync {
    /// Connection arguments derived from `config`.
    fn get_default_args(&self, config: &UbnsConfig) -> ConnectionArgs;

    /// Replace the stored connection arguments.
    fn set_args(&self, config: &UbnsConfig, args: ConnectionArgs);

    /// Rebuild the channel for `uri`; `false` leaves the old one in place.
    fn set_channel_uri(&self, config: &UbnsConfig, uri: &str) -> bool;
}

#[derive(Default)]
struct ChannelSlot {
    uri: String,
    args: Option<ConnectionArgs>,
    channel: Option<Arc<dyn NamingChannel>>,
}

/// Owner of the process-wide naming channel.
pub struct ChannelManager {
    factory: Arc<dyn ChannelFactory>,
    slot: RwLock<ChannelSlot>,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.read().expect("rwlock poisoned");
        f.debug_struct("ChannelManager")
            .field("uri", &slot.uri)
            .field("args", &slot.args)
            .field("connected", &slot.channel.is_some())
            .finish()
    }
}

impl ChannelManager {
    pub fn new(factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            factory,
            slot: RwLock::new(ChannelSlot::default()),
        }
    }

    /// Current channel, if one has been built.
    pub fn get_channel(&self) -> Option<Arc<dyn NamingChannel>> {
        self.slot.read().expect("rwlock poisoned").channel.clone()
    }

    /// Endpoint of the current channel (empty before the first `set_uri`).
    pub fn uri(&self) -> String {
        self.slot.read().expect("rwlock poisoned").uri.clone()
    }

    /// Arguments the next channel will be built with.
    pub fn args(&self) -> Option<ConnectionArgs> {
        self.slot.read().expect("rwlock poisoned").args
    }

    pub fn get_default_args(&self, config: &UbnsConfig) -> ConnectionArgs {
        ConnectionArgs {
            initial_reconnect_backoff: config.initial_reconnect_backoff(),
            min_reconnect_backoff: config.min_reconnect_backoff(),
            max_reconnect_backoff: config.max_reconnect_backoff(),
            connect_timeout: config.connect_timeout(),
            rpc_timeout: config.rpc_timeout(),
        }
    }

    /// Store `args` for the next `set_uri`; the live channel is untouched.
    pub fn set_args(&self, _config: &UbnsConfig, args: ConnectionArgs) {
        let mut slot = self.slot.write().expect("rwlock poisoned");
        debug!(?args, "ubns connection args updated");
        slot.args = Some(args);
    }

    /// Build a channel for `uri` and swap it in.
    ///
    /// Arguments default from `config` when none were set.  On a build
    /// failure the previous channel and endpoint stay in place.
    pub fn set_uri(&self, config: &UbnsConfig, uri: &str) -> bool {
        let mut slot = self.slot.write().expect("rwlock poisoned");
        let args = *slot.args.get_or_insert_with(|| self.get_default_args(config));

        match self.factory.create_channel(uri, &args) {
            Ok(channel) => {
                info!(
                    "ubns channel now targets {} (was '{}')",
                    channel.target(),
                    slot.uri
                );
                slot.channel = Some(channel);
                slot.uri = uri.to_string();
                counter!(UBNS_CHANNEL_UPDATES_TOTAL, "outcome" => "ok").increment(1);
                true
            }
            Err(e) => {
                warn!("ubns channel to '{}' not built, keeping '{}': {}", uri, slot.uri, e);
                counter!(UBNS_CHANNEL_UPDATES_TOTAL, "outcome" => "error").increment(1);
                false
            }
        }
    }

    /// Drop the channel.  In-flight RPCs keep their own handle.
    pub fn clear(&self) {
        let mut slot = self.slot.write().expect("rwlock poisoned");
        if slot.channel.take().is_some() {
            info!("ubns channel to '{}' released", slot.uri);
        }
    }
}

impl ChannelConfigurable for ChannelManager {
    fn get_default_args(&self, config: &UbnsConfig) -> ConnectionArgs {
        ChannelManager::get_default_args(self, config)
    }

    fn set_args(&self, config: &UbnsConfig, args: ConnectionArgs) {
        ChannelManager::set_args(self, config, args)
    }

    fn set_channel_uri(&self, config: &UbnsConfig, uri: &str) -> bool {
        self.set_uri(config, uri)
    }
}

// -- Config observer ----------------------------------------------------------

/// Pushes configuration changes into a [`ChannelConfigurable`].
#[derive(Clone)]
pub struct ChannelConfigObserver {
    target: Arc<dyn ChannelConfigurable>,
}

impl ChannelConfigObserver {
    pub fn new(target: Arc<dyn ChannelConfigurable>) -> Self {
        Self { target }
    }

    /// Apply `config` unconditionally: args first, then the endpoint.
    pub fn apply(&self, config: &UbnsConfig) -> bool {
        let args = self.target.get_default_args(config);
        self.target.set_args(config, args);
        self.target.set_channel_uri(config, &config.uri)
    }

    /// Apply `new` if any channel setting changed since `old`.
    pub fn handle_config_change(&self, old: &UbnsConfig, new: &UbnsConfig) -> bool {
        if !old.channel_settings_differ(new) {
            return true;
        }
        info!("ubns channel settings changed, rebuilding channel to {}", new.uri);
        self.apply(new)
    }

    /// Follow `rx` until its sender is dropped, applying each change.
    ///
    /// `applied` is the config the target currently reflects.  The value
    /// already in `rx` is compared against it first, so a change sent
    /// before the task is first polled is not lost.  A failed rebuild keeps
    /// `applied` as the baseline and the same config is retried on the next
    /// notification.
    pub fn watch(self, applied: UbnsConfig, mut rx: watch::Receiver<UbnsConfig>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut current = applied;
            loop {
                let next = rx.borrow_and_update().clone();
                match next.validate() {
                    Err(e) => warn!("ignoring ubns config change: {}", e),
                    Ok(()) => {
                        if self.handle_config_change(&current, &next) {
                            current = next;
                        } else {
                            warn!("ubns channel to {} could not be rebuilt", next.uri);
                        }
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
            debug!("ubns config watch ended");
        })
    }
}
