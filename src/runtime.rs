//! Runtime for executing mounted conversations
//!
//! Each mounted chat gets its own event loop; several can run side by side.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{ConversationRuntime, RuntimeSettings};
pub use traits::*;

use crate::state_machine::{BotInfo, ConvState, Event};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Identifies one mounted chat surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountId(String);

impl MountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a host supplies when mounting a chat
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub mount_id: MountId,
    pub bot: BotInfo,
    pub csrf_token: String,
}

/// User-facing message about an event that was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No chat mounted as {0}")]
    NotMounted(MountId),
    #[error("Chat {0} has stopped")]
    Stopped(MountId),
}

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ConversationHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub state_rx: watch::Receiver<ConvState>,
    pub notice_tx: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
}

impl ConversationHandle {
    /// Latest published state
    #[allow(dead_code)] // Used by tests
    pub fn state(&self) -> ConvState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}

/// Manager for all mounted conversations
pub struct ChatRegistry<A: ChatApi + 'static> {
    api: Arc<A>,
    settings: RuntimeSettings,
    runtimes: RwLock<HashMap<MountId, ConversationHandle>>,
}

impl<A: ChatApi + 'static> ChatRegistry<A> {
    pub fn new(api: A, settings: RuntimeSettings) -> Self {
        Self {
            api: Arc::new(api),
            settings,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Mount a chat, or return the handle of the one already mounted under
    /// the same id
    pub async fn mount<V: Viewport + 'static>(
        &self,
        config: MountConfig,
        viewport: Arc<V>,
    ) -> ConversationHandle {
        let mut runtimes = self.runtimes.write().await;
        if let Some(handle) = runtimes.get(&config.mount_id) {
            if handle.is_running() {
                return handle.clone();
            }
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (notice_tx, _) = broadcast::channel(32);
        let initial = ConvState::new(config.bot, config.csrf_token);
        let (state_tx, state_rx) = watch::channel(initial.clone());
        let shutdown = CancellationToken::new();

        let runtime = ConversationRuntime::new(
            config.mount_id.clone(),
            initial,
            self.api.clone(),
            viewport,
            self.settings,
            event_rx,
            event_tx.clone(),
            state_tx,
            notice_tx.clone(),
            shutdown.clone(),
        );

        let mount_id = config.mount_id.clone();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::debug!(mount = %mount_id, "Conversation task finished");
        });

        let handle = ConversationHandle {
            event_tx,
            state_rx,
            notice_tx,
            shutdown,
        };
        runtimes.insert(config.mount_id, handle.clone());
        handle
    }

    #[allow(dead_code)] // The terminal host mounts a single chat
    pub async fn get(&self, mount_id: &MountId) -> Result<ConversationHandle, RegistryError> {
        self.runtimes
            .read()
            .await
            .get(mount_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotMounted(mount_id.clone()))
    }

    /// Send an event to a mounted conversation
    #[allow(dead_code)]
    pub async fn send_event(&self, mount_id: &MountId, event: Event) -> Result<(), RegistryError> {
        let handle = self.get(mount_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|_| RegistryError::Stopped(mount_id.clone()))
    }

    /// Subscribe to notices about rejected events
    #[allow(dead_code)]
    pub async fn subscribe(
        &self,
        mount_id: &MountId,
    ) -> Result<broadcast::Receiver<Notice>, RegistryError> {
        Ok(self.get(mount_id).await?.subscribe())
    }

    /// Subscribe to state snapshots
    #[allow(dead_code)] // Used by tests
    pub async fn watch_state(
        &self,
        mount_id: &MountId,
    ) -> Result<watch::Receiver<ConvState>, RegistryError> {
        Ok(self.get(mount_id).await?.state_rx)
    }

    /// Stop a conversation. In-flight requests finish but their results
    /// are dropped.
    #[allow(dead_code)]
    pub async fn unmount(&self, mount_id: &MountId) -> bool {
        match self.runtimes.write().await.remove(mount_id) {
            Some(handle) => {
                handle.shutdown.cancel();
                tracing::info!(mount = %mount_id, "Chat unmounted");
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let mut runtimes = self.runtimes.write().await;
        for (mount_id, handle) in runtimes.drain() {
            handle.shutdown.cancel();
            tracing::debug!(mount = %mount_id, "Chat stopped");
        }
    }

    #[allow(dead_code)]
    pub async fn mounted(&self) -> Vec<MountId> {
        let mut ids: Vec<_> = self.runtimes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
