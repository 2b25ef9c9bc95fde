//! Device side composition of the upload coordinator and the twin watcher

use std::future::Future;
use std::path::Path;

use crate::error::UploadError;
use crate::message::UploadOutcome;
use crate::transport::{BlobTransfer, HubClient};
use crate::twin::{StorageOverride, Subscription, TwinWatcher};
use crate::upload::UploadCoordinator;

/// Lifecycle of the agent's hub session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No session has been opened
    Disconnected,
    /// Session is being opened
    Connecting,
    /// Session is open, uploads can run
    Connected,
    /// Session is being torn down
    Closing,
    /// Session has been torn down
    Closed,
}

/// Owns one hub session and runs uploads against it while tracking the twin
#[derive(Debug)]
pub struct DeviceAgent<H, B> {
    hub: H,
    coordinator: UploadCoordinator<B>,
    watcher: TwinWatcher,
    subscription: Option<Subscription>,
    state: AgentState,
}

impl<H, B> DeviceAgent<H, B>
where
    H: HubClient,
    B: BlobTransfer,
{
    /// Agent over `hub` writing blobs through `transfer`
    pub fn new(hub: H, transfer: B) -> Self {
        let storage_override = StorageOverride::default();
        Self {
            hub,
            coordinator: UploadCoordinator::new(transfer, storage_override.clone()),
            watcher: TwinWatcher::new(storage_override),
            subscription: None,
            state: AgentState::Disconnected,
        }
    }

    /// Where the session currently is
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// The storage host override shared with the twin watcher
    pub fn storage_override(&self) -> &StorageOverride {
        self.coordinator.storage_override()
    }

    /// The underlying hub client
    pub fn hub(&self) -> &H {
        &self.hub
    }

    /// Open the session, start watching the twin and apply its current desired state
    ///
    /// When the twin cannot be watched or fetched the half open session is
    /// closed again and the agent is left disconnected.
    pub async fn connect(&mut self) -> crate::Result<()> {
        self.state = AgentState::Connecting;
        if let Err(err) = self.hub.open().await {
            self.state = AgentState::Disconnected;
            return Err(err);
        }
        info!("Connected to IoT Hub");

        if let Err(err) = self.watch_twin().await {
            self.abandon_session().await;
            return Err(err);
        }

        self.state = AgentState::Connected;
        Ok(())
    }

    async fn watch_twin(&mut self) -> crate::Result<()> {
        let updates = self.hub.desired_property_updates().await?;
        self.subscription = Some(self.watcher.subscribe(updates));

        // Pick up desired state set before this process existed
        let twin = self.hub.get_twin().await?;
        self.watcher
            .on_desired_properties_changed(&twin.desired)
            .await;
        Ok(())
    }

    async fn abandon_session(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        if let Err(err) = self.hub.close().await {
            warn!("Failed to close half open IoT Hub session: {}", err);
        }
        self.state = AgentState::Disconnected;
    }

    /// Upload one file, the session stays usable whatever the result
    pub async fn upload(&self, path: impl AsRef<Path>) -> Result<UploadOutcome, UploadError> {
        if self.state != AgentState::Connected {
            return Err(UploadError::NotConnected);
        }
        self.coordinator.upload(path, &self.hub).await
    }

    /// Stop watching the twin and close the session
    pub async fn close(&mut self) -> crate::Result<()> {
        self.state = AgentState::Closing;
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        let result = self.hub.close().await;
        self.state = AgentState::Closed;
        info!("Closed IoT Hub session");
        result
    }

    /// Connect, upload each file, wait for `shutdown` and close
    ///
    /// Upload failures are logged and do not stop the remaining uploads.
    pub async fn run<P, F>(&mut self, files: &[P], shutdown: F) -> crate::Result<()>
    where
        P: AsRef<Path>,
        F: Future<Output = ()>,
    {
        if let Err(err) = self.connect().await {
            error!("Failed to start device session: {}", err);
            return Err(err);
        }

        for file in files {
            match self.upload(file).await {
                Ok(outcome) if outcome.is_success => {
                    info!("Uploaded {}", file.as_ref().display())
                }
                Ok(outcome) => warn!(
                    "Upload of {} failed: {}",
                    file.as_ref().display(),
                    outcome.status_description
                ),
                Err(err) => error!("Upload of {} failed: {}", file.as_ref().display(), err),
            }
        }

        shutdown.await;
        self.close().await
    }
}
