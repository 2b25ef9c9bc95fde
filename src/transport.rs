use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

use crate::error::TransferError;
use crate::message::{DesiredProperties, Twin, UploadGrant, UploadOutcome, UploadRequest};

/// Device side view of the IoT hub
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Open the session with the hub
    async fn open(&mut self) -> crate::Result<()>;

    /// Tear the session down
    async fn close(&mut self) -> crate::Result<()>;

    /// Ask the hub for a SAS URI to upload a blob to
    async fn get_upload_sas_uri(&self, request: &UploadRequest) -> crate::Result<UploadGrant>;

    /// Tell the hub how an upload ended so it can release the grant
    async fn complete_upload(&self, outcome: &UploadOutcome) -> crate::Result<()>;

    /// Stream of desired property patches pushed by the hub
    ///
    /// The stream ends when the session closes.
    async fn desired_property_updates(&mut self) -> crate::Result<Receiver<DesiredProperties>>;

    /// Fetch the full twin as currently stored by the hub
    async fn get_twin(&self) -> crate::Result<Twin>;
}

/// Writes a whole blob to a pre-signed URI
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    /// Create or overwrite the blob at `blob_uri` with `body`
    async fn put(&self, blob_uri: &str, body: Vec<u8>) -> Result<(), TransferError>;
}
