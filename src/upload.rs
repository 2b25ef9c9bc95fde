//! The file upload handshake: SAS grant, blob transfer, completion notification

use std::borrow::Cow;
use std::path::Path;

use hyper::http::uri::{Authority, Uri};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{TransferError, UploadError};
use crate::message::{UploadGrant, UploadOutcome, UploadRequest};
use crate::transport::{BlobTransfer, HubClient};
use crate::twin::StorageOverride;

/// Replace the host of `blob_uri` with `host`
///
/// Scheme, port, path and query are kept as issued.
///
/// ```
/// use azure_iot_file_upload::rewrite_host;
///
/// let uri = rewrite_host(
///     "https://acct.blob.core.windows.net/path?sig=X",
///     "custom.example.com",
/// ).unwrap();
/// assert_eq!(uri, "https://custom.example.com/path?sig=X");
/// ```
pub fn rewrite_host(blob_uri: &str, host: &str) -> Result<String, TransferError> {
    let uri: Uri = blob_uri.parse().map_err(TransferError::new)?;
    let mut parts = uri.into_parts();

    let authority = match parts.authority.as_ref().and_then(Authority::port_u16) {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    parts.authority = Some(authority.parse::<Authority>().map_err(TransferError::new)?);

    Ok(Uri::from_parts(parts).map_err(TransferError::new)?.to_string())
}

/// Drives one upload at a time through the hub's file upload handshake
#[derive(Debug, Clone)]
pub struct UploadCoordinator<B> {
    transfer: B,
    storage_override: StorageOverride,
}

impl<B: BlobTransfer> UploadCoordinator<B> {
    /// Coordinator writing blobs through `transfer`, redirected by `storage_override`
    pub fn new(transfer: B, storage_override: StorageOverride) -> Self {
        Self {
            transfer,
            storage_override,
        }
    }

    /// The override consulted before each transfer
    pub fn storage_override(&self) -> &StorageOverride {
        &self.storage_override
    }

    /// Upload the file at `path` through `hub`
    ///
    /// Once a grant was issued the hub is always told how the transfer ended.
    /// A failed transfer is returned as an unsuccessful outcome rather than
    /// an error.
    pub async fn upload<H>(
        &self,
        path: impl AsRef<Path>,
        hub: &H,
    ) -> Result<UploadOutcome, UploadError>
    where
        H: HubClient + ?Sized,
    {
        let path = path.as_ref();
        let request = UploadRequest::for_path(path)
            .ok_or_else(|| UploadError::InvalidPath(path.display().to_string()))?;
        let mut file = File::open(path).await.map_err(|source| UploadError::Open {
            path: path.display().to_string(),
            source,
        })?;

        info!("Uploading file {}", request.blob_name());

        debug!("Getting SAS URI from IoT Hub to use when uploading the file...");
        let grant = hub
            .get_upload_sas_uri(&request)
            .await
            .map_err(UploadError::GrantAcquisition)?;
        info!(
            "Successfully got SAS URI from IoT Hub, correlation id {}",
            grant.correlation_id
        );

        let outcome = match self.transfer(&grant, &mut file).await {
            Ok(()) => {
                info!("Successfully uploaded {} to blob storage", request.blob_name());
                UploadOutcome::success(&grant)
            }
            Err(err) => {
                error!(
                    "Failed to upload {} to blob storage due to {}",
                    request.blob_name(),
                    err
                );
                UploadOutcome::failure(&grant, &err)
            }
        };

        hub.complete_upload(&outcome)
            .await
            .map_err(UploadError::Completion)?;
        info!(
            "Notified IoT Hub that the file upload {} and that the SAS URI can be freed",
            if outcome.is_success { "succeeded" } else { "failed" }
        );

        Ok(outcome)
    }

    async fn transfer(&self, grant: &UploadGrant, file: &mut File) -> Result<(), TransferError> {
        let blob_uri = match self.storage_override.get().await {
            Some(host) => {
                debug!("Overwriting the blob storage host with {}", host);
                Cow::Owned(rewrite_host(&grant.blob_uri, &host)?)
            }
            None => Cow::Borrowed(grant.blob_uri.as_str()),
        };

        let mut body = Vec::new();
        file.read_to_end(&mut body).await?;

        self.transfer.put(&blob_uri, body).await
    }
}
