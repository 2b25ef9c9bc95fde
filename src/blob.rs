//! Blob storage transfer over plain REST calls against a SAS URI

use async_trait::async_trait;
use hyper::{Body, Method, Request, StatusCode};

use crate::error::TransferError;
use crate::http_transport::{https_client, HttpsClient};
use crate::transport::BlobTransfer;

const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";
const BLOCK_BLOB: &str = "BlockBlob";

/// Uploads whole files as block blobs with a single `Put Blob` request
#[derive(Debug, Clone)]
pub struct HttpBlobTransfer {
    client: HttpsClient,
}

impl HttpBlobTransfer {
    /// Create a transfer client using the platform trust store
    pub fn new() -> crate::Result<Self> {
        Ok(Self {
            client: https_client(None)?,
        })
    }
}

#[async_trait]
impl BlobTransfer for HttpBlobTransfer {
    async fn put(&self, blob_uri: &str, body: Vec<u8>) -> Result<(), TransferError> {
        let size = body.len();
        let req = Request::builder()
            .method(Method::PUT)
            .uri(blob_uri)
            .header(BLOB_TYPE_HEADER, BLOCK_BLOB)
            .body(Body::from(body))
            .map_err(TransferError::new)?;

        debug!("PUT {} bytes to blob storage", size);
        let res = self.client.request(req).await?;
        let status = res.status();
        if status == StatusCode::CREATED {
            return Ok(());
        }

        let body = hyper::body::to_bytes(res).await?;
        Err(TransferError(format!(
            "blob storage responded with {}: {}",
            status,
            String::from_utf8_lossy(&body)
        )))
    }
}
