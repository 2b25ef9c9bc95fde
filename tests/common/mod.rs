#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use azure_iot_file_upload::{
    BlobTransfer, DesiredProperties, HubClient, IoTHubError, TransferError, Twin, UploadGrant,
    UploadOutcome, UploadRequest,
};
use tokio::sync::mpsc::{channel, Receiver, Sender};

pub const GRANT_URI: &str =
    "https://acct.blob.core.windows.net/uploads/device-1/testfile1.txt?sv=2018-03-28&sr=b&sig=abc%2Bdef%3D";

#[derive(Debug, Default)]
pub struct HubLog {
    pub opened: usize,
    pub closed: usize,
    pub requests: Vec<UploadRequest>,
    pub grants: Vec<UploadGrant>,
    pub outcomes: Vec<UploadOutcome>,
}

/// In-memory hub issuing numbered grants and recording everything it is told
#[derive(Debug, Clone)]
pub struct FakeHub {
    pub log: Arc<Mutex<HubLog>>,
    pub twin: Twin,
    pub fail_open: bool,
    pub fail_grant: bool,
    pub fail_completion: bool,
    pub fail_twin: bool,
    /// Patch delivered on the update stream while the twin is being fetched
    pub patch_during_get_twin: Option<DesiredProperties>,
    pub grant_uri: String,
    pub desired_tx: Arc<Mutex<Option<Sender<DesiredProperties>>>>,
}

impl Default for FakeHub {
    fn default() -> Self {
        Self {
            log: Default::default(),
            twin: Twin::default(),
            fail_open: false,
            fail_grant: false,
            fail_completion: false,
            fail_twin: false,
            patch_during_get_twin: None,
            grant_uri: GRANT_URI.to_string(),
            desired_tx: Default::default(),
        }
    }
}

impl FakeHub {
    pub fn with_twin(twin: Twin) -> Self {
        Self {
            twin,
            ..Default::default()
        }
    }

    /// Push a desired property patch to whoever subscribed
    pub async fn push_desired(&self, desired: DesiredProperties) {
        let tx = self
            .desired_tx
            .lock()
            .unwrap()
            .clone()
            .expect("no subscriber for desired properties");
        tx.send(desired).await.unwrap();
    }

    pub fn grant_count(&self) -> usize {
        self.log.lock().unwrap().grants.len()
    }

    pub fn outcomes(&self) -> Vec<UploadOutcome> {
        self.log.lock().unwrap().outcomes.clone()
    }
}

#[async_trait]
impl HubClient for FakeHub {
    async fn open(&mut self) -> azure_iot_file_upload::Result<()> {
        if self.fail_open {
            return Err(IoTHubError::Other("connection refused".into()));
        }
        self.log.lock().unwrap().opened += 1;
        Ok(())
    }

    async fn close(&mut self) -> azure_iot_file_upload::Result<()> {
        self.log.lock().unwrap().closed += 1;
        self.desired_tx.lock().unwrap().take();
        Ok(())
    }

    async fn get_upload_sas_uri(
        &self,
        request: &UploadRequest,
    ) -> azure_iot_file_upload::Result<UploadGrant> {
        let mut log = self.log.lock().unwrap();
        log.requests.push(request.clone());
        if self.fail_grant {
            return Err(IoTHubError::UnexpectedStatus {
                status: 403,
                body: "file upload not configured".into(),
            });
        }
        let grant = UploadGrant {
            blob_uri: self.grant_uri.clone(),
            correlation_id: format!("corr-{}", log.grants.len() + 1),
        };
        log.grants.push(grant.clone());
        Ok(grant)
    }

    async fn complete_upload(&self, outcome: &UploadOutcome) -> azure_iot_file_upload::Result<()> {
        self.log.lock().unwrap().outcomes.push(outcome.clone());
        if self.fail_completion {
            return Err(IoTHubError::Other("hub unavailable".into()));
        }
        Ok(())
    }

    async fn desired_property_updates(
        &mut self,
    ) -> azure_iot_file_upload::Result<Receiver<DesiredProperties>> {
        let (tx, rx) = channel(4);
        *self.desired_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn get_twin(&self) -> azure_iot_file_upload::Result<Twin> {
        if self.fail_twin {
            return Err(IoTHubError::UnexpectedStatus {
                status: 429,
                body: "throttled".into(),
            });
        }
        if let Some(patch) = &self.patch_during_get_twin {
            self.push_desired(patch.clone()).await;
            // Let the subscriber apply the patch before the snapshot returns
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
        }
        Ok(self.twin.clone())
    }
}

/// Records every put and fails with a fixed message when asked to
#[derive(Debug, Clone, Default)]
pub struct FakeTransfer {
    pub puts: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    pub failure: Option<String>,
}

impl FakeTransfer {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn puts(&self) -> Vec<(String, Vec<u8>)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobTransfer for FakeTransfer {
    async fn put(&self, blob_uri: &str, body: Vec<u8>) -> Result<(), TransferError> {
        self.puts.lock().unwrap().push((blob_uri.to_string(), body));
        match &self.failure {
            Some(message) => Err(TransferError::new(message)),
            None => Ok(()),
        }
    }
}

/// Write `contents` to a file unique to this test process
pub fn test_file(name: &str, contents: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("azure-iot-file-upload-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
