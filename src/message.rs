use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransferError;

// Everything outside the unreserved set is escaped, '/' stays as the virtual directory separator
const BLOB_NAME_SET: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Status code reported to the hub for a completed transfer
pub const UPLOAD_SUCCESS_STATUS: i32 = 200;
/// Status code reported to the hub for a failed transfer
pub const UPLOAD_FAILURE_STATUS: i32 = 500;

/// Request the hub to issue a SAS URI for a blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    blob_name: String,
}

impl UploadRequest {
    /// Request for a blob with an explicit name
    pub fn new(blob_name: impl Into<String>) -> Self {
        Self {
            blob_name: blob_name.into(),
        }
    }

    /// Request named after the final component of `path`
    pub fn for_path(path: &Path) -> Option<Self> {
        path.file_name()
            .map(|name| Self::new(name.to_string_lossy()))
    }

    /// Name of the blob to create
    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }
}

/// A pre-signed blob URI handed out by the hub for one upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadGrant {
    /// Writable blob URI, including the SAS query
    pub blob_uri: String,
    /// Joins this grant with its completion notification
    pub correlation_id: String,
}

/// Response body of `POST /devices/{id}/files`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileUploadSasUriResponse {
    pub(crate) correlation_id: String,
    pub(crate) host_name: String,
    pub(crate) container_name: String,
    pub(crate) blob_name: String,
    pub(crate) sas_token: String,
}

impl From<FileUploadSasUriResponse> for UploadGrant {
    fn from(response: FileUploadSasUriResponse) -> Self {
        let blob_name = percent_encoding::utf8_percent_encode(&response.blob_name, BLOB_NAME_SET);
        Self {
            blob_uri: format!(
                "https://{}/{}/{}{}",
                response.host_name, response.container_name, blob_name, response.sas_token
            ),
            correlation_id: response.correlation_id,
        }
    }
}

/// Result of a transfer attempt, sent to the hub to release the grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    /// Correlation id of the grant being released
    pub correlation_id: String,
    /// Whether the blob was written
    pub is_success: bool,
    /// User defined status code, present on the service side notification
    pub status_code: i32,
    /// User defined status description
    pub status_description: String,
}

impl UploadOutcome {
    /// Outcome for a transfer that completed
    pub fn success(grant: &UploadGrant) -> Self {
        Self {
            correlation_id: grant.correlation_id.clone(),
            is_success: true,
            status_code: UPLOAD_SUCCESS_STATUS,
            status_description: "Success".to_string(),
        }
    }

    /// Outcome for a transfer that failed with `error`
    pub fn failure(grant: &UploadGrant, error: &TransferError) -> Self {
        Self {
            correlation_id: grant.correlation_id.clone(),
            is_success: false,
            status_code: UPLOAD_FAILURE_STATUS,
            status_description: error.to_string(),
        }
    }
}

/// The desired section of a device twin
///
/// Holds the document exactly as the hub sent it. Lookups never fail, missing
/// or mistyped members come back as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredProperties(Value);

impl DesiredProperties {
    /// Wrap a JSON document
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    /// Follow `path` through nested objects
    ///
    /// ```
    /// use azure_iot_file_upload::DesiredProperties;
    /// use serde_json::json;
    ///
    /// let desired = DesiredProperties::new(json!({"storage": {"customdns": "foo.example.com"}}));
    /// assert_eq!(desired.get_str(&["storage", "customdns"]), Some("foo.example.com"));
    /// assert_eq!(desired.get(&["storage", "missing"]), None);
    /// ```
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.0, |value, key| value.as_object()?.get(*key))
    }

    /// Follow `path` and read the member as a string
    pub fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.get(path)?.as_str()
    }

    /// Twin version stamped by the hub
    pub fn version(&self) -> Option<i64> {
        self.get(&["$version"])?.as_i64()
    }

    /// The raw JSON document
    pub fn as_json(&self) -> &Value {
        &self.0
    }
}

/// Full device twin as returned by a twin GET
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Twin {
    /// Properties set by the service
    #[serde(default)]
    pub desired: DesiredProperties,
    /// Properties reported by the device
    #[serde(default)]
    pub reported: Value,
}

/// Notification delivered to the service once a device completed an upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadNotification {
    /// Device that uploaded the blob
    #[serde(default)]
    pub device_id: String,
    /// Full URI of the blob
    #[serde(default)]
    pub blob_uri: String,
    /// Blob name, prefixed with the device id
    pub blob_name: String,
    /// Last time the blob was written
    #[serde(default)]
    pub last_updated_time: Option<DateTime<Utc>>,
    /// Blob size
    #[serde(default)]
    pub blob_size_in_bytes: u64,
    /// When the hub queued this notification
    #[serde(default)]
    pub enqueued_time_utc: Option<DateTime<Utc>>,
    /// Opaque handle used to complete or abandon this delivery
    #[serde(skip)]
    pub lock_token: String,
}

impl FileUploadNotification {
    /// Attach the receiver's delivery handle
    pub fn with_lock_token(mut self, lock_token: impl Into<String>) -> Self {
        self.lock_token = lock_token.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_file_name_only() {
        let request = UploadRequest::for_path(Path::new("/var/data/testfile1.txt")).unwrap();
        assert_eq!(request.blob_name(), "testfile1.txt");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"blobName": "testfile1.txt"})
        );
    }

    #[test]
    fn request_needs_a_file_name() {
        assert!(UploadRequest::for_path(Path::new("/")).is_none());
    }

    #[test]
    fn grant_uri_is_built_from_sas_response() {
        let response: FileUploadSasUriResponse = serde_json::from_value(json!({
            "correlationId": "corr-1",
            "hostName": "acct.blob.core.windows.net",
            "containerName": "uploads",
            "blobName": "device-1/test file.txt",
            "sasToken": "?sv=2018-03-28&sr=b&sig=abc%3D"
        }))
        .unwrap();

        let grant = UploadGrant::from(response);
        assert_eq!(grant.correlation_id, "corr-1");
        assert_eq!(
            grant.blob_uri,
            "https://acct.blob.core.windows.net/uploads/device-1/test%20file.txt?sv=2018-03-28&sr=b&sig=abc%3D"
        );
    }

    #[test]
    fn outcome_serializes_in_hub_format() {
        let grant = UploadGrant {
            blob_uri: "https://acct.blob.core.windows.net/c/b".to_string(),
            correlation_id: "corr-1".to_string(),
        };
        let outcome = UploadOutcome::failure(&grant, &TransferError::new("disk full"));
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "correlationId": "corr-1",
                "isSuccess": false,
                "statusCode": 500,
                "statusDescription": "disk full"
            })
        );
    }

    #[test]
    fn desired_lookup_tolerates_missing_and_mistyped_members() {
        let desired = DesiredProperties::new(json!({
            "storage": "not an object",
            "$version": 7
        }));
        assert_eq!(desired.get(&["storage", "customdns"]), None);
        assert_eq!(desired.get_str(&["$version"]), None);
        assert_eq!(desired.version(), Some(7));
    }

    #[test]
    fn twin_document_parses_both_sections() {
        let twin: Twin = serde_json::from_value(json!({
            "desired": {"storage": {"customdns": "foo.example.com"}, "$version": 3},
            "reported": {"$version": 1}
        }))
        .unwrap();
        assert_eq!(
            twin.desired.get_str(&["storage", "customdns"]),
            Some("foo.example.com")
        );
        assert_eq!(twin.desired.version(), Some(3));
    }

    #[test]
    fn notification_reads_service_payload() {
        let notification: FileUploadNotification = serde_json::from_value(json!({
            "deviceId": "device-1",
            "blobUri": "https://acct.blob.core.windows.net/uploads/device-1/testfile1.txt",
            "blobName": "device-1/testfile1.txt",
            "lastUpdatedTime": "2023-05-01T10:00:00Z",
            "blobSizeInBytes": 42,
            "enqueuedTimeUtc": "2023-05-01T10:00:01Z"
        }))
        .unwrap();
        assert_eq!(notification.blob_name, "device-1/testfile1.txt");
        assert_eq!(notification.blob_size_in_bytes, 42);
        assert!(notification.lock_token.is_empty());
    }
}
