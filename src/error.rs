use thiserror::Error;

use crate::token::TokenError;

/// Errors surfaced by the hub transports
#[derive(Debug, Error)]
pub enum IoTHubError {
    /// Socket or file level failure
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    /// TLS handshake or identity failure
    #[error("tls error: {0}")]
    TlsError(#[from] native_tls::Error),
    /// HTTP client failure
    #[error("http error: {0}")]
    HttpError(#[from] hyper::Error),
    /// Request could not be assembled
    #[error("invalid request: {0}")]
    RequestError(#[from] hyper::http::Error),
    /// The hub answered with an unexpected status code
    #[error("hub responded with {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the hub
        status: u16,
        /// Response body, if any
        body: String,
    },
    /// JSON payload could not be read or written
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// MQTT session failure
    #[error("mqtt error: {0}")]
    MqttError(String),
    /// AMQP connection or link failure
    #[error("amqp error: {0}")]
    AmqpError(String),
    /// The session is not open
    #[error("client is not connected")]
    NotConnected,
    /// SAS token could not be produced
    #[error(transparent)]
    TokenError(#[from] TokenError),
    /// Failure not covered by the other variants
    #[error("{0}")]
    Other(String),
}

/// Fatal errors found while reading device configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// `AUTH_TYPE` was not one of the supported variants
    #[error("invalid authentication type '{0}', please specify 'x509' or 'symmetric_key'")]
    UnknownAuthType(String),
    /// A setting required by the selected authentication type is absent
    #[error("{0} must be set")]
    MissingSetting(&'static str),
    /// The device certificate could not be loaded
    #[error("failed to load certificate {path}: {reason}")]
    Certificate {
        /// Path the certificate was read from
        path: String,
        /// What went wrong
        reason: String,
    },
    /// The connection string could not be parsed
    #[error(transparent)]
    ConnectionString(#[from] TokenError),
    /// The configuration source failed
    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// Blob transfer failure, reported to the hub as the upload status description
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransferError(pub String);

impl TransferError {
    /// Create a transfer error from any displayable cause
    pub fn new(reason: impl ToString) -> Self {
        Self(reason.to_string())
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err)
    }
}

impl From<hyper::Error> for TransferError {
    fn from(err: hyper::Error) -> Self {
        Self::new(err)
    }
}

/// Errors that end a single upload attempt
#[derive(Debug, Error)]
pub enum UploadError {
    /// The path has no file name to use as blob name
    #[error("'{0}' does not name a file")]
    InvalidPath(String),
    /// The source file could not be opened, no grant was requested
    #[error("failed to open {path}: {source}")]
    Open {
        /// File being uploaded
        path: String,
        /// Underlying io error
        source: std::io::Error,
    },
    /// The hub refused or failed to issue a SAS grant
    #[error("failed to get upload SAS URI: {0}")]
    GrantAcquisition(#[source] IoTHubError),
    /// The hub could not be told about the transfer result
    #[error("failed to notify upload completion: {0}")]
    Completion(#[source] IoTHubError),
    /// The agent has no open session
    #[error("device agent is not connected")]
    NotConnected,
}
