//! File upload and device twin client for Azure IoT Hub
//!
//! A device uploads files in three steps: it asks the hub for a SAS URI, writes
//! the blob straight to storage, and tells the hub how the transfer ended so
//! the grant is released. The hub then queues a file upload notification for
//! the service side.
//!
//! - [`UploadCoordinator`] drives the handshake for a single file
//! - [`TwinWatcher`] follows `storage.customdns` in the desired properties and
//!   redirects blob transfers to that host
//! - [`DeviceAgent`] owns the hub session and composes the two
//! - [`NotificationListener`] completes file upload notifications on the
//!   service side, [`AmqpFileNotificationReceiver`] reads them from the hub
//!
//! # Examples
//!
//! ```no_run
//! use azure_iot_file_upload::{DeviceAgent, HttpBlobTransfer, IoTHubClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = IoTHubClient::builder()
//!         .connection_string("HostName=iothubname.azure-devices.net;DeviceId=MyDeviceId;SharedAccessKey=O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=")?
//!         .build()?;
//!
//!     let mut agent = DeviceAgent::new(client, HttpBlobTransfer::new()?);
//!     agent.connect().await?;
//!
//!     let outcome = agent.upload("testfile1.txt").await?;
//!     println!("upload succeeded: {}", outcome.is_success);
//!
//!     agent.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

#[macro_use]
extern crate log;

/// SDK package version
pub const SDK_VERSION: &str = std::env!("CARGO_PKG_VERSION");

/// Device session composition
pub mod agent;
/// File upload notifications over AMQP
pub mod amqp_receiver;
/// Blob storage transfer
pub mod blob;
/// The IoT Hub client
pub mod client;
/// Builder for the IoT Hub client
pub mod client_builder;
/// Errors
pub mod error;
pub(crate) mod http_transport;
/// Service side notification loop
pub mod listener;
/// Message types for communicating with the IoT Hub
pub mod message;
pub(crate) mod mqtt_transport;
/// Device configuration
pub mod settings;
/// Shared access signatures and connection strings
pub mod token;
/// Transport capabilities
pub mod transport;
/// Desired property watch
pub mod twin;
/// File upload handshake
pub mod upload;

pub use agent::{AgentState, DeviceAgent};
pub use amqp_receiver::AmqpFileNotificationReceiver;
pub use blob::HttpBlobTransfer;
pub use client::{Credentials, IoTHubClient};
pub use client_builder::IoTHubClientBuilderError;
pub use error::{ConfigurationError, IoTHubError, TransferError, UploadError};
pub use listener::{FileNotificationReceiver, HandlerError, NotificationHandler, NotificationListener};
pub use message::{
    DesiredProperties, FileUploadNotification, Twin, UploadGrant, UploadOutcome, UploadRequest,
};
pub use settings::{AuthType, DeviceSettings};
pub use token::{
    DeviceConnectionString, DeviceKeyTokenSource, ServiceConnectionString, ServiceKeyTokenSource,
    TokenError, TokenSource,
};
pub use transport::{BlobTransfer, HubClient};
pub use twin::{StorageOverride, Subscription, TwinWatcher};
pub use upload::{rewrite_host, UploadCoordinator};

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, IoTHubError>;
