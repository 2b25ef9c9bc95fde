use std::marker::PhantomData;

use thiserror::Error;

use crate::{Credentials, DeviceConnectionString, DeviceKeyTokenSource, IoTHubClient, TokenError};

impl IoTHubClient {
    /// Get a builder for the IoT hub client
    pub fn builder() -> IoTHubClientBuilder<IoTHubClientBuilderUninitializedHubDetails> {
        IoTHubClientBuilder::default()
    }
}

/// Error related to building the client
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IoTHubClientBuilderError {
    /// Uninitialized field
    #[error("{0} must be initialized")]
    UninitializedField(&'static str),
    /// Error initializing the hub client
    #[error("An error occurred intializing the IoT Hub Client {0}")]
    ClientError(String),
}

/// The client builder has no initialized fields and requires the hub name and device id
#[derive(Debug)]
pub struct IoTHubClientBuilderUninitializedHubDetails;
/// The client builder has hub and device details and can have the credentials initialized
#[derive(Debug)]
pub struct IoTHubClientBuilderInitializedHubDetails;
/// The client builder has all fields required to be built
#[derive(Debug)]
pub struct IoTHubClientBuilderInitializedCredentials;

/// Builder object for the IoT Hub Client
#[derive(Debug)]
pub struct IoTHubClientBuilder<T> {
    iothub_hostname: Option<String>,
    device_id: Option<String>,
    credentials: Option<Credentials>,
    _phantom: PhantomData<T>,
}

impl Default for IoTHubClientBuilder<IoTHubClientBuilderUninitializedHubDetails> {
    fn default() -> IoTHubClientBuilder<IoTHubClientBuilderUninitializedHubDetails> {
        Self {
            iothub_hostname: None,
            device_id: None,
            credentials: None,
            _phantom: Default::default(),
        }
    }
}

impl IoTHubClientBuilder<IoTHubClientBuilderInitializedCredentials> {
    /// Build the IoT hub client
    pub fn build(self) -> Result<IoTHubClient, IoTHubClientBuilderError> {
        let Some(iothub_hostname) = self.iothub_hostname else {
            return Err(IoTHubClientBuilderError::UninitializedField(
                "iothub_hostname",
            ));
        };

        let Some(device_id) = self.device_id else {
            return Err(IoTHubClientBuilderError::UninitializedField("device_id"));
        };

        let Some(credentials) = self.credentials else {
            return Err(IoTHubClientBuilderError::UninitializedField("credentials"));
        };

        IoTHubClient::new(iothub_hostname, device_id, credentials)
            .map_err(|e| IoTHubClientBuilderError::ClientError(format!("{e}")))
    }

    /// The hub the client will connect to
    pub fn hostname(&self) -> Option<&str> {
        self.iothub_hostname.as_deref()
    }
}

impl IoTHubClientBuilder<IoTHubClientBuilderUninitializedHubDetails> {
    /// Set the values for the IoT hub hostname and device id
    pub fn iothub_details<T>(
        self,
        iothub_hostname: T,
        device_id: T,
    ) -> IoTHubClientBuilder<IoTHubClientBuilderInitializedHubDetails>
    where
        T: ToString,
    {
        IoTHubClientBuilder {
            iothub_hostname: Some(iothub_hostname.to_string()),
            device_id: Some(device_id.to_string()),
            credentials: None,
            _phantom: Default::default(),
        }
    }

    /// Set the values for the IoT hub hostname and device id and access key from the connection
    /// string
    pub fn connection_string<T>(
        self,
        connection_string: T,
    ) -> Result<IoTHubClientBuilder<IoTHubClientBuilderInitializedCredentials>, TokenError>
    where
        T: AsRef<str>,
    {
        let conn: DeviceConnectionString = connection_string.as_ref().parse()?;
        let token_source = DeviceKeyTokenSource::from(&conn);

        Ok(IoTHubClientBuilder {
            iothub_hostname: Some(conn.host_name),
            device_id: Some(conn.device_id),
            credentials: Some(token_source.into()),
            _phantom: Default::default(),
        })
    }
}

impl IoTHubClientBuilder<IoTHubClientBuilderInitializedHubDetails> {
    /// The device access key
    pub fn access_key<T>(
        self,
        access_key: T,
    ) -> Result<IoTHubClientBuilder<IoTHubClientBuilderInitializedCredentials>, TokenError>
    where
        T: AsRef<str>,
    {
        let token_source = DeviceKeyTokenSource::new(
            self.iothub_hostname.as_deref().unwrap_or_default(),
            self.device_id.as_deref().unwrap_or_default(),
            access_key.as_ref(),
        )?;

        Ok(self.credentials(token_source.into()))
    }

    /// Authenticate with a certificate identity
    pub fn certificate(
        self,
        identity: native_tls::Identity,
    ) -> IoTHubClientBuilder<IoTHubClientBuilderInitializedCredentials> {
        self.credentials(Credentials::X509(identity))
    }

    /// Authenticate with already built credentials
    pub fn credentials(
        self,
        credentials: Credentials,
    ) -> IoTHubClientBuilder<IoTHubClientBuilderInitializedCredentials> {
        IoTHubClientBuilder {
            iothub_hostname: self.iothub_hostname,
            device_id: self.device_id,
            credentials: Some(credentials),
            _phantom: Default::default(),
        }
    }
}
