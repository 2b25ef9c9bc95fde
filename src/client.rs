use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

use crate::error::IoTHubError;
use crate::http_transport::HttpTransport;
use crate::message::{DesiredProperties, Twin, UploadGrant, UploadOutcome, UploadRequest};
use crate::mqtt_transport::MqttTransport;
use crate::token::DeviceKeyTokenSource;
use crate::transport::HubClient;

/// How the device proves its identity to the hub
#[derive(Clone)]
pub enum Credentials {
    /// SAS tokens signed with the device's symmetric key
    SharedAccessKey(DeviceKeyTokenSource),
    /// TLS client certificate registered for the device
    X509(native_tls::Identity),
}

impl Credentials {
    /// Load a certificate identity from a PKCS #12 archive
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self, native_tls::Error> {
        Ok(Credentials::X509(native_tls::Identity::from_pkcs12(
            der, password,
        )?))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::SharedAccessKey(_) => f.write_str("SharedAccessKey"),
            Credentials::X509(_) => f.write_str("X509"),
        }
    }
}

impl From<DeviceKeyTokenSource> for Credentials {
    fn from(token_source: DeviceKeyTokenSource) -> Self {
        Credentials::SharedAccessKey(token_source)
    }
}

/// Client for communicating with IoT hub
///
/// Twin traffic rides an MQTT session opened by [`HubClient::open`], the file
/// upload endpoints are called over HTTPS and do not need the session.
#[derive(Debug)]
pub struct IoTHubClient {
    hub_name: String,
    device_id: String,
    credentials: Credentials,
    http: HttpTransport,
    mqtt: Option<MqttTransport>,
}

impl IoTHubClient {
    /// Create a new IoT Hub device client, no connection is made until it is opened
    ///
    /// # Arguments
    ///
    /// * `hub_name` - The IoT hub hostname
    /// * `device_id` - The registered device to connect as
    /// * `credentials` - Shared access key or certificate for the device
    ///
    /// # Example
    /// ```no_run
    /// use azure_iot_file_upload::{DeviceKeyTokenSource, HubClient, IoTHubClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> azure_iot_file_upload::Result<()> {
    ///     let iothub_hostname = "iothubname.azure-devices.net";
    ///     let device_id = "MyDeviceId";
    ///     let token_source = DeviceKeyTokenSource::new(
    ///         iothub_hostname,
    ///         device_id,
    ///         "O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=",
    ///     )?;
    ///
    ///     let mut client = IoTHubClient::new(iothub_hostname, device_id, token_source.into())?;
    ///     client.open().await?;
    ///     let twin = client.get_twin().await?;
    ///     println!("{:?}", twin.desired);
    ///     client.close().await
    /// }
    /// ```
    pub fn new(
        hub_name: impl Into<String>,
        device_id: impl Into<String>,
        credentials: Credentials,
    ) -> crate::Result<IoTHubClient> {
        let hub_name = hub_name.into();
        let device_id = device_id.into();
        let http = HttpTransport::new(&hub_name, &device_id, credentials.clone())?;

        Ok(Self {
            hub_name,
            device_id,
            credentials,
            http,
            mqtt: None,
        })
    }

    /// The device this client acts as
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn session(&self) -> crate::Result<&MqttTransport> {
        self.mqtt.as_ref().ok_or(IoTHubError::NotConnected)
    }
}

#[async_trait]
impl HubClient for IoTHubClient {
    async fn open(&mut self) -> crate::Result<()> {
        if self.mqtt.is_some() {
            return Ok(());
        }
        info!(
            "Connecting to {} as {} using {:?}",
            self.hub_name, self.device_id, self.credentials
        );
        let transport =
            MqttTransport::connect(&self.hub_name, &self.device_id, &self.credentials).await?;
        self.mqtt = Some(transport);
        Ok(())
    }

    async fn close(&mut self) -> crate::Result<()> {
        match self.mqtt.take() {
            Some(transport) => transport.disconnect().await,
            None => Ok(()),
        }
    }

    async fn get_upload_sas_uri(&self, request: &UploadRequest) -> crate::Result<UploadGrant> {
        self.http.create_file_upload_sas_uri(request).await
    }

    async fn complete_upload(&self, outcome: &UploadOutcome) -> crate::Result<()> {
        self.http.notify_file_upload_status(outcome).await
    }

    async fn desired_property_updates(&mut self) -> crate::Result<Receiver<DesiredProperties>> {
        self.mqtt
            .as_mut()
            .ok_or(IoTHubError::NotConnected)?
            .desired_updates()
            .ok_or_else(|| IoTHubError::Other("desired property updates already taken".into()))
    }

    async fn get_twin(&self) -> crate::Result<Twin> {
        self.session()?.get_twin().await
    }
}
