//! Device configuration read from the process environment
//!
//! | variable               | used by         |
//! |------------------------|-----------------|
//! | `AUTH_TYPE`            | always          |
//! | `IOT_HUB_CONNSTRING`   | `symmetric_key` |
//! | `IOT_HUB_HOSTNAME`     | `x509`          |
//! | `DEVICE_ID`            | `x509`          |
//! | `CERTIFICATE_PATH`     | `x509`          |
//! | `CERTIFICATE_PASSWORD` | `x509`          |

use std::str::FromStr;

use serde::Deserialize;

use crate::client_builder::{IoTHubClientBuilder, IoTHubClientBuilderInitializedCredentials};
use crate::error::ConfigurationError;
use crate::client::Credentials;
use crate::IoTHubClient;

/// Supported ways for the device to authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// Certificate identity, `x509`
    X509,
    /// Connection string with a shared access key, `symmetric_key`
    SymmetricKey,
}

impl FromStr for AuthType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x509" => Ok(AuthType::X509),
            "symmetric_key" => Ok(AuthType::SymmetricKey),
            other => Err(ConfigurationError::UnknownAuthType(other.to_string())),
        }
    }
}

/// Raw device settings, keyed by the lower cased environment variable names
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Device connection string
    pub iot_hub_connstring: Option<String>,
    /// Hub hostname for certificate authentication
    pub iot_hub_hostname: Option<String>,
    /// Device id for certificate authentication
    pub device_id: Option<String>,
    /// `x509` or `symmetric_key`
    pub auth_type: Option<String>,
    /// PKCS #12 archive holding the device certificate and key
    pub certificate_path: Option<String>,
    /// Password protecting the archive
    pub certificate_password: Option<String>,
}

impl DeviceSettings {
    /// Read settings from the environment
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut source = config::Config::new();
        source.merge(config::Environment::new())?;
        Self::from_config(source)
    }

    /// Read settings from an already assembled configuration
    pub fn from_config(source: config::Config) -> Result<Self, ConfigurationError> {
        Ok(source.try_into()?)
    }

    /// The selected authentication variant
    pub fn auth_type(&self) -> Result<AuthType, ConfigurationError> {
        self.auth_type
            .as_deref()
            .ok_or(ConfigurationError::MissingSetting("AUTH_TYPE"))?
            .parse()
    }

    /// A client builder with hub details and credentials filled in
    pub fn client_builder(
        &self,
    ) -> Result<IoTHubClientBuilder<IoTHubClientBuilderInitializedCredentials>, ConfigurationError>
    {
        let auth_type = self.auth_type()?;
        info!("Auth type: {:?}", auth_type);

        match auth_type {
            AuthType::SymmetricKey => {
                let connection_string = required(&self.iot_hub_connstring, "IOT_HUB_CONNSTRING")?;
                Ok(IoTHubClient::builder().connection_string(connection_string)?)
            }
            AuthType::X509 => {
                let hostname = required(&self.iot_hub_hostname, "IOT_HUB_HOSTNAME")?;
                let device_id = required(&self.device_id, "DEVICE_ID")?;
                let path = required(&self.certificate_path, "CERTIFICATE_PATH")?;
                let password = self.certificate_password.as_deref().unwrap_or_default();

                let der = std::fs::read(path).map_err(|e| ConfigurationError::Certificate {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
                let credentials = Credentials::from_pkcs12(&der, password).map_err(|e| {
                    ConfigurationError::Certificate {
                        path: path.to_string(),
                        reason: e.to_string(),
                    }
                })?;

                Ok(IoTHubClient::builder()
                    .iothub_details(hostname, device_id)
                    .credentials(credentials))
            }
        }
    }
}

fn required<'a>(
    value: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, ConfigurationError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigurationError::MissingSetting(name))
}
