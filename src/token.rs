use std::str::FromStr;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac, NewMac};
use sha2::Sha256;
use thiserror::Error;

const DEVICEID_KEY: &str = "DeviceId";
const HOSTNAME_KEY: &str = "HostName";
const SHAREDACCESSKEY_KEY: &str = "SharedAccessKey";
const SHAREDACCESSKEYNAME_KEY: &str = "SharedAccessKeyName";

const RESOURCE_URI_SET: &percent_encoding::AsciiSet = &percent_encoding::CONTROLS.add(b'/');

/// Errors producing SAS tokens or reading connection strings
#[derive(Debug, Error)]
pub enum TokenError {
    /// Connection string lacks a required component
    #[error("connection string is missing required parameter {0}")]
    MissingParameter(&'static str),
    /// The shared access key is not valid base64
    #[error("shared access key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),
}

/// Source of shared access signatures for authenticating against the hub
pub trait TokenSource {
    /// Produce a token valid until `expiry`
    fn get(&self, expiry: &DateTime<Utc>) -> String;
}

/// Signs tokens for a single device with its symmetric key
#[derive(Debug, Clone)]
pub struct DeviceKeyTokenSource {
    resource_uri: String,
    key: Vec<u8>,
}

impl DeviceKeyTokenSource {
    /// Create a token source for `device_id` on `hub`
    ///
    /// # Example
    /// ```
    /// use azure_iot_file_upload::DeviceKeyTokenSource;
    ///
    /// let token_source = DeviceKeyTokenSource::new(
    ///     "iothubname.azure-devices.net",
    ///     "MyDeviceId",
    ///     "O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=",
    /// ).unwrap();
    /// ```
    pub fn new(hub: &str, device_id: &str, key: &str) -> Result<Self, TokenError> {
        Ok(Self {
            resource_uri: format!("{}/devices/{}", hub, device_id),
            key: base64::decode(key)?,
        })
    }
}

impl From<&DeviceConnectionString> for DeviceKeyTokenSource {
    fn from(conn: &DeviceConnectionString) -> Self {
        Self {
            resource_uri: format!("{}/devices/{}", conn.host_name, conn.device_id),
            key: conn.key.clone(),
        }
    }
}

impl TokenSource for DeviceKeyTokenSource {
    fn get(&self, expiry: &DateTime<Utc>) -> String {
        let sas = generate_sas(&self.resource_uri, &self.key, expiry.timestamp(), None);
        trace!("Using device key token: {}", sas);
        sas
    }
}

/// Signs tokens for a hub-level shared access policy, such as `service`
#[derive(Debug, Clone)]
pub struct ServiceKeyTokenSource {
    host_name: String,
    policy_name: String,
    key: Vec<u8>,
}

impl From<&ServiceConnectionString> for ServiceKeyTokenSource {
    fn from(conn: &ServiceConnectionString) -> Self {
        Self {
            host_name: conn.host_name.clone(),
            policy_name: conn.policy_name.clone(),
            key: conn.key.clone(),
        }
    }
}

impl TokenSource for ServiceKeyTokenSource {
    fn get(&self, expiry: &DateTime<Utc>) -> String {
        generate_sas(
            &self.host_name,
            &self.key,
            expiry.timestamp(),
            Some(&self.policy_name),
        )
    }
}

/// `HostName=...;DeviceId=...;SharedAccessKey=...`
#[derive(Debug, Clone)]
pub struct DeviceConnectionString {
    /// IoT hub hostname
    pub host_name: String,
    /// Registered device identity
    pub device_id: String,
    key: Vec<u8>,
}

impl FromStr for DeviceConnectionString {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut key = None;

        for (name, value) in connection_string_pairs(s) {
            match name {
                HOSTNAME_KEY => host_name = Some(value),
                DEVICEID_KEY => device_id = Some(value),
                SHAREDACCESSKEY_KEY => key = Some(value),
                _ => (), // Ignore extraneous component in the connection string
            }
        }

        Ok(Self {
            host_name: host_name
                .ok_or(TokenError::MissingParameter(HOSTNAME_KEY))?
                .to_string(),
            device_id: device_id
                .ok_or(TokenError::MissingParameter(DEVICEID_KEY))?
                .to_string(),
            key: base64::decode(key.ok_or(TokenError::MissingParameter(SHAREDACCESSKEY_KEY))?)?,
        })
    }
}

/// `HostName=...;SharedAccessKeyName=...;SharedAccessKey=...`
#[derive(Debug, Clone)]
pub struct ServiceConnectionString {
    /// IoT hub hostname
    pub host_name: String,
    /// Shared access policy name
    pub policy_name: String,
    key: Vec<u8>,
}

impl FromStr for ServiceConnectionString {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut policy_name = None;
        let mut key = None;

        for (name, value) in connection_string_pairs(s) {
            match name {
                HOSTNAME_KEY => host_name = Some(value),
                SHAREDACCESSKEYNAME_KEY => policy_name = Some(value),
                SHAREDACCESSKEY_KEY => key = Some(value),
                _ => (),
            }
        }

        Ok(Self {
            host_name: host_name
                .ok_or(TokenError::MissingParameter(HOSTNAME_KEY))?
                .to_string(),
            policy_name: policy_name
                .ok_or(TokenError::MissingParameter(SHAREDACCESSKEYNAME_KEY))?
                .to_string(),
            key: base64::decode(key.ok_or(TokenError::MissingParameter(SHAREDACCESSKEY_KEY))?)?,
        })
    }
}

// Values may carry base64 padding, so only split on the first '='
fn connection_string_pairs(s: &str) -> impl Iterator<Item = (&str, &str)> {
    s.split(';')
        .filter_map(|part| part.split_once('='))
        .map(|(name, value)| (name.trim(), value.trim()))
}

fn generate_sas(resource_uri: &str, key: &[u8], expiry_timestamp: i64, policy: Option<&str>) -> String {
    let resource_uri = percent_encoding::utf8_percent_encode(resource_uri, RESOURCE_URI_SET);
    let to_sign = format!("{}\n{}", resource_uri, expiry_timestamp);

    let mut sas = format!(
        "SharedAccessSignature sr={}&{}&se={}",
        resource_uri,
        generate_token(key, &to_sign),
        expiry_timestamp
    );
    if let Some(policy) = policy {
        sas.push_str("&skn=");
        sas.push_str(policy);
    }
    sas
}

fn generate_token(key: &[u8], message: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_varkey(key).expect("hmac accepts any key length");
    mac.update(message.as_bytes());
    let signature = base64::encode(mac.finalize().into_bytes());

    form_pair("sig", &signature)
}

fn form_pair(name: &str, value: &str) -> String {
    serde_urlencoded::to_string(&[(name, value)][..]).unwrap_or_default()
}
