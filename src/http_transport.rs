use chrono::{Duration, Utc};
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{header, Body, Client, Method, Request};
use hyper_tls::HttpsConnector;
use serde::Serialize;

use crate::client::Credentials;
use crate::error::IoTHubError;
use crate::message::{FileUploadSasUriResponse, UploadGrant, UploadOutcome, UploadRequest};
use crate::token::TokenSource;

const FILE_UPLOAD_API_VERSION: &str = "2020-03-13";

pub(crate) type HttpsClient = Client<HttpsConnector<HttpConnector>>;

/// Build an HTTPS client, presenting `identity` as client certificate when given
pub(crate) fn https_client(identity: Option<&native_tls::Identity>) -> crate::Result<HttpsClient> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.min_protocol_version(Some(native_tls::Protocol::Tlsv12));
    if let Some(identity) = identity {
        builder.identity(identity.clone());
    }
    let tls = tokio_native_tls::TlsConnector::from(builder.build()?);

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    let https = HttpsConnector::from((http, tls));

    Ok(Client::builder().build::<_, Body>(https))
}

/// The file upload endpoints of the hub, which are always reached over HTTPS
/// whatever protocol carries the twin
#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    hub_name: String,
    device_id: String,
    credentials: Credentials,
    client: HttpsClient,
}

impl HttpTransport {
    pub(crate) fn new(
        hub_name: &str,
        device_id: &str,
        credentials: Credentials,
    ) -> crate::Result<Self> {
        let client = match &credentials {
            Credentials::X509(identity) => https_client(Some(identity))?,
            Credentials::SharedAccessKey(_) => https_client(None)?,
        };
        Ok(Self {
            hub_name: hub_name.to_string(),
            device_id: device_id.to_string(),
            credentials,
            client,
        })
    }

    pub(crate) async fn create_file_upload_sas_uri(
        &self,
        request: &UploadRequest,
    ) -> crate::Result<UploadGrant> {
        let uri = format!(
            "https://{}/devices/{}/files?api-version={}",
            self.hub_name, self.device_id, FILE_UPLOAD_API_VERSION
        );
        let body = self.post_json(&uri, request).await?;
        let response: FileUploadSasUriResponse = serde_json::from_slice(&body)?;

        Ok(response.into())
    }

    pub(crate) async fn notify_file_upload_status(
        &self,
        outcome: &UploadOutcome,
    ) -> crate::Result<()> {
        let uri = format!(
            "https://{}/devices/{}/files/notifications?api-version={}",
            self.hub_name, self.device_id, FILE_UPLOAD_API_VERSION
        );
        self.post_json(&uri, outcome).await?;
        Ok(())
    }

    async fn post_json<T: Serialize>(&self, uri: &str, body: &T) -> crate::Result<Bytes> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Credentials::SharedAccessKey(token_source) = &self.credentials {
            let expiry = Utc::now() + Duration::hours(1);
            builder = builder.header(header::AUTHORIZATION, token_source.get(&expiry));
        }
        let req = builder.body(Body::from(serde_json::to_vec(body)?))?;

        debug!("POST {}", uri);
        let res = self.client.request(req).await?;
        let status = res.status();
        let body = hyper::body::to_bytes(res).await?;
        debug!("Response: {}", status);

        if !status.is_success() {
            return Err(IoTHubError::UnexpectedStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(body)
    }
}
