//! File upload notifications read from the hub over AMQP
//!
//! The hub queues one notification per completed upload on
//! `/messages/serviceBound/filenotifications`. Access is granted with SASL
//! PLAIN: the user is `{policy}@sas.root.{hub}` and the password a shared
//! access signature signed with the policy key.

use std::collections::HashMap;
use std::fmt::Display;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::delivery::Delivery;
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::messaging::{AmqpValue, Body};
use fe2o3_amqp::types::primitives::Value;
use fe2o3_amqp::{Connection, Receiver, Session};
use tokio_util::sync::CancellationToken;

use crate::error::IoTHubError;
use crate::listener::FileNotificationReceiver;
use crate::message::FileUploadNotification;
use crate::token::{ServiceConnectionString, ServiceKeyTokenSource, TokenSource};

const AMQPS_PORT: u16 = 5671;
const FILE_NOTIFICATIONS_ADDRESS: &str = "/messages/serviceBound/filenotifications";
const RECEIVER_LINK_NAME: &str = "file-notification-receiver";

type NotificationDelivery = Delivery<Body<Value>>;

fn amqp_error(err: impl Display) -> IoTHubError {
    IoTHubError::AmqpError(err.to_string())
}

/// `{policy}@sas.root.{hub}` where the hub is the first label of the hostname
fn sasl_username(connection: &ServiceConnectionString) -> String {
    let hub_name = connection
        .host_name
        .split('.')
        .next()
        .unwrap_or(&connection.host_name);
    format!("{}@sas.root.{}", connection.policy_name, hub_name)
}

/// Raw JSON carried by a notification message
fn body_bytes(body: &Body<Value>) -> Option<Vec<u8>> {
    match body {
        Body::Data(batch) => Some(
            batch
                .iter()
                .flat_map(|data| data.0.iter().copied())
                .collect(),
        ),
        Body::Value(AmqpValue(Value::Binary(bytes))) => Some(bytes.to_vec()),
        Body::Value(AmqpValue(Value::String(text))) => Some(text.clone().into_bytes()),
        _ => None,
    }
}

/// Receiver link on the hub's file notification queue
///
/// Completing a notification accepts its delivery, abandoning releases it so
/// the hub delivers it again.
pub struct AmqpFileNotificationReceiver {
    connection: ConnectionHandle<()>,
    session: SessionHandle<()>,
    receiver: Receiver,
    unsettled: HashMap<String, NotificationDelivery>,
    delivered: u64,
}

impl std::fmt::Debug for AmqpFileNotificationReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpFileNotificationReceiver")
            .field("unsettled", &self.unsettled.len())
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl AmqpFileNotificationReceiver {
    /// Open a connection to the hub and attach to its file notification queue
    pub async fn connect(connection_string: &ServiceConnectionString) -> crate::Result<Self> {
        let token_source = ServiceKeyTokenSource::from(connection_string);
        let expiry = Utc::now() + Duration::days(1);
        trace!("Generating token that will expire at {}", expiry);

        let url = format!("amqps://{}:{}", connection_string.host_name, AMQPS_PORT);
        let mut connection = Connection::builder()
            .container_id(format!("file-notifications-{}", std::process::id()))
            .sasl_profile(SaslProfile::Plain {
                username: sasl_username(connection_string),
                password: token_source.get(&expiry),
            })
            .open(url.as_str())
            .await
            .map_err(amqp_error)?;
        debug!("Opened AMQP connection to {}", connection_string.host_name);

        let mut session = Session::begin(&mut connection)
            .await
            .map_err(amqp_error)?;
        let receiver = Receiver::attach(&mut session, RECEIVER_LINK_NAME, FILE_NOTIFICATIONS_ADDRESS)
            .await
            .map_err(amqp_error)?;
        info!("Attached to {}", FILE_NOTIFICATIONS_ADDRESS);

        Ok(Self {
            connection,
            session,
            receiver,
            unsettled: HashMap::new(),
            delivered: 0,
        })
    }

    /// Detach the link and close the connection
    ///
    /// Notifications still unsettled go back to the queue.
    pub async fn close(mut self) -> crate::Result<()> {
        if !self.unsettled.is_empty() {
            warn!(
                "Closing with {} unsettled file upload notifications",
                self.unsettled.len()
            );
        }
        self.receiver.close().await.map_err(amqp_error)?;
        self.session.end().await.map_err(amqp_error)?;
        self.connection.close().await.map_err(amqp_error)?;
        debug!("Closed AMQP connection");
        Ok(())
    }

    fn take_delivery(
        &mut self,
        notification: &FileUploadNotification,
    ) -> crate::Result<NotificationDelivery> {
        self.unsettled
            .remove(&notification.lock_token)
            .ok_or_else(|| {
                IoTHubError::Other(format!(
                    "no unsettled delivery for lock token '{}'",
                    notification.lock_token
                ))
            })
    }
}

#[async_trait]
impl FileNotificationReceiver for AmqpFileNotificationReceiver {
    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> crate::Result<Option<FileUploadNotification>> {
        let delivery: NotificationDelivery = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            delivery = self.receiver.recv::<Body<Value>>() => delivery.map_err(amqp_error)?,
        };

        let notification = body_bytes(delivery.body())
            .ok_or_else(|| "unexpected message body".to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<FileUploadNotification>(&bytes).map_err(|e| e.to_string())
            });
        let notification = match notification {
            Ok(notification) => notification,
            Err(reason) => {
                // Redelivering would fail the same way
                warn!("Dropping malformed file upload notification: {}", reason);
                self.receiver.accept(&delivery).await.map_err(amqp_error)?;
                return Ok(None);
            }
        };

        self.delivered += 1;
        let lock_token = self.delivered.to_string();
        self.unsettled.insert(lock_token.clone(), delivery);
        Ok(Some(notification.with_lock_token(lock_token)))
    }

    async fn complete(
        &mut self,
        notification: &FileUploadNotification,
        _cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let delivery = self.take_delivery(notification)?;
        self.receiver.accept(&delivery).await.map_err(amqp_error)
    }

    async fn abandon(
        &mut self,
        notification: &FileUploadNotification,
        _cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let delivery = self.take_delivery(notification)?;
        self.receiver.release(&delivery).await.map_err(amqp_error)
    }
}
