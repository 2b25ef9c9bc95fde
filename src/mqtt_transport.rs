use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::{AbortHandle, Abortable};
use mqtt::control::variable_header::ConnectReturnCode;
use mqtt::packet::*;
use mqtt::{Encodable, QualityOfService, TopicFilter, TopicName};
use tokio::io::AsyncWriteExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::{oneshot, Mutex};
use tokio::time;
use tokio_native_tls::{TlsConnector, TlsStream};

use crate::client::Credentials;
use crate::error::IoTHubError;
use crate::message::{DesiredProperties, Twin};
use crate::token::TokenSource;

// Incoming topic names
const TWIN_RESPONSE_TOPIC_FILTER: &str = "$iothub/twin/res/#";
const TWIN_RESPONSE_TOPIC_PREFIX: &str = "$iothub/twin/res/";
const TWIN_PATCH_TOPIC_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";
const TWIN_PATCH_TOPIC_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";

// Outgoing topic names
fn twin_get_topic(request_id: &str) -> String {
    format!("$iothub/twin/GET/?$rid={}", request_id)
}

const MQTT_PORT: u16 = 8883;
const KEEP_ALIVE: u16 = 30;
const API_VERSION: &str = "2018-06-30";
const DESIRED_UPDATES_CAPACITY: usize = 8;

type PendingTwinRequests = Arc<Mutex<HashMap<String, oneshot::Sender<TwinResponse>>>>;

#[derive(Debug)]
struct TwinResponse {
    status: u16,
    body: Vec<u8>,
}

fn mqtt_error(err: impl std::fmt::Debug) -> IoTHubError {
    IoTHubError::MqttError(format!("{:?}", err))
}

async fn tcp_connect(
    iot_hub: &str,
    credentials: &Credentials,
) -> crate::Result<TlsStream<TcpStream>> {
    let socket = TcpStream::connect((iot_hub, MQTT_PORT)).await?;

    trace!("Connected to tcp socket {:?}", socket);

    let mut builder = native_tls::TlsConnector::builder();
    builder.min_protocol_version(Some(native_tls::Protocol::Tlsv12));
    if let Credentials::X509(identity) = credentials {
        builder.identity(identity.clone());
    }
    let cx = TlsConnector::from(builder.build()?);

    let socket = cx.connect(iot_hub, socket).await?;

    trace!("Connected tls context {:?}", cx);

    Ok(socket)
}

async fn mqtt_connect(
    iot_hub: &str,
    device_id: &str,
    credentials: &Credentials,
) -> crate::Result<TlsStream<TcpStream>> {
    let mut socket = tcp_connect(iot_hub, credentials).await?;

    let mut conn = ConnectPacket::new(device_id);
    conn.set_client_identifier(device_id);
    conn.set_clean_session(false);
    conn.set_keep_alive(KEEP_ALIVE);
    conn.set_user_name(Some(format!(
        "{}/{}/?api-version={}",
        iot_hub, device_id, API_VERSION
    )));
    // Certificate identities authenticate in the TLS handshake
    if let Credentials::SharedAccessKey(token_source) = credentials {
        let expiry = Utc::now() + Duration::days(1);
        trace!("Generating token that will expire at {}", expiry);
        conn.set_password(Some(token_source.get(&expiry)));
    }

    let mut buf = Vec::new();
    conn.encode(&mut buf).map_err(mqtt_error)?;
    socket.write_all(&buf[..]).await?;

    let packet = VariablePacket::parse(&mut socket).await;

    trace!("PACKET {:?}", packet);
    match packet {
        Ok(VariablePacket::ConnackPacket(connack)) => {
            if connack.connect_return_code() != ConnectReturnCode::ConnectionAccepted {
                Err(IoTHubError::MqttError(format!(
                    "Failed to connect to server, return code {:?}",
                    connack.connect_return_code()
                )))
            } else {
                Ok(())
            }
        }
        Ok(pck) => Err(IoTHubError::MqttError(format!(
            "Unexpected packet received after connect {:?}",
            pck
        ))),
        Err(err) => Err(IoTHubError::MqttError(format!(
            "Error decoding connack packet {:?}",
            err
        ))),
    }?;

    Ok(socket)
}

/// MQTT session carrying the device twin topics
#[derive(Debug)]
pub(crate) struct MqttTransport {
    write_socket: Arc<Mutex<WriteHalf<TlsStream<TcpStream>>>>,
    pending_twin_requests: PendingTwinRequests,
    desired_updates: Option<Receiver<DesiredProperties>>,
    next_request_id: AtomicU32,
    rx_loop_handle: AbortHandle,
    ping_loop_handle: AbortHandle,
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.rx_loop_handle.abort();
        self.ping_loop_handle.abort();
    }
}

impl MqttTransport {
    pub(crate) async fn connect(
        hub_name: &str,
        device_id: &str,
        credentials: &Credentials,
    ) -> crate::Result<MqttTransport> {
        let socket = mqtt_connect(hub_name, device_id, credentials).await?;
        let (read_socket, write_socket) = tokio::io::split(socket);
        let write_socket = Arc::new(Mutex::new(write_socket));

        let pending_twin_requests = PendingTwinRequests::default();
        let (desired_tx, desired_rx) = channel(DESIRED_UPDATES_CAPACITY);

        let (rx_loop_handle, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(
            receive_loop(read_socket, pending_twin_requests.clone(), desired_tx),
            registration,
        ));

        let (ping_loop_handle, registration) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(
            ping_loop(write_socket.clone()),
            registration,
        ));

        let transport = Self {
            write_socket,
            pending_twin_requests,
            desired_updates: Some(desired_rx),
            next_request_id: AtomicU32::new(0),
            rx_loop_handle,
            ping_loop_handle,
        };
        transport.subscribe().await?;

        Ok(transport)
    }

    /// Hand out the desired property stream, only one subscriber is supported
    pub(crate) fn desired_updates(&mut self) -> Option<Receiver<DesiredProperties>> {
        self.desired_updates.take()
    }

    pub(crate) async fn get_twin(&self) -> crate::Result<Twin> {
        let request_id = self
            .next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        trace!("Requesting device twin with rid = {}", request_id);

        let (tx, rx) = oneshot::channel();
        self.pending_twin_requests
            .lock()
            .await
            .insert(request_id.clone(), tx);

        // Empty publish so hub will respond with device twin data
        let packet = PublishPacket::new(
            TopicName::new(twin_get_topic(&request_id)).map_err(mqtt_error)?,
            QoSWithPacketIdentifier::Level0,
            Vec::new(),
        );
        if let Err(err) = self.send(&packet).await {
            self.pending_twin_requests.lock().await.remove(&request_id);
            return Err(err);
        }

        let response = rx
            .await
            .map_err(|_| IoTHubError::MqttError("connection closed before twin response".into()))?;
        if response.status != 200 {
            return Err(IoTHubError::UnexpectedStatus {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&response.body)?)
    }

    pub(crate) async fn disconnect(&self) -> crate::Result<()> {
        info!("Sending DISCONNECT to broker");
        self.send(&DisconnectPacket::new()).await?;
        self.rx_loop_handle.abort();
        self.ping_loop_handle.abort();
        Ok(())
    }

    async fn subscribe(&self) -> crate::Result<()> {
        let topics = vec![
            (
                TopicFilter::new(TWIN_RESPONSE_TOPIC_FILTER).map_err(mqtt_error)?,
                QualityOfService::Level0,
            ),
            (
                TopicFilter::new(TWIN_PATCH_TOPIC_FILTER).map_err(mqtt_error)?,
                QualityOfService::Level0,
            ),
        ];

        trace!("Subscribing to {:?}", topics);

        self.send(&SubscribePacket::new(10, topics)).await
    }

    async fn send<P: Encodable>(&self, packet: &P) -> crate::Result<()>
    where
        P: std::fmt::Debug,
    {
        trace!("Sending {:?}", packet);
        let mut buf = Vec::new();
        packet.encode(&mut buf).map_err(mqtt_error)?;
        self.write_socket
            .lock()
            .await
            .write_all(&buf[..])
            .await
            .map_err(|e| e.into())
    }
}

async fn ping_loop(write_socket: Arc<Mutex<WriteHalf<TlsStream<TcpStream>>>>) {
    let mut interval = time::interval(time::Duration::from_secs(u64::from(KEEP_ALIVE / 2)));
    // First tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;

        debug!("Sending PINGREQ to broker");
        let mut buf = Vec::new();
        if let Err(err) = PingreqPacket::new().encode(&mut buf) {
            error!("Failed to encode PINGREQ {:?}", err);
            break;
        }
        if let Err(err) = write_socket.lock().await.write_all(&buf).await {
            error!("Failed to send PINGREQ {}", err);
            break;
        }
    }
}

async fn receive_loop(
    mut read_socket: ReadHalf<TlsStream<TcpStream>>,
    pending_twin_requests: PendingTwinRequests,
    desired_tx: Sender<DesiredProperties>,
) {
    loop {
        let packet = match VariablePacket::parse(&mut read_socket).await {
            Ok(pk) => pk,
            Err(err) => {
                // The stream is unusable after a decode failure
                error!("Error in receiving packet {:?}", err);
                break;
            }
        };

        trace!("Received PACKET {:?}", packet);
        match packet {
            VariablePacket::PingrespPacket(..) => {
                debug!("Receiving PINGRESP from broker ..");
            }
            VariablePacket::SubackPacket(ref ack) => {
                debug!("Subscriptions acknowledged {:?}", ack);
            }
            VariablePacket::PublishPacket(ref publ) => {
                let payload = publ.payload_ref()[..].to_vec();
                dispatch_publish(publ.topic_name(), payload, &pending_twin_requests, &desired_tx)
                    .await;
            }
            _ => {}
        }
    }

    // Wake any caller still waiting on a twin response
    pending_twin_requests.lock().await.clear();
}

/// Route one incoming publish to its twin request or the desired property stream
///
/// Never waits on the desired property subscriber, twin responses share this loop.
async fn dispatch_publish(
    topic: &str,
    payload: Vec<u8>,
    pending_twin_requests: &PendingTwinRequests,
    desired_tx: &Sender<DesiredProperties>,
) {
    if let Some(details) = topic.strip_prefix(TWIN_RESPONSE_TOPIC_PREFIX) {
        match parse_twin_response_topic(details) {
            Some((status, request_id)) => {
                let waiter = pending_twin_requests.lock().await.remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(TwinResponse {
                            status,
                            body: payload,
                        });
                    }
                    None => debug!("No twin request waiting on rid = {}", request_id),
                }
            }
            None => warn!("Unrecognised twin response topic {}", topic),
        }
        return;
    }

    if topic.starts_with(TWIN_PATCH_TOPIC_PREFIX) {
        match serde_json::from_slice::<DesiredProperties>(&payload) {
            Ok(desired) => match desired_tx.try_send(desired) {
                Ok(()) => {}
                Err(TrySendError::Full(desired)) => warn!(
                    "Desired property subscriber is behind, dropping patch version {:?}",
                    desired.version()
                ),
                Err(TrySendError::Closed(_)) => {
                    debug!("No desired property subscriber, dropping patch")
                }
            },
            Err(err) => warn!("Ignoring malformed desired property patch: {}", err),
        }
        return;
    }

    debug!("Ignoring publish on {}", topic);
}

/// Split `{status}/?$rid={request id}` into its parts
fn parse_twin_response_topic(details: &str) -> Option<(u16, String)> {
    let (status, query) = details.split_once('/')?;
    let status = status.parse().ok()?;
    let params =
        serde_urlencoded::from_str::<Vec<(String, String)>>(query.trim_start_matches('?')).ok()?;
    let request_id = params
        .into_iter()
        .find(|(key, _)| key == "$rid")
        .map(|(_, value)| value)?;
    Some((status, request_id))
}
