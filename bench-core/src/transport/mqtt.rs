//! MQTT transport backed by `rumqttc`.
//!
//! One `AsyncClient`/`EventLoop` pair is the shared connection. Every context
//! clones the client for sends and pulls received PUBLISHes from one shared
//! queue, so each incoming message is handed to exactly one context. The
//! event loop runs in its own task and reports connection edges to the
//! registered listener. Once the event loop stops, sends never complete.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    SubscribeFilter,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use config::{BrokerAddr, ProtocolVersion, QoS, TlsMaterial};

use crate::message::{ConnectMessage, PublishMessage, ReceivedMessage, SubscribeMessage};
use crate::transport::{ConnectionListener, Context, Subscriber, Transport, TransportError};

/// Base delay for retrying the initial connection.
const CONNECT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for retry backoff during the initial connection.
const MAX_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How long shutdown waits for the DISCONNECT to be flushed.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type Inbound = Arc<Mutex<mpsc::Receiver<ReceivedMessage>>>;

pub struct MqttTransport {
    broker: BrokerAddr,
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    inbound_tx: mpsc::Sender<ReceivedMessage>,
    inbound_rx: Inbound,
    cancel: CancellationToken,
    lost: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MqttTransport {
    /// Build the connection without dialing. `channel_size` bounds both the
    /// client request queue and the shared receive queue.
    pub fn new(
        connect: &ConnectMessage,
        broker: &BrokerAddr,
        tls: Option<&TlsMaterial>,
        channel_size: usize,
    ) -> Result<Self, TransportError> {
        let options = mqtt_options(connect, broker, tls)?;
        let channel_size = channel_size.max(1);
        let (client, eventloop) = AsyncClient::new(options, channel_size);
        let (inbound_tx, inbound_rx) = mpsc::channel(channel_size);

        Ok(Self {
            broker: broker.clone(),
            client,
            eventloop: Some(eventloop),
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            cancel: CancellationToken::new(),
            lost: CancellationToken::new(),
            task: None,
        })
    }
}

fn mqtt_options(
    connect: &ConnectMessage,
    broker: &BrokerAddr,
    tls: Option<&TlsMaterial>,
) -> Result<MqttOptions, TransportError> {
    if connect.version != ProtocolVersion::V311 {
        return Err(TransportError::Unsupported(
            "only MQTT 3.1.1 (-V 4) is supported".into(),
        ));
    }
    if connect.client_id.is_empty() || connect.client_id.starts_with(' ') {
        return Err(TransportError::Unsupported(
            "client id must be non-empty and not start with a space".into(),
        ));
    }

    let mut options = MqttOptions::new(connect.client_id.clone(), broker.host.clone(), broker.port);
    options.set_keep_alive(connect.keep_alive);
    options.set_clean_session(connect.clean_session);

    match (&connect.user, &connect.password) {
        (Some(user), password) => {
            options.set_credentials(user.clone(), password.clone().unwrap_or_default());
        }
        (None, Some(_)) => warn!("password without user name is not sent"),
        (None, None) => {}
    }

    if let Some(will) = &connect.will {
        options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.to_vec(),
            to_mqtt_qos(will.qos),
            will.retain,
        ));
    }

    if broker.is_tls() || tls.is_some() {
        options.set_transport(tls_transport(tls)?);
    }

    Ok(options)
}

fn tls_transport(tls: Option<&TlsMaterial>) -> Result<rumqttc::Transport, TransportError> {
    let Some(tls) = tls else {
        return Ok(rumqttc::Transport::tls_with_default_config());
    };
    if tls.key_password.is_some() {
        return Err(TransportError::Unsupported(
            "encrypted private keys (--keypass)".into(),
        ));
    }

    let client_auth = match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
        _ => None,
    };
    match (&tls.ca, client_auth) {
        (Some(ca), client_auth) => Ok(rumqttc::Transport::tls(ca.clone(), client_auth, None)),
        (None, None) => Ok(rumqttc::Transport::tls_with_default_config()),
        (None, Some(_)) => Err(TransportError::Tls(
            "client certificates require --cacert".into(),
        )),
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn client_error(err: rumqttc::ClientError) -> TransportError {
    TransportError::Client(err.to_string())
}

#[derive(Debug)]
pub struct MqttContext {
    client: AsyncClient,
    inbound: Inbound,
    /// tripped when the event loop stops polling
    lost: CancellationToken,
}

impl MqttContext {
    /// park a send on a connection that is gone, like an unacknowledged
    /// request would
    async fn stall(&self) -> Result<(), TransportError> {
        trace!("connection lost, send stalled");
        std::future::pending().await
    }
}

#[async_trait]
impl Context for MqttContext {
    async fn send(&mut self, msg: PublishMessage) -> Result<(), TransportError> {
        if self.lost.is_cancelled() {
            return self.stall().await;
        }
        match self
            .client
            .publish_bytes(msg.topic, to_mqtt_qos(msg.qos), msg.retain, msg.payload)
            .await
        {
            Ok(()) => Ok(()),
            // the request channel closes once the event loop is dropped
            Err(_) if self.lost.is_cancelled() => self.stall().await,
            Err(err) => Err(client_error(err)),
        }
    }

    async fn recv(&mut self) -> Result<ReceivedMessage, TransportError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

struct MqttSubscriber(AsyncClient);

impl Subscriber for MqttSubscriber {
    fn try_subscribe(&self, msg: SubscribeMessage) -> Result<(), TransportError> {
        let filters = msg
            .filters
            .into_iter()
            .map(|entry| SubscribeFilter::new(entry.topic, to_mqtt_qos(entry.qos)))
            .collect::<Vec<_>>();
        self.0.try_subscribe_many(filters).map_err(client_error)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    type Context = MqttContext;

    fn open_context(&self) -> Result<Self::Context, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Ok(MqttContext {
            client: self.client.clone(),
            inbound: Arc::clone(&self.inbound_rx),
            lost: self.lost.clone(),
        })
    }

    fn dial(&mut self, listener: Arc<dyn ConnectionListener>) -> Result<(), TransportError> {
        let eventloop = self
            .eventloop
            .take()
            .ok_or_else(|| TransportError::Client("connection already dialed".into()))?;

        info!(broker = %self.broker, "dialing broker");
        self.task = Some(tokio::spawn(drive(
            eventloop,
            MqttSubscriber(self.client.clone()),
            self.inbound_tx.clone(),
            listener,
            self.cancel.clone(),
            self.lost.clone(),
        )));
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.client.try_disconnect() {
            debug!(%err, "disconnect request not queued");
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                debug!("event loop did not finish after disconnect, cancelling");
                self.cancel.cancel();
                if let Err(err) = task.await {
                    error!(?err, "event loop task failed");
                }
            }
        }
        self.cancel.cancel();
    }
}

/// Poll the event loop until shutdown or until an established connection is
/// lost. Failures before the first CONNACK are retried with backoff; a lost
/// connection is reported and not re-established. `lost` is tripped before
/// the event loop is dropped.
async fn drive(
    mut eventloop: EventLoop,
    subscriber: MqttSubscriber,
    inbound: mpsc::Sender<ReceivedMessage>,
    listener: Arc<dyn ConnectionListener>,
    cancel: CancellationToken,
    lost: CancellationToken,
) {
    let mut connected = false;
    let mut attempt: u32 = 0;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connected = true;
                attempt = 0;
                debug!(session_present = ack.session_present, "CONNACK received");
                listener.on_connect(&subscriber);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = ReceivedMessage {
                    topic: publish.topic,
                    qos: from_mqtt_qos(publish.qos),
                    retain: publish.retain,
                    payload: publish.payload,
                };
                if inbound.send(msg).await.is_err() {
                    debug!("receive queue closed, stopping event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                listener.on_disconnect("broker sent DISCONNECT");
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                break;
            }
            Ok(event) => trace!(?event, "mqtt event"),
            Err(err) if !connected => {
                let delay = CONNECT_RETRY_BASE_DELAY
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(MAX_CONNECT_RETRY_DELAY);
                attempt = attempt.saturating_add(1);
                if is_fatal_connect_error(&err) {
                    error!(error = %err, "connection attempt failed");
                } else {
                    warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "connection attempt failed, retrying"
                    );
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                listener.on_disconnect(&err.to_string());
                break;
            }
        }
    }
    lost.cancel();
    drop(eventloop);
}

/// refusals that are unlikely to clear up on their own
fn is_fatal_connect_error(err: &ConnectionError) -> bool {
    matches!(
        err,
        ConnectionError::ConnectionRefused(_) | ConnectionError::Tls(_)
    )
}
