//! In-process transport. No network: the connection is "up" as soon as it is
//! dialed, publishes are counted and echoed to contexts whose subscriptions
//! match. Only the most recent publishes are kept. Used for `--dry-run` and by the tests, which drive it through a
//! [`LoopbackHandle`].
use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use config::QoS;
use tokio::sync::{self, mpsc};
use tracing::{debug, trace};

use crate::message::{
    PublishMessage, ReceivedMessage, SubscribeMessage, TopicQos, topic_matches,
};
use crate::transport::{ConnectionListener, Context, Subscriber, Transport, TransportError};

const INJECTED_FAILURE: &str = "injected failure";

/// Number of publishes kept for inspection through [`LoopbackHandle::published`].
pub const RECENT_PUBLISHED: usize = 64;

#[derive(Default)]
struct State {
    filters: Vec<TopicQos>,
    published: usize,
    recent: VecDeque<PublishMessage>,
    subscribes: Vec<SubscribeMessage>,
    listener: Option<Arc<dyn ConnectionListener>>,
}

struct Shared {
    state: Mutex<State>,
    inbound_tx: mpsc::Sender<ReceivedMessage>,
    inbound_rx: Arc<sync::Mutex<mpsc::Receiver<ReceivedMessage>>>,
    fail_sends: AtomicUsize,
    fail_recvs: AtomicUsize,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `msg` for the contexts if a subscription matches. Returns
    /// whether it was delivered.
    fn deliver(&self, topic: &str, retain: bool, payload: Bytes) -> bool {
        let qos = {
            let state = self.lock();
            match state.filters.iter().find(|f| topic_matches(&f.topic, topic)) {
                Some(filter) => filter.qos,
                None => return false,
            }
        };
        let msg = ReceivedMessage {
            topic: topic.to_owned(),
            qos,
            retain,
            payload,
        };
        match self.inbound_tx.try_send(msg) {
            Ok(()) => true,
            Err(err) => {
                trace!(%err, "loopback receive queue full, dropping message");
                false
            }
        }
    }

    /// consume one pending injected failure, if any
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-process [`Transport`]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    pub fn new(channel_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(channel_size.max(1));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                inbound_tx,
                inbound_rx: Arc::new(sync::Mutex::new(inbound_rx)),
                fail_sends: AtomicUsize::new(0),
                fail_recvs: AtomicUsize::new(0),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// observer/controller that stays valid after the transport is moved
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub struct LoopbackContext {
    shared: Arc<Shared>,
}

#[async_trait]
impl Context for LoopbackContext {
    async fn send(&mut self, msg: PublishMessage) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !self.shared.connected.load(Ordering::Acquire) {
            // a dropped connection never accepts more requests
            std::future::pending::<()>().await;
        }
        if Shared::take_failure(&self.shared.fail_sends) {
            return Err(TransportError::Connection(INJECTED_FAILURE.into()));
        }

        self.shared.deliver(&msg.topic, msg.retain, msg.payload.clone());
        let mut state = self.shared.lock();
        state.published += 1;
        if state.recent.len() == RECENT_PUBLISHED {
            state.recent.pop_front();
        }
        state.recent.push_back(msg);
        Ok(())
    }

    async fn recv(&mut self) -> Result<ReceivedMessage, TransportError> {
        if Shared::take_failure(&self.shared.fail_recvs) {
            return Err(TransportError::Connection(INJECTED_FAILURE.into()));
        }
        self.shared
            .inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

struct LoopbackSubscriber {
    shared: Arc<Shared>,
}

impl Subscriber for LoopbackSubscriber {
    fn try_subscribe(&self, msg: SubscribeMessage) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut state = self.shared.lock();
        state.filters.extend(msg.filters.iter().cloned());
        state.subscribes.push(msg);
        Ok(())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    type Context = LoopbackContext;

    fn open_context(&self) -> Result<Self::Context, TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(LoopbackContext {
            shared: Arc::clone(&self.shared),
        })
    }

    fn dial(&mut self, listener: Arc<dyn ConnectionListener>) -> Result<(), TransportError> {
        {
            let mut state = self.shared.lock();
            if state.listener.is_some() {
                return Err(TransportError::Client("connection already dialed".into()));
            }
            state.listener = Some(Arc::clone(&listener));
        }
        self.shared.connected.store(true, Ordering::Release);
        debug!("loopback connection up");
        listener.on_connect(&LoopbackSubscriber {
            shared: Arc::clone(&self.shared),
        });
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.connected.store(false, Ordering::Release);
        debug!("loopback connection closed");
    }
}

/// Test and dry-run access to a [`LoopbackTransport`]
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

impl LoopbackHandle {
    pub fn published_count(&self) -> usize {
        self.shared.lock().published
    }

    /// the last [`RECENT_PUBLISHED`] publishes, oldest first
    pub fn published(&self) -> Vec<PublishMessage> {
        self.shared.lock().recent.iter().cloned().collect()
    }

    pub fn subscribes(&self) -> Vec<SubscribeMessage> {
        self.shared.lock().subscribes.clone()
    }

    /// Deliver a message as if the broker had sent it. Returns `false` when
    /// no subscription matches or the receive queue is full.
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.shared.deliver(topic, false, payload.into())
    }

    /// Drop the connection. The listener is told once; later sends never
    /// complete and nothing reconnects.
    pub fn disconnect(&self, reason: &str) {
        if !self.shared.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        let listener = self.shared.lock().listener.clone();
        if let Some(listener) = listener {
            listener.on_disconnect(reason);
        }
    }

    /// make the next `n` sends fail with a retryable error
    pub fn fail_sends(&self, n: usize) {
        self.shared.fail_sends.store(n, Ordering::Release);
    }

    /// make the next `n` receives fail with a retryable error
    pub fn fail_recvs(&self, n: usize) {
        self.shared.fail_recvs.store(n, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// QoS granted for `topic`, if any subscription matches
    pub fn subscribed_qos(&self, topic: &str) -> Option<QoS> {
        self.shared
            .lock()
            .filters
            .iter()
            .find(|f| topic_matches(&f.topic, topic))
            .map(|f| f.qos)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        subscribe: Option<SubscribeMessage>,
    }

    impl ConnectionListener for Recorder {
        fn on_connect(&self, subscriber: &dyn Subscriber) {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(msg) = &self.subscribe {
                subscriber.try_subscribe(msg.clone()).unwrap();
            }
        }

        fn on_disconnect(&self, _reason: &str) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn publish(topic: &str) -> PublishMessage {
        PublishMessage {
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: Bytes::from_static(b"hello"),
        }
    }

    #[tokio::test]
    async fn publishes_echo_to_matching_subscriptions() {
        let mut transport = LoopbackTransport::new(16);
        let handle = transport.handle();
        let listener = Arc::new(Recorder {
            subscribe: Some(SubscribeMessage {
                filters: vec![TopicQos {
                    topic: "bench/+".into(),
                    qos: QoS::AtLeastOnce,
                }],
            }),
            ..Recorder::default()
        });
        transport.dial(listener.clone()).unwrap();
        assert_eq!(listener.connects.load(Ordering::SeqCst), 1);
        assert_eq!(handle.subscribes().len(), 1);

        let mut ctx = transport.open_context().unwrap();
        ctx.send(publish("bench/a")).await.unwrap();
        ctx.send(publish("other/a")).await.unwrap();
        assert_eq!(handle.published_count(), 2);

        let received = ctx.recv().await.unwrap();
        assert_eq!(received.topic, "bench/a");
        assert_eq!(received.qos, QoS::AtLeastOnce);
        assert_eq!(handle.subscribed_qos("bench/b"), Some(QoS::AtLeastOnce));
        assert_eq!(handle.subscribed_qos("other/a"), None);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let mut transport = LoopbackTransport::new(16);
        let handle = transport.handle();
        transport.dial(Arc::new(Recorder::default())).unwrap();
        let mut ctx = transport.open_context().unwrap();

        handle.fail_sends(2);
        assert!(matches!(
            ctx.send(publish("a")).await,
            Err(TransportError::Connection(_))
        ));
        assert!(ctx.send(publish("a")).await.is_err());
        ctx.send(publish("a")).await.unwrap();
        assert_eq!(handle.published_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_notifies_once() {
        let mut transport = LoopbackTransport::new(16);
        let handle = transport.handle();
        let listener = Arc::new(Recorder::default());
        transport.dial(listener.clone()).unwrap();

        handle.disconnect("test");
        handle.disconnect("test");
        assert_eq!(listener.disconnects.load(Ordering::SeqCst), 1);
        assert!(!handle.is_connected());
        assert!(matches!(
            transport.dial(listener),
            Err(TransportError::Client(_))
        ));
    }

    #[tokio::test]
    async fn closed_after_shutdown() {
        let mut transport = LoopbackTransport::new(16);
        transport.dial(Arc::new(Recorder::default())).unwrap();
        let mut ctx = transport.open_context().unwrap();
        transport.shutdown().await;

        assert!(matches!(
            ctx.send(publish("a")).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.open_context(),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn publish_record_is_capped() {
        let mut transport = LoopbackTransport::new(16);
        let handle = transport.handle();
        transport.dial(Arc::new(Recorder::default())).unwrap();
        let mut ctx = transport.open_context().unwrap();

        let total = RECENT_PUBLISHED * 3 + 5;
        for i in 0..total {
            ctx.send(publish(&format!("bench/{i}"))).await.unwrap();
        }

        assert_eq!(handle.published_count(), total);
        let recent = handle.published();
        assert_eq!(recent.len(), RECENT_PUBLISHED);
        assert_eq!(recent[0].topic, format!("bench/{}", total - RECENT_PUBLISHED));
        assert_eq!(recent[RECENT_PUBLISHED - 1].topic, format!("bench/{}", total - 1));
    }
}
