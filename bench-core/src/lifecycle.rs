//! Connection lifecycle callbacks for the shared connection
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info, warn};

use config::{BenchConfig, Role};

use crate::{
    message::SubscribeMessage,
    transport::{ConnectionListener, Subscriber},
};

/// Subscribes on connect for subscribe runs; only logs otherwise. A lost
/// connection is logged and nothing else: workers keep waiting on it.
#[derive(Debug)]
pub struct ConnectionHandler {
    subscribe: Option<SubscribeMessage>,
    connected: AtomicBool,
    connects: AtomicU64,
}

impl ConnectionHandler {
    pub fn new(config: &BenchConfig) -> Self {
        let subscribe = match config.role {
            Role::Subscribe => SubscribeMessage::from_topics(&config.topics, config.qos),
            Role::Publish | Role::ConnectOnly => None,
        };
        Self {
            subscribe,
            connected: AtomicBool::new(false),
            connects: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// number of CONNACKs seen
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Acquire)
    }
}

impl ConnectionListener for ConnectionHandler {
    fn on_connect(&self, subscriber: &dyn Subscriber) {
        self.connected.store(true, Ordering::Release);
        self.connects.fetch_add(1, Ordering::AcqRel);
        info!("connected to broker");

        let Some(msg) = &self.subscribe else {
            return;
        };
        let topics = msg.filters.len();
        match subscriber.try_subscribe(msg.clone()) {
            Ok(()) => debug!(topics, "subscribe submitted"),
            Err(err) => debug!(topics, error = %err, "subscribe not submitted"),
        }
    }

    fn on_disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::Release);
        warn!(reason, "disconnected from broker, not reconnecting");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use config::QoS;
    use tracing_test::traced_test;

    use crate::message::TopicQos;
    use crate::transport::TransportError;

    use super::*;

    #[derive(Default)]
    struct RecordingSubscriber {
        fail: bool,
        seen: Mutex<Vec<SubscribeMessage>>,
    }

    impl Subscriber for RecordingSubscriber {
        fn try_subscribe(&self, msg: SubscribeMessage) -> Result<(), TransportError> {
            self.seen.lock().unwrap().push(msg);
            if self.fail {
                return Err(TransportError::Client("request queue full".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn subscribe_role_subscribes_all_topics() {
        let mut config = BenchConfig::new(Role::Subscribe);
        config.topics = ["a/b", "c/d"].into_iter().collect();
        config.qos = QoS::AtLeastOnce;
        let handler = ConnectionHandler::new(&config);
        let subscriber = RecordingSubscriber::default();

        handler.on_connect(&subscriber);

        let seen = subscriber.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].filters,
            vec![
                TopicQos {
                    topic: "a/b".into(),
                    qos: QoS::AtLeastOnce
                },
                TopicQos {
                    topic: "c/d".into(),
                    qos: QoS::AtLeastOnce
                }
            ]
        );
        assert!(handler.is_connected());
    }

    #[test]
    fn other_roles_do_nothing_on_connect() {
        for role in [Role::Publish, Role::ConnectOnly] {
            let mut config = BenchConfig::new(role);
            config.topics = ["a/b"].into_iter().collect();
            let handler = ConnectionHandler::new(&config);
            let subscriber = RecordingSubscriber::default();

            handler.on_connect(&subscriber);
            assert!(subscriber.seen.lock().unwrap().is_empty());
            assert_eq!(handler.connects(), 1);
        }
    }

    #[test]
    #[traced_test]
    fn subscribe_failure_is_swallowed() {
        let mut config = BenchConfig::new(Role::Subscribe);
        config.topics = ["a/b"].into_iter().collect();
        let handler = ConnectionHandler::new(&config);
        let subscriber = RecordingSubscriber {
            fail: true,
            ..RecordingSubscriber::default()
        };

        handler.on_connect(&subscriber);
        assert!(logs_contain("subscribe not submitted"));
    }

    #[test]
    #[traced_test]
    fn disconnect_is_logged() {
        let handler = ConnectionHandler::new(&BenchConfig::new(Role::ConnectOnly));
        handler.on_connect(&RecordingSubscriber::default());
        handler.on_disconnect("connection reset");

        assert!(!handler.is_connected());
        assert!(logs_contain("not reconnecting"));
    }
}
