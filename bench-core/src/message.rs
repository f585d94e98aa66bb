//! Protocol units built from the run configuration
use std::time::Duration;

use bytes::Bytes;
use config::{BenchConfig, ConfigError, ProtocolVersion, QoS, Role, TopicList, WillConfig};

/// CONNECT parameters for the shared connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectMessage {
    pub version: ProtocolVersion,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub will: Option<WillConfig>,
}

impl ConnectMessage {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            version: config.version,
            keep_alive: config.keepalive,
            clean_session: config.clean_session,
            client_id: config.client_id.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            will: config.will.clone(),
        }
    }
}

/// A PUBLISH unit. Cloning is cheap: the payload is reference counted, so a
/// worker keeps one copy and hands a duplicate to the transport per send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

impl PublishMessage {
    /// publishes always target the first topic
    pub fn from_config(config: &BenchConfig) -> Result<Self, ConfigError> {
        let topic = config
            .topics
            .first()
            .ok_or(ConfigError::MissingTopic(Role::Publish))?;
        Ok(Self {
            topic: topic.to_owned(),
            qos: config.qos,
            retain: config.retain,
            payload: config.payload.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicQos {
    pub topic: String,
    pub qos: QoS,
}

/// A SUBSCRIBE unit covering every configured topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeMessage {
    pub filters: Vec<TopicQos>,
}

impl SubscribeMessage {
    /// `None` for an empty topic list; entries keep their order and all get
    /// the same `qos`
    pub fn from_topics(topics: &TopicList, qos: QoS) -> Option<Self> {
        if topics.is_empty() {
            return None;
        }
        Some(Self {
            filters: topics
                .iter()
                .map(|topic| TopicQos {
                    topic: topic.clone(),
                    qos,
                })
                .collect(),
        })
    }
}

/// A PUBLISH delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

impl ReceivedMessage {
    /// release the payload and topic buffers
    pub fn clear(&mut self) {
        self.topic.clear();
        self.payload.clear();
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards. Wildcards in the
/// first level never match topics starting with `$`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_uses_first_topic() {
        let mut config = BenchConfig::new(Role::Publish);
        config.topics = ["first/topic", "second/topic"].into_iter().collect();
        config.qos = QoS::AtLeastOnce;
        config.retain = true;
        config.payload = Bytes::from_static(b"data");

        let msg = PublishMessage::from_config(&config).unwrap();
        assert_eq!(msg.topic, "first/topic");
        assert_eq!(msg.qos, QoS::AtLeastOnce);
        assert!(msg.retain);
        assert_eq!(msg.payload.as_ref(), b"data");
    }

    #[test]
    fn publish_without_topic_fails() {
        let config = BenchConfig::new(Role::Publish);
        assert!(matches!(
            PublishMessage::from_config(&config),
            Err(ConfigError::MissingTopic(Role::Publish))
        ));
    }

    #[test]
    fn subscribe_enumerates_topics_with_shared_qos() {
        let topics: TopicList = ["a/b", "c/d"].into_iter().collect();
        let msg = SubscribeMessage::from_topics(&topics, QoS::AtLeastOnce).unwrap();

        assert_eq!(
            msg.filters,
            vec![
                TopicQos {
                    topic: "a/b".into(),
                    qos: QoS::AtLeastOnce
                },
                TopicQos {
                    topic: "c/d".into(),
                    qos: QoS::AtLeastOnce
                },
            ]
        );
        assert!(SubscribeMessage::from_topics(&TopicList::new(), QoS::AtMostOnce).is_none());
    }

    #[test]
    fn connect_copies_session_settings() {
        let mut config = BenchConfig::new(Role::ConnectOnly);
        config.client_id = "bench".into();
        config.user = Some("user".into());
        config.clean_session = false;

        let msg = ConnectMessage::from_config(&config);
        assert_eq!(msg.client_id, "bench");
        assert_eq!(msg.user.as_deref(), Some("user"));
        assert!(!msg.clean_session);
        assert_eq!(msg.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/c"));
        assert!(topic_matches("a/+", "a/c"));
        assert!(!topic_matches("a/+", "a/c/d"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("a/#", "a/c/d"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("#", "$SYS/uptime"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }
}
