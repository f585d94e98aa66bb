//! # config
//!
//! Run configuration for mqtt-bench: command line definition, the validated
//! [`BenchConfig`] the engine consumes, and the [`TopicList`] it publishes to
//! or subscribes from. A `BenchConfig` is built once, validated, and then
//! shared read-only behind an `Arc` by every worker.
use std::{fmt, path::Path, time::Duration};

use bytes::Bytes;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod cli;
pub mod error;
pub mod load;
pub mod qos;
pub mod topic;
pub mod url;

pub use error::ConfigError;
pub use qos::{ProtocolVersion, QoS};
pub use topic::TopicList;
pub use url::{BrokerAddr, Scheme};

use cli::{Cli, ClientArgs};
use load::load_file;

/// prefix of generated client identifiers
pub const CLIENT_ID_PREFIX: &str = "mqtt-bench-";

/// What every worker of a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Publish,
    Subscribe,
    ConnectOnly,
}

impl fmt::Display for Role {
    /// formats as the subcommand name
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Publish => "pub",
            Self::Subscribe => "sub",
            Self::ConnectOnly => "conn",
        })
    }
}

/// Last will registered with the broker in CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillConfig {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Certificate material already read from disk
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca: Option<Vec<u8>>,
    pub cert: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub key_password: Option<String>,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca", &self.ca.as_ref().map(Vec::len))
            .field("cert", &self.cert.as_ref().map(Vec::len))
            .field("key", &self.key.is_some())
            .field("key_password", &self.key_password.is_some())
            .finish()
    }
}

/// Backoff applied to failed transport sends and receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: cli::DEFAULT_RETRIES,
            base_delay: Duration::from_millis(cli::DEFAULT_RETRY_BASE_MS),
        }
    }
}

/// Validated benchmark configuration. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub role: Role,
    pub verbose: bool,
    pub parallel: usize,
    /// 0 means unbounded
    pub msg_count: u64,
    /// configured publish interval, see [`BenchConfig::effective_interval`]
    pub interval: Duration,
    pub version: ProtocolVersion,
    pub broker: BrokerAddr,
    pub topics: TopicList,
    pub qos: QoS,
    pub retain: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keepalive: Duration,
    pub clean_session: bool,
    pub will: Option<WillConfig>,
    pub payload: Bytes,
    pub tls: Option<TlsMaterial>,
    pub sample_interval: Duration,
    pub retry: RetrySettings,
    pub channel_size: usize,
    pub json: bool,
    pub dry_run: bool,
}

impl BenchConfig {
    /// Config with the command line defaults for `role`. Topics and payload
    /// are empty, so publish and subscribe configs must be filled in before
    /// [`validate`](Self::validate) passes.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            verbose: false,
            parallel: 1,
            msg_count: 0,
            interval: Duration::ZERO,
            version: ProtocolVersion::default(),
            broker: BrokerAddr::default(),
            topics: TopicList::new(),
            qos: QoS::default(),
            retain: false,
            user: None,
            password: None,
            client_id: random_client_id(),
            keepalive: Duration::from_secs(u64::from(cli::DEFAULT_KEEPALIVE)),
            clean_session: true,
            will: None,
            payload: Bytes::new(),
            tls: None,
            sample_interval: Duration::from_millis(cli::DEFAULT_SAMPLE_INTERVAL_MS),
            retry: RetrySettings::default(),
            channel_size: cli::DEFAULT_CHANNEL_SIZE,
            json: false,
            dry_run: false,
        }
    }

    /// is there a finite message budget?
    pub fn is_bounded(&self) -> bool {
        self.msg_count > 0
    }

    /// Interval actually used between publishes. A bounded run configured
    /// with no interval is floored to 1ms so that resubmission cannot spin
    /// the runtime; unbounded runs keep 0 and publish as fast as possible.
    pub fn effective_interval(&self) -> Duration {
        if self.interval.is_zero() && self.is_bounded() {
            Duration::from_millis(1)
        } else {
            self.interval
        }
    }

    /// Check the requirements of the configured role
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 {
            return Err(ConfigError::InvalidParallelism);
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::InvalidSampleInterval);
        }
        match self.role {
            Role::Publish => {
                if self.topics.is_empty() {
                    return Err(ConfigError::MissingTopic(self.role));
                }
                if self.payload.is_empty() {
                    return Err(ConfigError::MissingPayload);
                }
            }
            Role::Subscribe => {
                if self.topics.is_empty() {
                    return Err(ConfigError::MissingTopic(self.role));
                }
            }
            Role::ConnectOnly => {}
        }
        Ok(())
    }
}

impl TryFrom<Cli> for BenchConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let role = cli.command.role();
        let args = cli.command.args();

        let mut config = Self::from_args(role, args)?;
        config.sample_interval = Duration::from_millis(cli.sample_interval_ms);
        config.retry = RetrySettings {
            max_retries: cli.retries,
            base_delay: Duration::from_millis(cli.retry_base_ms),
        };
        config.channel_size = cli.channel_size.max(1);
        config.json = cli.json;
        config.dry_run = cli.dry_run;

        config.validate()?;
        debug!(
            role = %config.role,
            broker = %config.broker,
            parallel = config.parallel,
            msg_count = config.msg_count,
            "built run configuration"
        );
        Ok(config)
    }
}

impl BenchConfig {
    fn from_args(role: Role, args: &ClientArgs) -> Result<Self, ConfigError> {
        let mut config = Self::new(role);

        config.verbose = args.verbose;
        config.parallel = args.parallel;
        config.version = ProtocolVersion::try_from(args.version)?;
        config.broker = args.url.parse()?;
        config.qos = QoS::try_from(args.qos)?;
        config.retain = args.retain;
        config.user = args.user.clone();
        config.password = args.password.clone();
        if let Some(id) = &args.id {
            config.client_id = id.clone();
        }
        config.keepalive = Duration::from_secs(u64::from(args.keepalive));
        config.clean_session = args.clean_session;
        config.will = will_from_args(args)?;
        config.tls = tls_from_args(args)?;

        // connect-only clients never publish or subscribe
        if role != Role::ConnectOnly {
            config.topics = args.topic.iter().cloned().collect();
        }
        if role == Role::Publish {
            config.msg_count = args.count;
            config.interval = Duration::from_millis(args.interval);
            config.payload = payload_from_args(args)?;
        }

        Ok(config)
    }
}

fn will_from_args(args: &ClientArgs) -> Result<Option<WillConfig>, ConfigError> {
    let qos = QoS::try_from(args.will_qos)?;
    match (&args.will_topic, &args.will_msg) {
        (Some(topic), msg) => Ok(Some(WillConfig {
            topic: topic.clone(),
            payload: msg
                .as_ref()
                .map(|msg| Bytes::from(msg.clone().into_bytes()))
                .unwrap_or_default(),
            qos,
            retain: args.will_retain,
        })),
        (None, Some(_)) => Err(ConfigError::WillWithoutTopic),
        (None, None) => Ok(None),
    }
}

fn tls_from_args(args: &ClientArgs) -> Result<Option<TlsMaterial>, ConfigError> {
    let wants_tls = args.secure
        || args.url.starts_with("tls+")
        || args.cacert.is_some()
        || args.cert.is_some()
        || args.key.is_some();
    if !wants_tls {
        return Ok(None);
    }
    if args.cert.is_some() != args.key.is_some() {
        return Err(ConfigError::IncompleteClientAuth);
    }

    let read = |path: &Option<std::path::PathBuf>| -> Result<Option<Vec<u8>>, ConfigError> {
        path.as_deref().map(load_file).transpose()
    };
    Ok(Some(TlsMaterial {
        ca: read(&args.cacert)?,
        cert: read(&args.cert)?,
        key: read(&args.key)?,
        key_password: args.keypass.clone(),
    }))
}

fn payload_from_args(args: &ClientArgs) -> Result<Bytes, ConfigError> {
    match (&args.msg, &args.file) {
        (Some(_), Some(_)) => Err(ConfigError::DuplicatePayload),
        (Some(msg), None) => Ok(Bytes::from(msg.clone().into_bytes())),
        (None, Some(path)) => load_payload(path),
        (None, None) => Ok(Bytes::new()),
    }
}

fn load_payload(path: &Path) -> Result<Bytes, ConfigError> {
    load_file(path).map(Bytes::from)
}

/// `mqtt-bench-` followed by 16 random alphanumerics
pub fn random_client_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{CLIENT_ID_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::cli::{Cli, Parser};

    use super::*;

    fn parse(args: &[&str]) -> Result<BenchConfig, ConfigError> {
        let cli = Cli::try_parse_from(args).expect("cli should parse");
        BenchConfig::try_from(cli)
    }

    #[test]
    fn build_pub_config() {
        let cfg = parse(&[
            "mqtt-bench", "pub", "-t", "bench/a", "-t", "bench/b", "-m", "payload", "-C", "10",
            "-q", "2", "-n", "3",
        ])
        .expect("config should build");

        assert_eq!(cfg.role, Role::Publish);
        assert_eq!(cfg.topics.first(), Some("bench/a"));
        assert_eq!(cfg.topics.len(), 2);
        assert_eq!(cfg.payload.as_ref(), b"payload");
        assert_eq!(cfg.msg_count, 10);
        assert_eq!(cfg.qos, QoS::ExactlyOnce);
        assert_eq!(cfg.parallel, 3);
        assert!(cfg.client_id.starts_with(CLIENT_ID_PREFIX));
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn pub_requires_topic_and_payload() {
        let err = parse(&["mqtt-bench", "pub", "-m", "x"]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTopic(Role::Publish)));

        let err = parse(&["mqtt-bench", "pub", "-t", "a"]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPayload));

        let err = parse(&["mqtt-bench", "pub", "-t", "a", "-m", "x", "-f", "-"]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePayload));
    }

    #[test]
    fn sub_requires_topic() {
        let err = parse(&["mqtt-bench", "sub"]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTopic(Role::Subscribe)));
    }

    #[test]
    fn conn_ignores_publish_options() {
        let cfg = parse(&["mqtt-bench", "conn", "-t", "a", "-C", "5", "-m", "x"])
            .expect("config should build");
        assert!(cfg.topics.is_empty());
        assert_eq!(cfg.msg_count, 0);
        assert!(cfg.payload.is_empty());
    }

    #[test]
    fn reject_zero_parallel_and_bad_qos() {
        let err = parse(&["mqtt-bench", "sub", "-t", "a", "-n", "0"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParallelism));

        let err = parse(&["mqtt-bench", "sub", "-t", "a", "-q", "3"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidQos(3)));

        let err = parse(&["mqtt-bench", "sub", "-t", "a", "--will-qos", "7"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidQos(7)));
    }

    #[test]
    fn will_requires_topic() {
        let err = parse(&["mqtt-bench", "conn", "--will-msg", "bye"]).unwrap_err();
        assert!(matches!(err, ConfigError::WillWithoutTopic));

        let cfg = parse(&[
            "mqtt-bench", "conn", "--will-topic", "last", "--will-msg", "bye", "--will-qos",
            "1", "--will-retain",
        ])
        .expect("config should build");
        let will = cfg.will.expect("will set");
        assert_eq!(will.topic, "last");
        assert_eq!(will.payload.as_ref(), b"bye");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
        assert!(!cfg.retain);
    }

    #[test]
    fn tls_scheme_enables_tls() {
        let cfg = parse(&["mqtt-bench", "conn", "--url", "tls+mqtt-tcp://broker:8883"])
            .expect("config should build");
        assert!(cfg.broker.is_tls());
        assert_eq!(cfg.tls, Some(TlsMaterial::default()));

        let err = parse(&["mqtt-bench", "conn", "-s", "--key", "/tmp/key.pem"]).unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteClientAuth));
    }

    #[test]
    fn interval_floor_only_for_bounded_runs() {
        let mut cfg = BenchConfig::new(Role::Publish);
        cfg.msg_count = 10;
        assert_eq!(cfg.effective_interval(), Duration::from_millis(1));

        cfg.msg_count = 0;
        assert_eq!(cfg.effective_interval(), Duration::ZERO);

        cfg.msg_count = 10;
        cfg.interval = Duration::from_millis(25);
        assert_eq!(cfg.effective_interval(), Duration::from_millis(25));
    }

    #[test]
    fn global_options_flow_into_config() {
        let cfg = parse(&[
            "mqtt-bench", "--sample-interval-ms", "250", "--retries", "0", "sub", "-t", "a",
        ])
        .expect("config should build");
        assert_eq!(cfg.sample_interval, Duration::from_millis(250));
        assert_eq!(cfg.retry.max_retries, 0);

        let err = parse(&["mqtt-bench", "--sample-interval-ms", "0", "sub", "-t", "a"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSampleInterval));
    }
}
