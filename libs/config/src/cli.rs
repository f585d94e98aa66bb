//! Parse from either cli or env var

/// default log level. Can use this argument or MQTT_BENCH_LOG env var
pub const DEFAULT_LOG: &str = "info";
/// log as "json", "pretty" or "standard" (unstructured)
pub const DEFAULT_LOG_FORMAT: &str = "standard";
/// tokio worker thread name
pub static DEFAULT_THREAD_NAME: &str = "mqtt-bench-worker";
/// how often throughput is sampled and printed
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1_000;
/// transport retries before a send/recv error becomes fatal
pub const DEFAULT_RETRIES: u32 = 3;
/// first retry delay, doubled on each attempt
pub const DEFAULT_RETRY_BASE_MS: u64 = 10;
/// capacity of the shared receive queue
pub const DEFAULT_CHANNEL_SIZE: usize = 10_000;
/// keep alive in seconds
pub const DEFAULT_KEEPALIVE: u16 = 60;
/// protocol level 4 is MQTT 3.1.1
pub const DEFAULT_VERSION: u8 = 4;

use std::path::PathBuf;

use clap::{ArgAction, Args, Subcommand, builder::BoolishValueParser};
pub use clap::Parser;

use crate::{Role, url::DEFAULT_URL};

#[derive(Parser, Debug, Clone)]
#[clap(author, name = "mqtt-bench", bin_name = "mqtt-bench", about, long_about = None)]
/// MQTT throughput benchmark. Options may also be set through environment
/// variables; a `.env` file next to the binary is loaded as well
pub struct Cli {
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[clap(long, env = "MQTT_BENCH_LOG", default_value = DEFAULT_LOG, global = true)]
    pub log: String,
    /// log output format: standard, pretty or json
    #[clap(long, env = "LOG_FORMAT", default_value = DEFAULT_LOG_FORMAT, global = true)]
    pub log_format: String,
    /// number of runtime worker threads, defaults to the number of logical CPUs
    #[clap(long, env = "MQTT_BENCH_THREADS", global = true)]
    pub threads: Option<usize>,
    /// runtime worker thread name
    #[clap(long, env = "MQTT_BENCH_THREAD_NAME", default_value = DEFAULT_THREAD_NAME, global = true)]
    pub thread_name: String,
    /// how often throughput is printed (ms)
    #[clap(long, env = "MQTT_BENCH_SAMPLE_INTERVAL_MS", default_value_t = DEFAULT_SAMPLE_INTERVAL_MS, global = true)]
    pub sample_interval_ms: u64,
    /// transport retries for a failed send or receive before giving up
    #[clap(long, env = "MQTT_BENCH_RETRIES", default_value_t = DEFAULT_RETRIES, global = true)]
    pub retries: u32,
    /// first retry delay (ms), doubled on each attempt
    #[clap(long, env = "MQTT_BENCH_RETRY_BASE_MS", default_value_t = DEFAULT_RETRY_BASE_MS, global = true)]
    pub retry_base_ms: u64,
    /// capacity of the shared receive queue
    #[clap(long, env = "MQTT_BENCH_CHANNEL_SIZE", default_value_t = DEFAULT_CHANNEL_SIZE, global = true)]
    pub channel_size: usize,
    /// print the final report as JSON
    #[clap(long, global = true)]
    pub json: bool,
    /// run against an in-process loopback broker instead of the network
    #[clap(long, global = true)]
    pub dry_run: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// publish to the first topic at a fixed interval
    Pub(ClientArgs),
    /// subscribe to every topic and count received messages
    Sub(ClientArgs),
    /// connect and hold the connection open
    Conn(ClientArgs),
}

impl Command {
    pub fn role(&self) -> Role {
        match self {
            Self::Pub(_) => Role::Publish,
            Self::Sub(_) => Role::Subscribe,
            Self::Conn(_) => Role::ConnectOnly,
        }
    }

    pub fn args(&self) -> &ClientArgs {
        match self {
            Self::Pub(args) | Self::Sub(args) | Self::Conn(args) => args,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// The url for mqtt broker ('mqtt-tcp://host:port' or 'tls+mqtt-tcp://host:port')
    #[clap(long, env = "MQTT_BENCH_URL", default_value = DEFAULT_URL)]
    pub url: String,
    /// Topic for publish or subscribe, may be repeated
    #[clap(short, long)]
    pub topic: Vec<String>,
    /// The number of parallel workers
    #[clap(short = 'n', long, default_value_t = 1)]
    pub parallel: usize,
    /// Max count of publishing messages, 0 publishes until interrupted
    #[clap(short = 'C', long, default_value_t = 0)]
    pub count: u64,
    /// Interval of publishing messages (ms)
    #[clap(short, long, default_value_t = 0)]
    pub interval: u64,
    /// The MQTT version used by the client (3|4)
    #[clap(short = 'V', long, default_value_t = DEFAULT_VERSION)]
    pub version: u8,
    /// Quality of service for the corresponding topic
    #[clap(short, long, default_value_t = 0)]
    pub qos: u8,
    /// The message will be retained
    #[clap(short, long)]
    pub retain: bool,
    /// The username for authentication
    #[clap(short, long, env = "MQTT_BENCH_USER")]
    pub user: Option<String>,
    /// The password for authentication
    #[clap(short, long, env = "MQTT_BENCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// The client identifier UTF-8 String (default randomly generated string)
    #[clap(short = 'I', long = "id", env = "MQTT_BENCH_CLIENT_ID")]
    pub id: Option<String>,
    /// A keep alive of the client (in seconds)
    #[clap(short, long, default_value_t = DEFAULT_KEEPALIVE)]
    pub keepalive: u16,
    /// Define a clean start for the connection
    #[clap(
        short = 'c',
        long = "clean_session",
        visible_alias = "clean-session",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub clean_session: bool,
    /// The payload of the will message
    #[clap(long)]
    pub will_msg: Option<String>,
    /// Quality of service level for the will message
    #[clap(long, default_value_t = 0)]
    pub will_qos: u8,
    /// Will message as retained message
    #[clap(long)]
    pub will_retain: bool,
    /// The topic of the will message
    #[clap(long)]
    pub will_topic: Option<String>,
    /// Enable TLS/SSL mode
    #[clap(short, long)]
    pub secure: bool,
    /// CA certificates file path
    #[clap(long)]
    pub cacert: Option<PathBuf>,
    /// Certificate file path
    #[clap(short = 'E', long)]
    pub cert: Option<PathBuf>,
    /// Private key file path
    #[clap(long)]
    pub key: Option<PathBuf>,
    /// Private key password
    #[clap(long, hide_env_values = true)]
    pub keypass: Option<String>,
    /// The message to publish
    #[clap(short, long)]
    pub msg: Option<String>,
    /// Read the message to publish from a file, `-` for stdin
    #[clap(short, long)]
    pub file: Option<PathBuf>,
    /// Enable verbose mode
    #[clap(short, long)]
    pub verbose: bool,
}
