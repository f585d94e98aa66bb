//! Error types for building a [`BenchConfig`](crate::BenchConfig).

use std::path::PathBuf;

use thiserror::Error;

use crate::Role;

/// Reasons a configuration is rejected before the engine starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Publish and subscribe runs need at least one topic.
    #[error(
        "missing required option: '(-t, --topic) <topic>'\nTry 'mqtt-bench {0} --help' for more information."
    )]
    MissingTopic(Role),

    /// Publish runs need a payload from `--msg` or `--file`.
    #[error(
        "missing required option: '(-m, --msg) <message>' or '(-f, --file) <file>'\nTry 'mqtt-bench pub --help' for more information."
    )]
    MissingPayload,

    /// Both `--msg` and `--file` were given.
    #[error("data (--msg, --file) may be specified only once")]
    DuplicatePayload,

    #[error("--parallel must be greater than 0")]
    InvalidParallelism,

    #[error("--sample-interval-ms must be greater than 0")]
    InvalidSampleInterval,

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid qos {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error("invalid protocol version {0}, expected 3 or 4")]
    InvalidVersion(u8),

    #[error("--will-msg requires --will-topic")]
    WillWithoutTopic,

    /// Client certificate and private key must come as a pair.
    #[error("--cert and --key must be specified together")]
    IncompleteClientAuth,

    #[error("cannot read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_topic_names_the_subcommand() {
        let msg = ConfigError::MissingTopic(Role::Subscribe).to_string();
        assert!(msg.contains("--topic"));
        assert!(msg.contains("mqtt-bench sub --help"));
    }

    #[test]
    fn io_error_includes_path() {
        let err = ConfigError::Io {
            path: PathBuf::from("/nope/payload.bin"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/nope/payload.bin"));
    }
}
