//! broker address parsing
//!
//! Accepts `mqtt-tcp://host:port` and `tls+mqtt-tcp://host:port`. IPv6 hosts
//! are bracketed, e.g. `mqtt-tcp://[::1]:1883`.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// default url if `--url` is not given
pub const DEFAULT_URL: &str = "mqtt-tcp://127.0.0.1:1883";
/// default plaintext MQTT port
pub const DEFAULT_TCP_PORT: u16 = 1883;
/// default MQTT over TLS port
pub const DEFAULT_TLS_PORT: u16 = 8883;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Tcp,
    Tls,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "mqtt-tcp",
            Self::Tls => "tls+mqtt-tcp",
        }
    }

    const fn default_port(self) -> u16 {
        match self {
            Self::Tcp => DEFAULT_TCP_PORT,
            Self::Tls => DEFAULT_TLS_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddr {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl BrokerAddr {
    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Tls
    }
}

impl Default for BrokerAddr {
    fn default() -> Self {
        Self {
            scheme: Scheme::Tcp,
            host: "127.0.0.1".to_owned(),
            port: DEFAULT_TCP_PORT,
        }
    }
}

impl FromStr for BrokerAddr {
    type Err = ConfigError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: url.to_owned(),
            reason: reason.to_owned(),
        };

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("expected <scheme>://<host>:<port>"))?;
        let scheme = match scheme {
            "mqtt-tcp" => Scheme::Tcp,
            "tls+mqtt-tcp" => Scheme::Tls,
            _ => return Err(invalid("scheme must be mqtt-tcp or tls+mqtt-tcp")),
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 host"))?;
            let port = match after {
                "" => None,
                after => Some(
                    after
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after IPv6 host"))?,
                ),
            };
            (host, port)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => scheme.default_port(),
        };

        Ok(Self {
            scheme,
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme.as_str(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_default_url() {
        let addr: BrokerAddr = DEFAULT_URL.parse().unwrap();
        assert_eq!(addr, BrokerAddr::default());
        assert_eq!(addr.to_string(), DEFAULT_URL);
    }

    #[test]
    fn parse_tls_without_port() {
        let addr: BrokerAddr = "tls+mqtt-tcp://broker.example.com".parse().unwrap();
        assert!(addr.is_tls());
        assert_eq!(addr.host, "broker.example.com");
        assert_eq!(addr.port, DEFAULT_TLS_PORT);
    }

    #[test]
    fn parse_ipv6() {
        let addr: BrokerAddr = "mqtt-tcp://[::1]:11883".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 11883);
        assert_eq!(addr.to_string(), "mqtt-tcp://[::1]:11883");
    }

    #[test]
    fn reject_bad_urls() {
        for url in [
            "127.0.0.1:1883",
            "http://127.0.0.1:1883",
            "mqtt-tcp://:1883",
            "mqtt-tcp://host:port",
            "mqtt-tcp://[::1",
        ] {
            let err = url.parse::<BrokerAddr>().expect_err(url);
            assert!(matches!(err, ConfigError::InvalidUrl { .. }), "{url}");
        }
    }
}
