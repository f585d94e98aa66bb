use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// MQTT quality of service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ConfigError::InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// MQTT protocol level sent in CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ProtocolVersion {
    /// MQTT 3.1 (protocol level 3)
    V31,
    /// MQTT 3.1.1 (protocol level 4)
    #[default]
    V311,
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(Self::V31),
            4 => Ok(Self::V311),
            other => Err(ConfigError::InvalidVersion(other)),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V31 => 3,
            ProtocolVersion::V311 => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_bounds() {
        assert_eq!(QoS::try_from(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(QoS::try_from(3), Err(ConfigError::InvalidQos(3))));
    }

    #[test]
    fn version_bounds() {
        assert_eq!(ProtocolVersion::try_from(4).unwrap(), ProtocolVersion::V311);
        assert!(matches!(
            ProtocolVersion::try_from(5),
            Err(ConfigError::InvalidVersion(5))
        ));
    }

    #[test]
    fn qos_serializes_as_number() {
        let json = serde_json::to_string(&QoS::AtLeastOnce).unwrap();
        assert_eq!(json, "1");
    }
}
