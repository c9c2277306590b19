use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MTU, HEADER_SIZE};
use crate::error::LinkError;

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Tuning knobs for one link binding. Durations are written as seconds in
/// the TOML surface; the option list is closed (unknown keys are rejected).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Maximum frame size on the wire, header included.
    pub mtu: u16,
    /// How long one send attempt waits for its acknowledgment.
    #[serde(with = "secs")]
    pub ack_timeout: Duration,
    /// Send attempts per frame before the transfer is reported failed.
    pub max_retries: u32,
    /// Settle delay after a physical send, and the gap between streamed
    /// frames on the bulk path.
    #[serde(with = "secs")]
    pub send_delay: Duration,
    /// Upper bound of one blocking receive poll on the receiver loop.
    #[serde(with = "secs")]
    pub receive_delay: Duration,
    /// Quiet time after which an incomplete receiver asks for retransmission.
    #[serde(with = "secs")]
    pub idle_timeout: Duration,
    /// Retransmission requests allowed before giving up on a transfer.
    pub max_retransmit_rounds: u32,
    /// Identical acks emitted per stored frame (ack-loss compensation on a
    /// half-duplex link).
    pub num_acks: u32,
    /// Gap between the acks of one burst.
    #[serde(with = "secs")]
    pub ack_delay: Duration,
    /// How long a bulk sender listens for retransmit requests after the
    /// stream; each served request rearms the full window.
    #[serde(with = "secs")]
    pub retransmit_wait: Duration,
    /// Back-to-back copies of each frame named in a retransmit request.
    pub retransmit_redundancy: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            ack_timeout: Duration::from_secs(2),
            max_retries: 3,
            send_delay: Duration::from_millis(200),
            receive_delay: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(5),
            max_retransmit_rounds: 3,
            num_acks: 3,
            ack_delay: Duration::from_millis(100),
            retransmit_wait: Duration::from_secs(15),
            retransmit_redundancy: 2,
        }
    }
}

impl LinkConfig {
    pub fn from_toml(text: &str) -> Result<Self, LinkError> {
        let config: LinkConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.mtu as usize <= HEADER_SIZE {
            return Err(LinkError::InvalidConfig("mtu must exceed the frame header"));
        }
        if self.max_retries == 0 {
            return Err(LinkError::InvalidConfig("max_retries must be at least 1"));
        }
        if self.num_acks == 0 {
            return Err(LinkError::InvalidConfig("num_acks must be at least 1"));
        }
        if self.retransmit_redundancy == 0 {
            return Err(LinkError::InvalidConfig(
                "retransmit_redundancy must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        LinkConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_partial_toml() {
        let config = LinkConfig::from_toml("mtu = 252\nack_timeout = 0.5\n").unwrap();
        assert_eq!(config.mtu, 252);
        assert_eq!(config.ack_timeout, Duration::from_millis(500));
        // untouched options keep their defaults
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retransmit_wait, Duration::from_secs(15));
    }

    #[test]
    fn rejects_unknown_option() {
        assert!(LinkConfig::from_toml("mtu = 128\nchecksum = true\n").is_err());
    }

    #[test]
    fn rejects_degenerate_mtu() {
        let err = LinkConfig::from_toml("mtu = 4\n").unwrap_err();
        assert!(matches!(err, LinkError::InvalidConfig(_)));
    }

    #[test]
    fn toml_round_trip() {
        let config = LinkConfig {
            mtu: 200,
            retransmit_redundancy: 3,
            ..LinkConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        let back = LinkConfig::from_toml(&text).unwrap();
        assert_eq!(back.mtu, 200);
        assert_eq!(back.retransmit_redundancy, 3);
        assert_eq!(back.idle_timeout, config.idle_timeout);
    }
}
