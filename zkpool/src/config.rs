//! Configuration for session and connection behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ZkError, ZkResult};

/// Client configuration.
///
/// Deserializes from any serde format; durations are given in milliseconds
/// and every field is optional:
///
/// ```json
/// { "session_timeout": 30000, "max_reconnect_delay": 5000 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Session timeout requested from the ensemble. The ensemble may
    /// negotiate a different value; the negotiated one drives every timer.
    #[serde(with = "millis")]
    pub session_timeout: Duration,

    /// Timeout for one socket connect plus handshake attempt.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// Delay before the second connection attempt after a failure.
    #[serde(with = "millis")]
    pub initial_reconnect_delay: Duration,

    /// Ceiling for the doubling backoff between attempts.
    #[serde(with = "millis")]
    pub max_reconnect_delay: Duration,

    /// Fraction of the negotiated timeout after which an idle connection
    /// sends a ping.
    pub ping_interval_ratio: f64,

    /// Fraction of the negotiated timeout after which a connection that has
    /// received nothing is torn down.
    pub read_timeout_ratio: f64,

    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,

    /// Bound on the close-session round trip performed by `close()`.
    #[serde(with = "millis")]
    pub close_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            initial_reconnect_delay: Duration::from_millis(50),
            max_reconnect_delay: Duration::from_secs(2),
            ping_interval_ratio: 1.0 / 3.0,
            read_timeout_ratio: 2.0 / 3.0,
            max_frame_size: 4 * 1024 * 1024,
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Fast timers for an ensemble on the same host.
    pub fn local_network() -> Self {
        Self {
            session_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(250),
            initial_reconnect_delay: Duration::from_millis(5),
            max_reconnect_delay: Duration::from_millis(100),
            close_timeout: Duration::from_millis(250),
            ..Self::default()
        }
    }

    /// Generous timers for an ensemble across a wide-area network.
    pub fn wan_network() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            initial_reconnect_delay: Duration::from_millis(250),
            max_reconnect_delay: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Set the requested session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnect backoff bounds.
    pub fn with_reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Set the ping and read-silence fractions of the negotiated timeout.
    pub fn with_liveness_ratios(mut self, ping: f64, read: f64) -> Self {
        self.ping_interval_ratio = ping;
        self.read_timeout_ratio = read;
        self
    }

    /// Set the inbound frame cap.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> ZkResult<()> {
        if self.session_timeout.is_zero() {
            return Err(ZkError::InvalidConfig("session_timeout must be positive".into()));
        }
        if self.session_timeout.as_millis() > i32::MAX as u128 {
            return Err(ZkError::InvalidConfig("session_timeout does not fit the wire".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ZkError::InvalidConfig("connect_timeout must be positive".into()));
        }
        if self.max_reconnect_delay < self.initial_reconnect_delay {
            return Err(ZkError::InvalidConfig(
                "max_reconnect_delay is below initial_reconnect_delay".into(),
            ));
        }
        let in_range = |ratio: f64| ratio > 0.0 && ratio < 1.0;
        if !in_range(self.ping_interval_ratio) || !in_range(self.read_timeout_ratio) {
            return Err(ZkError::InvalidConfig("liveness ratios must be in (0, 1)".into()));
        }
        if self.ping_interval_ratio >= self.read_timeout_ratio {
            return Err(ZkError::InvalidConfig(
                "ping_interval_ratio must be below read_timeout_ratio".into(),
            ));
        }
        if self.max_frame_size <= zkpool_proto::MAX_DATA_SIZE {
            return Err(ZkError::InvalidConfig(
                "max_frame_size must exceed the node data cap".into(),
            ));
        }
        Ok(())
    }

    /// Ping interval for a negotiated session timeout.
    pub(crate) fn ping_interval(&self, negotiated: Duration) -> Duration {
        negotiated.mul_f64(self.ping_interval_ratio)
    }

    /// Read-silence threshold for a negotiated session timeout.
    pub(crate) fn read_timeout(&self, negotiated: Duration) -> Duration {
        negotiated.mul_f64(self.read_timeout_ratio)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
