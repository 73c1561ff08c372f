//! Vote Record
//!
//! The notification exchanged between a listing site and a game server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::clock::Clock;

/// A vote cast by a user on a listing site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    /// Name of the service the user voted on (e.g. "minecraft-serverlist.net").
    pub service_name: String,
    /// The voting user's in-game name.
    pub username: String,
    /// The voting user's network address.
    pub address: String,
    /// When the vote was cast. Unset votes are stamped at encode time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Vote {
    /// Create a vote without a timestamp.
    pub fn new(
        service_name: impl Into<String>,
        username: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            username: username.into(),
            address: address.into(),
            timestamp: None,
        }
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Timestamp to put on the wire, falling back to the clock.
    pub fn timestamp_or_now(&self, clock: &dyn Clock) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(|| clock.now())
    }

    /// Name of the first required field that is empty, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.service_name.is_empty() {
            Some("serviceName")
        } else if self.username.is_empty() {
            Some("username")
        } else if self.address.is_empty() {
            Some("address")
        } else {
            None
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} voted on {} from {}", self.username, self.service_name, self.address)?;
        if let Some(ts) = self.timestamp {
            write!(f, " at {}", ts.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Wire protocol version of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// RSA-encrypted newline-delimited payload.
    V1 = 1,
    /// HMAC-signed JSON payload with challenge.
    V2 = 2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("v1"),
            ProtocolVersion::V2 => f.write_str("v2"),
        }
    }
}
