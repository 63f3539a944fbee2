//! Configuration loading and validation.
//!
//! The surface is deliberately small: a caller-assigned identity, the four
//! logical channel names, and a pair of timeouts. Configs deserialize from
//! TOML; [`CommunicatorConfig::default`] gives the canonical names.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use switchboard_proto::Channel;

/// Names of the four logical channels on the underlying transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelNames {
    /// Name of the `Registrations` queue.
    pub registrations: String,
    /// Name of the `ServerRequests` queue.
    pub server_requests: String,
    /// Name of the `Aliases` queue.
    pub aliases: String,
    /// Name of the session-affine `ClientSessions` queue.
    pub client_sessions: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            registrations: Channel::Registrations.canonical_name().to_string(),
            server_requests: Channel::ServerRequests.canonical_name().to_string(),
            aliases: Channel::Aliases.canonical_name().to_string(),
            client_sessions: Channel::ClientSessions.canonical_name().to_string(),
        }
    }
}

impl ChannelNames {
    /// Configured name for `channel`.
    pub fn name_of(&self, channel: Channel) -> &str {
        match channel {
            Channel::Registrations => &self.registrations,
            Channel::ServerRequests => &self.server_requests,
            Channel::Aliases => &self.aliases,
            Channel::ClientSessions => &self.client_sessions,
        }
    }

    /// Resolve a configured entity name back to its channel.
    ///
    /// Used to derive a reply channel from a message's `reply_to_entity`.
    /// Comparison is ASCII-case-insensitive like label matching.
    pub fn resolve(&self, entity: &str) -> Option<Channel> {
        let entity = entity.trim();
        Channel::ALL
            .into_iter()
            .find(|c| self.name_of(*c).eq_ignore_ascii_case(entity))
    }
}

/// Configuration for one communicator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorConfig {
    /// Caller-assigned client/server identity. Also the session id on the
    /// `ClientSessions` channel.
    pub identity: String,
    /// Logical channel names on the transport.
    pub channels: ChannelNames,
    /// How long a channel receive loop blocks per receive attempt before
    /// retrying.
    #[serde(with = "duration_secs")]
    pub receive_timeout: Duration,
    /// Default deadline for ping calls.
    #[serde(with = "duration_secs")]
    pub ping_timeout: Duration,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            channels: ChannelNames::default(),
            receive_timeout: Duration::from_secs(2),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

impl CommunicatorConfig {
    /// Config with the canonical channel names and the given identity.
    pub fn with_identity(identity: impl Into<String>) -> Self {
        Self { identity: identity.into(), ..Self::default() }
    }

    /// Parse a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::InvalidInput(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject blank identity and duplicate channel names.
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(Error::InvalidInput("identity must not be blank".into()));
        }
        for (i, a) in Channel::ALL.iter().enumerate() {
            for b in &Channel::ALL[i + 1..] {
                if self
                    .channels
                    .name_of(*a)
                    .eq_ignore_ascii_case(self.channels.name_of(*b))
                {
                    return Err(Error::InvalidInput(format!(
                        "channels {a} and {b} share a name"
                    )));
                }
            }
        }
        Ok(())
    }
}

mod duration_secs {
    //! Serialize durations as whole seconds in config files.

    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names_resolve_round_trip() {
        let names = ChannelNames::default();
        for channel in Channel::ALL {
            assert_eq!(names.resolve(names.name_of(channel)), Some(channel));
        }
        assert_eq!(names.resolve("no-such-queue"), None);
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let names = ChannelNames::default();
        assert_eq!(names.resolve("ALIASES"), Some(Channel::Aliases));
        assert_eq!(names.resolve(" clientsessions "), Some(Channel::ClientSessions));
    }

    #[test]
    fn test_validate_rejects_blank_identity() {
        let config = CommunicatorConfig::default();
        assert!(config.validate().is_err());
        assert!(CommunicatorConfig::with_identity("node-1").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_channel_names() {
        let mut config = CommunicatorConfig::with_identity("node-1");
        config.channels.aliases = config.channels.registrations.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = CommunicatorConfig::from_toml(
            r#"
            identity = "server-1"
            receive_timeout = 5

            [channels]
            registrations = "reg-queue"
            "#,
        )
        .unwrap();
        assert_eq!(config.identity, "server-1");
        assert_eq!(config.receive_timeout, Duration::from_secs(5));
        assert_eq!(config.channels.resolve("reg-queue"), Some(Channel::Registrations));
        // Unspecified names keep their defaults.
        assert_eq!(config.channels.resolve("aliases"), Some(Channel::Aliases));
    }
}
