use thiserror::Error;

use kindred_net::ChannelConfig;
use kindred_shared::{GroupId, UserId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("Invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Set KINDRED_PEER_ID or KINDRED_GROUP_ID, not both")]
    AmbiguousTarget,
}

/// Conversation the terminal joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTarget {
    Direct(UserId),
    Group(GroupId),
}

/// Terminal chat configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Env: `KINDRED_USER_ID` (required)
    pub user_id: UserId,

    /// Env: `KINDRED_PEER_ID` or `KINDRED_GROUP_ID` (exactly one)
    pub target: ChatTarget,

    /// Broker settings, see [`ChannelConfig::from_env`].
    pub channel: ChannelConfig,
}

impl ChatConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_id = lookup("KINDRED_USER_ID")
            .ok_or(ConfigError::Missing("KINDRED_USER_ID"))
            .and_then(|raw| parse_id("KINDRED_USER_ID", &raw))
            .map(UserId)?;

        let peer = lookup("KINDRED_PEER_ID")
            .map(|raw| parse_id("KINDRED_PEER_ID", &raw))
            .transpose()?;
        let group = lookup("KINDRED_GROUP_ID")
            .map(|raw| parse_id("KINDRED_GROUP_ID", &raw))
            .transpose()?;

        let target = match (peer, group) {
            (Some(peer), None) => ChatTarget::Direct(UserId(peer)),
            (None, Some(group)) => ChatTarget::Group(GroupId(group)),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTarget),
            (None, None) => return Err(ConfigError::Missing("KINDRED_PEER_ID or KINDRED_GROUP_ID")),
        };

        Ok(Self {
            user_id,
            target,
            channel: ChannelConfig::from_lookup(&lookup),
        })
    }
}

fn parse_id(name: &'static str, raw: &str) -> Result<i64, ConfigError> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_direct_target() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("KINDRED_USER_ID", "10"),
            ("KINDRED_PEER_ID", "42"),
            ("KINDRED_WS_URL", "ws://localhost:8080/ws"),
        ]))
        .unwrap();
        assert_eq!(config.user_id, UserId(10));
        assert_eq!(config.target, ChatTarget::Direct(UserId(42)));
        assert_eq!(config.channel.endpoint, "ws://localhost:8080/ws");
    }

    #[test]
    fn test_group_target() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("KINDRED_USER_ID", "3"),
            ("KINDRED_GROUP_ID", " 7 "),
        ]))
        .unwrap();
        assert_eq!(config.target, ChatTarget::Group(GroupId(7)));
    }

    #[test]
    fn test_missing_and_invalid_ids() {
        assert_eq!(
            ChatConfig::from_lookup(lookup_from(&[("KINDRED_PEER_ID", "42")])).unwrap_err(),
            ConfigError::Missing("KINDRED_USER_ID")
        );
        assert_eq!(
            ChatConfig::from_lookup(lookup_from(&[("KINDRED_USER_ID", "10")])).unwrap_err(),
            ConfigError::Missing("KINDRED_PEER_ID or KINDRED_GROUP_ID")
        );
        assert!(matches!(
            ChatConfig::from_lookup(lookup_from(&[
                ("KINDRED_USER_ID", "0"),
                ("KINDRED_PEER_ID", "42"),
            ])),
            Err(ConfigError::Invalid { name: "KINDRED_USER_ID", .. })
        ));
        assert!(matches!(
            ChatConfig::from_lookup(lookup_from(&[
                ("KINDRED_USER_ID", "10"),
                ("KINDRED_GROUP_ID", "seven"),
            ])),
            Err(ConfigError::Invalid { name: "KINDRED_GROUP_ID", .. })
        ));
    }

    #[test]
    fn test_both_targets_rejected() {
        assert_eq!(
            ChatConfig::from_lookup(lookup_from(&[
                ("KINDRED_USER_ID", "10"),
                ("KINDRED_PEER_ID", "42"),
                ("KINDRED_GROUP_ID", "7"),
            ]))
            .unwrap_err(),
            ConfigError::AmbiguousTarget
        );
    }
}
