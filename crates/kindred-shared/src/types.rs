use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KindredError;

// Backend-assigned numeric account id
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }

    /// Reject the zero / negative ids the backend never hands out.
    pub fn validate(self) -> Result<Self, KindredError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(KindredError::InvalidIdentifier(self.0))
        }
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl GroupId {
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }

    pub fn validate(self) -> Result<Self, KindredError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(KindredError::InvalidIdentifier(self.0))
        }
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Chat,
    Join,
    Leave,
    MatchNotification,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupMessageType {
    Chat,
}

/// A 1:1 chat message as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    /// Client-side correlation hint (send time in millis). Not unique,
    /// never use it to deduplicate.
    pub message_id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    /// ISO-8601 send time
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
}

impl DirectMessage {
    /// Compose a CHAT message stamped with the current time.
    pub fn chat(sender_id: UserId, receiver_id: UserId, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            message_id: now.timestamp_millis().to_string(),
            sender_id,
            receiver_id,
            content: content.into(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            kind: MessageType::Chat,
        }
    }

    /// Parse `timestamp`, accepting RFC 3339 as well as the zone-less
    /// `YYYY-MM-DDTHH:MM:SS[.fff]` form (read as UTC).
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// A group chat message as carried on the wire.
///
/// Carries neither a timestamp nor an identifier; receivers only know when
/// the message arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: GroupMessageType,
}

impl GroupMessage {
    pub fn chat(user_id: UserId, group_id: GroupId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            group_id,
            message: message.into(),
            kind: GroupMessageType::Chat,
        }
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
