//! Topic naming and payload encoding.
//!
//! Topic names are part of the backend contract: the broker fans messages
//! out on `/topic/chat-{low}-{high}` and `/topic/group-chat-{groupId}`, and
//! both participants of a direct chat must land on the same name no matter
//! who opened the conversation.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::constants::{
    DIRECT_SEND_DESTINATION, DIRECT_TOPIC_PREFIX, GROUP_SEND_DESTINATION, GROUP_TOPIC_PREFIX,
    TOPIC_PREFIX,
};
use crate::error::KindredError;
use crate::types::{GroupId, UserId};

/// A subscribable conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelTopic {
    /// 1:1 chat; `low <= high` always holds.
    Direct { low: UserId, high: UserId },
    Group(GroupId),
}

impl ChannelTopic {
    /// Build a direct-chat topic; the argument order does not matter.
    pub fn direct(a: UserId, b: UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self::Direct { low, high }
    }

    pub fn group(group_id: GroupId) -> Self {
        Self::Group(group_id)
    }

    pub fn name(&self) -> String {
        match self {
            Self::Direct { low, high } => format!("{DIRECT_TOPIC_PREFIX}-{low}-{high}"),
            Self::Group(group_id) => format!("{GROUP_TOPIC_PREFIX}-{group_id}"),
        }
    }

    /// Broker address to SUBSCRIBE to.
    pub fn destination(&self) -> String {
        format!("{TOPIC_PREFIX}{}", self.name())
    }

    /// Application endpoint outbound messages for this kind of channel go to.
    pub fn send_destination(&self) -> &'static str {
        match self {
            Self::Direct { .. } => DIRECT_SEND_DESTINATION,
            Self::Group(_) => GROUP_SEND_DESTINATION,
        }
    }
}

impl std::fmt::Display for ChannelTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

pub fn direct_chat_topic(a: UserId, b: UserId) -> String {
    ChannelTopic::direct(a, b).name()
}

pub fn group_chat_topic(group_id: GroupId) -> String {
    ChannelTopic::group(group_id).name()
}

/// Serialize a message as a frame body (bare JSON, no envelope).
pub fn encode_payload<T: Serialize>(message: &T) -> Result<String, KindredError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode_payload<T: DeserializeOwned>(body: &str) -> Result<T, KindredError> {
    Ok(serde_json::from_str(body)?)
}
