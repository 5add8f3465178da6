//! Wire entities and naming rules shared by the realtime chat client.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::KindredError;
pub use protocol::{direct_chat_topic, group_chat_topic, ChannelTopic};
pub use types::{DirectMessage, GroupId, GroupMessage, GroupMessageType, MessageType, UserId};
