//! Turning typed lines into messages and messages into printable lines.

use std::fmt::Display;

use chrono::{DateTime, TimeZone};
use thiserror::Error;

use kindred_shared::constants::MAX_CONTENT_CHARS;
use kindred_shared::{DirectMessage, GroupId, GroupMessage, UserId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Message is empty")]
    Empty,

    #[error("Message is too long ({0} characters, max {max})", max = MAX_CONTENT_CHARS)]
    TooLong(usize),
}

/// Trimmed content, if it is sendable.
pub fn prepare(input: &str) -> Result<&str, ComposeError> {
    let content = input.trim();
    if content.is_empty() {
        return Err(ComposeError::Empty);
    }
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ComposeError::TooLong(chars));
    }
    Ok(content)
}

pub fn compose_direct(sender: UserId, receiver: UserId, input: &str) -> Result<DirectMessage, ComposeError> {
    prepare(input).map(|content| DirectMessage::chat(sender, receiver, content))
}

pub fn compose_group(sender: UserId, group: GroupId, input: &str) -> Result<GroupMessage, ComposeError> {
    prepare(input).map(|content| GroupMessage::chat(sender, group, content))
}

/// `[HH:MM] who: content`, stamped with the message's own send time.
pub fn render_direct<Tz>(message: &DirectMessage, self_id: UserId, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let stamp = message
        .timestamp_utc()
        .map(|at| clock(at.with_timezone(tz)))
        .unwrap_or_else(|| "--:--".to_string());
    format!("[{}] {}: {}", stamp, who(message.sender_id, self_id), message.content)
}

/// Group messages carry no timestamp; they are stamped with `received_at`.
pub fn render_group<Tz>(message: &GroupMessage, self_id: UserId, received_at: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "[{}] {}: {}",
        clock(received_at),
        who(message.user_id, self_id),
        message.message
    )
}

fn clock<Tz>(at: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%H:%M").to_string()
}

fn who(sender: UserId, self_id: UserId) -> String {
    if sender == self_id {
        "you".to_string()
    } else {
        format!("user {sender}")
    }
}
