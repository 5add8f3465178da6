//! # kindred-chat
//!
//! Terminal client for Kindred chat conversations.
//!
//! Joins either a direct chat (`KINDRED_PEER_ID`) or a group chat
//! (`KINDRED_GROUP_ID`) as `KINDRED_USER_ID`, prints incoming messages and
//! sends every line typed on stdin. Commands:
//! - `/reconnect` opens a new session after the connection dropped
//! - `/leave` leaves the group chat but keeps the connection
//! - `/quit` disconnects and exits

mod compose;
mod config;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kindred_net::RealtimeMessagingChannel;
use kindred_shared::constants::APP_NAME;

use crate::config::{ChatConfig, ChatTarget};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kindred_chat=debug,kindred_net=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting {} chat v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ChatConfig::from_env()?;
    info!(
        user = %config.user_id,
        target = ?config.target,
        endpoint = %config.channel.endpoint,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Channel and listeners
    // -----------------------------------------------------------------------
    let channel = RealtimeMessagingChannel::new(config.channel.clone());
    let self_id = config.user_id;

    channel.on_message(move |message| {
        println!("{}", compose::render_direct(message, self_id, &Local));
    });
    channel.on_group_message(move |message| {
        println!("{}", compose::render_group(message, self_id, Local::now()));
    });
    channel.on_connection_change(|connected| {
        if connected {
            info!("Connection established");
        } else {
            warn!("Connection closed, type /reconnect to open a new one");
        }
    });

    // -----------------------------------------------------------------------
    // 4. Join the conversation
    // -----------------------------------------------------------------------
    join(&channel, &config).await?;

    // -----------------------------------------------------------------------
    // 5. Read stdin until /quit, EOF or Ctrl+C
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "" => continue,
                    "/quit" => break,
                    "/reconnect" => {
                        if let Err(e) = join(&channel, &config).await {
                            error!(error = %e, "Reconnect failed");
                        }
                    }
                    "/leave" => {
                        channel.disconnect_from_group().await;
                    }
                    text => {
                        // Failed sends are reported, never retried.
                        if let Err(e) = send_line(&channel, &config, text).await {
                            error!(error = %e, "Message not sent");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // 6. Shutdown
    // -----------------------------------------------------------------------
    channel.disconnect().await;
    Ok(())
}

async fn join(channel: &RealtimeMessagingChannel, config: &ChatConfig) -> anyhow::Result<()> {
    match config.target {
        ChatTarget::Direct(peer) => channel.connect(config.user_id, Some(peer)).await?,
        ChatTarget::Group(group) => channel.connect_to_group(config.user_id, group).await?,
    }
    if let Some(topic) = channel.active_topic().await {
        info!(topic = %topic, "Joined conversation");
    }
    Ok(())
}

async fn send_line(
    channel: &RealtimeMessagingChannel,
    config: &ChatConfig,
    text: &str,
) -> anyhow::Result<()> {
    match config.target {
        ChatTarget::Direct(peer) => {
            let message = compose::compose_direct(config.user_id, peer, text)?;
            channel.send_message(&message).await?;
        }
        ChatTarget::Group(group) => {
            let message = compose::compose_group(config.user_id, group, text)?;
            channel.send_group_message(&message).await?;
        }
    }
    Ok(())
}
