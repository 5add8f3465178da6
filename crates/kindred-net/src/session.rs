//! Broker session orchestration with the tokio mpsc command/notification pattern.
//!
//! [`spawn_session`] performs the transport + STOMP handshake inline, so the
//! caller learns about success or failure directly. Once CONNECTED arrives
//! the session loop runs in its own task; the rest of the crate talks to it
//! through [`SessionCommand`] and listens on [`SessionNotification`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use kindred_shared::constants::STOMP_ACCEPT_VERSIONS;

use crate::error::ChannelError;
use crate::frame::{Command, Frame, FrameDecoder, Heartbeat, Received};
use crate::transport::{Connector, FrameSink, FrameStream};

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// SUBSCRIBE to a broker destination under the given subscription id.
    Subscribe { id: String, destination: String },
    /// UNSUBSCRIBE a previously issued subscription id.
    Unsubscribe { id: String },
    /// SEND a body to a destination; `reply` resolves once the frame is written.
    Send {
        destination: String,
        body: String,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    /// Send DISCONNECT and close the transport.
    Disconnect,
}

/// Notifications sent *from* the session task.
#[derive(Debug, Clone)]
pub enum SessionNotification {
    /// A MESSAGE frame arrived.
    Message {
        subscription: String,
        destination: String,
        body: String,
    },
    /// The broker sent an ERROR frame. The session ends right after.
    Error { message: String },
    /// The session ended without the client asking for it.
    Closed { reason: String },
}

/// Settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for transport connect + CONNECTED.
    pub connect_timeout: Duration,
    /// Heart-beat intervals offered in CONNECT.
    pub heartbeat: Heartbeat,
    /// Optional `host` header (virtual host on the broker).
    pub host: Option<String>,
}

/// What the broker agreed to in CONNECTED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: String,
    pub server: Option<String>,
    /// Negotiated intervals actually in effect.
    pub heartbeat: Heartbeat,
}

/// Connect, run the STOMP handshake and spawn the session task.
///
/// # Returns
///
/// `(command_tx, notification_rx, handshake)`
pub async fn spawn_session(
    connector: &dyn Connector,
    endpoint: &str,
    config: &SessionConfig,
) -> Result<
    (
        mpsc::Sender<SessionCommand>,
        mpsc::UnboundedReceiver<SessionNotification>,
        Handshake,
    ),
    ChannelError,
> {
    let limit = config.connect_timeout;
    let (sink, stream, decoder, handshake) =
        tokio::time::timeout(limit, perform_handshake(connector, endpoint, config))
            .await
            .map_err(|_| ChannelError::Timeout(limit))??;

    info!(
        endpoint = %endpoint,
        version = %handshake.version,
        server = ?handshake.server,
        heartbeat_out = handshake.heartbeat.outgoing,
        heartbeat_in = handshake.heartbeat.incoming,
        "STOMP session established"
    );

    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(256);
    let (notif_tx, notif_rx) = mpsc::unbounded_channel::<SessionNotification>();

    tokio::spawn(run_session(
        sink,
        stream,
        decoder,
        cmd_rx,
        notif_tx,
        handshake.heartbeat,
    ));

    Ok((cmd_tx, notif_rx, handshake))
}

async fn perform_handshake(
    connector: &dyn Connector,
    endpoint: &str,
    config: &SessionConfig,
) -> Result<(FrameSink, FrameStream, FrameDecoder, Handshake), ChannelError> {
    let (mut sink, mut stream) = connector.connect(endpoint).await?;
    debug!(endpoint = %endpoint, "Transport open, sending CONNECT");

    let mut connect = Frame::new(Command::Connect)
        .header("accept-version", STOMP_ACCEPT_VERSIONS)
        .header("heart-beat", config.heartbeat.to_header());
    if let Some(host) = &config.host {
        connect = connect.header("host", host.clone());
    }
    sink.send(connect.encode()).await?;

    let mut decoder = FrameDecoder::new();
    loop {
        while let Some(received) = decoder.next_frame()? {
            let Received::Frame(frame) = received else {
                continue;
            };
            match frame.command {
                Command::Connected => {
                    let offered = frame
                        .get("heart-beat")
                        .and_then(Heartbeat::parse)
                        .unwrap_or_default();
                    let handshake = Handshake {
                        version: frame.get("version").unwrap_or("1.0").to_string(),
                        server: frame.get("server").map(str::to_string),
                        heartbeat: Heartbeat::negotiate(config.heartbeat, offered),
                    };
                    return Ok((sink, stream, decoder, handshake));
                }
                Command::Error => {
                    let message = error_message(&frame);
                    error!(endpoint = %endpoint, message = %message, "Broker rejected CONNECT");
                    return Err(ChannelError::Handshake(message));
                }
                other => debug!(command = %other, "Ignoring frame before CONNECTED"),
            }
        }

        match stream.next().await {
            Some(Ok(chunk)) => decoder.push(&chunk),
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ChannelError::SessionClosed),
        }
    }
}

async fn run_session(
    mut sink: FrameSink,
    mut stream: FrameStream,
    mut decoder: FrameDecoder,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    notif_tx: mpsc::UnboundedSender<SessionNotification>,
    heartbeat: Heartbeat,
) {
    // Intervals are only polled when the direction is enabled.
    let send_every = (heartbeat.outgoing > 0).then(|| Duration::from_millis(heartbeat.outgoing));
    let silence_limit =
        (heartbeat.incoming > 0).then(|| Duration::from_millis(heartbeat.incoming * 2));

    let idle = Duration::from_secs(3600);
    let mut beat = tokio::time::interval(send_every.unwrap_or(idle));
    beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    beat.tick().await;
    let mut watchdog = tokio::time::interval(silence_limit.map(|d| d / 2).unwrap_or(idle));
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
    watchdog.tick().await;

    let mut last_rx = Instant::now();

    let reason = loop {
        if let Some(reason) = drain_frames(&mut decoder, &notif_tx) {
            break reason;
        }

        tokio::select! {
            // --- Outgoing commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Subscribe { id, destination }) => {
                        let frame = Frame::new(Command::Subscribe)
                            .header("id", id.clone())
                            .header("destination", destination.clone())
                            .header("ack", "auto");
                        if let Err(e) = sink.send(frame.encode()).await {
                            break format!("SUBSCRIBE failed: {e}");
                        }
                        debug!(id = %id, destination = %destination, "SUBSCRIBE sent");
                    }
                    Some(SessionCommand::Unsubscribe { id }) => {
                        let frame = Frame::new(Command::Unsubscribe).header("id", id.clone());
                        if let Err(e) = sink.send(frame.encode()).await {
                            break format!("UNSUBSCRIBE failed: {e}");
                        }
                        debug!(id = %id, "UNSUBSCRIBE sent");
                    }
                    Some(SessionCommand::Send { destination, body, reply }) => {
                        let len = body.len();
                        let frame = Frame::new(Command::Send)
                            .header("destination", destination.clone())
                            .with_body(body);
                        match sink.send(frame.encode()).await {
                            Ok(()) => {
                                debug!(destination = %destination, len, "SEND written");
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                let reason = format!("SEND failed: {e}");
                                let _ = reply.send(Err(ChannelError::Transport(e)));
                                break reason;
                            }
                        }
                    }
                    Some(SessionCommand::Disconnect) => {
                        let frame = Frame::new(Command::Disconnect).header("receipt", "disconnect");
                        if let Err(e) = sink.send(frame.encode()).await {
                            debug!(error = %e, "DISCONNECT could not be delivered");
                        }
                        let _ = sink.close().await;
                        info!("Session closed by client");
                        return;
                    }
                    None => {
                        info!("Command channel closed, ending session");
                        let _ = sink.close().await;
                        return;
                    }
                }
            }

            // --- Incoming data ---
            item = stream.next() => {
                match item {
                    Some(Ok(chunk)) => {
                        last_rx = Instant::now();
                        decoder.push(&chunk);
                    }
                    Some(Err(e)) => break e.to_string(),
                    None => break "transport closed".to_string(),
                }
            }

            _ = beat.tick(), if send_every.is_some() => {
                if let Err(e) = sink.send("\n".to_string()).await {
                    break format!("heart-beat failed: {e}");
                }
            }

            _ = watchdog.tick(), if silence_limit.is_some() => {
                if let Some(limit) = silence_limit {
                    if last_rx.elapsed() > limit {
                        break format!("no data from broker for {limit:?}");
                    }
                }
            }
        }
    };

    warn!(reason = %reason, "Session ended");
    let _ = notif_tx.send(SessionNotification::Closed { reason });
}

/// Forward every complete frame in the decoder. Returns a reason when the
/// session has to end.
fn drain_frames(
    decoder: &mut FrameDecoder,
    notif_tx: &mpsc::UnboundedSender<SessionNotification>,
) -> Option<String> {
    loop {
        match decoder.next_frame() {
            Ok(None) => return None,
            Ok(Some(Received::KeepAlive)) => {}
            Ok(Some(Received::Frame(frame))) => match frame.command {
                Command::Message => {
                    let subscription = frame.get("subscription").unwrap_or_default().to_string();
                    let destination = frame.get("destination").unwrap_or_default().to_string();
                    debug!(
                        subscription = %subscription,
                        destination = %destination,
                        len = frame.body.len(),
                        "MESSAGE received"
                    );
                    let _ = notif_tx.send(SessionNotification::Message {
                        subscription,
                        destination,
                        body: frame.body,
                    });
                }
                Command::Error => {
                    let message = error_message(&frame);
                    error!(message = %message, "Broker sent ERROR");
                    let _ = notif_tx.send(SessionNotification::Error {
                        message: message.clone(),
                    });
                    return Some(format!("broker error: {message}"));
                }
                Command::Receipt => {
                    debug!(receipt = ?frame.get("receipt-id"), "RECEIPT received");
                }
                other => debug!(command = %other, "Ignoring unexpected frame"),
            },
            Err(e) => warn!(error = %e, "Dropping malformed frame"),
        }
    }
}

fn error_message(frame: &Frame) -> String {
    match frame.get("message") {
        Some(message) if !message.is_empty() => message.to_string(),
        _ if !frame.body.is_empty() => frame.body.trim().to_string(),
        _ => "ERROR frame without message".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_header() {
        let frame = Frame::new(Command::Error)
            .header("message", "Access denied")
            .with_body("details");
        assert_eq!(error_message(&frame), "Access denied");

        let frame = Frame::new(Command::Error).with_body("  only body \n");
        assert_eq!(error_message(&frame), "only body");

        let frame = Frame::new(Command::Error);
        assert_eq!(error_message(&frame), "ERROR frame without message");
    }

    #[test]
    fn test_drain_forwards_messages_and_stops_on_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut decoder = FrameDecoder::new();
        decoder.push(
            &Frame::new(Command::Message)
                .header("subscription", "sub-0")
                .header("destination", "/topic/chat-1-2")
                .with_body("{}")
                .encode(),
        );
        decoder.push("\n");
        decoder.push(&Frame::new(Command::Error).header("message", "boom").encode());

        let reason = drain_frames(&mut decoder, &tx);
        assert_eq!(reason.as_deref(), Some("broker error: boom"));

        match rx.try_recv().unwrap() {
            SessionNotification::Message {
                subscription,
                destination,
                body,
            } => {
                assert_eq!(subscription, "sub-0");
                assert_eq!(destination, "/topic/chat-1-2");
                assert_eq!(body, "{}");
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionNotification::Error { .. }
        ));
    }
}
