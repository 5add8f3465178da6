//! The realtime messaging channel.
//!
//! One [`RealtimeMessagingChannel`] owns at most one broker session and at
//! most one active conversation subscription: a direct chat between two
//! users or a group chat. It is an ordinary value; share it with `Arc`
//! between the parts of an application that need the same connection.
//!
//! Lifecycle operations (`connect`, `connect_to_group`, `disconnect`, ...)
//! are serialized by an async mutex. Sends never wait on it: they consult the
//! connection state directly and fail fast when there is no usable session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use kindred_shared::protocol::{decode_payload, encode_payload};
use kindred_shared::{ChannelTopic, DirectMessage, GroupId, GroupMessage, UserId};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::listeners::{ListenerId, Listeners};
use crate::session::{spawn_session, Handshake, SessionCommand, SessionNotification};
use crate::transport::{resolve_endpoint, Connector, WebSocketConnector};

/// Connection lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or torn down with `disconnect`.
    Idle,
    /// Transport or STOMP handshake in progress.
    Connecting,
    Connected,
    /// Handshake failed or the session dropped. Only an explicit connect
    /// moves on from here.
    Disconnected,
}

/// The conversation currently subscribed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveChannel {
    None,
    Direct { peer_id: UserId, subscription: String },
    Group { group_id: GroupId, subscription: String },
}

impl ActiveChannel {
    fn subscription(&self) -> Option<&str> {
        match self {
            ActiveChannel::None => None,
            ActiveChannel::Direct { subscription, .. } | ActiveChannel::Group { subscription, .. } => {
                Some(subscription)
            }
        }
    }
}

struct StateInner {
    phase: ConnectionState,
    /// Bumped for every new session and on teardown; notifications from an
    /// older session are ignored.
    generation: u64,
    commands: Option<mpsc::Sender<SessionCommand>>,
}

/// State reachable from the per-session dispatcher task.
struct Shared {
    state: Mutex<StateInner>,
    routes: Mutex<HashMap<String, ChannelTopic>>,
    listeners: Listeners,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(StateInner {
                phase: ConnectionState::Idle,
                generation: 0,
                commands: None,
            }),
            routes: Mutex::new(HashMap::new()),
            listeners: Listeners::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, StateInner> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<String, ChannelTopic>> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn phase(&self) -> ConnectionState {
        self.state().phase
    }

    fn begin_connecting(&self) -> u64 {
        let mut state = self.state();
        state.generation += 1;
        state.phase = ConnectionState::Connecting;
        state.commands = None;
        state.generation
    }

    /// Only a session still `Connecting` under `generation` can become
    /// Connected; returns whether it did.
    fn mark_connected(&self, generation: u64, commands: mpsc::Sender<SessionCommand>) -> bool {
        {
            let mut state = self.state();
            if state.generation != generation || state.phase != ConnectionState::Connecting {
                return false;
            }
            state.phase = ConnectionState::Connected;
            state.commands = Some(commands);
        }
        self.listeners.connection.notify(&true);
        true
    }

    /// Session `generation` is gone (handshake failure, broker ERROR,
    /// transport drop). No-op for superseded sessions and repeated calls.
    fn mark_disconnected(&self, generation: u64) {
        {
            let mut state = self.state();
            if state.generation != generation || state.phase == ConnectionState::Disconnected {
                return;
            }
            state.phase = ConnectionState::Disconnected;
        }
        self.listeners.connection.notify(&false);
    }

    fn reset_to_idle(&self) {
        {
            let mut state = self.state();
            state.generation += 1;
            state.phase = ConnectionState::Idle;
            state.commands = None;
        }
        self.routes().clear();
        self.listeners.connection.notify(&false);
    }

    /// Command sender for a publish, or the reason publishing is impossible.
    fn publish_handle(&self) -> Result<mpsc::Sender<SessionCommand>, ChannelError> {
        let state = self.state();
        match (state.phase, &state.commands) {
            (ConnectionState::Idle, _) => Err(ChannelError::NotInitialized),
            (ConnectionState::Connected, Some(commands)) => Ok(commands.clone()),
            _ => Err(ChannelError::NotConnected),
        }
    }

    /// Hand one inbound MESSAGE to the listeners of its conversation.
    ///
    /// Bodies that do not parse as the conversation's message type are
    /// logged and dropped; no listener sees them.
    fn route(&self, subscription: &str, destination: &str, body: &str) {
        let topic = self.routes().get(subscription).copied();
        let Some(topic) = topic else {
            debug!(
                subscription = %subscription,
                destination = %destination,
                "MESSAGE for inactive subscription dropped"
            );
            return;
        };

        match topic {
            ChannelTopic::Direct { .. } => match decode_payload::<DirectMessage>(body) {
                Ok(message) => {
                    debug!(topic = %topic, sender = %message.sender_id, "Received message");
                    self.listeners.messages.notify(&message);
                }
                Err(e) => error!(topic = %topic, error = %e, "Error parsing message"),
            },
            ChannelTopic::Group(_) => match decode_payload::<GroupMessage>(body) {
                Ok(message) => {
                    debug!(topic = %topic, sender = %message.user_id, "Received group message");
                    self.listeners.group_messages.notify(&message);
                }
                Err(e) => error!(topic = %topic, error = %e, "Error parsing group message"),
            },
        }
    }
}

struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    handshake: Handshake,
}

struct Lifecycle {
    session: Option<SessionHandle>,
    self_id: Option<UserId>,
    active: ActiveChannel,
    next_subscription: u64,
}

/// Realtime direct/group chat over a STOMP broker.
pub struct RealtimeMessagingChannel {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl RealtimeMessagingChannel {
    /// Channel dialing the configured endpoint over WebSocket.
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            shared: Arc::new(Shared::new()),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                session: None,
                self_id: None,
                active: ActiveChannel::None,
                next_subscription: 0,
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Connect for a direct chat between `self_id` and `peer_id`.
    ///
    /// Resolves once the broker accepted the session and, when a peer is
    /// given, the `chat-{low}-{high}` subscription has been issued. Connection
    /// listeners receive `true` before the subscription goes out. On failure
    /// they receive `false` and the error is returned.
    pub async fn connect(&self, self_id: UserId, peer_id: Option<UserId>) -> Result<(), ChannelError> {
        let self_id = self_id.validate()?;
        let peer_id = peer_id.map(UserId::validate).transpose()?;

        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.self_id = Some(self_id);
        self.ensure_session(&mut lifecycle).await?;

        if let Some(peer_id) = peer_id {
            self.select_channel(&mut lifecycle, ChannelTopic::direct(self_id, peer_id))
                .await?;
        }
        Ok(())
    }

    /// Connect (or reuse the open connection) for the chat of `group_id`.
    pub async fn connect_to_group(&self, self_id: UserId, group_id: GroupId) -> Result<(), ChannelError> {
        let self_id = self_id.validate()?;
        let group_id = group_id.validate()?;

        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.self_id = Some(self_id);
        self.ensure_session(&mut lifecycle).await?;
        self.select_channel(&mut lifecycle, ChannelTopic::group(group_id))
            .await
    }

    /// Leave the group chat: its subscription is cancelled, the connection
    /// stays open for other conversations.
    pub async fn disconnect_from_group(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let ActiveChannel::Group { group_id, subscription } = &lifecycle.active else {
            return;
        };
        let (group_id, subscription) = (*group_id, subscription.clone());

        self.shared.routes().remove(&subscription);
        if let Some(session) = &lifecycle.session {
            if session
                .commands
                .send(SessionCommand::Unsubscribe { id: subscription })
                .await
                .is_err()
            {
                debug!("Session already gone while leaving group");
            }
        }
        lifecycle.active = ActiveChannel::None;
        info!(group = %group_id, "Left group chat");
    }

    /// Tear down the whole session and forget the participants.
    ///
    /// Connection listeners receive `false`, even when nothing was connected.
    pub async fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(session) = lifecycle.session.take() {
            let _ = session.commands.send(SessionCommand::Disconnect).await;
            info!("Disconnected from broker");
        }
        lifecycle.self_id = None;
        lifecycle.active = ActiveChannel::None;
        self.shared.reset_to_idle();
    }

    /// `disconnect` plus dropping every registered listener.
    pub async fn reset(&self) {
        self.disconnect().await;
        self.shared.listeners.clear();
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Publish a direct message to `/app/chat/sendMessage`.
    ///
    /// Fails immediately with [`ChannelError::NotInitialized`] or
    /// [`ChannelError::NotConnected`] when there is no usable session. Nothing
    /// is queued or retried.
    pub async fn send_message(&self, message: &DirectMessage) -> Result<(), ChannelError> {
        let commands = self.shared.publish_handle()?;
        let body = encode_payload(message)?;
        let destination = ChannelTopic::direct(message.sender_id, message.receiver_id)
            .send_destination();

        debug!(message_id = %message.message_id, "Sending message");
        self.publish(commands, destination, body).await
    }

    /// Publish a group message to `/app/group-chat/sendMessage`.
    pub async fn send_group_message(&self, message: &GroupMessage) -> Result<(), ChannelError> {
        let commands = self.shared.publish_handle()?;
        let body = encode_payload(message)?;
        let destination = ChannelTopic::group(message.group_id).send_destination();

        debug!(group = %message.group_id, "Sending group message");
        self.publish(commands, destination, body).await
    }

    async fn publish(
        &self,
        commands: mpsc::Sender<SessionCommand>,
        destination: &str,
        body: String,
    ) -> Result<(), ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(SessionCommand::Send {
                destination: destination.to_string(),
                body,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ChannelError::SessionClosed)?;

        let result = reply_rx.await.unwrap_or(Err(ChannelError::SessionClosed));
        if let Err(e) = &result {
            warn!(destination = %destination, error = %e, "Error sending message");
        }
        result
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    pub fn on_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&DirectMessage) + Send + Sync + 'static,
    {
        self.shared.listeners.on_message(callback)
    }

    pub fn on_group_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&GroupMessage) + Send + Sync + 'static,
    {
        self.shared.listeners.on_group_message(callback)
    }

    /// Connection-state listener. Advisory: `connect` results are the
    /// authoritative signal.
    pub fn on_connection_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .on_connection_change(move |connected: &bool| callback(*connected))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.total()
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn connection_status(&self) -> bool {
        self.shared.phase() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.phase()
    }

    /// Name of the subscribed topic, e.g. `chat-10-42`.
    pub async fn active_topic(&self) -> Option<String> {
        let lifecycle = self.lifecycle.lock().await;
        let subscription = lifecycle.active.subscription()?;
        let name = self.shared.routes().get(subscription).map(|t| t.name());
        name
    }

    pub async fn active_channel(&self) -> ActiveChannel {
        self.lifecycle.lock().await.active.clone()
    }

    pub async fn user_id(&self) -> Option<UserId> {
        self.lifecycle.lock().await.self_id
    }

    /// Negotiated parameters of the open session.
    pub async fn handshake(&self) -> Option<Handshake> {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.session.as_ref().map(|s| s.handshake.clone())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Reuse the connected session or open a new one.
    async fn ensure_session(&self, lifecycle: &mut Lifecycle) -> Result<(), ChannelError> {
        if lifecycle.session.is_some() && self.connection_status() {
            return Ok(());
        }

        // A dead session's subscriptions died with it.
        if let Some(stale) = lifecycle.session.take() {
            let _ = stale.commands.send(SessionCommand::Disconnect).await;
        }
        lifecycle.active = ActiveChannel::None;
        self.shared.routes().clear();

        let generation = self.shared.begin_connecting();
        match self.establish().await {
            Ok((commands, notifications, handshake)) => {
                // Before the dispatcher starts, so its close always follows Connected.
                if !self.shared.mark_connected(generation, commands.clone()) {
                    let _ = commands.send(SessionCommand::Disconnect).await;
                    return Err(ChannelError::SessionClosed);
                }
                tokio::spawn(dispatch_loop(self.shared.clone(), generation, notifications));
                lifecycle.session = Some(SessionHandle { commands, handshake });
                info!(endpoint = %self.config.endpoint, "Connected to broker");
                Ok(())
            }
            Err(e) => {
                error!(endpoint = %self.config.endpoint, error = %e, "Broker connection failed");
                self.shared.mark_disconnected(generation);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
    ) -> Result<
        (
            mpsc::Sender<SessionCommand>,
            mpsc::UnboundedReceiver<SessionNotification>,
            Handshake,
        ),
        ChannelError,
    > {
        let endpoint = resolve_endpoint(&self.config.endpoint, self.config.sockjs)?;
        let session_config = self.config.session_config();

        let mut attempt = 1;
        loop {
            match spawn_session(self.connector.as_ref(), &endpoint, &session_config).await {
                Ok(session) => return Ok(session),
                Err(e) => match self.config.retry.backoff_for(attempt) {
                    Some(delay) if e.is_retryable() => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Connect attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    _ => return Err(e),
                },
            }
        }
    }

    /// Make `topic` the single active subscription.
    async fn select_channel(&self, lifecycle: &mut Lifecycle, topic: ChannelTopic) -> Result<(), ChannelError> {
        let commands = match &lifecycle.session {
            Some(session) => session.commands.clone(),
            None => return Err(ChannelError::NotInitialized),
        };

        if let Some(previous) = lifecycle.active.subscription().map(str::to_string) {
            let current = self.shared.routes().get(&previous).copied();
            if current == Some(topic) {
                debug!(topic = %topic, "Already subscribed");
                return Ok(());
            }
            self.shared.routes().remove(&previous);
            commands
                .send(SessionCommand::Unsubscribe { id: previous.clone() })
                .await
                .map_err(|_| ChannelError::SessionClosed)?;
            debug!(subscription = %previous, "Unsubscribed previous channel");
        }
        lifecycle.active = ActiveChannel::None;

        let subscription = format!("sub-{}", lifecycle.next_subscription);
        lifecycle.next_subscription += 1;

        self.shared.routes().insert(subscription.clone(), topic);
        commands
            .send(SessionCommand::Subscribe {
                id: subscription.clone(),
                destination: topic.destination(),
            })
            .await
            .map_err(|_| ChannelError::SessionClosed)?;

        lifecycle.active = match topic {
            ChannelTopic::Direct { low, high } => {
                let peer_id = if Some(low) == lifecycle.self_id { high } else { low };
                info!(topic = %topic, "Subscribed to chat channel");
                ActiveChannel::Direct { peer_id, subscription }
            }
            ChannelTopic::Group(group_id) => {
                info!(topic = %topic, "Subscribed to group chat channel");
                ActiveChannel::Group { group_id, subscription }
            }
        };
        Ok(())
    }
}

/// Per-session task feeding inbound traffic to the listeners.
async fn dispatch_loop(
    shared: Arc<Shared>,
    generation: u64,
    mut notifications: mpsc::UnboundedReceiver<SessionNotification>,
) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            SessionNotification::Message {
                subscription,
                destination,
                body,
            } => shared.route(&subscription, &destination, &body),
            SessionNotification::Error { message } => {
                error!(message = %message, "Stomp error");
                shared.mark_disconnected(generation);
            }
            SessionNotification::Closed { reason } => {
                info!(reason = %reason, "Disconnected from broker");
                shared.mark_disconnected(generation);
                break;
            }
        }
    }
    // Also covers the session task ending without a Closed notification.
    shared.mark_disconnected(generation);
    debug!(generation, "Dispatcher finished");
}
