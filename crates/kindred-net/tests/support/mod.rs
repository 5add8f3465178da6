//! In-memory STOMP broker for driving the channel without a network.
//!
//! Behaves like the chat backend: SEND to `/app/chat/sendMessage` is fanned
//! out on `/topic/chat-{low}-{high}`, SEND to `/app/group-chat/sendMessage`
//! on `/topic/group-chat-{groupId}`, to every subscriber including the sender.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::channel::mpsc as fmpsc;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};

use kindred_net::{
    ChannelConfig, Command, Connector, Frame, FrameDecoder, FrameSink, FrameStream, Heartbeat,
    Received, TransportError,
};
use kindred_shared::constants::{DIRECT_SEND_DESTINATION, GROUP_SEND_DESTINATION};
use kindred_shared::protocol::decode_payload;
use kindred_shared::{ChannelTopic, DirectMessage, GroupMessage};

/// How the broker answers CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehaviour {
    Accept,
    /// Reply with an ERROR frame and close.
    Reject,
    /// Never answer.
    Silent,
    /// Send CONNECTED, then close the connection straight away.
    AcceptThenClose,
}

struct Client {
    outbound: fmpsc::UnboundedSender<String>,
    /// subscription id -> destination
    subscriptions: BTreeMap<String, String>,
}

struct BrokerState {
    behaviour: ConnectBehaviour,
    refuse_next: usize,
    connect_attempts: usize,
    next_client: usize,
    clients: HashMap<usize, Client>,
    published: Vec<(String, String)>,
    commands: Vec<Command>,
    heart_beats: usize,
    /// `heart-beat` header sent in CONNECTED.
    heartbeat_header: String,
    next_message: u64,
}

#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_behaviour(ConnectBehaviour::Accept)
    }

    pub fn with_behaviour(behaviour: ConnectBehaviour) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                behaviour,
                refuse_next: 0,
                connect_attempts: 0,
                next_client: 0,
                clients: HashMap::new(),
                published: Vec::new(),
                commands: Vec::new(),
                heart_beats: 0,
                heartbeat_header: "0,0".to_string(),
                next_message: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    /// Fail the next `n` transport connects.
    pub fn refuse_next(&self, n: usize) {
        self.lock().refuse_next = n;
    }

    /// Answer CONNECT with this `heart-beat` header (`"sx,sy"`).
    pub fn set_heartbeat(&self, header: &str) {
        self.lock().heartbeat_header = header.to_string();
    }

    /// Bare-EOL heart-beats received from clients.
    pub fn heart_beats(&self) -> usize {
        self.lock().heart_beats
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn open_connections(&self) -> usize {
        self.lock().clients.len()
    }

    /// Destinations currently subscribed, across all connections, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let state = self.lock();
        let mut all: Vec<String> = state
            .clients
            .values()
            .flat_map(|c| c.subscriptions.values().cloned())
            .collect();
        all.sort();
        all
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.lock().published.clone()
    }

    /// Commands received from clients, in arrival order.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    /// Deliver a raw body to every subscriber of `destination`.
    pub fn inject(&self, destination: &str, body: &str) {
        deliver(&mut self.lock(), destination, body);
    }

    /// Close every connection from the broker side.
    pub fn drop_clients(&self) {
        self.lock().clients.clear();
    }

    /// Send an ERROR frame to every client, then close them.
    pub fn fail_all(&self, message: &str) {
        let mut state = self.lock();
        let frame = Frame::new(Command::Error).header("message", message).encode();
        for client in state.clients.values() {
            let _ = client.outbound.unbounded_send(frame.clone());
        }
        state.clients.clear();
    }

    async fn serve(self, id: usize, mut inbound: fmpsc::UnboundedReceiver<String>) {
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = inbound.next().await {
            decoder.push(&chunk);
            while let Ok(Some(received)) = decoder.next_frame() {
                match received {
                    Received::Frame(frame) => self.handle(id, frame),
                    Received::KeepAlive => self.lock().heart_beats += 1,
                }
            }
        }
        self.lock().clients.remove(&id);
    }

    fn handle(&self, id: usize, frame: Frame) {
        let mut state = self.lock();
        state.commands.push(frame.command);

        match frame.command {
            Command::Connect | Command::Stomp => match state.behaviour {
                ConnectBehaviour::Accept | ConnectBehaviour::AcceptThenClose => {
                    let reply = Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", state.heartbeat_header.clone())
                        .header("server", "memory-broker/1.0")
                        .encode();
                    if let Some(client) = state.clients.get(&id) {
                        let _ = client.outbound.unbounded_send(reply);
                    }
                    if state.behaviour == ConnectBehaviour::AcceptThenClose {
                        state.clients.remove(&id);
                    }
                }
                ConnectBehaviour::Reject => {
                    let reply = Frame::new(Command::Error)
                        .header("message", "Access denied")
                        .encode();
                    if let Some(client) = state.clients.remove(&id) {
                        let _ = client.outbound.unbounded_send(reply);
                    }
                }
                ConnectBehaviour::Silent => {}
            },
            Command::Subscribe => {
                let sub = frame.get("id").unwrap_or_default().to_string();
                let destination = frame.get("destination").unwrap_or_default().to_string();
                if let Some(client) = state.clients.get_mut(&id) {
                    client.subscriptions.insert(sub, destination);
                }
            }
            Command::Unsubscribe => {
                let sub = frame.get("id").unwrap_or_default().to_string();
                if let Some(client) = state.clients.get_mut(&id) {
                    client.subscriptions.remove(&sub);
                }
            }
            Command::Send => {
                let destination = frame.get("destination").unwrap_or_default().to_string();
                state.published.push((destination.clone(), frame.body.clone()));

                let topic = if destination == DIRECT_SEND_DESTINATION {
                    decode_payload::<DirectMessage>(&frame.body)
                        .ok()
                        .map(|m| ChannelTopic::direct(m.sender_id, m.receiver_id))
                } else if destination == GROUP_SEND_DESTINATION {
                    decode_payload::<GroupMessage>(&frame.body)
                        .ok()
                        .map(|m| ChannelTopic::group(m.group_id))
                } else {
                    None
                };
                if let Some(topic) = topic {
                    deliver(&mut state, &topic.destination(), &frame.body);
                }
            }
            Command::Disconnect => {
                state.clients.remove(&id);
            }
            _ => {}
        }
    }
}

fn deliver(state: &mut BrokerState, destination: &str, body: &str) {
    let mut outgoing = Vec::new();
    for client in state.clients.values() {
        for (sub, dest) in &client.subscriptions {
            if dest == destination {
                outgoing.push((client.outbound.clone(), sub.clone()));
            }
        }
    }
    for (outbound, sub) in outgoing {
        state.next_message += 1;
        let frame = Frame::new(Command::Message)
            .header("subscription", sub)
            .header("destination", destination)
            .header("message-id", state.next_message.to_string())
            .with_body(body)
            .encode();
        let _ = outbound.unbounded_send(frame);
    }
}

impl Connector for MemoryBroker {
    fn connect(
        &self,
        _endpoint: &str,
    ) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>> {
        let broker = self.clone();
        Box::pin(async move {
            let (to_client_tx, to_client_rx) = fmpsc::unbounded::<String>();
            let (to_broker_tx, to_broker_rx) = fmpsc::unbounded::<String>();

            let id = {
                let mut state = broker.lock();
                state.connect_attempts += 1;
                if state.refuse_next > 0 {
                    state.refuse_next -= 1;
                    return Err(TransportError::Closed("connection refused".to_string()));
                }
                let id = state.next_client;
                state.next_client += 1;
                state.clients.insert(
                    id,
                    Client {
                        outbound: to_client_tx,
                        subscriptions: BTreeMap::new(),
                    },
                );
                id
            };

            tokio::spawn(broker.clone().serve(id, to_broker_rx));

            let sink: FrameSink =
                Box::pin(to_broker_tx.sink_map_err(|e| TransportError::Closed(e.to_string())));
            let stream: FrameStream = Box::pin(to_client_rx.map(Ok::<String, TransportError>));
            Ok((sink, stream))
        })
    }
}

/// Config pointing nowhere in particular, heart-beats off, short timeout.
pub fn test_config() -> ChannelConfig {
    let mut config = ChannelConfig::default();
    config.endpoint = "ws://broker.test/ws".to_string();
    config.sockjs = false;
    config.heartbeat = Heartbeat::new(0, 0);
    config.connect_timeout = Duration::from_millis(500);
    config
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("kindred_net=debug"))
        .with_test_writer()
        .try_init();
}
