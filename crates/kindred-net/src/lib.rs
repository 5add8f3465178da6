// Realtime chat transport: STOMP over WebSocket.

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod listeners;
pub mod retry;
pub mod session;
pub mod transport;

pub use channel::{ActiveChannel, ConnectionState, RealtimeMessagingChannel};
pub use config::{ChannelConfig, Environment};
pub use error::{ChannelError, FrameError, TransportError};
pub use frame::{Command, Frame, FrameDecoder, Heartbeat, Received};
pub use listeners::ListenerId;
pub use retry::RetryPolicy;
pub use session::{spawn_session, Handshake, SessionCommand, SessionConfig, SessionNotification};
pub use transport::{resolve_endpoint, Connector, FrameSink, FrameStream, WebSocketConnector};
