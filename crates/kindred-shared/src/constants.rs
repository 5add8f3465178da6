/// Application name
pub const APP_NAME: &str = "Kindred";

/// Prefix the broker uses for fan-out topics
pub const TOPIC_PREFIX: &str = "/topic/";

/// Destination direct chat messages are published to
pub const DIRECT_SEND_DESTINATION: &str = "/app/chat/sendMessage";

/// Destination group chat messages are published to
pub const GROUP_SEND_DESTINATION: &str = "/app/group-chat/sendMessage";

/// Topic name prefixes
pub const DIRECT_TOPIC_PREFIX: &str = "chat";
pub const GROUP_TOPIC_PREFIX: &str = "group-chat";

/// STOMP versions offered in the CONNECT frame
pub const STOMP_ACCEPT_VERSIONS: &str = "1.2,1.1,1.0";

/// Default heart-beat interval in milliseconds, both directions
pub const DEFAULT_HEARTBEAT_MS: u64 = 10_000;

/// Default time allowed for the transport + STOMP handshake, in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Message content length convention (characters, not bytes).
/// Enforced at composition time only; the transport carries anything.
pub const MAX_CONTENT_CHARS: usize = 500;

/// Broker endpoints per build environment
pub const DEV_WS_URL: &str = "http://192.168.1.105:8080/ws";
pub const PROD_WS_URL: &str = "wss://your-production-domain.com/ws";
