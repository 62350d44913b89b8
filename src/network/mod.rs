mod channel;
mod topic;
mod transport;
mod websocket;

pub use channel::{ChannelManager, SessionCredentials, Subscription, SubscriptionToken};
pub use topic::{
    decode_event, ClientFrame, ContentAdvance, ServerFrame, TopicEvent, TopicKind,
    CONTENT_ADVANCED_MARKER,
};
pub use transport::{Transport, TransportConnection};
pub use websocket::WebSocketTransport;
