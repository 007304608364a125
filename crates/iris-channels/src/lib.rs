pub mod cache;
pub mod channel;
pub mod chunk;
pub mod error;
pub mod manager;
pub mod types;

pub use cache::MessageCache;
pub use channel::Channel;
pub use chunk::chunk_text;
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use types::{
    ChannelCapabilities, ChannelEvent, ChannelStatus, ChatType, InboundMessage, Media, MediaKind,
    OutboundMessage,
};
