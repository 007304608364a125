pub mod adapter;
pub mod error;
pub mod send;

pub use adapter::DiscordAdapter;
pub use error::DiscordError;
