mod client;
mod error;
mod events;
mod types;

pub use client::AgentClient;
pub use error::{AgentError, Result};
pub use events::subscribe_events;
pub use types::{AgentEvent, AgentSession};
