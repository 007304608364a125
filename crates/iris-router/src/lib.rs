pub mod coalescer;
pub mod error;
pub mod pending;
pub mod queue;
pub mod router;

pub use coalescer::{Flush, FlushKind, StreamCoalescer};
pub use error::RouterError;
pub use pending::{PendingResponse, PendingResponseTable, PENDING_TTL, SWEEP_INTERVAL};
pub use queue::{OutboundDeliverer, OutboundItem, OutboundQueue};
pub use router::{AgentDispatcher, MessageRouter};
