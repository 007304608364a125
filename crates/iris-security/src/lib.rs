pub mod allowlist;
pub mod autoreply;
pub mod error;
pub mod gate;
pub mod pairing;
mod store;

pub use allowlist::{AllowlistEntry, AllowlistStore};
pub use autoreply::{AutoReplyEngine, AutoReplyMatch, MatchContext};
pub use error::SecurityError;
pub use gate::{AdmissionReject, GateDecision, RateLimiter, SecurityGate};
pub use pairing::{PairingRequest, PairingStore, ALPHABET};
