use thiserror::Error;

/// Top-level error taxonomy. Subsystem crates define their own `thiserror`
/// enums (`SecurityError`, `RouterError`, `AgentError`, ...) and convert
/// into this one at the boundary where the gateway binary needs a single
/// error type (CLI exit codes, tool-server JSON bodies).
#[derive(Debug, Error)]
pub enum IrisError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Admission kind: policy disabled, not allowed, pairing required, or
    /// rate limited. Non-retryable; surfaced to the user as a single reply.
    #[error("admission denied: {0}")]
    Admission(String),

    /// Transient transport failure — network blip, Agent 5xx, SDK reconnect.
    /// Retried at the outbound queue / Agent subscription layer.
    #[error("transient transport error ({channel}): {reason}")]
    TransportTransient { channel: String, reason: String },

    /// Permanent transport failure — bad token, logged-out session.
    /// The adapter does not auto-reconnect; surfaced via the health endpoint.
    #[error("permanent transport error ({channel}): {reason}")]
    TransportPermanent { channel: String, reason: String },

    /// Malformed inbound event — missing required fields. Dropped with a log.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Adapter asked to perform an operation its capabilities don't support.
    #[error("capability not supported: {channel} cannot {op}")]
    Capability { channel: String, op: String },

    /// Persisted-store I/O failure under lock; in-memory state unadvanced.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("agent backend error: {0}")]
    Agent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timeout after {ms}ms")]
    Timeout { ms: u64 },

    /// Startup-time error: invalid config, no channels enabled, etc.
    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IrisError {
    /// Short code used in tool-server JSON error bodies and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            IrisError::Config(_) => "CONFIG_ERROR",
            IrisError::Admission(_) => "ADMISSION_DENIED",
            IrisError::TransportTransient { .. } => "TRANSPORT_TRANSIENT",
            IrisError::TransportPermanent { .. } => "TRANSPORT_PERMANENT",
            IrisError::Protocol(_) => "PROTOCOL_ERROR",
            IrisError::Capability { .. } => "CAPABILITY_UNSUPPORTED",
            IrisError::Persistence(_) => "PERSISTENCE_ERROR",
            IrisError::Database(_) => "DATABASE_ERROR",
            IrisError::Agent(_) => "AGENT_ERROR",
            IrisError::Serialization(_) => "SERIALIZATION_ERROR",
            IrisError::Io(_) => "IO_ERROR",
            IrisError::Timeout { .. } => "TIMEOUT",
            IrisError::Fatal(_) => "FATAL",
            IrisError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, IrisError>;
