use iris_channels::ChannelError;

/// Errors produced by the WhatsApp adapter.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bridge returned {status}: {body}")]
    Bridge { status: u16, body: String },

    #[error("missing bridge configuration: {0}")]
    Config(String),
}

impl From<WhatsAppError> for ChannelError {
    fn from(err: WhatsAppError) -> Self {
        match err {
            WhatsAppError::Http(e) => ChannelError::SendFailed(e.to_string()),
            WhatsAppError::Bridge { status, body } => ChannelError::SendFailed(format!("{status}: {body}")),
            WhatsAppError::Config(msg) => ChannelError::ConfigError(msg),
        }
    }
}
