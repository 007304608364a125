use iris_channels::ChannelError;

/// Errors produced by the Telegram adapter.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("teloxide error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("no bot token configured")]
    NoToken,
}

impl From<TelegramError> for ChannelError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::Teloxide(e) => ChannelError::SendFailed(e.to_string()),
            TelegramError::NoToken => ChannelError::ConfigError("missing bot_token".to_string()),
        }
    }
}
