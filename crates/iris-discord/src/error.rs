use iris_channels::ChannelError;

/// Errors produced by the Discord adapter.
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("serenity error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("no bot token configured")]
    NoToken,
}

impl From<DiscordError> for ChannelError {
    fn from(err: DiscordError) -> Self {
        match err {
            DiscordError::Serenity(e) => ChannelError::SendFailed(e.to_string()),
            DiscordError::NoToken => ChannelError::ConfigError("missing bot_token".to_string()),
        }
    }
}
