use iris_channels::ChannelError;

/// Errors produced by the Slack adapter.
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("slack api error: {0}")]
    Api(String),

    #[error("missing bot_token/app_token configuration")]
    NoToken,
}

impl From<SlackError> for ChannelError {
    fn from(err: SlackError) -> Self {
        match err {
            SlackError::Http(e) => ChannelError::ConnectionFailed(e.to_string()),
            SlackError::WebSocket(e) => ChannelError::ConnectionFailed(e.to_string()),
            SlackError::Api(msg) => ChannelError::AuthFailed(msg),
            SlackError::NoToken => ChannelError::ConfigError("missing bot_token/app_token".to_string()),
        }
    }
}
