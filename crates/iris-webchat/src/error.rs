use iris_channels::ChannelError;

/// Errors produced by the in-process web chat adapter.
#[derive(Debug, thiserror::Error)]
pub enum WebchatError {
    #[error("connection {0} is not open")]
    ConnectionClosed(String),
}

impl From<WebchatError> for ChannelError {
    fn from(err: WebchatError) -> Self {
        match err {
            WebchatError::ConnectionClosed(conn_id) => ChannelError::SendFailed(format!("connection closed: {conn_id}")),
        }
    }
}
