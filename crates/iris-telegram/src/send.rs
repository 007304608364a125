//! Outbound text delivery for the Telegram adapter.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ReplyParameters;
use tracing::warn;

use iris_channels::chunk::{chunk_text, MAX_LEN_TELEGRAM};

/// Send `text` to `chat_id`, splitting it into Telegram-sized chunks.
///
/// A short delay is inserted between consecutive chunks to avoid tripping
/// Telegram's per-chat rate limit. Returns the id of the last message sent,
/// since that's the one a caller would reply to or edit next.
pub async fn send_response(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    reply_to_id: Option<i32>,
) -> Result<String, teloxide::RequestError> {
    let chunks = chunk_text(text, MAX_LEN_TELEGRAM);
    let mut last_id = None;

    for (i, chunk) in chunks.iter().enumerate() {
        let mut request = bot.send_message(chat_id, chunk);
        if i == 0 {
            if let Some(reply_id) = reply_to_id {
                request = request.reply_parameters(ReplyParameters::new(MessageId(reply_id)));
            }
        }
        let sent = request.await?;
        last_id = Some(sent.id.0);

        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    match last_id {
        Some(id) => Ok(id.to_string()),
        None => {
            warn!(chat_id = chat_id.0, "send_response called with empty text");
            Ok(String::new())
        }
    }
}
