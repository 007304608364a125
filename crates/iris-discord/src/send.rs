//! Outbound text delivery for the Discord adapter.

use serenity::builder::CreateMessage;
use serenity::model::id::{ChannelId, MessageId};

use iris_channels::chunk::{chunk_text, MAX_LEN_DISCORD};

/// Send `text` to `channel_id`, splitting it into Discord-sized chunks.
/// Only the first chunk replies to `reply_to`; the rest are plain follow-ups
/// in the same channel, matching how a human would continue a thread.
pub async fn send_response(
    http: &serenity::http::Http,
    channel_id: ChannelId,
    text: &str,
    reply_to: Option<MessageId>,
) -> Result<String, serenity::Error> {
    let chunks = chunk_text(text, MAX_LEN_DISCORD);
    let mut last_id = None;

    for (i, chunk) in chunks.iter().enumerate() {
        let mut builder = CreateMessage::new().content(chunk);
        if i == 0 {
            if let Some(id) = reply_to {
                builder = builder.reference_message((channel_id, id));
            }
        }
        let sent = channel_id.send_message(http, builder).await?;
        last_id = Some(sent.id);
    }

    Ok(last_id.map(|id| id.to_string()).unwrap_or_default())
}
