//! Orchestrator of the inbound→outbound pipeline (§4.9).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use iris_channels::{ChannelManager, InboundMessage, MessageCache};
use iris_core::config::ChannelConfig;
use iris_core::types::{Chat, SessionKey};
use iris_hooks::{HookContext, HookEngine, HookEvent, HookAction};
use iris_security::{AdmissionReject, AutoReplyEngine, MatchContext, SecurityGate};
use iris_sessions::{SessionCreator, SessionManager};
use regex::RegexBuilder;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::coalescer::StreamCoalescer;
use crate::error::{Result, RouterError};
use crate::pending::PendingResponseTable;
use crate::queue::{OutboundItem, OutboundQueue};

/// Sends a prompt to the external Agent. Implemented by the Agent Client.
/// Kept separate from [`SessionCreator`] (rather than as a supertrait) so
/// both can be built as independent trait objects over the same client.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn send_message_async(&self, agent_session_id: &str, text: &str) -> std::result::Result<(), String>;
}

pub struct MessageRouter {
    channels: Arc<ChannelManager>,
    channel_configs: HashMap<String, ChannelConfig>,
    gate: Arc<SecurityGate>,
    auto_reply: Option<Arc<AutoReplyEngine>>,
    sessions: Arc<SessionManager>,
    cache: Arc<MessageCache>,
    outbound: Arc<OutboundQueue>,
    pending: Arc<PendingResponseTable>,
    session_creator: Arc<dyn SessionCreator>,
    agent: Arc<dyn AgentDispatcher>,
    hooks: Arc<HookEngine>,
    coalescers: AsyncMutex<HashMap<String, StreamCoalescer>>,
    /// First-flush message id per in-flight session, so `editInPlace` knows
    /// which message to edit on later flushes.
    streamed_message_ids: AsyncMutex<HashMap<String, String>>,
    /// Populated post-construction as each adapter reports `Connected` —
    /// shared across tasks, so plain interior mutability instead of `&mut self`.
    bot_ids: DashMap<String, String>,
}

impl MessageRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channels: Arc<ChannelManager>,
        channel_configs: HashMap<String, ChannelConfig>,
        gate: Arc<SecurityGate>,
        auto_reply: Option<Arc<AutoReplyEngine>>,
        sessions: Arc<SessionManager>,
        cache: Arc<MessageCache>,
        outbound: Arc<OutboundQueue>,
        pending: Arc<PendingResponseTable>,
        session_creator: Arc<dyn SessionCreator>,
        agent: Arc<dyn AgentDispatcher>,
        hooks: Arc<HookEngine>,
    ) -> Self {
        Self {
            channels,
            channel_configs,
            gate,
            auto_reply,
            sessions,
            cache,
            outbound,
            pending,
            session_creator,
            agent,
            hooks,
            coalescers: AsyncMutex::new(HashMap::new()),
            streamed_message_ids: AsyncMutex::new(HashMap::new()),
            bot_ids: DashMap::new(),
        }
    }

    /// Record the adapter's own bot identity, used by group-mention gating's
    /// default `@botId\b` pattern. Called once an adapter reports `Connected`.
    pub fn set_bot_id(&self, channel_id: &str, bot_id: &str) {
        self.bot_ids.insert(channel_id.to_string(), bot_id.to_string());
    }

    /// Run the full §4.9 pipeline for one inbound message.
    pub async fn handle_inbound(&self, msg: InboundMessage) -> Result<()> {
        let config = self
            .channel_configs
            .get(&msg.channel_id)
            .ok_or_else(|| RouterError::UnknownChannel(msg.channel_id.clone()))?;

        let sender_name = msg.sender_name.clone().unwrap_or_else(|| msg.sender_id.clone());

        // Step 2: admission.
        let decision = self.gate.check(&msg.channel_id, &msg.sender_id, &sender_name)?;
        if let Err(reject) = decision {
            if let AdmissionReject::PairingRequired { message, .. } = &reject {
                self.reply(&msg, message).await;
            }
            let reason = reject.reason();
            self.hooks.emit(
                HookContext::new(HookEvent::AdmissionRejected, serde_json::json!({ "reason": reason }))
                    .with_channel(msg.channel_id.clone()),
            );
            debug!(channel = %msg.channel_id, sender = %msg.sender_id, reason, "admission rejected");
            return Ok(());
        }

        let chat_type: Chat = msg.chat_type.into();
        let mut text = msg.text.clone().unwrap_or_default();

        // Before the rest of the pipeline runs, let any registered hook
        // observe or block the inbound message.
        let received_ctx = HookContext::new(
            HookEvent::MessageReceived,
            serde_json::json!({ "senderId": msg.sender_id, "chatId": msg.chat_id, "text": text }),
        )
        .with_channel(msg.channel_id.clone());
        if let HookAction::Block { reason } = self.hooks.emit(received_ctx).action {
            debug!(channel = %msg.channel_id, reason, "message blocked by hook");
            return Ok(());
        }

        // Step 3: group mention gating.
        if matches!(msg.chat_type, iris_channels::ChatType::Group)
            && config.group_policy.enabled
            && config.group_policy.require_mention
        {
            let bot_id = self.bot_ids.get(&msg.channel_id).map(|r| r.clone());
            match strip_mention(&text, config.mention_pattern.as_deref(), bot_id.as_ref()) {
                Some(stripped) => text = stripped,
                None => {
                    debug!(channel = %msg.channel_id, "group message dropped: no mention");
                    return Ok(());
                }
            }
        }

        // Step 4: /new or /start.
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("/new") || trimmed.eq_ignore_ascii_case("/start") {
            let key = SessionKey::new(&msg.channel_id, chat_type, &msg.chat_id, &msg.sender_id);
            if self.sessions.reset(&key)? {
                self.hooks.emit(
                    HookContext::new(HookEvent::SessionEnd, serde_json::json!({ "sessionKey": key.as_str() }))
                        .with_channel(msg.channel_id.clone()),
                );
            }
            self.reply(&msg, "Session reset. Send a message to start fresh.").await;
            return Ok(());
        }

        // Step 5: auto-reply.
        if let Some(engine) = &self.auto_reply {
            let ctx = MatchContext {
                channel_id: &msg.channel_id,
                chat_type,
                sender_id: &msg.sender_id,
                sender_name: &sender_name,
                text: &text,
            };
            if let Some(auto_match) = engine.match_message(&ctx) {
                self.reply(&msg, &auto_match.response).await;
                if !auto_match.forward_to_ai {
                    return Ok(());
                }
            }
        }

        // Step 6: session resolution.
        let key = SessionKey::new(&msg.channel_id, chat_type, &msg.chat_id, &msg.sender_id);
        let is_new_session = self.sessions.get(&key)?.is_none();
        let title = format!("{} ({})", sender_name, msg.channel_id);
        let agent_session_id = self.sessions.resolve(&key, &title, self.session_creator.as_ref()).await?;
        if is_new_session {
            self.hooks.emit(
                HookContext::new(HookEvent::SessionStart, serde_json::json!({ "sessionKey": key.as_str() }))
                    .with_channel(msg.channel_id.clone())
                    .with_session_key(key.clone()),
            );
        }

        // Step 7: pending response bookkeeping.
        self.pending.insert(
            agent_session_id.as_str().to_string(),
            msg.channel_id.clone(),
            msg.chat_id.clone(),
            Some(msg.id.clone()),
        );

        // Step 8: fire-and-forget typing indicator.
        if let Some(channel) = self.channels.get(&msg.channel_id) {
            if channel.capabilities().typing {
                let channel = Arc::clone(&channel);
                let chat_id = msg.chat_id.clone();
                tokio::spawn(async move {
                    let _ = channel.send_typing(&chat_id).await;
                });
            }
        }

        // Step 9: install a coalescer iff streaming is enabled for this channel.
        if config.streaming.enabled {
            let mut coalescers = self.coalescers.lock().await;
            coalescers.insert(agent_session_id.as_str().to_string(), StreamCoalescer::new(config.streaming));
        }

        // Step 10: dispatch to the Agent asynchronously.
        self.agent
            .send_message_async(agent_session_id.as_str(), &text)
            .await
            .map_err(RouterError::Agent)?;

        Ok(())
    }

    /// `partial(sessionId, delta)`: route into the coalescer if one exists.
    pub async fn handle_partial(&self, agent_session_id: &str, delta: &str) -> Result<()> {
        let mut coalescers = self.coalescers.lock().await;
        let Some(coalescer) = coalescers.get_mut(agent_session_id) else { return Ok(()) };
        let flushes = coalescer.append(delta);
        drop(coalescers);
        for flush in flushes {
            self.deliver_flush(agent_session_id, &flush.text, flush.kind).await?;
        }
        Ok(())
    }

    /// `response(sessionId, text)`: end the coalescer, or chunk the whole
    /// response onto the pending chat directly if none was installed.
    pub async fn handle_response(&self, agent_session_id: &str, text: &str) -> Result<()> {
        let mut coalescers = self.coalescers.lock().await;
        if let Some(mut coalescer) = coalescers.remove(agent_session_id) {
            drop(coalescers);
            if let Some(flush) = coalescer.end() {
                self.deliver_flush(agent_session_id, &flush.text, flush.kind).await?;
            }
            self.streamed_message_ids.lock().await.remove(agent_session_id);
            return Ok(());
        }
        drop(coalescers);

        let Some(pending) = self.pending.take(agent_session_id) else {
            warn!(agent_session_id, "response arrived with no pending entry, dropping");
            return Ok(());
        };
        let max_len = self
            .channels
            .get(&pending.channel_id)
            .map(|c| c.capabilities().max_text_length)
            .unwrap_or(4096);
        let chunks = iris_channels::chunk_text(text, max_len);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let reply_to_id = if i == 0 { pending.reply_to_id.clone() } else { None };
            self.outbound.enqueue(OutboundItem {
                channel_id: pending.channel_id.clone(),
                chat_id: pending.chat_id.clone(),
                text: chunk,
                reply_to_id,
            });
        }
        self.hooks.emit(
            HookContext::new(HookEvent::MessageSent, serde_json::json!({ "agentSessionId": agent_session_id }))
                .with_channel(pending.channel_id.clone()),
        );
        Ok(())
    }

    /// `error(sessionId, err)`: log and drop the coalescer and pending entry.
    pub async fn handle_agent_error(&self, agent_session_id: &str, err: &str) {
        warn!(agent_session_id, error = err, "agent reported error for session");
        self.coalescers.lock().await.remove(agent_session_id);
        self.streamed_message_ids.lock().await.remove(agent_session_id);
        self.pending.remove(agent_session_id);
    }

    /// New-message flushes go direct to the adapter (not the Outbound
    /// Queue) so the returned message id can be remembered for a later
    /// `editInPlace` flush on the same session.
    async fn deliver_flush(&self, agent_session_id: &str, text: &str, kind: crate::coalescer::FlushKind) -> Result<()> {
        let Some(pending) = self.pending.get(agent_session_id) else { return Ok(()) };
        let Some(channel) = self.channels.get(&pending.channel_id) else { return Ok(()) };

        match kind {
            crate::coalescer::FlushKind::NewMessage => {
                let message_id = channel.send_text(&pending.chat_id, text, pending.reply_to_id.as_deref()).await?;
                self.cache.insert(message_id.clone(), pending.channel_id.clone(), pending.chat_id.clone());
                self.hooks.emit(
                    HookContext::new(HookEvent::MessageSent, serde_json::json!({ "agentSessionId": agent_session_id }))
                        .with_channel(pending.channel_id.clone()),
                );
                self.streamed_message_ids.lock().await.insert(agent_session_id.to_string(), message_id);
            }
            crate::coalescer::FlushKind::Edit => {
                let message_id = self.streamed_message_ids.lock().await.get(agent_session_id).cloned();
                if let Some(message_id) = message_id {
                    channel.edit_message(&pending.chat_id, &message_id, text).await?;
                }
            }
        }
        Ok(())
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) {
        if let Some(channel) = self.channels.get(&msg.channel_id) {
            match channel.send_text(&msg.chat_id, text, Some(&msg.id)).await {
                Ok(message_id) => self.cache.insert(message_id, msg.channel_id.clone(), msg.chat_id.clone()),
                Err(e) => warn!(channel = %msg.channel_id, error = %e, "failed to send gate reply"),
            }
        }
    }
}

/// Group-mention gating: strip the mention and return `Some(text)` if the
/// message should be processed, `None` to drop it silently.
fn strip_mention(text: &str, custom_pattern: Option<&str>, bot_id: Option<&String>) -> Option<String> {
    let pattern = match custom_pattern {
        Some(p) => p.to_string(),
        None => {
            let bot_id = bot_id?;
            format!(r"@{}\b", regex::escape(bot_id))
        }
    };
    let re = RegexBuilder::new(&pattern).case_insensitive(true).build().ok()?;
    if !re.is_match(text) {
        return None;
    }
    let stripped = re.replace(text, "").to_string();
    Some(stripped.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_mention_drops_unmentioned_group_text() {
        let bot_id = "mybot".to_string();
        assert!(strip_mention("hello", None, Some(&bot_id)).is_none());
    }

    #[test]
    fn strip_mention_removes_mention_case_insensitively() {
        let bot_id = "mybot".to_string();
        let stripped = strip_mention("hey @MyBot please help", None, Some(&bot_id)).unwrap();
        assert_eq!(stripped, "hey please help");
    }

    #[test]
    fn strip_mention_honors_custom_pattern() {
        let stripped = strip_mention("!! ping the bot", Some(r"ping"), None).unwrap();
        assert_eq!(stripped, "!! the bot");
    }
}
