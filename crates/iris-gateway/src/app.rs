//! Shared state assembly and the health/tool HTTP routers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use iris_agent::AgentClient;
use iris_channels::{Channel, ChannelManager, MessageCache};
use iris_core::config::{ChannelConfig, ChannelType, IrisConfig};
use iris_core::error::{IrisError, Result};
use iris_discord::DiscordAdapter;
use iris_heartbeat::HeartbeatEngine;
use iris_hooks::{HookContext, HookEngine, HookEvent};
use iris_router::{MessageRouter, OutboundQueue, PendingResponseTable};
use iris_scheduler::SchedulerEngine;
use iris_security::{AutoReplyEngine, SecurityGate};
use iris_sessions::SessionManager;
use iris_slack::SlackAdapter;
use iris_telegram::TelegramAdapter;
use iris_webchat::WebchatAdapter;
use iris_whatsapp::WhatsAppAdapter;

/// Everything a running `gateway run` process, and every one-shot CLI
/// subcommand that touches live state, needs in hand.
pub struct AppState {
    pub config: IrisConfig,
    pub channels: Arc<ChannelManager>,
    pub channel_configs: HashMap<String, ChannelConfig>,
    pub gate: Arc<SecurityGate>,
    pub sessions: Arc<SessionManager>,
    pub cache: Arc<MessageCache>,
    pub outbound: Arc<OutboundQueue>,
    pub pending: Arc<PendingResponseTable>,
    pub router: Arc<MessageRouter>,
    pub hooks: Arc<HookEngine>,
    pub agent: Arc<AgentClient>,
    pub scheduler: Arc<SchedulerEngine>,
    pub heartbeat: Arc<HeartbeatEngine>,
    /// Only present when a `webchat`-typed channel is configured; the `/ws`
    /// route needs the concrete type to register/unregister connections,
    /// an operation outside the `Channel` trait's surface.
    pub webchat: Option<Arc<WebchatAdapter>>,
    pub started_at: Instant,
    pub root_cancellation: CancellationToken,
}

impl AppState {
    /// Build every subsystem from a loaded config. Does not start channel
    /// adapters or background loops — callers running the full gateway do
    /// that afterward via [`AppState::run_background`].
    pub async fn assemble(config: IrisConfig) -> Result<Arc<Self>> {
        let state_dir = iris_core::config::state_dir()?;

        let agent = Arc::new(AgentClient::new(&config.agent));

        let gate = Arc::new(SecurityGate::new(
            &state_dir,
            config.security.default_dm_policy,
            config.security.pairing_code_length,
            config.security.pairing_code_ttl_ms,
            config.security.rate_limit_per_minute,
            config.security.rate_limit_per_hour,
        ));

        let auto_reply = if config.auto_reply.enabled {
            Some(Arc::new(
                AutoReplyEngine::new(config.auto_reply.templates.clone())
                    .map_err(|e| IrisError::Config(e.to_string()))?,
            ))
        } else {
            None
        };

        let sessions_conn = open_connection(&state_dir, "session-map.sqlite")?;
        iris_sessions::db::init_db(&sessions_conn).map_err(|e| IrisError::Database(e.to_string()))?;
        let sessions = Arc::new(SessionManager::new(sessions_conn));

        let cache = Arc::new(MessageCache::new());
        let pending = Arc::new(PendingResponseTable::new());

        let mut manager = ChannelManager::new();
        let mut webchat_adapter: Option<Arc<WebchatAdapter>> = None;
        let mut channel_configs = HashMap::new();

        for (id, channel_config) in &config.channels {
            if !channel_config.enabled {
                continue;
            }
            let channel: Arc<dyn Channel> = match channel_config.kind {
                ChannelType::Telegram => Arc::new(
                    TelegramAdapter::new(id.clone(), channel_config)
                        .map_err(|e| IrisError::Config(e.to_string()))?,
                ),
                ChannelType::Discord => Arc::new(
                    DiscordAdapter::new(id.clone(), channel_config)
                        .map_err(|e| IrisError::Config(e.to_string()))?,
                ),
                ChannelType::Whatsapp => Arc::new(
                    WhatsAppAdapter::new(id.clone(), channel_config)
                        .map_err(|e| IrisError::Config(e.to_string()))?,
                ),
                ChannelType::Slack => Arc::new(
                    SlackAdapter::new(id.clone(), channel_config)
                        .map_err(|e| IrisError::Config(e.to_string()))?,
                ),
                ChannelType::Webchat => {
                    let adapter = Arc::new(WebchatAdapter::new(id.clone(), channel_config));
                    webchat_adapter = Some(Arc::clone(&adapter));
                    adapter
                }
            };
            manager.register(channel);
            channel_configs.insert(id.clone(), channel_config.clone());
        }
        let channels = Arc::new(manager);

        let outbound_deliverer = Arc::new(ChannelDeliverer { channels: Arc::clone(&channels) });
        let outbound = OutboundQueue::spawn(outbound_deliverer);
        let outbound = Arc::new(outbound);

        let hooks = Arc::new(HookEngine::new());

        let router = Arc::new(MessageRouter::new(
            Arc::clone(&channels),
            channel_configs.clone(),
            Arc::clone(&gate),
            auto_reply,
            Arc::clone(&sessions),
            Arc::clone(&cache),
            Arc::clone(&outbound),
            Arc::clone(&pending),
            Arc::clone(&agent) as Arc<dyn iris_sessions::SessionCreator>,
            Arc::clone(&agent) as Arc<dyn iris_router::AgentDispatcher>,
            Arc::clone(&hooks),
        ));

        let scheduler_conn = open_connection(&state_dir, "cron.sqlite")?;
        let scheduler = Arc::new(
            SchedulerEngine::new(
                scheduler_conn,
                Arc::clone(&agent) as Arc<dyn iris_sessions::SessionCreator>,
                Arc::clone(&agent) as Arc<dyn iris_scheduler::CronAgentClient>,
                Arc::clone(&outbound),
            )
            .map_err(|e| IrisError::Database(e.to_string()))?,
        );
        for job in &config.cron {
            scheduler.handle().add_job(job.clone()).map_err(|e| IrisError::Database(e.to_string()))?;
        }

        let heartbeat = HeartbeatEngine::new();

        Ok(Arc::new(Self {
            config,
            channels,
            channel_configs,
            gate,
            sessions,
            cache,
            outbound,
            pending,
            router,
            hooks,
            agent,
            scheduler,
            heartbeat,
            webchat: webchat_adapter,
            started_at: Instant::now(),
            root_cancellation: CancellationToken::new(),
        }))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Start every channel adapter and the background loops (outbound
    /// sweeps, scheduler ticks, heartbeat ticks). Runs until cancelled.
    pub async fn run_background(self: &Arc<Self>) {
        let (events_tx, mut events_rx) = mpsc::channel(256);
        let channels = Arc::clone(&self.channels);
        let connect_events = events_tx.clone();
        tokio::spawn(async move { channels.connect_all(connect_events).await });

        let router = Arc::clone(&self.router);
        let hooks = Arc::clone(&self.hooks);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    iris_channels::ChannelEvent::Message(msg) => {
                        if let Err(e) = router.handle_inbound(msg).await {
                            warn!(error = %e, "failed to route inbound message");
                        }
                    }
                    iris_channels::ChannelEvent::Connected { channel_id, bot_id } => {
                        if let Some(bot_id) = &bot_id {
                            router.set_bot_id(&channel_id, bot_id);
                        }
                        hooks.emit(
                            HookContext::new(HookEvent::AdapterConnected, serde_json::json!({ "botId": bot_id }))
                                .with_channel(channel_id.clone()),
                        );
                        info!(channel = %channel_id, "channel connected");
                    }
                    iris_channels::ChannelEvent::Disconnected { channel_id, reason } => {
                        hooks.emit(
                            HookContext::new(HookEvent::AdapterDisconnected, serde_json::json!({ "reason": reason }))
                                .with_channel(channel_id.clone()),
                        );
                        warn!(channel = %channel_id, ?reason, "channel disconnected");
                    }
                    iris_channels::ChannelEvent::Error(err) => warn!(error = %err, "channel error"),
                }
            }
        });

        let (agent_tx, mut agent_rx) = mpsc::channel(256);
        let agent_client = (*self.agent).clone();
        let agent_cancel = self.root_cancellation.clone();
        tokio::spawn(iris_agent::subscribe_events(agent_client, agent_tx, agent_cancel));
        let agent_router = Arc::clone(&self.router);
        tokio::spawn(async move {
            while let Some(event) = agent_rx.recv().await {
                match event {
                    iris_agent::AgentEvent::Partial { session_id, delta } => {
                        if let Err(e) = agent_router.handle_partial(&session_id, &delta).await {
                            warn!(error = %e, session_id, "failed to deliver partial response");
                        }
                    }
                    iris_agent::AgentEvent::Response { session_id, text } => {
                        let _ = agent_router.handle_response(&session_id, &text).await;
                    }
                    iris_agent::AgentEvent::Error { session_id, message } => {
                        agent_router.handle_agent_error(&session_id, &message).await;
                    }
                }
            }
        });

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(scheduler.run(shutdown_rx));
        let scheduler_cancel = self.root_cancellation.clone();
        tokio::spawn(async move {
            scheduler_cancel.cancelled().await;
            let _ = shutdown_tx.send(true);
        });

        if self.config.heartbeat.enabled {
            let heartbeat = Arc::clone(&self.heartbeat);
            let interval = std::time::Duration::from_millis(self.config.heartbeat.interval_ms);
            let cancel = self.root_cancellation.clone();
            tokio::spawn(heartbeat.run(interval, cancel));
        }

        let pending = Arc::clone(&self.pending);
        let cache = Arc::clone(&self.cache);
        let cancel = self.root_cancellation.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(iris_router::SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        pending.sweep();
                        cache.sweep();
                    }
                }
            }
        });
    }

    pub async fn shutdown(&self) {
        self.root_cancellation.cancel();
        self.channels.disconnect_all().await;
    }
}

/// Glue between the Outbound Queue and the Channel Manager: looks up the
/// adapter by id and calls `send_text`.
struct ChannelDeliverer {
    channels: Arc<ChannelManager>,
}

#[async_trait::async_trait]
impl iris_router::OutboundDeliverer for ChannelDeliverer {
    async fn deliver(&self, item: &iris_router::OutboundItem) -> std::result::Result<(), String> {
        let channel = self
            .channels
            .get(&item.channel_id)
            .ok_or_else(|| format!("channel '{}' is not registered", item.channel_id))?;
        channel
            .send_text(&item.chat_id, &item.text, item.reply_to_id.as_deref())
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn open_connection(state_dir: &Path, file_name: &str) -> Result<Connection> {
    Connection::open(state_dir.join(file_name)).map_err(|e| IrisError::Database(e.to_string()))
}

/// Assemble the health-server Axum router (default bind `127.0.0.1:19876`).
pub fn build_health_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ready", get(crate::http::ready::ready_handler))
        .route("/channels", get(crate::http::channels::channels_handler))
        .route("/metrics", get(crate::http::metrics::metrics_handler))
        .route("/webhooks/{channel_id}", post(crate::http::webhooks::webhook_handler))
        .route("/ws", get(crate::ws::webchat_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Assemble the tool-server Axum router (default bind `127.0.0.1:19877`).
pub fn build_tool_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tool/send-message", post(crate::http::tool::send_message))
        .route("/tool/channel-action", post(crate::http::tool::channel_action))
        .route("/tool/user-info", post(crate::http::tool::user_info))
        .route("/tool/list-channels", get(crate::http::tool::list_channels))
        .route("/skills/create", post(crate::http::tool::not_implemented))
        .route("/skills/delete", post(crate::http::tool::not_implemented))
        .route("/skills/list", get(crate::http::tool::not_implemented))
        .route("/agents/create", post(crate::http::tool::not_implemented))
        .route("/agents/delete", post(crate::http::tool::not_implemented))
        .route("/agents/list", get(crate::http::tool::not_implemented))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
