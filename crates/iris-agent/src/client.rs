use std::time::Duration;

use async_trait::async_trait;
use iris_core::config::AgentBackendConfig;
use iris_core::types::AgentSessionId;
use iris_scheduler::CronAgentClient;
use iris_sessions::SessionCreator;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::types::{
    AgentSession, CreateSessionRequest, SendMessageRequest, SendMessageResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin HTTP client over a single external Agent backend process. The
/// backend is treated as a black box: this crate never interprets prompts,
/// tool calls, or model selection — it only speaks the backend's session
/// and messaging HTTP surface.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentClient {
    pub fn new(config: &AgentBackendConfig) -> Self {
        let base_url = format!("http://{}:{}", config.hostname, config.port);
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("agent http client builds with static config");
        Self { http, base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode_or_error<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json::<T>().await?)
        } else {
            let message = resp.text().await.unwrap_or_default();
            Err(AgentError::Api { status: status.as_u16(), message })
        }
    }

    pub async fn create_session_named(&self, title: &str) -> Result<AgentSession> {
        let resp = self
            .http
            .post(self.url("/sessions"))
            .json(&CreateSessionRequest { title: Some(title) })
            .send()
            .await?;
        Self::decode_or_error(resp).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<AgentSession>> {
        let resp = self.http.get(self.url("/sessions")).send().await?;
        Self::decode_or_error(resp).await
    }

    pub async fn delete_session(&self, agent_session_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/sessions/{agent_session_id}")))
            .send()
            .await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            Err(AgentError::Api { status, message })
        }
    }

    pub async fn abort_session(&self, agent_session_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/sessions/{agent_session_id}/abort")))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            Err(AgentError::Api { status, message })
        }
    }

    pub async fn check_health(&self) -> bool {
        match self.http.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                debug!(error = %err, "agent health check failed");
                false
            }
        }
    }

    /// Synchronous round trip used by cron fires: send a prompt and wait
    /// for the single reply text.
    pub async fn send_and_wait(&self, agent_session_id: &str, text: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url(&format!("/sessions/{agent_session_id}/messages")))
            .json(&SendMessageRequest { text })
            .send()
            .await?;
        let decoded: SendMessageResponse = Self::decode_or_error(resp).await?;
        Ok(decoded.text)
    }

    /// Fire-and-forget send used by the router: the reply arrives later on
    /// the event subscription, not in this response.
    pub async fn send_fire_and_forget(&self, agent_session_id: &str, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/sessions/{agent_session_id}/messages")))
            .json(&SendMessageRequest { text })
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            Err(AgentError::Api { status, message })
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }
}

#[async_trait]
impl SessionCreator for AgentClient {
    async fn create_session(&self, title: &str) -> std::result::Result<AgentSessionId, String> {
        self.create_session_named(title)
            .await
            .map(|session| AgentSessionId::from(session.id))
            .map_err(|err| err.to_string())
    }
}

#[async_trait]
impl iris_router::AgentDispatcher for AgentClient {
    async fn send_message_async(&self, agent_session_id: &str, text: &str) -> std::result::Result<(), String> {
        self.send_fire_and_forget(agent_session_id, text)
            .await
            .map_err(|err| err.to_string())
    }
}

#[async_trait]
impl CronAgentClient for AgentClient {
    async fn send_message(&self, agent_session_id: &str, prompt: &str) -> std::result::Result<String, String> {
        self.send_and_wait(agent_session_id, prompt)
            .await
            .map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let client = AgentClient::with_base_url("http://127.0.0.1:4096");
        assert_eq!(client.url("/sessions"), "http://127.0.0.1:4096/sessions");
    }
}
