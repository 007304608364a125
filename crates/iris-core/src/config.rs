use std::collections::HashMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HEALTH_PORT: u16 = 19876;
pub const DEFAULT_TOOL_PORT: u16 = 19877;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const TOOL_SERVER_TIMEOUT_MS: u64 = 10_000;

/// Top-level config (`iris.config.toml` + `IRIS_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub tool_server: ToolServerConfig,
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    pub agent: AgentBackendConfig,
    #[serde(default)]
    pub cron: Vec<CronJobConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub auto_reply: AutoReplyConfig,
    /// Opaque passthroughs — out of scope, never interpreted by this crate.
    #[serde(default)]
    pub canvas: serde_json::Value,
    #[serde(default)]
    pub mcp: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_health_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub hostname: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { port: default_health_port(), hostname: default_bind() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    #[serde(default = "default_tool_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub hostname: String,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self { port: default_tool_port(), hostname: default_bind() }
    }
}

/// Which platform SDK a channel entry speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Telegram,
    Whatsapp,
    Discord,
    Slack,
    Webchat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub token: Option<String>,
    pub app_token: Option<String>,
    pub bot_token: Option<String>,
    pub dm_policy: Option<SecurityPolicy>,
    #[serde(default)]
    pub group_policy: GroupPolicyConfig,
    pub mention_pattern: Option<String>,
    pub max_text_length: Option<usize>,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupPolicyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub require_mention: bool,
    pub allowed_commands: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    #[serde(default)]
    pub break_on: BreakOn,
    #[serde(default)]
    pub edit_in_place: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
            idle_ms: default_idle_ms(),
            break_on: BreakOn::default(),
            edit_in_place: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BreakOn {
    Paragraph,
    Sentence,
    #[default]
    Word,
}

/// `policy ∈ {open, pairing, allowlist, disabled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityPolicy {
    Open,
    Pairing,
    Allowlist,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_dm_policy")]
    pub default_dm_policy: SecurityPolicy,
    #[serde(default = "default_pairing_ttl_ms")]
    pub pairing_code_ttl_ms: u64,
    #[serde(default = "default_pairing_code_length")]
    pub pairing_code_length: usize,
    #[serde(default = "default_rate_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_rate_per_hour")]
    pub rate_limit_per_hour: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_dm_policy: default_dm_policy(),
            pairing_code_ttl_ms: default_pairing_ttl_ms(),
            pairing_code_length: default_pairing_code_length(),
            rate_limit_per_minute: default_rate_per_minute(),
            rate_limit_per_hour: default_rate_per_hour(),
        }
    }
}

/// Generic external Agent backend — named `opencode` in the original field
/// set but renamed here since this gateway is backend-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBackendConfig {
    #[serde(default = "default_agent_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub hostname: String,
    #[serde(default)]
    pub auto_spawn: bool,
    pub project_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobConfig {
    pub name: String,
    pub schedule: String,
    pub prompt: String,
    pub channel: String,
    pub chat_id: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<String>,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub self_heal: SelfHealConfig,
    #[serde(default)]
    pub active_hours: Option<ActiveHoursConfig>,
    #[serde(default)]
    pub empty_check: EmptyCheckConfig,
    #[serde(default)]
    pub coalesce_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SelfHealConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_heal_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ticks")]
    pub backoff_ticks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveHoursConfig {
    pub start_hour: u8,
    pub end_hour: u8,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_empty_check_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_empty_check_max_ms")]
    pub max_backoff_ms: u64,
}

impl Default for EmptyCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_ms: default_empty_check_base_ms(),
            max_backoff_ms: default_empty_check_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AutoReplyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub templates: Vec<AutoReplyTemplateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoReplyTemplateConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    pub trigger: AutoReplyTrigger,
    pub response: String,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub chat_types: Option<Vec<String>>,
    pub cooldown_ms: Option<u64>,
    #[serde(default)]
    pub once: bool,
    #[serde(default)]
    pub forward_to_ai: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AutoReplyTrigger {
    Exact { text: String },
    Regex { pattern: String },
    Keyword { any_of: Vec<String> },
    Command { name: String },
    Schedule { start_hour: u8, end_hour: u8, days_of_week: Vec<u8> },
}

fn bool_true() -> bool {
    true
}
fn default_health_port() -> u16 {
    DEFAULT_HEALTH_PORT
}
fn default_tool_port() -> u16 {
    DEFAULT_TOOL_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_agent_port() -> u16 {
    4096
}
fn default_dm_policy() -> SecurityPolicy {
    SecurityPolicy::Pairing
}
fn default_pairing_ttl_ms() -> u64 {
    3_600_000
}
fn default_pairing_code_length() -> usize {
    8
}
fn default_rate_per_minute() -> u32 {
    30
}
fn default_rate_per_hour() -> u32 {
    300
}
fn default_min_chars() -> usize {
    80
}
fn default_max_chars() -> usize {
    800
}
fn default_idle_ms() -> u64 {
    1_200
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_max_heal_attempts() -> u32 {
    3
}
fn default_backoff_ticks() -> u32 {
    2
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_empty_check_base_ms() -> u64 {
    30_000
}
fn default_empty_check_max_ms() -> u64 {
    600_000
}

fn default_state_dir() -> String {
    std::env::var("IRIS_STATE_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.iris", home)
    })
}

/// Resolve `$IRIS_STATE_DIR` (default `~/.iris`), creating it if missing.
pub fn state_dir() -> crate::error::Result<std::path::PathBuf> {
    let dir = std::path::PathBuf::from(default_state_dir());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

impl IrisConfig {
    /// Load config from a TOML file with `IRIS_*` env var overrides, and
    /// `${env:NAME}` substitution inside string values performed as a
    /// pre-pass over the raw file text before Figment parses it.
    pub fn load(config_path: Option<&Path>) -> crate::error::Result<Self> {
        let path = config_path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("iris.config.toml"));

        let raw = std::fs::read_to_string(&path).unwrap_or_default();
        let substituted = substitute_env(&raw)?;

        let config: IrisConfig = Figment::new()
            .merge(Toml::string(&substituted))
            .merge(Env::prefixed("IRIS_").split("_"))
            .extract()
            .map_err(|e| crate::error::IrisError::Config(e.to_string()))?;

        Ok(config)
    }
}

/// Replace every `${env:NAME}` occurrence with the named environment
/// variable's value. Errors if any referenced variable is unset.
fn substitute_env(raw: &str) -> crate::error::Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${env:") {
        out.push_str(&rest[..start]);
        let after = &rest[start + "${env:".len()..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        let value = std::env::var(name).map_err(|_| {
            crate::error::IrisError::Config(format!("env var {name} referenced but unset"))
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_env_var() {
        std::env::set_var("IRIS_TEST_TOKEN", "secret123");
        let out = substitute_env("token = \"${env:IRIS_TEST_TOKEN}\"").unwrap();
        assert_eq!(out, "token = \"secret123\"");
    }

    #[test]
    fn errors_on_unset_env_var() {
        std::env::remove_var("IRIS_DEFINITELY_UNSET");
        let err = substitute_env("x = \"${env:IRIS_DEFINITELY_UNSET}\"").unwrap_err();
        assert!(matches!(err, crate::error::IrisError::Config(_)));
    }

    #[test]
    fn passes_through_text_without_placeholders() {
        let out = substitute_env("plain = \"value\"").unwrap();
        assert_eq!(out, "plain = \"value\"");
    }
}
