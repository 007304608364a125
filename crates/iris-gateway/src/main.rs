use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

mod app;
mod http;
mod sysmem;
mod version;
mod ws;

use iris_core::config::IrisConfig;
use iris_core::error::{IrisError, Result};
use iris_security::{AllowlistStore, PairingStore};
use iris_sessions::SessionManager;

#[derive(Parser)]
#[command(name = "iris", version = version::VERSION, about = "Multi-channel chat gateway in front of an external Agent backend")]
struct Cli {
    /// Path to `iris.config.toml`. Defaults to `./iris.config.toml`.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway: connect every enabled channel and serve both HTTP ports.
    Gateway {
        #[command(subcommand)]
        action: GatewayAction,
    },
    /// Send a message through a running gateway's Tool Server.
    Send { channel: String, target: String, message: String },
    /// Query a running gateway's health endpoint.
    Status,
    #[command(subcommand)]
    Config(ConfigAction),
    #[command(subcommand)]
    Pairing(PairingAction),
    #[command(subcommand)]
    Session(SessionAction),
    #[command(subcommand)]
    Cron(CronAction),
    #[command(subcommand)]
    Security(SecurityAction),
    /// Check config validity, state dir writability, and Agent reachability.
    Doctor,
    /// Defers to an external static security scanner; a no-op if absent.
    Scan { dir: Option<PathBuf> },
}

#[derive(Subcommand)]
enum GatewayAction {
    Run,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Validate,
}

#[derive(Subcommand)]
enum PairingAction {
    Approve { code: String },
    List,
    Revoke { code: String },
}

#[derive(Subcommand)]
enum SessionAction {
    List,
    Reset { key: String },
}

#[derive(Subcommand)]
enum CronAction {
    List,
    Add {
        name: String,
        schedule: String,
        prompt: String,
        channel: String,
        #[arg(long = "chat-id")]
        chat_id: String,
    },
    Remove { name: String },
}

#[derive(Subcommand)]
enum SecurityAction {
    #[command(subcommand)]
    Allowlist(AllowlistAction),
}

#[derive(Subcommand)]
enum AllowlistAction {
    List,
    Add { channel: String, sender: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Command::Gateway { action: GatewayAction::Run } => run_gateway(config).await,
        Command::Send { channel, target, message } => cmd_send(&config, &channel, &target, &message).await,
        Command::Status => cmd_status(&config).await,
        Command::Config(action) => cmd_config(&config, action),
        Command::Pairing(action) => cmd_pairing(action),
        Command::Session(action) => cmd_session(action),
        Command::Cron(action) => cmd_cron(action),
        Command::Security(SecurityAction::Allowlist(action)) => cmd_allowlist(action),
        Command::Doctor => cmd_doctor(&config).await,
        Command::Scan { dir } => cmd_scan(dir),
    }
}

fn load_config(path: Option<&Path>) -> Result<IrisConfig> {
    let path = path.unwrap_or_else(|| Path::new("iris.config.toml"));
    IrisConfig::load(Some(path))
}

fn init_logging(logging: &iris_core::config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let guard = if let Some(path) = &logging.file {
        let file_path = Path::new(path);
        let dir = file_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let file_name = file_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("iris.log"));
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        if logging.json {
            builder.json().with_writer(non_blocking).init();
        } else {
            builder.with_writer(non_blocking).init();
        }
        Some(guard)
    } else {
        if logging.json {
            builder.json().init();
        } else {
            builder.init();
        }
        None
    };

    // Leak the guard: it must outlive the process for buffered lines to
    // flush, and this function only ever runs once at startup.
    std::mem::forget(guard);
}

async fn run_gateway(config: IrisConfig) -> Result<()> {
    let health_addr: SocketAddr = format!("{}:{}", config.gateway.hostname, config.gateway.port)
        .parse()
        .map_err(|e| IrisError::Fatal(format!("invalid gateway bind address: {e}")))?;
    let tool_addr: SocketAddr = format!("{}:{}", config.tool_server.hostname, config.tool_server.port)
        .parse()
        .map_err(|e| IrisError::Fatal(format!("invalid tool server bind address: {e}")))?;

    if config.channels.values().all(|c| !c.enabled) {
        return Err(IrisError::Fatal("no channels enabled".to_string()));
    }

    let state = app::AppState::assemble(config).await?;
    state.run_background().await;

    let health_router = app::build_health_router(Arc::clone(&state));
    let tool_router = app::build_tool_router(Arc::clone(&state));

    let health_listener = tokio::net::TcpListener::bind(health_addr).await.map_err(IrisError::Io)?;
    let tool_listener = tokio::net::TcpListener::bind(tool_addr).await.map_err(IrisError::Io)?;

    info!(%health_addr, "health server listening");
    info!(%tool_addr, "tool server listening");

    let health_server = axum::serve(health_listener, health_router);
    let tool_server = axum::serve(tool_listener, tool_router);

    tokio::select! {
        result = health_server => {
            if let Err(e) = result {
                error!(error = %e, "health server exited");
            }
        }
        result = tool_server => {
            if let Err(e) = result {
                error!(error = %e, "tool server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    state.shutdown().await;
    Ok(())
}

async fn cmd_send(config: &IrisConfig, channel: &str, target: &str, message: &str) -> Result<()> {
    let url = format!("http://{}:{}/tool/send-message", config.tool_server.hostname, config.tool_server.port);
    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .json(&serde_json::json!({ "channel": channel, "chatId": target, "text": message }))
        .send()
        .await
        .map_err(|e| IrisError::Agent(format!("could not reach tool server at {url}: {e}")))?;

    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(IrisError::Agent(format!("send failed: {body}")));
    }

    let body: serde_json::Value = resp.json().await.map_err(|e| IrisError::Agent(e.to_string()))?;
    println!("sent, messageId={}", body["messageId"].as_str().unwrap_or("?"));
    Ok(())
}

async fn cmd_status(config: &IrisConfig) -> Result<()> {
    let url = format!("http://{}:{}/health", config.gateway.hostname, config.gateway.port);
    let client = reqwest::Client::new();
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| IrisError::Agent(format!("gateway unreachable at {url}: {e}")))?;

    let body: serde_json::Value = resp.json().await.map_err(|e| IrisError::Agent(e.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());

    if body["status"] == "ok" {
        Ok(())
    } else {
        Err(IrisError::Agent(format!("gateway reports status={}", body["status"])))
    }
}

fn cmd_config(config: &IrisConfig, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let json = serde_json::to_string_pretty(config).map_err(IrisError::Serialization)?;
            println!("{json}");
            Ok(())
        }
        ConfigAction::Validate => {
            if config.channels.values().all(|c| !c.enabled) {
                return Err(IrisError::Fatal("no channels enabled".to_string()));
            }
            println!("config is valid");
            Ok(())
        }
    }
}

fn cmd_pairing(action: PairingAction) -> Result<()> {
    let state_dir = iris_core::config::state_dir()?;
    let allowlist = AllowlistStore::new(&state_dir);
    // Pairing code length/TTL only matter for issuance, not for approve/list/revoke.
    let pairing = PairingStore::new(&state_dir, 8, 3_600_000);

    match action {
        PairingAction::Approve { code } => {
            match pairing.approve(&code, &allowlist, Some("cli")).map_err(|e| IrisError::Persistence(e.to_string()))? {
                Some((channel_id, sender_id)) => {
                    println!("approved {code} -> allowlisted ({channel_id}, {sender_id})");
                    Ok(())
                }
                None => Err(IrisError::Admission(format!("unknown or expired pairing code: {code}"))),
            }
        }
        PairingAction::List => {
            let requests = pairing.list().map_err(|e| IrisError::Persistence(e.to_string()))?;
            for r in requests {
                println!("{}\t{}\t{}\texpires={}", r.code, r.channel_id, r.sender_id, r.expires_at_ms);
            }
            Ok(())
        }
        PairingAction::Revoke { code } => {
            if pairing.revoke(&code).map_err(|e| IrisError::Persistence(e.to_string()))? {
                println!("revoked {code}");
                Ok(())
            } else {
                Err(IrisError::Admission(format!("unknown pairing code: {code}")))
            }
        }
    }
}

fn cmd_session(action: SessionAction) -> Result<()> {
    let state_dir = iris_core::config::state_dir()?;
    let conn = rusqlite::Connection::open(state_dir.join("session-map.sqlite")).map_err(|e| IrisError::Database(e.to_string()))?;
    iris_sessions::db::init_db(&conn).map_err(|e| IrisError::Database(e.to_string()))?;
    let manager = SessionManager::new(conn);

    match action {
        SessionAction::List => {
            let sessions = manager.list().map_err(|e| IrisError::Database(e.to_string()))?;
            for s in sessions {
                println!("{}\t{}\tlastActivity={}", s.key, s.agent_session_id, s.last_activity);
            }
            Ok(())
        }
        SessionAction::Reset { key } => {
            let session_key = iris_core::types::SessionKey(key.clone());
            if manager.reset(&session_key).map_err(|e| IrisError::Database(e.to_string()))? {
                println!("reset {key}");
                Ok(())
            } else {
                Err(IrisError::Persistence(format!("unknown session key: {key}")))
            }
        }
    }
}

fn cmd_cron(action: CronAction) -> Result<()> {
    let state_dir = iris_core::config::state_dir()?;
    let conn = rusqlite::Connection::open(state_dir.join("cron.sqlite")).map_err(|e| IrisError::Database(e.to_string()))?;
    let handle = iris_scheduler::SchedulerHandle::new(conn).map_err(|e| IrisError::Database(e.to_string()))?;

    match action {
        CronAction::List => {
            let jobs = handle.list_jobs().map_err(|e| IrisError::Database(e.to_string()))?;
            for j in jobs {
                println!(
                    "{}\t{}\tchannel={}\tchatId={}\tenabled={}\tnextRun={}",
                    j.config.name,
                    j.config.schedule,
                    j.config.channel,
                    j.config.chat_id,
                    j.config.enabled,
                    j.next_run.unwrap_or_else(|| "-".to_string()),
                );
            }
            Ok(())
        }
        CronAction::Add { name, schedule, prompt, channel, chat_id } => {
            let config = iris_scheduler::CronJobConfig { name, schedule, prompt, channel, chat_id, enabled: true };
            let job = handle.add_job(config).map_err(|e| IrisError::Config(e.to_string()))?;
            println!("added {}", job.config.name);
            Ok(())
        }
        CronAction::Remove { name } => {
            handle.remove_job(&name).map_err(|e| IrisError::Persistence(e.to_string()))?;
            println!("removed {name}");
            Ok(())
        }
    }
}

fn cmd_allowlist(action: AllowlistAction) -> Result<()> {
    let state_dir = iris_core::config::state_dir()?;
    let allowlist = AllowlistStore::new(&state_dir);

    match action {
        AllowlistAction::List => {
            let entries = allowlist.list().map_err(|e| IrisError::Persistence(e.to_string()))?;
            for e in entries {
                println!("{}\t{}\tapprovedBy={}\tapprovedAt={}", e.channel_id, e.sender_id, e.approved_by.unwrap_or_default(), e.approved_at);
            }
            Ok(())
        }
        AllowlistAction::Add { channel, sender } => {
            allowlist.add(&channel, &sender, Some("cli")).map_err(|e| IrisError::Persistence(e.to_string()))?;
            println!("allowlisted ({channel}, {sender})");
            Ok(())
        }
    }
}

async fn cmd_doctor(config: &IrisConfig) -> Result<()> {
    let mut ok = true;

    match iris_core::config::state_dir() {
        Ok(dir) => println!("[ok] state dir writable: {}", dir.display()),
        Err(e) => {
            println!("[fail] state dir: {e}");
            ok = false;
        }
    }

    if config.channels.values().any(|c| c.enabled) {
        println!("[ok] at least one channel enabled");
    } else {
        println!("[fail] no channels enabled");
        ok = false;
    }

    let agent = iris_agent::AgentClient::new(&config.agent);
    if agent.check_health().await {
        println!("[ok] agent backend reachable");
    } else {
        println!("[fail] agent backend unreachable at {}:{}", config.agent.hostname, config.agent.port);
        ok = false;
    }

    if ok {
        Ok(())
    } else {
        Err(IrisError::Fatal("doctor found one or more problems".to_string()))
    }
}

fn cmd_scan(dir: Option<PathBuf>) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    match which_scanner() {
        Some(tool) => {
            println!("delegating to external scanner: {tool} {}", target.display());
        }
        None => {
            println!("no external security scanner found on PATH; skipping scan of {}", target.display());
        }
    }
    Ok(())
}

fn which_scanner() -> Option<String> {
    let candidates = ["semgrep", "cargo-audit"];
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for candidate in candidates {
            if dir.join(candidate).is_file() {
                return Some(candidate.to_string());
            }
        }
    }
    None
}
