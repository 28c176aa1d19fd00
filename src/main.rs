use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{error, info, warn};

use secureclaw_core::approval::ApprovalGate;
use secureclaw_core::config::Config;
use secureclaw_core::dispatcher::Dispatcher;
use secureclaw_core::orchestrator::{Orchestrator, TRANSIENT_ERROR_APOLOGY};
use secureclaw_core::orchestrator::messages::Message;
use secureclaw_core::orchestrator::session::SessionStore;
use secureclaw_core::security::audit::AuditLogger;
use secureclaw_core::security::capabilities::{CapabilitySecret, ExecutorKind};
use secureclaw_core::tools::service::ServiceRegistry;
use secureclaw_core::{bridge, classifier, db, error, llm, tools};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    if args.iter().any(|a| a == "--default-config") {
        print!("{}", Config::default_config_contents());
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(args).await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn run(args: Vec<String>) -> error::Result<()> {
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    let config = Config::load(config_path.as_deref())?;
    info!(
        bridge_socket = %config.bridge_socket,
        llm_provider = %config.llm.provider,
        max_turns = config.max_turns,
        "secureclaw-core starting"
    );

    let capability_secret = CapabilitySecret::new(Config::capability_secret()?);

    let db = db::open(&PathBuf::from(&config.db_path))?;
    let db = Arc::new(Mutex::new(db));

    let audit = Arc::new(AuditLogger::new(&config.audit_dir)?);

    let rules = classifier::load_rules(&PathBuf::from(&config.classifier_rules_path))?;
    info!(rules = rules.len(), "classifier rules loaded");

    let docker = bollard::Docker::connect_with_local_defaults()
        .map_err(|e| error::CoreError::Runtime(format!("failed to connect to container runtime: {e}")))?;

    let mut executors = HashMap::new();
    executors.insert(ExecutorKind::Shell, config.executors.shell.clone());
    executors.insert(ExecutorKind::File, config.executors.file.clone());
    executors.insert(ExecutorKind::Web, config.executors.web.clone());
    let dispatcher = Arc::new(Dispatcher::new(docker, executors, capability_secret));

    let (bridge_tx, bridge_rx) = mpsc::unbounded_channel::<Value>();
    let gate = Arc::new(ApprovalGate::new(db.clone(), audit.clone(), bridge_tx, rules));

    let llm_provider = llm::build_provider(&config)?;

    // No service-tool handlers are registered at startup: OAuth-backed
    // service integrations (email, calendar, ...) are an external
    // collaborator this core doesn't own (spec non-goal). A deployment
    // wiring one in would register it here before the registry is handed
    // to the orchestrator.
    let services = Arc::new(ServiceRegistry::new());

    let orchestrator = Arc::new(Orchestrator::new(
        llm_provider,
        gate.clone(),
        dispatcher.clone(),
        db.clone(),
        audit.clone(),
        services,
        "secureclaw".to_string(),
        config.llm.model.clone(),
        config.llm.max_tokens,
        config.max_turns,
    ));

    let sessions = Arc::new(SessionStore::new(config.session_ttl_secs, config.session_max_messages));

    let handler: Arc<dyn bridge::IncomingHandler> =
        Arc::new(OrchestratorBridge { orchestrator: orchestrator.clone(), sessions });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_gate = gate.clone();
    let sweeper_task = tokio::spawn(async move {
        sweeper_gate.run_sweeper().await;
    });

    let bridge_server = bridge::BridgeServer::new(config.bridge_socket.clone(), gate.clone(), handler, bridge_rx);
    let bridge_shutdown = shutdown_rx.clone();
    let bridge_task = tokio::spawn(async move {
        if let Err(e) = bridge_server.run(bridge_shutdown).await {
            error!("bridge server error: {e}");
        }
    });

    info!("secureclaw-core is running");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(error::CoreError::Io)?;
            info!("SIGINT received, shutting down");
        }
        _ = terminate_signal() => {
            info!("SIGTERM received, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    sweeper_task.abort();
    let _ = bridge_task.await;

    info!("secureclaw-core stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            warn!("failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

/// Bridges inbound bridge-socket user messages into orchestrator turns,
/// keeping per-session transcript state in an in-process `SessionStore`.
struct OrchestratorBridge {
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionStore>,
}

#[async_trait]
impl bridge::IncomingHandler for OrchestratorBridge {
    async fn handle_message(&self, request_id: String, message: Value, reply_to: Option<Value>) -> Option<Value> {
        let session_id = message.get("sessionId").and_then(Value::as_str).unwrap_or(&request_id).to_string();
        let chat_id = message.get("chatId").and_then(Value::as_str).map(str::to_string);
        let user_id = message.get("userId").and_then(Value::as_str).map(str::to_string);
        let text = message.get("text").and_then(Value::as_str).unwrap_or_default().to_string();

        if text.is_empty() {
            warn!(request_id, "bridge user message had no text field, ignoring");
            return None;
        }

        let mut transcript = self.sessions.get_or_create(&session_id, user_id.as_deref()).await;
        transcript.push(Message::user(text));

        let system_prompt = llm::prompts::system_prompt("secureclaw", &tools::catalog(), None);

        let result = self
            .orchestrator
            .chat(&session_id, transcript, chat_id.as_deref(), user_id.as_deref(), system_prompt)
            .await;

        match result {
            Ok(chat_result) => {
                self.sessions.set_messages(&session_id, chat_result.updated_messages).await;
                Some(json!({
                    "requestId": request_id,
                    "replyTo": reply_to,
                    "outgoing": {"chatId": chat_id, "content": chat_result.final_text},
                }))
            }
            Err(e) => {
                error!(request_id, error = %e, "orchestrator chat failed");
                Some(json!({
                    "requestId": request_id,
                    "replyTo": reply_to,
                    "outgoing": {"chatId": chat_id, "content": TRANSIENT_ERROR_APOLOGY},
                }))
            }
        }
    }
}

fn print_usage() {
    println!(
        "secureclaw-core — security mediation core for a personal AI agent

USAGE:
    secureclaw-core [OPTIONS]

OPTIONS:
    --config <PATH>     Path to config file (default: $XDG_CONFIG_HOME/secureclaw/config.toml)
    --default-config    Print default config to stdout and exit
    -h, --help          Print this help message

ENVIRONMENT:
    CAPABILITY_SECRET   Required. HMAC key used to sign and verify capability tokens.
    RUST_LOG            Optional. Tracing filter (default: info).

The core itself exposes no user-facing surface beyond this daemon; all
interaction happens over the Unix-domain bridge socket (bridge_socket in
config) which an external chat-platform adapter connects to."
    );
}
