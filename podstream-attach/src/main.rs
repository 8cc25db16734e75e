//! podstream-attach entry point.
//!
//! ```text
//! podstream-attach logs <pod>                 Tail a pod's logs
//! podstream-attach shell <pod>                Open a shell (Ctrl-] detaches)
//! podstream-attach --config <path> ...       Use custom config TOML
//! podstream-attach --gen-config              Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use podstream_core::{SessionManager, SessionMode, SessionTarget, WsConnector};

use podstream_attach::config::AttachConfig;
use podstream_attach::viewport;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "podstream-attach", about = "Tail pod logs or open a pod shell")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "podstream-attach.toml")]
    config: PathBuf,

    /// Dashboard server (overrides config). Example: https://tigron-server.lan
    #[arg(short, long)]
    server: Option<String>,

    /// Environment variable holding the session token (overrides config).
    #[arg(long)]
    token_env: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Follow a pod's log stream.
    Logs { pod: String },
    /// Open an interactive shell in a pod.
    Shell { pod: String },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    // Exit explicitly: a pending stdin read would keep the runtime alive.
    std::process::exit(code);
}

async fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AttachConfig::default())?;
        println!("{text}");
        return Ok(0);
    }

    let mut config = AttachConfig::load(&cli.config);
    if let Some(server) = cli.server {
        config.server.base_url = server;
    }
    if let Some(var) = cli.token_env {
        config.auth.token = String::new();
        config.auth.token_env = var;
    }

    // Logs go to stderr so they never mix with streamed output.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(mode) = cli.command else {
        eprintln!("nothing to attach to: use `logs <pod>` or `shell <pod>`");
        return Ok(2);
    };
    config.validate()?;

    let target = match mode {
        Mode::Logs { pod } => SessionTarget::logs(pod),
        Mode::Shell { pod } => SessionTarget::terminal(pod),
    };

    info!("podstream-attach v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Open the session ─────────────────────────────────────

    let connector = Arc::new(WsConnector::new(&config.server.base_url)?);
    let session = SessionManager::new(target.clone(), connector, config.session.clone());

    info!(%target, server = %config.server.base_url, "attaching");
    if let Err(e) = session.open(config.auth.token_source()).await {
        error!("open failed: {e}");
        if let Some(message) = viewport::failure_message(&session.status()) {
            eprintln!("{message}");
        }
        return Ok(viewport::exit_code(&session.status()));
    }

    // ── 2. Run the viewport ─────────────────────────────────────

    match target.mode() {
        SessionMode::Log => {
            tokio::select! {
                result = viewport::follow_logs(&session) => result?,
                _ = tokio::signal::ctrl_c() => session.close().await?,
            }
        }
        SessionMode::Terminal => viewport::run_shell(&session).await?,
    }

    // ── 3. Report ───────────────────────────────────────────────

    let status = session.status();
    if let Some(message) = viewport::failure_message(&status) {
        eprintln!("{message}");
    }
    info!(state = %status.state, "detached");
    Ok(viewport::exit_code(&status))
}
