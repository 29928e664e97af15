//! termshare-server binary: parses the CLI surface, builds the process-wide
//! config, and runs the Axum server.

use clap::Parser;

use server::cli::Args;
use termshare_core::config::{self, Config};

const DEFAULT_RING_CAPACITY_BYTES: usize = termshare_core::ring::DEFAULT_CAPACITY_BYTES;
const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = termshare_core::client::DEFAULT_CLIENT_QUEUE_CAPACITY;
const DEFAULT_UPLOAD_MAX_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 60;
const DEFAULT_CHILD_RESTART_BACKOFF_MS: u64 = 500;
const DEFAULT_RECORDING_MAX_AGE_SECS: u64 = 48 * 3600;
const DEFAULT_RECORDING_MAX_PER_AGENT: usize = 5;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = build_config(args)?;
    let config = config::init(config);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(server::run(config))
}

fn build_config(args: Args) -> Result<Config, Box<dyn std::error::Error + Send + Sync>> {
    let shell = config::parse_shell_command(&args.shell)?;
    let shell_restart = match args.shell_restart {
        Some(raw) => config::parse_shell_command(&raw)?,
        None => shell.clone(),
    };
    let working_directory = match args.working_directory {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let session_ttl = config::parse_duration(&args.session_ttl)?;
    let auth_secret = match args.auth_secret {
        Some(s) => s.into_bytes(),
        None => {
            tracing::warn!("no --auth-secret set, generating a random one for this process");
            termshare_core::auth::random_secret()
        }
    };

    Ok(Config {
        addr: args.addr,
        shell,
        shell_restart,
        working_directory,
        session_ttl,
        preview_proxy_enabled: !args.no_preview_proxy,
        preview_port: args.preview_port,
        recordings_dir: args.recordings_dir,
        recording_enabled: !args.no_recording,
        auth_secret,
        ring_capacity_bytes: DEFAULT_RING_CAPACITY_BYTES,
        client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
        upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
        ping_interval: std::time::Duration::from_secs(termshare_core::client::DEFAULT_PING_INTERVAL_SECS),
        janitor_interval: std::time::Duration::from_secs(DEFAULT_JANITOR_INTERVAL_SECS),
        child_restart_backoff: std::time::Duration::from_millis(DEFAULT_CHILD_RESTART_BACKOFF_MS),
        recording_max_age: std::time::Duration::from_secs(DEFAULT_RECORDING_MAX_AGE_SECS),
        recording_max_per_agent: DEFAULT_RECORDING_MAX_PER_AGENT,
    })
}
