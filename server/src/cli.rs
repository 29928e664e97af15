//! CLI surface (spec.md §6), parsed with `clap` derive.
//!
//! Grounded on the richer CLI tools in the retrieved pack
//! (`Tonksthebear-trybotster/cli`, `citadelgrad-connect-the-bots/attractor-cli`)
//! rather than the teacher's own hand-rolled `while i < args.len()` loop in
//! `server/src/main.rs`, which only ever parsed two flags — this service's
//! nine-flag surface is large enough that hand-rolling would regress
//! against the pack's own conventions.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "termshare-server", about = "Multi-tenant terminal sharing server")]
pub struct Args {
    /// HTTP listen address, e.g. `:9898` or `127.0.0.1:9898`.
    #[arg(long, default_value = ":9898")]
    pub addr: String,

    /// Shell command used to start a session's child process. Tokenized
    /// with shell-like quoting.
    #[arg(long)]
    pub shell: String,

    /// Shell command used to respawn the child after it exits. Defaults to
    /// `--shell`.
    #[arg(long)]
    pub shell_restart: Option<String>,

    /// Default working directory for session children. Defaults to the
    /// server process's current directory.
    #[arg(long)]
    pub working_directory: Option<PathBuf>,

    /// Idle lifetime for a session with zero attached clients, e.g. `1h`,
    /// `30m`, `90s`.
    #[arg(long, default_value = "1h")]
    pub session_ttl: String,

    /// Disable the per-session preview reverse proxy (C8).
    #[arg(long)]
    pub no_preview_proxy: bool,

    /// Default local port the preview proxy forwards to.
    #[arg(long, default_value_t = 3000)]
    pub preview_port: u16,

    /// Directory under which recordings are written when enabled.
    #[arg(long, default_value = "./recordings")]
    pub recordings_dir: PathBuf,

    /// Disable session recording entirely.
    #[arg(long)]
    pub no_recording: bool,

    /// HMAC signing key for the auth cookie. A random key is generated if
    /// unset (restarting the process then invalidates all cookies).
    #[arg(long, env = "TERMSHARE_AUTH_SECRET")]
    pub auth_secret: Option<String>,
}
