//! Global config singleton. The server binary builds a `Config` from its CLI
//! flags once at startup and calls `init`; every other module reads it back
//! via `get`. Mirrors the teacher's `ensure_loaded()` once-cell pattern, but
//! the value is supplied explicitly instead of read from a settings file —
//! this service has no settings.json, only CLI flags.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Process-wide settings, built once from CLI flags (see `server::cli::Args`).
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address, e.g. `:9898` or `127.0.0.1:9898`.
    pub addr: String,
    /// Tokenized argv for the session child (from `-shell`, shell-word split).
    pub shell: Vec<String>,
    /// Tokenized argv used to respawn the child after it exits.
    pub shell_restart: Vec<String>,
    /// Default child working directory when a session doesn't specify one.
    pub working_directory: PathBuf,
    /// Idle lifetime for a session with zero attached clients.
    pub session_ttl: Duration,
    /// Whether the preview reverse proxy (C8) is enabled.
    pub preview_proxy_enabled: bool,
    /// Default preview app port, used when a session has no dedicated offset.
    pub preview_port: u16,
    /// Directory under which recordings are written, if recording is enabled.
    pub recordings_dir: PathBuf,
    /// Whether session recording is enabled at all.
    pub recording_enabled: bool,
    /// HMAC-SHA256 key for the auth cookie signer.
    pub auth_secret: Vec<u8>,
    /// Scrollback ring capacity in bytes (spec default: 512 KiB).
    pub ring_capacity_bytes: usize,
    /// Bounded per-client output queue capacity (spec default: 512 frames).
    pub client_queue_capacity: usize,
    /// Maximum accepted upload size in bytes (spec default: 50 MiB).
    pub upload_max_bytes: u64,
    /// App-level ping cadence; a client missing 2 intervals of pongs is closed.
    pub ping_interval: Duration,
    /// How often the registry janitor scans for idle sessions.
    pub janitor_interval: Duration,
    /// Fixed backoff before respawning a child after it exits.
    pub child_restart_backoff: Duration,
    /// Recording retention: max age before an unkept recording is eligible
    /// for deletion, and max recent recordings kept per agent.
    pub recording_max_age: Duration,
    pub recording_max_per_agent: usize,
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Install the process-wide config. Must be called exactly once, before any
/// other module calls `get()`. Returns the installed value (useful for
/// chaining in `main`).
pub fn init(config: Config) -> &'static Config {
    CONFIG
        .set(config)
        .unwrap_or_else(|_| panic!("config::init called more than once"));
    CONFIG.get().expect("config just set")
}

/// Fetch the process-wide config. Panics if `init` hasn't run yet — every
/// entry point (server `main`, tests that need config) must call `init`
/// first.
pub fn get() -> &'static Config {
    CONFIG.get().expect("config::init was not called")
}

/// Parse a shell command string into argv, shell-quoting aware (so
/// `-shell 'bash -lc "echo hi"'` round-trips correctly).
pub fn parse_shell_command(raw: &str) -> Result<Vec<String>, shell_words::ParseError> {
    shell_words::split(raw)
}

/// Parse a simple duration like `30s`, `10m`, `1h`, `2d`. No ecosystem crate
/// in this corpus offers duration parsing, so this is a minimal hand-rolled
/// suffix parser rather than a crate dependency.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    let split_at = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split_at);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}: expected a number followed by s/m/h/d"))?;
    let secs = match unit {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86400,
        other => return Err(format!("invalid duration unit {other:?}: expected s, m, h, or d")),
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_shell_command() {
        let argv = parse_shell_command("bash -lc \"echo hi there\"").unwrap();
        assert_eq!(argv, vec!["bash", "-lc", "echo hi there"]);
    }

    #[test]
    fn rejects_unbalanced_quotes() {
        assert!(parse_shell_command("bash -c \"unterminated").is_err());
    }

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172800));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn rejects_bad_duration() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5x").is_err());
    }
}
