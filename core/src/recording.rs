//! Recording writer (C3): optional on-disk capture of a session's PTY
//! output as a raw log, a classic-format timing stream, and a metadata JSON
//! sidecar, plus a retention sweep.
//!
//! Grounded on `b0cal-miel`'s `StreamRecorder`/`CaptureArtifacts` shape — a
//! session-scoped capture object with a `finalize` that writes aggregated
//! metadata — adapted here from TCP-proxy capture to PTY byte capture, and
//! on the teacher's atomic-write-then-rename pattern
//! (`workspace.rs::write_projects_atomic`) for the metadata sidecar.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RecordingError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub session_id: Uuid,
    pub name: Option<String>,
    pub assistant: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub max_cols: u16,
    pub max_rows: u16,
    pub visitors: Vec<String>,
    /// When set, this recording is exempt from age-based expiry.
    pub kept_at: Option<DateTime<Utc>>,
}

impl RecordingMetadata {
    fn new(session_id: Uuid, name: Option<String>, assistant: Option<String>) -> Self {
        Self {
            session_id,
            name,
            assistant,
            started_at: Utc::now(),
            ended_at: None,
            max_cols: 0,
            max_rows: 0,
            visitors: Vec::new(),
            kept_at: None,
        }
    }
}

fn log_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("session-{id}.log"))
}

fn timing_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("session-{id}.timing"))
}

fn metadata_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("session-{id}.metadata.json"))
}

/// A live recording in progress. One per recorded session.
pub struct Recording {
    dir: PathBuf,
    session_id: Uuid,
    raw_log: File,
    timing_log: File,
    started: Instant,
    metadata: RecordingMetadata,
}

impl Recording {
    pub fn start(
        dir: &Path,
        session_id: Uuid,
        name: Option<String>,
        assistant: Option<String>,
    ) -> Result<Self, RecordingError> {
        fs::create_dir_all(dir).map_err(RecordingError::Write)?;

        let raw_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path(dir, session_id))
            .map_err(|source| RecordingError::Open {
                path: log_path(dir, session_id).display().to_string(),
                source,
            })?;
        let timing_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(timing_path(dir, session_id))
            .map_err(|source| RecordingError::Open {
                path: timing_path(dir, session_id).display().to_string(),
                source,
            })?;

        let metadata = RecordingMetadata::new(session_id, name, assistant);
        let me = Self {
            dir: dir.to_path_buf(),
            session_id,
            raw_log,
            timing_log,
            started: Instant::now(),
            metadata,
        };
        me.write_metadata()?;
        Ok(me)
    }

    /// Append one chunk of output: raw bytes to the log, one timing line
    /// `<seconds since start, fixed-point> <byte count>` to the timing
    /// stream (the classic asciinema-style format; readers that also want
    /// input markers use an extended format this writer never emits, and
    /// degrade gracefully by ignoring the absent marker column).
    pub fn record_output(&mut self, bytes: &[u8]) -> Result<(), RecordingError> {
        self.raw_log.write_all(bytes).map_err(RecordingError::Write)?;
        let elapsed = self.started.elapsed().as_secs_f64();
        writeln!(self.timing_log, "{elapsed:.6} {}", bytes.len()).map_err(RecordingError::Write)?;
        Ok(())
    }

    pub fn observe_size(&mut self, cols: u16, rows: u16) -> Result<(), RecordingError> {
        let mut changed = false;
        if cols > self.metadata.max_cols {
            self.metadata.max_cols = cols;
            changed = true;
        }
        if rows > self.metadata.max_rows {
            self.metadata.max_rows = rows;
            changed = true;
        }
        if changed {
            self.write_metadata()?;
        }
        Ok(())
    }

    pub fn add_visitor(&mut self, username: &str) -> Result<(), RecordingError> {
        if !self.metadata.visitors.iter().any(|v| v == username) {
            self.metadata.visitors.push(username.to_string());
            self.write_metadata()?;
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<(), RecordingError> {
        self.metadata.ended_at = Some(Utc::now());
        self.write_metadata()
    }

    fn write_metadata(&self) -> Result<(), RecordingError> {
        let json = serde_json::to_vec_pretty(&self.metadata).map_err(RecordingError::Metadata)?;
        let final_path = metadata_path(&self.dir, self.session_id);
        let tmp_path = final_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(RecordingError::Write)?;
        fs::rename(&tmp_path, &final_path).map_err(RecordingError::Write)?;
        Ok(())
    }
}

/// Retention policy: recordings older than `max_age` and not `kept_at` are
/// eligible for deletion; per-agent (grouped by `assistant`), at most
/// `max_per_agent` recent recordings are retained — beyond that, oldest
/// unkept recordings are deleted regardless of age; `active_ids` are never
/// deleted regardless of age or count. Returns the list of metadata files
/// removed (diagnostic/logging use).
pub fn sweep_expired(
    dir: &Path,
    max_age: Duration,
    max_per_agent: usize,
    active_ids: &std::collections::HashSet<Uuid>,
) -> std::io::Result<Vec<PathBuf>> {
    let mut by_agent: HashMap<Option<String>, Vec<(Uuid, RecordingMetadata, PathBuf)>> = HashMap::new();

    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if !path.to_string_lossy().ends_with(".metadata.json") {
            continue;
        }
        let Ok(data) = fs::read(&path) else { continue };
        let Ok(meta) = serde_json::from_slice::<RecordingMetadata>(&data) else {
            continue;
        };
        by_agent
            .entry(meta.assistant.clone())
            .or_default()
            .push((meta.session_id, meta, path));
    }

    let now = Utc::now();
    let mut removed = Vec::new();

    for (_, mut recordings) in by_agent {
        recordings.sort_by_key(|(_, meta, _)| std::cmp::Reverse(meta.started_at));

        for (idx, (id, meta, meta_path)) in recordings.iter().enumerate() {
            if active_ids.contains(id) {
                continue;
            }
            if meta.kept_at.is_some() {
                continue;
            }
            let past_count_limit = idx >= max_per_agent;
            let age = now.signed_duration_since(meta.started_at);
            let past_age_limit = age
                .to_std()
                .map(|age| age > max_age)
                .unwrap_or(false);
            if past_count_limit || past_age_limit {
                if remove_recording_files(dir, *id).is_ok() {
                    removed.push(meta_path.clone());
                }
            }
        }
    }

    Ok(removed)
}

fn remove_recording_files(dir: &Path, id: Uuid) -> std::io::Result<()> {
    let _ = fs::remove_file(log_path(dir, id));
    let _ = fs::remove_file(timing_path(dir, id));
    fs::remove_file(metadata_path(dir, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn records_output_and_finalizes() {
        let tmp = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let mut rec = Recording::start(tmp.path(), id, Some("demo".into()), Some("claude".into())).unwrap();
        rec.record_output(b"hello world").unwrap();
        rec.observe_size(80, 24).unwrap();
        rec.add_visitor("alice").unwrap();
        rec.finalize().unwrap();

        let raw = fs::read(log_path(tmp.path(), id)).unwrap();
        assert_eq!(raw, b"hello world");

        let meta_raw = fs::read(metadata_path(tmp.path(), id)).unwrap();
        let meta: RecordingMetadata = serde_json::from_slice(&meta_raw).unwrap();
        assert_eq!(meta.max_cols, 80);
        assert_eq!(meta.max_rows, 24);
        assert_eq!(meta.visitors, vec!["alice".to_string()]);
        assert!(meta.ended_at.is_some());
    }

    #[test]
    fn sweep_keeps_active_and_kept_recordings() {
        let tmp = tempfile::tempdir().unwrap();
        let active_id = Uuid::new_v4();
        let mut active = Recording::start(tmp.path(), active_id, None, Some("claude".into())).unwrap();
        active.finalize().unwrap();

        let mut active_ids = HashSet::new();
        active_ids.insert(active_id);

        let removed = sweep_expired(tmp.path(), Duration::from_secs(0), 0, &active_ids).unwrap();
        assert!(removed.is_empty());
        assert!(metadata_path(tmp.path(), active_id).exists());
    }

    #[test]
    fn sweep_enforces_per_agent_count_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = Uuid::new_v4();
            let mut rec = Recording::start(tmp.path(), id, None, Some("claude".into())).unwrap();
            rec.finalize().unwrap();
            ids.push(id);
            std::thread::sleep(Duration::from_millis(5));
        }
        let removed = sweep_expired(tmp.path(), Duration::from_secs(3600), 1, &HashSet::new()).unwrap();
        assert_eq!(removed.len(), 2);
    }
}
