// Asciicast v2 session recording: temp-file writer with atomic
// promote-to-final-path on finalize, retention modes, and idle/duration
// limits. No teacher analog exists for recording itself (the corpus has
// no asciicast grounding anywhere); the temp-file handling follows the
// same `tempfile::NamedTempFile` idiom the teacher uses for its pager
// scratch file in `daemon/pager.rs`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Context;
use tracing::{info, warn};

use ptyhub_protocol::{
    AsciicastEnv, AsciicastFrame, AsciicastHeader, FrameKind, RecordingMetadata, RecordingMode, StopReason,
};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};

/// Owns the recording output directory and default limits for a daemon
/// instance: the thing every `Session` asks to start its own `Recorder`.
/// Grounded in the same factory-over-shared-config role the teacher's
/// `Server` plays for its own per-session `shell::Session`s.
pub struct RecordingManager {
    output_dir: PathBuf,
    limits_config: crate::config::RecordingLimitsConfig,
    list_cap: usize,
    next_id: AtomicU64,
}

impl RecordingManager {
    pub fn new(output_dir: PathBuf, limits_config: crate::config::RecordingLimitsConfig, list_cap: usize) -> RecordingManager {
        RecordingManager { output_dir, limits_config, list_cap, next_id: AtomicU64::new(1) }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<RecordingManager> {
        Ok(RecordingManager::new(config.recordings_dir()?, config.recording.clone(), config.recordings_list_cap))
    }

    /// Starts a fresh `Recorder` under this manager's output dir and
    /// default limits. `id` is only used to name the temp/final files;
    /// it need not match the owning session's id format.
    pub fn create(&self, mode: RecordingMode, cols: u16, rows: u16, env: AsciicastEnv) -> anyhow::Result<Recorder> {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel).to_string();
        Recorder::start(id, mode, self.output_dir.clone(), self.limits(), cols, rows, env)
    }

    fn limits(&self) -> Limits {
        Limits {
            idle_time_limit_s: self.limits_config.idle_time_limit_s,
            max_duration_s: self.limits_config.max_duration_s,
            inactivity_timeout_s: self.limits_config.inactivity_timeout_s,
        }
    }

    pub fn list(&self) -> Vec<RecordingListing> {
        list_recordings(&self.output_dir, self.list_cap)
    }

    pub fn delete(&self, path: &Path) -> std::io::Result<()> {
        delete_recording(path)
    }

    /// Removes stale temp files left behind by a prior crashed daemon.
    /// Call once at bootstrap, before any session starts recording.
    pub fn cleanup_stale(&self) -> usize {
        cleanup_stale_recordings()
    }
}

pub struct Limits {
    pub idle_time_limit_s: Option<f64>,
    pub max_duration_s: Option<f64>,
    pub inactivity_timeout_s: Option<f64>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits { idle_time_limit_s: None, max_duration_s: None, inactivity_timeout_s: None }
    }
}

struct Inner {
    file: std::fs::File,
    temp_path: PathBuf,
    started_at: Instant,
    wall_start: std::time::SystemTime,
    last_event_at: Instant,
    bytes_written: u64,
    finalized: bool,
}

pub struct Recorder {
    id: String,
    mode: RecordingMode,
    output_dir: PathBuf,
    limits: Limits,
    inner: Mutex<Inner>,
}

impl Recorder {
    pub fn start(
        id: String,
        mode: RecordingMode,
        output_dir: PathBuf,
        limits: Limits,
        cols: u16,
        rows: u16,
        env: AsciicastEnv,
    ) -> anyhow::Result<Recorder> {
        let temp_path = std::env::temp_dir().join(format!("terminal-mcp-recording-{id}.cast"));
        let mut file = std::fs::File::create(&temp_path)
            .with_context(|| format!("creating recording temp file {temp_path:?}"))?;

        let wall_start = std::time::SystemTime::now();
        let header = AsciicastHeader {
            version: 2,
            width: cols,
            height: rows,
            timestamp: wall_start
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            env: Some(env),
        };
        let header_line = serde_json::to_string(&header).context("serializing cast header")?;
        writeln!(file, "{header_line}").context("writing cast header")?;

        Ok(Recorder {
            id,
            mode,
            output_dir,
            limits,
            inner: Mutex::new(Inner {
                file,
                temp_path,
                started_at: Instant::now(),
                wall_start,
                last_event_at: Instant::now(),
                bytes_written: header_line.len() as u64 + 1,
                finalized: false,
            }),
        })
    }

    pub fn record_output(&self, data: &str) {
        self.append(FrameKind::Output, data);
    }

    pub fn record_resize(&self, cols: u16, rows: u16) {
        self.append(FrameKind::Resize, &format!("{cols}x{rows}"));
    }

    /// Whether a duration/inactivity limit has been exceeded and, if so,
    /// which `StopReason` the caller should finalize with. Checked by
    /// the owning session on its normal poll cadence rather than on a
    /// dedicated timer thread.
    pub fn check_limits(&self) -> Option<StopReason> {
        let inner = self.inner.lock().unwrap();
        if inner.finalized {
            return None;
        }
        if let Some(max) = self.limits.max_duration_s {
            if inner.started_at.elapsed().as_secs_f64() >= max {
                return Some(StopReason::MaxDuration);
            }
        }
        if let Some(timeout) = self.limits.inactivity_timeout_s {
            if inner.last_event_at.elapsed().as_secs_f64() >= timeout {
                return Some(StopReason::Inactivity);
            }
        }
        None
    }

    fn append(&self, kind: FrameKind, data: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.finalized {
            return;
        }
        let mut t = inner.started_at.elapsed().as_secs_f64();
        if let Some(limit) = self.limits.idle_time_limit_s {
            let gap = inner.last_event_at.elapsed().as_secs_f64();
            if gap > limit {
                t -= gap - limit;
            }
        }
        inner.last_event_at = Instant::now();

        let frame = AsciicastFrame { t, kind, data: data.to_string() };
        match serde_json::to_string(&frame) {
            Ok(line) => {
                if let Err(e) = writeln!(inner.file, "{line}") {
                    warn!(error = %e, "recording io error");
                    return;
                }
                inner.bytes_written += line.len() as u64 + 1;
            }
            Err(e) => warn!(error = %e, "failed to serialize cast frame"),
        }
    }

    /// Closes the temp file and atomically promotes it to the output
    /// directory, or discards it, per the retention mode. Idempotent
    /// calls past the first raise `AlreadyFinalized`.
    pub fn finalize(&self, exit_code: Option<i32>, stop_reason: StopReason) -> CoreResult<RecordingMetadata> {
        let mut inner = self.inner.lock().unwrap();
        if inner.finalized {
            return Err(CoreError::AlreadyFinalized);
        }
        inner.finalized = true;
        let _ = inner.file.flush();

        let should_keep = match self.mode {
            RecordingMode::Always => true,
            RecordingMode::OnFailure => matches!(exit_code, Some(code) if code != 0),
            RecordingMode::Off => false,
        };

        let duration_ms = inner.started_at.elapsed().as_millis() as u64;
        let start_time = inner
            .wall_start
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let end_time = start_time + duration_ms / 1000;

        let metadata = RecordingMetadata {
            exit_code,
            duration_ms,
            start_time,
            end_time,
            bytes_written: inner.bytes_written,
            stop_reason: stop_reason.as_str().to_string(),
        };

        if !should_keep {
            let _ = std::fs::remove_file(&inner.temp_path);
            info!(id = %self.id, "recording discarded per retention mode");
            return Ok(metadata);
        }

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| CoreError::RecorderIo(e.to_string()))?;
        let final_path = self
            .output_dir
            .join(format!("terminal-{}-{}.cast", start_time * 1000 + duration_ms % 1000, self.id));
        promote(&inner.temp_path, &final_path).map_err(|e| CoreError::RecorderIo(e.to_string()))?;

        let sidecar = final_path.with_extension("cast.meta.json");
        let meta_json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| CoreError::RecorderIo(e.to_string()))?;
        std::fs::write(&sidecar, meta_json).map_err(|e| CoreError::RecorderIo(e.to_string()))?;

        info!(id = %self.id, path = %final_path.display(), "recording finalized");
        Ok(metadata)
    }
}

/// Renames atomically within the same filesystem; falls back to
/// copy+unlink on `EXDEV` (temp dir and output dir on different mounts).
fn promote(temp_path: &Path, final_path: &Path) -> std::io::Result<()> {
    match std::fs::rename(temp_path, final_path) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            std::fs::copy(temp_path, final_path)?;
            std::fs::remove_file(temp_path)
        }
        Err(e) => Err(e),
    }
}

/// Scans the process temp directory for stale
/// `terminal-mcp-recording-*.cast` files left behind by a crashed
/// daemon and removes them, returning the count.
pub fn cleanup_stale_recordings() -> usize {
    let dir = std::env::temp_dir();
    let mut removed = 0;
    let Ok(entries) = std::fs::read_dir(&dir) else { return 0 };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("terminal-mcp-recording-") && name.ends_with(".cast") {
            if std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }
    if removed > 0 {
        warn!(removed, "cleaned up stale recording temp files");
    }
    removed
}

#[derive(Debug, Clone)]
pub struct RecordingListing {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: std::time::SystemTime,
}

/// Enumerates finalized recordings in `output_dir`, newest-first,
/// truncated to `cap` entries.
pub fn list_recordings(output_dir: &Path, cap: usize) -> Vec<RecordingListing> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(output_dir) else { return out };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("cast") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        out.push(RecordingListing {
            filename: entry.file_name().to_string_lossy().into_owned(),
            path,
            size: meta.len(),
            created_at: meta.created().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        });
    }
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    out.truncate(cap);
    out
}

pub fn delete_recording(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)?;
    let sidecar = path.with_extension("cast.meta.json");
    let _ = std::fs::remove_file(sidecar);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn always_mode_keeps_recording_regardless_of_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::start(
            "t1".to_string(),
            RecordingMode::Always,
            dir.path().to_path_buf(),
            Limits::default(),
            80,
            24,
            AsciicastEnv { shell: Some("/bin/sh".to_string()), term: Some("xterm-256color".to_string()) },
        )
        .unwrap();
        rec.record_output("hello\r\n");
        let meta = rec.finalize(Some(0), StopReason::Explicit).unwrap();
        assert_eq!(meta.exit_code, Some(0));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn on_failure_mode_discards_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::start(
            "t2".to_string(),
            RecordingMode::OnFailure,
            dir.path().to_path_buf(),
            Limits::default(),
            80,
            24,
            AsciicastEnv { shell: None, term: None },
        )
        .unwrap();
        rec.record_output("ok\r\n");
        rec.finalize(Some(0), StopReason::Explicit).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn double_finalize_errors() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::start(
            "t3".to_string(),
            RecordingMode::Off,
            dir.path().to_path_buf(),
            Limits::default(),
            80,
            24,
            AsciicastEnv { shell: None, term: None },
        )
        .unwrap();
        rec.finalize(None, StopReason::Explicit).unwrap();
        assert!(matches!(rec.finalize(None, StopReason::Explicit), Err(CoreError::AlreadyFinalized)));
    }
}
