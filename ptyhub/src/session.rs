// Glues PtyProcess + TerminalEmulator + OscTitleParser into one entity: a
// single terminal tab. Owns the background reader thread, matching the
// teacher's shell->client thread in daemon/shell.rs, generalized from a
// single-attached-client model to publishing onto the EventBus.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{info, instrument, warn};

use ptyhub_protocol::{AsciicastEnv, CursorPosition, Dimensions, RecordingMode, SessionEvent, SessionId, StopReason};

use crate::emulator::TerminalEmulator;
use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;
use crate::osc::{OscTitleParser, TitleOutcome};
use crate::pty::{PollOutcome, PtyProcess, SandboxWrapper};
use crate::recorder::{Recorder, RecordingManager};

const READ_BUF_SIZE: usize = 16 * 1024;
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const PROCESS_NAME_DEBOUNCE: Duration = Duration::from_millis(75);

/// Construction options for a new `Session`. Mirrors the defaults a caller
/// gets when a field is omitted.
pub struct SessionOptions {
    pub cols: u16,
    pub rows: u16,
    pub shell: Option<String>,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: std::collections::HashMap<String, String>,
    pub sandbox_wrapper: Option<SandboxWrapper>,
    pub native_shell: bool,
    pub set_locale_env: bool,
    pub startup_banner: Option<String>,
    pub scrollback: usize,
    /// Retention mode for this session's recording. Only takes effect
    /// if `recording_manager` is also set; a caller that never wires a
    /// manager gets no recording regardless of mode.
    pub recording_mode: RecordingMode,
    pub recording_manager: Option<Arc<RecordingManager>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            cols: 120,
            rows: 40,
            shell: None,
            args: Vec::new(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            env: std::collections::HashMap::new(),
            sandbox_wrapper: None,
            native_shell: false,
            set_locale_env: false,
            startup_banner: None,
            scrollback: 1000,
            recording_mode: RecordingMode::Off,
            recording_manager: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Exited(Option<i32>),
    Disposed,
}

pub struct ScreenshotResult {
    pub content: String,
    pub cursor: CursorPosition,
    pub dimensions: Dimensions,
}

struct Core {
    pty: PtyProcess,
    emulator: TerminalEmulator,
    osc: OscTitleParser,
    last_title: Option<String>,
    last_process_name: String,
    state: SessionState,
    recorder: Option<Recorder>,
}

pub struct Session {
    id: SessionId,
    core: Mutex<Core>,
    bus: EventBus,
    reader_shutdown: Arc<AtomicBool>,
    reader_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Session {
    #[instrument(skip(opts, bus), fields(id = id.0))]
    pub fn new(id: SessionId, opts: SessionOptions, bus: EventBus) -> CoreResult<Arc<Session>> {
        let shell = opts.shell.unwrap_or_else(PtyProcess::default_shell);
        let pty = PtyProcess::spawn(
            &shell,
            &opts.args,
            &opts.env,
            &opts.cwd,
            opts.cols,
            opts.rows,
            opts.native_shell,
            opts.set_locale_env,
            opts.sandbox_wrapper.as_ref(),
        )?;

        let mut emulator = TerminalEmulator::new(opts.cols, opts.rows, opts.scrollback);
        if let Some(banner) = &opts.startup_banner {
            emulator.write(banner.as_bytes());
        }

        bus.register_session(id);

        let recorder = match &opts.recording_manager {
            Some(manager) => {
                let env = AsciicastEnv { shell: Some(shell.clone()), term: opts.env.get("TERM").cloned() };
                match manager.create(opts.recording_mode, opts.cols, opts.rows, env) {
                    Ok(recorder) => Some(recorder),
                    Err(e) => {
                        warn!(error = %e, "failed to start session recording, continuing unrecorded");
                        None
                    }
                }
            }
            None => None,
        };

        let core = Core {
            pty,
            emulator,
            osc: OscTitleParser::new(),
            last_title: None,
            last_process_name: "shell".to_string(),
            state: SessionState::Active,
            recorder,
        };

        let session = Arc::new(Session {
            id,
            core: Mutex::new(core),
            bus,
            reader_shutdown: Arc::new(AtomicBool::new(false)),
            reader_handle: Mutex::new(None),
        });

        let reader = Arc::clone(&session);
        let handle = thread::spawn(move || reader.read_loop());
        *session.reader_handle.lock().unwrap() = Some(handle);

        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn write(&self, data: &[u8]) -> CoreResult<()> {
        let mut core = self.core.lock().unwrap();
        if core.state != SessionState::Active {
            return Err(CoreError::NotActive);
        }
        core.pty.write(data)
    }

    pub fn resize(&self, cols: u16, rows: u16) -> CoreResult<()> {
        let mut core = self.core.lock().unwrap();
        if core.state != SessionState::Active {
            return Err(CoreError::NotActive);
        }
        core.pty.resize(cols, rows)?;
        core.emulator.resize(cols, rows);
        if let Some(recorder) = &core.recorder {
            recorder.record_resize(cols, rows);
        }
        drop(core);
        self.bus.publish(self.id, SessionEvent::Resize { cols, rows });
        Ok(())
    }

    pub fn take_screenshot(&self) -> CoreResult<ScreenshotResult> {
        let core = self.core.lock().unwrap();
        Ok(ScreenshotResult {
            content: core.emulator.get_viewport(),
            cursor: core.emulator.get_cursor(),
            dimensions: core.emulator.dimensions(),
        })
    }

    pub fn get_content(&self) -> String {
        self.core.lock().unwrap().emulator.get_full_content()
    }

    pub fn is_active(&self) -> bool {
        self.core.lock().unwrap().state == SessionState::Active
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().unwrap().state
    }

    /// Idempotent: forces the child to exit and publishes the terminal
    /// `Exit` event if it hasn't already been published.
    pub fn dispose(&self) {
        let mut core = self.core.lock().unwrap();
        if core.state == SessionState::Disposed {
            return;
        }
        let code = match core.state {
            SessionState::Exited(code) => code,
            _ => None,
        };
        core.pty.kill();
        core.state = SessionState::Disposed;
        if let Some(recorder) = core.recorder.take() {
            match recorder.finalize(code, StopReason::Explicit) {
                Ok(meta) => info!(stop_reason = %meta.stop_reason, bytes = meta.bytes_written, "recording finalized"),
                Err(e) => warn!(error = %e, "failed to finalize session recording"),
            }
        }
        drop(core);

        self.reader_shutdown.store(true, Ordering::Release);
        self.bus.publish(self.id, SessionEvent::Exit { code });
        self.bus.dispose_session(self.id);

        if let Some(handle) = self.reader_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    #[instrument(skip(self), fields(id = self.id.0))]
    fn read_loop(self: Arc<Session>) {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut last_sample = std::time::Instant::now();

        loop {
            if self.reader_shutdown.load(Ordering::Acquire) {
                return;
            }

            let outcome = {
                let mut core = self.core.lock().unwrap();
                if core.state != SessionState::Active {
                    return;
                }
                core.pty.poll_read(&mut buf, POLL_TIMEOUT)
            };

            match outcome {
                Ok(PollOutcome::Timeout) => {
                    self.maybe_sample_process_name(&mut last_sample);
                    self.maybe_finalize_recording_due_to_limits();
                    continue;
                }
                Ok(PollOutcome::Eof) => {
                    self.on_exit(None);
                    return;
                }
                Ok(PollOutcome::Data(n)) if n > 0 => {
                    let chunk = buf[..n].to_vec();
                    self.handle_output(&chunk);
                    self.maybe_sample_process_name(&mut last_sample);
                }
                Ok(PollOutcome::Data(_)) => continue,
                Err(e) => {
                    warn!(error = %e, "pty read failed");
                    self.on_exit(None);
                    return;
                }
            }
        }
    }

    fn handle_output(&self, chunk: &[u8]) {
        let title_outcome = {
            let mut core = self.core.lock().unwrap();
            core.emulator.write(chunk);
            if let Some(recorder) = &core.recorder {
                recorder.record_output(&String::from_utf8_lossy(chunk));
            }
            core.osc.feed(chunk)
        };

        self.bus.publish(self.id, SessionEvent::Output { bytes: chunk.to_vec() });
        self.maybe_finalize_recording_due_to_limits();

        match title_outcome {
            TitleOutcome::NoChange => {}
            TitleOutcome::Useful(title) => self.apply_title(Some(title)),
            TitleOutcome::Cleared => self.apply_title(None),
        }
    }

    fn apply_title(&self, title: Option<String>) {
        let changed = {
            let mut core = self.core.lock().unwrap();
            if core.last_title == title {
                false
            } else {
                core.last_title = title.clone();
                true
            }
        };
        if changed {
            self.bus.publish(self.id, SessionEvent::TitleChanged { title });
        }
    }

    fn maybe_sample_process_name(&self, last_sample: &mut std::time::Instant) {
        if last_sample.elapsed() < PROCESS_NAME_DEBOUNCE {
            return;
        }
        *last_sample = std::time::Instant::now();

        let (changed, name) = {
            let mut core = self.core.lock().unwrap();
            let name = core.pty.current_process_name();
            if name == core.last_process_name {
                (false, name)
            } else {
                core.last_process_name = name.clone();
                (true, name)
            }
        };
        if changed {
            self.bus.publish(self.id, SessionEvent::ProcessChanged { name });
        }
    }

    /// Forces the recorder to finalize once `max_duration`/
    /// `inactivity_timeout` is hit, per SPEC_FULL.md §4.7. The session
    /// itself keeps running; only the recording stops.
    fn maybe_finalize_recording_due_to_limits(&self) {
        let mut core = self.core.lock().unwrap();
        let Some(recorder) = &core.recorder else { return };
        let Some(reason) = recorder.check_limits() else { return };
        let recorder = core.recorder.take().unwrap();
        match recorder.finalize(None, reason) {
            Ok(meta) => info!(stop_reason = %meta.stop_reason, bytes = meta.bytes_written, "recording limit reached"),
            Err(e) => warn!(error = %e, "failed to finalize session recording at limit"),
        }
    }

    fn on_exit(&self, fallback_code: Option<i32>) {
        let mut core = self.core.lock().unwrap();
        if core.state != SessionState::Active {
            return;
        }
        let code = core.pty.wait_exit(Some(Duration::from_millis(50))).or(fallback_code);
        core.state = SessionState::Exited(code);
        drop(core);
        info!(?code, "session pty exited");
        self.bus.publish(self.id, SessionEvent::Exit { code });
    }
}
