// Owns a single PTY-backed child process: spawn, read, write, resize,
// exit notification and best-effort foreground-process-name sniffing.

use std::collections::HashMap;
use std::ffi::OsString;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process;
use std::sync::{Condvar, Arc, Mutex};
use std::thread;

use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::error::{CoreError, CoreResult};
use crate::locale;
use crate::user;

/// A caller-supplied rewrite of `(shell, args)`, used to run the child
/// under an OS-level sandbox. Opaque to this crate: we never parse or
/// validate whatever the wrapper does.
pub type SandboxWrapper = Box<dyn Fn(&str, &[String]) -> (String, Vec<String>) + Send + Sync>;

// see `man ioctl_tty` for info on this ioctl command
nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);

/// The only piece of `tty.rs`'s terminal-geometry helpers this crate
/// still needs: setting a PTY's window size from the spawning/resizing
/// side. The CLI-attach-only pieces (raw-mode flag juggling, echo
/// toggling) had no caller left once the CLI surface was dropped.
struct PtySize {
    rows: u16,
    cols: u16,
}

impl PtySize {
    fn set_fd(&self, fd: RawFd) -> anyhow::Result<()> {
        let term_size =
            libc::winsize { ws_row: self.rows, ws_col: self.cols, ws_xpixel: 0, ws_ypixel: 0 };
        // Safety: term_size is stack allocated and lives for the call.
        unsafe {
            tiocswinsz(fd, &term_size).context("setting term size")?;
        }
        Ok(())
    }
}

/// Notifies waiters when a child process has exited, the way a `wait`
/// on a one-shot condition variable would.
struct ExitNotifier {
    slot: Mutex<Option<i32>>,
    cond: Condvar,
}

impl ExitNotifier {
    fn new() -> Self {
        ExitNotifier { slot: Mutex::new(None), cond: Condvar::new() }
    }

    fn notify_exit(&self, status: i32) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(status);
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Option<std::time::Duration>) -> Option<i32> {
        let slot = self.slot.lock().unwrap();
        if slot.is_some() {
            return *slot;
        }
        match timeout {
            Some(t) => {
                let (exit_status, wait_res) = self
                    .cond
                    .wait_timeout_while(slot, t, |exit_status| exit_status.is_none())
                    .unwrap();
                if wait_res.timed_out() { None } else { *exit_status }
            }
            None => *self.cond.wait_while(slot, |exit_status| exit_status.is_none()).unwrap(),
        }
    }
}

/// Outcome of one bounded `poll_read`.
#[derive(Debug)]
pub enum PollOutcome {
    Data(usize),
    Timeout,
    Eof,
}

pub struct PtyProcess {
    fork: shpool_pty::fork::Fork,
    child_pid: libc::pid_t,
    exit_notifier: Arc<ExitNotifier>,
    closed: bool,
}

impl PtyProcess {
    /// Spawns `shell` under a PTY of the given size. If `sandbox_wrapper`
    /// is set, `(shell, args)` is rewritten before fork. Fails with
    /// `SpawnFailed` on exec/fork error.
    #[instrument(skip(env, sandbox_wrapper))]
    pub fn spawn(
        shell: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
        cols: u16,
        rows: u16,
        native_shell: bool,
        set_locale_env: bool,
        sandbox_wrapper: Option<&SandboxWrapper>,
    ) -> CoreResult<PtyProcess> {
        let (shell, args) = match sandbox_wrapper {
            Some(wrap) => wrap(shell, args),
            None => (shell.to_string(), args.to_vec()),
        };

        let mut cmd = process::Command::new(&shell);
        cmd.args(&args);
        cmd.current_dir(cwd);
        cmd.stdin(process::Stdio::inherit());
        cmd.stdout(process::Stdio::inherit());
        cmd.stderr(process::Stdio::inherit());

        // The child inherits our environment by default; additive entries
        // win, and a locale safeguard pass runs on top of that.
        let mut child_env: Vec<(OsString, OsString)> =
            std::env::vars_os().collect();
        for (k, v) in env {
            child_env.retain(|(ek, _)| ek.to_string_lossy() != *k);
            child_env.push((OsString::from(k), OsString::from(v)));
        }
        locale::apply_locale_safeguard(&mut child_env, native_shell, set_locale_env);
        child_env.retain(|(k, _)| k.to_string_lossy() != "TERMINAL_MCP");
        child_env.push((OsString::from("TERMINAL_MCP"), OsString::from("1")));

        cmd.env_clear();
        cmd.envs(child_env);

        if args.is_empty() {
            // login-shell arg0 convention, matches the common `-bash`/`-zsh` trick.
            if let Some(basename) = Path::new(&shell).file_name().and_then(|s| s.to_str()) {
                cmd.arg0(format!("-{basename}"));
            }
        }

        let mut fork = shpool_pty::fork::Fork::from_ptmx()
            .map_err(|e| CoreError::SpawnFailed { reason: format!("forking pty: {e}") })?;

        if let Ok(slave) = fork.is_child() {
            if let Some(fd) = slave.borrow_fd() {
                let _ = PtySize { rows, cols }.set_fd(fd.as_raw_fd());
            }
            let err = cmd.exec();
            eprintln!("shell exec err: {err:?}");
            process::exit(1);
        }

        let child_pid = fork.child_pid().ok_or(CoreError::SpawnFailed {
            reason: "missing child pid after fork".to_string(),
        })?;

        let exit_notifier = Arc::new(ExitNotifier::new());
        spawn_child_watcher(child_pid, Arc::clone(&exit_notifier));

        Ok(PtyProcess { fork, child_pid, exit_notifier, closed: false })
    }

    /// Best-effort default shell lookup, grounded in the host's passwd
    /// entry for the invoking user.
    pub fn default_shell() -> String {
        user::info().map(|i| i.default_shell).unwrap_or_else(|_| "/bin/sh".to_string())
    }

    fn master_fd(&mut self) -> anyhow::Result<RawFd> {
        let master = self.fork.is_parent().context("expected parent side of fork")?;
        Ok(master.as_raw_fd())
    }

    /// Polls the master fd for up to `timeout` and reads one chunk if
    /// readable. Bounded so a reader holding this behind a lock (shared
    /// with `write`/`resize`) never starves writers the way a plain
    /// blocking read would.
    pub fn poll_read(&mut self, buf: &mut [u8], timeout: std::time::Duration) -> anyhow::Result<PollOutcome> {
        use nix::poll::{self, PollFd, PollFlags};
        use std::io::Read;

        let fd = self.master_fd().context("pty master fd")?;
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let ms: u16 = timeout.as_millis().min(u16::MAX as u128) as u16;
        let n = poll::poll(&mut fds, ms).context("poll pty master")?;
        if n == 0 {
            return Ok(PollOutcome::Timeout);
        }

        let mut master = self.fork.is_parent().context("expected parent side of fork")?;
        match master.read(buf) {
            Ok(0) => Ok(PollOutcome::Eof),
            Ok(n) => Ok(PollOutcome::Data(n)),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(PollOutcome::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> CoreResult<()> {
        use std::io::Write;
        if self.closed {
            return Err(CoreError::Closed);
        }
        let mut master =
            self.fork.is_parent().map_err(|_| CoreError::Closed)?;
        master.write_all(bytes).map_err(|_| CoreError::Closed)
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> CoreResult<()> {
        if cols == 0 || rows == 0 {
            return Err(CoreError::MissingParam("cols/rows must be non-zero"));
        }
        let fd = self.master_fd().map_err(|_| CoreError::Closed)?;
        PtySize { rows, cols }.set_fd(fd).map_err(|_| CoreError::Closed)
    }

    /// Best-effort foreground process name of the shell's controlling
    /// terminal, bounded to a short syscall-only lookup. Never blocks.
    pub fn current_process_name(&mut self) -> String {
        self.try_current_process_name().unwrap_or_else(|| "shell".to_string())
    }

    fn try_current_process_name(&mut self) -> Option<String> {
        let fd = self.master_fd().ok()?;
        let pgrp = nix::unistd::tcgetpgrp(unsafe {
            std::os::fd::BorrowedFd::borrow_raw(fd)
        })
        .ok()?;
        process_name_for_pid(pgrp.as_raw())
    }

    pub fn wait_exit(&self, timeout: Option<std::time::Duration>) -> Option<i32> {
        self.exit_notifier.wait(timeout)
    }

    /// Idempotent: sends SIGHUP then, if needed, SIGKILL, and closes the
    /// master descriptor.
    pub fn kill(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        unsafe {
            libc::kill(self.child_pid, libc::SIGHUP);
        }
        if self.exit_notifier.wait(Some(std::time::Duration::from_millis(200))).is_none() {
            unsafe {
                libc::kill(self.child_pid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[instrument(skip(exit_notifier))]
fn spawn_child_watcher(child_pid: libc::pid_t, exit_notifier: Arc<ExitNotifier>) {
    thread::spawn(move || {
        let mut status: libc::c_int = 0;
        let unpacked = unsafe {
            match libc::waitpid(child_pid, &mut status, 0) {
                -1 => None,
                _ if libc::WIFEXITED(status) => Some(libc::WEXITSTATUS(status)),
                _ if libc::WIFSIGNALED(status) => Some(128 + libc::WTERMSIG(status)),
                _ => Some(1),
            }
        };
        let code = unpacked.unwrap_or(1);
        info!(code, "child exited");
        exit_notifier.notify_exit(code);
    });
}

#[cfg(target_os = "linux")]
fn process_name_for_pid(pid: i32) -> Option<String> {
    let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    let name = comm.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(target_os = "macos")]
fn process_name_for_pid(pid: i32) -> Option<String> {
    use libproc::proc_pid::pidpath;
    let path = pidpath(pid).ok()?;
    Path::new(&path).file_name().map(|s| s.to_string_lossy().into_owned())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn process_name_for_pid(_pid: i32) -> Option<String> {
    None
}
