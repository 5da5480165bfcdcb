use std::{
    os::unix::net::UnixStream,
    path::PathBuf,
    process,
    process::{Command, Stdio},
    time,
};

use anyhow::Context;
use tempfile::TempDir;

use super::ptyhubd_bin;

/// Proc is a helper handle for a `ptyhubd` subprocess, spawned with no
/// CLI args (the binary reads everything from the environment). Kills
/// the subprocess when it goes out of scope.
pub struct Proc {
    pub proc: process::Child,
    _tmp_dir: TempDir,
    pub tmp_dir: PathBuf,
    pub socket_path: PathBuf,
}

impl Proc {
    pub fn new() -> anyhow::Result<Proc> {
        let tmp_dir = tempfile::Builder::new()
            .prefix("ptyhubd-test")
            .rand_bytes(20)
            .tempdir()
            .context("creating tmp dir")?;
        let runtime_dir = tmp_dir.path().join("runtime");
        std::fs::create_dir_all(&runtime_dir).context("creating runtime dir")?;
        let socket_path = runtime_dir.join("terminal-mcp").join("terminal-mcp.socket");
        let records_dir = tmp_dir.path().join("recordings");

        let proc = Command::new(ptyhubd_bin()?)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", std::env::var("HOME").unwrap_or_default())
            .env("XDG_RUNTIME_DIR", &runtime_dir)
            .env("TERMINAL_MCP_RECORD_DIR", &records_dir)
            .spawn()
            .context("spawning ptyhubd process")?;

        // spin until we can dial the socket successfully
        let mut sleep_dur = time::Duration::from_millis(5);
        for _ in 0..12 {
            if UnixStream::connect(&socket_path).is_ok() {
                break;
            }
            std::thread::sleep(sleep_dur);
            sleep_dur *= 2;
        }

        let tmp_dir_path = tmp_dir.path().to_path_buf();
        Ok(Proc { proc, _tmp_dir: tmp_dir, tmp_dir: tmp_dir_path, socket_path })
    }

    pub fn connect(&self) -> anyhow::Result<UnixStream> {
        Ok(UnixStream::connect(&self.socket_path)?)
    }
}

impl std::ops::Drop for Proc {
    fn drop(&mut self) {
        if let Err(e) = self.proc.kill() {
            eprintln!("err killing daemon proc: {:?}", e);
        }
    }
}
