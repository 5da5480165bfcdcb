use std::{
    os::unix::{
        io::{AsRawFd, FromRawFd},
        net::UnixListener,
        process::CommandExt,
    },
    path,
    process::{Command, Stdio},
    time,
};

use anyhow::Context;
use nix::{
    sys::signal::{self, Signal},
    unistd::{ForkResult, Pid},
};
use ntest::timeout;
use serde_json::json;

mod support;

use crate::support::{daemon, ptyhubd_bin, rpc::Conn};

#[test]
#[timeout(30000)]
fn rpc_initialize_handshake() -> anyhow::Result<()> {
    let proc = daemon::Proc::new().context("starting daemon proc")?;
    let mut conn = Conn::new(proc.connect()?)?;

    let result = conn.call(
        "initialize",
        json!({"clientInfo": {"name": "integration-test", "version": "0.0.1"}}),
    )?;
    assert_eq!(result["serverInfo"]["name"], "terminal-mcp-gui");
    assert!(result["protocolVersion"].is_string());
    Ok(())
}

#[test]
#[timeout(30000)]
fn rpc_unknown_method_is_rejected() -> anyhow::Result<()> {
    let proc = daemon::Proc::new().context("starting daemon proc")?;
    let mut conn = Conn::new(proc.connect()?)?;

    let err = conn.call_expect_error("notAMethod", json!({}))?;
    assert!(err.contains("unknown method"), "unexpected error message: {err}");
    Ok(())
}

#[test]
#[timeout(30000)]
fn rpc_reports_no_terminal_attached() -> anyhow::Result<()> {
    let proc = daemon::Proc::new().context("starting daemon proc")?;
    let mut conn = Conn::new(proc.connect()?)?;

    // Session creation/attachment are library-only (not reachable over
    // this wire protocol), and auto-attach-on-create is explicitly out
    // of scope, so a fresh daemon's initial session is never attached
    // and every other method reports the fixed precondition error.
    let err = conn.call_expect_error("getContent", json!({}))?;
    assert_eq!(err, "No terminal attached. Enable MCP on a terminal tab first.");
    Ok(())
}

#[test]
#[timeout(30000)]
fn cleanup_socket_on_sigint() -> anyhow::Result<()> {
    let proc = daemon::Proc::new().context("starting daemon proc")?;
    let socket_path = proc.socket_path.clone();
    assert!(socket_path.exists());

    signal::kill(Pid::from_raw(proc.proc.id() as i32), Signal::SIGINT)?;
    support::wait_until(|| Ok(!path::Path::new(&socket_path).exists()))?;
    Ok(())
}

#[test]
#[timeout(30000)]
fn systemd_activation_socket() -> anyhow::Result<()> {
    let tmp_dir =
        tempfile::Builder::new().prefix("ptyhubd-test").rand_bytes(20).tempdir().context("tmp dir")?;
    let sock_path = tmp_dir.path().join("terminal-mcp.socket");
    let activation_sock = UnixListener::bind(&sock_path)?;

    let (parent_stderr, child_stderr) = nix::unistd::pipe().context("creating pipe")?;
    // Safety: test-only duplication of a pipe fd into the child's stderr slot.
    let child_stderr_pipe = unsafe { Stdio::from_raw_fd(child_stderr) };

    let mut cmd = Command::new(ptyhubd_bin()?);
    cmd.stdout(Stdio::piped())
        .stderr(child_stderr_pipe)
        .env("HOME", std::env::var("HOME").unwrap_or_default())
        .env("LISTEN_FDS", "1")
        .env("LISTEN_FDNAMES", &sock_path);

    // Matches the teacher's own fork-based activation test: LISTEN_PID
    // must name the child's own pid, which we can't set via Command's
    // env before exec without forking ourselves.
    let child_pid = match unsafe { nix::unistd::fork() } {
        Ok(ForkResult::Parent { child, .. }) => child,
        Ok(ForkResult::Child) => {
            let fdarg = nix::unistd::dup2(activation_sock.as_raw_fd(), 3).unwrap_or_else(|e| {
                eprintln!("dup err: {e}");
                std::process::exit(1)
            });
            let fdflags = nix::fcntl::fcntl(fdarg, nix::fcntl::FcntlArg::F_GETFD).unwrap();
            let mut newflags = nix::fcntl::FdFlag::from_bits(fdflags).unwrap();
            newflags.remove(nix::fcntl::FdFlag::FD_CLOEXEC);
            nix::fcntl::fcntl(fdarg, nix::fcntl::FcntlArg::F_SETFD(newflags)).unwrap();
            cmd.env("LISTEN_PID", format!("{}", std::process::id()));
            let err = cmd.exec();
            eprintln!("exec err: {err:?}");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("forking daemon proc"),
    };

    std::thread::sleep(time::Duration::from_millis(500));
    signal::kill(child_pid, Signal::SIGKILL).context("killing daemon")?;
    nix::sys::wait::waitpid(child_pid, None).context("reaping daemon")?;

    let mut stderr_buf = [0u8; 1024 * 8];
    let len = nix::unistd::read(parent_stderr, &mut stderr_buf).context("reading stderr")?;
    let stderr = String::from_utf8_lossy(&stderr_buf[..len]);
    assert!(stderr.contains("using systemd activation socket"), "stderr was: {stderr}");
    Ok(())
}
