// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{env, os::unix::net::UnixListener, path::PathBuf, sync::Arc};

use anyhow::Context;
use tracing::{info, instrument};

use crate::attachment::AttachmentState;
use crate::config::Config;
use crate::event_bus::EventBus;
use crate::logger::SessionLogger;
use crate::manager::SessionManager;
use crate::recorder::RecordingManager;
use crate::rpc::{DaemonContext, RpcServer};
use crate::session::SessionOptions;

mod signals;
mod systemd;

/// If set to "true", the daemon re-execs itself via `daemonize` and
/// backgrounds the process. Removed from the environment immediately so
/// the re-exec doesn't loop.
pub const AUTODAEMONIZE_VAR: &str = "TERMINAL_MCP__INTERNAL__AUTODAEMONIZE";

/// Boots the full daemon: config, the session/attachment/event-bus
/// stack, the audit log, stale-recording cleanup, and the RPC/GUI
/// socket listener. Installs a signal handler that removes the socket
/// file before exiting.
#[instrument(skip_all)]
pub fn run(config: Config, socket_path: PathBuf, audit_log_path: PathBuf) -> anyhow::Result<()> {
    if let Ok(daemonize) = env::var(AUTODAEMONIZE_VAR) {
        if daemonize == "true" {
            env::remove_var(AUTODAEMONIZE_VAR); // avoid looping

            let pid_file = socket_path.with_file_name("terminal-mcpd.pid");
            info!(?pid_file, "daemonizing");
            daemonize::Daemonize::new().pid_file(pid_file).start().context("daemonizing")?;
        }
    }

    info!("\n\n======================== STARTING DAEMON ============================\n\n");

    let recording_manager = Arc::new(RecordingManager::from_config(&config).context("setting up recording manager")?);
    let removed = recording_manager.cleanup_stale();
    if removed > 0 {
        info!(removed, "cleaned up recordings left over from a prior crash");
    }

    let bus = EventBus::new();
    let sessions = SessionManager::new(bus.clone());
    let attachment = Arc::new(AttachmentState::new(bus.clone()));
    sessions.set_attachment(Arc::clone(&attachment));
    sessions.set_recording(Arc::clone(&recording_manager), config.recording_mode);
    let logger = Arc::new(SessionLogger::open(&audit_log_path)?);

    // Starts with one default terminal so the daemon is immediately
    // useful before any embedding GUI has called `create_session`
    // itself; session creation stays a library-only call (§9), so this
    // is the daemon acting as its own first caller. Its recording
    // mode/manager come from `SessionManager::set_recording` above, same
    // as every later session.
    let mut initial_opts = SessionOptions { cols: config.cols, rows: config.rows, scrollback: config.scrollback, ..SessionOptions::default() };
    initial_opts.shell = config.shell.clone();
    initial_opts.native_shell = config.native_shell;
    initial_opts.set_locale_env = config.set_locale_env;
    if let Some(env) = &config.env {
        initial_opts.env = env.clone();
    }
    match sessions.create_session(initial_opts) {
        Ok(session) => info!(id = session.id().0, "created initial session"),
        Err(e) => info!(error = %e, "failed to create initial session, starting with none"),
    }

    let ctx = Arc::new(DaemonContext { sessions, attachment, bus, logger });
    let rpc_server = Arc::new(RpcServer::new(ctx));

    let (cleanup_socket, listener) = match systemd::activation_socket() {
        Ok(l) => {
            info!("using systemd activation socket");
            (None, l)
        }
        Err(e) => {
            info!("no systemd activation socket: {:?}", e);
            if let Some(parent) = socket_path.parent() {
                std::fs::create_dir_all(parent).context("creating socket parent dir")?;
            }
            if socket_path.exists() {
                std::fs::remove_file(&socket_path).context("removing stale socket")?;
            }
            (Some(socket_path.clone()), UnixListener::bind(&socket_path).context("binding to socket")?)
        }
    };

    // spawn the signal handler thread in the background
    signals::Handler::new(cleanup_socket.clone()).spawn()?;

    rpc_server.serve_listener(listener)?;

    if let Some(sock) = cleanup_socket {
        std::fs::remove_file(sock).context("cleaning up socket on exit")?;
    } else {
        info!("systemd manages the socket, so not cleaning it up");
    }

    Ok(())
}
