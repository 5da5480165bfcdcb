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
//! `ptyhubd` is the headless daemon binary: a multiplexed terminal
//! back-end exposing each PTY to a GUI event stream and an attached
//! JSON-line RPC client. No CLI argument parsing — socket and config
//! paths come from the environment or their conventional defaults.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use ptyhub::config::{self, Config};
use ptyhub::user;

fn main() -> anyhow::Result<()> {
    // Mirrors the teacher's own re-exec guards: refuse to start if we're
    // already running inside one of our own spawned shells.
    if env::var("TERMINAL_MCP").as_deref() == Ok("1") {
        anyhow::bail!(
            "TERMINAL_MCP=1 is already set in this environment; refusing to start a daemon \
             from inside one of its own terminal sessions"
        );
    }

    let log_file = env::var("TERMINAL_MCP_LOG_FILE").ok();
    let _log_level_handle = ptyhub::init_tracing(log_file, verbosity())?;

    let config_path = env::var("TERMINAL_MCP_CONFIG").ok();
    let config = config::read_config(&config_path).context("reading daemon config")?;

    let socket_path = resolve_socket_path(&config)?;
    let audit_log_path = resolve_audit_log_path(&config)?;

    ptyhub::run(config, socket_path, audit_log_path)
}

fn verbosity() -> u8 {
    match env::var("TERMINAL_MCP_VERBOSE").ok().as_deref() {
        Some("1") => 1,
        Some("2") => 2,
        _ => 0,
    }
}

/// `$XDG_RUNTIME_DIR/terminal-mcp/terminal-mcp.socket`, falling back to
/// `~/.terminal-mcp/terminal-mcp.socket` if unset, unless the config
/// file overrides the path outright.
fn resolve_socket_path(config: &Config) -> anyhow::Result<PathBuf> {
    if let Some(path) = &config.socket_path {
        return Ok(PathBuf::from(path));
    }
    let base = match env::var("XDG_RUNTIME_DIR") {
        Ok(dir) => PathBuf::from(dir).join("terminal-mcp"),
        Err(_) => {
            let info = user::info().context("resolving home dir for default socket path")?;
            PathBuf::from(info.home_dir).join(".terminal-mcp")
        }
    };
    Ok(base.join("terminal-mcp.socket"))
}

/// Sibling of the recordings directory: `<state-dir>/terminal-mcp/audit.jsonl`.
fn resolve_audit_log_path(config: &Config) -> anyhow::Result<PathBuf> {
    let recordings_dir = config.recordings_dir()?;
    let state_dir = recordings_dir.parent().map(|p| p.to_path_buf()).unwrap_or(recordings_dir);
    Ok(state_dir.join("audit.jsonl"))
}
