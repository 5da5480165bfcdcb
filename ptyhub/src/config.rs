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

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

use ptyhub_protocol::RecordingMode;

use super::user;

#[instrument(skip_all)]
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(config_path) = config_file {
        info!("parsing explicitly passed in config ({})", config_path);
        let config_str = fs::read_to_string(config_path).context("reading config toml (1)")?;
        config = toml::from_str(&config_str).context("parsing config file (1)")?;
    } else {
        let path = default_config_path()?;
        if path.exists() {
            let config_str = fs::read_to_string(&path).context("reading config toml (2)")?;
            config = toml::from_str(&config_str).context("parsing config file (2)")?;
        }
    }

    Ok(config)
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let user_info = user::info()?;
    let mut path = PathBuf::from(user_info.home_dir);
    path.push(".config");
    path.push("terminal-mcp");
    path.push("config.toml");
    Ok(path)
}

fn default_cols() -> u16 {
    120
}
fn default_rows() -> u16 {
    40
}
fn default_scrollback() -> usize {
    1000
}
fn default_recording_mode() -> RecordingMode {
    RecordingMode::OnFailure
}
fn default_recordings_cap() -> usize {
    20
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// shell overrides the user's default shell.
    pub shell: Option<String>,

    /// a table of environment variables to inject into new sessions
    pub env: Option<HashMap<String, String>>,

    /// default terminal width for newly created sessions
    #[serde(default = "default_cols")]
    pub cols: u16,

    /// default terminal height for newly created sessions
    #[serde(default = "default_rows")]
    pub rows: u16,

    /// lines of scrollback kept per session
    #[serde(default = "default_scrollback")]
    pub scrollback: usize,

    /// strips inherited LC_* vars and sets only LANG; see the locale
    /// safeguard in pty.rs
    pub native_shell: bool,

    /// forces the locale safeguard to run even if the environment
    /// already looks UTF-8 clean
    pub set_locale_env: bool,

    /// default recording retention mode for new sessions
    #[serde(default = "default_recording_mode")]
    pub recording_mode: RecordingMode,

    pub recording: RecordingLimitsConfig,

    /// overrides the IPC socket path (default: platform-specific, see
    /// daemon bootstrap)
    pub socket_path: Option<String>,

    /// overrides `<XDG_STATE_HOME>/terminal-mcp/recordings`;
    /// `TERMINAL_MCP_RECORD_DIR` takes precedence over this at runtime
    pub recordings_dir: Option<String>,

    #[serde(default = "default_recordings_cap")]
    pub recordings_list_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            shell: None,
            env: None,
            cols: default_cols(),
            rows: default_rows(),
            scrollback: default_scrollback(),
            native_shell: false,
            set_locale_env: false,
            recording_mode: default_recording_mode(),
            recording: RecordingLimitsConfig::default(),
            socket_path: None,
            recordings_dir: None,
            recordings_list_cap: default_recordings_cap(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct RecordingLimitsConfig {
    pub idle_time_limit_s: Option<f64>,
    pub max_duration_s: Option<f64>,
    pub inactivity_timeout_s: Option<f64>,
}

impl Config {
    /// `TERMINAL_MCP_RECORD_DIR` wins over the config value, matching the
    /// env-override-beats-config precedence the teacher applies to its
    /// own env vars (e.g. `SHPOOL_TEST__OVERRIDE_VERSION`).
    pub fn recordings_dir(&self) -> anyhow::Result<PathBuf> {
        if let Ok(dir) = std::env::var("TERMINAL_MCP_RECORD_DIR") {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.recordings_dir {
            return Ok(PathBuf::from(dir));
        }
        let state_home = std::env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let user_info = user::info().expect("resolving home dir for recordings path");
                PathBuf::from(user_info.home_dir).join(".local").join("state")
            });
        Ok(state_home.join("terminal-mcp").join("recordings"))
    }
}
