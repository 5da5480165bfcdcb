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

//! `ptyhub` is the core library behind the headless, multiplexed
//! terminal daemon: it owns PTY child processes, keeps an in-memory VT
//! emulator per PTY, and exposes each terminal to GUI event-stream
//! observers and to an attached JSON-line RPC client.

use std::fs;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::fmt::format::FmtSpan;

pub mod attachment;
pub mod config;
pub mod daemon;
pub mod emulator;
pub mod error;
pub mod event_bus;
pub mod locale;
pub mod logger;
pub mod manager;
pub mod osc;
pub mod pty;
pub mod recorder;
pub mod rpc;
pub mod session;
pub mod user;

pub use daemon::run;

/// Sets up `tracing-subscriber` the same way the teacher's daemon does:
/// span-new/close events, thread ids, no ansi-colored target noise. A
/// file sink is used if `log_file` is given, otherwise everything goes
/// to stderr. Returns a `reload::Handle` so the RPC surface could later
/// expose dynamic log-level control, matching the teacher's own
/// `log_level_handle` plumbed through `Server`.
pub fn init_tracing(
    log_file: Option<String>,
    verbose: u8,
) -> anyhow::Result<
    tracing_subscriber::reload::Handle<tracing_subscriber::filter::LevelFilter, tracing_subscriber::registry::Registry>,
> {
    let trace_level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let (filter, handle) =
        tracing_subscriber::reload::Layer::new(tracing_subscriber::filter::LevelFilter::from_level(trace_level));

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_target(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    if let Some(log_file) = log_file {
        let file = fs::File::create(log_file)?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.with_writer(Mutex::new(file)))
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt_layer.with_writer(io::stderr)).init();
    }

    Ok(handle)
}
