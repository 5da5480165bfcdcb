// Unix-domain-socket transport for the dual-audience wire protocol: a
// single connection carries both inbound RPC requests from an
// AI-assistant client and outbound broadcast events for a GUI observer.
// Grounded in the teacher's `Server::serve`/`handle_conn` accept-and-
// spawn-a-thread shape (`daemon/server.rs`), generalized from a
// one-shot attach/detach protocol to a persistent newline-delimited
// JSON duplex.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{error, info, instrument, warn};

use ptyhub_protocol::{GuiMessage, McpMessage, RpcResponse, SessionEvent, SessionId};

use crate::logger::{now_ms, AuditRecord};
use crate::rpc::dispatch::{dispatch, DaemonContext, RpcClient};

const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

pub struct RpcServer {
    ctx: Arc<DaemonContext>,
}

impl RpcServer {
    pub fn new(ctx: Arc<DaemonContext>) -> RpcServer {
        RpcServer { ctx }
    }

    /// Binds `socket_path`, removing a stale socket file left by a prior
    /// run, and accepts connections until the listener errors out.
    #[instrument(skip(self))]
    pub fn serve(self: Arc<Self>, socket_path: &Path) -> anyhow::Result<()> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "rpc server listening");
        self.serve_listener(listener)
    }

    /// Accepts connections on an already-bound listener, e.g. one handed
    /// to us via systemd socket activation.
    #[instrument(skip(self, listener))]
    pub fn serve_listener(self: Arc<Self>, listener: UnixListener) -> anyhow::Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = Arc::clone(&self);
                    thread::spawn(move || {
                        if let Err(e) = server.handle_conn(stream) {
                            error!(error = %e, "rpc connection handler failed");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
        Ok(())
    }

    fn handle_conn(&self, stream: UnixStream) -> anyhow::Result<()> {
        let client = RpcClient::new();
        self.ctx.logger.log(&AuditRecord::Connect { client_id: client.client_id(), timestamp_ms: now_ms() });

        let (out_tx, out_rx) = crossbeam_channel::unbounded::<String>();
        let closed = Arc::new(AtomicBool::new(false));

        let writer_stream = stream.try_clone()?;
        let writer_handle = thread::spawn(move || write_loop(writer_stream, out_rx));

        let mcp_rx = self.ctx.bus.subscribe_mcp();
        let forward_ctx = Arc::clone(&self.ctx);
        let forward_tx = out_tx.clone();
        let forward_closed = Arc::clone(&closed);
        thread::spawn(move || forward_loop(forward_ctx, mcp_rx, forward_tx, forward_closed));

        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, "reading rpc connection");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<ptyhub_protocol::RpcRequest>(&line) {
                Ok(req) => dispatch(&self.ctx, &client, req),
                Err(e) => RpcResponse::parse_error(format!("invalid request: {e}")),
            };
            let Ok(text) = serde_json::to_string(&response) else { continue };
            if out_tx.send(text).is_err() {
                break;
            }
        }

        closed.store(true, Ordering::Release);
        self.ctx.bus.publish_mcp(McpMessage::ClientDisconnected { client_id: client.client_id() });
        self.ctx
            .logger
            .log(&AuditRecord::Disconnect { client_id: client.client_id(), timestamp_ms: now_ms() });
        drop(out_tx);
        let _ = writer_handle.join();
        Ok(())
    }
}

fn write_loop(mut stream: UnixStream, out_rx: crossbeam_channel::Receiver<String>) {
    while let Ok(line) = out_rx.recv() {
        if writeln!(stream, "{line}").is_err() {
            break;
        }
        let _ = stream.flush();
    }
}

/// Forwards process-wide `McpMessage`s and, by periodically polling
/// `SessionManager::list_ids()`, every live session's events to this
/// connection. Polling stands in for a "session created" broadcast the
/// wire protocol doesn't define.
fn forward_loop(
    ctx: Arc<DaemonContext>,
    mcp_rx: crossbeam_channel::Receiver<McpMessage>,
    out_tx: crossbeam_channel::Sender<String>,
    closed: Arc<AtomicBool>,
) {
    let mut known = std::collections::HashSet::new();
    while !closed.load(Ordering::Acquire) {
        match mcp_rx.recv_timeout(SESSION_POLL_INTERVAL) {
            Ok(msg) => {
                if let Ok(text) = serde_json::to_string(&msg) {
                    if out_tx.send(text).is_err() {
                        return;
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }

        for id in ctx.sessions.list_ids() {
            if known.insert(id) {
                let bus = ctx.bus.clone();
                let tx = out_tx.clone();
                let session_closed = Arc::clone(&closed);
                thread::spawn(move || forward_session(bus, id, tx, session_closed));
            }
        }
    }
}

fn forward_session(
    bus: crate::event_bus::EventBus,
    id: SessionId,
    out_tx: crossbeam_channel::Sender<String>,
    closed: Arc<AtomicBool>,
) {
    let Ok(sub) = bus.subscribe(id, SUBSCRIBER_QUEUE_CAPACITY) else { return };
    let sub_id = sub.id();
    while !closed.load(Ordering::Acquire) {
        let Some(delivered) = sub.recv(Some(Duration::from_millis(200))) else {
            // timed out (keep polling the closed flag) or the bus closed
            // this subscriber after the session's terminal Exit.
            if closed.load(Ordering::Acquire) {
                break;
            }
            continue;
        };
        let wire = match delivered.event {
            SessionEvent::Output { bytes } => {
                GuiMessage::Output { session_id: id, data: BASE64.encode(&bytes) }
            }
            SessionEvent::Resize { cols, rows } => GuiMessage::Resize { session_id: id, cols, rows },
            SessionEvent::Exit { code } => GuiMessage::SessionClosed { session_id: id, exit_code: code },
            SessionEvent::TitleChanged { title } => GuiMessage::TitleChanged { session_id: id, title },
            SessionEvent::ProcessChanged { name } => GuiMessage::ProcessChanged { session_id: id, process: name },
        };
        let is_exit = matches!(wire, GuiMessage::SessionClosed { .. });
        let Ok(text) = serde_json::to_string(&wire) else { continue };
        if out_tx.send(text).is_err() {
            break;
        }
        if is_exit {
            break;
        }
    }
    bus.unsubscribe(id, sub_id);
}
