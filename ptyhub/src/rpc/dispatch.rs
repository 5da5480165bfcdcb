// Request dispatch for the JSON-line RPC surface: the 5 fixed methods,
// attachment preconditions, and per-call observability. Grounded in the
// teacher's `Server::handle_conn` dispatch-by-header-variant shape
// (`daemon/server.rs`), generalized from a `ConnectHeader` enum match to
// a `Method` enum match over a persistent connection.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;
use tracing::instrument;

use ptyhub_protocol::{
    Capabilities, ClientInfo, InitializeParams, InitializeResult, McpMessage, Method, RpcRequest,
    RpcResponse, ScreenshotResult, SendKeyParams, ServerInfo, SessionId, ToolsCapability, TypeParams,
    PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION,
};

use crate::attachment::AttachmentState;
use crate::error::CoreError;
use crate::event_bus::EventBus;
use crate::logger::{now_ms, AuditRecord, SessionLogger};
use crate::manager::SessionManager;
use crate::rpc::keys;

static NEXT_PROVISIONAL_ID: AtomicU64 = AtomicU64::new(1);

pub struct DaemonContext {
    pub sessions: Arc<SessionManager>,
    pub attachment: Arc<AttachmentState>,
    pub bus: EventBus,
    pub logger: Arc<SessionLogger>,
}

pub struct RpcClient {
    client_id: Mutex<String>,
    client_info: Mutex<Option<ClientInfo>>,
}

impl RpcClient {
    pub fn new() -> RpcClient {
        let provisional = format!("anon-{}", NEXT_PROVISIONAL_ID.fetch_add(1, Ordering::AcqRel));
        RpcClient { client_id: Mutex::new(provisional), client_info: Mutex::new(None) }
    }

    pub fn client_id(&self) -> String {
        self.client_id.lock().unwrap().clone()
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[instrument(skip(ctx, client, req), fields(method = %req.method))]
pub fn dispatch(ctx: &DaemonContext, client: &RpcClient, req: RpcRequest) -> RpcResponse {
    let Some(method) = Method::parse(&req.method) else {
        return RpcResponse::err(req.id, format!("unknown method: {}", req.method));
    };

    if method == Method::Initialize {
        return handle_initialize(ctx, client, req);
    }

    let client_id = client.client_id();
    let tool = method.as_str().to_string();
    let started_at = Instant::now();
    ctx.bus.publish_mcp(McpMessage::ToolCallStarted {
        id: req.id,
        tool: tool.clone(),
        args: req.params.clone(),
        client_id: client_id.clone(),
        ts: now_ms(),
    });

    let result = handle_attached_method(ctx, method, &req);

    let duration_ms = started_at.elapsed().as_millis() as u64;
    let success = result.is_ok();
    let error_msg = result.as_ref().err().map(|e| e.to_string());
    ctx.bus.publish_mcp(McpMessage::ToolCallCompleted {
        id: req.id,
        tool: tool.clone(),
        success,
        duration_ms,
        client_id: client_id.clone(),
        ts: now_ms(),
        error: error_msg.clone(),
    });
    ctx.logger.log(&AuditRecord::ToolCall { client_id, timestamp_ms: now_ms(), tool, success });

    match result {
        Ok(value) => RpcResponse::ok(req.id, value),
        Err(e) => RpcResponse::err(req.id, e.to_string()),
    }
}

fn handle_initialize(ctx: &DaemonContext, client: &RpcClient, req: RpcRequest) -> RpcResponse {
    let params: InitializeParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(_) => InitializeParams::default(),
    };

    if let Some(info) = &params.client_info {
        let deterministic = deterministic_client_id(&info.name, &info.version);
        *client.client_id.lock().unwrap() = deterministic.clone();
        *client.client_info.lock().unwrap() = Some(info.clone());
        ctx.bus.publish_mcp(McpMessage::ClientConnected { client_id: deterministic });
    }

    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: Capabilities { tools: ToolsCapability {} },
        server_info: ServerInfo { name: SERVER_NAME.to_string(), version: SERVER_VERSION.to_string() },
    };
    RpcResponse::ok(req.id, serde_json::to_value(result).unwrap_or(json!(null)))
}

fn handle_attached_method(
    ctx: &DaemonContext,
    method: Method,
    req: &RpcRequest,
) -> Result<serde_json::Value, CoreError> {
    let Some(session_id) = ctx.attachment.attached_session() else {
        return Err(CoreError::NotAttached);
    };
    let session = ctx.sessions.get(session_id).map_err(|_| attached_session_not_found(session_id))?;

    match method {
        Method::Initialize => unreachable!("handled separately"),
        Method::Type => {
            let params: TypeParams =
                serde_json::from_value(req.params.clone()).map_err(|e| CoreError::ParseError(e.to_string()))?;
            session.write(params.text.as_bytes())?;
            Ok(json!(null))
        }
        Method::SendKey => {
            let params: SendKeyParams =
                serde_json::from_value(req.params.clone()).map_err(|e| CoreError::ParseError(e.to_string()))?;
            let bytes = keys::key_to_bytes(&params.key)?;
            session.write(&bytes)?;
            Ok(json!(null))
        }
        Method::GetContent => Ok(json!(session.get_content())),
        Method::TakeScreenshot => {
            let shot = session.take_screenshot()?;
            let result = ScreenshotResult { content: shot.content, cursor: shot.cursor, dimensions: shot.dimensions };
            serde_json::to_value(result).map_err(|e| CoreError::ParseError(e.to_string()))
        }
    }
}

fn attached_session_not_found(id: SessionId) -> CoreError {
    // distinct message from the generic NotFound, per spec §4.8
    CoreError::AttachedSessionNotFound(id)
}

fn deterministic_client_id(name: &str, version: &str) -> String {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    version.hash(&mut hasher);
    format!("{name}-{:x}", hasher.finish())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deterministic_id_is_stable_for_same_name_and_version() {
        let a = deterministic_client_id("vscode-ext", "1.2.3");
        let b = deterministic_client_id("vscode-ext", "1.2.3");
        let c = deterministic_client_id("vscode-ext", "1.2.4");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let bus = EventBus::new();
        let ctx = DaemonContext {
            sessions: SessionManager::new(bus.clone()),
            attachment: Arc::new(AttachmentState::new(bus.clone())),
            bus,
            logger: Arc::new(
                SessionLogger::open(&std::env::temp_dir().join("ptyhub-dispatch-test.jsonl")).unwrap(),
            ),
        };
        let client = RpcClient::new();
        let resp = dispatch(
            &ctx,
            &client,
            RpcRequest { id: 1, method: "bogus".to_string(), params: json!(null) },
        );
        assert!(resp.error.is_some());
    }

    #[test]
    fn unattached_method_reports_no_terminal_attached() {
        let bus = EventBus::new();
        let ctx = DaemonContext {
            sessions: SessionManager::new(bus.clone()),
            attachment: Arc::new(AttachmentState::new(bus.clone())),
            bus,
            logger: Arc::new(
                SessionLogger::open(&std::env::temp_dir().join("ptyhub-dispatch-test2.jsonl")).unwrap(),
            ),
        };
        let client = RpcClient::new();
        let resp = dispatch(
            &ctx,
            &client,
            RpcRequest { id: 2, method: "getContent".to_string(), params: json!(null) },
        );
        let err = resp.error.unwrap();
        assert!(err.message.contains("No terminal attached"));
    }
}
