use serde_derive::{Deserialize as De, Serialize as Se};

use crate::rpc::SessionId;

/// Events a `Session` emits to its subscribers, in PTY-production order.
/// This is the in-process type; `GuiMessage` is its wire projection.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Output { bytes: Vec<u8> },
    Resize { cols: u16, rows: u16 },
    Exit { code: Option<i32> },
    TitleChanged { title: Option<String> },
    ProcessChanged { name: String },
}

impl SessionEvent {
    /// Control events are never dropped by the event bus backpressure
    /// policy; only `Output` may be coalesced or dropped.
    pub fn is_control(&self) -> bool {
        !matches!(self, SessionEvent::Output { .. })
    }
}

/// Egress messages sent to GUI observers: a `type` discriminator plus a
/// `sessionId`, per the wire format in the spec's external-interfaces
/// section.
#[derive(Debug, Clone, Se, De)]
#[serde(tag = "type")]
pub enum GuiMessage {
    #[serde(rename = "output")]
    /// `data` is base64-encoded raw PTY bytes, not text: the bytes are
    /// not guaranteed to be valid UTF-8 (binary escape sequences,
    /// multi-byte characters split across a read chunk).
    Output { #[serde(rename = "sessionId")] session_id: SessionId, data: String },
    #[serde(rename = "resize")]
    Resize { #[serde(rename = "sessionId")] session_id: SessionId, cols: u16, rows: u16 },
    #[serde(rename = "session-closed")]
    SessionClosed {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },
    #[serde(rename = "title-changed")]
    TitleChanged { #[serde(rename = "sessionId")] session_id: SessionId, title: Option<String> },
    #[serde(rename = "process-changed")]
    ProcessChanged { #[serde(rename = "sessionId")] session_id: SessionId, process: String },
}

/// MCP-prefixed broadcasts: server/attachment/client lifecycle, not tied to
/// one session.
#[derive(Debug, Clone, Se, De)]
#[serde(tag = "type")]
pub enum McpMessage {
    #[serde(rename = "mcp:statusChanged")]
    StatusChanged { attached: bool },
    #[serde(rename = "mcp:attachmentChanged")]
    AttachmentChanged {
        #[serde(rename = "attachedSessionId")]
        attached_session_id: Option<SessionId>,
        #[serde(rename = "previousSessionId")]
        previous_session_id: Option<SessionId>,
    },
    #[serde(rename = "mcp:clientConnected")]
    ClientConnected { #[serde(rename = "clientId")] client_id: String },
    #[serde(rename = "mcp:clientDisconnected")]
    ClientDisconnected { #[serde(rename = "clientId")] client_id: String },
    #[serde(rename = "mcp:toolCallStarted")]
    ToolCallStarted {
        id: i64,
        tool: String,
        args: serde_json::Value,
        #[serde(rename = "clientId")]
        client_id: String,
        ts: u64,
    },
    #[serde(rename = "mcp:toolCallCompleted")]
    ToolCallCompleted {
        id: i64,
        tool: String,
        success: bool,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(rename = "clientId")]
        client_id: String,
        ts: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}
