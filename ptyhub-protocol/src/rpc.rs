use std::fmt;

use serde_derive::{Deserialize as De, Serialize as Se};

/// Opaque, locally-unique, never-reused session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Se, De)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound JSON-line RPC request: `{"id":N,"method":"M","params":{...}}`.
#[derive(Debug, Clone, Se, De)]
pub struct RpcRequest {
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One outbound JSON-line RPC response.
#[derive(Debug, Clone, Se, De)]
pub struct RpcResponse {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: i64, result: serde_json::Value) -> Self {
        RpcResponse { id, result: Some(result), error: None }
    }

    pub fn err(id: i64, message: impl Into<String>) -> Self {
        RpcResponse { id, result: None, error: Some(RpcError { message: message.into() }) }
    }

    /// `id` is reserved for frames the server could not even parse enough
    /// to learn the caller's id.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::err(0, message)
    }
}

#[derive(Debug, Clone, Se, De)]
pub struct RpcError {
    pub message: String,
}

#[derive(Debug, Clone, Default, Se, De)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Se, De)]
pub struct RuntimeInfo {
    #[serde(default)]
    pub host_app: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

/// `initialize` params. Parsed leniently: unknown fields are ignored, and
/// every field is optional so a minimal client can still connect.
#[derive(Debug, Clone, Default, Se, De)]
pub struct InitializeParams {
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
    #[serde(default)]
    pub runtime: Option<RuntimeInfo>,
    #[serde(default)]
    pub capabilities: Option<serde_json::Value>,
    #[serde(default)]
    pub session: Option<serde_json::Value>,
    #[serde(default)]
    pub observability: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Se, De)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Se, De)]
pub struct ToolsCapability {}

#[derive(Debug, Clone, Se, De)]
pub struct Capabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Clone, Se, De)]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Se, De)]
pub struct TypeParams {
    pub text: String,
}

#[derive(Debug, Clone, Se, De)]
pub struct SendKeyParams {
    pub key: String,
}

#[derive(Debug, Clone, Se, De)]
pub struct ScreenshotResult {
    pub content: String,
    pub cursor: CursorPosition,
    pub dimensions: Dimensions,
}

#[derive(Debug, Clone, Copy, Se, De)]
pub struct CursorPosition {
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, Copy, Se, De)]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

/// The five fixed RPC methods. Anything else is `UnknownMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Type,
    SendKey,
    GetContent,
    TakeScreenshot,
}

impl Method {
    pub fn parse(name: &str) -> Option<Method> {
        match name {
            "initialize" => Some(Method::Initialize),
            "type" => Some(Method::Type),
            "sendKey" => Some(Method::SendKey),
            "getContent" => Some(Method::GetContent),
            "takeScreenshot" => Some(Method::TakeScreenshot),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Initialize => "initialize",
            Method::Type => "type",
            Method::SendKey => "sendKey",
            Method::GetContent => "getContent",
            Method::TakeScreenshot => "takeScreenshot",
        }
    }
}
