//! The JSON-line RPC/GUI-event surface: named-key lookup, request
//! dispatch, and the unix-socket transport that carries both.

pub mod dispatch;
pub mod keys;
pub mod server;

pub use dispatch::{DaemonContext, RpcClient};
pub use server::RpcServer;
