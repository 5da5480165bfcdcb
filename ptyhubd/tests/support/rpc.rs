use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use serde_json::{json, Value};

/// A thin newline-delimited-JSON client: sends `RpcRequest` lines and
/// filters the inbound stream (which also carries unsolicited GUI/MCP
/// broadcast lines) down to the response matching a given request id.
pub struct Conn {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    next_id: i64,
}

impl Conn {
    pub fn new(stream: UnixStream) -> anyhow::Result<Conn> {
        let writer = stream.try_clone().context("cloning rpc stream")?;
        Ok(Conn { reader: BufReader::new(stream), writer, next_id: 1 })
    }

    /// Sends `method`/`params` and waits (up to 5s) for the response
    /// line carrying the matching id, skipping any broadcast frames
    /// (ToolCallStarted/Completed, GuiMessage, AttachmentChanged, ...)
    /// that arrive interleaved on the same connection.
    pub fn call(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let req = json!({"id": id, "method": method, "params": params});
        writeln!(self.writer, "{}", serde_json::to_string(&req)?)?;
        self.writer.flush()?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(anyhow!("rpc connection closed while waiting for response {id}"));
            }
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)?;
            if value.get("id").and_then(|v| v.as_i64()) == Some(id) {
                if let Some(err) = value.get("error") {
                    return Err(anyhow!("rpc error: {err}"));
                }
                return Ok(value.get("result").cloned().unwrap_or(Value::Null));
            }
        }
        Err(anyhow!("timed out waiting for response to {method} (id {id})"))
    }

    /// Like `call`, but returns the raw error message instead of
    /// treating it as a Rust error, for asserting on exact wording.
    pub fn call_expect_error(&mut self, method: &str, params: Value) -> anyhow::Result<String> {
        match self.call(method, params) {
            Ok(v) => Err(anyhow!("expected an rpc error, got a result: {v}")),
            Err(e) => Ok(e.to_string().trim_start_matches("rpc error: ").to_string()),
        }
    }

    /// Blocks until a broadcast frame matching `pred` arrives, ignoring
    /// RpcResponse lines along the way.
    pub fn wait_for_message<P>(&mut self, timeout: Duration, mut pred: P) -> anyhow::Result<Value>
    where
        P: FnMut(&Value) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(anyhow!("rpc connection closed while waiting for a broadcast message"));
            }
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)?;
            if pred(&value) {
                return Ok(value);
            }
        }
        Err(anyhow!("timed out waiting for a matching broadcast message"))
    }
}
