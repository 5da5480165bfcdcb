// Copyright 2024 Google LLC
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

//! Wire types shared by the ptyhub daemon, its GUI event stream and its
//! JSON-line RPC clients. Every type here round-trips through serde_json;
//! none of it is msgpack or length-prefixed like the daemon's predecessor.

mod asciicast;
mod event;
mod rpc;

pub use asciicast::*;
pub use event::*;
pub use rpc::*;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "terminal-mcp-gui";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
