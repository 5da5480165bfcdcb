use serde::ser::SerializeTuple;
use serde::Serializer;
use serde_derive::{Deserialize as De, Serialize as Se};

/// Line 1 of an asciicast v2 file.
#[derive(Debug, Clone, Se, De)]
pub struct AsciicastHeader {
    pub version: u8,
    pub width: u16,
    pub height: u16,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<AsciicastEnv>,
}

#[derive(Debug, Clone, Default, Se, De)]
pub struct AsciicastEnv {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Output,
    Resize,
}

impl FrameKind {
    pub fn as_char(self) -> char {
        match self {
            FrameKind::Output => 'o',
            FrameKind::Resize => 'r',
        }
    }
}

/// A `[t, kind, data]` event line. Serialized/deserialized as a JSON tuple,
/// not a struct, to match the asciicast v2 wire format exactly.
#[derive(Debug, Clone)]
pub struct AsciicastFrame {
    pub t: f64,
    pub kind: FrameKind,
    pub data: String,
}

impl serde::Serialize for AsciicastFrame {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tup = serializer.serialize_tuple(3)?;
        tup.serialize_element(&self.t)?;
        tup.serialize_element(&self.kind.as_char().to_string())?;
        tup.serialize_element(&self.data)?;
        tup.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Se, De)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    Always,
    OnFailure,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Se, De)]
pub enum StopReason {
    Explicit,
    Inactivity,
    MaxDuration,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Explicit => "Explicit",
            StopReason::Inactivity => "Inactivity",
            StopReason::MaxDuration => "MaxDuration",
        }
    }
}

/// The `<recording>.meta.json` sidecar.
#[derive(Debug, Clone, Se, De)]
pub struct RecordingMetadata {
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub bytes_written: u64,
    pub stop_reason: String,
}
