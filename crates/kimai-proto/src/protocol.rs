use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::Settings;

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Host-assigned identifier of one key instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ButtonContext(String);

impl ButtonContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ButtonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ButtonContext {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPayload {
    #[serde(default)]
    pub settings: Option<Settings>,
}

/// Events delivered by the host, tagged by `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    WillAppear {
        context: ButtonContext,
        #[serde(default)]
        payload: SettingsPayload,
    },
    WillDisappear {
        context: ButtonContext,
    },
    KeyDown {
        context: ButtonContext,
    },
    KeyUp {
        context: ButtonContext,
        #[serde(default)]
        payload: SettingsPayload,
    },
    DidReceiveSettings {
        context: ButtonContext,
        #[serde(default)]
        payload: SettingsPayload,
    },
    /// Free-form message from the property inspector.
    SendToPlugin {
        context: ButtonContext,
        #[serde(default)]
        payload: Value,
    },
    /// Anything the plugin does not subscribe to.
    #[serde(other)]
    Unknown,
}

/// Calls the plugin makes on the host. None of them expect a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostCommand {
    /// First frame on a fresh connection.
    Register {
        #[serde(rename = "registerEvent")]
        register_event: String,
        uuid: String,
    },
    SetTitle {
        context: ButtonContext,
        title: String,
    },
    SetImage {
        context: ButtonContext,
        image: String,
    },
    ShowAlert {
        context: ButtonContext,
    },
    GetSettings {
        context: ButtonContext,
    },
    SetSettings {
        context: ButtonContext,
        settings: Settings,
    },
}

impl HostCommand {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encode_frame(self)
    }
}

impl HostEvent {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encode_frame(self)
    }

    /// See [`decode_frame`].
    pub fn decode(data: &[u8]) -> anyhow::Result<Option<(anyhow::Result<Self>, usize)>> {
        decode_frame(data)
    }
}

/// Length-prefixed JSON: 4-byte big-endian length, then the document.
pub fn encode_frame<T: Serialize>(msg: &T) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len())?;
    let mut result = Vec::with_capacity(4 + json.len());
    result.extend_from_slice(&len.to_be_bytes());
    result.extend_from_slice(&json);
    Ok(result)
}

/// Decode the first frame in `data`.
///
/// `Ok(None)` means more bytes are needed. `Ok(Some((parsed, consumed)))`
/// always reports how many bytes the frame occupied, even when its JSON did
/// not parse, so the reader can skip a bad frame and keep going. `Err` means
/// the length header itself is implausible and the stream cannot be trusted.
pub fn decode_frame<T: DeserializeOwned>(
    data: &[u8],
) -> anyhow::Result<Option<(anyhow::Result<T>, usize)>> {
    if data.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN);
    }
    if data.len() < 4 + len {
        return Ok(None);
    }
    let parsed = serde_json::from_slice(&data[4..4 + len]).map_err(anyhow::Error::from);
    Ok(Some((parsed, 4 + len)))
}
