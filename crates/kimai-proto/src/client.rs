//! Kimai JSON-RPC client.
//!
//! Three calls are used, all POSTed to `<endpoint>/core/json.php` with the
//! API key as the only positional parameter: `getActiveRecording`,
//! `startRecord` and `stopRecord`. Each invocation makes exactly one network
//! attempt; retrying is left to the next poll or key press.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TrackerError;
use crate::settings::Settings;
use crate::status::RecordingStatus;

/// Error message Kimai returns from `getActiveRecording` when nothing runs.
pub const NO_ACTIVE_RECORDING: &str = "No active recording.";

const JSONRPC_VERSION: &str = "2.0";
const REQUEST_ID: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    GetActiveRecording,
    StartRecord,
    StopRecord,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::GetActiveRecording => "getActiveRecording",
            RpcMethod::StartRecord => "startRecord",
            RpcMethod::StopRecord => "stopRecord",
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: [&'a str; 1],
    id: &'a str,
    jsonrpc: &'a str,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<RpcResult>,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    items: Vec<ActiveItem>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveItem {
    #[serde(default)]
    customer_name: String,
    #[serde(default)]
    project_name: String,
    #[serde(default)]
    activity_name: String,
    start: Timestamp,
    #[serde(rename = "servertime")]
    server_time: Timestamp,
}

/// Kimai sends unix timestamps either as JSON numbers or numeric strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Number(serde_json::Number),
    Text(String),
}

impl Timestamp {
    fn seconds(&self) -> Option<i64> {
        match self {
            Timestamp::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Timestamp::Text(s) => s.trim().parse::<i64>().ok(),
        }
    }
}

/// Map a `getActiveRecording` response body (HTTP 200) to a status.
pub fn interpret_active_body(body: &[u8]) -> RecordingStatus {
    let response: RpcResponse = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return RecordingStatus::failed(TrackerError::unexpected(format!(
                "undecodable body: {}",
                e
            )))
        }
    };

    let Some(result) = response.result else {
        return RecordingStatus::failed(TrackerError::unexpected("missing `result`"));
    };

    if let Some(msg) = result.error.as_ref().and_then(|e| e.msg.as_deref()) {
        if msg == NO_ACTIVE_RECORDING {
            return RecordingStatus::Idle;
        }
        return RecordingStatus::failed(TrackerError::unexpected(format!(
            "server error: {}",
            msg
        )));
    }

    if result.success != Some(true) {
        return RecordingStatus::failed(TrackerError::unexpected("`success` is not true"));
    }

    let Some(item) = result.items.first() else {
        return RecordingStatus::failed(TrackerError::unexpected("no active items"));
    };

    let (Some(start), Some(server_time)) = (item.start.seconds(), item.server_time.seconds())
    else {
        return RecordingStatus::failed(TrackerError::unexpected(
            "non-numeric `start` or `servertime`",
        ));
    };

    RecordingStatus::Running {
        customer_name: item.customer_name.clone(),
        project_name: item.project_name.clone(),
        activity_name: item.activity_name.clone(),
        // clock skew can put start after servertime
        elapsed_seconds: server_time.saturating_sub(start).max(0) as u64,
    }
}

/// Client for the three Kimai RPC methods. Cheap to clone; clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct KimaiClient {
    http: reqwest::Client,
}

impl KimaiClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("kimai-deck/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    pub async fn query_active(&self, settings: &Settings) -> RecordingStatus {
        match self.call(settings, RpcMethod::GetActiveRecording).await {
            Ok(response) => match response.bytes().await {
                Ok(body) => interpret_active_body(&body),
                Err(e) => RecordingStatus::failed(TrackerError::transport(e)),
            },
            Err(reason) => RecordingStatus::failed(reason),
        }
    }

    /// Ask the server to start recording. Only the HTTP status is checked;
    /// callers re-query to learn the new state.
    pub async fn start_recording(&self, settings: &Settings) -> Result<(), TrackerError> {
        self.call(settings, RpcMethod::StartRecord).await.map(|_| ())
    }

    /// Ask the server to stop recording. Same acknowledgement rules as
    /// [`KimaiClient::start_recording`].
    pub async fn stop_recording(&self, settings: &Settings) -> Result<(), TrackerError> {
        self.call(settings, RpcMethod::StopRecord).await.map(|_| ())
    }

    async fn call(
        &self,
        settings: &Settings,
        method: RpcMethod,
    ) -> Result<reqwest::Response, TrackerError> {
        let credentials = settings.credentials()?;
        let url = credentials.rpc_url();
        let request = RpcRequest {
            method: method.as_str(),
            params: [credentials.api_key],
            id: REQUEST_ID,
            jsonrpc: JSONRPC_VERSION,
        };

        debug!("rpc {} -> {}", method.as_str(), url);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("rpc {} failed: {}", method.as_str(), e);
                TrackerError::transport(e)
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!("rpc {} returned status {}", method.as_str(), status);
            return Err(TrackerError::transport(format!("HTTP status {}", status)));
        }

        Ok(response)
    }
}
