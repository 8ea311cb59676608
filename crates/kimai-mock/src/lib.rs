//! In-process stand-in for a Kimai `/core/json.php` endpoint, shared by the
//! integration and unit tests of the other workspace crates.
//!
//! `getActiveRecording` answers from the current [`Reply`]; `startRecord`
//! switches it to running and `stopRecord` back to idle, like a real server.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

/// What `getActiveRecording` answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Idle,
    Running(Value),
    Status(u16),
    Body(Value),
}

struct Inner {
    reply: Reply,
    mutation_status: Option<u16>,
    calls: Vec<(String, Value)>,
}

#[derive(Clone)]
pub struct MockKimai {
    pub url: String,
    inner: Arc<Mutex<Inner>>,
}

impl MockKimai {
    pub async fn start(reply: Reply) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            reply,
            mutation_status: None,
            calls: Vec::new(),
        }));
        let app = Router::new()
            .route("/core/json.php", post(rpc))
            .with_state(inner.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{}", addr),
            inner,
        }
    }

    /// Make `startRecord` / `stopRecord` answer with `status` and no effect.
    pub fn fail_mutations(&self, status: u16) {
        self.inner.lock().unwrap().mutation_status = Some(status);
    }

    /// Methods received so far, in order.
    pub fn methods(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    /// Raw request bodies received so far, in order.
    pub fn requests(&self) -> Vec<Value> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }
}

async fn rpc(State(inner): State<Arc<Mutex<Inner>>>, Json(body): Json<Value>) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    let mut guard = inner.lock().unwrap();
    guard.calls.push((method.clone(), body));

    match method.as_str() {
        "startRecord" | "stopRecord" => {
            if let Some(code) = guard.mutation_status {
                return StatusCode::from_u16(code).unwrap().into_response();
            }
            guard.reply = if method == "startRecord" {
                Reply::Running(json!({
                    "customerName": "Started",
                    "projectName": "Project",
                    "activityName": "Activity",
                    "start": 0,
                    "servertime": 1
                }))
            } else {
                Reply::Idle
            };
            Json(json!({"jsonrpc": "2.0", "id": "1", "result": {"success": true}})).into_response()
        }
        _ => match guard.reply.clone() {
            Reply::Idle => Json(json!({
                "jsonrpc": "2.0", "id": "1",
                "result": {"error": {"msg": "No active recording."}}
            }))
            .into_response(),
            Reply::Running(item) => Json(json!({
                "jsonrpc": "2.0", "id": "1",
                "result": {"success": true, "items": [item]}
            }))
            .into_response(),
            Reply::Status(code) => StatusCode::from_u16(code).unwrap().into_response(),
            Reply::Body(body) => Json(body).into_response(),
        },
    }
}
