//! Scripted mock of the download service, served by axum on an ephemeral
//! port, plus helpers shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use jobwatch::{ArtifactRetriever, Notification, NotificationFacade};
use jobwatch_proto::config::Config;
use jobwatch_proto::protocol::ResultFile;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// SSE script: `(delay_ms, message)` pairs, sent in order.  The stream stays
/// open once the script is exhausted.
pub type Script = Vec<(u64, Value)>;

#[derive(Default)]
pub struct MockState {
    /// Poll replies per job; the last one repeats.
    polls: Mutex<HashMap<String, VecDeque<Value>>>,
    pushes: Mutex<HashMap<String, Script>>,
    /// `None` answers the global stream with 503.
    global: Mutex<Option<Script>>,
    submit_reply: Mutex<Option<(StatusCode, Value)>>,
    cancel_reply: Mutex<Option<Value>>,
    pub poll_hits: Mutex<HashMap<String, usize>>,
    pub submitted: Mutex<Vec<Value>>,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            global: Mutex::new(Some(Vec::new())),
            ..Self::default()
        }
    }

    pub fn poll(self, job_id: &str, replies: Vec<Value>) -> Self {
        self.polls
            .lock()
            .unwrap()
            .insert(job_id.to_string(), replies.into());
        self
    }

    pub fn push(self, job_id: &str, script: Script) -> Self {
        self.pushes
            .lock()
            .unwrap()
            .insert(job_id.to_string(), script);
        self
    }

    pub fn global(self, script: Option<Script>) -> Self {
        *self.global.lock().unwrap() = script;
        self
    }

    pub fn submit_reply(self, status: StatusCode, body: Value) -> Self {
        *self.submit_reply.lock().unwrap() = Some((status, body));
        self
    }

    pub fn cancel_reply(self, body: Value) -> Self {
        *self.cancel_reply.lock().unwrap() = Some(body);
        self
    }

    pub fn hits(&self, job_id: &str) -> usize {
        self.poll_hits
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }
}

pub struct MockBackend {
    pub base_url: String,
    pub state: Arc<MockState>,
}

pub async fn spawn_backend(state: MockState) -> MockBackend {
    let state = Arc::new(state);
    let app = Router::new()
        .route("/api/jobs", post(submit))
        .route("/api/jobs/:id", get(poll))
        .route("/api/jobs/:id/events", get(job_events))
        .route("/api/status", get(status))
        .route("/api/cancel-downloads", post(cancel))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MockBackend {
        base_url: format!("http://{addr}"),
        state,
    }
}

async fn poll(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Response {
    *state.poll_hits.lock().unwrap().entry(id.clone()).or_default() += 1;
    let mut polls = state.polls.lock().unwrap();
    let Some(replies) = polls.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let reply = if replies.len() > 1 {
        replies.pop_front()
    } else {
        replies.front().cloned()
    };
    match reply {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn job_events(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Response {
    let script = state.pushes.lock().unwrap().get(&id).cloned();
    match script {
        Some(script) => Sse::new(sse(script)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn status(State(state): State<Arc<MockState>>) -> Response {
    let script = state.global.lock().unwrap().clone();
    match script {
        Some(script) => Sse::new(sse(script)).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn submit(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.submitted.lock().unwrap().push(body);
    let reply = state.submit_reply.lock().unwrap().clone();
    let (status, body) = reply.unwrap_or((StatusCode::OK, json!({ "id": "job-new" })));
    (status, Json(body)).into_response()
}

async fn cancel(State(state): State<Arc<MockState>>) -> Response {
    let reply = state.cancel_reply.lock().unwrap().clone();
    Json(reply.unwrap_or(json!({ "success": true }))).into_response()
}

fn sse(script: Script) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::iter(script)
        .then(|(delay, message)| async move {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Ok(Event::default().data(message.to_string()))
        })
        .chain(stream::pending())
}

/// Short intervals so a whole lifecycle fits in well under a second.
pub fn test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.backend.base_url = base_url.to_string();
    config.backend.request_timeout_ms = 2_000;
    config.lifecycle.success_decay_ms = 400;
    config.lifecycle.failure_decay_ms = 600;
    config.lifecycle.removal_fallback_ms = 50;
    config.lifecycle.sweep_interval_ms = 100;
    config.lifecycle.completed_grace_ms = 2_000;
    config.lifecycle.max_age_ms = 10_000;
    config.lifecycle.status_notice_ms = 2_000;
    config.channels.global_reconnect_ms = 50;
    config.channels.poll_interval_ms = 50;
    config.channels.reconnect_notice_after = 1;
    config
}

#[derive(Default)]
pub struct RecordingRetriever {
    pub calls: Mutex<Vec<(String, String, String)>>,
}

impl RecordingRetriever {
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ArtifactRetriever for RecordingRetriever {
    fn retrieve(&self, job_id: &str, file: &ResultFile, url: &str) {
        self.calls.lock().unwrap().push((
            job_id.to_string(),
            file.filename.clone(),
            url.to_string(),
        ));
    }
}

pub fn start(config: Config) -> (NotificationFacade, Arc<RecordingRetriever>) {
    let retriever = Arc::new(RecordingRetriever::default());
    let facade = NotificationFacade::spawn(config, retriever.clone()).unwrap();
    (facade, retriever)
}

/// Poll snapshots until `check` holds; panics after five seconds.
pub async fn wait_until<F>(
    facade: &NotificationFacade,
    what: &str,
    mut check: F,
) -> Vec<Notification>
where
    F: FnMut(&[Notification]) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = facade.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}: {snapshot:#?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn find<'a>(snapshot: &'a [Notification], id: &str) -> Option<&'a Notification> {
    snapshot.iter().find(|n| n.id == id)
}

pub fn running(progress: f64) -> Value {
    json!({ "status": "running", "progress": progress })
}

pub fn succeeded(filename: &str) -> Value {
    json!({
        "status": "succeeded",
        "progress": 100,
        "result": { "files": [{ "name": filename, "filename": filename }] }
    })
}
