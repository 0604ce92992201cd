//! HTTP façade: submit pipelines, poll status, stream events over SSE.
//!
//! Every submitted pipeline runs in its own background task with its own
//! event queue; concurrent runs share nothing but the registry of run
//! entries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;

use waypoint_engine::{ChannelObserver, Engine, EventEmitter, HandlerRegistry, PipelineEvent};
use waypoint_types::{Context, Outcome};

#[derive(Parser)]
#[command(name = "waypoint-server", version, about = "HTTP facade for Waypoint pipelines")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Root directory for per-pipeline logs
    #[arg(long, default_value = ".waypoint/server-logs")]
    logs: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

struct RunEntry {
    name: String,
    status: RunStatus,
    outcome: Option<Outcome>,
    context: Context,
    started: Instant,
    finished: Option<Instant>,
    /// Taken once by the SSE endpoint.
    events: Option<tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>>,
}

#[derive(Clone)]
struct AppState {
    runs: Arc<tokio::sync::Mutex<HashMap<String, RunEntry>>>,
    logs_root: PathBuf,
}

#[derive(Deserialize)]
struct SubmitRequest {
    dot_source: String,
}

type ApiReply = (StatusCode, Json<serde_json::Value>);

fn not_found(id: &str) -> ApiReply {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": format!("pipeline '{id}' not found")})),
    )
}

async fn submit_pipeline(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiReply {
    let graph = match waypoint_dot::parse(&request.dot_source) {
        Ok(ast) => waypoint_engine::Graph::from_ast(ast),
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    };

    let id: String = uuid::Uuid::new_v4().to_string().chars().take(8).collect();
    let name = graph.name.clone();

    let emitter = EventEmitter::new();
    let (observer, receiver) = ChannelObserver::new();
    emitter.register(observer);
    let registry = Arc::new(HandlerRegistry::with_defaults(&emitter));
    let engine = Engine::new(registry, emitter, state.logs_root.join(&id));

    let context = Context::new();
    state.runs.lock().await.insert(
        id.clone(),
        RunEntry {
            name: name.clone(),
            status: RunStatus::Running,
            outcome: None,
            context: context.clone(),
            started: Instant::now(),
            finished: None,
            events: Some(receiver),
        },
    );

    let runs = state.runs.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        let result = engine.run_with_context(&graph, context).await;
        let mut runs = runs.lock().await;
        if let Some(entry) = runs.get_mut(&task_id) {
            entry.finished = Some(Instant::now());
            if entry.status == RunStatus::Cancelled {
                return;
            }
            match result {
                Ok(report) => {
                    entry.status = if report.succeeded() {
                        RunStatus::Completed
                    } else {
                        RunStatus::Failed
                    };
                    entry.outcome = Some(report.outcome);
                }
                Err(e) => {
                    entry.status = RunStatus::Failed;
                    entry.outcome = Some(Outcome::fail(e.to_string()));
                }
            }
        }
    });

    (
        StatusCode::CREATED,
        Json(serde_json::json!({"id": id, "name": name, "status": "running"})),
    )
}

async fn pipeline_status(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiReply {
    let runs = state.runs.lock().await;
    let Some(entry) = runs.get(&id) else {
        return not_found(&id);
    };

    let duration_ms = entry
        .finished
        .unwrap_or_else(Instant::now)
        .duration_since(entry.started)
        .as_millis() as u64;

    let mut body = serde_json::json!({
        "id": id,
        "name": entry.name,
        "status": entry.status.as_str(),
        "duration_ms": duration_ms,
    });
    if let Some(outcome) = &entry.outcome {
        body["outcome"] = serde_json::json!({
            "status": outcome.status.as_str(),
            "notes": outcome.notes,
            "failure_reason": outcome.failure_reason,
        });
    }
    (StatusCode::OK, Json(body))
}

async fn pipeline_events(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>>, ApiReply>
{
    let mut receiver = {
        let mut runs = state.runs.lock().await;
        let Some(entry) = runs.get_mut(&id) else {
            return Err(not_found(&id));
        };
        match entry.events.take() {
            Some(receiver) => receiver,
            None => {
                return Err((
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({"error": "event stream already consumed"})),
                ))
            }
        }
    };

    let stream = async_stream::stream! {
        while let Some(event) = receiver.recv().await {
            yield Ok(Event::default().json_data(&event).unwrap_or_default());
        }
        // Channel closed: the run (and its emitter) is done.
        let status = state
            .runs
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.status.as_str())
            .unwrap_or("unknown");
        let done = serde_json::json!({"type": "done", "status": status});
        yield Ok(Event::default().json_data(&done).unwrap_or_default());
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn pipeline_context(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiReply {
    let snapshot = {
        let runs = state.runs.lock().await;
        let Some(entry) = runs.get(&id) else {
            return not_found(&id);
        };
        entry.context.clone()
    };
    let values = snapshot.snapshot().await;
    (StatusCode::OK, Json(serde_json::json!(values)))
}

async fn cancel_pipeline(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> ApiReply {
    let mut runs = state.runs.lock().await;
    let Some(entry) = runs.get_mut(&id) else {
        return not_found(&id);
    };
    if entry.status != RunStatus::Running {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "pipeline is not running"})),
        );
    }
    // Mark-only: the engine has no mid-stage cancellation; the worker task
    // observes the flag when it finishes.
    entry.status = RunStatus::Cancelled;
    entry.finished = Some(Instant::now());
    (
        StatusCode::OK,
        Json(serde_json::json!({"id": id, "status": "cancelled"})),
    )
}

async fn health(State(state): State<AppState>) -> ApiReply {
    let count = state.runs.lock().await.len();
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "ok", "pipelines": count})),
    )
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/pipelines", post(submit_pipeline))
        .route("/pipelines/:id", get(pipeline_status))
        .route("/pipelines/:id/events", get(pipeline_events))
        .route("/pipelines/:id/context", get(pipeline_context))
        .route("/pipelines/:id/cancel", post(cancel_pipeline))
        .route("/health", get(health))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let state = AppState {
        runs: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        logs_root: args.logs.clone(),
    };

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!(%addr, logs = %args.logs.display(), "waypoint server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (
            AppState {
                runs: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
                logs_root: dir.path().to_path_buf(),
            },
            dir,
        )
    }

    const LINEAR_DOT: &str = r#"digraph Demo {
        start [shape="Mdiamond"]
        work [shape="box", prompt="do the thing"]
        done [shape="Msquare"]
        start -> work -> done
    }"#;

    async fn wait_for_finish(state: &AppState, id: &str) {
        for _ in 0..100 {
            {
                let runs = state.runs.lock().await;
                if runs[id].status != RunStatus::Running {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("pipeline {id} did not finish");
    }

    #[tokio::test]
    async fn submit_runs_to_completion() {
        let (state, _dir) = test_state();
        let (code, Json(body)) = submit_pipeline(
            State(state.clone()),
            Json(SubmitRequest {
                dot_source: LINEAR_DOT.into(),
            }),
        )
        .await;

        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(body["name"], "Demo");
        let id = body["id"].as_str().unwrap().to_string();

        wait_for_finish(&state, &id).await;

        let (code, Json(status)) = pipeline_status(State(state.clone()), UrlPath(id)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status["status"], "completed");
        assert_eq!(status["outcome"]["status"], "success");
    }

    #[tokio::test]
    async fn invalid_dot_is_a_bad_request() {
        let (state, _dir) = test_state();
        let (code, _) = submit_pipeline(
            State(state),
            Json(SubmitRequest {
                dot_source: "this is not dot".into(),
            }),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_graph_reports_failed_run() {
        let (state, _dir) = test_state();
        // Parses fine, but has no terminal node: validation fails the run.
        let (code, Json(body)) = submit_pipeline(
            State(state.clone()),
            Json(SubmitRequest {
                dot_source: r#"digraph Bad { start [shape="Mdiamond"] start -> a }"#.into(),
            }),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap().to_string();

        wait_for_finish(&state, &id).await;
        let (_, Json(status)) = pipeline_status(State(state), UrlPath(id)).await;
        assert_eq!(status["status"], "failed");
    }

    #[tokio::test]
    async fn unknown_pipeline_is_not_found() {
        let (state, _dir) = test_state();
        let (code, _) = pipeline_status(State(state.clone()), UrlPath("nope".into())).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        let (code, _) = cancel_pipeline(State(state), UrlPath("nope".into())).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn context_endpoint_exposes_snapshot() {
        let (state, _dir) = test_state();
        let (_, Json(body)) = submit_pipeline(
            State(state.clone()),
            Json(SubmitRequest {
                dot_source: LINEAR_DOT.into(),
            }),
        )
        .await;
        let id = body["id"].as_str().unwrap().to_string();
        wait_for_finish(&state, &id).await;

        let (code, Json(context)) = pipeline_context(State(state), UrlPath(id)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(context["outcome"], "success");
        assert_eq!(context["last_stage"], "work");
    }

    #[tokio::test]
    async fn event_stream_can_only_be_taken_once() {
        let (state, _dir) = test_state();
        let (_, Json(body)) = submit_pipeline(
            State(state.clone()),
            Json(SubmitRequest {
                dot_source: LINEAR_DOT.into(),
            }),
        )
        .await;
        let id = body["id"].as_str().unwrap().to_string();

        assert!(pipeline_events(State(state.clone()), UrlPath(id.clone())).await.is_ok());
        let second = pipeline_events(State(state), UrlPath(id)).await;
        match second {
            Err((code, _)) => assert_eq!(code, StatusCode::CONFLICT),
            Ok(_) => panic!("second stream should be rejected"),
        }
    }

    #[tokio::test]
    async fn health_reports_run_count() {
        let (state, _dir) = test_state();
        let (code, Json(body)) = health(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["pipelines"], 0);

        submit_pipeline(
            State(state.clone()),
            Json(SubmitRequest {
                dot_source: LINEAR_DOT.into(),
            }),
        )
        .await;
        let (_, Json(body)) = health(State(state)).await;
        assert_eq!(body["pipelines"], 1);
    }
}
