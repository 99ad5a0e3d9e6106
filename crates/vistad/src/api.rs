//! Route table and handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::Instrument;
use vista_core::{
    request_span, run_chat, AgentStream, BuildArtifact, BuildOptions, ChatRequest, FileAccess,
    FileRequest, LogLine, OpOutcome, PatchTarget, RedeemParams, RepoStatus, VistaError,
    WhitespaceReport,
};

use crate::error::ApiError;
use crate::AppState;

type ApiResult<T> = Result<T, ApiError>;

const BUNDLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
const CHAT_BUFFER: usize = 64;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/build", post(build))
        .route("/bundles/:file", get(bundle))
        .route("/api/files/capability", post(file_capability))
        .route("/files/raw", get(raw_file))
        .route("/api/vcs/blame", post(vcs_blame))
        .route("/api/vcs/whitespace", post(vcs_whitespace))
        .route("/api/vcs/apply", post(vcs_apply))
        .route("/api/vcs/restore", post(vcs_restore))
        .route("/api/vcs/status", get(vcs_status))
        .route("/api/logs/stream", get(log_stream))
        .route("/api/agent/chat", post(agent_chat))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct BuildInput {
    entry: String,
    #[serde(flatten)]
    options: BuildOptions,
}

async fn build(
    State(state): State<AppState>,
    body: Result<Json<BuildInput>, JsonRejection>,
) -> ApiResult<Json<BuildArtifact>> {
    let Json(input) = body?;
    let artifact = state
        .services
        .builds
        .build(&input.entry, &input.options)
        .instrument(request_span("build"))
        .await?;
    Ok(Json(artifact))
}

async fn bundle(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let version = file
        .strip_suffix(".js")
        .ok_or_else(|| VistaError::NotFound(format!("no bundle {file}")))?;
    let bytes = state.services.builds.fetch(version).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, BUNDLE_CACHE_CONTROL),
        ],
        bytes,
    ))
}

async fn file_capability(
    State(state): State<AppState>,
    body: Result<Json<FileRequest>, JsonRejection>,
) -> ApiResult<Json<FileAccess>> {
    let Json(req) = body?;
    let access = state
        .services
        .capabilities
        .request(&req)
        .instrument(request_span("capability.issue"))
        .await?;
    Ok(Json(access))
}

async fn raw_file(
    State(state): State<AppState>,
    params: Result<Query<RedeemParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let file = state
        .services
        .capabilities
        .redeem(&params)
        .instrument(request_span("capability.redeem"))
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, "private, no-store"),
        ],
        file.bytes,
    ))
}

#[derive(Debug, Deserialize)]
struct PathInput {
    path: String,
}

async fn vcs_blame(
    State(state): State<AppState>,
    body: Result<Json<PathInput>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(input) = body?;
    let content = state
        .services
        .vcs
        .blame(&input.path)
        .instrument(request_span("vcs.blame"))
        .await?;
    Ok(Json(json!({ "content": content })))
}

async fn vcs_whitespace(
    State(state): State<AppState>,
    body: Result<Json<PathInput>, JsonRejection>,
) -> ApiResult<Json<WhitespaceReport>> {
    let Json(input) = body?;
    let report = state
        .services
        .vcs
        .check_whitespace(&input.path)
        .instrument(request_span("vcs.whitespace"))
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyInput {
    patch: String,
    #[serde(default)]
    to_index: bool,
}

async fn vcs_apply(
    State(state): State<AppState>,
    body: Result<Json<ApplyInput>, JsonRejection>,
) -> ApiResult<Json<OpOutcome>> {
    let Json(input) = body?;
    let target = if input.to_index {
        PatchTarget::Index
    } else {
        PatchTarget::WorkingTree
    };
    let outcome = state
        .services
        .vcs
        .apply_patch(&input.patch, target)
        .instrument(request_span("vcs.apply"))
        .await?;
    Ok(Json(outcome))
}

async fn vcs_restore(
    State(state): State<AppState>,
    body: Result<Json<PathInput>, JsonRejection>,
) -> ApiResult<Json<OpOutcome>> {
    let Json(input) = body?;
    let outcome = state
        .services
        .vcs
        .restore_file(&input.path)
        .instrument(request_span("vcs.restore"))
        .await?;
    Ok(Json(outcome))
}

async fn vcs_status(State(state): State<AppState>) -> ApiResult<Json<RepoStatus>> {
    let status = state
        .services
        .vcs
        .repo_status()
        .instrument(request_span("vcs.status"))
        .await?;
    Ok(Json(status))
}

fn json_event<T: serde::Serialize>(value: &T) -> Event {
    Event::default().data(serde_json::to_string(value).unwrap_or_default())
}

async fn log_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before the ready marker so no line published after it is missed.
    let subscription = state.services.hub.subscribe();
    let ready = tokio_stream::once(LogLine::new("info", "ready"));
    let live = futures::stream::unfold(subscription, |mut sub| async move {
        sub.recv().await.map(|line| (line, sub))
    });
    let events = ready.chain(live).map(|line| Ok(json_event(&line)));
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}

async fn agent_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(req) = body?;
    req.validate()?;

    let (stream, rx) = AgentStream::channel(CHAT_BUFFER);
    let agent = state.agent.clone();
    tokio::spawn(
        async move { run_chat(agent.as_ref(), &req.messages, stream).await }
            .instrument(request_span("agent.chat")),
    );
    let events = ReceiverStream::new(rx).map(|event| Ok(json_event(&event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
