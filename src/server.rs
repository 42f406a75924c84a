//! HTTP API server.
//!
//! Exposes the chat and search engines as a JSON API for the web UI:
//!
//! | Method | Path           | Description |
//! |--------|----------------|-------------|
//! | `POST` | `/chat`        | Guided-or-grounded chat (JSON response) |
//! | `POST` | `/chat/stream` | Streaming chat over server-sent events |
//! | `POST` | `/search`      | Advanced search with filters |
//! | `GET`  | `/health`      | Health check (returns version) |
//!
//! Error responses use the schema
//! `{ "error": { "code": "bad_request", "message": "..." } }` with codes
//! `bad_request` (400), `provider_error` (502), `store_error` (500), and
//! `internal` (500).
//!
//! The streaming endpoint emits `data: {"chunk": ...}` events followed by
//! a terminal `data: {"sources": [...], "done": true}`. Dropping the
//! connection drops the event stream, which aborts the provider token
//! read loop.
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::answer;
use crate::completion::{self, CompletionProvider};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, Embedder};
use crate::error::Error;
use crate::guided::GuidedEngine;
use crate::models::{AdvancedSearchOptions, ChatRequest, ChatResponse, ChatTurn, TurnKind};
use crate::search;
use crate::store::DocumentStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: DocumentStore,
    embedder: Arc<Embedder>,
    completion: Arc<dyn CompletionProvider>,
    guided: Arc<GuidedEngine>,
}

/// Start the HTTP server on the configured bind address.
///
/// Constructs the providers, the guided engine, and the idle-session
/// sweep task, then serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let store = DocumentStore::new(pool);

    let embedder = Arc::new(Embedder::new(
        embedding::create_provider(&config.embedding)?,
        &config.embedding,
    ));
    let completion: Arc<dyn CompletionProvider> =
        Arc::from(completion::create_provider(&config.completion)?);
    let guided = Arc::new(GuidedEngine::new(completion.clone(), config.guided.clone()));

    spawn_session_sweep(guided.clone(), config);

    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        embedder,
        completion,
        guided,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind_addr = &config.server.bind;
    println!("procpilot server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically remove guided sessions older than the idle window.
fn spawn_session_sweep(guided: Arc<GuidedEngine>, config: &Config) {
    let interval = std::time::Duration::from_secs(config.guided.sweep_interval_secs);
    let max_age = chrono::Duration::seconds(config.guided.session_idle_secs as i64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = guided.sessions().sweep_idle(Utc::now(), max_age);
            if removed > 0 {
                tracing::info!(removed, "swept idle guided sessions");
            }
        }
    });
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match &err {
            Error::Validation(msg) => bad_request(msg.clone()),
            Error::Provider(msg) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "provider_error".to_string(),
                message: msg.clone(),
            },
            Error::Store(_) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "store_error".to_string(),
                message: err.to_string(),
            },
            Error::Decomposition(_) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: err.to_string(),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    validate_chat_request(&req)?;

    if req.use_streaming {
        return stream_chat(state, req).await;
    }

    let response = if req.use_guided_mode {
        match state
            .guided
            .route(
                &state.store,
                &state.embedder,
                &state.config,
                &req.query,
                &req.tenant_id,
                &req.user_id,
                &req.role,
                &req.history,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // Degrade to a plain grounded answer rather than failing
                // the request on a guidance-path error.
                tracing::warn!(error = %e, "guided routing failed, falling back to plain chat");
                plain_answer(&state, &req).await?
            }
        }
    } else {
        plain_answer(&state, &req).await?
    };

    record_turns(&state.store, &req, &response).await;

    Ok(Json(response).into_response())
}

async fn plain_answer(state: &AppState, req: &ChatRequest) -> Result<ChatResponse, AppError> {
    let result = answer::generate_answer(
        &state.store,
        &state.embedder,
        state.completion.as_ref(),
        &state.config,
        &req.query,
        &req.tenant_id,
        &req.user_id,
        &req.role,
        &req.history,
    )
    .await?;
    Ok(ChatResponse::answer(result.text, result.sources))
}

async fn record_turns(store: &DocumentStore, req: &ChatRequest, response: &ChatResponse) {
    let turns = [
        ChatTurn {
            tenant_id: req.tenant_id.clone(),
            user_id: req.user_id.clone(),
            kind: TurnKind::User,
            message: req.query.clone(),
            sources: Vec::new(),
            guided_mode: false,
        },
        ChatTurn {
            tenant_id: req.tenant_id.clone(),
            user_id: req.user_id.clone(),
            kind: TurnKind::Ai,
            message: response.response.clone(),
            sources: response.sources.clone(),
            guided_mode: response.guided_mode,
        },
    ];
    if let Err(e) = store.record_chat_turns(&turns).await {
        tracing::warn!(error = %e, "failed to persist chat turns");
    }
}

fn validate_chat_request(req: &ChatRequest) -> Result<(), AppError> {
    if req.query.trim().is_empty() || req.tenant_id.trim().is_empty() {
        return Err(bad_request("query and tenantId are required"));
    }
    Ok(())
}

// ============ POST /chat/stream ============

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    validate_chat_request(&req)?;
    if req.user_id.trim().is_empty() {
        return Err(bad_request("userId is required"));
    }
    stream_chat(state, req).await
}

async fn stream_chat(state: AppState, req: ChatRequest) -> Result<Response, AppError> {
    let (tokens, sources) = answer::generate_answer_stream(
        &state.store,
        &state.embedder,
        state.completion.as_ref(),
        &state.config,
        &req.query,
        &req.tenant_id,
        &req.user_id,
        &req.role,
        &req.history,
    )
    .await?;

    let store = state.store.clone();
    let stream = async_stream::stream! {
        let mut tokens = tokens;
        let mut full_text = String::new();

        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => {
                    full_text.push_str(&token);
                    yield Ok::<Event, Infallible>(
                        Event::default().data(json!({ "chunk": token }).to_string()),
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "token stream aborted");
                    break;
                }
            }
        }

        yield Ok(Event::default().data(
            json!({ "sources": &sources, "done": true }).to_string(),
        ));

        // The concatenated text is persisted as a single turn once the
        // stream has ended.
        let turns = [
            ChatTurn {
                tenant_id: req.tenant_id.clone(),
                user_id: req.user_id.clone(),
                kind: TurnKind::User,
                message: req.query.clone(),
                sources: Vec::new(),
                guided_mode: false,
            },
            ChatTurn {
                tenant_id: req.tenant_id.clone(),
                user_id: req.user_id.clone(),
                kind: TurnKind::Ai,
                message: full_text,
                sources,
                guided_mode: false,
            },
        ];
        if let Err(e) = store.record_chat_turns(&turns).await {
            tracing::warn!(error = %e, "failed to persist streamed chat turns");
        }
    };

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

// ============ POST /search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    tenant_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default = "default_search_role")]
    role: String,
    #[serde(flatten)]
    options: AdvancedSearchOptions,
}

fn default_search_role() -> String {
    "viewer".to_string()
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.query.trim().is_empty() || req.tenant_id.trim().is_empty() {
        return Err(bad_request("query and tenantId are required"));
    }

    let results = search::advanced_search(
        &state.store,
        &state.embedder,
        &req.query,
        &req.tenant_id,
        &req.user_id,
        &req.role,
        &req.options,
    )
    .await?;

    Ok(Json(json!({ "results": results })))
}
