//! HTTP API
//!
//! `POST /chat`, `GET /tools` and `GET /health` over one shared [`Agent`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use toolmux_core::Agent;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Start a fresh conversation before this message
    #[serde(default)]
    pub clear_history: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

pub fn create_router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/tools", get(list_tools))
        .route("/health", get(health))
        .with_state(agent)
}

pub async fn serve(agent: Arc<Agent>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = create_router(agent.clone());

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!("Toolmux API listening on {}", listener.local_addr()?);
    eprintln!("Listening on http://{}", listener.local_addr()?);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for (name, e) in agent.shutdown().await {
        tracing::warn!(provider = %name, error = %e, "Provider did not shut down cleanly");
    }
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn chat(
    State(agent): State<Arc<Agent>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }

    let reply = if request.clear_history {
        agent.chat_fresh(&request.message).await
    } else {
        agent.chat(&request.message).await
    };
    let response = reply.map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ChatResponse { response }))
}

async fn list_tools(State(agent): State<Arc<Agent>>) -> Json<Value> {
    let tools: Vec<Value> = agent
        .tools()
        .await
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.namespaced_name(),
                "provider": tool.provider,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect();

    Json(json!({ "tools": tools }))
}

async fn health(State(agent): State<Arc<Agent>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "agent_ready": true,
        "providers": agent.statuses().await,
    }))
}

enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "detail": message }))).into_response()
    }
}
