//! HTTP routes served next to the webhook.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use gitnote_core::{BotConfig, NoteService};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BotConfig>,
    pub service: Arc<NoteService>,
}

impl AppState {
    pub fn new(config: Arc<BotConfig>, service: Arc<NoteService>) -> Self {
        Self { config, service }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the last sync failed.
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub repository: RepositoryHealth,
}

/// Working copy summary included in the health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryHealth {
    pub ready: bool,
    pub branch: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub unpushed: u32,
    pub last_error: Option<String>,
}

/// Creates the router with `/` and `/health`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET / - Service banner.
async fn index() -> String {
    format!(
        "gitnote {} is running. Send text to the bot to save it as a note.",
        env!("CARGO_PKG_VERSION")
    )
}

/// GET /health - Health check endpoint.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.service.status_snapshot().await;
    Json(HealthResponse {
        status: if status.last_error.is_some() {
            "degraded".to_string()
        } else {
            "ok".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.config.uptime_seconds(),
        repository: RepositoryHealth {
            ready: status.ready,
            branch: status.branch,
            last_sync: status.last_sync,
            unpushed: status.unpushed,
            last_error: status.last_error,
        },
    })
}

/// Serves the health routes on their own listener (polling mode).
pub async fn serve(state: AppState) -> Result<(), std::io::Error> {
    let addr = state.config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Health server listening on {}", addr);
    axum::serve(listener, create_router(state)).await
}

/// Like [`serve`], logging instead of returning a failure.
pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = serve(state).await {
            warn!(error = %e, "Health server stopped");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use gitnote_core::{AccessController, RepoSync};
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn make_test_state() -> AppState {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);

        let vars = [
            ("BOT_TOKEN", "123:abc".to_string()),
            ("GIT_REPO_URL", "https://example.com/notes.git".to_string()),
            ("GITNOTE_STATE_DIR", path.to_string_lossy().into_owned()),
        ];
        let config = BotConfig::from_lookup(|key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.clone())
        })
        .unwrap();

        let access = AccessController::load(config.access_file(), HashSet::new()).unwrap();
        let repo = RepoSync::with_git_binary(config.git.clone(), "git");
        AppState::new(
            Arc::new(config),
            Arc::new(NoteService::new(access, repo)),
        )
    }

    #[tokio::test]
    async fn test_index_banner() {
        let server = TestServer::new(create_router(make_test_state())).unwrap();

        let response = server.get("/").await;
        response.assert_status_ok();
        assert!(response.text().starts_with("gitnote "));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = TestServer::new(create_router(make_test_state())).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: HealthResponse = response.json();
        assert_eq!(body.status, "ok");
        assert!(!body.version.is_empty());
        assert!(!body.repository.ready);
        assert_eq!(body.repository.branch, "main");
        assert!(body.repository.last_sync.is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let server = TestServer::new(create_router(make_test_state())).unwrap();

        let response = server.get("/nope").expect_failure().await;
        response.assert_status_not_found();
    }
}
