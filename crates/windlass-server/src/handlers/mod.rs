pub mod pull;

#[cfg(test)]
pub(crate) mod test_helpers;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route(
            "/users/{user_id}/backups/{backup_id}",
            axum::routing::get(pull::pull_backup),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
