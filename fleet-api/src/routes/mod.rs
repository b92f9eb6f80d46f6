pub mod health;
pub mod instances;

use crate::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(health::routes()) // Health routes don't need auth
        .merge(instances::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
