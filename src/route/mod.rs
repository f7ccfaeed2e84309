use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

pub fn create_rest_router(state: AppState) -> Router {
    let chat_routes = Router::new()
        .route("/chat", post(api::chat::post_chat).delete(api::chat::delete_chat))
        .route("/chat/{id}/stream", get(api::chat::resume_chat_stream));

    Router::new()
        .nest("/api", chat_routes)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
