pub mod account;
pub mod auth;
pub mod error;
pub mod images;
pub mod middleware;
pub mod posts;
pub mod state;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::middleware::require_auth;
use crate::state::AppState;

/// All application routes. Static files, CORS and tracing are layered on by
/// the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/signup/availability", get(auth::availability))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/post/{post_id}", get(posts::get_thread))
        .route("/post/{post_id}/page/{page}", get(posts::get_thread_page))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/home/{username}", get(account::home))
        .route("/home/{username}/page/{page}", get(account::home_page))
        .route("/account/{username}", get(account::account))
        .route("/change_password/{username}", post(account::change_password))
        .route(
            "/upload_profile_picture/{username}",
            post(account::upload_profile_picture),
        )
        .route("/delete_account/{username}", post(account::delete_account))
        .route("/create-post", post(posts::create_post))
        .route("/delete-post/{post_id}", post(posts::delete_post))
        .route("/users-data-all", get(account::list_users))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
