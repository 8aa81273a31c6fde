use std::sync::Arc;

use tracing::error;

use agora_db::Database;

use crate::error::{ApiError, ApiResult};
use crate::images::ImageStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub images: ImageStore,
    pub jwt_secret: String,
    pub session_days: i64,
    pub max_upload_bytes: usize,
}

/// Runs CPU-bound or blocking work (password hashing, SQLite) off the async
/// runtime.
pub async fn blocking<F, T>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal("blocking task failed".into())
    })?
}

/// Runs one repository call (or a short sequence of them) on the blocking
/// pool.
pub async fn with_db<F, T, E>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError>,
{
    let state = state.clone();
    blocking(move || f(&state.db).map_err(Into::into)).await
}
