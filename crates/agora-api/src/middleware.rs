use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use crate::auth::{SESSION_COOKIE, decode_token};
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, with_db};

/// The logged-in user, injected into request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
}

impl Session {
    /// Per-user routes only act on the caller's own account.
    pub fn ensure_owner(&self, username: &str) -> ApiResult<()> {
        if self.username == username {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

/// Accepts the session token from an `Authorization: Bearer` header or the
/// session cookie. The token's user must still exist under the same id and
/// name, so a token outlives neither its account nor a reuse of the name.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
        .ok_or(ApiError::Unauthorized)?;

    let claims = decode_token(&state.jwt_secret, &token).ok_or(ApiError::Unauthorized)?;

    let user_id = claims.sub;
    let user = with_db(&state, move |db| db.get_user_by_id(user_id)).await?;
    match user {
        Some(user) if user.username == claims.username => {}
        _ => {
            warn!("Rejected token for stale account {} (id {})", claims.username, user_id);
            return Err(ApiError::Unauthorized);
        }
    }

    req.extensions_mut().insert(Session {
        user_id: claims.sub,
        username: claims.username,
    });
    Ok(next.run(req).await)
}
