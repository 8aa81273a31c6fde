use axum::{
    Extension, Form, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::info;

use agora_types::api::{ChangePasswordRequest, HomeResponse, PictureResponse};
use agora_types::models::{PostView, UserProfile};
use agora_types::pagination::{Page, Paginated};
use agora_types::static_url;

use crate::auth::{PICTURE_FIELD, clear_session, hash_password, validate_password, verify_password};
use crate::error::{ApiError, ApiResult};
use crate::images::read_multipart;
use crate::middleware::Session;
use crate::state::{AppState, blocking, with_db};

fn user_not_found(username: &str) -> ApiError {
    ApiError::NotFound(format!("user {} not found", username))
}

/// GET /home/{username}
pub async fn home(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(username): Path<String>,
) -> ApiResult<Json<HomeResponse>> {
    home_for(state, session, username, 1).await
}

/// GET /home/{username}/page/{page}
pub async fn home_page(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((username, page)): Path<(String, u32)>,
) -> ApiResult<Json<HomeResponse>> {
    home_for(state, session, username, page).await
}

async fn home_for(
    state: AppState,
    session: Session,
    username: String,
    page: u32,
) -> ApiResult<Json<HomeResponse>> {
    session.ensure_owner(&username)?;
    let page = Page::number(page);

    let res = with_db(&state, move |db| {
        let user = db
            .get_user_by_username(&username)?
            .ok_or_else(|| user_not_found(&username))?;
        let posts = db.list_root_posts(page)?;
        let total = db.count_root_posts()?;

        Ok::<_, ApiError>(HomeResponse {
            user: user.into(),
            feed: Paginated::new(posts.into_iter().map(PostView::from).collect(), page, total),
        })
    })
    .await?;

    Ok(Json(res))
}

/// GET /account/{username}
pub async fn account(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(username): Path<String>,
) -> ApiResult<Json<UserProfile>> {
    session.ensure_owner(&username)?;

    let user = with_db(&state, move |db| {
        db.get_user_by_username(&username)?
            .ok_or_else(|| user_not_found(&username))
    })
    .await?;

    Ok(Json(user.into()))
}

/// POST /change_password/{username}: form with `old_password` and
/// `new_password`.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(username): Path<String>,
    Form(req): Form<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    session.ensure_owner(&username)?;
    validate_password(&req.new_password)?;

    let new_password = req.new_password;
    let new_hash = blocking(move || hash_password(&new_password)).await?;

    let old_password = req.old_password;
    let name = username.clone();
    let changed = with_db(&state, move |db| {
        db.change_password(&name, |stored| verify_password(&old_password, stored), &new_hash)
    })
    .await?;

    if !changed {
        return Err(ApiError::InvalidCredentials);
    }

    info!("User {} changed their password", username);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /upload_profile_picture/{username}: multipart with a
/// `profile_picture` file.
pub async fn upload_profile_picture(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(username): Path<String>,
    multipart: Multipart,
) -> ApiResult<Json<PictureResponse>> {
    session.ensure_owner(&username)?;

    let form = read_multipart(multipart, PICTURE_FIELD).await?;
    let upload = form.file.ok_or(ApiError::InvalidUpload)?;
    let stored = state
        .images
        .store(upload.filename.as_deref(), &upload.data)
        .await?
        .ok_or(ApiError::InvalidUpload)?;

    let path = stored.path.clone();
    let name = username.clone();
    let updated = with_db(&state, move |db| db.update_profile_picture(&name, &path)).await?;
    if !updated {
        return Err(user_not_found(&username));
    }

    info!("User {} set profile picture {}", username, stored.path);
    Ok(Json(PictureResponse {
        profile_picture: static_url(&stored.path),
    }))
}

/// POST /delete_account/{username}: removes the user and ends the session.
/// Their posts stay up.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(username): Path<String>,
    jar: CookieJar,
) -> ApiResult<impl IntoResponse> {
    session.ensure_owner(&username)?;

    let name = username.clone();
    let deleted = with_db(&state, move |db| db.delete_user(&name)).await?;
    if !deleted {
        return Err(user_not_found(&username));
    }

    info!("User {} deleted their account", username);
    Ok((StatusCode::NO_CONTENT, clear_session(jar)))
}

/// GET /users-data-all: every user, without password hashes.
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<UserProfile>>> {
    let users = with_db(&state, |db| db.list_users()).await?;
    Ok(Json(users.into_iter().map(UserProfile::from).collect()))
}
