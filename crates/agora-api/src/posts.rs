use axum::{
    Extension, Form, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use agora_db::Database;
use agora_types::api::{CreatePostRequest, ThreadResponse};
use agora_types::models::PostView;
use agora_types::pagination::{Page, Paginated};

use crate::error::{ApiError, ApiResult};
use crate::middleware::Session;
use crate::state::{AppState, with_db};

const MAX_POST_LEN: usize = 10_000;

fn post_not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("post {} not found", id))
}

/// POST /create-post: form with `content` and optional `root_id` /
/// `parent_id`. No ids starts a new thread; a `parent_id` alone replies
/// inside the parent's thread.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Form(req): Form<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("post content cannot be empty".into()));
    }
    if content.len() > MAX_POST_LEN {
        return Err(ApiError::BadRequest(format!(
            "post content is limited to {} bytes",
            MAX_POST_LEN
        )));
    }

    let author_id = session.user_id;
    let post = with_db(&state, move |db| {
        let (parent_id, root_id) = resolve_thread(db, req.parent_id, req.root_id)?;
        let row = db.create_post(author_id, &content, parent_id, root_id)?;
        db.get_feed_post(row.id)?
            .ok_or_else(|| ApiError::Internal(format!("post {} vanished after insert", row.id)))
    })
    .await?;

    info!(
        "User {} created post {} (root {:?})",
        session.username, post.post.id, post.post.root_id
    );
    Ok((StatusCode::CREATED, Json(PostView::from(post))))
}

/// Checks that the posts a reply points at exist and agree on the thread.
/// Returns the `(parent_id, root_id)` pair to insert.
fn resolve_thread(
    db: &Database,
    parent_id: Option<i64>,
    root_id: Option<i64>,
) -> ApiResult<(Option<i64>, Option<i64>)> {
    match (parent_id, root_id) {
        (None, None) => Ok((None, None)),
        (parent_id, Some(root_id)) => {
            let root = db.get_post(root_id)?.ok_or_else(|| post_not_found(root_id))?;
            if root.root_id.is_some() {
                return Err(ApiError::BadRequest(format!(
                    "post {} is a reply, not a thread root",
                    root_id
                )));
            }
            if let Some(parent_id) = parent_id {
                let parent = db
                    .get_post(parent_id)?
                    .ok_or_else(|| post_not_found(parent_id))?;
                if parent.thread_root() != root_id {
                    return Err(ApiError::BadRequest(format!(
                        "post {} is not in thread {}",
                        parent_id, root_id
                    )));
                }
            }
            Ok((parent_id, Some(root_id)))
        }
        (Some(parent_id), None) => {
            let parent = db
                .get_post(parent_id)?
                .ok_or_else(|| post_not_found(parent_id))?;
            Ok((Some(parent_id), Some(parent.thread_root())))
        }
    }
}

/// POST /delete-post/{post_id}: authors only. Replies are not removed.
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(post_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let user_id = session.user_id;
    with_db(&state, move |db| {
        let post = db.get_post(post_id)?.ok_or_else(|| post_not_found(post_id))?;
        if post.author_id != user_id {
            return Err(ApiError::Forbidden);
        }
        db.delete_post(post_id)?;
        Ok::<_, ApiError>(())
    })
    .await?;

    info!("User {} deleted post {}", session.username, post_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /post/{post_id}
pub async fn get_thread(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> ApiResult<Json<ThreadResponse>> {
    thread_for(state, post_id, 1).await
}

/// GET /post/{post_id}/page/{page}
pub async fn get_thread_page(
    State(state): State<AppState>,
    Path((post_id, page)): Path<(i64, u32)>,
) -> ApiResult<Json<ThreadResponse>> {
    thread_for(state, post_id, page).await
}

/// The requested post plus one page of its whole thread. Asking for a reply
/// shows the thread it belongs to.
async fn thread_for(state: AppState, post_id: i64, page: u32) -> ApiResult<Json<ThreadResponse>> {
    let page = Page::number(page);

    let res = with_db(&state, move |db| {
        let post = db
            .get_feed_post(post_id)?
            .ok_or_else(|| post_not_found(post_id))?;
        let root_id = post.post.thread_root();
        let replies = db.list_replies(root_id, page)?;
        let total = db.count_replies(root_id)?;

        Ok::<_, ApiError>(ThreadResponse {
            post: post.into(),
            root_id,
            replies: Paginated::new(replies.into_iter().map(PostView::from).collect(), page, total),
        })
    })
    .await?;

    Ok(Json(res))
}
