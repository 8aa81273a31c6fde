//! Database row types. These map directly to SQLite rows; conversions into
//! the public `agora-types` models live here so handlers never touch SQL
//! column conventions.

use agora_types::models::{PostView, UserProfile};
use agora_types::{DEFAULT_PROFILE_PICTURE, static_url};
use chrono::{DateTime, Utc};
use tracing::warn;

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password: String,
    pub profile_picture: Option<String>,
}

/// `users` row without the password column.
pub struct UserSummaryRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRow {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    /// Unix seconds.
    pub created_at: i64,
    pub parent_id: Option<i64>,
    pub root_id: Option<i64>,
}

impl PostRow {
    /// Id of the thread this post belongs to.
    pub fn thread_root(&self) -> i64 {
        self.root_id.unwrap_or(self.id)
    }
}

/// A post joined with its author. Author columns are `None` when the author
/// row no longer exists.
pub struct FeedRow {
    pub post: PostRow,
    pub author_username: Option<String>,
    pub author_picture: Option<String>,
}

fn picture_url(path: Option<&str>) -> String {
    static_url(path.unwrap_or(DEFAULT_PROFILE_PICTURE))
}

impl From<UserSummaryRow> for UserProfile {
    fn from(row: UserSummaryRow) -> Self {
        UserProfile {
            profile_picture: picture_url(row.profile_picture.as_deref()),
            id: row.id,
            username: row.username,
            email: row.email,
        }
    }
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        UserProfile {
            profile_picture: picture_url(row.profile_picture.as_deref()),
            id: row.id,
            username: row.username,
            email: row.email,
        }
    }
}

impl From<FeedRow> for PostView {
    fn from(row: FeedRow) -> Self {
        let post = row.post;
        let created_at = DateTime::<Utc>::from_timestamp(post.created_at, 0).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on post {}", post.created_at, post.id);
            DateTime::default()
        });

        PostView {
            id: post.id,
            author_id: post.author_id,
            author_username: row.author_username,
            author_picture: picture_url(row.author_picture.as_deref()),
            content: post.content,
            created_at,
            parent_id: post.parent_id,
            root_id: post.root_id,
        }
    }
}
