use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user as shown to other users. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Public URL of the profile picture.
    pub profile_picture: String,
}

/// A post together with its author's public identity.
///
/// `author_username` is `None` once the author's account has been deleted;
/// posts are kept when their author goes away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    pub id: i64,
    pub author_id: i64,
    pub author_username: Option<String>,
    pub author_picture: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<i64>,
    pub root_id: Option<i64>,
}

impl PostView {
    pub fn is_root(&self) -> bool {
        self.root_id.is_none()
    }
}
