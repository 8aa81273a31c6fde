use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{PostView, UserProfile};
use crate::pagination::Paginated;

// -- Session --

/// Session token claims. `sub` is the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Returned by signup and login. The token is also set as a cookie.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AvailabilityQuery {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub username_taken: bool,
    pub email_taken: bool,
}

// -- Account --

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PictureResponse {
    pub profile_picture: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HomeResponse {
    pub user: UserProfile,
    pub feed: Paginated<PostView>,
}

// -- Posts --

/// Form body for `/create-post`. Leaving `root_id` out creates a new thread.
#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub root_id: Option<i64>,
    #[serde(default, deserialize_with = "optional_id")]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadResponse {
    pub post: PostView,
    pub root_id: i64,
    pub replies: Paginated<PostView>,
}

/// HTML forms submit empty strings (or the literal `none`) for unset ids.
fn optional_id<'de, D>(de: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("none") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_post_accepts_blank_ids() {
        let req: CreatePostRequest =
            serde_json::from_str(r#"{"content":"hi","root_id":"","parent_id":"None"}"#).unwrap();
        assert_eq!(req.root_id, None);
        assert_eq!(req.parent_id, None);

        let req: CreatePostRequest = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(req.root_id, None);
    }

    #[test]
    fn create_post_parses_ids() {
        let req: CreatePostRequest =
            serde_json::from_str(r#"{"content":"re","root_id":" 5 ","parent_id":"7"}"#).unwrap();
        assert_eq!(req.root_id, Some(5));
        assert_eq!(req.parent_id, Some(7));
    }

    #[test]
    fn create_post_rejects_garbage_id() {
        let res: Result<CreatePostRequest, _> =
            serde_json::from_str(r#"{"content":"re","root_id":"abc"}"#);
        assert!(res.is_err());
    }
}
