pub mod api;
pub mod models;
pub mod pagination;

/// Profile picture stored for users who never uploaded one, relative to the
/// static root.
pub const DEFAULT_PROFILE_PICTURE: &str = "error.png";

/// URL prefix the static directory is served under.
pub const STATIC_URL_PREFIX: &str = "/static";

/// Public URL for a path stored relative to the static root.
pub fn static_url(path: &str) -> String {
    format!("{}/{}", STATIC_URL_PREFIX, path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_url_joins_once() {
        assert_eq!(static_url("images/ab.png"), "/static/images/ab.png");
        assert_eq!(static_url("/error.png"), "/static/error.png");
    }
}
