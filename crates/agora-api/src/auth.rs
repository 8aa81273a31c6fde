use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Form, Json,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};

use agora_db::Database;
use agora_db::models::UserRow;
use agora_types::api::{
    AvailabilityQuery, AvailabilityResponse, Claims, LoginRequest, SessionResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::images::{Upload, read_multipart};
use crate::state::{AppState, blocking, with_db};

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "agora_session";

/// Multipart field holding a profile picture.
pub const PICTURE_FIELD: &str = "profile_picture";

const MIN_PASSWORD_LEN: usize = 8;

/// POST /signup: multipart form with `username`, `email`, `password` and an
/// optional `profile_picture` file.
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut form = read_multipart(multipart, PICTURE_FIELD).await?;
    let username = form.take_text("username")?.trim().to_string();
    let email = form.take_text("email")?.trim().to_string();
    let password = form.take_text("password")?;

    validate_username(&username)?;
    if !email.contains('@') {
        return Err(ApiError::BadRequest("invalid email address".into()));
    }
    validate_password(&password)?;

    let password_hash = blocking(move || hash_password(&password)).await?;

    // The UNIQUE constraints decide; a taken name or email comes back as 409.
    let (name, mail) = (username.clone(), email.clone());
    let user_id = with_db(&state, move |db| db.create_user(&name, &mail, &password_hash, None)).await?;

    // The picture is stored only once the account exists, so a conflict
    // leaves no unreferenced file behind.
    if let Some(upload) = form.file.take() {
        set_signup_picture(&state, &username, upload).await;
    }

    info!("User {} signed up (id {})", username, user_id);

    let token = create_token(&state.jwt_secret, user_id, &username, state.session_days)?;

    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(token.clone())),
        Json(SessionResponse {
            user_id,
            username,
            token,
        }),
    ))
}

/// A picture that fails to store leaves the account on the default picture
/// rather than failing a signup that already succeeded.
async fn set_signup_picture(state: &AppState, username: &str, upload: Upload) {
    let stored = match state.images.store(upload.filename.as_deref(), &upload.data).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return,
        Err(e) => {
            warn!("Failed to store signup picture for {}: {}", username, e);
            return;
        }
    };

    let name = username.to_string();
    let path = stored.path.clone();
    if let Err(e) = with_db(state, move |db| db.update_profile_picture(&name, &path)).await {
        warn!("Failed to set signup picture {} for {}: {}", stored.path, username, e);
    }
}

/// POST /login: form with `username` and `password`.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(req): Form<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    let name = username.clone();
    let user = with_db(&state, move |db| validate_user(db, &name, &req.password))
        .await?
        .ok_or_else(|| {
            warn!("Failed login for {}", username);
            ApiError::InvalidCredentials
        })?;

    let token = create_token(&state.jwt_secret, user.id, &user.username, state.session_days)?;
    info!("User {} logged in", user.username);

    Ok((
        jar.add(session_cookie(token.clone())),
        Json(SessionResponse {
            user_id: user.id,
            username: user.username,
            token,
        }),
    ))
}

/// POST /logout: drops the session cookie.
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (StatusCode::NO_CONTENT, clear_session(jar))
}

/// GET /signup/availability: lets the signup form flag taken names early.
/// Advisory only: signup itself still relies on the UNIQUE constraints.
pub async fn availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Json<AvailabilityResponse>> {
    let res = with_db(&state, move |db| {
        let username_taken = match query.username.as_deref() {
            Some(name) => db.is_username_taken(name.trim())?,
            None => false,
        };
        let email_taken = match query.email.as_deref() {
            Some(email) => db.is_email_taken(email.trim())?,
            None => false,
        };
        Ok::<_, agora_db::DbError>(AvailabilityResponse {
            username_taken,
            email_taken,
        })
    })
    .await?;

    Ok(Json(res))
}

/// Looks up `username` and checks `password` against its stored hash.
pub fn validate_user(db: &Database, username: &str, password: &str) -> agora_db::Result<Option<UserRow>> {
    let Some(user) = db.get_user_by_username(username)? else {
        return Ok(None);
    };
    if verify_password(password, &user.password) {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Hash with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Unparseable password hash: {}", e);
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn validate_username(username: &str) -> ApiResult<()> {
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters".into()));
    }
    // Usernames appear in URL paths.
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(ApiError::BadRequest(
            "username may only contain letters, digits, '_', '-' and '.'".into(),
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> ApiResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn create_token(secret: &str, user_id: i64, username: &str, days: i64) -> ApiResult<String> {
    let exp = chrono::TimeDelta::try_days(days)
        .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| ApiError::Internal(format!("session length of {} days is out of range", days)))?;

    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: exp.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))
}

/// `None` for a malformed, forged or expired token.
pub fn decode_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Always emits an expired cookie, whether or not the request carried one.
pub fn clear_session(jar: CookieJar) -> CookieJar {
    let mut cookie = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    cookie.make_removal();
    jar.add(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert_ne!(hash, "correct horse");
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let a = hash_password("hunter22").unwrap();
        let b = hash_password("hunter22").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("p", "p"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn validate_user_checks_hash() {
        let db = Database::open_in_memory().unwrap();
        let hash = hash_password("p4ssword").unwrap();
        db.create_user("alice", "a@x.com", &hash, None).unwrap();

        let user = validate_user(&db, "alice", "p4ssword").unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "a@x.com");

        assert!(validate_user(&db, "alice", "wrong").unwrap().is_none());
        assert!(validate_user(&db, "bob", "p4ssword").unwrap().is_none());
    }

    #[test]
    fn token_roundtrip_and_forgery() {
        let token = create_token("secret", 7, "alice", 1).unwrap();
        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.username, "alice");

        assert!(decode_token("other-secret", &token).is_none());
        assert!(decode_token("secret", "not-a-token").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create_token("secret", 7, "alice", -1).unwrap();
        assert!(decode_token("secret", &token).is_none());
    }

    #[test]
    fn out_of_range_session_length_is_an_error() {
        assert!(matches!(
            create_token("secret", 7, "alice", 1_000_000_000_000_000),
            Err(ApiError::Internal(_))
        ));
        assert!(create_token("secret", 7, "alice", i64::MIN).is_err());
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username("a/b/c").is_err());
        assert!(validate_username(&"x".repeat(33)).is_err());
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }
}
