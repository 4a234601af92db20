use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;
use uuid::Uuid;

use parley_store::Database;
use parley_types::api::{AuthResponse, LoginRequest, RegisterRequest};
use parley_types::token::issue_token;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Emails are case-normalized: stored and looked up in lowercase.
    let email = req.email.trim().to_lowercase();
    let name = req.name.trim().to_string();
    let avatar = req.avatar.unwrap_or_default();

    if email.len() < 3 || !email.contains('@') {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let lookup_email = email.clone();
    let existing = tokio::task::spawn_blocking(move || db.get_user_by_email(&lookup_email))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if existing.is_some() {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    let user_id = Uuid::new_v4();

    let db = state.db.clone();
    let (insert_email, insert_name, insert_avatar) = (email.clone(), name.clone(), avatar.clone());
    tokio::task::spawn_blocking(move || {
        db.create_user(
            &user_id.to_string(),
            &insert_email,
            &password_hash,
            &insert_name,
            &insert_avatar,
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = issue_token(&state.jwt_secret, user_id, &email, &name, &avatar)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "User registered successfully".into(),
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let email = req.email.trim().to_lowercase();

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&email))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = issue_token(&state.jwt_secret, user_id, &user.email, &user.name, &user.avatar)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(AuthResponse {
        success: true,
        message: "User logged in successfully".into(),
        token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "test-secret".into(),
        })
    }

    fn register_req(email: &str, password: &str, name: &str) -> Json<RegisterRequest> {
        Json(RegisterRequest {
            email: email.into(),
            password: password.into(),
            name: name.into(),
            avatar: None,
        })
    }

    #[tokio::test]
    async fn register_normalizes_email_and_hashes_password() {
        let state = test_state();

        register(State(state.clone()), register_req("  Ada@Example.COM ", "correct horse", "Ada"))
            .await
            .expect("registration succeeds");

        let user = state
            .db
            .get_user_by_email("ada@example.com")
            .unwrap()
            .expect("stored under normalized email");
        assert_eq!(user.name, "Ada");
        assert_ne!(user.password, "correct horse");

        let parsed = PasswordHash::new(&user.password).unwrap();
        assert!(
            Argon2::default()
                .verify_password(b"correct horse", &parsed)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let state = test_state();

        register(State(state.clone()), register_req("ada@example.com", "correct horse", "Ada"))
            .await
            .expect("first registration succeeds");

        let err = register(State(state), register_req("ADA@example.com", "other password", "Ada2"))
            .await
            .err()
            .expect("duplicate rejected");
        assert_eq!(err, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let state = test_state();
        let err = register(State(state), register_req("ada@example.com", "short", "Ada"))
            .await
            .err()
            .expect("rejected");
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_rejects_wrong_password_and_unknown_email() {
        let state = test_state();
        register(State(state.clone()), register_req("ada@example.com", "correct horse", "Ada"))
            .await
            .expect("registration succeeds");

        let ok = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "Ada@example.com".into(),
                password: "correct horse".into(),
            }),
        )
        .await;
        assert!(ok.is_ok());

        let err = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "ada@example.com".into(),
                password: "wrong".into(),
            }),
        )
        .await
        .err()
        .expect("wrong password rejected");
        assert_eq!(err, StatusCode::UNAUTHORIZED);

        let err = login(
            State(state),
            Json(LoginRequest {
                email: "nobody@example.com".into(),
                password: "whatever".into(),
            }),
        )
        .await
        .err()
        .expect("unknown email rejected");
        assert_eq!(err, StatusCode::UNAUTHORIZED);
    }
}
