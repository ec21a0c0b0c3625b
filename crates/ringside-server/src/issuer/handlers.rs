//! Issuing service HTTP handlers.

use axum::{
    Form, Json,
    extract::{FromRequestParts, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::IntoResponse,
};
use ringside_core::{LoginData, SessionEvent, token_fingerprint};
use ringside_events::PublishOutcome;
use serde::{Deserialize, Serialize};

use super::IssuerState;
use super::error::IssuerError;
use super::password::{hash_password, verify_password};
use super::users::{NewUser, UserRead};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// OAuth2 password-grant style login form.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    /// Username or email.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Bearer token presented to the issuing service.
pub struct SessionToken(pub String);

impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = IssuerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(IssuerError::NotAuthenticated)?
            .to_str()
            .map_err(|_| IssuerError::InvalidToken)?;

        match value.split_once(' ') {
            Some((scheme, token))
                if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
            {
                Ok(SessionToken(token.trim().to_string()))
            }
            _ => Err(IssuerError::InvalidToken),
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, IssuerError>
where
    F: FnOnce() -> Result<T, argon2::password_hash::Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IssuerError::internal(format!("hashing task failed: {e}")))?
        .map_err(|e| IssuerError::internal(format!("password hashing: {e}")))
}

/// `POST /users`
pub async fn register(
    State(state): State<IssuerState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, IssuerError> {
    let email = req.email.trim().to_string();
    let username = req.username.trim().to_string();
    if !email.contains('@') {
        return Err(IssuerError::validation("A valid email is required"));
    }
    if username.is_empty() {
        return Err(IssuerError::validation("Username must not be empty"));
    }
    if req.password.is_empty() {
        return Err(IssuerError::validation("Password must not be empty"));
    }

    let password = req.password;
    let password_hash = blocking(move || hash_password(&password)).await?;

    let user = state
        .users
        .create(NewUser {
            email,
            username,
            password_hash,
        })
        .await?;

    tracing::info!(user_id = user.id, "User registered");
    Ok((StatusCode::CREATED, Json(UserRead::try_from(&user)?)))
}

/// `POST /auth/login`
///
/// Issues a session token and publishes `UserLoggedIn`. A broker outage
/// never fails the login; the event is retried in the background.
pub async fn login(
    State(state): State<IssuerState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, IssuerError> {
    let user = state
        .users
        .find_by_login(form.username.trim())
        .await
        .ok_or(IssuerError::InvalidLogin)?;

    let hash = user.password_hash.clone();
    let password = form.password;
    let valid = blocking(move || verify_password(&password, &hash)).await?;
    if !valid || !user.is_active {
        metrics::counter!(crate::metrics::names::LOGINS_TOTAL, "outcome" => "rejected")
            .increment(1);
        return Err(IssuerError::InvalidLogin);
    }

    let session = state.sessions.issue(user.id);
    let token = session.token;
    let login = LoginData {
        user_id: Some(user.id.to_string()),
        username: Some(user.username.clone()),
        expires_at: Some(session.expires_at),
        ..LoginData::new(user.email.clone(), token.clone())
    };

    match state
        .publisher
        .publish_event_or_defer(SessionEvent::logged_in(&login))
        .await
    {
        Ok(PublishOutcome::Published(_)) => {}
        Ok(PublishOutcome::Deferred) => {
            tracing::warn!(
                user_id = user.id,
                token = %token_fingerprint(&token),
                "Login event deferred, downstream services will verify on first use"
            );
        }
        Err(e) => {
            tracing::error!(user_id = user.id, error = %e, "Login event could not be built");
        }
    }

    metrics::counter!(crate::metrics::names::LOGINS_TOTAL, "outcome" => "issued").increment(1);
    tracing::info!(user_id = user.id, token = %token_fingerprint(&token), "Session issued");

    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
    }))
}

/// `POST /auth/logout`
pub async fn logout(
    State(state): State<IssuerState>,
    SessionToken(token): SessionToken,
) -> Result<StatusCode, IssuerError> {
    state
        .sessions
        .resolve(&token)
        .ok_or(IssuerError::InvalidToken)?;
    state.sessions.revoke(&token);

    if let Err(e) = state
        .publisher
        .publish_event_or_defer(SessionEvent::logged_out(token.clone()))
        .await
    {
        tracing::error!(error = %e, "Logout event could not be built");
    }

    tracing::info!(token = %token_fingerprint(&token), "Session revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /users/me`
///
/// This is the verification endpoint downstream gates fall back to.
pub async fn me(
    State(state): State<IssuerState>,
    SessionToken(token): SessionToken,
) -> Result<Json<UserRead>, IssuerError> {
    let user_id = state
        .sessions
        .resolve(&token)
        .ok_or(IssuerError::InvalidToken)?;
    let user = state
        .users
        .get(user_id)
        .await
        .ok_or(IssuerError::InvalidToken)?;
    Ok(Json(UserRead::try_from(&user)?))
}
