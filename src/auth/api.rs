//! Authentication API Endpoints
//! Mission: Login, refresh, session management, and audit queries over HTTP

use crate::auth::errors::AuthApiError;
use crate::auth::events::SecurityEventLogger;
use crate::auth::middleware::cookie_with_fallback;
use crate::auth::models::{
    Claims, LoginRequest, SecurityEvent, SecurityEventType, UserResponse, VerifyEmailRequest,
};
use crate::auth::rate_limit::RateLimiter;
use crate::auth::sessions::SessionManager;
use crate::auth::store::AuthStore;
use crate::auth::token::TokenService;
use crate::config::AuthConfig;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header::USER_AGENT, HeaderMap},
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Refresh-cookie names, primary then fallback (see the guard's access
/// cookie handling for the same convention).
const REFRESH_COOKIE_NAMES: [&str; 2] = ["__Secure-refreshToken", "refreshToken"];

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub store: Arc<AuthStore>,
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<SessionManager>,
    pub events: Arc<SecurityEventLogger>,
    pub limiter: Arc<RateLimiter>,
}

fn ok_json(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub(crate) fn client_user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

fn build_refresh_cookie(config: &AuthConfig, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(config.refresh_cookie_name(), value);
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(config.production);
    cookie.set_max_age(time::Duration::days(config.refresh_ttl_days));
    cookie
}

/// Clear by overwriting with an empty value expiring at the epoch.
fn clear_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, "");
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(secure);
    cookie.set_expires(time::OffsetDateTime::UNIX_EPOCH);
    cookie
}

fn clear_refresh_cookies(jar: CookieJar, config: &AuthConfig) -> CookieJar {
    // Both name conventions are cleared so a client that switched
    // environments does not keep a stray cookie.
    REFRESH_COOKIE_NAMES
        .into_iter()
        .fold(jar, |jar, name| jar.add(clear_cookie(name, config.production)))
}

fn current_refresh_value(jar: &CookieJar) -> Option<String> {
    cookie_with_fallback(jar, &REFRESH_COOKIE_NAMES).map(|v| v.to_string())
}

fn claims_user_id(claims: &Claims) -> Result<Uuid, AuthApiError> {
    claims.user_id().ok_or(AuthApiError::TokenInvalid)
}

/// Login - POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<Value>), AuthApiError> {
    let ip = addr.ip().to_string();
    let user_agent = client_user_agent(&headers);

    let decision = state.limiter.check_attempts("login", &ip);
    if !decision.allowed {
        let retry_after = decision.retry_after.unwrap_or(1);
        state.events.log(
            SecurityEvent::new(SecurityEventType::RateLimited, &ip, &user_agent)
                .with_detail("action", "login"),
        );
        return Err(AuthApiError::RateLimited { retry_after });
    }

    if payload.email.trim().is_empty() || !payload.email.contains('@') {
        return Err(AuthApiError::InvalidInput("A valid email is required"));
    }
    if payload.password.is_empty() {
        return Err(AuthApiError::InvalidInput("Password is required"));
    }

    let Some(user) = state.store.find_user_by_email(&payload.email)? else {
        state.limiter.record_attempt("login", &ip, false);
        state.events.log(
            SecurityEvent::new(SecurityEventType::LoginFailed, &ip, &user_agent)
                .with_detail("reason", "unknown_email"),
        );
        return Err(AuthApiError::InvalidCredentials);
    };

    let now = Utc::now();
    if user.is_locked(now) {
        let retry_after = user
            .lockout_until
            .map(|until| (until - now).num_seconds().max(1) as u64)
            .unwrap_or(1);
        state.events.log(
            SecurityEvent::new(SecurityEventType::RateLimited, &ip, &user_agent)
                .with_user(user.id)
                .with_detail("reason", "account_locked")
                .with_detail("retryAfter", retry_after),
        );
        return Err(AuthApiError::RateLimited { retry_after });
    }

    if !user.is_active || !state.store.verify_password(&user, &payload.password)? {
        state.limiter.record_attempt("login", &ip, false);
        let locked_until = state.store.record_login_failure(
            &user.id,
            state.config.login_limit.max_attempts,
            chrono::Duration::from_std(state.config.login_limit.lockout)
                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
        )?;
        state.events.log(
            SecurityEvent::new(SecurityEventType::LoginFailed, &ip, &user_agent)
                .with_user(user.id)
                .with_detail("reason", "bad_credentials")
                .with_detail("accountLocked", locked_until.is_some()),
        );
        return Err(AuthApiError::InvalidCredentials);
    }

    if !user.email_verified {
        state.events.log(
            SecurityEvent::new(SecurityEventType::LoginFailed, &ip, &user_agent)
                .with_user(user.id)
                .with_detail("reason", "email_unverified"),
        );
        return Err(AuthApiError::EmailNotVerified);
    }

    state.limiter.record_attempt("login", &ip, true);
    state.store.reset_login_attempts(&user.id)?;

    let record = state.tokens.issue_refresh_token(user.id, &ip, &user_agent);
    state.store.add_refresh_token(&record)?;
    let (access_token, expires_in) =
        state
            .tokens
            .issue_access_token(&user.id, &user.email, user.role)?;

    state.events.log(
        SecurityEvent::new(SecurityEventType::LoginSuccess, &ip, &user_agent)
            .with_user(user.id)
            .with_detail("sessionId", record.id.to_string()),
    );
    info!(user_id = %user.id, "Login successful");

    let jar = jar.add(build_refresh_cookie(&state.config, record.value));
    Ok((
        jar,
        ok_json(json!({
            "accessToken": access_token,
            "expiresIn": expires_in,
            "user": UserResponse::from_user(&user),
        })),
    ))
}

/// Exchange refresh cookie for a new access token - POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), AuthApiError> {
    let ip = addr.ip().to_string();
    let user_agent = client_user_agent(&headers);
    let raw = current_refresh_value(&jar).ok_or(AuthApiError::TokenInvalid)?;

    let grant = state.tokens.refresh(&raw, &ip, &user_agent)?;

    let jar = match &grant.new_refresh {
        Some(new_record) => {
            jar.add(build_refresh_cookie(&state.config, new_record.value.clone()))
        }
        None => jar,
    };

    Ok((
        jar,
        ok_json(json!({
            "accessToken": grant.access_token,
            "expiresIn": grant.expires_in,
            "rotated": grant.rotated,
        })),
    ))
}

/// End the current session - POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(claims): Extension<Claims>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), AuthApiError> {
    let user_id = claims_user_id(&claims)?;
    let raw = current_refresh_value(&jar).ok_or(AuthApiError::TokenInvalid)?;

    state.sessions.logout_current(
        &user_id,
        &raw,
        &addr.ip().to_string(),
        &client_user_agent(&headers),
    )?;

    let jar = clear_refresh_cookies(jar, &state.config);
    Ok((jar, ok_json(json!({ "loggedOut": true }))))
}

/// End every session - POST /auth/logout-all
pub async fn logout_all(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(claims): Extension<Claims>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), AuthApiError> {
    let user_id = claims_user_id(&claims)?;

    let revoked = state.sessions.logout_all(
        &user_id,
        &addr.ip().to_string(),
        &client_user_agent(&headers),
    )?;

    let jar = clear_refresh_cookies(jar, &state.config);
    Ok((jar, ok_json(json!({ "sessionsRevoked": revoked }))))
}

/// List device sessions - GET /auth/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    jar: CookieJar,
) -> Result<Json<Value>, AuthApiError> {
    let user_id = claims_user_id(&claims)?;
    let current = current_refresh_value(&jar).unwrap_or_default();

    let sessions = state.sessions.list_sessions(&user_id, &current)?;
    Ok(ok_json(json!({ "sessions": sessions })))
}

/// Terminate one session - DELETE /auth/sessions/:id
pub async fn terminate_session(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(claims): Extension<Claims>,
    jar: CookieJar,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, AuthApiError> {
    let user_id = claims_user_id(&claims)?;
    let session_id = Uuid::parse_str(&session_id)
        .map_err(|_| AuthApiError::InvalidInput("Invalid session id"))?;
    let current = current_refresh_value(&jar).unwrap_or_default();

    state.sessions.terminate_session(
        &user_id,
        &session_id,
        &current,
        &addr.ip().to_string(),
        &client_user_agent(&headers),
    )?;

    Ok(ok_json(json!({ "terminated": session_id.to_string() })))
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Paginated audit log - GET /auth/security-events
pub async fn security_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<Pagination>,
) -> Result<Json<Value>, AuthApiError> {
    let user_id = claims_user_id(&claims)?;
    let limit = page.limit.unwrap_or(20);
    let offset = page.offset.unwrap_or(0);

    let events = state.events.query(&user_id, limit, offset)?;
    Ok(ok_json(json!({
        "events": events,
        "offset": offset,
    })))
}

/// Derived security score - GET /auth/security-stats
pub async fn security_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, AuthApiError> {
    let user_id = claims_user_id(&claims)?;
    let user = state
        .store
        .find_user_by_id(&user_id)?
        .ok_or(AuthApiError::NotFound("User"))?;

    let stats = state
        .events
        .compute_security_stats(&user, state.config.login_limit.max_attempts)?;
    Ok(ok_json(serde_json::to_value(stats).map_err(anyhow::Error::from)?))
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

/// Consume a verification code - POST /auth/verify-email
pub async fn verify_email(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<Value>, AuthApiError> {
    consume_verification(&state, addr, &headers, &payload.code).await
}

/// Verification-link variant - GET /auth/verify-email?token=...
pub async fn verify_email_link(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<Value>, AuthApiError> {
    consume_verification(&state, addr, &headers, &query.token).await
}

async fn consume_verification(
    state: &AppState,
    addr: SocketAddr,
    headers: &HeaderMap,
    code: &str,
) -> Result<Json<Value>, AuthApiError> {
    let ip = addr.ip().to_string();
    let user_agent = client_user_agent(headers);

    let decision = state.limiter.check_attempts("verify", &ip);
    if !decision.allowed {
        let retry_after = decision.retry_after.unwrap_or(1);
        state.events.log(
            SecurityEvent::new(SecurityEventType::RateLimited, &ip, &user_agent)
                .with_detail("action", "verify"),
        );
        return Err(AuthApiError::RateLimited { retry_after });
    }

    if code.trim().is_empty() {
        return Err(AuthApiError::InvalidInput("Verification code is required"));
    }

    let Some(user) = state.store.consume_verification_code(code.trim())? else {
        state.limiter.record_attempt("verify", &ip, false);
        state.events.log(SecurityEvent::new(
            SecurityEventType::EmailVerificationFailed,
            &ip,
            &user_agent,
        ));
        return Err(AuthApiError::InvalidInput(
            "Invalid or expired verification code",
        ));
    };

    state.limiter.record_attempt("verify", &ip, true);
    state.events.log(
        SecurityEvent::new(SecurityEventType::EmailVerified, &ip, &user_agent)
            .with_user(user.id),
    );
    info!(user_id = %user.id, "Email verified");

    Ok(ok_json(json!({
        "verified": true,
        "user": UserResponse::from_user(&user),
    })))
}

/// Identity echo from validated claims - GET /auth/me (no database lookup)
pub async fn me(Extension(claims): Extension<Claims>) -> Json<Value> {
    ok_json(json!({
        "id": claims.sub,
        "email": claims.email,
        "role": claims.role,
    }))
}

/// Liveness probe - GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
