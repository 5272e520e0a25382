//! Authorization guard middleware
//! Mission: Intercept every request, resolve identity, enforce the role hierarchy

use crate::auth::api::client_user_agent;
use crate::auth::errors::AuthApiError;
use crate::auth::events::SecurityEventLogger;
use crate::auth::models::{Role, SecurityEvent, SecurityEventType};
use crate::auth::token::TokenService;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Routes reachable with no identity at all.
const PUBLIC_ROUTES: &[&str] = &["/health", "/auth/login", "/auth/refresh", "/auth/verify-email"];

/// Access-token cookie names, primary then fallback. Browser clients in
/// production carry the `__Secure-` prefixed name; other environments use
/// the plain one.
const ACCESS_COOKIE_NAMES: [&str; 2] = ["__Secure-accessToken", "accessToken"];

/// What a route demands before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Requires(Role),
}

/// Minimal role required for a path. The admin area needs at least
/// `manager`; every other protected route needs at least `user`.
pub fn route_access(path: &str) -> RouteAccess {
    if PUBLIC_ROUTES.contains(&path) {
        return RouteAccess::Public;
    }
    if path.starts_with("/admin") {
        return RouteAccess::Requires(Role::Manager);
    }
    RouteAccess::Requires(Role::User)
}

/// Shared state for the guard.
#[derive(Clone)]
pub struct GuardState {
    pub tokens: Arc<TokenService>,
    pub events: Arc<SecurityEventLogger>,
}

/// Read a cookie trying the primary name first, then the fallback.
pub fn cookie_with_fallback<'a>(jar: &'a CookieJar, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| jar.get(name).map(|c| c.value()))
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Global request interceptor.
///
/// State machine: Unauthenticated -> Authenticated(role) -> Authorized or
/// Forbidden. Public routes short-circuit with no identity check; protected
/// routes resolve claims from the bearer header or the access cookie and
/// compare the caller's role against the route requirement through the
/// transitive hierarchy.
pub async fn authorization_guard(
    State(guard): State<GuardState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthApiError> {
    let path = req.uri().path().to_string();

    let required = match route_access(&path) {
        RouteAccess::Public => return Ok(next.run(req).await),
        RouteAccess::Requires(role) => role,
    };

    let ip = addr.ip().to_string();
    let user_agent = client_user_agent(req.headers());

    let Some(token) = bearer_token(&req)
        .or_else(|| cookie_with_fallback(&jar, &ACCESS_COOKIE_NAMES).map(|v| v.to_string()))
    else {
        guard.events.log(
            SecurityEvent::new(SecurityEventType::TokenRejected, &ip, &user_agent)
                .with_detail("reason", "missing_token")
                .with_detail("path", path.clone()),
        );
        return Err(AuthApiError::MissingToken {
            // Carried back so the client can resume here after login.
            callback: path,
        });
    };

    let claims = match guard.tokens.verify_access_token(&token) {
        Ok(claims) => claims,
        Err(err) => {
            guard.events.log(
                SecurityEvent::new(SecurityEventType::TokenRejected, &ip, &user_agent)
                    .with_detail("reason", err.code())
                    .with_detail("path", path.clone()),
            );
            return Err(err);
        }
    };

    if !claims.role.is_authorized(required) {
        warn!(
            path = %path,
            current = claims.role.as_str(),
            required = required.as_str(),
            "Insufficient role"
        );
        let mut event = SecurityEvent::new(SecurityEventType::TokenRejected, &ip, &user_agent)
            .with_detail("reason", "insufficient_role")
            .with_detail("requiredRole", required.as_str())
            .with_detail("path", path.clone());
        if let Some(user_id) = claims.user_id() {
            event = event.with_user(user_id);
        }
        guard.events.log(event);
        return Err(AuthApiError::Forbidden {
            required,
            current: claims.role,
        });
    }

    // Handlers read identity from request extensions.
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Middleware that logs HTTP requests with timing information.
///
/// INFO for completed requests, WARN for 5xx. Health checks are skipped to
/// reduce noise.
pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            client_ip = %addr.ip(),
            "Request failed (5xx)"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            client_ip = %addr.ip(),
            "Request completed"
        );
    }

    response
}
