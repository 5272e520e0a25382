//! Authentication Models
//! Mission: Define secure user, token, and audit data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    pub lockout_until: Option<DateTime<Utc>>,
    pub login_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the account is currently locked out of password login.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lockout_until, Some(until) if until > now)
    }
}

/// User roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "user")]
    User, // Own account + sessions
    #[serde(rename = "manager")]
    Manager, // Admin-area access (tours, bookings)
    #[serde(rename = "admin")]
    Admin, // Full access to all endpoints
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "manager" => Some(Role::Manager),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    fn level(&self) -> u8 {
        match self {
            Role::User => 0,
            Role::Manager => 1,
            Role::Admin => 2,
        }
    }

    /// Transitive role hierarchy: admin satisfies manager satisfies user.
    ///
    /// Every authorization decision in the service goes through this single
    /// function; per-endpoint ad-hoc checks are not allowed.
    pub fn is_authorized(&self, required: Role) -> bool {
        self.level() >= required.level()
    }
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (user_id)
    pub email: String,
    pub role: Role,
    pub exp: usize, // expiration timestamp
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Server-side refresh-token record, one per logged-in device.
///
/// `id` is the stable session identifier exposed to clients; `value` is the
/// opaque secret held in the refresh cookie, unique across all users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: String,
    pub device_info: String,
}

impl RefreshTokenRecord {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Security event types recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailed,
    TokenRefreshed,
    TokenRotated,
    TokenRejected,
    SessionTerminated,
    Logout,
    LogoutAll,
    EmailVerified,
    EmailVerificationFailed,
    RateLimited,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &str {
        match self {
            SecurityEventType::LoginSuccess => "login_success",
            SecurityEventType::LoginFailed => "login_failed",
            SecurityEventType::TokenRefreshed => "token_refreshed",
            SecurityEventType::TokenRotated => "token_rotated",
            SecurityEventType::TokenRejected => "token_rejected",
            SecurityEventType::SessionTerminated => "session_terminated",
            SecurityEventType::Logout => "logout",
            SecurityEventType::LogoutAll => "logout_all",
            SecurityEventType::EmailVerified => "email_verified",
            SecurityEventType::EmailVerificationFailed => "email_verification_failed",
            SecurityEventType::RateLimited => "rate_limited",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "login_success" => Some(SecurityEventType::LoginSuccess),
            "login_failed" => Some(SecurityEventType::LoginFailed),
            "token_refreshed" => Some(SecurityEventType::TokenRefreshed),
            "token_rotated" => Some(SecurityEventType::TokenRotated),
            "token_rejected" => Some(SecurityEventType::TokenRejected),
            "session_terminated" => Some(SecurityEventType::SessionTerminated),
            "logout" => Some(SecurityEventType::Logout),
            "logout_all" => Some(SecurityEventType::LogoutAll),
            "email_verified" => Some(SecurityEventType::EmailVerified),
            "email_verification_failed" => Some(SecurityEventType::EmailVerificationFailed),
            "rate_limited" => Some(SecurityEventType::RateLimited),
            _ => None,
        }
    }
}

/// Append-only audit record
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_type: SecurityEventType,
    pub ip_address: String,
    pub user_agent: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, ip_address: &str, user_agent: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            event_type,
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
            details: serde_json::json!({}),
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let Some(map) = self.details.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

/// User-facing view of one logged-in device
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub device_info: String,
    pub ip_address: String,
    pub last_active: DateTime<Utc>,
    pub is_current: bool,
    pub expires_at: DateTime<Utc>,
}

/// Aggregated account-security snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    pub successful_logins_7d: u32,
    pub failed_attempts_24h: u32,
    pub active_sessions: u32,
    pub security_score: u8,
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Email verification request body
#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub code: String,
}

/// Sanitized user payload returned to clients
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            email_verified: user.email_verified,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_hierarchy_is_transitive() {
        assert!(Role::Admin.is_authorized(Role::Admin));
        assert!(Role::Admin.is_authorized(Role::Manager));
        assert!(Role::Admin.is_authorized(Role::User));

        assert!(!Role::Manager.is_authorized(Role::Admin));
        assert!(Role::Manager.is_authorized(Role::Manager));
        assert!(Role::Manager.is_authorized(Role::User));

        assert!(!Role::User.is_authorized(Role::Admin));
        assert!(!Role::User.is_authorized(Role::Manager));
        assert!(Role::User.is_authorized(Role::User));
    }

    #[test]
    fn test_role_serialization() {
        let admin = Role::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let manager: Role = serde_json::from_str(r#""manager""#).unwrap();
        assert_eq!(manager, Role::Manager);
    }

    #[test]
    fn test_role_string_conversion() {
        assert_eq!(Role::Manager.as_str(), "manager");
        assert_eq!(Role::from_str("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::from_str("invalid"), None);
    }

    #[test]
    fn test_refresh_token_validity_window() {
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            value: "a".repeat(64),
            created_at: now,
            expires_at: now + chrono::Duration::days(30),
            ip_address: "127.0.0.1".to_string(),
            device_info: "test".to_string(),
        };
        assert!(record.is_valid(now));
        assert!(!record.is_valid(now + chrono::Duration::days(30)));
        assert!(!record.is_valid(now + chrono::Duration::days(31)));
    }

    #[test]
    fn test_security_event_builder() {
        let user_id = Uuid::new_v4();
        let event = SecurityEvent::new(SecurityEventType::LoginFailed, "10.0.0.1", "curl/8.0")
            .with_user(user_id)
            .with_detail("reason", "bad_password");

        assert_eq!(event.user_id, Some(user_id));
        assert_eq!(event.details["reason"], "bad_password");
        assert_eq!(event.event_type.as_str(), "login_failed");
    }

    #[test]
    fn test_event_type_round_trip() {
        for ty in [
            SecurityEventType::LoginSuccess,
            SecurityEventType::TokenRotated,
            SecurityEventType::SessionTerminated,
            SecurityEventType::LogoutAll,
        ] {
            assert_eq!(SecurityEventType::from_str(ty.as_str()), Some(ty));
        }
        assert_eq!(SecurityEventType::from_str("bogus"), None);
    }
}
