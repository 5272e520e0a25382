//! Token issuance and rotation
//! Mission: Short-lived signed access tokens, long-lived rotating refresh tokens

use crate::auth::errors::AuthApiError;
use crate::auth::events::SecurityEventLogger;
use crate::auth::models::{
    Claims, RefreshTokenRecord, Role, SecurityEvent, SecurityEventType, User,
};
use crate::auth::rate_limit::RateLimiter;
use crate::auth::store::AuthStore;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Refresh-token value size. 32 bytes from the OS CSPRNG give 256 bits of
/// entropy, which makes guessing (and collision) infeasible.
const REFRESH_TOKEN_BYTES: usize = 32;

/// Decides whether a given refresh call replaces the refresh token.
///
/// Rotation limits the value of a stolen token but costs a write per
/// refresh; the policy is pluggable so the tradeoff can be tuned without
/// touching the refresh algorithm.
pub trait RotationPolicy: Send + Sync {
    fn should_rotate(&self, record: &RefreshTokenRecord) -> bool;
}

/// Rotate on a fixed fraction of refresh calls (service default: 10%).
pub struct ProbabilityRotation {
    probability: f64,
}

impl ProbabilityRotation {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl RotationPolicy for ProbabilityRotation {
    fn should_rotate(&self, _record: &RefreshTokenRecord) -> bool {
        rand::thread_rng().gen_bool(self.probability)
    }
}

/// Rotate on every refresh. Deterministic; used in tests and available for
/// deployments that prefer maximum rotation.
pub struct AlwaysRotate;

impl RotationPolicy for AlwaysRotate {
    fn should_rotate(&self, _record: &RefreshTokenRecord) -> bool {
        true
    }
}

/// Never rotate. Deterministic counterpart for tests.
pub struct NeverRotate;

impl RotationPolicy for NeverRotate {
    fn should_rotate(&self, _record: &RefreshTokenRecord) -> bool {
        false
    }
}

/// Successful outcome of a refresh call.
pub struct RefreshGrant {
    pub user: User,
    pub access_token: String,
    pub expires_in: i64,
    pub rotated: bool,
    /// Present iff `rotated`; the caller must hand the new value to the
    /// client, the old value is dead.
    pub new_refresh: Option<RefreshTokenRecord>,
}

/// Issues and verifies access tokens, issues and rotates refresh tokens.
pub struct TokenService {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store: Arc<AuthStore>,
    limiter: Arc<RateLimiter>,
    events: Arc<SecurityEventLogger>,
    rotation: Arc<dyn RotationPolicy>,
}

impl TokenService {
    pub fn new(
        secret: String,
        access_ttl_minutes: i64,
        refresh_ttl_days: i64,
        store: Arc<AuthStore>,
        limiter: Arc<RateLimiter>,
        events: Arc<SecurityEventLogger>,
        rotation: Arc<dyn RotationPolicy>,
    ) -> Self {
        Self {
            secret,
            access_ttl: Duration::minutes(access_ttl_minutes),
            refresh_ttl: Duration::days(refresh_ttl_days),
            store,
            limiter,
            events,
            rotation,
        }
    }

    /// Generate a signed access token embedding identity and role.
    /// No side effects beyond signing.
    pub fn issue_access_token(
        &self,
        user_id: &Uuid,
        email: &str,
        role: Role,
    ) -> Result<(String, i64)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(self.access_ttl)
            .context("Invalid timestamp")?
            .timestamp() as usize;
        let expires_in = self.access_ttl.num_seconds();

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            exp: expiration,
        };

        debug!(user_id = %user_id, "Issuing access token");

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to sign access token")?;

        Ok((token, expires_in))
    }

    /// Validate an access token and extract its claims.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthApiError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthApiError::TokenExpired,
            _ => AuthApiError::TokenInvalid,
        })
    }

    /// Mint a fresh refresh-token record for a device. Uniqueness of `value`
    /// follows from the size of the random space; the store's UNIQUE
    /// constraint backstops the negligible residual risk.
    pub fn issue_refresh_token(
        &self,
        user_id: Uuid,
        ip_address: &str,
        device_info: &str,
    ) -> RefreshTokenRecord {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let now = Utc::now();

        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            value: hex::encode(bytes),
            created_at: now,
            expires_at: now + self.refresh_ttl,
            ip_address: ip_address.to_string(),
            device_info: device_info.to_string(),
        }
    }

    /// Exchange a refresh token for a new access token, rotating the
    /// refresh token when the policy fires. Rate-limit and audit outcomes
    /// are recorded as side effects.
    pub fn refresh(
        &self,
        raw_value: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<RefreshGrant, AuthApiError> {
        let decision = self.limiter.check_attempts("refresh", client_ip);
        if !decision.allowed {
            let retry_after = decision.retry_after.unwrap_or(1);
            self.events.log(
                SecurityEvent::new(SecurityEventType::RateLimited, client_ip, user_agent)
                    .with_detail("action", "refresh")
                    .with_detail("retryAfter", retry_after),
            );
            return Err(AuthApiError::RateLimited { retry_after });
        }

        match self.refresh_inner(raw_value, client_ip, user_agent) {
            Ok(grant) => {
                self.limiter.record_attempt("refresh", client_ip, true);
                let event_type = if grant.rotated {
                    SecurityEventType::TokenRotated
                } else {
                    SecurityEventType::TokenRefreshed
                };
                self.events.log(
                    SecurityEvent::new(event_type, client_ip, user_agent)
                        .with_user(grant.user.id),
                );
                Ok(grant)
            }
            Err(err) => {
                // Only authentication failures count toward lockout;
                // infrastructure errors do not punish the client.
                if matches!(err, AuthApiError::TokenInvalid | AuthApiError::TokenExpired) {
                    self.limiter.record_attempt("refresh", client_ip, false);
                    self.events.log(
                        SecurityEvent::new(
                            SecurityEventType::TokenRejected,
                            client_ip,
                            user_agent,
                        )
                        .with_detail("reason", err.code()),
                    );
                }
                Err(err)
            }
        }
    }

    fn refresh_inner(
        &self,
        raw_value: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<RefreshGrant, AuthApiError> {
        // Reverse-indexed owner lookup; never a scan over users.
        let user = self
            .store
            .find_user_by_refresh_token(raw_value)?
            .ok_or(AuthApiError::TokenInvalid)?;
        if !user.is_active {
            return Err(AuthApiError::TokenInvalid);
        }

        // Re-read the record and confirm it belongs to the resolved user.
        // Defends against handing out tokens for another account if the
        // index ever goes stale.
        let record = self
            .store
            .find_refresh_token(raw_value)?
            .ok_or(AuthApiError::TokenInvalid)?;
        if record.user_id != user.id {
            return Err(AuthApiError::TokenInvalid);
        }

        let now = Utc::now();
        if !record.is_valid(now) {
            // Lazy purge: the expired record is removed on this access.
            let _ = self.store.remove_refresh_token(raw_value)?;
            return Err(AuthApiError::TokenExpired);
        }

        let (access_token, expires_in) =
            self.issue_access_token(&user.id, &user.email, user.role)?;

        if self.rotation.should_rotate(&record) {
            let new_record = self.issue_refresh_token(user.id, client_ip, user_agent);
            // Remove-then-insert commits atomically; a no-op removal means a
            // concurrent refresh already rotated this value, so the
            // presented token must not authenticate again.
            if !self.store.rotate_refresh_token(raw_value, &new_record)? {
                return Err(AuthApiError::TokenInvalid);
            }
            return Ok(RefreshGrant {
                user,
                access_token,
                expires_in,
                rotated: true,
                new_refresh: Some(new_record),
            });
        }

        Ok(RefreshGrant {
            user,
            access_token,
            expires_in,
            rotated: false,
            new_refresh: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::rate_limit::{MemoryRateLimitBackend, RatePolicy};
    use std::time::Duration as StdDuration;
    use tempfile::NamedTempFile;

    fn service(
        rotation: Arc<dyn RotationPolicy>,
    ) -> (TokenService, Arc<AuthStore>, User, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Arc::new(AuthStore::new(temp_file.path().to_str().unwrap()).unwrap());
        let user = store
            .create_user("traveler@example.com", "password1", Role::User)
            .unwrap();
        let limiter = Arc::new(
            RateLimiter::new(Arc::new(MemoryRateLimitBackend::new())).with_policy(
                "refresh",
                RatePolicy {
                    max_attempts: 3,
                    window: StdDuration::from_secs(60),
                    lockout: StdDuration::from_secs(60),
                },
            ),
        );
        let events = Arc::new(SecurityEventLogger::new(Arc::clone(&store)));
        let service = TokenService::new(
            "test-secret-key-12345".to_string(),
            15,
            30,
            Arc::clone(&store),
            limiter,
            events,
            rotation,
        );
        (service, store, user, temp_file)
    }

    fn login(service: &TokenService, store: &AuthStore, user: &User) -> RefreshTokenRecord {
        let record = service.issue_refresh_token(user.id, "127.0.0.1", "test-agent");
        store.add_refresh_token(&record).unwrap();
        record
    }

    #[test]
    fn test_access_token_round_trip() {
        let (service, _store, user, _temp) = service(Arc::new(NeverRotate));
        let (token, expires_in) = service
            .issue_access_token(&user.id, &user.email, user.role)
            .unwrap();
        assert_eq!(expires_in, 15 * 60);

        let claims = service.verify_access_token(&token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, Role::User);
    }

    #[test]
    fn test_expired_access_token_maps_to_token_expired() {
        let (service, _store, user, _temp) = service(Arc::new(NeverRotate));
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            exp: (Utc::now() - Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret("test-secret-key-12345".as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            service.verify_access_token(&token),
            Err(AuthApiError::TokenExpired)
        ));
    }

    #[test]
    fn test_tampered_access_token_maps_to_token_invalid() {
        let (service, _store, user, _temp) = service(Arc::new(NeverRotate));
        let (token, _) = service
            .issue_access_token(&user.id, &user.email, user.role)
            .unwrap();
        let mut tampered = token.clone();
        tampered.pop();

        assert!(matches!(
            service.verify_access_token(&tampered),
            Err(AuthApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_refresh_token_has_256_bits_of_hex() {
        let (service, _store, user, _temp) = service(Arc::new(NeverRotate));
        let record = service.issue_refresh_token(user.id, "127.0.0.1", "agent");
        assert_eq!(record.value.len(), 64);
        assert!(record.value.chars().all(|c| c.is_ascii_hexdigit()));

        let other = service.issue_refresh_token(user.id, "127.0.0.1", "agent");
        assert_ne!(record.value, other.value);
        assert_ne!(record.id, other.id);
    }

    #[test]
    fn test_refresh_without_rotation_keeps_token_valid() {
        let (service, store, user, _temp) = service(Arc::new(NeverRotate));
        let record = login(&service, &store, &user);

        let grant = service
            .refresh(&record.value, "127.0.0.1", "test-agent")
            .unwrap();
        assert!(!grant.rotated);
        assert!(grant.new_refresh.is_none());
        assert!(!grant.access_token.is_empty());

        // Token remains valid: a second refresh succeeds with the same value.
        let again = service
            .refresh(&record.value, "127.0.0.1", "test-agent")
            .unwrap();
        assert!(!again.rotated);
    }

    #[test]
    fn test_rotation_permanently_invalidates_old_value() {
        let (service, store, user, _temp) = service(Arc::new(AlwaysRotate));
        let record = login(&service, &store, &user);

        let grant = service
            .refresh(&record.value, "10.0.0.2", "new-device")
            .unwrap();
        assert!(grant.rotated);
        let new_record = grant.new_refresh.unwrap();
        assert_ne!(new_record.value, record.value);
        // Rotated record carries the current request's metadata.
        assert_eq!(new_record.ip_address, "10.0.0.2");
        assert_eq!(new_record.device_info, "new-device");

        // Replay of the old value must fail, permanently.
        assert!(matches!(
            service.refresh(&record.value, "10.0.0.2", "new-device"),
            Err(AuthApiError::TokenInvalid)
        ));

        // The rotated-in value works.
        assert!(service
            .refresh(&new_record.value, "10.0.0.2", "new-device")
            .is_ok());
    }

    #[test]
    fn test_unknown_token_is_invalid_not_server_error() {
        let (service, _store, _user, _temp) = service(Arc::new(NeverRotate));
        let never_issued = "ab".repeat(32);

        assert!(matches!(
            service.refresh(&never_issued, "127.0.0.1", "agent"),
            Err(AuthApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_inactive_account_cannot_refresh() {
        let (service, store, user, _temp) = service(Arc::new(NeverRotate));
        let record = login(&service, &store, &user);
        store.set_active(&user.id, false).unwrap();

        assert!(matches!(
            service.refresh(&record.value, "127.0.0.1", "agent"),
            Err(AuthApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_expired_refresh_token_is_purged_on_access() {
        let (service, store, user, _temp) = service(Arc::new(NeverRotate));
        let mut record = service.issue_refresh_token(user.id, "127.0.0.1", "agent");
        record.expires_at = Utc::now() - Duration::seconds(1);
        store.add_refresh_token(&record).unwrap();

        assert!(matches!(
            service.refresh(&record.value, "127.0.0.1", "agent"),
            Err(AuthApiError::TokenExpired)
        ));
        // Lazy purge removed the record.
        assert!(store.find_refresh_token(&record.value).unwrap().is_none());
        // Subsequent presentation no longer resolves at all.
        assert!(matches!(
            service.refresh(&record.value, "127.0.0.1", "agent"),
            Err(AuthApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_repeated_bad_tokens_hit_rate_limit() {
        let (service, _store, _user, _temp) = service(Arc::new(NeverRotate));
        let bogus = "cd".repeat(32);

        for _ in 0..3 {
            assert!(matches!(
                service.refresh(&bogus, "6.6.6.6", "agent"),
                Err(AuthApiError::TokenInvalid)
            ));
        }
        // Limiter configured at 3 attempts: the next call is refused
        // before any token lookup happens.
        assert!(matches!(
            service.refresh(&bogus, "6.6.6.6", "agent"),
            Err(AuthApiError::RateLimited { .. })
        ));
        // Another client IP is unaffected.
        assert!(matches!(
            service.refresh(&bogus, "7.7.7.7", "agent"),
            Err(AuthApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_refresh_outcomes_are_audited() {
        let (service, store, user, _temp) = service(Arc::new(AlwaysRotate));
        let record = login(&service, &store, &user);
        service
            .refresh(&record.value, "127.0.0.1", "agent")
            .unwrap();

        let events = store.get_security_events(&user.id, 10, 0).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == SecurityEventType::TokenRotated));
    }
}
