//! Security-event audit logging
//! Mission: Best-effort append-only audit trail plus derived account stats

use crate::auth::models::{SecurityEvent, SecurityEventType, SecurityStats, User};
use crate::auth::store::AuthStore;
use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Maximum events returned per page.
pub const MAX_EVENT_PAGE: u32 = 100;

// Fixed score penalties (see compute_security_stats).
const FAILED_ATTEMPT_PENALTY: u32 = 5;
const FAILED_ATTEMPT_CAP: u32 = 25;
const MANY_SESSIONS_PENALTY: u32 = 10;
const UNVERIFIED_EMAIL_PENALTY: u32 = 15;
const LOCKOUT_HISTORY_PENALTY: u32 = 20;

/// Append-only audit logger over the store.
pub struct SecurityEventLogger {
    store: Arc<AuthStore>,
}

impl SecurityEventLogger {
    pub fn new(store: Arc<AuthStore>) -> Self {
        Self { store }
    }

    /// Record an event. Failures are swallowed after a warning: an audit
    /// write must never mask the caller's primary error or fail a request
    /// that otherwise succeeded.
    pub fn log(&self, event: SecurityEvent) {
        if let Err(err) = self.store.log_security_event(&event) {
            warn!(
                event_type = event.event_type.as_str(),
                error = %err,
                "Failed to record security event"
            );
        }
    }

    /// Page through a user's events, most recent first. `limit` is clamped
    /// to [`MAX_EVENT_PAGE`].
    pub fn query(&self, user_id: &Uuid, limit: u32, offset: u32) -> Result<Vec<SecurityEvent>> {
        let limit = limit.clamp(1, MAX_EVENT_PAGE);
        self.store.get_security_events(user_id, limit, offset)
    }

    /// Heuristic account-security snapshot.
    ///
    /// The score starts at 100 and takes fixed deductions: recent failed
    /// attempts (capped), more than 5 active sessions, an unverified email,
    /// and an accumulated run of lockout-triggering attempts. Clamped to
    /// [0, 100].
    pub fn compute_security_stats(
        &self,
        user: &User,
        lockout_threshold: u32,
    ) -> Result<SecurityStats> {
        let now = Utc::now();
        let successful_logins_7d = self.store.count_events_since(
            &user.id,
            SecurityEventType::LoginSuccess,
            now - Duration::days(7),
        )?;
        let failed_attempts_24h = self.store.count_events_since(
            &user.id,
            SecurityEventType::LoginFailed,
            now - Duration::hours(24),
        )?;
        let active_sessions = self.store.count_active_sessions(&user.id)?;

        let mut deductions: u32 = 0;
        if failed_attempts_24h > 0 {
            deductions += (failed_attempts_24h * FAILED_ATTEMPT_PENALTY).min(FAILED_ATTEMPT_CAP);
        }
        if active_sessions > 5 {
            deductions += MANY_SESSIONS_PENALTY;
        }
        if !user.email_verified {
            deductions += UNVERIFIED_EMAIL_PENALTY;
        }
        if user.login_attempts >= lockout_threshold {
            deductions += LOCKOUT_HISTORY_PENALTY;
        }

        let security_score = 100u32.saturating_sub(deductions).min(100) as u8;

        Ok(SecurityStats {
            successful_logins_7d,
            failed_attempts_24h,
            active_sessions,
            security_score,
        })
    }
}
