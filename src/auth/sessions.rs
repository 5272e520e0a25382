//! Device-session management
//! Mission: Enumerate, terminate, and bulk-revoke sessions over refresh-token records

use crate::auth::errors::AuthApiError;
use crate::auth::events::SecurityEventLogger;
use crate::auth::models::{SecurityEvent, SecurityEventType, SessionView};
use crate::auth::store::AuthStore;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// One session per refresh-token record; the record's stable random id is
/// the session id (never an array position, which shifts under concurrent
/// removals).
pub struct SessionManager {
    store: Arc<AuthStore>,
    events: Arc<SecurityEventLogger>,
}

impl SessionManager {
    pub fn new(store: Arc<AuthStore>, events: Arc<SecurityEventLogger>) -> Self {
        Self { store, events }
    }

    /// All live sessions for a user: current session first, then by
    /// recency. Expired records found along the way are purged.
    pub fn list_sessions(
        &self,
        user_id: &Uuid,
        current_token_value: &str,
    ) -> Result<Vec<SessionView>, AuthApiError> {
        let now = Utc::now();
        let mut sessions = Vec::new();

        for record in self.store.list_refresh_tokens(user_id)? {
            if !record.is_valid(now) {
                let _ = self.store.remove_refresh_token(&record.value)?;
                continue;
            }
            sessions.push(SessionView {
                id: record.id,
                device_info: record.device_info.clone(),
                ip_address: record.ip_address.clone(),
                last_active: record.created_at,
                is_current: record.value == current_token_value,
                expires_at: record.expires_at,
            });
        }

        sessions.sort_by(|a, b| {
            b.is_current
                .cmp(&a.is_current)
                .then(b.last_active.cmp(&a.last_active))
        });
        Ok(sessions)
    }

    /// Terminate one session by its stable id. The currently-used session
    /// cannot be terminated this way (use logout), and the refusal leaves
    /// the token set untouched.
    pub fn terminate_session(
        &self,
        user_id: &Uuid,
        session_id: &Uuid,
        current_token_value: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<(), AuthApiError> {
        let target = self
            .store
            .list_refresh_tokens(user_id)?
            .into_iter()
            .find(|record| record.id == *session_id)
            .ok_or(AuthApiError::NotFound("Session"))?;

        if target.value == current_token_value {
            return Err(AuthApiError::InvalidInput(
                "Cannot terminate the current session; use logout instead",
            ));
        }

        if !self.store.remove_refresh_token_by_id(user_id, session_id)? {
            // Raced with another removal of the same session.
            return Err(AuthApiError::NotFound("Session"));
        }

        self.events.log(
            SecurityEvent::new(SecurityEventType::SessionTerminated, client_ip, user_agent)
                .with_user(*user_id)
                .with_detail("sessionId", session_id.to_string())
                .with_detail("deviceInfo", target.device_info),
        );
        Ok(())
    }

    /// End the current session only.
    pub fn logout_current(
        &self,
        user_id: &Uuid,
        current_token_value: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<(), AuthApiError> {
        if !self.store.remove_refresh_token(current_token_value)? {
            return Err(AuthApiError::TokenInvalid);
        }
        self.events.log(
            SecurityEvent::new(SecurityEventType::Logout, client_ip, user_agent)
                .with_user(*user_id),
        );
        Ok(())
    }

    /// Revoke every session for the user. All previously issued refresh
    /// tokens fail from here on.
    pub fn logout_all(
        &self,
        user_id: &Uuid,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<usize, AuthApiError> {
        let revoked = self.store.remove_all_refresh_tokens(user_id)?;
        self.events.log(
            SecurityEvent::new(SecurityEventType::LogoutAll, client_ip, user_agent)
                .with_user(*user_id)
                .with_detail("sessionsRevoked", revoked),
        );
        Ok(revoked)
    }
}
