//! Persistence layer
//! Mission: Narrow repository over SQLite for users, refresh tokens, and audit events

use crate::auth::models::{
    RefreshTokenRecord, Role, SecurityEvent, SecurityEventType, User,
};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{info, warn};
use uuid::Uuid;

/// Repository over SQLite.
///
/// The `refresh_tokens` table is keyed by a stable random session id and
/// carries a UNIQUE constraint on `value`, which doubles as the
/// token-to-user reverse index: owner lookup is a single indexed query, and
/// an (astronomically unlikely) duplicate value is a hard insert error
/// instead of silent cross-user aliasing.
pub struct AuthStore {
    db_path: String,
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn map_user(row: &Row) -> rusqlite::Result<User> {
    let role_str: String = row.get(3)?;
    let lockout: Option<i64> = row.get(6)?;
    Ok(User {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
        email: row.get(1)?,
        password_hash: row.get(2)?,
        role: Role::from_str(&role_str).unwrap_or(Role::User),
        is_active: row.get::<_, i64>(4)? != 0,
        email_verified: row.get::<_, i64>(5)? != 0,
        lockout_until: lockout.map(from_ts),
        login_attempts: row.get::<_, i64>(7)? as u32,
        created_at: from_ts(row.get(8)?),
    })
}

const USER_COLUMNS: &str = "id, email, password_hash, role, is_active, email_verified, \
                            lockout_until, login_attempts, created_at";

fn map_refresh_token(row: &Row) -> rusqlite::Result<RefreshTokenRecord> {
    Ok(RefreshTokenRecord {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
        user_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap_or_default(),
        value: row.get(2)?,
        created_at: from_ts(row.get(3)?),
        expires_at: from_ts(row.get(4)?),
        ip_address: row.get(5)?,
        device_info: row.get(6)?,
    })
}

const TOKEN_COLUMNS: &str = "id, user_id, value, created_at, expires_at, ip_address, device_info";

impl AuthStore {
    /// Create a store and initialize the schema.
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                email_verified INTEGER NOT NULL DEFAULT 0,
                lockout_until INTEGER,
                login_attempts INTEGER NOT NULL DEFAULT 0,
                verification_code TEXT,
                verification_expires INTEGER,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS refresh_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                value TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                ip_address TEXT NOT NULL,
                device_info TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user
             ON refresh_tokens(user_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS security_events (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                event_type TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                details TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_security_events_user_time
             ON security_events(user_id, timestamp DESC)",
            [],
        )?;

        self.create_default_admin(&conn)?;

        Ok(())
    }

    /// Seed an admin account on first boot so the dashboard is reachable.
    fn create_default_admin(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                [],
                |row| row.get(0),
            )
            .context("Failed to check for admin users")?;

        if count == 0 {
            let password_hash =
                hash("admin123", DEFAULT_COST).context("Failed to hash password")?;
            let now = Utc::now();

            conn.execute(
                "INSERT INTO users (id, email, password_hash, role, is_active,
                                    email_verified, login_attempts, created_at)
                 VALUES (?1, ?2, ?3, 'admin', 1, 1, 0, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    "admin@tourguard.local",
                    password_hash,
                    ts(now),
                ],
            )
            .context("Failed to insert admin user")?;

            info!("Default admin user created (email: admin@tourguard.local)");
            warn!("CHANGE DEFAULT ADMIN PASSWORD IN PRODUCTION!");
        }

        Ok(())
    }

    // ---- users ----

    pub fn create_user(&self, email: &str, password: &str, role: Role) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("Failed to hash password")?;
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_lowercase(),
            password_hash,
            role,
            is_active: true,
            email_verified: false,
            lockout_until: None,
            login_attempts: 0,
            created_at: now,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, role, is_active,
                                email_verified, login_attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id.to_string(),
                user.email,
                user.password_hash,
                user.role.as_str(),
                user.is_active as i64,
                user.email_verified as i64,
                user.login_attempts as i64,
                ts(user.created_at),
            ],
        )
        .context("Failed to insert user")?;

        Ok(user)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1"
        ))?;
        match stmt.query_row(params![email.to_lowercase()], map_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_user_by_id(&self, user_id: &Uuid) -> Result<Option<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?1"
        ))?;
        match stmt.query_row(params![user_id.to_string()], map_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Owner lookup through the refresh-token index, O(1) per the UNIQUE
    /// index on `value` (never a scan over users).
    pub fn find_user_by_refresh_token(&self, value: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT u.id, u.email, u.password_hash, u.role, u.is_active,
                    u.email_verified, u.lockout_until, u.login_attempts, u.created_at
             FROM users u
             JOIN refresh_tokens rt ON rt.user_id = u.id
             WHERE rt.value = ?1",
        )?;
        match stmt.query_row(params![value], map_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn verify_password(&self, user: &User, password: &str) -> Result<bool> {
        verify(password, &user.password_hash).context("Failed to verify password")
    }

    pub fn set_active(&self, user_id: &Uuid, active: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active as i64, user_id.to_string()],
        )?;
        Ok(())
    }

    /// Atomically bump the failed-login counter; sets `lockout_until` once
    /// the threshold is crossed and returns the lockout expiry if so.
    pub fn record_login_failure(
        &self,
        user_id: &Uuid,
        max_attempts: u32,
        lockout: chrono::Duration,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE users SET login_attempts = login_attempts + 1 WHERE id = ?1",
            params![user_id.to_string()],
        )?;

        let attempts: i64 = tx.query_row(
            "SELECT login_attempts FROM users WHERE id = ?1",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;

        let locked_until = if attempts >= max_attempts as i64 {
            let until = Utc::now() + lockout;
            tx.execute(
                "UPDATE users SET lockout_until = ?1 WHERE id = ?2",
                params![ts(until), user_id.to_string()],
            )?;
            Some(until)
        } else {
            None
        };

        tx.commit()?;
        Ok(locked_until)
    }

    pub fn reset_login_attempts(&self, user_id: &Uuid) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET login_attempts = 0, lockout_until = NULL WHERE id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(())
    }

    // ---- email verification ----

    pub fn set_verification_code(
        &self,
        user_id: &Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET verification_code = ?1, verification_expires = ?2
             WHERE id = ?3",
            params![code, ts(expires_at), user_id.to_string()],
        )?;
        Ok(())
    }

    /// Consume a verification code: marks the owning account verified and
    /// clears the code in one transaction. Returns the user on success,
    /// `None` for unknown or expired codes.
    pub fn consume_verification_code(&self, code: &str) -> Result<Option<User>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = ts(Utc::now());

        let user_id: Option<String> = match tx.query_row(
            "SELECT id FROM users
             WHERE verification_code = ?1 AND verification_expires > ?2",
            params![code, now],
            |row| row.get(0),
        ) {
            Ok(id) => Some(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let Some(user_id) = user_id else {
            return Ok(None);
        };

        let updated = tx.execute(
            "UPDATE users SET email_verified = 1, verification_code = NULL,
                              verification_expires = NULL
             WHERE id = ?1 AND verification_code = ?2",
            params![user_id, code],
        )?;
        if updated == 0 {
            // Lost a race with a concurrent consumption of the same code.
            return Ok(None);
        }
        tx.commit()?;

        self.find_user_by_id(&Uuid::parse_str(&user_id).unwrap_or_default())
    }

    // ---- refresh tokens ----

    pub fn add_refresh_token(&self, record: &RefreshTokenRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO refresh_tokens (id, user_id, value, created_at,
                                         expires_at, ip_address, device_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.user_id.to_string(),
                record.value,
                ts(record.created_at),
                ts(record.expires_at),
                record.ip_address,
                record.device_info,
            ],
        )
        .context("Failed to insert refresh token")?;
        Ok(())
    }

    pub fn find_refresh_token(&self, value: &str) -> Result<Option<RefreshTokenRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE value = ?1"
        ))?;
        match stmt.query_row(params![value], map_refresh_token) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_refresh_tokens(&self, user_id: &Uuid) -> Result<Vec<RefreshTokenRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens
             WHERE user_id = ?1 ORDER BY created_at DESC"
        ))?;
        let records = stmt
            .query_map(params![user_id.to_string()], map_refresh_token)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Remove exactly the record holding `value`. Returns whether a row was
    /// removed; a `false` under concurrent rotation means another request
    /// won the race and the presented value is no longer valid.
    pub fn remove_refresh_token(&self, value: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM refresh_tokens WHERE value = ?1",
            params![value],
        )?;
        Ok(removed == 1)
    }

    /// Remove one session by its stable id, scoped to the owning user.
    pub fn remove_refresh_token_by_id(&self, user_id: &Uuid, id: &Uuid) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM refresh_tokens WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.to_string()],
        )?;
        Ok(removed == 1)
    }

    pub fn remove_all_refresh_tokens(&self, user_id: &Uuid) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM refresh_tokens WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(removed)
    }

    /// Replace `old_value` with `new_record` in one transaction. The delete
    /// and insert commit together; a zero-row delete aborts the rotation so
    /// a concurrent refresh with the same value cannot double-rotate.
    pub fn rotate_refresh_token(
        &self,
        old_value: &str,
        new_record: &RefreshTokenRecord,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM refresh_tokens WHERE value = ?1",
            params![old_value],
        )?;
        if removed == 0 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO refresh_tokens (id, user_id, value, created_at,
                                         expires_at, ip_address, device_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new_record.id.to_string(),
                new_record.user_id.to_string(),
                new_record.value,
                ts(new_record.created_at),
                ts(new_record.expires_at),
                new_record.ip_address,
                new_record.device_info,
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    pub fn count_active_sessions(&self, user_id: &Uuid) -> Result<u32> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM refresh_tokens
             WHERE user_id = ?1 AND expires_at > ?2",
            params![user_id.to_string(), ts(Utc::now())],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // ---- security events ----

    pub fn log_security_event(&self, event: &SecurityEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO security_events (id, user_id, event_type, ip_address,
                                          user_agent, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id.to_string(),
                event.user_id.map(|id| id.to_string()),
                event.event_type.as_str(),
                event.ip_address,
                event.user_agent,
                event.details.to_string(),
                ts(event.timestamp),
            ],
        )
        .context("Failed to insert security event")?;
        Ok(())
    }

    pub fn get_security_events(
        &self,
        user_id: &Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<SecurityEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, event_type, ip_address, user_agent, details, timestamp
             FROM security_events
             WHERE user_id = ?1
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let events = stmt
            .query_map(
                params![user_id.to_string(), limit as i64, offset as i64],
                |row| {
                    let user: Option<String> = row.get(1)?;
                    let type_str: String = row.get(2)?;
                    let details_str: String = row.get(5)?;
                    Ok(SecurityEvent {
                        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                        user_id: user.and_then(|u| Uuid::parse_str(&u).ok()),
                        event_type: SecurityEventType::from_str(&type_str)
                            .unwrap_or(SecurityEventType::TokenRejected),
                        ip_address: row.get(3)?,
                        user_agent: row.get(4)?,
                        details: serde_json::from_str(&details_str)
                            .unwrap_or(serde_json::Value::Null),
                        timestamp: from_ts(row.get(6)?),
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub fn count_events_since(
        &self,
        user_id: &Uuid,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM security_events
             WHERE user_id = ?1 AND event_type = ?2 AND timestamp >= ?3",
            params![user_id.to_string(), event_type.as_str(), ts(since)],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (AuthStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = AuthStore::new(db_path).unwrap();
        (store, temp_file)
    }

    fn sample_token(user_id: Uuid, value: &str) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            value: value.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::days(30),
            ip_address: "127.0.0.1".to_string(),
            device_info: "test-agent".to_string(),
        }
    }

    #[test]
    fn test_default_admin_created() {
        let (store, _temp) = create_test_store();
        let admin = store
            .find_user_by_email("admin@tourguard.local")
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.email_verified);
    }

    #[test]
    fn test_create_and_find_user() {
        let (store, _temp) = create_test_store();
        let user = store
            .create_user("Alice@Example.com", "password123", Role::User)
            .unwrap();

        // Email is normalized to lowercase.
        assert_eq!(user.email, "alice@example.com");

        let by_email = store.find_user_by_email("alice@example.com").unwrap();
        assert!(by_email.is_some());
        let by_id = store.find_user_by_id(&user.id).unwrap().unwrap();
        assert_eq!(by_id.email, user.email);
        assert!(store.verify_password(&by_id, "password123").unwrap());
        assert!(!store.verify_password(&by_id, "wrong").unwrap());
    }

    #[test]
    fn test_refresh_token_reverse_lookup() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();
        let token = sample_token(user.id, &"ab".repeat(32));
        store.add_refresh_token(&token).unwrap();

        let owner = store
            .find_user_by_refresh_token(&token.value)
            .unwrap()
            .unwrap();
        assert_eq!(owner.id, user.id);

        assert!(store
            .find_user_by_refresh_token(&"cd".repeat(32))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_remove_refresh_token_reports_whether_removed() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();
        let token = sample_token(user.id, &"ab".repeat(32));
        store.add_refresh_token(&token).unwrap();

        assert!(store.remove_refresh_token(&token.value).unwrap());
        // Second removal is a no-op and must say so.
        assert!(!store.remove_refresh_token(&token.value).unwrap());
    }

    #[test]
    fn test_rotate_refresh_token_is_all_or_nothing() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();
        let old = sample_token(user.id, &"ab".repeat(32));
        store.add_refresh_token(&old).unwrap();

        let new = sample_token(user.id, &"cd".repeat(32));
        assert!(store.rotate_refresh_token(&old.value, &new).unwrap());
        assert!(store.find_refresh_token(&old.value).unwrap().is_none());
        assert!(store.find_refresh_token(&new.value).unwrap().is_some());

        // Rotating an already-rotated value must refuse and insert nothing.
        let newer = sample_token(user.id, &"ef".repeat(32));
        assert!(!store.rotate_refresh_token(&old.value, &newer).unwrap());
        assert!(store.find_refresh_token(&newer.value).unwrap().is_none());
    }

    #[test]
    fn test_remove_all_refresh_tokens() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();
        for i in 0..3 {
            store
                .add_refresh_token(&sample_token(user.id, &format!("{i:0>64}")))
                .unwrap();
        }

        assert_eq!(store.remove_all_refresh_tokens(&user.id).unwrap(), 3);
        assert!(store.list_refresh_tokens(&user.id).unwrap().is_empty());
    }

    #[test]
    fn test_login_failure_lockout_threshold() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();
        let lockout = chrono::Duration::minutes(15);

        for _ in 0..4 {
            assert!(store
                .record_login_failure(&user.id, 5, lockout)
                .unwrap()
                .is_none());
        }
        // Fifth failure locks the account.
        let locked = store.record_login_failure(&user.id, 5, lockout).unwrap();
        assert!(locked.is_some());

        let user = store.find_user_by_id(&user.id).unwrap().unwrap();
        assert!(user.is_locked(Utc::now()));

        store.reset_login_attempts(&user.id).unwrap();
        let user = store.find_user_by_id(&user.id).unwrap().unwrap();
        assert_eq!(user.login_attempts, 0);
        assert!(!user.is_locked(Utc::now()));
    }

    #[test]
    fn test_verification_code_is_single_use() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();
        store
            .set_verification_code(&user.id, "123456", Utc::now() + chrono::Duration::hours(24))
            .unwrap();

        let verified = store.consume_verification_code("123456").unwrap().unwrap();
        assert!(verified.email_verified);

        // The code is gone after first use.
        assert!(store.consume_verification_code("123456").unwrap().is_none());
        assert!(store.consume_verification_code("000000").unwrap().is_none());
    }

    #[test]
    fn test_expired_verification_code_rejected() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();
        store
            .set_verification_code(&user.id, "123456", Utc::now() - chrono::Duration::hours(1))
            .unwrap();

        assert!(store.consume_verification_code("123456").unwrap().is_none());
    }

    #[test]
    fn test_security_events_query_recency_desc() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();

        for i in 0..5 {
            let mut event =
                SecurityEvent::new(SecurityEventType::LoginSuccess, "1.1.1.1", "ua")
                    .with_user(user.id)
                    .with_detail("seq", i);
            event.timestamp = Utc::now() - chrono::Duration::minutes(5 - i);
            store.log_security_event(&event).unwrap();
        }

        let events = store.get_security_events(&user.id, 3, 0).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].details["seq"], 4);
        assert_eq!(events[2].details["seq"], 2);

        let page2 = store.get_security_events(&user.id, 3, 3).unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(page2[0].details["seq"], 1);
    }

    #[test]
    fn test_count_events_since_filters_by_type_and_window() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("a@b.com", "pass1234", Role::User).unwrap();

        let mut old = SecurityEvent::new(SecurityEventType::LoginFailed, "1.1.1.1", "ua")
            .with_user(user.id);
        old.timestamp = Utc::now() - chrono::Duration::days(2);
        store.log_security_event(&old).unwrap();

        let recent = SecurityEvent::new(SecurityEventType::LoginFailed, "1.1.1.1", "ua")
            .with_user(user.id);
        store.log_security_event(&recent).unwrap();

        let day_ago = Utc::now() - chrono::Duration::hours(24);
        assert_eq!(
            store
                .count_events_since(&user.id, SecurityEventType::LoginFailed, day_ago)
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count_events_since(&user.id, SecurityEventType::LoginSuccess, day_ago)
                .unwrap(),
            0
        );
    }
}
