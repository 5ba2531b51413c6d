use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use ember_core::types::{Platform, TenantId};

use crate::error::{Result, TokenError};
use crate::types::{AlertType, ExpiryAlert, OAuthSession, RotationType, TokenRotation};

/// OAuth handshake TTL.
const OAUTH_SESSION_TTL_MINUTES: i64 = 10;

/// Initialise the token-lifecycle tables.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS oauth_sessions (
            state         TEXT PRIMARY KEY,
            tenant_id     TEXT NOT NULL,
            platform      TEXT NOT NULL,
            code_verifier TEXT NOT NULL,
            expires_at    TEXT NOT NULL,
            used_at       TEXT,
            ip_address    TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_oauth_sessions_state
            ON oauth_sessions(state);
        CREATE INDEX IF NOT EXISTS idx_oauth_sessions_expiry
            ON oauth_sessions(expires_at);

        CREATE TABLE IF NOT EXISTS token_rotation_history (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id           TEXT NOT NULL,
            platform            TEXT NOT NULL,
            rotation_type       TEXT NOT NULL,
            previous_expires_at TEXT,
            new_expires_at      TEXT,
            success             INTEGER NOT NULL,
            error_message       TEXT,
            rotated_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rotation_tenant
            ON token_rotation_history(tenant_id, platform, rotated_at);

        CREATE TABLE IF NOT EXISTS token_expiry_alerts (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id        TEXT NOT NULL,
            platform         TEXT NOT NULL,
            alert_type       TEXT NOT NULL,
            token_expires_at TEXT,
            notified         INTEGER NOT NULL DEFAULT 0,
            acknowledged     INTEGER NOT NULL DEFAULT 0,
            raised_at        TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_one_active
            ON token_expiry_alerts(tenant_id, platform, alert_type)
            WHERE acknowledged = 0;",
    )?;
    Ok(())
}

/// Persistence for OAuth handshakes, rotation history, and expiry alerts.
pub struct TokenStore {
    db: Mutex<Connection>,
}

impl TokenStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Persist a new handshake with the contractual 10-minute TTL.
    pub fn create_oauth_session(
        &self,
        state: &str,
        tenant: &TenantId,
        platform: Platform,
        code_verifier: &str,
        ip_address: Option<&str>,
    ) -> Result<OAuthSession> {
        let expires_at = Utc::now() + Duration::minutes(OAUTH_SESSION_TTL_MINUTES);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO oauth_sessions
             (state, tenant_id, platform, code_verifier, expires_at, ip_address)
             VALUES (?1,?2,?3,?4,?5,?6)",
            rusqlite::params![
                state,
                tenant.as_str(),
                platform.as_str(),
                code_verifier,
                expires_at.to_rfc3339(),
                ip_address,
            ],
        )?;
        debug!(tenant = %tenant, platform = %platform, "oauth session created");
        Ok(OAuthSession {
            state: state.to_string(),
            tenant_id: tenant.clone(),
            platform,
            code_verifier: code_verifier.to_string(),
            expires_at,
            used_at: None,
            ip_address: ip_address.map(String::from),
        })
    }

    /// Atomically consume a handshake by state.
    ///
    /// The UPDATE only applies while `used_at IS NULL AND expires_at > now`,
    /// so of two concurrent callbacks exactly one wins; the loser is
    /// classified as replay / expired / unknown.
    pub fn consume_oauth_session(&self, state: &str) -> Result<OAuthSession> {
        let now = Utc::now();
        let db = self.db.lock().unwrap();
        let claimed = db.execute(
            "UPDATE oauth_sessions SET used_at = ?1
             WHERE state = ?2 AND used_at IS NULL AND expires_at > ?1",
            rusqlite::params![now.to_rfc3339(), state],
        )?;

        if claimed == 0 {
            // Classify the refusal for the caller's error response.
            return match db.query_row(
                "SELECT used_at, expires_at FROM oauth_sessions WHERE state = ?1",
                rusqlite::params![state],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                },
            ) {
                Ok((Some(_), _)) => {
                    warn!(state = %redact(state), "oauth replay detected");
                    Err(TokenError::Replay)
                }
                Ok((None, _)) => Err(TokenError::SessionExpired),
                Err(rusqlite::Error::QueryReturnedNoRows) => Err(TokenError::UnknownState),
                Err(e) => Err(TokenError::Database(e)),
            };
        }

        db.query_row(
            "SELECT tenant_id, platform, code_verifier, expires_at, used_at, ip_address
             FROM oauth_sessions WHERE state = ?1",
            rusqlite::params![state],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .map_err(TokenError::Database)
        .and_then(|(tenant, platform, verifier, expires, used, ip)| {
            Ok(OAuthSession {
                state: state.to_string(),
                tenant_id: TenantId::from(tenant),
                platform: platform
                    .parse()
                    .map_err(TokenError::Parse)?,
                code_verifier: verifier,
                expires_at: parse_ts(&expires)?,
                used_at: used.as_deref().map(parse_ts).transpose()?,
                ip_address: ip,
            })
        })
    }

    /// Drop handshakes past their TTL. Run from the periodic sweep.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let removed = db.execute(
            "DELETE FROM oauth_sessions WHERE expires_at <= ?1",
            rusqlite::params![Utc::now().to_rfc3339()],
        )?;
        if removed > 0 {
            debug!(removed, "expired oauth sessions pruned");
        }
        Ok(removed)
    }

    /// Append one rotation-history row.
    pub fn record_rotation(&self, rotation: &TokenRotation) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO token_rotation_history
             (tenant_id, platform, rotation_type, previous_expires_at,
              new_expires_at, success, error_message, rotated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            rusqlite::params![
                rotation.tenant_id.as_str(),
                rotation.platform.as_str(),
                rotation.rotation_type.as_str(),
                rotation.previous_expires_at.map(|dt| dt.to_rfc3339()),
                rotation.new_expires_at.map(|dt| dt.to_rfc3339()),
                rotation.success,
                rotation.error_message,
                rotation.rotated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn rotation_history(&self, tenant: &TenantId, platform: Platform) -> Result<Vec<TokenRotation>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT rotation_type, previous_expires_at, new_expires_at,
                    success, error_message, rotated_at
             FROM token_rotation_history
             WHERE tenant_id = ?1 AND platform = ?2 ORDER BY rotated_at",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![tenant.as_str(), platform.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(rtype, prev, next, success, err, at)| {
                Some(TokenRotation {
                    tenant_id: tenant.clone(),
                    platform,
                    rotation_type: match rtype.as_str() {
                        "scheduled" => RotationType::Scheduled,
                        "on_error" => RotationType::OnError,
                        "manual" => RotationType::Manual,
                        "expiry_warning" => RotationType::ExpiryWarning,
                        _ => return None,
                    },
                    previous_expires_at: prev.as_deref().and_then(|s| parse_ts(s).ok()),
                    new_expires_at: next.as_deref().and_then(|s| parse_ts(s).ok()),
                    success,
                    error_message: err,
                    rotated_at: parse_ts(&at).ok()?,
                })
            })
            .collect())
    }

    /// Raise an alert. Idempotent per (tenant, platform, type) while an
    /// unacknowledged row exists — enforced by the partial unique index.
    pub fn raise_alert(
        &self,
        tenant: &TenantId,
        platform: Platform,
        alert_type: AlertType,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO token_expiry_alerts
             (tenant_id, platform, alert_type, token_expires_at, raised_at)
             VALUES (?1,?2,?3,?4,?5)",
            rusqlite::params![
                tenant.as_str(),
                platform.as_str(),
                alert_type.as_str(),
                token_expires_at.map(|dt| dt.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted > 0 {
            info!(tenant = %tenant, platform = %platform, alert = alert_type.as_str(), "token alert raised");
        }
        Ok(inserted > 0)
    }

    pub fn acknowledge_alerts(
        &self,
        tenant: &TenantId,
        platform: Platform,
        alert_type: Option<AlertType>,
    ) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let changed = match alert_type {
            Some(t) => db.execute(
                "UPDATE token_expiry_alerts SET acknowledged = 1
                 WHERE tenant_id = ?1 AND platform = ?2 AND alert_type = ?3 AND acknowledged = 0",
                rusqlite::params![tenant.as_str(), platform.as_str(), t.as_str()],
            )?,
            None => db.execute(
                "UPDATE token_expiry_alerts SET acknowledged = 1
                 WHERE tenant_id = ?1 AND platform = ?2 AND acknowledged = 0",
                rusqlite::params![tenant.as_str(), platform.as_str()],
            )?,
        };
        Ok(changed)
    }

    /// Unacknowledged alerts for one tenant, oldest first.
    pub fn active_alerts(&self, tenant: &TenantId) -> Result<Vec<ExpiryAlert>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT platform, alert_type, token_expires_at, notified, raised_at
             FROM token_expiry_alerts
             WHERE tenant_id = ?1 AND acknowledged = 0 ORDER BY raised_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(platform, alert, expires, notified, raised)| {
                Some(ExpiryAlert {
                    tenant_id: tenant.clone(),
                    platform: platform.parse().ok()?,
                    alert_type: alert.parse().ok()?,
                    token_expires_at: expires.as_deref().and_then(|s| parse_ts(s).ok()),
                    notified,
                    acknowledged: false,
                    raised_at: parse_ts(&raised).ok()?,
                })
            })
            .collect())
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TokenError::Parse(e.to_string()))
}

/// States are secrets until consumed — log only a prefix.
fn redact(state: &str) -> String {
    let prefix: String = state.chars().take(8).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_succeeds_exactly_once() {
        let store = TokenStore::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store
            .create_oauth_session("state-1", &tenant, Platform::Twitch, "verifier", None)
            .unwrap();

        let session = store.consume_oauth_session("state-1").unwrap();
        assert_eq!(session.tenant_id, tenant);
        assert_eq!(session.platform, Platform::Twitch);
        assert!(session.used_at.is_some());

        // second consume observes the replay
        assert!(matches!(
            store.consume_oauth_session("state-1"),
            Err(TokenError::Replay)
        ));
    }

    #[test]
    fn unknown_state_is_distinguished() {
        let store = TokenStore::open_in_memory().unwrap();
        assert!(matches!(
            store.consume_oauth_session("nope"),
            Err(TokenError::UnknownState)
        ));
    }

    #[test]
    fn cleanup_prunes_expired_sessions() {
        let store = TokenStore::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store
            .create_oauth_session("fresh", &tenant, Platform::Twitch, "v", None)
            .unwrap();
        // Backdate one session past its TTL.
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "INSERT INTO oauth_sessions (state, tenant_id, platform, code_verifier, expires_at)
                 VALUES ('stale', 't1', 'twitch', 'v', ?1)",
                rusqlite::params![(Utc::now() - Duration::minutes(1)).to_rfc3339()],
            )
            .unwrap();
        }
        assert_eq!(store.cleanup_expired_sessions().unwrap(), 1);
        assert!(matches!(
            store.consume_oauth_session("stale"),
            Err(TokenError::UnknownState)
        ));
        assert!(store.consume_oauth_session("fresh").is_ok());
    }

    #[test]
    fn expired_session_refuses_consume() {
        let store = TokenStore::open_in_memory().unwrap();
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "INSERT INTO oauth_sessions (state, tenant_id, platform, code_verifier, expires_at)
                 VALUES ('old', 't1', 'twitch', 'v', ?1)",
                rusqlite::params![(Utc::now() - Duration::minutes(1)).to_rfc3339()],
            )
            .unwrap();
        }
        assert!(matches!(
            store.consume_oauth_session("old"),
            Err(TokenError::SessionExpired)
        ));
    }

    #[test]
    fn alerts_idempotent_until_acknowledged() {
        let store = TokenStore::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");

        assert!(store
            .raise_alert(&tenant, Platform::Twitch, AlertType::Warning24h, None)
            .unwrap());
        // duplicate while unacknowledged — suppressed
        assert!(!store
            .raise_alert(&tenant, Platform::Twitch, AlertType::Warning24h, None)
            .unwrap());
        // a different type still raises
        assert!(store
            .raise_alert(&tenant, Platform::Twitch, AlertType::Warning1h, None)
            .unwrap());
        assert_eq!(store.active_alerts(&tenant).unwrap().len(), 2);

        store
            .acknowledge_alerts(&tenant, Platform::Twitch, Some(AlertType::Warning24h))
            .unwrap();
        // after acknowledgement the same type may fire again
        assert!(store
            .raise_alert(&tenant, Platform::Twitch, AlertType::Warning24h, None)
            .unwrap());
    }

    #[test]
    fn rotation_history_is_append_only() {
        let store = TokenStore::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        for success in [true, false] {
            store
                .record_rotation(&TokenRotation {
                    tenant_id: tenant.clone(),
                    platform: Platform::Twitch,
                    rotation_type: RotationType::Scheduled,
                    previous_expires_at: None,
                    new_expires_at: None,
                    success,
                    error_message: (!success).then(|| "invalid_grant".to_string()),
                    rotated_at: Utc::now(),
                })
                .unwrap();
        }
        let history = store.rotation_history(&tenant, Platform::Twitch).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].success);
        assert!(!history[1].success);
    }
}
