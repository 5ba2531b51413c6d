use chrono::{DateTime, Utc};
use tracing::{info, warn};

use ember_core::types::{Platform, TenantId};

use crate::error::{Result, StoreError};
use crate::store::{parse_ts, Store};
use crate::types::PlatformConnection;

impl Store {
    /// Create or replace the tenant's connection for one platform.
    ///
    /// The (tenant, platform) pair is the primary key, so the at-most-one
    /// invariant holds structurally.
    pub fn upsert_connection(&self, conn: &PlatformConnection) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO platform_connections
             (tenant_id, platform, platform_user_id, platform_username,
              access_token_cipher, refresh_token_cipher, token_expires_at,
              connected, last_connected_at, connection_data)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(tenant_id, platform) DO UPDATE SET
               platform_user_id=?3, platform_username=?4,
               access_token_cipher=?5, refresh_token_cipher=?6,
               token_expires_at=?7, connected=?8, last_connected_at=?9,
               connection_data=?10",
            rusqlite::params![
                conn.tenant_id.as_str(),
                conn.platform.as_str(),
                conn.platform_user_id,
                conn.platform_username,
                conn.access_token_cipher,
                conn.refresh_token_cipher,
                conn.token_expires_at.map(|dt| dt.to_rfc3339()),
                conn.connected,
                conn.last_connected_at.map(|dt| dt.to_rfc3339()),
                serde_json::to_string(&conn.connection_data)?,
            ],
        )?;
        info!(tenant = %conn.tenant_id, platform = %conn.platform, "platform connection saved");
        Ok(())
    }

    pub fn connection(
        &self,
        tenant: &TenantId,
        platform: Platform,
    ) -> Result<Option<PlatformConnection>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT platform_user_id, platform_username, access_token_cipher,
                    refresh_token_cipher, token_expires_at, connected,
                    last_connected_at, connection_data
             FROM platform_connections WHERE tenant_id = ?1 AND platform = ?2",
            rusqlite::params![tenant.as_str(), platform.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        ) {
            Ok((user_id, username, access, refresh, expires, connected, last, data)) => {
                Ok(Some(PlatformConnection {
                    tenant_id: tenant.clone(),
                    platform,
                    platform_user_id: user_id,
                    platform_username: username,
                    access_token_cipher: access,
                    refresh_token_cipher: refresh,
                    token_expires_at: parse_ts(expires),
                    connected,
                    last_connected_at: parse_ts(last),
                    connection_data: serde_json::from_str(&data).unwrap_or_default(),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// All connections for a tenant, any state.
    pub fn connections_for_tenant(&self, tenant: &TenantId) -> Result<Vec<PlatformConnection>> {
        let platforms: Vec<Platform> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT platform FROM platform_connections WHERE tenant_id = ?1 ORDER BY platform",
            )?;
            let rows = stmt.query_map(rusqlite::params![tenant.as_str()], |row| {
                row.get::<_, String>(0)
            })?;
            rows.filter_map(|r| r.ok()).filter_map(|s| s.parse().ok()).collect()
        };

        let mut out = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if let Some(conn) = self.connection(tenant, platform)? {
                out.push(conn);
            }
        }
        Ok(out)
    }

    /// Connections that can actually run (connected, with an access token),
    /// across every tenant — used by the token manager's expiry scan.
    pub fn connected_connections(&self) -> Result<Vec<(TenantId, Platform)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT tenant_id, platform FROM platform_connections WHERE connected = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(t, p)| p.parse().ok().map(|p| (TenantId::from(t), p)))
            .collect())
    }

    pub fn set_connected(&self, tenant: &TenantId, platform: Platform, connected: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE platform_connections
             SET connected = ?1,
                 last_connected_at = CASE WHEN ?1 THEN ?2 ELSE last_connected_at END
             WHERE tenant_id = ?3 AND platform = ?4",
            rusqlite::params![connected, now, tenant.as_str(), platform.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "connection {}/{}",
                tenant, platform
            )));
        }
        Ok(())
    }

    /// Rotate stored token ciphertext under an optimistic lock: the update
    /// applies only if the access-token ciphertext is still the one the
    /// caller read. A concurrent rotation loses and reports `Conflict`.
    pub fn rotate_tokens(
        &self,
        tenant: &TenantId,
        platform: Platform,
        expected_access_cipher: &str,
        new_access_cipher: &str,
        new_refresh_cipher: Option<&str>,
        new_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE platform_connections
             SET access_token_cipher = ?1,
                 refresh_token_cipher = COALESCE(?2, refresh_token_cipher),
                 token_expires_at = ?3,
                 connected = 1
             WHERE tenant_id = ?4 AND platform = ?5 AND access_token_cipher = ?6",
            rusqlite::params![
                new_access_cipher,
                new_refresh_cipher,
                new_expires_at.map(|dt| dt.to_rfc3339()),
                tenant.as_str(),
                platform.as_str(),
                expected_access_cipher,
            ],
        )?;
        if changed == 0 {
            warn!(tenant = %tenant, platform = %platform, "token rotation lost optimistic lock");
            return Err(StoreError::Conflict(format!(
                "tokens for {}/{} changed concurrently",
                tenant, platform
            )));
        }
        Ok(())
    }

    pub fn delete_connection(&self, tenant: &TenantId, platform: Platform) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "DELETE FROM platform_connections WHERE tenant_id = ?1 AND platform = ?2",
            rusqlite::params![tenant.as_str(), platform.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "connection {}/{}",
                tenant, platform
            )));
        }
        info!(tenant = %tenant, platform = %platform, "platform connection removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tenant: &str) -> PlatformConnection {
        PlatformConnection {
            tenant_id: TenantId::from(tenant),
            platform: Platform::Twitch,
            platform_user_id: "12345".into(),
            platform_username: "alice".into(),
            access_token_cipher: "cipher-a".into(),
            refresh_token_cipher: Some("cipher-r".into()),
            token_expires_at: None,
            connected: true,
            last_connected_at: None,
            connection_data: serde_json::json!({"broadcaster_id": "12345"}),
        }
    }

    #[test]
    fn at_most_one_connection_per_platform() {
        let store = Store::open_in_memory().unwrap();
        let mut conn = sample("t1");
        store.upsert_connection(&conn).unwrap();
        conn.platform_username = "alice2".into();
        store.upsert_connection(&conn).unwrap();

        let all = store.connections_for_tenant(&TenantId::from("t1")).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].platform_username, "alice2");
    }

    #[test]
    fn rotate_tokens_uses_optimistic_lock() {
        let store = Store::open_in_memory().unwrap();
        let conn = sample("t1");
        store.upsert_connection(&conn).unwrap();
        let tenant = TenantId::from("t1");

        store
            .rotate_tokens(&tenant, Platform::Twitch, "cipher-a", "cipher-b", None, None)
            .unwrap();

        // A second rotation based on the stale ciphertext must fail.
        let stale = store.rotate_tokens(&tenant, Platform::Twitch, "cipher-a", "cipher-c", None, None);
        assert!(matches!(stale, Err(StoreError::Conflict(_))));

        let loaded = store.connection(&tenant, Platform::Twitch).unwrap().unwrap();
        assert_eq!(loaded.access_token_cipher, "cipher-b");
    }

    #[test]
    fn set_connected_updates_timestamp_only_when_connecting() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_connection(&sample("t1")).unwrap();
        let tenant = TenantId::from("t1");

        store.set_connected(&tenant, Platform::Twitch, true).unwrap();
        let after_connect = store.connection(&tenant, Platform::Twitch).unwrap().unwrap();
        assert!(after_connect.last_connected_at.is_some());

        store.set_connected(&tenant, Platform::Twitch, false).unwrap();
        let after_disconnect = store.connection(&tenant, Platform::Twitch).unwrap().unwrap();
        assert!(!after_disconnect.connected);
        assert_eq!(
            after_disconnect.last_connected_at,
            after_connect.last_connected_at
        );
    }

    #[test]
    fn delete_missing_connection_errors() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .delete_connection(&TenantId::from("t1"), Platform::Kick)
            .is_err());
    }
}
