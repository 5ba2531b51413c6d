use chrono::Utc;
use tracing::info;

use ember_core::types::TenantId;

use crate::error::{Result, StoreError};
use crate::store::{parse_ts, Store};
use crate::types::Tenant;

impl Store {
    /// Create a tenant. The id is supplied by the signup flow.
    pub fn create_tenant(&self, id: &TenantId, display_name: &str) -> Result<Tenant> {
        let now = Utc::now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tenants (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id.as_str(), display_name, now.to_rfc3339()],
        )?;
        info!(tenant = %id, "tenant created");
        Ok(Tenant {
            id: id.clone(),
            display_name: display_name.to_string(),
            created_at: now,
            deleted_at: None,
        })
    }

    pub fn get_tenant(&self, id: &TenantId) -> Result<Option<Tenant>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, display_name, created_at, deleted_at FROM tenants WHERE id = ?1",
            rusqlite::params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        ) {
            Ok((id, display_name, created_at, deleted_at)) => Ok(Some(Tenant {
                id: TenantId::from(id),
                display_name,
                created_at: parse_ts(Some(created_at)).unwrap_or_else(Utc::now),
                deleted_at: parse_ts(deleted_at),
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Soft-delete a tenant and cascade: connections flip to disconnected,
    /// the bot config deactivates. Rows are kept for audit.
    pub fn soft_delete_tenant(&self, id: &TenantId) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE tenants SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![now, id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("tenant {}", id)));
        }
        db.execute(
            "UPDATE platform_connections SET connected = 0 WHERE tenant_id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        db.execute(
            "UPDATE bot_configs SET is_active = 0 WHERE tenant_id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        info!(tenant = %id, "tenant soft-deleted");
        Ok(())
    }

    /// A tenant may run only when it exists and is not soft-deleted.
    pub fn tenant_is_live(&self, id: &TenantId) -> Result<bool> {
        Ok(self
            .get_tenant(id)?
            .map(|t| t.deleted_at.is_none())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch() {
        let store = Store::open_in_memory().unwrap();
        let id = TenantId::from("t1");
        store.create_tenant(&id, "Alice").unwrap();
        let t = store.get_tenant(&id).unwrap().unwrap();
        assert_eq!(t.display_name, "Alice");
        assert!(t.deleted_at.is_none());
        assert!(store.tenant_is_live(&id).unwrap());
    }

    #[test]
    fn soft_delete_cascades() {
        let store = Store::open_in_memory().unwrap();
        let id = TenantId::from("t1");
        store.create_tenant(&id, "Alice").unwrap();
        store.soft_delete_tenant(&id).unwrap();
        assert!(!store.tenant_is_live(&id).unwrap());
        // second delete is an error, not a silent no-op
        assert!(store.soft_delete_tenant(&id).is_err());
    }

    #[test]
    fn unknown_tenant_is_not_live() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.tenant_is_live(&TenantId::from("ghost")).unwrap());
    }
}
