use tracing::info;
use uuid::Uuid;

use ember_core::types::{PermissionLevel, TenantId};

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::CustomCommand;

/// Normalise a command name: lowercase, `!`-prefixed.
fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    if lower.starts_with('!') {
        lower
    } else {
        format!("!{}", lower)
    }
}

impl Store {
    pub fn create_command(
        &self,
        tenant: &TenantId,
        name: &str,
        response: &str,
        cooldown_seconds: u32,
        permission_level: PermissionLevel,
    ) -> Result<CustomCommand> {
        let name = normalize_name(name);
        let id = Uuid::new_v4().to_string();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO custom_commands
             (id, tenant_id, name, response, cooldown_seconds, is_active, usage_count, permission_level)
             VALUES (?1,?2,?3,?4,?5,1,0,?6)",
            rusqlite::params![
                id,
                tenant.as_str(),
                name,
                response,
                cooldown_seconds,
                permission_level.as_str()
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(format!("command {} already exists", name))
            }
            other => StoreError::Database(other),
        })?;
        info!(tenant = %tenant, command = %name, "custom command created");
        Ok(CustomCommand {
            id,
            tenant_id: tenant.clone(),
            name,
            response: response.to_string(),
            cooldown_seconds,
            is_active: true,
            usage_count: 0,
            permission_level,
        })
    }

    /// Case-insensitive lookup by command name (with or without `!`).
    pub fn find_command(&self, tenant: &TenantId, name: &str) -> Result<Option<CustomCommand>> {
        let name = normalize_name(name);
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, name, response, cooldown_seconds, is_active, usage_count, permission_level
             FROM custom_commands WHERE tenant_id = ?1 AND name = ?2",
            rusqlite::params![tenant.as_str(), name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        ) {
            Ok((id, name, response, cooldown, is_active, usage, level)) => {
                Ok(Some(CustomCommand {
                    id,
                    tenant_id: tenant.clone(),
                    name,
                    response,
                    cooldown_seconds: cooldown,
                    is_active,
                    usage_count: usage,
                    permission_level: level.parse().unwrap_or_default(),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn list_commands(&self, tenant: &TenantId) -> Result<Vec<CustomCommand>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, response, cooldown_seconds, is_active, usage_count, permission_level
             FROM custom_commands WHERE tenant_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|(id, name, response, cooldown, is_active, usage, level)| CustomCommand {
                id,
                tenant_id: tenant.clone(),
                name,
                response,
                cooldown_seconds: cooldown,
                is_active,
                usage_count: usage,
                permission_level: level.parse().unwrap_or_default(),
            })
            .collect())
    }

    /// Post-increment the usage counter; returns the count *after* the
    /// increment (what `{count}` renders).
    pub fn increment_command_usage(&self, command_id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE custom_commands SET usage_count = usage_count + 1 WHERE id = ?1",
            rusqlite::params![command_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("command {}", command_id)));
        }
        let count = db.query_row(
            "SELECT usage_count FROM custom_commands WHERE id = ?1",
            rusqlite::params![command_id],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    pub fn set_command_active(&self, command_id: &str, active: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE custom_commands SET is_active = ?1 WHERE id = ?2",
            rusqlite::params![active, command_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("command {}", command_id)));
        }
        Ok(())
    }

    pub fn delete_command(&self, command_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "DELETE FROM custom_commands WHERE id = ?1",
            rusqlite::params![command_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("command {}", command_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_normalized_and_unique() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store
            .create_command(&tenant, "Discord", "join at ...", 30, PermissionLevel::Everyone)
            .unwrap();

        // lookup works with any casing, with or without the bang
        assert!(store.find_command(&tenant, "!DISCORD").unwrap().is_some());
        assert!(store.find_command(&tenant, "discord").unwrap().is_some());

        // duplicate (after normalization) is a conflict
        let dup = store.create_command(&tenant, "!discord", "x", 0, PermissionLevel::Everyone);
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn usage_count_post_increments() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let cmd = store
            .create_command(&tenant, "!hi", "hello", 0, PermissionLevel::Everyone)
            .unwrap();
        assert_eq!(store.increment_command_usage(&cmd.id).unwrap(), 1);
        assert_eq!(store.increment_command_usage(&cmd.id).unwrap(), 2);
    }

    #[test]
    fn commands_scoped_per_tenant() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_command(&TenantId::from("t1"), "!hi", "hello", 0, PermissionLevel::Everyone)
            .unwrap();
        assert!(store
            .find_command(&TenantId::from("t2"), "!hi")
            .unwrap()
            .is_none());
    }
}
