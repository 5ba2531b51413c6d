use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use ember_core::types::{Platform, TenantId};

use crate::error::{Result, StoreError};
use crate::store::{parse_ts, Store};
use crate::types::{Giveaway, GiveawayEntry, GiveawayStatus};

/// Outcome of an entry attempt, surfaced to chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Entered,
    AlreadyEntered,
    SubscriberOnly,
}

impl Store {
    /// Start a giveaway. Fails with `Conflict` while another is active —
    /// the partial unique index enforces this even under races.
    pub fn create_giveaway(
        &self,
        tenant: &TenantId,
        title: &str,
        keyword: &str,
        requires_subscription: bool,
        max_winners: u32,
    ) -> Result<Giveaway> {
        if keyword.trim().is_empty() {
            return Err(StoreError::Validation("giveaway keyword is empty".into()));
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO giveaways
             (id, tenant_id, title, keyword, requires_subscription, max_winners, started_at, status)
             VALUES (?1,?2,?3,?4,?5,?6,?7,'active')",
            rusqlite::params![
                id,
                tenant.as_str(),
                title,
                keyword.to_lowercase(),
                requires_subscription,
                max_winners.max(1),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict("a giveaway is already active".to_string())
            }
            other => StoreError::Database(other),
        })?;
        info!(tenant = %tenant, giveaway = %id, %keyword, "giveaway started");
        Ok(Giveaway {
            id,
            tenant_id: tenant.clone(),
            title: title.to_string(),
            keyword: keyword.to_lowercase(),
            requires_subscription,
            max_winners: max_winners.max(1),
            started_at: now,
            ended_at: None,
            status: GiveawayStatus::Active,
        })
    }

    pub fn active_giveaway(&self, tenant: &TenantId) -> Result<Option<Giveaway>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, title, keyword, requires_subscription, max_winners, started_at, ended_at, status
             FROM giveaways WHERE tenant_id = ?1 AND status = 'active'",
            rusqlite::params![tenant.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        ) {
            Ok((id, title, keyword, requires_sub, max_winners, started, ended, status)) => {
                Ok(Some(Giveaway {
                    id,
                    tenant_id: tenant.clone(),
                    title,
                    keyword,
                    requires_subscription: requires_sub,
                    max_winners,
                    started_at: parse_ts(Some(started)).unwrap_or_else(Utc::now),
                    ended_at: parse_ts(ended),
                    status: status.parse().unwrap_or(GiveawayStatus::Active),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Attempt an entry. Uniqueness on (giveaway, username, platform) makes
    /// double entries idempotent rather than erroneous.
    pub fn enter_giveaway(
        &self,
        giveaway: &Giveaway,
        username: &str,
        platform: Platform,
        is_subscriber: bool,
    ) -> Result<EntryOutcome> {
        if giveaway.requires_subscription && !is_subscriber {
            return Ok(EntryOutcome::SubscriberOnly);
        }
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO giveaway_entries
             (giveaway_id, username, platform, is_subscriber, entered_at)
             VALUES (?1,?2,?3,?4,?5)",
            rusqlite::params![
                giveaway.id,
                username.to_lowercase(),
                platform.as_str(),
                is_subscriber,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            Ok(EntryOutcome::AlreadyEntered)
        } else {
            Ok(EntryOutcome::Entered)
        }
    }

    pub fn giveaway_entries(&self, giveaway_id: &str) -> Result<Vec<GiveawayEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT username, platform, is_subscriber, entered_at
             FROM giveaway_entries WHERE giveaway_id = ?1 ORDER BY entered_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![giveaway_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(username, platform, is_subscriber, entered_at)| {
                Some(GiveawayEntry {
                    giveaway_id: giveaway_id.to_string(),
                    username,
                    platform: platform.parse().ok()?,
                    is_subscriber,
                    entered_at: parse_ts(Some(entered_at))?,
                })
            })
            .collect())
    }

    /// Draw winners uniformly at random and mark the giveaway `drawn`.
    pub fn draw_giveaway(&self, tenant: &TenantId, giveaway_id: &str) -> Result<Vec<GiveawayEntry>> {
        let winners: Vec<GiveawayEntry> = {
            let db = self.db.lock().unwrap();
            let max_winners: u32 = db.query_row(
                "SELECT max_winners FROM giveaways
                 WHERE id = ?1 AND tenant_id = ?2 AND status = 'active'",
                rusqlite::params![giveaway_id, tenant.as_str()],
                |row| row.get(0),
            ).map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("active giveaway {}", giveaway_id))
                }
                other => StoreError::Database(other),
            })?;

            let mut stmt = db.prepare(
                "SELECT username, platform, is_subscriber, entered_at
                 FROM giveaway_entries WHERE giveaway_id = ?1
                 ORDER BY RANDOM() LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![giveaway_id, max_winners], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            rows.filter_map(|r| r.ok())
                .filter_map(|(username, platform, is_subscriber, entered_at)| {
                    Some(GiveawayEntry {
                        giveaway_id: giveaway_id.to_string(),
                        username,
                        platform: platform.parse().ok()?,
                        is_subscriber,
                        entered_at: parse_ts(Some(entered_at))?,
                    })
                })
                .collect()
        };

        self.finish_giveaway(tenant, giveaway_id, GiveawayStatus::Drawn)?;
        info!(tenant = %tenant, giveaway = %giveaway_id, winners = winners.len(), "giveaway drawn");
        Ok(winners)
    }

    pub fn cancel_giveaway(&self, tenant: &TenantId, giveaway_id: &str) -> Result<()> {
        self.finish_giveaway(tenant, giveaway_id, GiveawayStatus::Cancelled)
    }

    fn finish_giveaway(
        &self,
        tenant: &TenantId,
        giveaway_id: &str,
        status: GiveawayStatus,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE giveaways SET status = ?1, ended_at = ?2
             WHERE id = ?3 AND tenant_id = ?4 AND status = 'active'",
            rusqlite::params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                giveaway_id,
                tenant.as_str()
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "active giveaway {}",
                giveaway_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_active_giveaway_per_tenant() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store.create_giveaway(&tenant, "Key drop", "!win", false, 1).unwrap();
        let second = store.create_giveaway(&tenant, "Another", "!enter", false, 1);
        assert!(matches!(second, Err(StoreError::Conflict(_))));

        // a different tenant is unaffected
        assert!(store
            .create_giveaway(&TenantId::from("t2"), "Key", "!win", false, 1)
            .is_ok());
    }

    #[test]
    fn entries_unique_per_user_platform() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let g = store.create_giveaway(&tenant, "Key", "!win", false, 1).unwrap();

        assert_eq!(
            store.enter_giveaway(&g, "Alice", Platform::Twitch, false).unwrap(),
            EntryOutcome::Entered
        );
        // same user, same platform (case-insensitive) — duplicate
        assert_eq!(
            store.enter_giveaway(&g, "alice", Platform::Twitch, false).unwrap(),
            EntryOutcome::AlreadyEntered
        );
        // same user, other platform — allowed
        assert_eq!(
            store.enter_giveaway(&g, "alice", Platform::Kick, false).unwrap(),
            EntryOutcome::Entered
        );
        assert_eq!(store.giveaway_entries(&g.id).unwrap().len(), 2);
    }

    #[test]
    fn subscriber_gate() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let g = store.create_giveaway(&tenant, "Subs only", "!win", true, 1).unwrap();
        assert_eq!(
            store.enter_giveaway(&g, "alice", Platform::Twitch, false).unwrap(),
            EntryOutcome::SubscriberOnly
        );
        assert_eq!(
            store.enter_giveaway(&g, "bob", Platform::Twitch, true).unwrap(),
            EntryOutcome::Entered
        );
    }

    #[test]
    fn draw_respects_max_winners_and_closes() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let g = store.create_giveaway(&tenant, "Key", "!win", false, 2).unwrap();
        for user in ["a", "b", "c", "d"] {
            store.enter_giveaway(&g, user, Platform::Twitch, false).unwrap();
        }
        let winners = store.draw_giveaway(&tenant, &g.id).unwrap();
        assert_eq!(winners.len(), 2);
        assert!(store.active_giveaway(&tenant).unwrap().is_none());
        // a new giveaway may now start
        assert!(store.create_giveaway(&tenant, "Next", "!go", false, 1).is_ok());
    }
}
