use chrono::Utc;
use uuid::Uuid;

use ember_core::types::{Platform, TenantId};

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::UserBalance;

impl Store {
    /// Credit points to a user. The balance row and its ledger transaction
    /// commit atomically, keeping `balance == Σ deltas`.
    pub fn credit(
        &self,
        tenant: &TenantId,
        username: &str,
        platform: Platform,
        amount: i64,
        reason: &str,
        kind: &str,
    ) -> Result<i64> {
        if amount <= 0 {
            return Err(StoreError::Validation(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }
        self.apply_delta(tenant, username, platform, amount, reason, kind)
    }

    /// Debit points. Fails with `Validation` when funds are insufficient —
    /// the ledger never goes negative.
    pub fn debit(
        &self,
        tenant: &TenantId,
        username: &str,
        platform: Platform,
        amount: i64,
        reason: &str,
        kind: &str,
    ) -> Result<i64> {
        if amount <= 0 {
            return Err(StoreError::Validation(format!(
                "debit amount must be positive, got {}",
                amount
            )));
        }
        self.apply_delta(tenant, username, platform, -amount, reason, kind)
    }

    fn apply_delta(
        &self,
        tenant: &TenantId,
        username: &str,
        platform: Platform,
        delta: i64,
        reason: &str,
        kind: &str,
    ) -> Result<i64> {
        let username = username.to_lowercase();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        tx.execute(
            "INSERT INTO user_balances (tenant_id, username, platform, balance)
             VALUES (?1,?2,?3,0)
             ON CONFLICT(tenant_id, username, platform) DO NOTHING",
            rusqlite::params![tenant.as_str(), username, platform.as_str()],
        )?;

        let current: i64 = tx.query_row(
            "SELECT balance FROM user_balances
             WHERE tenant_id = ?1 AND username = ?2 AND platform = ?3",
            rusqlite::params![tenant.as_str(), username, platform.as_str()],
            |row| row.get(0),
        )?;
        let next = current + delta;
        if next < 0 {
            return Err(StoreError::Validation(format!(
                "insufficient funds: balance {} cannot cover {}",
                current, -delta
            )));
        }

        tx.execute(
            "UPDATE user_balances SET balance = ?1
             WHERE tenant_id = ?2 AND username = ?3 AND platform = ?4",
            rusqlite::params![next, tenant.as_str(), username, platform.as_str()],
        )?;
        tx.execute(
            "INSERT INTO currency_transactions
             (id, tenant_id, username, platform, delta, reason, kind, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                tenant.as_str(),
                username,
                platform.as_str(),
                delta,
                reason,
                kind,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(next)
    }

    pub fn balance(&self, tenant: &TenantId, username: &str, platform: Platform) -> Result<i64> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT balance FROM user_balances
             WHERE tenant_id = ?1 AND username = ?2 AND platform = ?3",
            rusqlite::params![tenant.as_str(), username.to_lowercase(), platform.as_str()],
            |row| row.get(0),
        ) {
            Ok(balance) => Ok(balance),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Top balances across all platforms for a tenant.
    pub fn leaderboard(&self, tenant: &TenantId, limit: usize) -> Result<Vec<UserBalance>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT username, platform, balance FROM user_balances
             WHERE tenant_id = ?1 AND balance > 0
             ORDER BY balance DESC, username ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str(), limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(username, platform, balance)| {
                Some(UserBalance {
                    tenant_id: tenant.clone(),
                    username,
                    platform: platform.parse().ok()?,
                    balance,
                })
            })
            .collect())
    }

    /// Signed sum of a user's ledger — equals the balance by invariant.
    /// Used by tests and consistency audits.
    pub fn ledger_sum(&self, tenant: &TenantId, username: &str, platform: Platform) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let sum: Option<i64> = db.query_row(
            "SELECT SUM(delta) FROM currency_transactions
             WHERE tenant_id = ?1 AND username = ?2 AND platform = ?3",
            rusqlite::params![tenant.as_str(), username.to_lowercase(), platform.as_str()],
            |row| row.get(0),
        )?;
        Ok(sum.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_equals_ledger_sum() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store.credit(&tenant, "alice", Platform::Twitch, 10, "chat", "earn").unwrap();
        store.credit(&tenant, "alice", Platform::Twitch, 50, "trivia", "game").unwrap();
        store.debit(&tenant, "alice", Platform::Twitch, 20, "gamble", "game").unwrap();

        let balance = store.balance(&tenant, "alice", Platform::Twitch).unwrap();
        let sum = store.ledger_sum(&tenant, "alice", Platform::Twitch).unwrap();
        assert_eq!(balance, 40);
        assert_eq!(balance, sum);
    }

    #[test]
    fn debit_cannot_overdraw() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store.credit(&tenant, "bob", Platform::Kick, 5, "chat", "earn").unwrap();
        let err = store.debit(&tenant, "bob", Platform::Kick, 6, "gamble", "game");
        assert!(matches!(err, Err(StoreError::Validation(_))));
        // failed debit leaves no ledger row behind
        assert_eq!(store.ledger_sum(&tenant, "bob", Platform::Kick).unwrap(), 5);
        assert_eq!(store.balance(&tenant, "bob", Platform::Kick).unwrap(), 5);
    }

    #[test]
    fn balances_are_per_platform() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store.credit(&tenant, "alice", Platform::Twitch, 10, "chat", "earn").unwrap();
        assert_eq!(store.balance(&tenant, "alice", Platform::Kick).unwrap(), 0);
    }

    #[test]
    fn leaderboard_orders_by_balance() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store.credit(&tenant, "alice", Platform::Twitch, 30, "chat", "earn").unwrap();
        store.credit(&tenant, "bob", Platform::Twitch, 80, "chat", "earn").unwrap();
        store.credit(&tenant, "carol", Platform::Kick, 50, "chat", "earn").unwrap();

        let board = store.leaderboard(&tenant, 2).unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].username, "bob");
        assert_eq!(board[1].username, "carol");
    }

    #[test]
    fn zero_amount_rejected() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        assert!(store.credit(&tenant, "a", Platform::Twitch, 0, "x", "y").is_err());
        assert!(store.debit(&tenant, "a", Platform::Twitch, 0, "x", "y").is_err());
    }
}
