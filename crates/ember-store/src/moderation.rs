use ember_core::types::TenantId;

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{ModAction, ModerationRule, RuleType, Severity};

impl Store {
    /// Enabled rules for a tenant in the contractual evaluation order
    /// (toxic, spam, links, caps, symbols).
    pub fn enabled_rules(&self, tenant: &TenantId) -> Result<Vec<ModerationRule>> {
        let all = self.moderation_rules(tenant)?;
        Ok(RuleType::ordered()
            .into_iter()
            .filter_map(|rt| {
                all.iter()
                    .find(|r| r.rule_type == rt && r.enabled)
                    .cloned()
            })
            .collect())
    }

    pub fn moderation_rules(&self, tenant: &TenantId) -> Result<Vec<ModerationRule>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT rule_type, enabled, action, severity_threshold, timeout_seconds
             FROM moderation_rules WHERE tenant_id = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(rule_type, enabled, action, threshold, timeout)| {
                Some(ModerationRule {
                    tenant_id: tenant.clone(),
                    rule_type: rule_type.parse().ok()?,
                    enabled,
                    action: action.parse().unwrap_or(ModAction::Warn),
                    severity_threshold: threshold.parse().unwrap_or(Severity::Medium),
                    timeout_seconds: timeout,
                })
            })
            .collect())
    }

    pub fn save_moderation_rule(&self, rule: &ModerationRule) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO moderation_rules
             (tenant_id, rule_type, enabled, action, severity_threshold, timeout_seconds)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(tenant_id, rule_type) DO UPDATE SET
               enabled=?3, action=?4, severity_threshold=?5, timeout_seconds=?6",
            rusqlite::params![
                rule.tenant_id.as_str(),
                rule.rule_type.as_str(),
                rule.enabled,
                rule.action.as_str(),
                rule.severity_threshold.as_str(),
                rule.timeout_seconds,
            ],
        )?;
        Ok(())
    }

    /// Whitelisted domains, stored normalized (lowercase, no leading www).
    pub fn link_whitelist(&self, tenant: &TenantId) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT domain FROM link_whitelist WHERE tenant_id = ?1 ORDER BY domain",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn add_whitelist_domain(&self, tenant: &TenantId, domain: &str) -> Result<()> {
        let normalized = normalize_domain(domain);
        if normalized.is_empty() {
            return Err(StoreError::Validation(format!("bad domain: {}", domain)));
        }
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO link_whitelist (tenant_id, domain) VALUES (?1, ?2)",
            rusqlite::params![tenant.as_str(), normalized],
        )?;
        Ok(())
    }

    pub fn remove_whitelist_domain(&self, tenant: &TenantId, domain: &str) -> Result<()> {
        let normalized = normalize_domain(domain);
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "DELETE FROM link_whitelist WHERE tenant_id = ?1 AND domain = ?2",
            rusqlite::params![tenant.as_str(), normalized],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("domain {}", normalized)));
        }
        Ok(())
    }
}

/// Lowercase and strip a single leading `www.` — the same normalization the
/// link classifier applies to extracted URLs.
pub fn normalize_domain(domain: &str) -> String {
    let lower = domain.trim().trim_end_matches('.').to_lowercase();
    lower.strip_prefix("www.").unwrap_or(&lower).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_come_back_in_contract_order() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        // Insert out of order; only enabled rules should come back, ordered.
        for (rule_type, enabled) in [
            (RuleType::Symbols, true),
            (RuleType::Toxic, true),
            (RuleType::Caps, false),
            (RuleType::Links, true),
        ] {
            store
                .save_moderation_rule(&ModerationRule {
                    tenant_id: tenant.clone(),
                    rule_type,
                    enabled,
                    action: ModAction::Warn,
                    severity_threshold: Severity::Medium,
                    timeout_seconds: 300,
                })
                .unwrap();
        }

        let enabled: Vec<RuleType> = store
            .enabled_rules(&tenant)
            .unwrap()
            .into_iter()
            .map(|r| r.rule_type)
            .collect();
        assert_eq!(enabled, vec![RuleType::Toxic, RuleType::Links, RuleType::Symbols]);
    }

    #[test]
    fn whitelist_normalizes_domains() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        store.add_whitelist_domain(&tenant, "WWW.Twitch.TV").unwrap();
        store.add_whitelist_domain(&tenant, "twitch.tv").unwrap(); // dedupe
        assert_eq!(store.link_whitelist(&tenant).unwrap(), vec!["twitch.tv"]);
    }

    #[test]
    fn normalize_domain_cases() {
        assert_eq!(normalize_domain("WWW.Example.COM"), "example.com");
        assert_eq!(normalize_domain("example.com."), "example.com");
        assert_eq!(normalize_domain("clips.twitch.tv"), "clips.twitch.tv");
    }
}
