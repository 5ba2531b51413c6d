use chrono::{DateTime, Utc};
use tracing::debug;

use ember_core::types::{Platform, TenantId};

use crate::error::{Result, StoreError};
use crate::store::{parse_ts, Store};
use crate::types::{
    AlertSettings, BotConfig, CurrencySettings, GameSettings, IntervalMode, ShoutoutSettings,
};

impl Store {
    /// Fetch the tenant's bot config, falling back to defaults when the
    /// tenant has never saved one.
    pub fn bot_config(&self, tenant: &TenantId) -> Result<BotConfig> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT interval_mode, fixed_interval_minutes, random_min_minutes,
                    random_max_minutes, ai_model, ai_prompt_template, ai_temperature,
                    chat_keywords, banned_words, active_platforms, is_active, last_posted_at
             FROM bot_configs WHERE tenant_id = ?1",
            rusqlite::params![tenant.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, u8>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, bool>(10)?,
                    row.get::<_, Option<String>>(11)?,
                ))
            },
        ) {
            Ok((
                mode,
                fixed,
                rand_min,
                rand_max,
                ai_model,
                ai_prompt_template,
                ai_temperature,
                keywords_json,
                banned_json,
                platforms_json,
                is_active,
                last_posted_at,
            )) => Ok(BotConfig {
                tenant_id: tenant.clone(),
                interval_mode: mode.parse().unwrap_or(IntervalMode::Manual),
                fixed_interval_minutes: fixed,
                random_min_minutes: rand_min,
                random_max_minutes: rand_max,
                ai_model,
                ai_prompt_template,
                ai_temperature,
                chat_keywords: serde_json::from_str(&keywords_json)?,
                banned_words: serde_json::from_str(&banned_json)?,
                active_platforms: parse_platforms(&platforms_json)?,
                is_active,
                last_posted_at: parse_ts(last_posted_at),
            }),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Ok(BotConfig::defaults(tenant.clone()))
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Upsert the bot config, enforcing the random-interval invariant.
    pub fn save_bot_config(&self, config: &BotConfig) -> Result<()> {
        if config.interval_mode == IntervalMode::Random {
            if config.random_min_minutes == 0 || config.random_max_minutes == 0 {
                return Err(StoreError::Validation(
                    "random interval bounds must be positive".to_string(),
                ));
            }
            if config.random_min_minutes > config.random_max_minutes {
                return Err(StoreError::Validation(format!(
                    "random interval min {} exceeds max {}",
                    config.random_min_minutes, config.random_max_minutes
                )));
            }
        }

        let platforms: Vec<&str> = config
            .active_platforms
            .iter()
            .map(|p| p.as_str())
            .collect();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO bot_configs
             (tenant_id, interval_mode, fixed_interval_minutes, random_min_minutes,
              random_max_minutes, ai_model, ai_prompt_template, ai_temperature,
              chat_keywords, banned_words, active_platforms, is_active, last_posted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
             ON CONFLICT(tenant_id) DO UPDATE SET
               interval_mode=?2, fixed_interval_minutes=?3, random_min_minutes=?4,
               random_max_minutes=?5, ai_model=?6, ai_prompt_template=?7,
               ai_temperature=?8, chat_keywords=?9, banned_words=?10,
               active_platforms=?11, is_active=?12, last_posted_at=?13",
            rusqlite::params![
                config.tenant_id.as_str(),
                config.interval_mode.as_str(),
                config.fixed_interval_minutes,
                config.random_min_minutes,
                config.random_max_minutes,
                config.ai_model,
                config.ai_prompt_template,
                config.ai_temperature,
                serde_json::to_string(&config.chat_keywords)?,
                serde_json::to_string(&config.banned_words)?,
                serde_json::to_string(&platforms)?,
                config.is_active,
                config.last_posted_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        debug!(tenant = %config.tenant_id, "bot config saved");
        Ok(())
    }

    /// Tenants whose bot is flagged active — started on process boot.
    pub fn active_tenant_ids(&self) -> Result<Vec<TenantId>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT bc.tenant_id FROM bot_configs bc
             JOIN tenants t ON t.id = bc.tenant_id
             WHERE bc.is_active = 1 AND t.deleted_at IS NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).map(TenantId::from).collect())
    }

    pub fn set_last_posted(&self, tenant: &TenantId, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE bot_configs SET last_posted_at = ?1 WHERE tenant_id = ?2",
            rusqlite::params![at.to_rfc3339(), tenant.as_str()],
        )?;
        Ok(())
    }

    pub fn currency_settings(&self, tenant: &TenantId) -> Result<CurrencySettings> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT enabled, currency_name, earn_per_message
             FROM currency_settings WHERE tenant_id = ?1",
            rusqlite::params![tenant.as_str()],
            |row| {
                Ok(CurrencySettings {
                    tenant_id: tenant.clone(),
                    enabled: row.get(0)?,
                    currency_name: row.get(1)?,
                    earn_per_message: row.get(2)?,
                })
            },
        ) {
            Ok(s) => Ok(s),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Ok(CurrencySettings::defaults(tenant.clone()))
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn save_currency_settings(&self, s: &CurrencySettings) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO currency_settings (tenant_id, enabled, currency_name, earn_per_message)
             VALUES (?1,?2,?3,?4)
             ON CONFLICT(tenant_id) DO UPDATE SET
               enabled=?2, currency_name=?3, earn_per_message=?4",
            rusqlite::params![s.tenant_id.as_str(), s.enabled, s.currency_name, s.earn_per_message],
        )?;
        Ok(())
    }

    pub fn game_settings(&self, tenant: &TenantId) -> Result<GameSettings> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT enabled, cooldown_minutes, trivia_points
             FROM game_settings WHERE tenant_id = ?1",
            rusqlite::params![tenant.as_str()],
            |row| {
                Ok(GameSettings {
                    tenant_id: tenant.clone(),
                    enabled: row.get(0)?,
                    cooldown_minutes: row.get(1)?,
                    trivia_points: row.get(2)?,
                })
            },
        ) {
            Ok(s) => Ok(s),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(GameSettings::defaults(tenant.clone())),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn save_game_settings(&self, s: &GameSettings) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO game_settings (tenant_id, enabled, cooldown_minutes, trivia_points)
             VALUES (?1,?2,?3,?4)
             ON CONFLICT(tenant_id) DO UPDATE SET
               enabled=?2, cooldown_minutes=?3, trivia_points=?4",
            rusqlite::params![s.tenant_id.as_str(), s.enabled, s.cooldown_minutes, s.trivia_points],
        )?;
        Ok(())
    }

    pub fn shoutout_settings(&self, tenant: &TenantId) -> Result<ShoutoutSettings> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT enabled, auto_shoutout_on_raid, template
             FROM shoutout_settings WHERE tenant_id = ?1",
            rusqlite::params![tenant.as_str()],
            |row| {
                Ok(ShoutoutSettings {
                    tenant_id: tenant.clone(),
                    enabled: row.get(0)?,
                    auto_shoutout_on_raid: row.get(1)?,
                    template: row.get(2)?,
                })
            },
        ) {
            Ok(mut s) => {
                if s.template.is_empty() {
                    s.template = ShoutoutSettings::defaults(tenant.clone()).template;
                }
                Ok(s)
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Ok(ShoutoutSettings::defaults(tenant.clone()))
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn save_shoutout_settings(&self, s: &ShoutoutSettings) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO shoutout_settings (tenant_id, enabled, auto_shoutout_on_raid, template)
             VALUES (?1,?2,?3,?4)
             ON CONFLICT(tenant_id) DO UPDATE SET
               enabled=?2, auto_shoutout_on_raid=?3, template=?4",
            rusqlite::params![
                s.tenant_id.as_str(),
                s.enabled,
                s.auto_shoutout_on_raid,
                s.template
            ],
        )?;
        Ok(())
    }

    pub fn alert_settings(&self, tenant: &TenantId) -> Result<AlertSettings> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT notify_token_expiry, notify_errors FROM alert_settings WHERE tenant_id = ?1",
            rusqlite::params![tenant.as_str()],
            |row| {
                Ok(AlertSettings {
                    tenant_id: tenant.clone(),
                    notify_token_expiry: row.get(0)?,
                    notify_errors: row.get(1)?,
                })
            },
        ) {
            Ok(s) => Ok(s),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Ok(AlertSettings::defaults(tenant.clone()))
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

fn parse_platforms(json: &str) -> Result<Vec<Platform>> {
    let raw: Vec<String> = serde_json::from_str(json)?;
    Ok(raw.iter().filter_map(|s| s.parse().ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_returns_defaults() {
        let store = Store::open_in_memory().unwrap();
        let config = store.bot_config(&TenantId::from("t1")).unwrap();
        assert_eq!(config.interval_mode, IntervalMode::Manual);
        assert!(!config.is_active);
    }

    #[test]
    fn config_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let mut config = BotConfig::defaults(tenant.clone());
        config.interval_mode = IntervalMode::Fixed;
        config.fixed_interval_minutes = 12;
        config.chat_keywords = vec!["fact".into(), "bot".into()];
        config.banned_words = vec!["badword".into()];
        config.active_platforms = vec![Platform::Twitch, Platform::Kick];
        config.is_active = true;
        store.save_bot_config(&config).unwrap();

        let loaded = store.bot_config(&tenant).unwrap();
        assert_eq!(loaded.interval_mode, IntervalMode::Fixed);
        assert_eq!(loaded.fixed_interval_minutes, 12);
        assert_eq!(loaded.chat_keywords, vec!["fact", "bot"]);
        assert_eq!(loaded.active_platforms, vec![Platform::Twitch, Platform::Kick]);
        assert!(loaded.is_active);
    }

    #[test]
    fn random_interval_invariant_enforced() {
        let store = Store::open_in_memory().unwrap();
        let mut config = BotConfig::defaults(TenantId::from("t1"));
        config.interval_mode = IntervalMode::Random;
        config.random_min_minutes = 10;
        config.random_max_minutes = 5;
        assert!(matches!(
            store.save_bot_config(&config),
            Err(StoreError::Validation(_))
        ));

        config.random_min_minutes = 0;
        config.random_max_minutes = 5;
        assert!(store.save_bot_config(&config).is_err());

        config.random_min_minutes = 2;
        config.random_max_minutes = 4;
        assert!(store.save_bot_config(&config).is_ok());
    }

    #[test]
    fn settings_default_and_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");

        let defaults = store.currency_settings(&tenant).unwrap();
        assert!(!defaults.enabled);

        let mut s = defaults;
        s.enabled = true;
        s.earn_per_message = 5;
        s.currency_name = "embers".into();
        store.save_currency_settings(&s).unwrap();
        let loaded = store.currency_settings(&tenant).unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.earn_per_message, 5);
        assert_eq!(loaded.currency_name, "embers");
    }
}
