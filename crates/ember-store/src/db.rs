use rusqlite::Connection;

use crate::error::Result;

/// Initialise every table this crate owns, plus the contractual indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id           TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            deleted_at   TEXT
        );

        CREATE TABLE IF NOT EXISTS bot_configs (
            tenant_id              TEXT PRIMARY KEY,
            interval_mode          TEXT NOT NULL DEFAULT 'manual',
            fixed_interval_minutes INTEGER NOT NULL DEFAULT 30,
            random_min_minutes     INTEGER NOT NULL DEFAULT 15,
            random_max_minutes     INTEGER NOT NULL DEFAULT 45,
            ai_model               TEXT NOT NULL DEFAULT 'gpt-4o-mini',
            ai_prompt_template     TEXT NOT NULL DEFAULT '',
            ai_temperature         INTEGER NOT NULL DEFAULT 10,
            chat_keywords          TEXT NOT NULL DEFAULT '[]',
            banned_words           TEXT NOT NULL DEFAULT '[]',
            active_platforms       TEXT NOT NULL DEFAULT '[]',
            is_active              INTEGER NOT NULL DEFAULT 0,
            last_posted_at         TEXT
        );

        CREATE TABLE IF NOT EXISTS platform_connections (
            tenant_id           TEXT NOT NULL,
            platform            TEXT NOT NULL,
            platform_user_id    TEXT NOT NULL,
            platform_username   TEXT NOT NULL,
            access_token_cipher TEXT NOT NULL,
            refresh_token_cipher TEXT,
            token_expires_at    TEXT,
            connected           INTEGER NOT NULL DEFAULT 1,
            last_connected_at   TEXT,
            connection_data     TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (tenant_id, platform)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_connections_tenant_platform
            ON platform_connections(tenant_id, platform);

        CREATE TABLE IF NOT EXISTS custom_commands (
            id               TEXT PRIMARY KEY,
            tenant_id        TEXT NOT NULL,
            name             TEXT NOT NULL,
            response         TEXT NOT NULL,
            cooldown_seconds INTEGER NOT NULL DEFAULT 30,
            is_active        INTEGER NOT NULL DEFAULT 1,
            usage_count      INTEGER NOT NULL DEFAULT 0,
            permission_level TEXT NOT NULL DEFAULT 'everyone',
            UNIQUE (tenant_id, name)
        );

        CREATE TABLE IF NOT EXISTS moderation_rules (
            tenant_id          TEXT NOT NULL,
            rule_type          TEXT NOT NULL,
            enabled            INTEGER NOT NULL DEFAULT 0,
            action             TEXT NOT NULL DEFAULT 'warn',
            severity_threshold TEXT NOT NULL DEFAULT 'medium',
            timeout_seconds    INTEGER NOT NULL DEFAULT 300,
            PRIMARY KEY (tenant_id, rule_type)
        );

        CREATE TABLE IF NOT EXISTS link_whitelist (
            tenant_id TEXT NOT NULL,
            domain    TEXT NOT NULL,
            PRIMARY KEY (tenant_id, domain)
        );

        CREATE TABLE IF NOT EXISTS giveaways (
            id                    TEXT PRIMARY KEY,
            tenant_id             TEXT NOT NULL,
            title                 TEXT NOT NULL,
            keyword               TEXT NOT NULL,
            requires_subscription INTEGER NOT NULL DEFAULT 0,
            max_winners           INTEGER NOT NULL DEFAULT 1,
            started_at            TEXT NOT NULL,
            ended_at              TEXT,
            status                TEXT NOT NULL DEFAULT 'active'
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_giveaways_one_active
            ON giveaways(tenant_id) WHERE status = 'active';

        CREATE TABLE IF NOT EXISTS giveaway_entries (
            giveaway_id   TEXT NOT NULL,
            username      TEXT NOT NULL,
            platform      TEXT NOT NULL,
            is_subscriber INTEGER NOT NULL DEFAULT 0,
            entered_at    TEXT NOT NULL,
            PRIMARY KEY (giveaway_id, username, platform)
        );

        CREATE TABLE IF NOT EXISTS user_balances (
            tenant_id TEXT NOT NULL,
            username  TEXT NOT NULL,
            platform  TEXT NOT NULL,
            balance   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (tenant_id, username, platform)
        );

        CREATE TABLE IF NOT EXISTS currency_transactions (
            id         TEXT PRIMARY KEY,
            tenant_id  TEXT NOT NULL,
            username   TEXT NOT NULL,
            platform   TEXT NOT NULL,
            delta      INTEGER NOT NULL,
            reason     TEXT NOT NULL,
            kind       TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_currency_tx_user
            ON currency_transactions(tenant_id, username, platform);

        CREATE TABLE IF NOT EXISTS currency_settings (
            tenant_id        TEXT PRIMARY KEY,
            enabled          INTEGER NOT NULL DEFAULT 0,
            currency_name    TEXT NOT NULL DEFAULT 'points',
            earn_per_message INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS game_settings (
            tenant_id        TEXT PRIMARY KEY,
            enabled          INTEGER NOT NULL DEFAULT 1,
            cooldown_minutes INTEGER NOT NULL DEFAULT 2,
            trivia_points    INTEGER NOT NULL DEFAULT 50
        );

        CREATE TABLE IF NOT EXISTS shoutout_settings (
            tenant_id             TEXT PRIMARY KEY,
            enabled               INTEGER NOT NULL DEFAULT 1,
            auto_shoutout_on_raid INTEGER NOT NULL DEFAULT 0,
            template              TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS alert_settings (
            tenant_id           TEXT PRIMARY KEY,
            notify_token_expiry INTEGER NOT NULL DEFAULT 1,
            notify_errors       INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS event_outbox (
            tenant_id TEXT NOT NULL,
            seq       INTEGER NOT NULL,
            kind      TEXT NOT NULL,
            payload   TEXT NOT NULL,
            acked     INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (tenant_id, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_unacked
            ON event_outbox(tenant_id, acked, seq);",
    )?;
    Ok(())
}
