//! Database initialization
//!
//! Creates the connection pool and the three resolution tables:
//! - `raw_profiles_stage`: normalized observations awaiting resolution
//! - `master_profiles`: canonical merged profiles
//! - `profile_links`: which observation resolved to which master, and how

use crate::config::DatabaseConfig;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Open (creating if needed) the configured database and ensure the schema exists
pub async fn init_database(config: &DatabaseConfig) -> Result<SqlitePool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| Error::Config("Database URL not configured".to_string()))?;

    let in_memory = url.contains(":memory:") || url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    // WAL allows concurrent readers alongside the single writer
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // Every in-memory connection is its own database, so pin the pool to one
    let max_connections = if in_memory { 1 } else { config.max_connections };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(if in_memory { 1 } else { 0 })
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
        .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
        .connect_with(options)
        .await?;

    info!(
        url = %config.redacted_url(),
        max_connections,
        busy_timeout_ms = config.busy_timeout_ms,
        "Database connection pool established"
    );

    // Health check before any schema work
    let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await?;
    if one != 1 {
        return Err(Error::Internal("Database health check (SELECT 1) failed".to_string()));
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Private in-memory database with the full schema (tests, dry runs)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let config = DatabaseConfig {
        url: Some("sqlite::memory:".to_string()),
        ..Default::default()
    };
    init_database(&config).await
}

/// Create all tables and indexes (idempotent - safe to call multiple times)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_raw_profiles_stage_table(pool).await?;
    create_master_profiles_table(pool).await?;
    create_profile_links_table(pool).await?;

    info!("Database tables initialized (raw_profiles_stage, master_profiles, profile_links)");
    Ok(())
}

async fn create_raw_profiles_stage_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_profiles_stage (
            raw_profile_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL CHECK (length(tenant_id) BETWEEN 1 AND 36),
            web_visitor_id TEXT,
            visitor_id_derived INTEGER NOT NULL DEFAULT 0,
            first_name TEXT,
            last_name TEXT,
            email TEXT,
            phone_number TEXT,
            date_of_birth TEXT,
            gender TEXT,
            address_line1 TEXT,
            address_line2 TEXT,
            city TEXT,
            state TEXT,
            zip_code TEXT,
            country TEXT,
            crm_contact_id TEXT,
            social_user_id TEXT,
            utm_source TEXT,
            utm_medium TEXT,
            utm_campaign TEXT,
            utm_term TEXT,
            utm_content TEXT,
            referrer TEXT,
            ext_attributes TEXT,
            source_system TEXT NOT NULL DEFAULT 'unknown',
            received_at TEXT NOT NULL,
            processed_at TEXT,
            UNIQUE (tenant_id, web_visitor_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_raw_profiles_stage_unresolved
        ON raw_profiles_stage (processed_at, received_at)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_master_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS master_profiles (
            master_profile_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            first_name TEXT,
            last_name TEXT,
            email TEXT,
            phone_number TEXT,
            date_of_birth TEXT,
            gender TEXT,
            address_line1 TEXT,
            address_line2 TEXT,
            city TEXT,
            state TEXT,
            zip_code TEXT,
            country TEXT,
            crm_contact_id TEXT,
            social_user_id TEXT,
            -- normalized lookup keys for the fuzzy prefilter
            city_key TEXT,
            name_key TEXT,
            source_systems TEXT NOT NULL DEFAULT '[]',
            first_seen_raw_profile_id TEXT NOT NULL,
            created_by_pass TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            notified_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (name, columns) in [
        ("idx_master_profiles_phone", "tenant_id, phone_number"),
        ("idx_master_profiles_email", "tenant_id, email"),
        ("idx_master_profiles_dob", "tenant_id, date_of_birth"),
        ("idx_master_profiles_city", "tenant_id, city_key"),
        ("idx_master_profiles_name", "tenant_id, name_key"),
        ("idx_master_profiles_notify", "notified_at, updated_at"),
    ] {
        let sql = format!("CREATE INDEX IF NOT EXISTS {} ON master_profiles ({})", name, columns);
        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}

async fn create_profile_links_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profile_links (
            link_id INTEGER PRIMARY KEY AUTOINCREMENT,
            raw_profile_id TEXT NOT NULL UNIQUE
                REFERENCES raw_profiles_stage(raw_profile_id),
            master_profile_id TEXT NOT NULL
                REFERENCES master_profiles(master_profile_id),
            match_rule TEXT NOT NULL
                CHECK (match_rule IN ('NewMaster', 'ExactMatch', 'FuzzyMatch')),
            matched_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_profile_links_master ON profile_links (master_profile_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
