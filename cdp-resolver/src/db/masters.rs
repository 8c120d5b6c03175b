//! Master repository (`master_profiles`)

use super::{attributes_from_row, bind_attributes, optional_uuid_column, uuid_column, ATTRIBUTE_COLUMNS, ATTRIBUTE_PLACEHOLDERS};
use crate::models::{MasterProfile, ProfileAttributes};
use crate::resolution::name_similarity::{city_key, name_key};
use cdp_common::{time, Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeSet;
use uuid::Uuid;

fn select_columns() -> String {
    format!(
        "master_profile_id, tenant_id, {}, source_systems, first_seen_raw_profile_id, \
         created_by_pass, created_at, updated_at, notified_at",
        ATTRIBUTE_COLUMNS
    )
}

/// Masters created by `pass` are hidden unless `pass` is `None`
const PASS_FILTER: &str = "(? IS NULL OR created_by_pass IS NULL OR created_by_pass <> ?)";

/// Candidate ordering: oldest master first, id as the final tie-break
const CANDIDATE_ORDER: &str = "ORDER BY created_at ASC, master_profile_id ASC";

pub async fn insert(conn: &mut SqliteConnection, master: &MasterProfile) -> Result<()> {
    let sql = format!(
        r#"
        INSERT INTO master_profiles (
            master_profile_id, tenant_id, {columns}, city_key, name_key, source_systems,
            first_seen_raw_profile_id, created_by_pass, created_at, updated_at, notified_at
        ) VALUES (?, ?, {placeholders}, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        columns = ATTRIBUTE_COLUMNS,
        placeholders = ATTRIBUTE_PLACEHOLDERS,
    );

    let query = sqlx::query(&sql)
        .bind(master.master_profile_id.to_string())
        .bind(&master.tenant_id);
    let (city_key, name_key) = lookup_keys(&master.attributes);
    bind_attributes(query, &master.attributes)
        .bind(city_key)
        .bind(name_key)
        .bind(encode_sources(&master.source_systems)?)
        .bind(master.first_seen_raw_profile_id.to_string())
        .bind(master.created_by_pass.map(|id| id.to_string()))
        .bind(time::to_db(&master.created_at))
        .bind(time::to_db(&master.updated_at))
        .bind(master.notified_at.as_ref().map(time::to_db))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Persist merged attributes, sources and `updated_at`.
///
/// Identity, `first_seen_raw_profile_id` and creation provenance are never
/// written here.
pub async fn update(conn: &mut SqliteConnection, master: &MasterProfile) -> Result<()> {
    let query = sqlx::query(
        r#"
        UPDATE master_profiles SET
            first_name = ?, last_name = ?, email = ?, phone_number = ?, date_of_birth = ?,
            gender = ?, address_line1 = ?, address_line2 = ?, city = ?, state = ?,
            zip_code = ?, country = ?, crm_contact_id = ?, social_user_id = ?,
            city_key = ?, name_key = ?, source_systems = ?, updated_at = ?
        WHERE master_profile_id = ?
        "#,
    );

    let (city_key, name_key) = lookup_keys(&master.attributes);
    let result = bind_attributes(query, &master.attributes)
        .bind(city_key)
        .bind(name_key)
        .bind(encode_sources(&master.source_systems)?)
        .bind(time::to_db(&master.updated_at))
        .bind(master.master_profile_id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("master profile {}", master.master_profile_id)));
    }

    Ok(())
}

pub async fn load(conn: &mut SqliteConnection, master_profile_id: Uuid) -> Result<Option<MasterProfile>> {
    let sql = format!("SELECT {} FROM master_profiles WHERE master_profile_id = ?", select_columns());
    let row = sqlx::query(&sql)
        .bind(master_profile_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_master).transpose()
}

/// Masters in `tenant_id` whose phone equals `phone`, oldest first
pub async fn find_by_phone(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    phone: &str,
    exclude_pass: Option<Uuid>,
) -> Result<Vec<MasterProfile>> {
    find_by_column(conn, "phone_number", tenant_id, phone, exclude_pass).await
}

/// Masters in `tenant_id` whose email equals `email`, oldest first
pub async fn find_by_email(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    email: &str,
    exclude_pass: Option<Uuid>,
) -> Result<Vec<MasterProfile>> {
    find_by_column(conn, "email", tenant_id, email, exclude_pass).await
}

async fn find_by_column(
    conn: &mut SqliteConnection,
    column: &'static str,
    tenant_id: &str,
    value: &str,
    exclude_pass: Option<Uuid>,
) -> Result<Vec<MasterProfile>> {
    let sql = format!(
        "SELECT {} FROM master_profiles WHERE tenant_id = ? AND {} = ? AND {} {}",
        select_columns(),
        column,
        PASS_FILTER,
        CANDIDATE_ORDER
    );
    let pass = exclude_pass.map(|id| id.to_string());

    let rows = sqlx::query(&sql)
        .bind(tenant_id)
        .bind(value)
        .bind(&pass)
        .bind(&pass)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(row_to_master).collect()
}

/// Fuzzy prefilter parameters for one observation
#[derive(Debug, Clone, Copy)]
pub struct FuzzyLookup<'a> {
    pub tenant_id: &'a str,
    pub last_name: &'a str,
    pub date_of_birth: Option<&'a str>,
    pub city: Option<&'a str>,
    /// Only load masters that share the birth date or the city
    pub require_signal: bool,
    pub exclude_pass: Option<Uuid>,
    pub limit: usize,
}

/// Prefilter for fuzzy name matching.
///
/// Candidates share the initial of the normalized last name. With
/// `require_signal`, only masters sharing the `date_of_birth` or the
/// normalized city are loaded, since nothing else can pass corroboration.
/// More than `limit` survivors are cut to the oldest `limit`, with a warning.
pub async fn find_fuzzy_candidates(conn: &mut SqliteConnection, lookup: &FuzzyLookup<'_>) -> Result<Vec<MasterProfile>> {
    let Some(name) = name_key(lookup.last_name) else {
        return Ok(Vec::new());
    };
    let city = lookup.city.and_then(city_key);
    if lookup.require_signal && lookup.date_of_birth.is_none() && city.is_none() {
        return Ok(Vec::new());
    }

    let sql = format!(
        r#"
        SELECT {}
        FROM master_profiles
        WHERE tenant_id = ?
          AND name_key = ?
          AND first_name IS NOT NULL AND last_name IS NOT NULL
          AND (? = 0
               OR (? IS NOT NULL AND date_of_birth = ?)
               OR (? IS NOT NULL AND city_key = ?))
          AND {}
        {}
        LIMIT ?
        "#,
        select_columns(),
        PASS_FILTER,
        CANDIDATE_ORDER
    );
    let pass = lookup.exclude_pass.map(|id| id.to_string());
    // One extra row tells a full result from a truncated one
    let fetch = i64::try_from(lookup.limit.saturating_add(1)).unwrap_or(i64::MAX);

    let rows = sqlx::query(&sql)
        .bind(lookup.tenant_id)
        .bind(&name)
        .bind(lookup.require_signal)
        .bind(lookup.date_of_birth)
        .bind(lookup.date_of_birth)
        .bind(&city)
        .bind(&city)
        .bind(&pass)
        .bind(&pass)
        .bind(fetch)
        .fetch_all(&mut *conn)
        .await?;

    let mut candidates = rows.iter().map(row_to_master).collect::<Result<Vec<_>>>()?;
    if candidates.len() > lookup.limit {
        tracing::warn!(
            tenant_id = %lookup.tenant_id,
            name_key = %name,
            limit = lookup.limit,
            "Fuzzy candidates truncated to the oldest masters"
        );
        candidates.truncate(lookup.limit);
    }

    Ok(candidates)
}

/// Masters changed since they were last handed downstream, oldest change first
pub async fn pending_notification(conn: &mut SqliteConnection, limit: usize) -> Result<Vec<Uuid>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = sqlx::query(
        r#"
        SELECT master_profile_id
        FROM master_profiles
        WHERE notified_at IS NULL OR updated_at > notified_at
        ORDER BY updated_at ASC, master_profile_id ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(|row| uuid_column(row, "master_profile_id")).collect()
}

pub async fn mark_notified(conn: &mut SqliteConnection, master_profile_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE master_profiles SET notified_at = ? WHERE master_profile_id = ?")
        .bind(time::to_db(&at))
        .bind(master_profile_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn count_for_tenant(conn: &mut SqliteConnection, tenant_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM master_profiles WHERE tenant_id = ?")
        .bind(tenant_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count)
}

fn lookup_keys(attributes: &ProfileAttributes) -> (Option<String>, Option<String>) {
    (
        attributes.city.as_deref().and_then(city_key),
        attributes.last_name.as_deref().and_then(name_key),
    )
}

fn encode_sources(sources: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(sources).map_err(|e| Error::Internal(format!("Failed to encode source_systems: {}", e)))
}

fn row_to_master(row: &SqliteRow) -> Result<MasterProfile> {
    let sources: String = row.try_get("source_systems")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(MasterProfile {
        master_profile_id: uuid_column(row, "master_profile_id")?,
        tenant_id: row.try_get("tenant_id")?,
        attributes: attributes_from_row(row)?,
        source_systems: serde_json::from_str(&sources)
            .map_err(|e| Error::Internal(format!("Corrupt source_systems JSON '{}': {}", sources, e)))?,
        first_seen_raw_profile_id: uuid_column(row, "first_seen_raw_profile_id")?,
        created_by_pass: optional_uuid_column(row, "created_by_pass")?,
        created_at: time::from_db(&created_at)?,
        updated_at: time::from_db(&updated_at)?,
        notified_at: time::from_db_opt(row.try_get("notified_at")?)?,
    })
}
