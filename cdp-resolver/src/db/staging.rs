//! Staging repository (`raw_profiles_stage`)
//!
//! Append/upsert only. A second observation for the same
//! `(tenant_id, web_visitor_id)` overwrites the stored snapshot and re-queues
//! the row; rows are never deleted and `processed_at` is only ever set by
//! [`claim`].

use super::{attributes_from_row, bind_attributes, uuid_column, ATTRIBUTE_COLUMNS, ATTRIBUTE_PLACEHOLDERS};
use crate::models::{ChannelMetadata, ProfileObservation, RawProfileObservation, TimeWindow};
use cdp_common::{time, uuid_utils, Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

fn select_columns() -> String {
    format!(
        "raw_profile_id, tenant_id, web_visitor_id, visitor_id_derived, {}, \
         utm_source, utm_medium, utm_campaign, utm_term, utm_content, referrer, \
         ext_attributes, source_system, received_at, processed_at",
        ATTRIBUTE_COLUMNS
    )
}

/// Insert or overwrite one staged observation.
///
/// On a visitor-key conflict every attribute, the channel metadata, the source
/// and `received_at` are replaced and `processed_at` is cleared, so the next
/// pass folds the new snapshot into the master the row is already linked to.
/// `raw_profile_id` is kept.
pub async fn upsert(
    conn: &mut SqliteConnection,
    observation: &ProfileObservation,
    received_at: DateTime<Utc>,
) -> Result<RawProfileObservation> {
    let ext_attributes = encode_ext_attributes(&observation.ext_attributes)?;

    let sql = format!(
        r#"
        INSERT INTO raw_profiles_stage (
            raw_profile_id, tenant_id, web_visitor_id, visitor_id_derived, {columns},
            utm_source, utm_medium, utm_campaign, utm_term, utm_content, referrer,
            ext_attributes, source_system, received_at
        ) VALUES (?, ?, ?, ?, {placeholders}, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tenant_id, web_visitor_id) DO UPDATE SET
            visitor_id_derived = excluded.visitor_id_derived,
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            email = excluded.email,
            phone_number = excluded.phone_number,
            date_of_birth = excluded.date_of_birth,
            gender = excluded.gender,
            address_line1 = excluded.address_line1,
            address_line2 = excluded.address_line2,
            city = excluded.city,
            state = excluded.state,
            zip_code = excluded.zip_code,
            country = excluded.country,
            crm_contact_id = excluded.crm_contact_id,
            social_user_id = excluded.social_user_id,
            utm_source = excluded.utm_source,
            utm_medium = excluded.utm_medium,
            utm_campaign = excluded.utm_campaign,
            utm_term = excluded.utm_term,
            utm_content = excluded.utm_content,
            referrer = excluded.referrer,
            ext_attributes = excluded.ext_attributes,
            source_system = excluded.source_system,
            received_at = excluded.received_at,
            processed_at = NULL
        RETURNING {select}
        "#,
        columns = ATTRIBUTE_COLUMNS,
        placeholders = ATTRIBUTE_PLACEHOLDERS,
        select = select_columns(),
    );

    let channel = &observation.channel;
    let query = sqlx::query(&sql)
        .bind(uuid_utils::generate().to_string())
        .bind(&observation.tenant_id)
        .bind(&observation.web_visitor_id)
        .bind(observation.visitor_id_derived);
    let row = bind_attributes(query, &observation.attributes)
        .bind(&channel.utm_source)
        .bind(&channel.utm_medium)
        .bind(&channel.utm_campaign)
        .bind(&channel.utm_term)
        .bind(&channel.utm_content)
        .bind(&channel.referrer)
        .bind(ext_attributes)
        .bind(&observation.source_system)
        .bind(time::to_db(&received_at))
        .fetch_one(&mut *conn)
        .await?;

    row_to_observation(&row)
}

/// Load one staged row
pub async fn load(conn: &mut SqliteConnection, raw_profile_id: Uuid) -> Result<Option<RawProfileObservation>> {
    let sql = format!("SELECT {} FROM raw_profiles_stage WHERE raw_profile_id = ?", select_columns());
    let row = sqlx::query(&sql)
        .bind(raw_profile_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_observation).transpose()
}

/// Unresolved rows, oldest `received_at` first, optionally scoped by tenant and window
pub async fn fetch_unresolved(
    conn: &mut SqliteConnection,
    tenant_id: Option<&str>,
    window: Option<&TimeWindow>,
    limit: usize,
) -> Result<Vec<RawProfileObservation>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM raw_profiles_stage
        WHERE processed_at IS NULL
          AND (? IS NULL OR tenant_id = ?)
          AND (? IS NULL OR received_at >= ?)
          AND (? IS NULL OR received_at < ?)
        ORDER BY received_at ASC, rowid ASC
        LIMIT ?
        "#,
        select_columns()
    );

    let start = window.map(|w| time::to_db(&w.start));
    let end = window.map(|w| time::to_db(&w.end));
    let limit = i64::try_from(limit).map_err(|_| Error::InvalidInput(format!("batch size too large: {}", limit)))?;

    let rows = sqlx::query(&sql)
        .bind(tenant_id)
        .bind(tenant_id)
        .bind(&start)
        .bind(&start)
        .bind(&end)
        .bind(&end)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(row_to_observation).collect()
}

/// Stamp `processed_at` if nobody else has.
///
/// Returns `false` when the row was already resolved, i.e. another runner won
/// the claim. Must run in the same transaction as the link insert.
pub async fn claim(conn: &mut SqliteConnection, raw_profile_id: Uuid, processed_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE raw_profiles_stage SET processed_at = ? WHERE raw_profile_id = ? AND processed_at IS NULL",
    )
    .bind(time::to_db(&processed_at))
    .bind(raw_profile_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Count unresolved rows, optionally for one tenant
pub async fn count_unresolved(conn: &mut SqliteConnection, tenant_id: Option<&str>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM raw_profiles_stage WHERE processed_at IS NULL AND (? IS NULL OR tenant_id = ?)",
    )
    .bind(tenant_id)
    .bind(tenant_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

fn encode_ext_attributes(ext: &Map<String, Value>) -> Result<Option<String>> {
    if ext.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(ext)
        .map(Some)
        .map_err(|e| Error::Internal(format!("Failed to encode ext_attributes: {}", e)))
}

fn decode_ext_attributes(raw: Option<String>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| Error::Internal(format!("Corrupt ext_attributes JSON: {}", e))),
    }
}

fn row_to_observation(row: &SqliteRow) -> Result<RawProfileObservation> {
    let received_at: String = row.try_get("received_at")?;

    Ok(RawProfileObservation {
        raw_profile_id: uuid_column(row, "raw_profile_id")?,
        tenant_id: row.try_get("tenant_id")?,
        web_visitor_id: row.try_get("web_visitor_id")?,
        visitor_id_derived: row.try_get("visitor_id_derived")?,
        attributes: attributes_from_row(row)?,
        channel: ChannelMetadata {
            utm_source: row.try_get("utm_source")?,
            utm_medium: row.try_get("utm_medium")?,
            utm_campaign: row.try_get("utm_campaign")?,
            utm_term: row.try_get("utm_term")?,
            utm_content: row.try_get("utm_content")?,
            referrer: row.try_get("referrer")?,
        },
        ext_attributes: decode_ext_attributes(row.try_get("ext_attributes")?)?,
        source_system: row.try_get("source_system")?,
        received_at: time::from_db(&received_at)?,
        processed_at: time::from_db_opt(row.try_get("processed_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_common::db::init_memory_database;
    use chrono::Duration;

    fn visitor(tenant: &str, visid: &str, phone: &str) -> ProfileObservation {
        let mut obs = ProfileObservation::new(tenant, "website");
        obs.web_visitor_id = Some(visid.to_string());
        obs.attributes.phone_number = Some(phone.to_string());
        obs
    }

    #[tokio::test]
    async fn upsert_overwrites_same_visitor() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let first = upsert(&mut conn, &visitor("demo", "v-1", "0961111111"), time::now()).await.unwrap();

        let mut second_obs = visitor("demo", "v-1", "0962222222");
        second_obs.attributes.first_name = Some("Lan".to_string());
        second_obs.source_system = "crm".to_string();
        let second = upsert(&mut conn, &second_obs, time::now()).await.unwrap();

        assert_eq!(first.raw_profile_id, second.raw_profile_id);
        assert_eq!(second.attributes.phone_number.as_deref(), Some("0962222222"));
        assert_eq!(second.attributes.first_name.as_deref(), Some("Lan"));
        assert_eq!(second.source_system, "crm");
        assert_eq!(count_unresolved(&mut conn, Some("demo")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_visitor_in_other_tenant_is_separate() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        upsert(&mut conn, &visitor("a", "v-1", "0961111111"), time::now()).await.unwrap();
        upsert(&mut conn, &visitor("b", "v-1", "0961111111"), time::now()).await.unwrap();

        assert_eq!(count_unresolved(&mut conn, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rows_without_visitor_never_collide() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut obs = ProfileObservation::new("demo", "crm");
        obs.attributes.email = Some("an@example.com".to_string());
        upsert(&mut conn, &obs, time::now()).await.unwrap();
        upsert(&mut conn, &obs, time::now()).await.unwrap();

        assert_eq!(count_unresolved(&mut conn, Some("demo")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn claim_is_set_once() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let row = upsert(&mut conn, &visitor("demo", "v-1", "0961111111"), time::now()).await.unwrap();

        assert!(claim(&mut conn, row.raw_profile_id, time::now()).await.unwrap());
        assert!(!claim(&mut conn, row.raw_profile_id, time::now()).await.unwrap());
        assert!(load(&mut conn, row.raw_profile_id).await.unwrap().unwrap().is_resolved());
    }

    #[tokio::test]
    async fn reingest_after_resolution_requeues_row() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let row = upsert(&mut conn, &visitor("demo", "v-1", "0961111111"), time::now()).await.unwrap();
        claim(&mut conn, row.raw_profile_id, time::now()).await.unwrap();
        assert_eq!(count_unresolved(&mut conn, Some("demo")).await.unwrap(), 0);

        let again = upsert(&mut conn, &visitor("demo", "v-1", "0963333333"), time::now()).await.unwrap();
        assert_eq!(again.raw_profile_id, row.raw_profile_id);
        assert!(!again.is_resolved());
        assert_eq!(again.attributes.phone_number.as_deref(), Some("0963333333"));
        assert_eq!(count_unresolved(&mut conn, Some("demo")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fetch_unresolved_orders_and_filters() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let base = time::now();

        upsert(&mut conn, &visitor("demo", "late", "0961111111"), base).await.unwrap();
        upsert(&mut conn, &visitor("demo", "early", "0962222222"), base - Duration::seconds(30)).await.unwrap();
        upsert(&mut conn, &visitor("other", "x", "0963333333"), base - Duration::seconds(10)).await.unwrap();

        let all = fetch_unresolved(&mut conn, None, None, 10).await.unwrap();
        let order: Vec<_> = all.iter().map(|r| r.web_visitor_id.clone().unwrap()).collect();
        assert_eq!(order, vec!["early", "x", "late"]);

        let demo = fetch_unresolved(&mut conn, Some("demo"), None, 10).await.unwrap();
        assert_eq!(demo.len(), 2);

        let window = TimeWindow::ending_at(base, Duration::seconds(15)).unwrap();
        let windowed = fetch_unresolved(&mut conn, None, Some(&window), 10).await.unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].web_visitor_id.as_deref(), Some("x"));

        let limited = fetch_unresolved(&mut conn, None, None, 1).await.unwrap();
        assert_eq!(limited[0].web_visitor_id.as_deref(), Some("early"));
    }

    #[tokio::test]
    async fn ext_attributes_round_trip_as_json() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut obs = visitor("demo", "v-1", "0961111111");
        obs.ext_attributes.insert("loyalty_level".to_string(), Value::String("gold".to_string()));
        let row = upsert(&mut conn, &obs, time::now()).await.unwrap();

        assert_eq!(row.ext_attributes, obs.ext_attributes);
    }
}
