//! Link repository (`profile_links`)
//!
//! `raw_profile_id` is UNIQUE in the table, so a second link for the same
//! observation fails at the store instead of silently duplicating.

use super::uuid_column;
use crate::models::{MatchRule, ProfileLink};
use cdp_common::{time, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

pub async fn insert(conn: &mut SqliteConnection, link: &ProfileLink) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO profile_links (raw_profile_id, master_profile_id, match_rule, matched_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(link.raw_profile_id.to_string())
    .bind(link.master_profile_id.to_string())
    .bind(link.match_rule.as_str())
    .bind(time::to_db(&link.matched_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn find_by_raw(conn: &mut SqliteConnection, raw_profile_id: Uuid) -> Result<Option<ProfileLink>> {
    let row = sqlx::query(
        "SELECT raw_profile_id, master_profile_id, match_rule, matched_at FROM profile_links WHERE raw_profile_id = ?",
    )
    .bind(raw_profile_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_link).transpose()
}

/// Every observation folded into a master, in link order
pub async fn list_for_master(conn: &mut SqliteConnection, master_profile_id: Uuid) -> Result<Vec<ProfileLink>> {
    let rows = sqlx::query(
        r#"
        SELECT raw_profile_id, master_profile_id, match_rule, matched_at
        FROM profile_links
        WHERE master_profile_id = ?
        ORDER BY link_id ASC
        "#,
    )
    .bind(master_profile_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_link).collect()
}

fn row_to_link(row: &SqliteRow) -> Result<ProfileLink> {
    let rule: String = row.try_get("match_rule")?;
    let matched_at: String = row.try_get("matched_at")?;

    Ok(ProfileLink {
        raw_profile_id: uuid_column(row, "raw_profile_id")?,
        master_profile_id: uuid_column(row, "master_profile_id")?,
        match_rule: rule.parse::<MatchRule>()?,
        matched_at: time::from_db(&matched_at)?,
    })
}
