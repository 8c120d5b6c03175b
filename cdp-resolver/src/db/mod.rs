//! Repositories over the three resolution tables
//!
//! Every function takes a `&mut SqliteConnection` so the same call works on a
//! pooled connection or inside a per-row transaction.

pub mod links;
pub mod masters;
pub mod staging;

use crate::models::ProfileAttributes;
use cdp_common::{Error, Result};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};
use uuid::Uuid;

/// Attribute columns shared by `raw_profiles_stage` and `master_profiles`, in bind order
pub(crate) const ATTRIBUTE_COLUMNS: &str = "first_name, last_name, email, phone_number, date_of_birth, gender, \
     address_line1, address_line2, city, state, zip_code, country, crm_contact_id, social_user_id";

pub(crate) const ATTRIBUTE_PLACEHOLDERS: &str = "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

/// Bind the attribute columns in `ATTRIBUTE_COLUMNS` order
pub(crate) fn bind_attributes<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    attributes: &'q ProfileAttributes,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&attributes.first_name)
        .bind(&attributes.last_name)
        .bind(&attributes.email)
        .bind(&attributes.phone_number)
        .bind(&attributes.date_of_birth)
        .bind(&attributes.gender)
        .bind(&attributes.address_line1)
        .bind(&attributes.address_line2)
        .bind(&attributes.city)
        .bind(&attributes.state)
        .bind(&attributes.zip_code)
        .bind(&attributes.country)
        .bind(&attributes.crm_contact_id)
        .bind(&attributes.social_user_id)
}

pub(crate) fn attributes_from_row(row: &SqliteRow) -> Result<ProfileAttributes> {
    Ok(ProfileAttributes {
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone_number: row.try_get("phone_number")?,
        date_of_birth: row.try_get("date_of_birth")?,
        gender: row.try_get("gender")?,
        address_line1: row.try_get("address_line1")?,
        address_line2: row.try_get("address_line2")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        zip_code: row.try_get("zip_code")?,
        country: row.try_get("country")?,
        crm_contact_id: row.try_get("crm_contact_id")?,
        social_user_id: row.try_get("social_user_id")?,
    })
}

pub(crate) fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| Error::Internal(format!("Invalid UUID in {}: '{}': {}", column, raw, e)))
}

pub(crate) fn optional_uuid_column(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        Uuid::parse_str(&value)
            .map_err(|e| Error::Internal(format!("Invalid UUID in {}: '{}': {}", column, value, e)))
    })
    .transpose()
}
