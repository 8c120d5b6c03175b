//! Canonical master profiles

use super::ProfileAttributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Canonical representation of one real-world individual within a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterProfile {
    pub master_profile_id: Uuid,
    pub tenant_id: String,
    pub attributes: ProfileAttributes,
    /// Every source that ever contributed; only grows
    pub source_systems: BTreeSet<String>,
    /// Observation that created this master; immutable
    pub first_seen_raw_profile_id: Uuid,
    /// Resolution pass that created this master (`None` for bulk-loaded masters)
    pub created_by_pass: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
}
