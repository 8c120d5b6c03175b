//! Staged profile observations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Contact attributes shared by staged observations and master profiles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileAttributes {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub crm_contact_id: Option<String>,
    pub social_user_id: Option<String>,
}

impl ProfileAttributes {
    /// True when at least one exact-match key (phone or email) is present
    pub fn has_contact_key(&self) -> bool {
        self.phone_number.is_some() || self.email.is_some()
    }
}

/// UTM / acquisition channel metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub referrer: Option<String>,
}

/// A normalized observation ready to be written to staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileObservation {
    pub tenant_id: String,
    /// Supplied or derived visitor identity; `None` only for direct bulk loads
    pub web_visitor_id: Option<String>,
    /// True when `web_visitor_id` was derived from contact data, not supplied
    pub visitor_id_derived: bool,
    pub attributes: ProfileAttributes,
    pub channel: ChannelMetadata,
    pub ext_attributes: Map<String, Value>,
    pub source_system: String,
}

impl ProfileObservation {
    /// Observation with only tenant and source set; used by bulk loaders and tests
    pub fn new(tenant_id: impl Into<String>, source_system: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            web_visitor_id: None,
            visitor_id_derived: false,
            attributes: ProfileAttributes::default(),
            channel: ChannelMetadata::default(),
            ext_attributes: Map::new(),
            source_system: source_system.into(),
        }
    }

    /// Staging deduplication key, when the observation has one
    pub fn dedup_key(&self) -> Option<(String, String)> {
        self.web_visitor_id
            .as_ref()
            .map(|visitor| (self.tenant_id.clone(), visitor.clone()))
    }
}

/// One staged snapshot of a person as seen by one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProfileObservation {
    pub raw_profile_id: Uuid,
    pub tenant_id: String,
    pub web_visitor_id: Option<String>,
    pub visitor_id_derived: bool,
    pub attributes: ProfileAttributes,
    pub channel: ChannelMetadata,
    pub ext_attributes: Map<String, Value>,
    pub source_system: String,
    pub received_at: DateTime<Utc>,
    /// Resolution watermark; `None` until the row has been folded into a master
    pub processed_at: Option<DateTime<Utc>>,
}

impl RawProfileObservation {
    pub fn is_resolved(&self) -> bool {
        self.processed_at.is_some()
    }
}
