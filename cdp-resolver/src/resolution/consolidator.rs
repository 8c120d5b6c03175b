//! Master profile consolidation
//!
//! Merge rule per scalar attribute: a present incoming value overwrites, an
//! absent one leaves the master's value alone. `source_systems` only grows and
//! `first_seen_raw_profile_id` never changes after creation.

use crate::models::{MasterProfile, ProfileAttributes, RawProfileObservation};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

fn latest(existing: &Option<String>, incoming: &Option<String>) -> Option<String> {
    incoming.clone().or_else(|| existing.clone())
}

/// Field-wise "latest non-null wins"
pub fn merge_attributes(existing: &ProfileAttributes, incoming: &ProfileAttributes) -> ProfileAttributes {
    ProfileAttributes {
        first_name: latest(&existing.first_name, &incoming.first_name),
        last_name: latest(&existing.last_name, &incoming.last_name),
        email: latest(&existing.email, &incoming.email),
        phone_number: latest(&existing.phone_number, &incoming.phone_number),
        date_of_birth: latest(&existing.date_of_birth, &incoming.date_of_birth),
        gender: latest(&existing.gender, &incoming.gender),
        address_line1: latest(&existing.address_line1, &incoming.address_line1),
        address_line2: latest(&existing.address_line2, &incoming.address_line2),
        city: latest(&existing.city, &incoming.city),
        state: latest(&existing.state, &incoming.state),
        zip_code: latest(&existing.zip_code, &incoming.zip_code),
        country: latest(&existing.country, &incoming.country),
        crm_contact_id: latest(&existing.crm_contact_id, &incoming.crm_contact_id),
        social_user_id: latest(&existing.social_user_id, &incoming.social_user_id),
    }
}

/// Fold a matched observation into its master
pub fn consolidate(master: &MasterProfile, observation: &RawProfileObservation, now: DateTime<Utc>) -> MasterProfile {
    let mut source_systems = master.source_systems.clone();
    source_systems.insert(observation.source_system.clone());

    MasterProfile {
        attributes: merge_attributes(&master.attributes, &observation.attributes),
        source_systems,
        updated_at: now,
        ..master.clone()
    }
}

/// New master seeded from the observation that found no match
pub fn seed_master(observation: &RawProfileObservation, pass_id: Uuid, now: DateTime<Utc>) -> MasterProfile {
    MasterProfile {
        master_profile_id: cdp_common::uuid_utils::generate(),
        tenant_id: observation.tenant_id.clone(),
        attributes: observation.attributes.clone(),
        source_systems: BTreeSet::from([observation.source_system.clone()]),
        first_seen_raw_profile_id: observation.raw_profile_id,
        created_by_pass: Some(pass_id),
        created_at: now,
        updated_at: now,
        notified_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelMetadata;
    use chrono::Duration;
    use serde_json::Map;

    fn observation(source: &str, attributes: ProfileAttributes) -> RawProfileObservation {
        RawProfileObservation {
            raw_profile_id: Uuid::new_v4(),
            tenant_id: "demo".to_string(),
            web_visitor_id: Some("v-1".to_string()),
            visitor_id_derived: false,
            attributes,
            channel: ChannelMetadata::default(),
            ext_attributes: Map::new(),
            source_system: source.to_string(),
            received_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn present_values_overwrite_absent_values_keep() {
        let existing = ProfileAttributes {
            first_name: Some("Thomas".to_string()),
            email: Some("old@example.com".to_string()),
            city: Some("Hanoi".to_string()),
            ..Default::default()
        };
        let incoming = ProfileAttributes {
            email: Some("new@example.com".to_string()),
            gender: Some("male".to_string()),
            ..Default::default()
        };

        let merged = merge_attributes(&existing, &incoming);
        assert_eq!(merged.first_name.as_deref(), Some("Thomas"));
        assert_eq!(merged.email.as_deref(), Some("new@example.com"));
        assert_eq!(merged.city.as_deref(), Some("Hanoi"));
        assert_eq!(merged.gender.as_deref(), Some("male"));
    }

    #[test]
    fn seed_then_consolidate_keeps_identity_and_grows_sources() {
        let created = Utc::now() - Duration::hours(1);
        let first = observation(
            "website",
            ProfileAttributes {
                phone_number: Some("860000316623".to_string()),
                first_name: Some("Thomas".to_string()),
                ..Default::default()
            },
        );
        let pass = Uuid::new_v4();
        let master = seed_master(&first, pass, created);

        assert_eq!(master.first_seen_raw_profile_id, first.raw_profile_id);
        assert_eq!(master.created_by_pass, Some(pass));
        assert_eq!(master.source_systems, BTreeSet::from(["website".to_string()]));

        let second = observation(
            "crm",
            ProfileAttributes {
                last_name: Some("Nguyen".to_string()),
                ..Default::default()
            },
        );
        let now = Utc::now();
        let merged = consolidate(&master, &second, now);

        assert_eq!(merged.master_profile_id, master.master_profile_id);
        assert_eq!(merged.first_seen_raw_profile_id, first.raw_profile_id);
        assert_eq!(merged.created_at, created);
        assert_eq!(merged.updated_at, now);
        assert_eq!(merged.attributes.first_name.as_deref(), Some("Thomas"));
        assert_eq!(merged.attributes.last_name.as_deref(), Some("Nguyen"));
        assert_eq!(
            merged.source_systems,
            BTreeSet::from(["crm".to_string(), "website".to_string()])
        );
    }

    #[test]
    fn repeated_source_is_not_duplicated() {
        let first = observation("website", ProfileAttributes::default());
        let master = seed_master(&first, Uuid::new_v4(), Utc::now());
        let merged = consolidate(&master, &observation("website", ProfileAttributes::default()), Utc::now());
        assert_eq!(merged.source_systems.len(), 1);
    }
}
