//! Event → profile normalization
//!
//! Pure transform from a raw tracking/CRM event into a [`ProfileObservation`]:
//! - source-specific trait aliases are folded onto the canonical field names
//!   (the canonical name wins when both are present)
//! - every string is sanitized before it can reach staging
//! - phone and email are structurally validated and canonicalized
//! - the visitor identity is the supplied `visid`, or a name-based UUID derived
//!   from tenant, observer, media host, schema version, phone and email
//!
//! Absent values are never errors. A present-but-malformed phone or email is,
//! and so is an event that carries nothing to deduplicate on.

use super::contact::{canonical_email, canonical_phone};
use super::sanitize::{sanitize_json, sanitize_text};
use crate::models::{ChannelMetadata, ProfileAttributes, ProfileObservation, RawEventPayload};
use cdp_common::{uuid_utils, ValidationError};
use serde_json::{Map, Value};

/// Maximum length of tenant and visitor identifiers
pub const MAX_ID_LEN: usize = 36;

const DEFAULT_WEB_SOURCE: &str = "website";
const DEFAULT_SOURCE: &str = "unknown";

/// Canonical field name followed by its accepted aliases, in preference order
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("first_name", &["firstname", "name"]),
    ("last_name", &["lastname"]),
    ("email", &[]),
    ("phone_number", &["phone"]),
    ("date_of_birth", &["dob", "birthday"]),
    ("gender", &[]),
    ("address_line1", &["address"]),
    ("address_line2", &[]),
    ("city", &[]),
    ("state", &[]),
    ("zip_code", &["zip"]),
    ("country", &[]),
    ("crm_contact_id", &["userid", "customer_id", "crm_id"]),
    ("social_user_id", &["zalo_user_id"]),
];

/// Trait → UTM field, with the matching key under `ext_attributes.utmdata`
const UTM_FIELDS: [(&str, &str); 5] = [
    ("utm_source", "utmsource"),
    ("utm_medium", "utmmedium"),
    ("utm_campaign", "utmcampaign"),
    ("utm_term", "utmterm"),
    ("utm_content", "utmcontent"),
];

/// Trait keys consumed by normalization; everything else lands in `ext_attributes`
fn is_consumed_key(key: &str) -> bool {
    key == "source_system"
        || key == "ext_attributes"
        || key == "referrer"
        || UTM_FIELDS.iter().any(|(field, _)| *field == key)
        || FIELD_ALIASES
            .iter()
            .any(|(canonical, aliases)| *canonical == key || aliases.contains(&key))
}

/// Normalize and validate one raw event
pub fn normalize_event(payload: &RawEventPayload) -> Result<ProfileObservation, ValidationError> {
    let tenant_id = validate_tenant(&payload.tenant_id)?;
    let traits = &payload.profile_traits;

    let mut attributes = ProfileAttributes {
        first_name: resolve_trait(traits, "first_name"),
        last_name: resolve_trait(traits, "last_name"),
        email: resolve_trait(traits, "email"),
        phone_number: resolve_trait(traits, "phone_number"),
        date_of_birth: resolve_trait(traits, "date_of_birth"),
        gender: resolve_trait(traits, "gender"),
        address_line1: resolve_trait(traits, "address_line1"),
        address_line2: resolve_trait(traits, "address_line2"),
        city: resolve_trait(traits, "city"),
        state: resolve_trait(traits, "state"),
        zip_code: resolve_trait(traits, "zip_code"),
        country: resolve_trait(traits, "country"),
        crm_contact_id: resolve_trait(traits, "crm_contact_id"),
        social_user_id: resolve_trait(traits, "social_user_id"),
    };

    if let Some(raw) = attributes.phone_number.take() {
        let phone = canonical_phone(&raw)
            .map_err(|reason| ValidationError::new(&tenant_id, "phone_number", Some(raw.as_str()), reason))?;
        attributes.phone_number = Some(phone);
    }

    if let Some(raw) = attributes.email.take() {
        let email = canonical_email(&raw)
            .map_err(|reason| ValidationError::new(&tenant_id, "email", Some(raw.as_str()), reason))?;
        attributes.email = Some(email);
    }

    let visid = match payload.visid.as_deref().and_then(sanitize_text) {
        Some(visid) if visid.chars().count() > MAX_ID_LEN => {
            return Err(ValidationError::new(
                &tenant_id,
                "visid",
                Some(visid.as_str()),
                format!("visitor id longer than {} characters", MAX_ID_LEN),
            ));
        }
        other => other,
    };

    let (web_visitor_id, visitor_id_derived) = match visid {
        Some(visid) => (visid, false),
        None => (derive_visitor_id(payload, &tenant_id, &attributes)?, true),
    };

    let ext_source = traits.get("ext_attributes").and_then(Value::as_object);
    let channel = extract_channel(traits, ext_source);
    let ext_attributes = collect_ext_attributes(traits, ext_source);

    let source_system = traits
        .get("source_system")
        .and_then(scalar_to_string)
        .as_deref()
        .and_then(sanitize_text)
        .unwrap_or_else(|| {
            if visitor_id_derived {
                DEFAULT_SOURCE.to_string()
            } else {
                DEFAULT_WEB_SOURCE.to_string()
            }
        });

    Ok(ProfileObservation {
        tenant_id,
        web_visitor_id: Some(web_visitor_id),
        visitor_id_derived,
        attributes,
        channel,
        ext_attributes,
        source_system,
    })
}

fn validate_tenant(raw: &str) -> Result<String, ValidationError> {
    let tenant = sanitize_text(raw).ok_or_else(|| {
        ValidationError::new(raw, "tenant_id", Some(raw), "tenant id is required")
    })?;

    if tenant.chars().count() > MAX_ID_LEN {
        return Err(ValidationError::new(
            &tenant,
            "tenant_id",
            Some(tenant.as_str()),
            format!("tenant id longer than {} characters", MAX_ID_LEN),
        ));
    }

    Ok(tenant)
}

/// Deterministic identity for events without a client-supplied visitor id.
///
/// The key hint is phone + email; without either there is nothing stable to
/// deduplicate or merge on, which is fatal for the record.
fn derive_visitor_id(
    payload: &RawEventPayload,
    tenant_id: &str,
    attributes: &ProfileAttributes,
) -> Result<String, ValidationError> {
    if !attributes.has_contact_key() {
        return Err(ValidationError::new(
            tenant_id,
            "visid",
            None,
            "no visitor id, phone number or email to derive an identity from",
        ));
    }

    let name = [
        tenant_id,
        payload.observer_id.as_deref().unwrap_or_default(),
        payload.media_host.as_deref().unwrap_or_default(),
        payload.schema_version.as_deref().unwrap_or_default(),
        attributes.phone_number.as_deref().unwrap_or_default(),
        attributes.email.as_deref().unwrap_or_default(),
    ]
    .concat();

    Ok(uuid_utils::from_name(&name).to_string())
}

/// Look up a canonical field, falling back to its aliases in order
fn resolve_trait(traits: &Map<String, Value>, canonical: &str) -> Option<String> {
    let aliases = FIELD_ALIASES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, aliases)| *aliases)
        .unwrap_or_default();

    std::iter::once(canonical)
        .chain(aliases.iter().copied())
        .filter_map(|key| traits.get(key))
        .filter_map(scalar_to_string)
        .find_map(|raw| sanitize_text(&raw))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn extract_channel(traits: &Map<String, Value>, ext: Option<&Map<String, Value>>) -> ChannelMetadata {
    let utmdata = ext.and_then(|e| e.get("utmdata")).and_then(Value::as_object);

    let lookup = |field: &str, nested: &str| -> Option<String> {
        traits
            .get(field)
            .and_then(scalar_to_string)
            .or_else(|| utmdata.and_then(|u| u.get(nested)).and_then(scalar_to_string))
            .as_deref()
            .and_then(sanitize_text)
    };

    let [utm_source, utm_medium, utm_campaign, utm_term, utm_content] =
        UTM_FIELDS.map(|(field, nested)| lookup(field, nested));

    let referrer = traits
        .get("referrer")
        .or_else(|| ext.and_then(|e| e.get("referrer")))
        .and_then(scalar_to_string)
        .as_deref()
        .and_then(sanitize_text);

    ChannelMetadata {
        utm_source,
        utm_medium,
        utm_campaign,
        utm_term,
        utm_content,
        referrer,
    }
}

/// Supplied `ext_attributes` plus any unrecognized trait, all sanitized
fn collect_ext_attributes(
    traits: &Map<String, Value>,
    ext: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut collected = Map::new();

    if let Some(ext) = ext {
        for (key, value) in ext {
            if let Some(key) = sanitize_text(key) {
                collected.insert(key, sanitize_json(value));
            }
        }
    }

    for (key, value) in traits {
        if is_consumed_key(key) {
            continue;
        }
        if let Some(key) = sanitize_text(key) {
            collected.entry(key).or_insert_with(|| sanitize_json(value));
        }
    }

    collected
}
