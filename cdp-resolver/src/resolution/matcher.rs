//! Tiered matching: ExactMatch → FuzzyMatch → NewMaster
//!
//! The first tier that produces a candidate wins; scores are never compared
//! across tiers. "No match" is the `NewMaster` outcome, not an error. Only
//! data-layer failures make [`find_match`] return `Err`.
//!
//! The decision functions ([`match_exact`], [`match_fuzzy`], [`decide`]) are
//! pure; [`find_match`] loads candidates through the master repository and
//! hands them over.

use super::name_similarity::{full_name, normalize_name, similarity};
use crate::db;
use crate::db::masters::FuzzyLookup;
use crate::models::{MasterProfile, MatchRule, ProfileAttributes, RawProfileObservation};
use cdp_common::{MatchingConfig, Result};
use serde::Serialize;
use sqlx::SqliteConnection;
use std::cmp::Ordering;
use uuid::Uuid;

/// Why a tier had more than one master to choose from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AmbiguityKind {
    /// Phone matched one master, email another; phone wins
    PhoneEmailDisagree,
    /// Several masters share the phone number; the oldest wins
    DuplicatePhone,
    /// Several masters share the email; the oldest wins
    DuplicateEmail,
    /// Several masters passed the fuzzy tier; the best score wins
    SeveralFuzzyCandidates,
}

/// Lookup resolved by tie-break rather than a single hit.
///
/// Not an error: the observation is still linked to `chosen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictAmbiguity {
    pub kind: AmbiguityKind,
    pub chosen: Uuid,
    pub rejected: Vec<Uuid>,
}

/// Result of matching one observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MatchOutcome {
    NewMaster,
    ExactMatch {
        master_profile_id: Uuid,
        ambiguity: Option<ConflictAmbiguity>,
    },
    FuzzyMatch {
        master_profile_id: Uuid,
        score: f64,
        ambiguity: Option<ConflictAmbiguity>,
    },
}

/// Winner of the fuzzy tier
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyPick {
    pub master_profile_id: Uuid,
    pub score: f64,
    pub ambiguity: Option<ConflictAmbiguity>,
}

impl MatchOutcome {
    pub fn rule(&self) -> MatchRule {
        match self {
            MatchOutcome::NewMaster => MatchRule::NewMaster,
            MatchOutcome::ExactMatch { .. } => MatchRule::ExactMatch,
            MatchOutcome::FuzzyMatch { .. } => MatchRule::FuzzyMatch,
        }
    }

    /// Existing master to link to; `None` for `NewMaster`
    pub fn master_profile_id(&self) -> Option<Uuid> {
        match self {
            MatchOutcome::NewMaster => None,
            MatchOutcome::ExactMatch { master_profile_id, .. } | MatchOutcome::FuzzyMatch { master_profile_id, .. } => {
                Some(*master_profile_id)
            }
        }
    }

    /// Tie-break taken by the winning tier, if any
    pub fn ambiguity(&self) -> Option<&ConflictAmbiguity> {
        match self {
            MatchOutcome::NewMaster => None,
            MatchOutcome::ExactMatch { ambiguity, .. } | MatchOutcome::FuzzyMatch { ambiguity, .. } => ambiguity.as_ref(),
        }
    }
}

fn oldest_first(a: &MasterProfile, b: &MasterProfile) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.master_profile_id.cmp(&b.master_profile_id))
}

fn sorted(candidates: &[MasterProfile]) -> Vec<&MasterProfile> {
    let mut sorted: Vec<&MasterProfile> = candidates.iter().collect();
    sorted.sort_by(|a, b| oldest_first(a, b));
    sorted
}

/// Exact tier over pre-fetched phone and email hits.
///
/// Phone is the higher-trust key: any phone hit beats any email hit. Within
/// one key the oldest master wins.
pub fn match_exact(
    phone_hits: &[MasterProfile],
    email_hits: &[MasterProfile],
) -> Option<(Uuid, Option<ConflictAmbiguity>)> {
    let phone = sorted(phone_hits);
    let email = sorted(email_hits);

    let (chosen, duplicate_kind) = match (phone.first(), email.first()) {
        (Some(first), _) => (first.master_profile_id, AmbiguityKind::DuplicatePhone),
        (None, Some(first)) => (first.master_profile_id, AmbiguityKind::DuplicateEmail),
        (None, None) => return None,
    };

    let mut rejected: Vec<Uuid> = Vec::new();
    for master in phone.iter().chain(email.iter()) {
        let id = master.master_profile_id;
        if id != chosen && !rejected.contains(&id) {
            rejected.push(id);
        }
    }

    if rejected.is_empty() {
        return Some((chosen, None));
    }

    let email_disagrees = !phone.is_empty() && email.iter().any(|m| m.master_profile_id != chosen);
    let kind = if email_disagrees {
        AmbiguityKind::PhoneEmailDisagree
    } else {
        duplicate_kind
    };

    Some((chosen, Some(ConflictAmbiguity { kind, chosen, rejected })))
}

/// True when the master carries an independent signal agreeing with the observation
pub fn corroborates(observation: &ProfileAttributes, master: &ProfileAttributes, config: &MatchingConfig) -> bool {
    if !config.require_corroboration {
        return true;
    }

    if config.corroborate_on_date_of_birth {
        if let (Some(a), Some(b)) = (&observation.date_of_birth, &master.date_of_birth) {
            if a.trim() == b.trim() {
                return true;
            }
        }
    }

    if config.corroborate_on_city_state {
        if let (Some(a), Some(b)) = (&observation.city, &master.city) {
            let same_city = normalize_name(a) == normalize_name(b);
            let state_conflict = match (&observation.state, &master.state) {
                (Some(x), Some(y)) => normalize_name(x) != normalize_name(y),
                _ => false,
            };
            if same_city && !state_conflict {
                return true;
            }
        }
    }

    false
}

/// Fuzzy tier: best corroborated name similarity at or above the threshold.
///
/// Equal scores go to the oldest master. Every other passing candidate is
/// reported as rejected.
pub fn match_fuzzy(
    observation: &ProfileAttributes,
    candidates: &[MasterProfile],
    config: &MatchingConfig,
) -> Option<FuzzyPick> {
    let name = full_name(observation.first_name.as_deref(), observation.last_name.as_deref())?;

    let mut passing: Vec<(Uuid, f64)> = Vec::new();
    for master in sorted(candidates) {
        let Some(candidate_name) = full_name(master.attributes.first_name.as_deref(), master.attributes.last_name.as_deref())
        else {
            continue;
        };

        let score = similarity(&name, &candidate_name);
        if score >= config.fuzzy_name_threshold && corroborates(observation, &master.attributes, config) {
            passing.push((master.master_profile_id, score));
        }
    }

    let (chosen, score) = passing
        .iter()
        .copied()
        .fold(None, |best: Option<(Uuid, f64)>, (id, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((id, score)),
        })?;

    let rejected: Vec<Uuid> = passing.iter().map(|(id, _)| *id).filter(|id| *id != chosen).collect();
    let ambiguity = (!rejected.is_empty()).then(|| ConflictAmbiguity {
        kind: AmbiguityKind::SeveralFuzzyCandidates,
        chosen,
        rejected,
    });

    Some(FuzzyPick {
        master_profile_id: chosen,
        score,
        ambiguity,
    })
}

/// Apply the tiers in priority order
pub fn decide(
    observation: &ProfileAttributes,
    phone_hits: &[MasterProfile],
    email_hits: &[MasterProfile],
    fuzzy_candidates: &[MasterProfile],
    config: &MatchingConfig,
) -> MatchOutcome {
    if let Some((master_profile_id, ambiguity)) = match_exact(phone_hits, email_hits) {
        return MatchOutcome::ExactMatch {
            master_profile_id,
            ambiguity,
        };
    }

    match match_fuzzy(observation, fuzzy_candidates, config) {
        Some(pick) => MatchOutcome::FuzzyMatch {
            master_profile_id: pick.master_profile_id,
            score: pick.score,
            ambiguity: pick.ambiguity,
        },
        None => MatchOutcome::NewMaster,
    }
}

/// Load candidates for `observation` and decide.
///
/// Masters created by `exclude_pass` are invisible, which keeps rows of one
/// pass from matching each other. Fuzzy candidates are only loaded when the
/// exact tier came up empty.
pub async fn find_match(
    conn: &mut SqliteConnection,
    observation: &RawProfileObservation,
    config: &MatchingConfig,
    exclude_pass: Option<Uuid>,
) -> Result<MatchOutcome> {
    let tenant_id = observation.tenant_id.as_str();
    let attributes = &observation.attributes;

    let phone_hits = match attributes.phone_number.as_deref() {
        Some(phone) => db::masters::find_by_phone(conn, tenant_id, phone, exclude_pass).await?,
        None => Vec::new(),
    };
    let email_hits = match attributes.email.as_deref() {
        Some(email) => db::masters::find_by_email(conn, tenant_id, email, exclude_pass).await?,
        None => Vec::new(),
    };

    let last_name = attributes.last_name.as_deref().filter(|_| has_full_name(attributes));
    let fuzzy_candidates = match last_name {
        Some(last_name) if phone_hits.is_empty() && email_hits.is_empty() => {
            let lookup = FuzzyLookup {
                tenant_id,
                last_name,
                date_of_birth: attributes
                    .date_of_birth
                    .as_deref()
                    .filter(|_| config.corroborate_on_date_of_birth),
                city: attributes.city.as_deref().filter(|_| config.corroborate_on_city_state),
                require_signal: config.require_corroboration,
                exclude_pass,
                limit: config.fuzzy_candidate_limit as usize,
            };
            db::masters::find_fuzzy_candidates(conn, &lookup).await?
        }
        _ => Vec::new(),
    };

    let outcome = decide(attributes, &phone_hits, &email_hits, &fuzzy_candidates, config);

    if let Some(conflict) = outcome.ambiguity() {
        tracing::warn!(
            tenant_id = %observation.tenant_id,
            raw_profile_id = %observation.raw_profile_id,
            rule = %outcome.rule(),
            kind = ?conflict.kind,
            chosen = %conflict.chosen,
            rejected = ?conflict.rejected,
            "Match hit several masters, resolved by tie-break"
        );
    }

    Ok(outcome)
}

fn has_full_name(attributes: &ProfileAttributes) -> bool {
    full_name(attributes.first_name.as_deref(), attributes.last_name.as_deref()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn master(age_days: i64, first: &str, last: &str) -> MasterProfile {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() - Duration::days(age_days);
        MasterProfile {
            master_profile_id: Uuid::new_v4(),
            tenant_id: "demo".to_string(),
            attributes: ProfileAttributes {
                first_name: Some(first.to_string()),
                last_name: Some(last.to_string()),
                ..Default::default()
            },
            source_systems: BTreeSet::from(["website".to_string()]),
            first_seen_raw_profile_id: Uuid::new_v4(),
            created_by_pass: None,
            created_at: created,
            updated_at: created,
            notified_at: None,
        }
    }

    fn named(first: &str, last: &str) -> ProfileAttributes {
        ProfileAttributes {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn no_hits_is_no_exact_match() {
        assert_eq!(match_exact(&[], &[]), None);
    }

    #[test]
    fn single_hit_has_no_ambiguity() {
        let m = master(1, "Thomas", "Nguyen");
        assert_eq!(match_exact(&[m.clone()], &[m.clone()]), Some((m.master_profile_id, None)));
    }

    #[test]
    fn phone_beats_email_when_they_disagree() {
        let by_phone = master(1, "A", "B");
        let by_email = master(30, "C", "D");

        let (chosen, ambiguity) = match_exact(&[by_phone.clone()], &[by_email.clone()]).unwrap();
        assert_eq!(chosen, by_phone.master_profile_id);

        let ambiguity = ambiguity.unwrap();
        assert_eq!(ambiguity.kind, AmbiguityKind::PhoneEmailDisagree);
        assert_eq!(ambiguity.rejected, vec![by_email.master_profile_id]);
    }

    #[test]
    fn oldest_master_wins_on_duplicate_phone() {
        let newer = master(1, "A", "B");
        let older = master(10, "A", "B");

        let (chosen, ambiguity) = match_exact(&[newer.clone(), older.clone()], &[]).unwrap();
        assert_eq!(chosen, older.master_profile_id);
        assert_eq!(ambiguity.unwrap().kind, AmbiguityKind::DuplicatePhone);
    }

    #[test]
    fn email_only_hit_is_used() {
        let m = master(1, "A", "B");
        let (chosen, ambiguity) = match_exact(&[], &[m.clone()]).unwrap();
        assert_eq!(chosen, m.master_profile_id);
        assert!(ambiguity.is_none());
    }

    #[test]
    fn fuzzy_requires_corroboration() {
        let config = MatchingConfig::default();
        let candidate = master(1, "John", "Smith");
        let observation = named("Jon", "Smith");

        assert_eq!(match_fuzzy(&observation, &[candidate.clone()], &config), None);

        let mut corroborated = candidate.clone();
        corroborated.attributes.date_of_birth = Some("1990-05-21".to_string());
        let mut observation = observation;
        observation.date_of_birth = Some("1990-05-21".to_string());

        let pick = match_fuzzy(&observation, &[corroborated.clone()], &config).unwrap();
        assert_eq!(pick.master_profile_id, corroborated.master_profile_id);
        assert!(pick.score >= config.fuzzy_name_threshold);
        assert_eq!(pick.ambiguity, None);
    }

    #[test]
    fn corroboration_can_be_disabled() {
        let config = MatchingConfig {
            require_corroboration: false,
            ..Default::default()
        };
        let candidate = master(1, "John", "Smith");
        assert!(match_fuzzy(&named("Jon", "Smith"), &[candidate], &config).is_some());
    }

    #[test]
    fn city_corroborates_unless_states_conflict() {
        let config = MatchingConfig::default();
        let mut observation = named("Ngoc", "Tran");
        observation.city = Some("Hồ Chí Minh".to_string());
        observation.state = Some("HCM".to_string());

        let mut master_attrs = named("Ngoc", "Tran");
        master_attrs.city = Some("ho chi minh".to_string());
        assert!(corroborates(&observation, &master_attrs, &config));

        master_attrs.state = Some("HCM".to_string());
        assert!(corroborates(&observation, &master_attrs, &config));

        master_attrs.state = Some("Texas".to_string());
        assert!(!corroborates(&observation, &master_attrs, &config));
    }

    #[test]
    fn dissimilar_names_never_fuzzy_match() {
        let config = MatchingConfig {
            require_corroboration: false,
            ..Default::default()
        };
        let candidate = master(1, "Bob", "Builder");
        assert_eq!(match_fuzzy(&named("Alice", "Wonderland"), &[candidate], &config), None);
    }

    #[test]
    fn fuzzy_needs_first_and_last_name() {
        let config = MatchingConfig {
            require_corroboration: false,
            ..Default::default()
        };
        let candidate = master(1, "Thomas", "Nguyen");
        let observation = ProfileAttributes {
            first_name: Some("Thomas".to_string()),
            ..Default::default()
        };
        assert_eq!(match_fuzzy(&observation, &[candidate], &config), None);
    }

    #[test]
    fn best_score_wins_then_oldest() {
        let config = MatchingConfig {
            require_corroboration: false,
            ..Default::default()
        };
        let close = master(1, "Jon", "Smith");
        let exact_newer = master(2, "John", "Smith");
        let exact_older = master(5, "John", "Smith");

        let pick = match_fuzzy(
            &named("John", "Smith"),
            &[close.clone(), exact_newer.clone(), exact_older.clone()],
            &config,
        )
        .unwrap();
        assert_eq!(pick.master_profile_id, exact_older.master_profile_id);
        assert_eq!(pick.score, 1.0);

        let ambiguity = pick.ambiguity.unwrap();
        assert_eq!(ambiguity.kind, AmbiguityKind::SeveralFuzzyCandidates);
        assert_eq!(ambiguity.chosen, exact_older.master_profile_id);
        assert_eq!(
            ambiguity.rejected,
            vec![exact_newer.master_profile_id, close.master_profile_id]
        );
    }

    #[test]
    fn several_fuzzy_candidates_surface_in_outcome() {
        let config = MatchingConfig::default();
        let mut observation = named("Jon", "Smith");
        observation.date_of_birth = Some("1990-05-21".to_string());

        let mut newer = master(1, "John", "Smith");
        newer.attributes.date_of_birth = Some("1990-05-21".to_string());
        let mut older = master(9, "John", "Smith");
        older.attributes.date_of_birth = Some("1990-05-21".to_string());
        let mut other_birthday = master(20, "John", "Smith");
        other_birthday.attributes.date_of_birth = Some("1971-01-01".to_string());

        let outcome = decide(&observation, &[], &[], &[newer.clone(), older.clone(), other_birthday], &config);

        assert_eq!(outcome.rule(), MatchRule::FuzzyMatch);
        assert_eq!(outcome.master_profile_id(), Some(older.master_profile_id));
        let ambiguity = outcome.ambiguity().unwrap();
        assert_eq!(ambiguity.kind, AmbiguityKind::SeveralFuzzyCandidates);
        assert_eq!(ambiguity.rejected, vec![newer.master_profile_id]);
    }

    #[test]
    fn exact_tier_wins_over_fuzzy() {
        let config = MatchingConfig {
            require_corroboration: false,
            ..Default::default()
        };
        let by_phone = master(1, "Someone", "Else");
        let by_name = master(2, "John", "Smith");

        let outcome = decide(&named("John", "Smith"), &[by_phone.clone()], &[], &[by_name], &config);
        assert_eq!(outcome.rule(), MatchRule::ExactMatch);
        assert_eq!(outcome.master_profile_id(), Some(by_phone.master_profile_id));
    }

    #[test]
    fn nothing_found_is_new_master() {
        let outcome = decide(&named("John", "Smith"), &[], &[], &[], &MatchingConfig::default());
        assert_eq!(outcome, MatchOutcome::NewMaster);
        assert_eq!(outcome.master_profile_id(), None);
    }
}
