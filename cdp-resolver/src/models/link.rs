//! Observation → master traceability edges

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Rule that produced a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchRule {
    NewMaster,
    ExactMatch,
    FuzzyMatch,
}

impl MatchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRule::NewMaster => "NewMaster",
            MatchRule::ExactMatch => "ExactMatch",
            MatchRule::FuzzyMatch => "FuzzyMatch",
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchRule {
    type Err = cdp_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NewMaster" => Ok(MatchRule::NewMaster),
            "ExactMatch" => Ok(MatchRule::ExactMatch),
            "FuzzyMatch" => Ok(MatchRule::FuzzyMatch),
            other => Err(cdp_common::Error::Internal(format!("Unknown match rule: {}", other))),
        }
    }
}

/// Audit edge: which observation resolved to which master, and by which rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileLink {
    pub raw_profile_id: Uuid,
    pub master_profile_id: Uuid,
    pub match_rule: MatchRule,
    pub matched_at: DateTime<Utc>,
}
