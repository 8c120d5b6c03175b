//! Identity resolution: matching, consolidation, batch passes and backfill

pub mod batch_runner;
pub mod consolidator;
pub mod matcher;
pub mod name_similarity;
pub mod scheduler;

pub use batch_runner::{BatchReport, BatchRunner, MasterChangeSet};
pub use matcher::{AmbiguityKind, ConflictAmbiguity, MatchOutcome};
pub use scheduler::{BackfillParams, BackfillReport, BackfillScheduler, SchedulerState, WindowRunner};
