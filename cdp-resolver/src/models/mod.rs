//! Domain models for identity resolution

pub mod event;
pub mod link;
pub mod master;
pub mod profile;
pub mod window;

pub use event::{IngestRecord, RawEventPayload, RecordOutcome, RecordResult};
pub use link::{MatchRule, ProfileLink};
pub use master::MasterProfile;
pub use profile::{ChannelMetadata, ProfileAttributes, ProfileObservation, RawProfileObservation};
pub use window::TimeWindow;
