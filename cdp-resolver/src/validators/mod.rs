//! Input validation and normalization

pub mod contact;
pub mod normalizer;
pub mod sanitize;

pub use normalizer::normalize_event;
