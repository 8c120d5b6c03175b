//! # CDP Common Library
//!
//! Shared code for the customer data platform services including:
//! - Error taxonomy (storage, validation, configuration)
//! - Engine configuration loading and validation
//! - Database initialization for staging, master and link tables
//! - Timestamp and UUID helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use config::{
    ConfigOverrides, DatabaseConfig, EngineConfig, MatchingConfig, ResolutionConfig, SchedulerConfig,
    ServerConfig, StagingConfig, window_interval_from_secs, MAX_WINDOW_INTERVAL_SECS,
};
pub use error::{Error, Result, ValidationError};
