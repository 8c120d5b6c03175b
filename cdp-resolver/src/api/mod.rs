//! HTTP control surface

pub mod health;
pub mod ingest;
pub mod resolution;

pub use health::health_routes;
pub use ingest::ingest_routes;
pub use resolution::resolution_routes;
