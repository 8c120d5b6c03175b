//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Derive a stable name-based UUID (v5, DNS namespace) from an arbitrary string.
///
/// The same input always yields the same identifier.
pub fn from_name(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}
