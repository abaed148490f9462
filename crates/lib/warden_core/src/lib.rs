//! # warden_core
//!
//! Core domain logic for Warden: credential verification, token issuance,
//! session lifecycle, permission resolution and audit recording.

pub mod audit;
pub mod auth;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod seed;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
