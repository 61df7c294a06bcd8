//! Step definitions for Cucumber BDD tests
//!
//! This module contains all Given/When/Then step implementations.

pub mod given;
pub mod then;
pub mod when;

/// Parse a comma-separated id list such as `"1, 11, 111"`.
pub fn id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
