//! Helpers shared by step definitions

pub mod table;
