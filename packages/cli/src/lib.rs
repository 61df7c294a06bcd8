//! Devis command line
//!
//! Inspects quote documents (YAML or JSON) and drafts progress invoices
//! with the devis engine.
//!
//! # Architecture
//!
//! - [`cli`]: argument parsing and command dispatch
//! - [`render`]: plain-text tables for trees, totals and situations
//! - [`error`]: error type and Result alias

pub mod cli;
pub mod error;
pub mod render;

pub use error::{CliError, Result};
