//! Devis Engine
//!
//! Ordering and calculation engine for construction quotes ("devis") and
//! their monthly progress invoices ("situations").
//! This library provides functionality for:
//! - Loading quote documents (YAML or JSON) as flat, position-ordered nodes
//! - Keeping positions stable under insertion and drag-and-drop
//! - Projecting the Part → Subpart → Line tree with display numbers
//! - Computing raw bases, then applying special lines in position order
//! - Drafting situations from the previous month and computing deductions
//!
//! # Example
//!
//! ```ignore
//! use devis_engine::{compute_bases, evaluate, project, Document};
//!
//! let doc = Document::from_file("quote.yaml")?;
//! let tree = project(&doc).tree;
//! let totals = evaluate(&tree, &compute_bases(&tree))?;
//! println!("Total HT: {}", totals.global);
//! ```

pub mod avenant;
pub mod bases;
pub mod config;
pub mod document;
pub mod error;
pub mod position;
pub mod projector;
pub mod service;
pub mod situation;
pub mod special;
pub mod store;
pub mod trace;
pub mod types;
pub mod wire;

// Re-export commonly used items
pub use avenant::{Avenant, AvenantLine, AvenantLineKind};
pub use bases::{compute_bases, line_amount, unit_price, Bases};
pub use config::BillingConfig;
pub use document::Document;
pub use error::{EngineError, Result};
pub use position::{insert_at, renumber_scope, reorder, resolve_ties, Placement, TargetPosition};
pub use projector::{project, LineView, Orphan, PartView, Projection, SubpartView, Tree};
pub use service::DevisSession;
pub use situation::{
    build_situation_draft, clamp_percentage, Adjustment, AdjustmentKind, LineKey, Period,
    Situation, SituationBreakdown, SituationLine, SituationState,
};
pub use special::{evaluate, evaluate_traced, scope_total, SpecialAmount, Totals};
pub use store::{CatalogItem, InMemoryStore, QuoteStore, StoredDocument};
pub use trace::{TraceBuilder, TraceKind, TraceNode};
pub use types::{
    DetailLine, Node, NodeId, NodeKind, Part, Scope, SpecialKind, SpecialLine, Subpart, ValueType,
};
pub use wire::{format_money, parse_money, OrderEntry, SituationRecord, TotalsReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
