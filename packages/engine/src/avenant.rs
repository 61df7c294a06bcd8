//! Avenants (change-orders)
//!
//! An avenant amends the contract after signature: extra work, or work taken
//! out. Its lines are billed in situations alongside the quote lines, each
//! with its own completion percentage.

use crate::config::MAX_AVENANTS;
use crate::error::{EngineError, Result};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether an avenant line adds work or removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvenantLineKind {
    #[default]
    Addition,
    Reduction,
}

impl AvenantLineKind {
    pub fn sign(&self) -> f64 {
        match self {
            AvenantLineKind::Addition => 1.0,
            AvenantLineKind::Reduction => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvenantLine {
    pub id: NodeId,
    #[serde(default)]
    pub designation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default)]
    pub kind: AvenantLineKind,
}

impl AvenantLine {
    pub fn new(
        id: impl Into<NodeId>,
        designation: impl Into<String>,
        quantity: f64,
        unit_price: f64,
    ) -> Self {
        Self {
            id: id.into(),
            designation: designation.into(),
            unit: None,
            quantity,
            unit_price,
            kind: AvenantLineKind::Addition,
        }
    }

    pub fn reduction(mut self) -> Self {
        self.kind = AvenantLineKind::Reduction;
        self
    }

    /// Signed amount of the line.
    pub fn amount(&self) -> f64 {
        self.kind.sign() * self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avenant {
    pub id: NodeId,
    /// Sequential number within the project, starting at 1
    pub number: u32,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub lines: Vec<AvenantLine>,
}

impl Avenant {
    pub fn new(id: impl Into<NodeId>, number: u32, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            number,
            label: label.into(),
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: AvenantLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn total(&self) -> f64 {
        self.lines.iter().map(AvenantLine::amount).sum()
    }
}

/// Sum of all avenant totals, in number order.
pub fn avenants_total(avenants: &[Avenant]) -> f64 {
    let mut sorted: Vec<&Avenant> = avenants.iter().collect();
    sorted.sort_by_key(|a| a.number);
    sorted.iter().map(|a| a.total()).sum()
}

/// Number for the next avenant of a project.
pub fn next_number(avenants: &[Avenant]) -> u32 {
    avenants.iter().map(|a| a.number).max().unwrap_or(0) + 1
}

/// Check count and numbering: numbers are unique and start at 1.
pub fn validate_avenants(avenants: &[Avenant]) -> Result<()> {
    if avenants.len() > MAX_AVENANTS {
        return Err(EngineError::LimitExceeded(format!(
            "Too many avenants ({}, max {})",
            avenants.len(),
            MAX_AVENANTS
        )));
    }
    let mut numbers = BTreeSet::new();
    for avenant in avenants {
        if avenant.number == 0 || !numbers.insert(avenant.number) {
            return Err(EngineError::LoadError(format!(
                "Avenant {} has invalid or duplicate number {}",
                avenant.id, avenant.number
            )));
        }
    }
    Ok(())
}
