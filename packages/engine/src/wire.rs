//! Persistence payloads
//!
//! Everything the engine hands to the store goes through here. Monetary
//! values travel as strings with exactly two decimals so that what was
//! billed is what gets read back, without binary float drift.

use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::situation::{AdjustmentKind, LineKey};
use crate::special::Totals;
use crate::types::{NodeId, NodeKind};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Format an amount with two decimals, rounding half away from zero.
pub fn format_money(value: f64) -> String {
    let cents = value * 100.0;
    // Absorb representation error (1.005 is stored as 1.00499...)
    let rounded = (cents + cents.signum() * 1e-6).round();
    if rounded == 0.0 {
        return "0.00".to_string();
    }
    format!("{:.2}", rounded / 100.0)
}

/// `serialize_with` adapter writing an `f64` as a money string.
pub fn serialize_money<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_money(*value))
}

/// Parse a wire amount (`"1234.50"`, `"-12"`).
pub fn parse_money(raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
    {
        return Err(EngineError::InvalidAmount(raw.to_string()));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| EngineError::InvalidAmount(raw.to_string()))
}

/// One entry of a bulk ordering update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub kind: NodeKind,
    pub id: NodeId,
    pub position: f64,
}

/// Ordering payload for every node, in document order.
pub fn order_payload(doc: &Document) -> Vec<OrderEntry> {
    doc.preorder()
        .into_iter()
        .map(|n| OrderEntry {
            kind: n.kind(),
            id: n.id().clone(),
            position: n.position(),
        })
        .collect()
}

/// Entries of `after` that are new or whose position moved since `before`.
pub fn changed_positions(before: &Document, after: &Document) -> Vec<OrderEntry> {
    order_payload(after)
        .into_iter()
        .filter(|entry| match before.get(&entry.id) {
            Some(old) => old.position().to_bits() != entry.position.to_bits(),
            None => true,
        })
        .collect()
}

/// SHA-256 over the structure of a document: kinds, ids and parents in
/// document order. Quantities and prices do not change it.
pub fn structure_fingerprint(doc: &Document) -> String {
    let mut hasher = Sha256::new();
    for node in doc.preorder() {
        hasher.update(node.kind().as_str().as_bytes());
        hasher.update(b":");
        hasher.update(node.id().to_string().as_bytes());
        hasher.update(b"@");
        hasher.update(node.parent().to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Stored line of a situation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationLineRecord {
    pub key: LineKey,
    #[serde(default)]
    pub designation: String,
    pub amount_ht: String,
    pub previous_pct: f64,
    pub current_pct: f64,
}

/// Stored ad-hoc adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub label: String,
    pub kind: AdjustmentKind,
    pub amount: String,
}

/// A situation as persisted: one record per (project, month, year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationRecord {
    pub project: String,
    pub month: u32,
    pub year: i32,
    pub number: u32,
    pub lines: Vec<SituationLineRecord>,
    #[serde(default)]
    pub adjustments: Vec<AdjustmentRecord>,
    pub cumulative_ht: String,
    pub prior_cumulative_ht: String,
    pub monthly_ht: String,
    pub retenue_garantie: String,
    pub compte_prorata: String,
    pub retenue_cie: String,
    pub net_ht: String,
    pub tva: String,
    pub ttc: String,
    pub total_marche_ht: String,
    pub vat_pct: f64,
    pub taux_prorata_pct: f64,
    pub retenue_garantie_pct: f64,
    #[serde(default)]
    pub structure_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecialReport {
    pub amount: String,
    pub running_total: String,
}

/// Totals with every amount formatted for output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalsReport {
    pub global: String,
    pub parts: BTreeMap<String, String>,
    pub subparts: BTreeMap<String, String>,
    pub specials: BTreeMap<String, SpecialReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Display numbers of the parts and subparts, keyed by id
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub numbers: BTreeMap<String, String>,
}

impl TotalsReport {
    pub fn from_totals(totals: &Totals) -> Self {
        let money = |m: &BTreeMap<NodeId, f64>| {
            m.iter()
                .map(|(id, v)| (id.to_string(), format_money(*v)))
                .collect()
        };
        Self {
            global: format_money(totals.global),
            parts: money(&totals.parts),
            subparts: money(&totals.subparts),
            specials: totals
                .specials
                .iter()
                .map(|(id, s)| {
                    (
                        id.to_string(),
                        SpecialReport {
                            amount: format_money(s.signed()),
                            running_total: format_money(s.running_total),
                        },
                    )
                })
                .collect(),
            warnings: totals.warnings.clone(),
            numbers: BTreeMap::new(),
        }
    }

    pub fn with_numbers(mut self, numbers: impl IntoIterator<Item = (NodeId, Option<String>)>) -> Self {
        self.numbers = numbers
            .into_iter()
            .filter_map(|(id, n)| n.map(|n| (id.to_string(), n)))
            .collect();
        self
    }
}
