//! Raw base amounts
//!
//! Bases are the plain sums of line amounts, before any special line is
//! applied. Special lines take their percentages of these raw values.

use crate::projector::Tree;
use crate::types::{DetailLine, NodeId, Scope};
use serde::Serialize;
use std::collections::BTreeMap;

/// Effective unit price of a line.
///
/// `price_override` wins when set. Otherwise the cost base (labor plus
/// material, or `manual_base_price` when both are zero) gets the fixed rate
/// and then the margin applied on top.
pub fn unit_price(line: &DetailLine) -> f64 {
    if let Some(price) = line.price_override {
        return price;
    }
    let base = if line.labor_cost == 0.0 && line.material_cost == 0.0 {
        line.manual_base_price
    } else {
        line.labor_cost + line.material_cost
    };
    let with_fixed = base * (1.0 + line.fixed_rate_pct / 100.0);
    with_fixed * (1.0 + line.margin_pct / 100.0)
}

/// `unit_price * quantity`. Negative amounts are allowed (credit lines).
pub fn line_amount(line: &DetailLine) -> f64 {
    unit_price(line) * line.quantity
}

/// Raw amounts per line and per scope.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Bases {
    pub lines: BTreeMap<NodeId, f64>,
    pub subparts: BTreeMap<NodeId, f64>,
    pub parts: BTreeMap<NodeId, f64>,
    pub global: f64,
}

impl Bases {
    pub fn line_amount(&self, id: &NodeId) -> Option<f64> {
        self.lines.get(id).copied()
    }

    pub fn subpart_base(&self, id: &NodeId) -> Option<f64> {
        self.subparts.get(id).copied()
    }

    pub fn part_base(&self, id: &NodeId) -> Option<f64> {
        self.parts.get(id).copied()
    }

    pub fn global_base(&self) -> f64 {
        self.global
    }

    /// Raw base of a scope, `None` when the scope is not in the tree.
    pub fn scope_base(&self, scope: &Scope) -> Option<f64> {
        match scope {
            Scope::Global => Some(self.global),
            Scope::Part(id) => self.part_base(id),
            Scope::Subpart(id) => self.subpart_base(id),
        }
    }
}

/// Sum line amounts bottom-up.
///
/// Sums run in tree order so results are bit-identical across runs.
pub fn compute_bases(tree: &Tree) -> Bases {
    let mut bases = Bases::default();

    for part in &tree.parts {
        let mut part_base = 0.0;
        for sub in &part.subparts {
            let mut subpart_base = 0.0;
            for view in &sub.lines {
                let amount = line_amount(&view.line);
                bases.lines.insert(view.line.id.clone(), amount);
                subpart_base += amount;
            }
            bases.subparts.insert(sub.subpart.id.clone(), subpart_base);
            part_base += subpart_base;
        }
        bases.parts.insert(part.part.id.clone(), part_base);
        bases.global += part_base;
    }

    tracing::debug!(
        lines = bases.lines.len(),
        parts = bases.parts.len(),
        global = bases.global,
        "Computed raw bases"
    );
    bases
}
