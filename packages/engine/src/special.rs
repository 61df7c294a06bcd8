//! Special-line evaluator
//!
//! Applies special lines sequentially, in position order, on top of the raw
//! bases:
//!
//! - a Subpart total starts from its raw base and applies the Subpart's lines;
//! - a Part total starts from its raw base and applies the Part's lines;
//! - the global total starts from the sum of Part totals and applies the
//!   global lines.
//!
//! Subpart-scoped lines adjust the Subpart total only.
//!
//! # Percentage bases
//!
//! A percentage line takes `value / 100` of the raw base of its `base_ref`
//! (its own scope when unset). A `global` base is the global total computed
//! without that line.
//!
//! Every amount feeding the global total is either constant (fixed lines,
//! percentages of a raw base) or a factor `k` of a global total computed
//! without some lines. Unrolling "global without L" over the remaining
//! global percentage lines gives
//!
//! ```text
//! G(R) = C + Σ_{L ∈ R} k_L · G(R \ {L})  =  C · Σ_m m! · e_m(k_R)
//! ```
//!
//! where `C` is the constant part and `e_m` the elementary symmetric
//! polynomials of the factors. Every line's base is resolved once, up front;
//! each takes time quadratic in the number of global percentage lines.

use crate::bases::Bases;
use crate::config::MAX_GLOBAL_PERCENTAGE_LINES;
use crate::error::{EngineError, Result};
use crate::projector::{PartView, SubpartView, Tree};
use crate::trace::{TraceBuilder, TraceKind, TraceNode};
use crate::types::{NodeId, Scope, SpecialKind, SpecialLine, ValueType};
use serde::Serialize;
use std::collections::BTreeMap;

/// Resolved value of one special line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecialAmount {
    pub scope: Scope,
    pub kind: SpecialKind,
    /// Unsigned amount; 0 for display lines
    pub amount: f64,
    /// Running total of the scope right after this line.
    ///
    /// For display lines this is the value shown.
    pub running_total: f64,
}

impl SpecialAmount {
    /// Amount with the sign of the line kind applied.
    pub fn signed(&self) -> f64 {
        self.kind.sign() * self.amount
    }
}

/// Every scope total and special line amount of a quote.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Totals {
    pub subparts: BTreeMap<NodeId, f64>,
    pub parts: BTreeMap<NodeId, f64>,
    pub global: f64,
    pub specials: BTreeMap<NodeId, SpecialAmount>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Totals {
    pub fn subpart_total(&self, id: &NodeId) -> Option<f64> {
        self.subparts.get(id).copied()
    }

    pub fn part_total(&self, id: &NodeId) -> Option<f64> {
        self.parts.get(id).copied()
    }

    pub fn special(&self, id: &NodeId) -> Option<&SpecialAmount> {
        self.specials.get(id)
    }

    pub fn scope_total(&self, scope: &Scope) -> Option<f64> {
        match scope {
            Scope::Global => Some(self.global),
            Scope::Part(id) => self.part_total(id),
            Scope::Subpart(id) => self.subpart_total(id),
        }
    }

    fn check_finite(&self) -> Result<()> {
        let non_finite = |v: &f64| !v.is_finite();
        if non_finite(&self.global) {
            return Err(EngineError::Computation("global total is not finite".to_string()));
        }
        if let Some((id, _)) = self.parts.iter().find(|(_, v)| non_finite(v)) {
            return Err(EngineError::Computation(format!("total of part:{id} is not finite")));
        }
        if let Some((id, _)) = self.subparts.iter().find(|(_, v)| non_finite(v)) {
            return Err(EngineError::Computation(format!(
                "total of subpart:{id} is not finite"
            )));
        }
        if let Some((id, _)) = self.specials.iter().find(|(_, s)| non_finite(&s.amount)) {
            return Err(EngineError::Computation(format!(
                "amount of special line {id} is not finite"
            )));
        }
        Ok(())
    }
}

struct Evaluator<'a> {
    tree: &'a Tree,
    bases: &'a Bases,
    /// Global total without the keyed line, per global percentage line
    global_bases: BTreeMap<NodeId, f64>,
    /// Global total with every line applied, seen by Subpart lines
    full_global: f64,
    totals: Totals,
    trace: TraceBuilder,
}

impl<'a> Evaluator<'a> {
    fn new(tree: &'a Tree, bases: &'a Bases, trace: TraceBuilder) -> Result<Self> {
        let global_lines = feeding_global(tree).filter(|l| is_global_percentage(l)).count();
        if global_lines > MAX_GLOBAL_PERCENTAGE_LINES {
            return Err(EngineError::LimitExceeded(format!(
                "{global_lines} special lines take a global base (max {MAX_GLOBAL_PERCENTAGE_LINES})"
            )));
        }
        let mut evaluator = Self {
            tree,
            bases,
            global_bases: BTreeMap::new(),
            full_global: 0.0,
            totals: Totals::default(),
            trace,
        };
        evaluator.resolve_global_bases();
        Ok(evaluator)
    }

    /// Resolve the base of every line that takes a percentage of `global`.
    fn resolve_global_bases(&mut self) {
        let tree = self.tree;
        let mut constant = 0.0;
        let mut factors: Vec<(NodeId, f64)> = Vec::new();

        for part in &tree.parts {
            constant += self.raw_base(&Scope::Part(part.part.id.clone()));
        }
        for line in feeding_global(tree) {
            if is_global_percentage(line) {
                factors.push((line.id.clone(), line.kind.sign() * line.value / 100.0));
            } else {
                constant += line.kind.sign() * self.amount(line);
            }
        }

        for (i, (id, _)) in factors.iter().enumerate() {
            let others = factors
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, (_, k))| *k);
            self.global_bases.insert(id.clone(), constant * chain_weight(others));
        }
        self.full_global = constant * chain_weight(factors.iter().map(|(_, k)| *k));
    }

    fn global_total(&mut self) -> f64 {
        let tree = self.tree;

        self.trace.push(Scope::Global.to_string(), TraceKind::Scope);
        let mut running = 0.0;
        for part in &tree.parts {
            running += self.part_total(part);
        }
        self.trace.leaf(
            TraceNode::new(TraceKind::Base, "parts")
                .with_amount(running)
                .with_detail("sum of part totals"),
        );
        let total = self.apply(&tree.specials, running);
        self.totals.global = total;
        self.trace.set_amount(total);
        self.trace.pop();
        total
    }

    fn part_total(&mut self, part: &'a PartView) -> f64 {
        let scope = Scope::Part(part.part.id.clone());
        let raw = self.raw_base(&scope);

        self.trace.push(scope.to_string(), TraceKind::Scope);
        for sub in &part.subparts {
            self.subpart_total(sub);
        }
        self.trace
            .leaf(TraceNode::new(TraceKind::Base, scope.to_string()).with_amount(raw));
        let total = self.apply(&part.specials, raw);
        self.totals.parts.insert(part.part.id.clone(), total);
        self.trace.set_amount(total);
        self.trace.pop();
        total
    }

    /// Subpart totals never feed the Part total.
    fn subpart_total(&mut self, sub: &'a SubpartView) -> f64 {
        let scope = Scope::Subpart(sub.subpart.id.clone());
        let raw = self.raw_base(&scope);

        self.trace.push(scope.to_string(), TraceKind::Scope);
        self.trace
            .leaf(TraceNode::new(TraceKind::Base, scope.to_string()).with_amount(raw));
        let total = self.apply(&sub.specials, raw);
        self.totals.subparts.insert(sub.subpart.id.clone(), total);
        self.trace.set_amount(total);
        self.trace.pop();
        total
    }

    /// Apply `lines` in order on top of `start`.
    fn apply(&mut self, lines: &'a [SpecialLine], start: f64) -> f64 {
        let mut running = start;

        for line in lines {
            let amount = self.amount(line);
            running += line.kind.sign() * amount;

            self.totals.specials.insert(
                line.id.clone(),
                SpecialAmount {
                    scope: line.scope.clone(),
                    kind: line.kind,
                    amount,
                    running_total: running,
                },
            );
            self.trace_line(line, amount, running);
        }
        running
    }

    fn amount(&mut self, line: &SpecialLine) -> f64 {
        if line.kind == SpecialKind::Display {
            return 0.0;
        }
        match line.value_type {
            ValueType::Fixed => line.value,
            ValueType::Percentage => line.value / 100.0 * self.percentage_base(line),
        }
    }

    fn percentage_base(&mut self, line: &SpecialLine) -> f64 {
        let base_ref = line.base_ref.as_ref().unwrap_or(&line.scope);
        match (base_ref, &line.scope) {
            (Scope::Global, Scope::Subpart(_)) => self.full_global,
            (Scope::Global, _) => {
                let base = self.global_bases.get(&line.id).copied();
                debug_assert!(base.is_some(), "special line {} has no resolved global base", line.id);
                match base {
                    Some(base) => base,
                    None => {
                        self.warn(EngineError::CircularBaseReference(line.id.to_string()).to_string());
                        0.0
                    }
                }
            }
            (scope, _) => self.raw_base(scope),
        }
    }

    /// Raw base of a scope; a scope that no longer exists counts as 0.
    fn raw_base(&mut self, scope: &Scope) -> f64 {
        match self.bases.scope_base(scope) {
            Some(base) => base,
            None => {
                self.warn(format!("Base {scope} not found, using 0"));
                0.0
            }
        }
    }

    fn warn(&mut self, message: String) {
        if !self.totals.warnings.contains(&message) {
            tracing::warn!("{}", message);
            self.totals.warnings.push(message);
        }
    }

    fn trace_line(&mut self, line: &SpecialLine, amount: f64, running: f64) {
        if !self.trace.is_enabled() {
            return;
        }
        let name = if line.label.is_empty() {
            line.id.to_string()
        } else {
            line.label.clone()
        };
        let node = match (line.kind, line.value_type) {
            (SpecialKind::Display, _) => TraceNode::new(TraceKind::Display, name)
                .with_amount(running)
                .with_detail("running total"),
            (kind, ValueType::Fixed) => TraceNode::new(TraceKind::Special, name)
                .with_amount(kind.sign() * amount)
                .with_detail("fixed"),
            (kind, ValueType::Percentage) => {
                let base_ref = line.base_ref.as_ref().unwrap_or(&line.scope);
                let base = self.percentage_base(line);
                let lookup = match (base_ref, &line.scope) {
                    (Scope::Global, Scope::Subpart(_)) => "global total".to_string(),
                    (Scope::Global, _) => format!("global total without {}", line.id),
                    _ => "raw base".to_string(),
                };
                TraceNode::new(TraceKind::Special, name)
                    .with_amount(kind.sign() * amount)
                    .with_detail(format!("{}% of {}", line.value, base_ref))
                    .with_child(
                        TraceNode::new(TraceKind::BaseRef, base_ref.to_string())
                            .with_amount(base)
                            .with_detail(lookup),
                    )
            }
        };
        self.trace.leaf(node);
    }
}

/// Special lines whose amounts reach the global total: Part lines, then
/// global lines.
fn feeding_global(tree: &Tree) -> impl Iterator<Item = &SpecialLine> {
    tree.parts
        .iter()
        .flat_map(|p| p.specials.iter())
        .chain(tree.specials.iter())
}

fn is_global_percentage(line: &SpecialLine) -> bool {
    line.kind != SpecialKind::Display
        && line.value_type == ValueType::Percentage
        && line.base_ref.as_ref().unwrap_or(&line.scope) == &Scope::Global
}

/// `Σ_m m! · e_m(factors)`: the sum, over every ordered chain of distinct
/// factors, of the chain's product. The empty chain counts 1.
fn chain_weight(factors: impl Iterator<Item = f64>) -> f64 {
    let mut elementary = vec![1.0];
    for k in factors {
        elementary.push(0.0);
        for m in (1..elementary.len()).rev() {
            elementary[m] += k * elementary[m - 1];
        }
    }
    let mut factorial = 1.0;
    let mut weight = 0.0;
    for (m, e) in elementary.iter().enumerate() {
        if m > 0 {
            factorial *= m as f64;
        }
        weight += factorial * e;
    }
    weight
}

/// Evaluate every scope total and special line of the tree.
///
/// Fails when a total is not a finite number, or when more than
/// [`MAX_GLOBAL_PERCENTAGE_LINES`] lines take a global base.
pub fn evaluate(tree: &Tree, bases: &Bases) -> Result<Totals> {
    run(tree, bases, TraceBuilder::disabled()).map(|(totals, _)| totals)
}

/// [`evaluate`], also returning the calculation trace.
pub fn evaluate_traced(tree: &Tree, bases: &Bases) -> Result<(Totals, TraceNode)> {
    let (totals, trace) = run(tree, bases, TraceBuilder::new())?;
    let trace = trace.unwrap_or_else(|| TraceNode::new(TraceKind::Scope, Scope::Global.to_string()));
    Ok((totals, trace))
}

fn run(tree: &Tree, bases: &Bases, trace: TraceBuilder) -> Result<(Totals, Option<TraceNode>)> {
    let mut evaluator = Evaluator::new(tree, bases, trace)?;
    evaluator.global_total();

    let Evaluator { totals, trace, .. } = evaluator;
    totals.check_finite()?;
    tracing::debug!(
        global = totals.global,
        specials = totals.specials.len(),
        warnings = totals.warnings.len(),
        "Evaluated totals"
    );
    Ok((totals, trace.build()))
}

/// Total of a single scope after its special lines.
///
/// An unknown scope totals 0.
pub fn scope_total(tree: &Tree, bases: &Bases, scope: &Scope) -> Result<f64> {
    let mut evaluator = Evaluator::new(tree, bases, TraceBuilder::disabled())?;
    let total = match scope {
        Scope::Global => evaluator.global_total(),
        Scope::Part(id) => match tree.parts.iter().find(|p| &p.part.id == id) {
            Some(part) => evaluator.part_total(part),
            None => {
                tracing::warn!(scope = %scope, "Scope not found");
                0.0
            }
        },
        Scope::Subpart(id) => {
            let sub = tree
                .parts
                .iter()
                .flat_map(|p| p.subparts.iter())
                .find(|s| &s.subpart.id == id);
            match sub {
                Some(sub) => evaluator.subpart_total(sub),
                None => {
                    tracing::warn!(scope = %scope, "Scope not found");
                    0.0
                }
            }
        }
    };
    Ok(total)
}
