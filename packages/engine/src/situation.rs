//! Progress billing (situations)
//!
//! A situation is the monthly invoice of a construction project: for every
//! billable line of the quote (and of its avenants) it records how far the
//! work has progressed, and bills the difference with the previous month.
//!
//! # Lifecycle
//!
//! ```text
//! NoPriorSituation ──┐
//!                    ├──> draft ──save──> Saved
//! DraftFromPrevious ─┘
//! ```
//!
//! A draft built after a saved month carries each line's percentage forward
//! and takes the previous cumulative amount exactly as it was stored. A saved
//! situation is frozen once the following month exists.
//!
//! # Deductions
//!
//! Applied to the monthly amount, in this order: retenue de garantie,
//! compte prorata, retenue CIE, then ad-hoc adjustments in entry order.

use crate::avenant::{avenants_total, validate_avenants, Avenant};
use crate::bases::{compute_bases, line_amount};
use crate::config::BillingConfig;
use crate::error::{EngineError, Result};
use crate::projector::{self, Tree};
use crate::special::{evaluate, Totals};
use crate::store::QuoteStore;
use crate::trace::{TraceKind, TraceNode};
use crate::types::{NodeId, SpecialKind, SpecialLine};
use crate::wire::{
    format_money, parse_money, serialize_money, structure_fingerprint, AdjustmentRecord,
    SituationLineRecord, SituationRecord,
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A billing month.
///
/// Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(month: u32, year: i32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|_| Self { year, month })
            .ok_or(EngineError::InvalidPeriod { month, year })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The month before; January rolls back to December of the previous year.
    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{}", self.month, self.year)
    }
}

/// Identity of a billable line across situations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineKey {
    Detail { id: NodeId },
    Special { id: NodeId },
    Avenant { avenant: NodeId, line: NodeId },
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineKey::Detail { id } => write!(f, "detail:{id}"),
            LineKey::Special { id } => write!(f, "special:{id}"),
            LineKey::Avenant { avenant, line } => write!(f, "avenant:{avenant}:{line}"),
        }
    }
}

/// Where a situation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SituationState {
    /// First period of the project: every line starts at 0 %
    NoPriorSituation,
    /// Seeded from the previous period's saved situation
    DraftFromPrevious,
    /// Loaded as stored
    Saved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Addition,
    Deduction,
}

/// Supplementary line applied after the standard deductions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    pub label: String,
    pub kind: AdjustmentKind,
    #[serde(serialize_with = "serialize_money")]
    pub amount: f64,
}

impl Adjustment {
    pub fn signed(&self) -> f64 {
        match self.kind {
            AdjustmentKind::Addition => self.amount,
            AdjustmentKind::Deduction => -self.amount,
        }
    }
}

/// One billable line and its progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SituationLine {
    pub key: LineKey,
    pub designation: String,
    /// Full contract amount of the line, signed
    #[serde(serialize_with = "serialize_money")]
    pub amount_ht: f64,
    pub previous_pct: f64,
    pub current_pct: f64,
    /// Progress went down compared with the previous period
    pub regressed: bool,
}

impl SituationLine {
    pub fn new(key: LineKey, designation: impl Into<String>, amount_ht: f64) -> Self {
        Self {
            key,
            designation: designation.into(),
            amount_ht,
            previous_pct: 0.0,
            current_pct: 0.0,
            regressed: false,
        }
    }

    /// Amount billed up to and including this period.
    pub fn cumulative_ht(&self) -> f64 {
        self.amount_ht * self.current_pct / 100.0
    }

    /// Amount billed up to the previous period.
    pub fn previous_ht(&self) -> f64 {
        self.amount_ht * self.previous_pct / 100.0
    }

    pub fn period_ht(&self) -> f64 {
        self.cumulative_ht() - self.previous_ht()
    }

    fn set_current(&mut self, pct: f64) {
        self.current_pct = clamp_percentage(pct);
        self.regressed = self.current_pct < self.previous_pct;
        if self.regressed {
            tracing::debug!(
                line = %self.key,
                previous = self.previous_pct,
                current = self.current_pct,
                "Progress regressed"
            );
        }
    }
}

/// Clamp a progress percentage to `[0, 100]`.
///
/// Out-of-range values are logged, never rejected. NaN counts as 0.
pub fn clamp_percentage(pct: f64) -> f64 {
    if (0.0..=100.0).contains(&pct) {
        return pct;
    }
    tracing::warn!(error = %EngineError::InvalidPercentage(pct), "Clamping percentage");
    if pct > 100.0 {
        100.0
    } else {
        0.0
    }
}

/// Amounts of a situation, from cumulative down to TTC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SituationBreakdown {
    #[serde(serialize_with = "serialize_money")]
    pub cumulative_ht: f64,
    #[serde(serialize_with = "serialize_money")]
    pub prior_cumulative_ht: f64,
    #[serde(serialize_with = "serialize_money")]
    pub monthly_ht: f64,
    #[serde(serialize_with = "serialize_money")]
    pub retenue_garantie: f64,
    #[serde(serialize_with = "serialize_money")]
    pub compte_prorata: f64,
    #[serde(serialize_with = "serialize_money")]
    pub retenue_cie: f64,
    #[serde(serialize_with = "serialize_money")]
    pub adjustments_total: f64,
    #[serde(serialize_with = "serialize_money")]
    pub net_ht: f64,
    #[serde(serialize_with = "serialize_money")]
    pub tva: f64,
    #[serde(serialize_with = "serialize_money")]
    pub ttc: f64,
    #[serde(serialize_with = "serialize_money")]
    pub total_marche_ht: f64,
    /// Cumulative progress over the whole contract, in percent
    pub completion_pct: f64,
    #[serde(serialize_with = "serialize_money")]
    pub remaining_ht: f64,
}

impl SituationBreakdown {
    /// Explain the breakdown as a trace tree.
    pub fn trace(&self) -> TraceNode {
        let deduction = |name: &str, amount: f64| {
            TraceNode::new(TraceKind::Deduction, name).with_amount(-amount)
        };
        TraceNode::new(TraceKind::Situation, "net_ht")
            .with_amount(self.net_ht)
            .with_child(
                TraceNode::new(TraceKind::Scope, "monthly_ht")
                    .with_amount(self.monthly_ht)
                    .with_child(
                        TraceNode::new(TraceKind::Base, "cumulative_ht").with_amount(self.cumulative_ht),
                    )
                    .with_child(
                        TraceNode::new(TraceKind::Base, "prior_cumulative_ht")
                            .with_amount(-self.prior_cumulative_ht),
                    ),
            )
            .with_child(deduction("retenue_garantie", self.retenue_garantie))
            .with_child(deduction("compte_prorata", self.compte_prorata))
            .with_child(deduction("retenue_cie", self.retenue_cie))
            .with_child(
                TraceNode::new(TraceKind::Deduction, "adjustments").with_amount(self.adjustments_total),
            )
    }
}

/// A monthly progress invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct Situation {
    pub project: String,
    pub period: Period,
    /// 1 for the first situation, previous + 1 afterwards
    pub number: u32,
    pub state: SituationState,
    pub lines: Vec<SituationLine>,
    /// Cumulative amount of the previous situation, as stored
    pub prior_cumulative_ht: f64,
    /// Fixed external retention (compte inter-entreprises)
    pub retenue_cie: f64,
    pub adjustments: Vec<Adjustment>,
    pub billing: BillingConfig,
    /// Quote total plus avenants
    pub total_marche_ht: f64,
    pub structure_fingerprint: String,
}

impl Situation {
    /// Blank situation with every line at 0 %.
    pub fn new(project: impl Into<String>, period: Period, lines: Vec<SituationLine>) -> Self {
        let total_marche_ht = lines.iter().map(|l| l.amount_ht).sum();
        Self {
            project: project.into(),
            period,
            number: 1,
            state: SituationState::NoPriorSituation,
            lines,
            prior_cumulative_ht: 0.0,
            retenue_cie: 0.0,
            adjustments: Vec::new(),
            billing: BillingConfig::default(),
            total_marche_ht,
            structure_fingerprint: String::new(),
        }
    }

    pub fn with_billing(mut self, billing: BillingConfig) -> Self {
        self.billing = billing;
        self
    }

    pub fn line(&self, key: &LineKey) -> Option<&SituationLine> {
        self.lines.iter().find(|l| &l.key == key)
    }

    /// Set a line's progress. The value is clamped to `[0, 100]`.
    pub fn set_current_pct(&mut self, key: &LineKey, pct: f64) -> Result<()> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| &l.key == key)
            .ok_or_else(|| EngineError::NodeNotFound(key.to_string()))?;
        line.set_current(pct);
        Ok(())
    }

    /// Set every line to the same progress.
    pub fn set_all_current_pct(&mut self, pct: f64) {
        for line in &mut self.lines {
            line.set_current(pct);
        }
    }

    pub fn set_retenue_cie(&mut self, amount: f64) {
        self.retenue_cie = amount;
    }

    pub fn add_adjustment(&mut self, label: impl Into<String>, kind: AdjustmentKind, amount: f64) {
        self.adjustments.push(Adjustment {
            label: label.into(),
            kind,
            amount,
        });
    }

    /// Lines whose progress went down.
    pub fn regressions(&self) -> Vec<&SituationLine> {
        self.lines.iter().filter(|l| l.regressed).collect()
    }

    pub fn cumulative_ht(&self) -> f64 {
        self.lines.iter().map(SituationLine::cumulative_ht).sum()
    }

    pub fn breakdown(&self) -> SituationBreakdown {
        let cumulative_ht = self.cumulative_ht();
        let monthly_ht = cumulative_ht - self.prior_cumulative_ht;

        let retenue_garantie = monthly_ht * self.billing.retenue_garantie_pct / 100.0;
        let compte_prorata = monthly_ht * self.billing.taux_prorata_pct / 100.0;
        let adjustments_total: f64 = self.adjustments.iter().map(Adjustment::signed).sum();

        let net_ht =
            monthly_ht - retenue_garantie - compte_prorata - self.retenue_cie + adjustments_total;
        let tva = net_ht * self.billing.vat_pct / 100.0;

        let completion_pct = if self.total_marche_ht == 0.0 {
            0.0
        } else {
            cumulative_ht / self.total_marche_ht * 100.0
        };

        SituationBreakdown {
            cumulative_ht,
            prior_cumulative_ht: self.prior_cumulative_ht,
            monthly_ht,
            retenue_garantie,
            compte_prorata,
            retenue_cie: self.retenue_cie,
            adjustments_total,
            net_ht,
            tva,
            ttc: net_ht + tva,
            total_marche_ht: self.total_marche_ht,
            completion_pct,
            remaining_ht: self.total_marche_ht - cumulative_ht,
        }
    }

    /// Wire form, every amount as a 2-decimal string.
    pub fn to_record(&self) -> SituationRecord {
        let b = self.breakdown();
        SituationRecord {
            project: self.project.clone(),
            month: self.period.month,
            year: self.period.year,
            number: self.number,
            lines: self
                .lines
                .iter()
                .map(|l| SituationLineRecord {
                    key: l.key.clone(),
                    designation: l.designation.clone(),
                    amount_ht: format_money(l.amount_ht),
                    previous_pct: l.previous_pct,
                    current_pct: l.current_pct,
                })
                .collect(),
            adjustments: self
                .adjustments
                .iter()
                .map(|a| AdjustmentRecord {
                    label: a.label.clone(),
                    kind: a.kind,
                    amount: format_money(a.amount),
                })
                .collect(),
            cumulative_ht: format_money(b.cumulative_ht),
            prior_cumulative_ht: format_money(b.prior_cumulative_ht),
            monthly_ht: format_money(b.monthly_ht),
            retenue_garantie: format_money(b.retenue_garantie),
            compte_prorata: format_money(b.compte_prorata),
            retenue_cie: format_money(b.retenue_cie),
            net_ht: format_money(b.net_ht),
            tva: format_money(b.tva),
            ttc: format_money(b.ttc),
            total_marche_ht: format_money(b.total_marche_ht),
            vat_pct: self.billing.vat_pct,
            taux_prorata_pct: self.billing.taux_prorata_pct,
            retenue_garantie_pct: self.billing.retenue_garantie_pct,
            structure_fingerprint: self.structure_fingerprint.clone(),
        }
    }

    /// Rebuild a saved situation from its record.
    pub fn from_record(record: &SituationRecord) -> Result<Self> {
        let period = Period::new(record.month, record.year)?;
        let lines = record
            .lines
            .iter()
            .map(|l| {
                let mut line =
                    SituationLine::new(l.key.clone(), l.designation.clone(), parse_money(&l.amount_ht)?);
                line.previous_pct = clamp_percentage(l.previous_pct);
                line.set_current(l.current_pct);
                Ok(line)
            })
            .collect::<Result<Vec<_>>>()?;
        let adjustments = record
            .adjustments
            .iter()
            .map(|a| {
                Ok(Adjustment {
                    label: a.label.clone(),
                    kind: a.kind,
                    amount: parse_money(&a.amount)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            project: record.project.clone(),
            period,
            number: record.number,
            state: SituationState::Saved,
            lines,
            prior_cumulative_ht: parse_money(&record.prior_cumulative_ht)?,
            retenue_cie: parse_money(&record.retenue_cie)?,
            adjustments,
            billing: BillingConfig {
                vat_pct: record.vat_pct,
                taux_prorata_pct: record.taux_prorata_pct,
                retenue_garantie_pct: record.retenue_garantie_pct,
            },
            total_marche_ht: parse_money(&record.total_marche_ht)?,
            structure_fingerprint: record.structure_fingerprint.clone(),
        })
    }
}

/// Billable lines of a quote and its avenants, in document order.
///
/// Detail lines carry their raw amount; special lines their signed resolved
/// amount (display lines are not billable); avenant lines their signed
/// amount, avenants in number order.
pub fn billable_lines(tree: &Tree, totals: &Totals, avenants: &[Avenant]) -> Vec<SituationLine> {
    let mut lines = Vec::new();
    let push_special = |lines: &mut Vec<SituationLine>, special: &SpecialLine| {
        if special.kind == SpecialKind::Display {
            return;
        }
        let amount = totals
            .special(&special.id)
            .map(|s| s.signed())
            .unwrap_or(0.0);
        lines.push(SituationLine::new(
            LineKey::Special {
                id: special.id.clone(),
            },
            special.label.clone(),
            amount,
        ));
    };

    for part in &tree.parts {
        for sub in &part.subparts {
            for view in &sub.lines {
                lines.push(SituationLine::new(
                    LineKey::Detail {
                        id: view.line.id.clone(),
                    },
                    view.line.designation.clone(),
                    line_amount(&view.line),
                ));
            }
            for special in &sub.specials {
                push_special(&mut lines, special);
            }
        }
        for special in &part.specials {
            push_special(&mut lines, special);
        }
    }
    for special in &tree.specials {
        push_special(&mut lines, special);
    }

    let mut sorted: Vec<&Avenant> = avenants.iter().collect();
    sorted.sort_by_key(|a| a.number);
    for avenant in sorted {
        for line in &avenant.lines {
            lines.push(SituationLine::new(
                LineKey::Avenant {
                    avenant: avenant.id.clone(),
                    line: line.id.clone(),
                },
                line.designation.clone(),
                line.amount(),
            ));
        }
    }
    lines
}

/// Load the situation of a period, or draft it.
///
/// - A situation saved for the period is returned as is (`Saved`).
/// - Otherwise, if the previous month was saved, every line starts from the
///   percentage it reached then, and the prior cumulative is the stored one.
/// - Otherwise, if an earlier month was saved, the latest one is carried
///   forward the same way, so a month without billing bills nothing twice.
/// - Otherwise every line starts at 0 %.
pub fn build_situation_draft<S: QuoteStore + ?Sized>(
    store: &S,
    project: &str,
    month: u32,
    year: i32,
    billing: &BillingConfig,
) -> Result<Situation> {
    let period = Period::new(month, year)?;

    if let Some(record) = store.fetch_situation(project, period)? {
        tracing::debug!(project = %project, period = %period, "Loaded saved situation");
        return Situation::from_record(&record);
    }

    let stored = store.fetch_document(project)?;
    let tree = projector::project(&stored.document).tree;
    let totals = evaluate(&tree, &compute_bases(&tree))?;
    let avenants = store.fetch_avenants(project)?;
    validate_avenants(&avenants)?;

    let mut situation = Situation::new(project, period, billable_lines(&tree, &totals, &avenants))
        .with_billing(billing.clone());
    situation.total_marche_ht = totals.global + avenants_total(&avenants);
    situation.structure_fingerprint = structure_fingerprint(&stored.document);

    match store.fetch_situation(project, period.previous())? {
        Some(previous) => {
            carry_forward(&mut situation, &previous)?;
            tracing::debug!(
                project = %project,
                period = %period,
                number = situation.number,
                "Drafted situation from previous period"
            );
        }
        None => match latest_before(store, project, period)? {
            Some(previous) => {
                let from = Period::new(previous.month, previous.year)?;
                tracing::warn!(
                    project = %project,
                    period = %period,
                    from = %from,
                    "No situation for the previous month, carrying forward the latest one"
                );
                carry_forward(&mut situation, &previous)?;
            }
            None => {
                tracing::debug!(project = %project, period = %period, "Drafted first situation");
            }
        },
    }
    Ok(situation)
}

/// The most recent situation saved before `period`.
fn latest_before<S: QuoteStore + ?Sized>(
    store: &S,
    project: &str,
    period: Period,
) -> Result<Option<SituationRecord>> {
    let latest = store
        .list_situations(project)?
        .into_iter()
        .filter(|p| *p < period)
        .max();
    match latest {
        Some(p) => store.fetch_situation(project, p),
        None => Ok(None),
    }
}

fn carry_forward(situation: &mut Situation, previous: &SituationRecord) -> Result<()> {
    let reached: HashMap<&LineKey, f64> = previous
        .lines
        .iter()
        .map(|l| (&l.key, l.current_pct))
        .collect();

    for line in &mut situation.lines {
        if let Some(pct) = reached.get(&line.key) {
            line.previous_pct = clamp_percentage(*pct);
            line.current_pct = line.previous_pct;
        }
    }
    situation.prior_cumulative_ht = parse_money(&previous.cumulative_ht)?;
    situation.number = previous.number + 1;
    situation.state = SituationState::DraftFromPrevious;

    if !previous.structure_fingerprint.is_empty()
        && previous.structure_fingerprint != situation.structure_fingerprint
    {
        tracing::warn!(
            project = %situation.project,
            period = %situation.period,
            "Quote structure changed since the previous situation"
        );
    }
    Ok(())
}
