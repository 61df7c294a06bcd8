//! Configuration for the devis engine
//!
//! Compile-time constants cover:
//! - Position spacing (fractional index gaps, renumbering threshold)
//! - Billing rates that are fixed by contract law (retenue de garantie)
//! - Resource limits on loaded documents
//!
//! Runtime billing settings (VAT rate, compte prorata) live in
//! [`BillingConfig`], built from the environment or set explicitly.

use crate::error::{EngineError, Result};

/// Base spacing between siblings.
///
/// Top-level nodes are spaced by `1.0`; each level down divides the spacing
/// by ten, so the children of a Part at `2.0` land at `2.1`, `2.2`, ...
pub const POSITION_EPSILON: f64 = 0.1;

/// Smallest usable gap between two neighbouring positions.
///
/// Below this the enclosing scope is renumbered instead of bisected.
pub const MIN_POSITION_GAP: f64 = 1e-9;

/// Retenue de garantie, as a percentage of the monthly amount.
pub const RETENUE_GARANTIE_PCT: f64 = 5.0;

/// Default VAT rate in percent.
pub const DEFAULT_VAT_PCT: f64 = 20.0;

/// Default compte prorata rate in percent.
pub const DEFAULT_TAUX_PRORATA_PCT: f64 = 0.0;

/// Maximum document size in bytes (1 MB).
pub const MAX_DOCUMENT_SIZE: usize = 1_000_000;

/// Maximum number of nodes in a single document.
pub const MAX_NODES: usize = 10_000;

/// Maximum number of avenants attached to a project.
pub const MAX_AVENANTS: usize = 500;

/// Maximum number of special lines taking a percentage of the global total.
///
/// Resolving their bases is cubic in this count.
pub const MAX_GLOBAL_PERCENTAGE_LINES: usize = 256;

/// Spacing for the children of a scope at `depth` (0 = document root).
pub fn epsilon_for_depth(depth: usize) -> f64 {
    POSITION_EPSILON.powi(depth as i32)
}

/// Billing rates applied when computing a situation.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingConfig {
    /// VAT rate in percent
    pub vat_pct: f64,
    /// Compte prorata rate in percent of the monthly amount
    pub taux_prorata_pct: f64,
    /// Retenue de garantie rate in percent of the monthly amount
    pub retenue_garantie_pct: f64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            vat_pct: DEFAULT_VAT_PCT,
            taux_prorata_pct: DEFAULT_TAUX_PRORATA_PCT,
            retenue_garantie_pct: RETENUE_GARANTIE_PCT,
        }
    }
}

impl BillingConfig {
    /// Read rates from `DEVIS_VAT_RATE`, `DEVIS_TAUX_PRORATA` and
    /// `DEVIS_RETENUE_GARANTIE`, falling back to defaults when unset.
    ///
    /// A variable that is set but not a finite number is an error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            vat_pct: env_rate("DEVIS_VAT_RATE")?.unwrap_or(defaults.vat_pct),
            taux_prorata_pct: env_rate("DEVIS_TAUX_PRORATA")?
                .unwrap_or(defaults.taux_prorata_pct),
            retenue_garantie_pct: env_rate("DEVIS_RETENUE_GARANTIE")?
                .unwrap_or(defaults.retenue_garantie_pct),
        })
    }

    pub fn with_vat(mut self, vat_pct: f64) -> Self {
        self.vat_pct = vat_pct;
        self
    }

    pub fn with_taux_prorata(mut self, taux_prorata_pct: f64) -> Self {
        self.taux_prorata_pct = taux_prorata_pct;
        self
    }

    pub fn with_retenue_garantie(mut self, retenue_garantie_pct: f64) -> Self {
        self.retenue_garantie_pct = retenue_garantie_pct;
        self
    }
}

fn env_rate(name: &str) -> Result<Option<f64>> {
    match std::env::var(name) {
        Ok(raw) => parse_rate(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_rate(name: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| EngineError::InvalidAmount(format!("{name}={raw}")))
}
