//! Expression-driven acceptance: accept-reject thinning and efficiency-correcting weights.

use rand::Rng;
use rand::rngs::StdRng;

use tf_core::{Acceptance, Error, EventTable, Result};

use crate::config::AcceptanceConfig;
use crate::expr::Expression;

/// Acceptance whose per-event efficiency is a column expression.
#[derive(Debug, Clone)]
pub struct ExpressionAcceptance {
    efficiency: Expression,
    max: f64,
}

impl ExpressionAcceptance {
    /// Compile an efficiency expression with its maximum.
    pub fn new(efficiency: &str, max: f64) -> Result<Self> {
        if !(max.is_finite() && max > 0.0 && max <= 1.0) {
            return Err(Error::config(format!("acceptance/max must be in (0, 1], got {max}")));
        }
        let efficiency = Expression::compile(efficiency)
            .map_err(|e| Error::config(format!("acceptance/efficiency -> {e}")))?;
        Ok(Self { efficiency, max })
    }

    /// Build from the `acceptance` configuration section.
    pub fn from_config(config: &AcceptanceConfig) -> Result<Self> {
        Self::new(&config.efficiency, config.max)
    }

    /// Per-row efficiency clamped to `[0, 1]`; non-finite values count as zero.
    pub fn efficiencies(&self, rows: &EventTable) -> Result<Vec<f64>> {
        Ok(self
            .efficiency
            .eval_table(rows)?
            .into_iter()
            .map(|e| if e.is_finite() { e.clamp(0.0, 1.0) } else { 0.0 })
            .collect())
    }
}

impl Acceptance for ExpressionAcceptance {
    fn accept_reject(&self, rows: &EventTable, rng: &mut StdRng) -> Result<EventTable> {
        let eff = self.efficiencies(rows)?;
        let keep: Vec<bool> = eff.iter().map(|e| rng.random::<f64>() < e / self.max).collect();
        rows.filter(&keep)
    }

    fn fit_weights(&self, rows: &EventTable) -> Result<Vec<f64>> {
        let eff = self.efficiencies(rows)?;
        if let Some(i) = eff.iter().position(|e| *e <= 0.0) {
            return Err(Error::Computation(format!(
                "acceptance efficiency is zero at row {i}; cannot weight rejected events"
            )));
        }
        let raw: Vec<f64> = eff.iter().map(|e| 1.0 / e).collect();
        let total: f64 = raw.iter().sum();
        let scale = raw.len() as f64 / total;
        Ok(raw.into_iter().map(|w| w * scale).collect())
    }
}
