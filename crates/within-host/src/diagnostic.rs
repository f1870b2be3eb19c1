//! Parasitological diagnostics.
//!
//! A diagnostic is either deterministic (positive at or above a density
//! threshold, with a zero threshold meaning "any parasites") or stochastic,
//! where the probability of a positive result rises with density following
//! a Hill curve anchored at `dens_50` and bounded below by the false
//! positive rate `1 - specificity`. HRP2-based tests read the HRP2-bearing
//! density, so deletion-carrying infections are invisible to them.

use serde::{Deserialize, Serialize};
use simclock::LocalRng;

use crate::{Result, WithinHostError};

/// Hill shape of the stochastic positivity curve.
const DENSITY_SHAPE: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Positive iff density ≥ threshold; 0 means any parasites.
    Deterministic { threshold: f64 },
    /// Positive with probability `1 - s·d^γ/(ρ^γ + d^γ)`.
    Stochastic { dens_50: f64, specificity: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Read the HRP2-bearing density instead of the total density.
    pub uses_hrp2: bool,
}

impl Diagnostic {
    pub fn deterministic(threshold: f64) -> Result<Self> {
        if !(threshold >= 0.0) {
            return Err(WithinHostError::BadDiagnostic(
                "deterministic threshold must be non-negative".into(),
            ));
        }
        Ok(Diagnostic {
            kind: DiagnosticKind::Deterministic { threshold },
            uses_hrp2: false,
        })
    }

    pub fn stochastic(dens_50: f64, specificity: f64) -> Result<Self> {
        if !(dens_50 > 0.0) || !(0.0..=1.0).contains(&specificity) {
            return Err(WithinHostError::BadDiagnostic(
                "stochastic diagnostic needs dens_50 > 0 and specificity in [0,1]".into(),
            ));
        }
        Ok(Diagnostic {
            kind: DiagnosticKind::Stochastic {
                dens_50,
                specificity,
            },
            uses_hrp2: false,
        })
    }

    pub fn with_hrp2(mut self) -> Self {
        self.uses_hrp2 = true;
        self
    }

    /// Run the test at a density (parasites/µl). `density_bias` rescales
    /// observed densities for hosts whose sampled blood volume differs;
    /// `None` applies no bias.
    pub fn is_positive(&self, rng: &mut LocalRng, density: f64, density_bias: Option<f64>) -> bool {
        let x = match density_bias {
            Some(bias) => density * bias,
            None => density,
        };
        match self.kind {
            DiagnosticKind::Deterministic { threshold } => {
                if threshold == 0.0 {
                    x > 0.0
                } else {
                    x >= threshold
                }
            }
            DiagnosticKind::Stochastic {
                dens_50,
                specificity,
            } => {
                let q = if x <= 0.0 {
                    0.0
                } else {
                    let xn = x.powf(DENSITY_SHAPE);
                    xn / (xn + dens_50.powf(DENSITY_SHAPE))
                };
                rng.bernoulli(1.0 + specificity * (q - 1.0))
            }
        }
    }
}

/// The named diagnostics loaded from the scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<(String, Diagnostic)>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn insert(&mut self, name: &str, diagnostic: Diagnostic) -> Result<()> {
        if self.entries.iter().any(|(n, _)| n == name) {
            return Err(WithinHostError::BadDiagnostic(format!(
                "duplicate diagnostic name: {name}"
            )));
        }
        self.entries.push((name.to_string(), diagnostic));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Diagnostic> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
            .ok_or_else(|| WithinHostError::UnknownDiagnostic(name.to_string()))
    }
}
