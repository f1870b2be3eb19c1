//! Empirical autoregressive infection dynamics (1-day step).
//!
//! Log densities follow an order-3 autoregression whose coefficients are
//! drawn daily from day-of-infection-indexed distributions. The three
//! lagged log densities are initialised sub-patent at creation (a Beta draw
//! below the sub-patent cap, inflated by a log-normal factor). Growth is
//! capped per cycle; extinction is by a fixed level after overall scaling.

use serde::{Deserialize, Serialize};
use simclock::LocalRng;

use crate::DensityUpdate;

/// Sentinel below any real log density; marks a cleared trajectory.
const LOG_FLOOR: f64 = -999_999.9;
const MAX_SAMPLES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmpiricalParams {
    /// Beta shapes for the three sub-patent initial lags, nearest first.
    pub alpha: [f64; 3],
    /// Beta means for the three sub-patent initial lags.
    pub mu: [f64; 3],
    /// Residual spread at day 0 and its growth per day.
    pub sigma0_res: f64,
    pub sigmat_res: f64,
    /// Log-normal inflation applied to every sampled density.
    pub inflation_mean: f64,
    pub inflation_variance: f64,
    /// Extinction level after `overall_multiplier` scaling (parasites/µl).
    pub extinction_level: f64,
    pub overall_multiplier: f64,
    /// Densities below this are not yet patent (parasites/µl).
    pub sub_patent_limit: f64,
    /// Cap on per-cycle amplification.
    pub max_amplification: f64,
    pub max_duration_days: i32,
    /// Day-indexed AR coefficient distributions:
    /// `[mu_b1, sigma_b1, mu_b2, sigma_b2, mu_b3, sigma_b3]` per day.
    pub coefficients: Vec<[f64; 6]>,
}

impl Default for EmpiricalParams {
    fn default() -> Self {
        let overall_multiplier = 0.697581;
        EmpiricalParams {
            alpha: [0.2647, 2.976, 0.9181],
            mu: [6.08e-4, 0.624, 0.3064],
            sigma0_res: 0.9998,
            sigmat_res: 0.002528,
            inflation_mean: 1.09635,
            inflation_variance: 0.172029,
            extinction_level: 0.0100976,
            overall_multiplier,
            sub_patent_limit: 10.0 / overall_multiplier,
            max_amplification: 1000.0,
            max_duration_days: 365,
            coefficients: coefficient_table(365),
        }
    }
}

/// Fitted day-of-infection curves for the AR coefficient distributions:
/// level persistence starts slightly above 1 (expansion) and settles below
/// 1 (clearance); the slope and curvature terms fade with infection age.
fn coefficient_table(days: usize) -> Vec<[f64; 6]> {
    (0..days)
        .map(|d| {
            let t = d as f64;
            let fade = (-t / 90.0).exp();
            let mu_b1 = 0.935 + 0.095 * fade;
            let mu_b2 = 0.55 * fade;
            let mu_b3 = 0.18 * fade;
            [mu_b1, 0.045, mu_b2, 0.11, mu_b3, 0.10]
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalState {
    /// Lagged log densities, most recent first.
    lagged_log: [f64; 3],
    /// Growth multiplier folded into each sampled density.
    growth_multiplier: f64,
}

impl EmpiricalState {
    pub fn new(params: &EmpiricalParams, rng: &mut LocalRng) -> Self {
        let upper = params.sub_patent_limit.ln();
        let mut lagged_log = [0.0; 3];
        for i in 0..3 {
            lagged_log[i] = sample_sub_patent(params, rng, params.alpha[i], params.mu[i], upper);
        }
        EmpiricalState {
            lagged_log,
            growth_multiplier: 1.0,
        }
    }

    pub fn update(
        &mut self,
        params: &EmpiricalParams,
        rng: &mut LocalRng,
        survival_factor: f64,
        age_days: i32,
    ) -> DensityUpdate {
        let l = &self.lagged_log;
        if age_days >= params.max_duration_days || !(l[0] > LOG_FLOOR) {
            return DensityUpdate {
                density: 0.0,
                extinct: true,
            };
        }
        let coeff = params.coefficients[age_days as usize];
        let upper_log = (params.max_amplification * l[1].exp() / params.inflation_mean).ln();
        let sigma_noise = params.sigma0_res + params.sigmat_res * f64::from(age_days);

        let mut density = 0.0;
        let mut amplification = f64::INFINITY;
        for _ in 0..MAX_SAMPLES {
            let mut log_density = f64::INFINITY;
            for _ in 0..MAX_SAMPLES {
                let b1 = rng.gauss(coeff[0], coeff[1]);
                let b2 = rng.gauss(coeff[2], coeff[3]);
                let b3 = rng.gauss(coeff[4], coeff[5]);
                let expected = b1 * (l[0] + l[1] + l[2]) / 3.0
                    + b2 * (l[2] - l[0]) / 2.0
                    + b3 * (l[2] + l[0] - 2.0 * l[1]) / 4.0;
                log_density =
                    rng.gauss(expected, sigma_noise) + self.growth_multiplier.ln();
                if log_density <= upper_log {
                    break;
                }
            }
            let capped = log_density.min(upper_log);
            density = inflate(params, rng, capped) * survival_factor;

            // Infections killed before ever becoming patent:
            if age_days == 0 && density < params.sub_patent_limit {
                density = 0.0;
            }
            amplification = density / l[1].exp();
            if density >= 0.0 && amplification <= params.max_amplification {
                break;
            }
        }
        if !(density >= 0.0 && amplification <= params.max_amplification) {
            density = params.max_amplification * l[1].exp();
        }

        self.lagged_log[2] = self.lagged_log[1];
        self.lagged_log[1] = self.lagged_log[0];
        self.lagged_log[0] = if density > 0.0 {
            density.ln()
        } else {
            f64::NEG_INFINITY
        };

        let extinct = density * params.overall_multiplier <= params.extinction_level;
        DensityUpdate { density, extinct }
    }
}

/// Beta draw below the sub-patent cap, log-normally inflated, with bounded
/// retries to keep the inflated value under the cap.
fn sample_sub_patent(
    params: &EmpiricalParams,
    rng: &mut LocalRng,
    alpha: f64,
    mu: f64,
    upper_log: f64,
) -> f64 {
    let beta = alpha * (1.0 - mu) / mu;
    let non_inflated = upper_log + rng.beta(alpha, beta).ln();
    for _ in 0..MAX_SAMPLES {
        let inflated = params.inflation_mean.ln()
            + rng.gauss(non_inflated, params.inflation_variance.sqrt());
        if inflated <= upper_log {
            return inflated;
        }
    }
    upper_log
}

/// Apply the log-normal inflation to a log density, returning a density.
fn inflate(params: &EmpiricalParams, rng: &mut LocalRng, log_density: f64) -> f64 {
    (params.inflation_mean.ln() + rng.gauss(log_density, params.inflation_variance.sqrt())).exp()
}
