//! Acquired and innate immunity against blood-stage parasites.
//!
//! Exposure-driven immunity is tracked by two cumulative quantities:
//! `cumulative_h`, the count of past inoculations surviving to the blood
//! stage, and `cumulative_y`, the integral of parasite density over time.
//! Both decay each step; their combined effect with age-dependent maternal
//! protection gives a multiplicative survival factor for parasites.

use serde::{Deserialize, Serialize};

/// Immunity decay and effect parameters, fitted at scenario calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmunityParams {
    /// Saturation constant of the infection-count effect.
    pub cumulative_h_star: f64,
    /// Saturation constant of the cumulative-density effect.
    pub cumulative_y_star: f64,
    /// Maximal maternal-immunity effect at birth.
    pub alpha_m: f64,
    /// Decay rate of maternal immunity, per year of age.
    pub decay_m: f64,
    /// Spread of the innate survival factor sampled at birth.
    pub sigma_i: f64,
    /// Per-step retention of immune effectors (1 = no decay).
    pub imm_effector_remain: f64,
    /// Per-step retention of asexual-stage immunity (1 = no decay).
    pub asex_imm_remain: f64,
    /// Penalty applied to `cumulative_y` on treatment failure.
    pub imm_penalty: f64,
}

impl Default for ImmunityParams {
    fn default() -> Self {
        ImmunityParams {
            cumulative_h_star: 71.676,
            cumulative_y_star: 1.286e6,
            alpha_m: 0.9,
            decay_m: 2.53,
            sigma_i: 0.1711,
            imm_effector_remain: 1.0,
            asex_imm_remain: 1.0,
            imm_penalty: 0.288,
        }
    }
}

/// Per-host immunity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Immunity {
    /// Past inoculations surviving to the blood stage.
    pub cumulative_h: f64,
    /// Integrated density × days.
    pub cumulative_y: f64,
    /// `cumulative_y` before this step's accrual; reference point for the
    /// treatment-failure penalty.
    pub cumulative_y_lag: f64,
    /// Innate survival multiplier, sampled once at birth.
    pub innate_survival: f64,
}

impl Immunity {
    pub fn new(params: &ImmunityParams, rng: &mut simclock::LocalRng) -> Self {
        Immunity {
            cumulative_h: 0.0,
            cumulative_y: 0.0,
            cumulative_y_lag: 0.0,
            innate_survival: (-rng.gauss(0.0, params.sigma_i)).exp(),
        }
    }

    /// Per-step decay of the cumulative exposure quantities.
    pub fn decay(&mut self, params: &ImmunityParams) {
        if params.imm_effector_remain < 1.0 {
            self.cumulative_h *= params.imm_effector_remain;
            self.cumulative_y *= params.imm_effector_remain;
        }
        if params.asex_imm_remain < 1.0 {
            self.cumulative_h *= params.asex_imm_remain
                / (1.0
                    + self.cumulative_h * (1.0 - params.asex_imm_remain)
                        / params.cumulative_h_star);
            self.cumulative_y *= params.asex_imm_remain
                / (1.0
                    + self.cumulative_y * (1.0 - params.asex_imm_remain)
                        / params.cumulative_y_star);
        }
        self.cumulative_y_lag = self.cumulative_y;
    }

    /// Survival multiplier from acquired and maternal immunity for an
    /// infection whose own exposure contribution is `exposure_j`.
    pub fn survival_factor(&self, params: &ImmunityParams, age_years: f64, exposure_j: f64) -> f64 {
        let (d_y, d_h);
        if self.cumulative_h <= 1.0 {
            d_y = 1.0;
            d_h = 1.0;
        } else {
            d_h = 1.0 / (1.0 + (self.cumulative_h - 1.0) / params.cumulative_h_star);
            d_y = 1.0
                / (1.0 + (self.cumulative_y - exposure_j) / params.cumulative_y_star);
        }
        let d_a = 1.0 - params.alpha_m * (-params.decay_m * age_years).exp();
        (d_y * d_h * d_a).min(1.0)
    }

    /// Reduce `cumulative_y` after an unsuccessful treatment: the newly
    /// gained exposure counts against the host.
    pub fn penalise(&mut self, params: &ImmunityParams) {
        self.cumulative_y =
            self.cumulative_y_lag - params.imm_penalty * (self.cumulative_y - self.cumulative_y_lag);
        if self.cumulative_y < 0.0 {
            self.cumulative_y = 0.0;
        }
    }

    /// Forget all acquired immunity (intervention hook).
    pub fn clear(&mut self) {
        self.cumulative_h = 0.0;
        self.cumulative_y_lag = 0.0;
    }
}
