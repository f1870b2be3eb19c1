//! Descriptive infection dynamics (5-day cadence).
//!
//! Blood-stage densities follow an empirical age-of-infection profile: on
//! each 5-day cycle the density is redrawn from a log-normal whose location
//! and spread depend on how long the infection has run, then scaled by the
//! survival factor. The infection self-terminates after a duration drawn
//! once at creation, bounded between 5 days and about two years.

use serde::{Deserialize, Serialize};
use simclock::LocalRng;

use crate::DensityUpdate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptiveParams {
    /// Location of the log-duration distribution (log days).
    pub duration_mu: f64,
    /// Spread of the log-duration distribution.
    pub duration_sigma: f64,
    pub min_duration_days: i32,
    pub max_duration_days: i32,
    /// Days between density redraws (the model's native step).
    pub cycle_days: i32,
    /// Densities below this end the infection early (parasites/µl).
    pub extinction_density: f64,
    /// Correct the per-step maximum density over concurrent infections
    /// (switchable for compatibility with older parameterisations).
    pub max_dens_correction: bool,
    /// Apply the innate multiplier to the per-step maximum as well.
    pub innate_max_dens: bool,
    /// Density profile per 5-day stage of infection: `(log10 location,
    /// log10 spread)`. Built once at load.
    pub profile: Vec<(f64, f64)>,
}

impl Default for DescriptiveParams {
    fn default() -> Self {
        DescriptiveParams {
            duration_mu: 5.13,
            duration_sigma: 0.8,
            min_duration_days: 5,
            max_duration_days: 730,
            cycle_days: 5,
            extinction_density: 0.1,
            max_dens_correction: true,
            innate_max_dens: true,
            profile: density_profile(146),
        }
    }
}

/// Fitted log10-density profile by stage of infection: a fast rise to a
/// peak in the first month, then a slow decline as the host gains control.
fn density_profile(stages: usize) -> Vec<(f64, f64)> {
    (0..stages)
        .map(|s| {
            let day = (s * 5) as f64;
            let rise = 1.0 - (-day / 9.0).exp();
            let decline = (-day / 130.0).exp();
            let mu = (0.8 + 3.9 * rise * decline).max(0.5);
            let sigma = 0.65 + 0.15 * (-day / 50.0).exp();
            (mu, sigma)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveState {
    /// Total blood-stage duration, fixed at creation.
    duration_days: i32,
    density: f64,
}

impl DescriptiveState {
    pub fn new(params: &DescriptiveParams, rng: &mut LocalRng) -> Self {
        let dur = rng.log_normal(params.duration_mu, params.duration_sigma);
        let duration_days = (dur.round() as i32)
            .clamp(params.min_duration_days, params.max_duration_days);
        DescriptiveState {
            duration_days,
            density: 0.0,
        }
    }

    pub fn duration_days(&self) -> i32 {
        self.duration_days
    }

    pub fn update(
        &mut self,
        params: &DescriptiveParams,
        rng: &mut LocalRng,
        survival_factor: f64,
        bs_age_days: i32,
    ) -> DensityUpdate {
        if bs_age_days >= self.duration_days {
            return DensityUpdate {
                density: 0.0,
                extinct: true,
            };
        }
        // Redraw on the model's native cadence; days in between carry the
        // drawn density (the survival factor is constant within a step).
        if bs_age_days % params.cycle_days == 0 {
            let stage = (bs_age_days / params.cycle_days) as usize;
            let (mu, sigma) = params
                .profile
                .get(stage)
                .copied()
                .unwrap_or(*params.profile.last().expect("profile is non-empty"));
            let log10_density = rng.gauss(mu, sigma);
            self.density = 10f64.powf(log10_density) * survival_factor;
        }
        if self.density < params.extinction_density {
            return DensityUpdate {
                density: 0.0,
                extinct: true,
            };
        }
        DensityUpdate {
            density: self.density,
            extinct: false,
        }
    }
}
