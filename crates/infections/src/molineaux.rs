//! Molineaux infection dynamics (1-day step).
//!
//! The parasite population is split over 50 antigenic variants replicating
//! on a two-day cycle. Growth of each variant is curbed by three host
//! responses: variant-specific immunity, short-lived variant-transcending
//! immunity and long-lived general immunity, each a Hill function of an
//! exposure summation. A geometric switching scheme seeds later variants
//! from earlier ones, producing the characteristic chain of recrudescent
//! waves.
//!
//! Key quantities are sampled per infection: the first local maximum (the
//! density at which variant-transcending control engages), the mean of the
//! growth-control threshold governing infection length, and per-variant
//! multiplication factors. Option flags switch each of the first two from
//! log-normal to gamma sampling, select gamma-sampled multiplication
//! factors, and enable pairwise sampling of the first two from an observed
//! set of case pairs.

use serde::{Deserialize, Serialize};
use simclock::LocalRng;

use crate::DensityUpdate;

/// Number of antigenic variants.
pub const VARIANTS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MolineauxParams {
    /// Days per replication cycle.
    pub cycle_days: i32,
    /// Hill slope of variant-specific immunity.
    pub kappa_v: f64,
    /// Hill slope of short-lived variant-transcending immunity.
    pub kappa_c: f64,
    /// Hill slope of long-lived general immunity.
    pub kappa_m: f64,
    /// Variant-specific immune threshold (parasites/µl).
    pub pstar_v: f64,
    /// Decay per day of the variant-specific summation.
    pub rho_v: f64,
    /// Decay per day of the short-lived transcending summation.
    pub rho_c: f64,
    /// Residual growth under full immune control.
    pub beta_min: f64,
    /// Fraction of each variant switching onward per cycle.
    pub switching_rate: f64,
    /// Geometric ratio of the variant switching distribution.
    pub switching_q: f64,
    /// Mean and spread (log scale) of the first local maximum.
    pub first_max_mu: f64,
    pub first_max_sigma: f64,
    /// Mean and spread (log scale) of the transcending threshold that sets
    /// the mean infection duration.
    pub duration_mu: f64,
    pub duration_sigma: f64,
    /// Per-variant multiplication factor distribution (per cycle).
    pub mult_mean: f64,
    pub mult_sd: f64,
    /// Initial inoculum density (parasites/µl).
    pub initial_density: f64,
    /// Densities below this end the infection (parasites/µl).
    pub extinction_density: f64,
    /// Sample the first local maximum from a gamma distribution.
    pub first_max_gamma: bool,
    /// Sample the duration threshold from a gamma distribution.
    pub mean_duration_gamma: bool,
    /// Sample multiplication factors from a gamma distribution.
    pub replication_gamma: bool,
    /// Draw first-maximum/duration jointly from observed case pairs.
    pub pairwise_sample: bool,
    /// Observed `(log10 first maximum, log10 duration threshold)` pairs for
    /// pairwise sampling.
    pub case_pairs: Vec<(f64, f64)>,
}

impl Default for MolineauxParams {
    fn default() -> Self {
        MolineauxParams {
            cycle_days: 2,
            kappa_v: 3.0,
            kappa_c: 3.0,
            kappa_m: 1.6,
            pstar_v: 30.0,
            rho_v: 0.0,
            rho_c: 0.2,
            beta_min: 0.01,
            switching_rate: 0.02,
            switching_q: 0.3,
            first_max_mu: 4.3, // log10 scale: first peak near 2·10^4/µl
            first_max_sigma: 0.35,
            duration_mu: 4.2, // log10 scale
            duration_sigma: 0.4,
            mult_mean: 16.0,
            mult_sd: 10.4,
            initial_density: 0.1,
            extinction_density: 1e-4,
            first_max_gamma: false,
            mean_duration_gamma: false,
            replication_gamma: false,
            pairwise_sample: false,
            case_pairs: observed_case_pairs(),
        }
    }
}

/// Observed first-maximum/duration pairs (log10 scale) used by the
/// pairwise sampling option.
fn observed_case_pairs() -> Vec<(f64, f64)> {
    vec![
        (4.03, 3.87), (4.12, 4.23), (4.64, 3.71), (4.25, 4.05), (3.86, 4.31),
        (4.48, 3.94), (4.71, 3.66), (3.97, 4.12), (4.31, 4.27), (4.55, 3.82),
        (4.09, 4.41), (4.42, 3.78), (3.78, 4.19), (4.60, 3.90), (4.18, 4.08),
        (4.37, 4.35), (3.92, 3.85), (4.67, 4.01), (4.05, 4.16), (4.51, 3.74),
        (4.22, 4.29), (3.83, 3.97), (4.45, 4.11), (4.14, 3.81), (4.58, 4.24),
        (4.00, 3.92), (4.34, 4.38), (4.69, 3.69), (3.89, 4.14), (4.27, 3.88),
        (4.53, 4.21), (4.07, 3.76), (4.40, 4.32), (3.95, 4.03), (4.62, 3.95),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MolineauxState {
    /// Circulating density per variant (parasites/µl).
    variants: Vec<f64>,
    /// Per-variant multiplication factor per cycle.
    mult: Vec<f64>,
    /// Variant-specific exposure summations.
    exposure_v: Vec<f64>,
    /// Short-lived variant-transcending exposure summation.
    exposure_c: f64,
    /// Long-lived general exposure summation.
    exposure_m: f64,
    /// Threshold at which transcending control engages (parasites/µl).
    pstar_c: f64,
    /// Threshold of the long-lived response (parasites/µl).
    pstar_m: f64,
}

impl MolineauxState {
    pub fn new(params: &MolineauxParams, rng: &mut LocalRng) -> Self {
        let (first_max_log10, duration_log10) = if params.pairwise_sample {
            params.case_pairs[rng.uniform_usize(params.case_pairs.len())]
        } else {
            let fm = sample_log10(
                rng,
                params.first_max_mu,
                params.first_max_sigma,
                params.first_max_gamma,
            );
            let dur = sample_log10(
                rng,
                params.duration_mu,
                params.duration_sigma,
                params.mean_duration_gamma,
            );
            (fm, dur)
        };
        let pstar_c = 10f64.powf(first_max_log10);
        let pstar_m = 10f64.powf(duration_log10);

        let mut mult = Vec::with_capacity(VARIANTS);
        for _ in 0..VARIANTS {
            let m = if params.replication_gamma {
                let shape = (params.mult_mean / params.mult_sd).powi(2);
                let scale = params.mult_sd * params.mult_sd / params.mult_mean;
                rng.gamma(shape, scale)
            } else {
                rng.gauss(params.mult_mean, params.mult_sd)
            };
            // Parasites always replicate; a factor below 1 would model decay
            // without any immune involvement.
            mult.push(m.max(1.0));
        }

        let mut variants = vec![0.0; VARIANTS];
        variants[0] = params.initial_density;

        MolineauxState {
            variants,
            mult,
            exposure_v: vec![0.0; VARIANTS],
            exposure_c: 0.0,
            exposure_m: 0.0,
            pstar_c,
            pstar_m,
        }
    }

    pub fn update(
        &mut self,
        params: &MolineauxParams,
        survival_factor: f64,
        bs_age_days: i32,
    ) -> DensityUpdate {
        let total_before: f64 = self.variants.iter().sum();

        // Exposure summations decay daily and take up current densities.
        self.exposure_c = self.exposure_c * (-params.rho_c).exp() + total_before;
        self.exposure_m += total_before;
        for (ev, &p) in self.exposure_v.iter_mut().zip(self.variants.iter()) {
            *ev = *ev * (-params.rho_v).exp() + p;
        }

        // Growth happens once per replication cycle.
        if bs_age_days % params.cycle_days == 0 && bs_age_days > 0 {
            let s_c = hill(self.exposure_c, self.pstar_c, params.kappa_c, params.beta_min);
            let s_m = hill(self.exposure_m, self.pstar_m, params.kappa_m, params.beta_min);
            let mut grown = vec![0.0; VARIANTS];
            let mut switched = vec![0.0; VARIANTS];
            for i in 0..VARIANTS {
                let p = self.variants[i];
                if p <= 0.0 {
                    continue;
                }
                let s_v = hill(self.exposure_v[i], params.pstar_v, params.kappa_v, params.beta_min);
                let next = p * self.mult[i] * s_v * s_c * s_m;
                let moving = next * params.switching_rate;
                grown[i] = next - moving;
                // Later variants are seeded geometrically.
                let mut weight = 1.0 - params.switching_q;
                let mut norm = 0.0;
                for j in (i + 1)..VARIANTS {
                    norm += weight;
                    switched[j] += moving * weight;
                    weight *= params.switching_q;
                }
                if norm <= 0.0 {
                    grown[i] += moving; // last variant keeps its parasites
                }
            }
            for i in 0..VARIANTS {
                self.variants[i] = grown[i] + switched[i];
            }
        }

        // Drugs and host survival pressure act daily on every variant.
        let mut total = 0.0;
        for p in self.variants.iter_mut() {
            *p *= survival_factor;
            if *p < params.extinction_density {
                *p = 0.0;
            }
            total += *p;
        }

        DensityUpdate {
            density: total,
            extinct: total < params.extinction_density,
        }
    }
}

fn sample_log10(rng: &mut LocalRng, mu: f64, sigma: f64, gamma: bool) -> f64 {
    if gamma {
        let shape = (mu / sigma).powi(2);
        let scale = sigma * sigma / mu;
        rng.gamma(shape, scale)
    } else {
        rng.gauss(mu, sigma)
    }
}

/// Immune escape probability: `(1-β)/(1+(X/X*)^κ) + β`.
fn hill(exposure: f64, threshold: f64, kappa: f64, beta_min: f64) -> f64 {
    (1.0 - beta_min) / (1.0 + (exposure / threshold).powf(kappa)) + beta_min
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_extinction(params: &MolineauxParams, rng: &mut LocalRng, max_days: i32) -> Option<i32> {
        let mut s = MolineauxState::new(params, rng);
        for day in 0..max_days {
            if s.update(params, 1.0, day).extinct {
                return Some(day);
            }
        }
        None
    }

    #[test]
    fn infection_peaks_then_wanes() {
        let params = MolineauxParams::default();
        let mut rng = LocalRng::seed(51);
        let mut s = MolineauxState::new(&params, &mut rng);
        let mut peak = 0.0;
        let mut last = 0.0;
        for day in 0..400 {
            let u = s.update(&params, 1.0, day);
            peak = f64::max(peak, u.density);
            last = u.density;
            if u.extinct {
                break;
            }
        }
        assert!(peak > 100.0, "no parasitaemia wave, peak {peak}");
        assert!(last < peak, "infection never waned");
    }

    #[test]
    fn most_untreated_infections_end_within_two_years() {
        let params = MolineauxParams::default();
        let mut rng = LocalRng::seed(52);
        let ended = (0..20)
            .filter(|_| run_to_extinction(&params, &mut rng, 730).is_some())
            .count();
        assert!(ended >= 12, "only {ended}/20 ended");
    }

    #[test]
    fn option_flags_change_sampling_but_stay_valid() {
        let mut rng = LocalRng::seed(53);
        for params in [
            MolineauxParams {
                first_max_gamma: true,
                ..MolineauxParams::default()
            },
            MolineauxParams {
                mean_duration_gamma: true,
                replication_gamma: true,
                ..MolineauxParams::default()
            },
            MolineauxParams {
                pairwise_sample: true,
                ..MolineauxParams::default()
            },
        ] {
            let s = MolineauxState::new(&params, &mut rng);
            assert!(s.pstar_c > 0.0 && s.pstar_m > 0.0);
            assert!(s.mult.iter().all(|&m| m >= 1.0));
        }
    }

    #[test]
    fn drug_pressure_shortens_the_infection() {
        let params = MolineauxParams::default();
        let mut rng = LocalRng::seed(54);
        let mut s = MolineauxState::new(&params, &mut rng);
        let mut cleared = None;
        for day in 0..60 {
            if s.update(&params, 0.03, day).extinct {
                cleared = Some(day);
                break;
            }
        }
        assert!(cleared.is_some(), "drugs failed to clear the infection");
    }
}
