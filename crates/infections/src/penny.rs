//! Penny infection dynamics (1-day step).
//!
//! Three interacting immune responses control the parasite population:
//! innate (N), clonal (C) and variant-specific (V). Circulating and
//! sequestered densities alternate on the two-day replication cycle; ring
//! buffers of recent densities feed delayed antibody responses. A new
//! dominant antigenic variant arrives as a Bernoulli event and resets the
//! variant-specific summation.
//!
//! Each response takes the form `(1-β)/(1 + (X/T)^κ) + β`, where `X` is the
//! relevant effective exposure and `T` a per-infection threshold sampled at
//! creation under the invariant `T_N > T_C` and `T_N > T_V`.

use serde::{Deserialize, Serialize};
use simclock::{mod_nn_i, LocalRng, SimTime};

use crate::DensityUpdate;

/// Delay of the clonal antibody response, days.
pub const DELTA_C: usize = 7;
/// Delay of the variant-specific antibody response, days.
pub const DELTA_V: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PennyParams {
    // Innate immunity
    pub beta_n: f64,
    pub psi_n: f64,
    pub kappa_n: f64,
    pub sigma_epsilon: f64,
    // Clonal immunity
    pub beta_c: f64,
    pub psi_c: f64,
    pub kappa_c: f64,
    pub rho_c: f64,
    // Variant-specific immunity
    pub beta_v: f64,
    pub kappa_v: f64,
    pub rho_v: f64,
    /// Mean inter-arrival time of new dominant variants, days.
    pub lambda_v: f64,
    // Initial density distributions (log scale)
    pub mu_y: f64,
    pub sigma_y: f64,
    pub a_y: f64,
    pub b_y: f64,
    pub mu_x: f64,
    pub sigma_x: f64,
    pub a_x: f64,
    pub b_x: f64,
    // Immune threshold distributions (log scale)
    pub mu_tn: f64,
    pub sigma_tn: f64,
    pub a_tn: f64,
    pub b_tn: f64,
    pub mu_tc: f64,
    pub sigma_tc: f64,
    pub a_tc: f64,
    pub b_tc: f64,
    pub mu_tv: f64,
    pub sigma_tv: f64,
    pub a_tv: f64,
    pub b_tv: f64,
    /// Replication per two-day cycle.
    pub m_rep: f64,
    /// Critical density ending the infection (parasites/µl).
    pub omega: f64,
    /// Sample immune thresholds from gamma instead of log-normal.
    pub immune_threshold_gamma: bool,
    /// Sample density updates from gamma instead of log-normal.
    pub update_density_gamma: bool,
}

impl Default for PennyParams {
    fn default() -> Self {
        PennyParams {
            beta_n: 0.5198,
            psi_n: 0.0946,
            kappa_n: 2.9506,
            sigma_epsilon: 1.4217,
            beta_c: 0.1872,
            psi_c: 0.2224,
            kappa_c: 1.9535,
            rho_c: 0.1292,
            beta_v: 0.0427,
            kappa_v: 4.1529,
            rho_v: 2.5482,
            lambda_v: 4.2119,
            mu_y: 3.97,
            sigma_y: 1.3436,
            a_y: 8.7305,
            b_y: 0.4547,
            mu_x: 1.9969,
            sigma_x: 0.7424,
            a_x: 7.235,
            b_x: 0.276,
            mu_tn: 7.5872,
            sigma_tn: 2.8977,
            a_tn: 6.8558,
            b_tn: 1.1067,
            mu_tc: 5.5573,
            sigma_tc: 0.4068,
            a_tc: 186.6233,
            b_tc: 0.0297,
            mu_tv: 6.12898,
            sigma_tv: 1.3768,
            a_tv: 19.8167,
            b_tv: 0.3093,
            m_rep: 16.0,
            omega: 2.5e-4,
            immune_threshold_gamma: false,
            update_density_gamma: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PennyState {
    /// Recent circulating densities, indexed by day mod `DELTA_C`.
    cir_densities: [f64; DELTA_C],
    /// Recent sequestered densities, indexed by day mod `DELTA_V`.
    seq_densities: [f64; DELTA_V],
    threshold_n: f64,
    threshold_c: f64,
    threshold_v: f64,
    variant_specific_summation: f64,
    clonal_summation: f64,
}

impl PennyState {
    pub fn new(params: &PennyParams, rng: &mut LocalRng) -> Self {
        // Thresholds must keep the innate response dominant.
        let (mut tn, mut tc, mut tv);
        loop {
            if params.immune_threshold_gamma {
                tn = rng.gamma(params.a_tn, params.b_tn).exp();
                tc = rng.gamma(params.a_tc, params.b_tc).exp();
                tv = rng.gamma(params.a_tv, params.b_tv).exp();
            } else {
                tn = rng.gauss(params.mu_tn, params.sigma_tn).exp();
                tc = rng.gauss(params.mu_tc, params.sigma_tc).exp();
                tv = rng.gauss(params.mu_tv, params.sigma_tv).exp();
            }
            if tn > tc && tn > tv {
                break;
            }
        }
        PennyState {
            cir_densities: [0.0; DELTA_C],
            seq_densities: [0.0; DELTA_V],
            threshold_n: tn,
            threshold_c: tc,
            threshold_v: tv,
            variant_specific_summation: 0.0,
            clonal_summation: 0.0,
        }
    }

    pub fn update(
        &mut self,
        params: &PennyParams,
        rng: &mut LocalRng,
        survival_factor: f64,
        bs_age_days: i32,
        now: SimTime,
    ) -> DensityUpdate {
        let day = now.in_days();
        if bs_age_days == 0 {
            // Assign initial densities: circulating and sequestered.
            let today_c = mod_nn_i(day, DELTA_C as i32) as usize;
            self.cir_densities[today_c] = if params.update_density_gamma {
                rng.gamma(params.a_y, params.b_y).exp()
            } else {
                rng.gauss(params.mu_y, params.sigma_y).exp()
            };
            let today_v = mod_nn_i(day, DELTA_V as i32) as usize;
            self.seq_densities[today_v] = if params.update_density_gamma {
                rng.gamma(params.a_x, params.b_x).exp()
            } else {
                rng.gauss(params.mu_x, params.sigma_x).exp()
            };
            return DensityUpdate {
                density: self.cir_densities[today_c],
                extinct: false,
            };
        }

        // Save yesterday's sequestered density before the summation below
        // may zero the buffer on a dominant-variant replacement.
        let yesterday_v = mod_nn_i(day - 1, DELTA_V as i32) as usize;
        let seq_yesterday = self.seq_densities[yesterday_v];
        let yesterday_c = mod_nn_i(day - 1, DELTA_C as i32) as usize;
        let cir_yesterday = self.cir_densities[yesterday_c];

        // Innate response.
        let base_n_pow = (cir_yesterday / self.threshold_n).powf(params.kappa_n);
        let r_nx = (1.0 - params.beta_n) / (1.0 + base_n_pow) + params.beta_n;
        let r_ny = (1.0 - params.psi_n) / (1.0 + base_n_pow) + params.psi_n;

        // Clonal response.
        let base_c_pow = (self.update_clonal_summation(params, day) / self.threshold_c)
            .powf(params.kappa_c);
        let r_cx = (1.0 - params.beta_c) / (1.0 + base_c_pow) + params.beta_c;
        let r_cy = (1.0 - params.psi_c) / (1.0 + base_c_pow) + params.psi_c;

        // Variant-specific response.
        let base_v = self.update_variant_summation(params, rng, day) / self.threshold_v;
        let r_vx = (1.0 - params.beta_v) / (1.0 + base_v.powf(params.kappa_v)) + params.beta_v;

        // New circulating parasites are last cycle's sequestered brood after
        // replication; new sequestered parasites are yesterday's circulating
        // ones that escaped control.
        let mut cir_new = seq_yesterday * params.m_rep * r_vx * r_cx * r_nx;
        let mut seq_new = cir_yesterday * r_cy * r_ny;

        if cir_new < params.omega {
            cir_new = 0.0;
        } else {
            // The gamma parameterisation needs a positive log density.
            cir_new = if params.update_density_gamma && cir_new > 1.0 {
                let a = cir_new.ln().powi(2) / params.sigma_epsilon.powi(2);
                let b = params.sigma_epsilon.powi(2) / cir_new.ln();
                rng.gamma(a, b).exp() * survival_factor
            } else {
                rng.gauss(cir_new.ln(), params.sigma_epsilon).exp() * survival_factor
            };
            // A second chance at ending the infection after the noise draw.
            if cir_new < params.omega {
                cir_new = 0.0;
            }
        }
        seq_new *= survival_factor;
        if seq_new < params.omega {
            if cir_new == 0.0 {
                return DensityUpdate {
                    density: 0.0,
                    extinct: true,
                };
            }
            seq_new = 0.0;
        }

        let today_c = mod_nn_i(day, DELTA_C as i32) as usize;
        self.cir_densities[today_c] = cir_new;
        let today_v = mod_nn_i(day, DELTA_V as i32) as usize;
        self.seq_densities[today_v] = seq_new;

        DensityUpdate {
            density: cir_new,
            extinct: false,
        }
    }

    /// Effective exposure of the variant-specific response: decays at
    /// `rho_v` and takes up the `DELTA_V`-day lagged sequestered density.
    /// A new dominant variant resets both the summation and the buffer.
    fn update_variant_summation(
        &mut self,
        params: &PennyParams,
        rng: &mut LocalRng,
        day: i32,
    ) -> f64 {
        if rng.bernoulli(1.0 / params.lambda_v) {
            self.variant_specific_summation = 0.0;
            self.seq_densities = [0.0; DELTA_V];
        }
        let index = mod_nn_i(day, DELTA_V as i32) as usize;
        self.variant_specific_summation = self.variant_specific_summation
            * (-params.rho_v).exp()
            + self.seq_densities[index];
        self.variant_specific_summation
    }

    /// Effective exposure of the clonal response: decays at `rho_c` and
    /// takes up the `DELTA_C`-day lagged circulating density.
    fn update_clonal_summation(&mut self, params: &PennyParams, day: i32) -> f64 {
        let index = mod_nn_i(day, DELTA_C as i32) as usize;
        self.clonal_summation =
            self.clonal_summation * (-params.rho_c).exp() + self.cir_densities[index];
        self.clonal_summation
    }
}
