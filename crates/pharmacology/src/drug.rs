//! Per-host state of one drug in the body.
//!
//! A [`Drug`] record exists while its concentration is non-negligible. It
//! holds compartment amounts at the start of the current day plus the dose
//! events taken during the day. Concentration trajectories are propagated in
//! closed form for one-compartment and conversion structures, and with the
//! embedded Runge–Kutta integrator for two- and three-compartment
//! structures (and for the rare degenerate rate constellations where the
//! closed forms lose precision).
//!
//! The killing integral `∫ vmax·C^n/(C^n + IC50^n) dt` is evaluated per
//! sub-interval between dose events with adaptive 4-point Gauss–Legendre
//! quadrature. If refinement fails to converge, the integral falls back to
//! the closed form that is exact under pure exponential decay at the
//! longest-half-life rate, and a warning is logged once per drug per run.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use crate::drug_type::{Compartments, DrugRegistry, DrugType, Phenotype};
use crate::integrator;
use crate::quadrature::{adaptive_gl4, Quadrature};

const FACTOR_REL_TOL: f64 = 1e-6;
const FACTOR_MAX_DEPTH: u32 = 10;

/// One dose taken during the current day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoseEvent {
    /// Time from the start of the day, in days; in `[0, 1)`.
    pub time_d: f64,
    pub qty_mg: f64,
    /// Infusion duration in days; `None` for a bolus.
    pub iv_duration_d: Option<f64>,
}

/// Compartment amounts (mg) at the start of the current day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DrugAmounts {
    OneComp {
        central: f64,
    },
    Conversion {
        gut: f64,
        parent: f64,
        metabolite: f64,
    },
    MultiComp {
        /// Gut, central, first and second peripheral compartment.
        amounts: [f64; 4],
    },
}

/// Rate constants for this host, sampled once at record creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HostRates {
    OneComp {
        k: f64,
    },
    Conversion {
        ka: f64,
        ke: f64,
        conversion: f64,
        metabolite_k: f64,
        mwr: f64,
    },
    MultiComp {
        k: f64,
        ka: f64,
        k12: f64,
        k21: f64,
        k13: f64,
        k31: f64,
    },
}

/// A drug currently in a host's body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drug {
    type_index: usize,
    rates: HostRates,
    amounts: DrugAmounts,
    /// Today's doses, ordered by time; cleared by [`Drug::decay`].
    doses: Vec<DoseEvent>,
    /// Set once the quadrature fallback has been reported for this record.
    #[serde(default)]
    warned_fallback: bool,
}

impl Drug {
    pub fn new(registry: &DrugRegistry, type_index: usize, rng: &mut simclock::LocalRng) -> Self {
        let ty = registry.get(type_index);
        let (rates, amounts) = match &ty.compartments {
            Compartments::OneCompartment { elimination_rate } => (
                HostRates::OneComp {
                    k: elimination_rate.sample(rng),
                },
                DrugAmounts::OneComp { central: 0.0 },
            ),
            Compartments::Conversion {
                absorption_rate,
                elimination_rate,
                conversion_rate,
                molecular_weight_ratio,
                ..
            } => {
                let met_index = registry
                    .metabolite_of(type_index)
                    .expect("conversion drug has a metabolite index");
                let metabolite_k = match &registry.get(met_index).compartments {
                    Compartments::OneCompartment { elimination_rate } => {
                        elimination_rate.sample(rng)
                    }
                    // Registry validation keeps metabolites one-compartment.
                    _ => unreachable!("metabolite must be a one-compartment drug"),
                };
                (
                    HostRates::Conversion {
                        ka: absorption_rate.sample(rng),
                        ke: elimination_rate.sample(rng),
                        conversion: conversion_rate.sample(rng),
                        metabolite_k,
                        mwr: *molecular_weight_ratio,
                    },
                    DrugAmounts::Conversion {
                        gut: 0.0,
                        parent: 0.0,
                        metabolite: 0.0,
                    },
                )
            }
            Compartments::TwoCompartment {
                elimination_rate,
                absorption_rate,
                k12,
                k21,
            } => (
                HostRates::MultiComp {
                    k: elimination_rate.sample(rng),
                    ka: absorption_rate.sample(rng),
                    k12: k12.sample(rng),
                    k21: k21.sample(rng),
                    k13: 0.0,
                    k31: 0.0,
                },
                DrugAmounts::MultiComp { amounts: [0.0; 4] },
            ),
            Compartments::ThreeCompartment {
                elimination_rate,
                absorption_rate,
                k12,
                k21,
                k13,
                k31,
            } => (
                HostRates::MultiComp {
                    k: elimination_rate.sample(rng),
                    ka: absorption_rate.sample(rng),
                    k12: k12.sample(rng),
                    k21: k21.sample(rng),
                    k13: k13.sample(rng),
                    k31: k31.sample(rng),
                },
                DrugAmounts::MultiComp { amounts: [0.0; 4] },
            ),
        };
        Drug {
            type_index,
            rates,
            amounts,
            doses: Vec::new(),
            warned_fallback: false,
        }
    }

    pub fn type_index(&self) -> usize {
        self.type_index
    }

    /// Record a dose taken at `time_d` days into the current day.
    pub fn medicate(&mut self, time_d: f64, qty_mg: f64, iv_duration_d: Option<f64>) {
        let event = DoseEvent {
            time_d,
            qty_mg,
            iv_duration_d,
        };
        let pos = self
            .doses
            .iter()
            .position(|d| d.time_d > time_d)
            .unwrap_or(self.doses.len());
        self.doses.insert(pos, event);
    }

    /// Central (parent) concentration at the start of the day, mg/l.
    pub fn concentration(&self, ty: &DrugType, body_mass: f64) -> f64 {
        let amount = match self.amounts {
            DrugAmounts::OneComp { central } => central,
            DrugAmounts::Conversion { parent, .. } => parent,
            DrugAmounts::MultiComp { amounts } => amounts[1],
        };
        ty.concentration(amount, body_mass)
    }

    /// Metabolite concentration at the start of the day, for conversion
    /// records; mg/l.
    pub fn metabolite_concentration(&self, metabolite_ty: &DrugType, body_mass: f64) -> f64 {
        match self.amounts {
            DrugAmounts::Conversion { metabolite, .. } => {
                metabolite_ty.concentration(metabolite, body_mass)
            }
            _ => 0.0,
        }
    }

    /// Survival multiplier for one infection over the coming day.
    ///
    /// Evaluates the concentration trajectory from the start of the day
    /// (before [`Drug::decay`] advances it), so it must run first.
    pub fn factor(
        &mut self,
        registry: &DrugRegistry,
        genotype: usize,
        body_mass: f64,
    ) -> f64 {
        let ty = registry.get(self.type_index);
        let pd = *ty.phenotype(genotype);
        let met = registry
            .metabolite_of(self.type_index)
            .map(|i| (registry.get(i), *registry.get(i).phenotype(genotype)));

        let mut integral = 0.0;
        let mut fell_back = false;
        for segment in self.day_segments(ty, body_mass) {
            integral += self.segment_kill_integral(ty, &pd, met.as_ref(), body_mass, &segment, &mut fell_back);
        }
        if fell_back && !self.warned_fallback {
            self.warned_fallback = true;
            tracing::warn!(
                drug = %ty.abbreviation,
                "killing-rate quadrature did not converge; using closed-form approximation"
            );
        }
        (-integral).exp()
    }

    /// Advance the compartment amounts to the end of the day, consuming
    /// today's dose events. Returns `false` when every tracked
    /// concentration has fallen below the negligible threshold and the
    /// record should be dropped.
    pub fn decay(&mut self, registry: &DrugRegistry, body_mass: f64) -> bool {
        let ty = registry.get(self.type_index);
        // The segment list carries the state at each segment start; the
        // end-of-day state is the last segment propagated over its own span.
        if let Some(last) = self.day_segments(ty, body_mass).last() {
            self.amounts =
                self.propagate(ty, body_mass, &last.start, last.iv_rate, last.t1 - last.t0);
        }
        self.doses.clear();

        match self.amounts {
            DrugAmounts::OneComp { central } => {
                ty.concentration(central, body_mass) > ty.negligible_concentration
            }
            DrugAmounts::Conversion {
                gut,
                parent,
                metabolite,
            } => {
                let met_ty = registry
                    .metabolite_of(self.type_index)
                    .map(|i| registry.get(i))
                    .expect("conversion drug has a metabolite index");
                // Unabsorbed drug still counts: it becomes central later.
                ty.concentration(gut + parent, body_mass) > ty.negligible_concentration
                    || met_ty.concentration(metabolite, body_mass)
                        > met_ty.negligible_concentration
            }
            DrugAmounts::MultiComp { amounts } => {
                ty.concentration(amounts[0] + amounts[1], body_mass)
                    > ty.negligible_concentration
            }
        }
    }

    // ---- day segmentation ----

    /// Split the day at dose times and infusion ends, carrying the
    /// compartment state at each segment start.
    fn day_segments(&self, ty: &DrugType, body_mass: f64) -> Vec<Segment> {
        let mut cuts = vec![0.0, 1.0];
        for d in &self.doses {
            cuts.push(d.time_d.clamp(0.0, 1.0));
            if let Some(dur) = d.iv_duration_d {
                cuts.push((d.time_d + dur).clamp(0.0, 1.0));
            }
        }
        cuts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        cuts.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

        let mut segments = Vec::with_capacity(cuts.len() - 1);
        let mut state = self.amounts;
        for w in cuts.windows(2) {
            let (t0, t1) = (w[0], w[1]);
            // Boluses landing exactly at t0 enter before the segment runs.
            for d in &self.doses {
                if d.iv_duration_d.is_none() && (d.time_d - t0).abs() < 1e-12 {
                    state = apply_bolus(state, d.qty_mg);
                }
            }
            // Infusions active anywhere in (t0, t1) deliver at constant rate.
            let iv_rate: f64 = self
                .doses
                .iter()
                .filter_map(|d| {
                    let dur = d.iv_duration_d?;
                    let active = d.time_d < t1 - 1e-12 && d.time_d + dur > t0 + 1e-12;
                    if active && dur > 0.0 {
                        Some(d.qty_mg / dur)
                    } else {
                        None
                    }
                })
                .sum();
            let seg = Segment {
                t0,
                t1,
                start: state,
                iv_rate,
            };
            state = self.propagate(ty, body_mass, &seg.start, seg.iv_rate, t1 - t0);
            segments.push(seg);
        }
        segments
    }

    // ---- propagation ----

    /// Compartment amounts after `tau` days from `start`, under a constant
    /// infusion rate into the central compartment.
    fn propagate(
        &self,
        ty: &DrugType,
        body_mass: f64,
        start: &DrugAmounts,
        iv_rate: f64,
        tau: f64,
    ) -> DrugAmounts {
        if tau <= 0.0 {
            return *start;
        }
        let mf = ty.mass_rate_factor(body_mass);
        match (*start, self.rates) {
            (DrugAmounts::OneComp { central }, HostRates::OneComp { k }) => {
                let k = k * mf;
                let decayed = central * (-k * tau).exp();
                let infused = if iv_rate > 0.0 {
                    iv_rate / k * (1.0 - (-k * tau).exp())
                } else {
                    0.0
                };
                DrugAmounts::OneComp {
                    central: decayed + infused,
                }
            }
            (
                DrugAmounts::Conversion {
                    gut,
                    parent,
                    metabolite,
                },
                HostRates::Conversion {
                    ka,
                    ke,
                    conversion,
                    metabolite_k,
                    mwr,
                },
            ) => {
                let kp = ke * mf + conversion;
                let km = metabolite_k;
                let degenerate = (ka - kp).abs() < 1e-9 * ka.max(kp).max(1.0);
                if iv_rate > 0.0 || degenerate {
                    return self.propagate_rk(start, iv_rate, tau, mf);
                }
                let parent_new = parent * (-kp * tau).exp() + gut * ka * diff_exp(kp, ka, tau);
                let met_new = metabolite * (-km * tau).exp()
                    + mwr
                        * conversion
                        * (parent * diff_exp(km, kp, tau)
                            + gut * ka / (ka - kp)
                                * (diff_exp(km, kp, tau) - diff_exp(km, ka, tau)));
                DrugAmounts::Conversion {
                    gut: gut * (-ka * tau).exp(),
                    parent: parent_new,
                    metabolite: met_new,
                }
            }
            (DrugAmounts::MultiComp { .. }, HostRates::MultiComp { .. }) => {
                self.propagate_rk(start, iv_rate, tau, mf)
            }
            _ => unreachable!("drug amounts and rates always share a structure"),
        }
    }

    /// Runge–Kutta propagation for multi-compartment structures and for the
    /// conversion cases without a stable closed form.
    fn propagate_rk(&self, start: &DrugAmounts, iv_rate: f64, tau: f64, mf: f64) -> DrugAmounts {
        match (*start, self.rates) {
            (
                DrugAmounts::Conversion {
                    gut,
                    parent,
                    metabolite,
                },
                HostRates::Conversion {
                    ka,
                    ke,
                    conversion,
                    metabolite_k,
                    mwr,
                },
            ) => {
                let kp = ke * mf + conversion;
                let y0 = SVector::<f64, 4>::new(gut, parent, metabolite, 0.0);
                let y = integrator::integrate(
                    |y| {
                        SVector::<f64, 4>::new(
                            -ka * y[0],
                            ka * y[0] - kp * y[1] + iv_rate,
                            mwr * conversion * y[1] - metabolite_k * y[2],
                            0.0,
                        )
                    },
                    y0,
                    0.0,
                    tau,
                );
                DrugAmounts::Conversion {
                    gut: y[0],
                    parent: y[1],
                    metabolite: y[2],
                }
            }
            (
                DrugAmounts::MultiComp { amounts },
                HostRates::MultiComp {
                    k,
                    ka,
                    k12,
                    k21,
                    k13,
                    k31,
                },
            ) => {
                let ke = k * mf;
                let y0 = SVector::<f64, 4>::from(amounts);
                let y = integrator::integrate(
                    |y| {
                        SVector::<f64, 4>::new(
                            -ka * y[0],
                            ka * y[0] - (ke + k12 + k13) * y[1] + k21 * y[2] + k31 * y[3]
                                + iv_rate,
                            k12 * y[1] - k21 * y[2],
                            k13 * y[1] - k31 * y[3],
                        )
                    },
                    y0,
                    0.0,
                    tau,
                );
                DrugAmounts::MultiComp {
                    amounts: [y[0], y[1], y[2], y[3]],
                }
            }
            (one_comp @ DrugAmounts::OneComp { .. }, _) => one_comp,
            _ => unreachable!("drug amounts and rates always share a structure"),
        }
    }

    /// Parent and metabolite amounts at offset `t` within a segment.
    fn amounts_at(
        &self,
        ty: &DrugType,
        body_mass: f64,
        segment: &Segment,
        t: f64,
    ) -> DrugAmounts {
        self.propagate(ty, body_mass, &segment.start, segment.iv_rate, t - segment.t0)
    }

    // ---- killing integral ----

    fn segment_kill_integral(
        &self,
        ty: &DrugType,
        pd: &Phenotype,
        met: Option<&(&DrugType, Phenotype)>,
        body_mass: f64,
        segment: &Segment,
        fell_back: &mut bool,
    ) -> f64 {
        let eval = |t: f64| -> f64 {
            let amounts = self.amounts_at(ty, body_mass, segment, t);
            let mut rate = match amounts {
                DrugAmounts::OneComp { central } => {
                    pd.killing_rate(ty.concentration(central, body_mass))
                }
                DrugAmounts::Conversion { parent, .. } => {
                    pd.killing_rate(ty.concentration(parent, body_mass))
                }
                DrugAmounts::MultiComp { amounts } => {
                    pd.killing_rate(ty.concentration(amounts[1], body_mass))
                }
            };
            if let (Some((met_ty, met_pd)), DrugAmounts::Conversion { metabolite, .. }) =
                (met, amounts)
            {
                rate += met_pd.killing_rate(met_ty.concentration(metabolite, body_mass));
            }
            rate
        };
        match adaptive_gl4(&eval, segment.t0, segment.t1, FACTOR_REL_TOL, FACTOR_MAX_DEPTH) {
            Quadrature::Converged(v) => v,
            Quadrature::Diverged(_) => {
                *fell_back = true;
                self.fallback_kill_integral(ty, pd, body_mass, segment)
            }
        }
    }

    /// Closed-form `∫ vmax·C^n/(C^n+IC50^n)` under pure exponential decay
    /// at the slowest (longest-half-life) rate; exact for one-compartment
    /// decay, an approximation otherwise.
    fn fallback_kill_integral(
        &self,
        ty: &DrugType,
        pd: &Phenotype,
        body_mass: f64,
        segment: &Segment,
    ) -> f64 {
        let k = self.slowest_rate(ty.mass_rate_factor(body_mass));
        let c0 = match segment.start {
            DrugAmounts::OneComp { central } => ty.concentration(central, body_mass),
            DrugAmounts::Conversion { parent, .. } => ty.concentration(parent, body_mass),
            DrugAmounts::MultiComp { amounts } => ty.concentration(amounts[1], body_mass),
        };
        if c0 <= 0.0 || k <= 0.0 {
            return 0.0;
        }
        let tau = segment.t1 - segment.t0;
        let c1 = c0 * (-k * tau).exp();
        let n = pd.slope;
        let icn = pd.ic50.powf(n);
        pd.vmax / (n * k) * ((c0.powf(n) + icn) / (c1.powf(n) + icn)).ln()
    }

    fn slowest_rate(&self, mf: f64) -> f64 {
        match self.rates {
            HostRates::OneComp { k } => k * mf,
            HostRates::Conversion {
                ke,
                conversion,
                metabolite_k,
                ..
            } => {
                let kp = ke * mf + conversion;
                kp.min(metabolite_k)
            }
            HostRates::MultiComp { k, .. } => k * mf,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    t0: f64,
    t1: f64,
    start: DrugAmounts,
    iv_rate: f64,
}

fn apply_bolus(state: DrugAmounts, qty_mg: f64) -> DrugAmounts {
    match state {
        DrugAmounts::OneComp { central } => DrugAmounts::OneComp {
            central: central + qty_mg,
        },
        DrugAmounts::Conversion {
            gut,
            parent,
            metabolite,
        } => DrugAmounts::Conversion {
            gut: gut + qty_mg,
            parent,
            metabolite,
        },
        DrugAmounts::MultiComp { mut amounts } => {
            amounts[0] += qty_mg;
            DrugAmounts::MultiComp { amounts }
        }
    }
}

/// `(e^{-l1·t} − e^{-l2·t}) / (l2 − l1)`, stable as the rates approach each
/// other.
fn diff_exp(l1: f64, l2: f64, t: f64) -> f64 {
    let d = l2 - l1;
    if d.abs() < 1e-9 * l1.abs().max(l2.abs()).max(1.0) {
        t * (-l1 * t).exp() * (1.0 - 0.5 * d * t)
    } else {
        ((-l1 * t).exp() - (-l2 * t).exp()) / d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drug_type::{Compartments, SampledValue};
    use approx::assert_relative_eq;
    use simclock::LocalRng;

    fn mq_registry() -> DrugRegistry {
        DrugRegistry::new(
            vec![DrugType {
                abbreviation: "MQ".into(),
                volume_of_distribution: 20.8,
                negligible_concentration: 0.005,
                body_mass_exponent: 0.0,
                compartments: Compartments::one_compartment_half_life(13.078),
                phenotypes: vec![Phenotype {
                    vmax: 3.45,
                    ic50: 0.027,
                    slope: 5.0,
                }],
            }],
            1,
        )
        .unwrap()
    }

    #[test]
    fn bolus_decays_exponentially() {
        let reg = mq_registry();
        let mut rng = LocalRng::seed(1);
        let mut drug = Drug::new(&reg, 0, &mut rng);
        drug.medicate(0.0, 415.0, None);
        assert!(drug.decay(&reg, 50.0));
        let c = drug.concentration(reg.get(0), 50.0);
        let k = std::f64::consts::LN_2 / 13.078;
        assert_relative_eq!(c, 415.0 / (20.8 * 50.0) * (-k).exp(), max_relative = 1e-12);
    }

    #[test]
    fn split_doses_at_one_time_equal_single_dose() {
        let reg = mq_registry();
        let mut rng = LocalRng::seed(1);
        let mut a = Drug::new(&reg, 0, &mut rng);
        a.medicate(0.0, 1500.0, None);
        a.medicate(0.0, 1500.0, None);
        let mut b = Drug::new(&reg, 0, &mut rng);
        b.medicate(0.0, 3000.0, None);
        let fa = a.factor(&reg, 0, 55.4993);
        let fb = b.factor(&reg, 0, 55.4993);
        assert_relative_eq!(fa, fb, max_relative = 1e-12);
    }

    #[test]
    fn mid_day_zero_dose_does_not_change_factor() {
        let reg = mq_registry();
        let mut rng = LocalRng::seed(1);
        let mut a = Drug::new(&reg, 0, &mut rng);
        a.medicate(0.0, 3000.0, None);
        let fa = a.factor(&reg, 0, 55.4993);
        let mut b = Drug::new(&reg, 0, &mut rng);
        b.medicate(0.0, 3000.0, None);
        b.medicate(0.5, 0.0, None);
        let fb = b.factor(&reg, 0, 55.4993);
        assert_relative_eq!(fa, fb, max_relative = 1e-6);
    }

    #[test]
    fn iv_infusion_conserves_dose() {
        let mut rng = LocalRng::seed(1);
        // Infusion with negligible elimination: nearly the whole dose should
        // be in the body at the end of the infusion.
        let slow = DrugRegistry::new(
            vec![DrugType {
                abbreviation: "X".into(),
                volume_of_distribution: 1.0,
                negligible_concentration: 1e-12,
                body_mass_exponent: 0.0,
                compartments: Compartments::OneCompartment {
                    elimination_rate: SampledValue::fixed(1e-6),
                },
                phenotypes: vec![Phenotype {
                    vmax: 1.0,
                    ic50: 1.0,
                    slope: 1.0,
                }],
            }],
            1,
        )
        .unwrap();
        let mut drug = Drug::new(&slow, 0, &mut rng);
        drug.medicate(0.0, 100.0, Some(0.5));
        assert!(drug.decay(&slow, 1.0));
        let c = drug.concentration(slow.get(0), 1.0);
        assert_relative_eq!(c, 100.0, max_relative = 1e-4);
    }

    #[test]
    fn diff_exp_handles_near_equal_rates() {
        let a = diff_exp(2.0, 2.0 + 1e-12, 0.7);
        let b = 0.7 * (-2.0 * 0.7f64).exp();
        assert_relative_eq!(a, b, max_relative = 1e-6);
    }
}
