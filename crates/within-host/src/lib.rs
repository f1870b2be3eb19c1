//! Per-host parasitological state: infections, immunity, drugs.
//!
//! The [`WithinHost`] aggregator owns a host's infection list, immunity
//! state and drug model, and advances them each time step under the
//! exogenous inoculation input. It also answers the questions the rest of
//! the simulator asks of a host: diagnostic results, current densities,
//! infection origin, and infectiousness to mosquitoes.

pub mod aggregator;
pub mod diagnostic;
pub mod immunity;
pub mod transmission;
pub mod treatment;

pub use aggregator::{StepInput, StepReport, VaccineEffects, WithinHost, MAX_INFECTIONS};
pub use diagnostic::{Diagnostic, DiagnosticKind, Diagnostics};
pub use immunity::{Immunity, ImmunityParams};
pub use transmission::TransmissionParams;
pub use treatment::{SimpleTreatment, TreatmentId, TreatmentRegistry};

use infections::InfectionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WithinHostError {
    #[error("invalid diagnostic: {0}")]
    BadDiagnostic(String),

    #[error("no diagnostic with this name: {0}")]
    UnknownDiagnostic(String),

    #[error("body-mass table must start at age 0 with increasing ages")]
    BadMassTable,

    /// A scenario requested a feature this model does not provide; the
    /// scenario is rejected rather than silently misconfigured.
    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),

    #[error(transparent)]
    Infection(#[from] infections::InfectionError),
}

pub type Result<T> = std::result::Result<T, WithinHostError>;

/// Body mass by age, interpolated piecewise-linearly between the control
/// points of a reference growth curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MassByAge {
    /// `(age in years, mass in kg)`, ages strictly increasing from 0.
    points: Vec<(f64, f64)>,
}

impl Default for MassByAge {
    fn default() -> Self {
        MassByAge {
            points: vec![
                (0.0, 3.5),
                (1.0, 9.5),
                (2.0, 12.0),
                (5.0, 18.0),
                (10.0, 30.0),
                (15.0, 48.0),
                (20.0, 58.0),
                (90.0, 60.0),
            ],
        }
    }
}

impl MassByAge {
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        match points.first() {
            Some(&(age, _)) if age == 0.0 => {}
            _ => return Err(WithinHostError::BadMassTable),
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(WithinHostError::BadMassTable);
        }
        Ok(MassByAge { points })
    }

    pub fn eval(&self, age_years: f64) -> f64 {
        let pts = &self.points;
        if age_years <= pts[0].0 {
            return pts[0].1;
        }
        for w in pts.windows(2) {
            let (a0, m0) = w[0];
            let (a1, m1) = w[1];
            if age_years <= a1 {
                return m0 + (m1 - m0) * (age_years - a0) / (a1 - a0);
            }
        }
        pts.last().expect("table is non-empty").1
    }
}

/// Scenario-level within-host configuration, shared by every host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithinHostConfig {
    pub immunity: ImmunityParams,
    pub infection: InfectionConfig,
    pub mass_by_age: MassByAge,
    /// Spread of the body-mass heterogeneity multiplier.
    pub het_mass_mult_std: f64,
    pub transmission: TransmissionParams,
    /// Report inoculations dropped at the infection cap as if they had
    /// started (historical accounting quirk, kept switchable).
    pub keep_ignored_infections_bug: bool,
}

impl WithinHostConfig {
    pub fn new(infection: InfectionConfig) -> Self {
        WithinHostConfig {
            immunity: ImmunityParams::default(),
            infection,
            mass_by_age: MassByAge::default(),
            het_mass_mult_std: 0.14,
            transmission: TransmissionParams::default(),
            keep_ignored_infections_bug: true,
        }
    }

    /// Length of the lagged density ring buffer in steps: enough to read
    /// 20 days back without wrapping.
    pub fn y_lag_len(&self, interval_days: i32) -> usize {
        (20 / interval_days + 1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infections::{InfectionOrigin, ModelChoice};
    use simclock::{LocalRng, SimClock, SimTime};

    fn setup() -> (WithinHostConfig, infections::Genotypes, SimClock) {
        let cfg = WithinHostConfig::new(InfectionConfig::new(ModelChoice::Dummy));
        let genotypes = infections::Genotypes::single();
        let clock = SimClock::new(1, SimTime::from_years_i(90)).unwrap();
        (cfg, genotypes, clock)
    }

    fn empty_drugs() -> pharmacology::DrugRegistry {
        pharmacology::DrugRegistry::new(vec![], 1).unwrap()
    }

    #[test]
    fn infection_count_stays_within_cap() {
        let (cfg, genotypes, mut clock) = setup();
        let drugs = empty_drugs();
        let mut rng = LocalRng::seed(81);
        let mut wh = WithinHost::new(&cfg, &genotypes, &clock, &mut rng);
        let vaccine = VaccineEffects::default();

        clock.start_update();
        let report = wh.update(
            &cfg,
            &genotypes,
            &drugs,
            &clock,
            &mut rng,
            StepInput {
                imported: 10,
                indigenous: 30,
                weights_imported: &[],
                weights_indigenous: &[],
            },
            21.0,
            &vaccine,
        );
        clock.end_update();

        assert_eq!(wh.num_infections(), MAX_INFECTIONS);
        assert_eq!(report.ignored, 40 - MAX_INFECTIONS as i32);
        // The historical quirk reports dropped inoculations as started.
        assert_eq!(
            report.started_indigenous,
            21 + (40 - MAX_INFECTIONS as i32)
        );
        assert_eq!(report.started_imported, 0);
    }

    #[test]
    fn ignored_accounting_without_the_quirk() {
        let (mut cfg, genotypes, mut clock) = setup();
        cfg.keep_ignored_infections_bug = false;
        let drugs = empty_drugs();
        let mut rng = LocalRng::seed(82);
        let mut wh = WithinHost::new(&cfg, &genotypes, &clock, &mut rng);
        let vaccine = VaccineEffects::default();

        clock.start_update();
        let report = wh.update(
            &cfg,
            &genotypes,
            &drugs,
            &clock,
            &mut rng,
            StepInput {
                imported: 0,
                indigenous: 30,
                weights_imported: &[],
                weights_indigenous: &[],
            },
            21.0,
            &vaccine,
        );
        clock.end_update();
        assert_eq!(report.started_indigenous, 21);
        assert_eq!(report.ignored, 9);
    }

    #[test]
    fn densities_appear_after_latency_and_are_ordered() {
        let (cfg, genotypes, mut clock) = setup();
        let drugs = empty_drugs();
        let mut rng = LocalRng::seed(83);
        let mut wh = WithinHost::new(&cfg, &genotypes, &clock, &mut rng);
        let vaccine = VaccineEffects::default();

        for step in 0..20 {
            clock.start_update();
            let input = if step == 0 {
                StepInput {
                    imported: 1,
                    indigenous: 1,
                    weights_imported: &[],
                    weights_indigenous: &[],
                }
            } else {
                StepInput::default()
            };
            wh.update(&cfg, &genotypes, &drugs, &clock, &mut rng, input, 21.0, &vaccine);
            clock.end_update();

            assert!(wh.num_infections() <= MAX_INFECTIONS);
            assert!(wh.total_density().is_finite());
            assert!(wh.hrp2_density() >= 0.0);
            assert!(wh.total_density() >= wh.hrp2_density());
            if step < 15 {
                assert_eq!(wh.total_density(), 0.0, "latent at step {step}");
            } else {
                assert!(wh.total_density() > 0.0, "blood stage at step {step}");
            }
        }
    }

    #[test]
    fn blood_treatment_clears_blood_stage_infections() {
        let (cfg, genotypes, mut clock) = setup();
        let drugs = empty_drugs();
        let mut rng = LocalRng::seed(84);
        let mut wh = WithinHost::new(&cfg, &genotypes, &clock, &mut rng);
        let vaccine = VaccineEffects::default();

        // Establish a blood-stage infection.
        for step in 0..18 {
            clock.start_update();
            let input = if step == 0 {
                StepInput {
                    imported: 1,
                    indigenous: 0,
                    weights_imported: &[],
                    weights_indigenous: &[],
                }
            } else {
                StepInput::default()
            };
            wh.update(&cfg, &genotypes, &drugs, &clock, &mut rng, input, 21.0, &vaccine);
            clock.end_update();
        }
        assert!(wh.total_density() > 0.0);

        let treated = wh.treat_simple(&cfg, &clock, SimpleTreatment::blood_clearance());
        assert!(treated);
        // Permanent clearance removes blood-stage infections immediately.
        assert_eq!(wh.num_infections(), 0);

        clock.start_update();
        wh.update(
            &cfg,
            &genotypes,
            &drugs,
            &clock,
            &mut rng,
            StepInput::default(),
            21.0,
            &vaccine,
        );
        clock.end_update();
        assert_eq!(wh.total_density(), 0.0);
    }

    #[test]
    fn liver_window_blocks_new_inoculations() {
        let (cfg, genotypes, mut clock) = setup();
        let drugs = empty_drugs();
        let mut rng = LocalRng::seed(85);
        let mut wh = WithinHost::new(&cfg, &genotypes, &clock, &mut rng);
        let vaccine = VaccineEffects::default();

        wh.treat_simple(
            &cfg,
            &clock,
            SimpleTreatment {
                liver_steps: Some(30),
                blood_steps: None,
            },
        );
        for step in 0..20 {
            clock.start_update();
            let input = if step == 0 {
                StepInput {
                    imported: 1,
                    indigenous: 0,
                    weights_imported: &[],
                    weights_indigenous: &[],
                }
            } else {
                StepInput::default()
            };
            wh.update(&cfg, &genotypes, &drugs, &clock, &mut rng, input, 21.0, &vaccine);
            clock.end_update();
        }
        // The inoculation was cleared during its liver stage.
        assert_eq!(wh.num_infections(), 0);
        assert_eq!(wh.total_density(), 0.0);
    }

    #[test]
    fn origin_classification_prefers_introduced_then_indigenous() {
        let (cfg, genotypes, mut clock) = setup();
        let drugs = empty_drugs();
        let mut rng = LocalRng::seed(86);
        let mut wh = WithinHost::new(&cfg, &genotypes, &clock, &mut rng);
        let vaccine = VaccineEffects::default();

        wh.import_infection(&cfg, &genotypes, &mut rng, clock.now(), InfectionOrigin::Imported);
        wh.import_infection(
            &cfg,
            &genotypes,
            &mut rng,
            clock.now(),
            InfectionOrigin::Introduced,
        );
        clock.start_update();
        wh.update(
            &cfg,
            &genotypes,
            &drugs,
            &clock,
            &mut rng,
            StepInput {
                imported: 0,
                indigenous: 1,
                weights_imported: &[],
                weights_indigenous: &[],
            },
            21.0,
            &vaccine,
        );
        clock.end_update();
        assert_eq!(wh.infection_origin(), InfectionOrigin::Introduced);
    }

    #[test]
    fn mass_table_interpolates() {
        let table = MassByAge::default();
        assert_eq!(table.eval(0.0), 3.5);
        let at_7_5 = table.eval(7.5);
        assert!(at_7_5 > 18.0 && at_7_5 < 30.0);
        assert_eq!(table.eval(200.0), 60.0);
        assert!(MassByAge::new(vec![(1.0, 10.0)]).is_err());
        assert!(MassByAge::new(vec![(0.0, 3.5), (0.0, 4.0)]).is_err());
    }
}
