//! Single-clone parasite infections.
//!
//! An [`Infection`] is one clone of parasites in one host: genotype, origin,
//! cumulative host exposure, and a blood-stage density trajectory produced
//! by one of five dynamics models. The model variant is chosen at scenario
//! load and carried as a tagged enum, so the per-day update dispatches once
//! without virtual calls in the inner loop.
//!
//! Before the liver-stage latent period has elapsed (default 15 days) an
//! infection has zero density and is invisible to drugs and to immunity
//! accounting.

pub mod descriptive;
pub mod dummy;
pub mod empirical;
pub mod genotypes;
pub mod molineaux;
pub mod penny;

pub use genotypes::{Genotype, GenotypeId, Genotypes};

use serde::{Deserialize, Serialize};
use simclock::{LocalRng, SimTime};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfectionError {
    #[error("genotype table must not be empty")]
    EmptyGenotypeTable,

    #[error("genotype frequencies must be non-negative, sum positive, deletions in [0,1]")]
    BadGenotypeFrequencies,

    #[error("{model} infection model requires a 1-day time step")]
    NeedsDailyStep { model: &'static str },
}

pub type Result<T> = std::result::Result<T, InfectionError>;

/// Where an infection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfectionOrigin {
    /// Inoculation from outside the simulated setting.
    Imported,
    /// Local transmission seeded by an imported case.
    Introduced,
    /// Local transmission from local cases.
    Indigenous,
}

/// Which dynamics model new infections use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelChoice {
    Descriptive,
    Dummy,
    Empirical,
    Molineaux,
    Penny,
}

/// Model parameters shared by every infection of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfectionConfig {
    /// Liver-stage latent period.
    pub latent_p: SimTime,
    pub model: ModelChoice,
    pub descriptive: descriptive::DescriptiveParams,
    pub empirical: empirical::EmpiricalParams,
    pub molineaux: molineaux::MolineauxParams,
    pub penny: penny::PennyParams,
}

impl InfectionConfig {
    pub fn new(model: ModelChoice) -> Self {
        InfectionConfig {
            latent_p: SimTime::from_days(15),
            model,
            descriptive: descriptive::DescriptiveParams::default(),
            empirical: empirical::EmpiricalParams::default(),
            molineaux: molineaux::MolineauxParams::default(),
            penny: penny::PennyParams::default(),
        }
    }

    /// Check the model against the step interval; the 1-day models reject
    /// 5-day scenarios at load.
    pub fn validate(&self, interval_days: i32) -> Result<()> {
        match self.model {
            ModelChoice::Descriptive => Ok(()),
            ModelChoice::Dummy => Ok(()),
            ModelChoice::Empirical if interval_days != 1 => {
                Err(InfectionError::NeedsDailyStep { model: "empirical" })
            }
            ModelChoice::Molineaux if interval_days != 1 => {
                Err(InfectionError::NeedsDailyStep { model: "molineaux" })
            }
            ModelChoice::Penny if interval_days != 1 => {
                Err(InfectionError::NeedsDailyStep { model: "penny" })
            }
            _ => Ok(()),
        }
    }
}

/// Per-infection dynamics state, one variant per model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Dynamics {
    Descriptive(descriptive::DescriptiveState),
    Dummy(dummy::DummyState),
    Empirical(empirical::EmpiricalState),
    Molineaux(molineaux::MolineauxState),
    Penny(penny::PennyState),
}

/// Result of one daily density update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityUpdate {
    pub density: f64,
    pub extinct: bool,
}

/// One clone of parasites in one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Infection {
    start_date: SimTime,
    genotype: GenotypeId,
    origin: InfectionOrigin,
    hrp2_deficient: bool,
    /// Cumulative exposure J: integrated density × days over this
    /// infection's life.
    cumulative_exposure: f64,
    /// Current blood-stage density, parasites/µl.
    density: f64,
    dynamics: Dynamics,
}

impl Infection {
    pub fn new(
        cfg: &InfectionConfig,
        rng: &mut LocalRng,
        start_date: SimTime,
        genotype: GenotypeId,
        origin: InfectionOrigin,
        hrp2_deficient: bool,
    ) -> Self {
        let dynamics = match cfg.model {
            ModelChoice::Descriptive => {
                Dynamics::Descriptive(descriptive::DescriptiveState::new(&cfg.descriptive, rng))
            }
            ModelChoice::Dummy => Dynamics::Dummy(dummy::DummyState::new()),
            ModelChoice::Empirical => {
                Dynamics::Empirical(empirical::EmpiricalState::new(&cfg.empirical, rng))
            }
            ModelChoice::Molineaux => {
                Dynamics::Molineaux(molineaux::MolineauxState::new(&cfg.molineaux, rng))
            }
            ModelChoice::Penny => Dynamics::Penny(penny::PennyState::new(&cfg.penny, rng)),
        };
        Infection {
            start_date,
            genotype,
            origin,
            hrp2_deficient,
            cumulative_exposure: 0.0,
            density: 0.0,
            dynamics,
        }
    }

    pub fn start_date(&self) -> SimTime {
        self.start_date
    }

    pub fn genotype(&self) -> GenotypeId {
        self.genotype
    }

    pub fn origin(&self) -> InfectionOrigin {
        self.origin
    }

    pub fn is_hrp2_deficient(&self) -> bool {
        self.hrp2_deficient
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn cumulative_exposure(&self) -> f64 {
        self.cumulative_exposure
    }

    /// Whether the infection has reached the blood stage at `now`.
    pub fn blood_stage(&self, latent_p: SimTime, now: SimTime) -> bool {
        now - self.start_date >= latent_p
    }

    /// Advance one day. `survival_factor` is the product of innate, vaccine,
    /// immune and drug multipliers computed by the host's aggregator.
    /// Returns `true` when the infection is extinct and should be removed.
    pub fn update(
        &mut self,
        cfg: &InfectionConfig,
        rng: &mut LocalRng,
        survival_factor: f64,
        now: SimTime,
        _body_mass: f64,
    ) -> bool {
        let bs_age = now - self.start_date - cfg.latent_p;
        if bs_age < SimTime::zero() {
            return false; // liver stage: nothing to update yet
        }
        let update = match &mut self.dynamics {
            Dynamics::Descriptive(s) => {
                s.update(&cfg.descriptive, rng, survival_factor, bs_age.in_days())
            }
            Dynamics::Dummy(s) => s.update(survival_factor),
            Dynamics::Empirical(s) => {
                s.update(&cfg.empirical, rng, survival_factor, bs_age.in_days())
            }
            Dynamics::Molineaux(s) => s.update(&cfg.molineaux, survival_factor, bs_age.in_days()),
            Dynamics::Penny(s) => {
                s.update(&cfg.penny, rng, survival_factor, bs_age.in_days(), now)
            }
        };
        if !update.density.is_finite() {
            tracing::debug!(
                genotype = self.genotype.index(),
                "non-finite parasite density; marking infection extinct"
            );
            self.density = 0.0;
            return true;
        }
        self.density = update.density;
        self.cumulative_exposure += self.density;
        update.extinct
    }

    /// Reset exposure accounting, for interventions that clear immunity.
    pub fn clear_immunity(&mut self) {
        self.cumulative_exposure = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(cfg: &InfectionConfig, rng: &mut LocalRng) -> Infection {
        Infection::new(
            cfg,
            rng,
            SimTime::zero(),
            GenotypeId::new(0),
            InfectionOrigin::Indigenous,
            false,
        )
    }

    #[test]
    fn latent_period_has_zero_density() {
        let cfg = InfectionConfig::new(ModelChoice::Dummy);
        let mut rng = LocalRng::seed(3);
        let mut inf = mk(&cfg, &mut rng);
        for day in 0..15 {
            let extinct = inf.update(&cfg, &mut rng, 1.0, SimTime::from_days(day), 50.0);
            assert!(!extinct);
            assert_eq!(inf.density(), 0.0, "density must stay 0 on day {day}");
        }
        assert!(!inf.blood_stage(cfg.latent_p, SimTime::from_days(14)));
        assert!(inf.blood_stage(cfg.latent_p, SimTime::from_days(15)));
    }

    #[test]
    fn one_day_models_reject_five_day_steps() {
        assert!(InfectionConfig::new(ModelChoice::Penny).validate(5).is_err());
        assert!(InfectionConfig::new(ModelChoice::Penny).validate(1).is_ok());
        assert!(InfectionConfig::new(ModelChoice::Descriptive).validate(5).is_ok());
    }
}
