//! The per-host within-host aggregator.
//!
//! Owns the infection list, the immunity state and the drug model, and
//! drives the per-step update: new inoculations become infections (capped
//! at [`MAX_INFECTIONS`]), immunity decays, and for every day inside the
//! step drugs are taken, every infection is advanced under the combined
//! survival factor, and drug concentrations decay. Step aggregates feed
//! the clinical model and the transmission output.

use infections::{GenotypeId, Genotypes, Infection, InfectionOrigin};
use ndarray::Array2;
use pharmacology::{DrugModel, DrugRegistry, TreatmentLibrary};
use serde::{Deserialize, Serialize};
use simclock::{LocalRng, SimClock, SimTime};

use crate::immunity::Immunity;
use crate::treatment::{SimpleTreatment, TreatmentId, TreatmentRegistry};
use crate::{Diagnostic, WithinHostConfig};

/// Hard cap on concurrent infections per host.
pub const MAX_INFECTIONS: usize = 21;

/// New inoculations for one host and step, from the transmission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepInput<'a> {
    pub imported: i32,
    pub indigenous: i32,
    /// Genotype sampling weights; empty slices mean "use initial
    /// frequencies".
    pub weights_imported: &'a [f64],
    pub weights_indigenous: &'a [f64],
}

/// What actually happened to this step's inoculations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub started_imported: i32,
    pub started_indigenous: i32,
    /// Inoculations dropped at the infection cap.
    pub ignored: i32,
}

/// Per-genotype blood-stage vaccine survival multipliers (1 = no effect).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaccineEffects {
    pub blood_stage: Vec<f64>,
}

impl VaccineEffects {
    pub fn blood_stage_factor(&self, genotype: GenotypeId) -> f64 {
        self.blood_stage
            .get(genotype.index())
            .copied()
            .unwrap_or(1.0)
    }
}

/// Per-host within-host state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithinHost {
    infections: Vec<Infection>,
    drug_model: DrugModel,
    immunity: Immunity,
    /// Body-mass heterogeneity multiplier, sampled at birth.
    het_mass_multiplier: f64,
    total_density: f64,
    hrp2_density: f64,
    time_step_max_density: f64,
    treat_expiry_liver: SimTime,
    treat_expiry_blood: SimTime,
    /// Lagged per-genotype densities (step-index × genotype) for
    /// infectiousness: imported infections and locally acquired ones.
    y_lag_imported: Array2<f64>,
    y_lag_local: Array2<f64>,
    /// Origin classification of the current infections.
    infection_origin: InfectionOrigin,
}

impl WithinHost {
    pub fn new(
        cfg: &WithinHostConfig,
        genotypes: &Genotypes,
        clock: &SimClock,
        rng: &mut LocalRng,
    ) -> Self {
        // Mass heterogeneity must keep birth weight above half a kilogram.
        let min_mult = 0.5 / cfg.mass_by_age.eval(0.0);
        let mut het_mass_multiplier;
        loop {
            het_mass_multiplier = rng.gauss(1.0, cfg.het_mass_mult_std);
            if het_mass_multiplier >= min_mult {
                break;
            }
        }
        let y_lag_len = cfg.y_lag_len(clock.interval());
        WithinHost {
            infections: Vec::new(),
            drug_model: DrugModel::new(),
            immunity: Immunity::new(&cfg.immunity, rng),
            het_mass_multiplier,
            total_density: 0.0,
            hrp2_density: 0.0,
            time_step_max_density: 0.0,
            treat_expiry_liver: SimTime::never(),
            treat_expiry_blood: SimTime::never(),
            y_lag_imported: Array2::zeros((y_lag_len, genotypes.count())),
            y_lag_local: Array2::zeros((y_lag_len, genotypes.count())),
            infection_origin: InfectionOrigin::Imported,
        }
    }

    pub fn num_infections(&self) -> usize {
        self.infections.len()
    }

    pub fn infections(&self) -> &[Infection] {
        &self.infections
    }

    pub fn total_density(&self) -> f64 {
        self.total_density
    }

    pub fn hrp2_density(&self) -> f64 {
        self.hrp2_density
    }

    pub fn time_step_max_density(&self) -> f64 {
        self.time_step_max_density
    }

    pub fn cumulative_h(&self) -> f64 {
        self.immunity.cumulative_h
    }

    pub fn cumulative_y(&self) -> f64 {
        self.immunity.cumulative_y
    }

    /// Origin classification of the host's infections: Introduced if any
    /// infection is Introduced, else Indigenous if any is Indigenous, else
    /// Imported.
    pub fn infection_origin(&self) -> InfectionOrigin {
        self.infection_origin
    }

    pub fn body_mass(&self, cfg: &WithinHostConfig, age_years: f64) -> f64 {
        cfg.mass_by_age.eval(age_years) * self.het_mass_multiplier
    }

    /// Advance one time step.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        cfg: &WithinHostConfig,
        genotypes: &Genotypes,
        drugs: &DrugRegistry,
        clock: &SimClock,
        rng: &mut LocalRng,
        input: StepInput<'_>,
        age_years: f64,
        vaccine: &VaccineEffects,
    ) -> StepReport {
        let ts0 = clock.ts0();
        let capacity = MAX_INFECTIONS - self.infections.len();
        let requested = input.indigenous.max(0) + input.imported.max(0);
        let n_indigenous = input.indigenous.max(0).min(capacity as i32);
        let n_imported = input
            .imported
            .max(0)
            .min(capacity as i32 - n_indigenous);
        let ignored = (requested - capacity as i32).max(0);
        if ignored > 0 {
            tracing::trace!(ignored, "inoculations dropped at the infection cap");
        }

        // Adding infections at the start of the update is equivalent to the
        // end: nothing advances before the liver-stage delay anyway.
        for _ in 0..n_indigenous {
            self.start_infection(
                cfg,
                genotypes,
                rng,
                ts0,
                input.weights_indigenous,
                InfectionOrigin::Indigenous,
            );
        }
        for _ in 0..n_imported {
            self.start_infection(
                cfg,
                genotypes,
                rng,
                ts0,
                input.weights_imported,
                InfectionOrigin::Imported,
            );
        }
        debug_assert!(self.infections.len() <= MAX_INFECTIONS);

        self.immunity.decay(&cfg.immunity);

        self.total_density = 0.0;
        self.hrp2_density = 0.0;
        self.time_step_max_density = 0.0;

        let treatment_liver = self.treat_expiry_liver > ts0;
        let treatment_blood = self.treat_expiry_blood > ts0;
        let body_mass = self.body_mass(cfg, age_years);
        let latent_p = cfg.infection.latent_p;
        let max_dens_correction = cfg.infection.descriptive.max_dens_correction;

        for day_offset in 0..clock.interval() {
            let day = ts0 + SimTime::from_days(day_offset);
            self.drug_model.medicate(drugs, rng);

            let mut i = 0;
            while i < self.infections.len() {
                let blood = self.infections[i].blood_stage(latent_p, day);
                let mut expires = if blood {
                    treatment_blood
                } else {
                    treatment_liver
                };
                if !expires {
                    let genotype = self.infections[i].genotype();
                    let drug_factor =
                        self.drug_model
                            .factor(drugs, genotype.index(), body_mass);
                    let imm_factor = self.immunity.survival_factor(
                        &cfg.immunity,
                        age_years,
                        self.infections[i].cumulative_exposure(),
                    );
                    let bsv_factor = vaccine.blood_stage_factor(genotype);
                    let survival =
                        bsv_factor * self.immunity.innate_survival * imm_factor * drug_factor;
                    expires =
                        self.infections[i].update(&cfg.infection, rng, survival, day, body_mass);
                }
                if expires {
                    self.infections.remove(i);
                } else {
                    let density = self.infections[i].density();
                    self.total_density += density;
                    if !self.infections[i].is_hrp2_deficient() {
                        self.hrp2_density += density;
                    }
                    if max_dens_correction {
                        self.time_step_max_density = self.time_step_max_density.max(density);
                    } else {
                        self.time_step_max_density = density;
                    }
                    i += 1;
                }
            }
            self.drug_model.decay_drugs(drugs, body_mass);
        }

        // Inoculation and density exposure only count from the next step:
        // cumulative_h excludes infections added this step and cumulative_y
        // only past densities.
        self.immunity.cumulative_h += f64::from(n_indigenous + n_imported);
        self.immunity.cumulative_y += self.total_density;

        assert!(
            self.total_density.is_finite(),
            "non-finite total parasite density"
        );

        // Cache densities for infectiousness-to-mosquito calculations.
        let lag_index = clock.modulo_steps(clock.ts1(), self.y_lag_imported.nrows() as i32) as usize;
        for g in 0..genotypes.count() {
            self.y_lag_imported[(lag_index, g)] = 0.0;
            self.y_lag_local[(lag_index, g)] = 0.0;
        }
        let mut n_introduced = 0;
        let mut n_indigenous_now = 0;
        for inf in &self.infections {
            let g = inf.genotype().index();
            if inf.origin() == InfectionOrigin::Imported {
                self.y_lag_imported[(lag_index, g)] += inf.density();
            } else {
                self.y_lag_local[(lag_index, g)] += inf.density();
            }
            match inf.origin() {
                InfectionOrigin::Introduced => n_introduced += 1,
                InfectionOrigin::Indigenous => n_indigenous_now += 1,
                InfectionOrigin::Imported => {}
            }
        }
        self.infection_origin = if n_introduced > 0 {
            InfectionOrigin::Introduced
        } else if n_indigenous_now > 0 {
            InfectionOrigin::Indigenous
        } else {
            InfectionOrigin::Imported
        };

        let mut started_indigenous = n_indigenous;
        if cfg.keep_ignored_infections_bug && ignored > 0 {
            // Historical accounting quirk: dropped inoculations are still
            // reported as locally started. Kept switchable for
            // compatibility with long-running calibrations.
            started_indigenous += ignored;
        }
        StepReport {
            started_imported: n_imported,
            started_indigenous,
            ignored,
        }
    }

    fn start_infection(
        &mut self,
        cfg: &WithinHostConfig,
        genotypes: &Genotypes,
        rng: &mut LocalRng,
        now: SimTime,
        weights: &[f64],
        origin: InfectionOrigin,
    ) {
        let genotype = genotypes.sample_genotype(rng, weights);
        let hrp2_deficient = genotypes.sample_hrp2_deficiency(rng, genotype);
        self.infections.push(Infection::new(
            &cfg.infection,
            rng,
            now,
            genotype,
            origin,
            hrp2_deficient,
        ));
    }

    /// Intervention hook: one new infection chosen from initial genotype
    /// frequencies, subject to the cap.
    pub fn import_infection(
        &mut self,
        cfg: &WithinHostConfig,
        genotypes: &Genotypes,
        rng: &mut LocalRng,
        now: SimTime,
        origin: InfectionOrigin,
    ) {
        if self.infections.len() < MAX_INFECTIONS {
            self.immunity.cumulative_h += 1.0;
            self.start_infection(cfg, genotypes, rng, now, &[], origin);
        }
    }

    // ---- treatment entry points ----

    /// Queue a course of drugs through the PK/PD model.
    pub fn treat_pkpd(
        &mut self,
        cfg: &WithinHostConfig,
        library: &TreatmentLibrary,
        schedule: usize,
        dosage: usize,
        age_years: f64,
        delay_d: f64,
    ) {
        let mass = self.body_mass(cfg, age_years);
        self.drug_model
            .prescribe(library, schedule, dosage, age_years, mass, delay_d);
    }

    /// Apply stage-wise clearance windows. Returns whether a blood-stage
    /// effect was delivered (the quantity reported as a treatment).
    pub fn treat_simple(
        &mut self,
        cfg: &WithinHostConfig,
        clock: &SimClock,
        treatment: SimpleTreatment,
    ) -> bool {
        let now = clock.now_or_ts0();
        if let Some(steps) = treatment.liver_steps {
            if steps < 0 {
                self.clear_stage(cfg, now, false);
            } else {
                self.treat_expiry_liver =
                    self.treat_expiry_liver.max(Self::expiry(clock, now, steps));
            }
        }
        if let Some(steps) = treatment.blood_steps {
            if steps < 0 {
                self.clear_stage(cfg, now, true);
            } else {
                self.treat_expiry_blood =
                    self.treat_expiry_blood.max(Self::expiry(clock, now, steps));
            }
            true
        } else {
            false
        }
    }

    /// Apply a registered treatment.
    pub fn treatment(
        &mut self,
        cfg: &WithinHostConfig,
        clock: &SimClock,
        registry: &TreatmentRegistry,
        id: TreatmentId,
    ) {
        let t = *registry.get(id);
        self.treat_simple(cfg, clock, t);
    }

    /// Expiry of a stage window: zero is an immediate one-step effect,
    /// larger durations count steps from the start of the step.
    fn expiry(clock: &SimClock, now: SimTime, steps: i32) -> SimTime {
        now + clock.from_steps(steps.max(1))
    }

    /// Drop current infections of one stage right away (the unconditional
    /// clearance of a negative duration), so the effect is visible to
    /// monitoring within the same step.
    fn clear_stage(&mut self, cfg: &WithinHostConfig, now: SimTime, blood: bool) {
        let latent_p = cfg.infection.latent_p;
        self.infections
            .retain(|inf| inf.blood_stage(latent_p, now) != blood);
    }

    // ---- queries ----

    /// Run a diagnostic against the current densities.
    pub fn diagnostic_result(&self, rng: &mut LocalRng, diagnostic: &Diagnostic) -> bool {
        let density = if diagnostic.uses_hrp2 {
            self.hrp2_density
        } else {
            self.total_density
        };
        diagnostic.is_positive(rng, density, None)
    }

    /// Probability of infecting a biting mosquito, from lagged densities.
    pub fn prob_transmission_to_mosquito(
        &self,
        cfg: &WithinHostConfig,
        clock: &SimClock,
        tbv_factor: f64,
    ) -> f64 {
        let p = cfg.transmission.probability(
            &self.y_lag_imported,
            &self.y_lag_local,
            clock,
        );
        (p * tbv_factor).clamp(0.0, 1.0)
    }

    /// Prophylactic clearance-probability profiles are only meaningful on
    /// the 5-day step models; scenarios requesting them elsewhere are
    /// rejected.
    pub fn add_prophylactic_effects(
        &mut self,
        _p_clearance_by_time: &[f64],
    ) -> crate::Result<()> {
        Err(crate::WithinHostError::Unimplemented(
            "prophylactic effects on the 1-day time step",
        ))
    }

    /// Per-drug start-of-day concentrations for monitoring:
    /// `(drug type index, mg/l)`.
    pub fn drug_concentrations(
        &self,
        cfg: &WithinHostConfig,
        drugs: &DrugRegistry,
        age_years: f64,
    ) -> Vec<(usize, f64)> {
        self.drug_model
            .active_concentrations(drugs, self.body_mass(cfg, age_years))
    }

    /// Intervention hook: forget acquired immunity.
    pub fn clear_immunity(&mut self, _cfg: &WithinHostConfig) {
        for inf in &mut self.infections {
            inf.clear_immunity();
        }
        self.immunity.clear();
    }

    /// Penalise immunity after an unsuccessful treatment.
    pub fn immunity_penalisation(&mut self, cfg: &WithinHostConfig) {
        self.immunity.penalise(&cfg.immunity);
    }
}
