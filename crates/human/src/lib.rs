//! Simulated humans and the per-step orchestration.
//!
//! A [`Host`] owns its random stream, within-host state and clinical
//! tracker; it is created at birth and removed on death or at the age
//! limit. Each step runs, in fixed order: the within-host update (drugs,
//! infections, densities), then the clinical update (morbidity, case
//! management), then the monitoring snapshot. The population loop is data
//! parallel: hosts share only the read-only scenario tables and the clock
//! during a step, and per-host monitors merge after the barrier.

pub mod checkpoint;
pub mod monitor;

pub use checkpoint::{load_host, save_host};
pub use monitor::StepMonitor;

use clinical::{ClinicalModel, HealthSystem, PathogenesisParams};
use infections::Genotypes;
use pharmacology::{DrugRegistry, TreatmentLibrary};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use simclock::{LocalRng, MasterRng, SimClock, SimTime};
use thiserror::Error;
use within_host::{
    Diagnostic, StepInput, TreatmentRegistry, VaccineEffects, WithinHost, WithinHostConfig,
};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("checkpoint serialization failed: {0}")]
    Checkpoint(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Host-level heterogeneity distributions sampled at birth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeterogeneityParams {
    /// Spread (log scale) of the treatment-seeking factor.
    pub treatment_seeking_sigma: f64,
    /// Spread (log scale) of the co-morbidity factor.
    pub comorbidity_sigma: f64,
    /// Spread (log scale) of availability to mosquitoes.
    pub transmission_sigma: f64,
}

impl Default for HeterogeneityParams {
    fn default() -> Self {
        HeterogeneityParams {
            treatment_seeking_sigma: 0.0,
            comorbidity_sigma: 0.0,
            transmission_sigma: 0.0,
        }
    }
}

/// The loaded scenario: every read-only table the per-host updates use.
#[derive(Debug)]
pub struct Scenario {
    pub within_host: WithinHostConfig,
    pub genotypes: Genotypes,
    pub drugs: DrugRegistry,
    pub library: TreatmentLibrary,
    pub treatments: TreatmentRegistry,
    pub health_system: HealthSystem,
    pub pathogenesis: PathogenesisParams,
    pub heterogeneity: HeterogeneityParams,
    /// Diagnostic used for the patency snapshot.
    pub monitoring_diagnostic: Diagnostic,
    /// Cohort components that drop members on first treatment / bout.
    pub cohorts_remove_on_first_treatment: Vec<u32>,
    pub cohorts_remove_on_first_bout: Vec<u32>,
}

/// One simulated human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    date_of_birth: SimTime,
    rng: LocalRng,
    comorbidity_factor: f64,
    /// Availability-to-mosquitoes multiplier, used by the transmission
    /// model when weighting this host's infectiousness.
    transmission_heterogeneity: f64,
    vaccine: VaccineEffects,
    within_host: WithinHost,
    clinical: ClinicalModel,
    cohorts: Vec<u32>,
}

/// Result of one host's step.
#[derive(Debug, Default)]
pub struct HostStep {
    pub died: bool,
    pub monitor: StepMonitor,
}

impl Host {
    /// Create a newborn host. The RNG stream is drawn from the master
    /// sequence so results do not depend on thread scheduling.
    pub fn birth(scenario: &Scenario, clock: &SimClock, master: &mut MasterRng) -> Self {
        let mut rng = master.spawn_host_rng();
        let het = &scenario.heterogeneity;
        let comorbidity_factor = log_normal_factor(&mut rng, het.comorbidity_sigma);
        let transmission_heterogeneity = log_normal_factor(&mut rng, het.transmission_sigma);
        let treatment_seeking = log_normal_factor(&mut rng, het.treatment_seeking_sigma);
        let within_host = WithinHost::new(&scenario.within_host, &scenario.genotypes, clock, &mut rng);
        Host {
            date_of_birth: clock.now_or_ts1(),
            rng,
            comorbidity_factor,
            transmission_heterogeneity,
            vaccine: VaccineEffects::default(),
            within_host,
            clinical: ClinicalModel::new(&scenario.pathogenesis, treatment_seeking),
            cohorts: Vec::new(),
        }
    }

    pub fn date_of_birth(&self) -> SimTime {
        self.date_of_birth
    }

    pub fn age(&self, at: SimTime) -> SimTime {
        at - self.date_of_birth
    }

    pub fn within_host(&self) -> &WithinHost {
        &self.within_host
    }

    pub fn transmission_heterogeneity(&self) -> f64 {
        self.transmission_heterogeneity
    }

    pub fn cohorts(&self) -> &[u32] {
        &self.cohorts
    }

    pub fn join_cohort(&mut self, component: u32) {
        if !self.cohorts.contains(&component) {
            self.cohorts.push(component);
        }
    }

    /// Advance this host one step. Order is fixed and observable: within-host
    /// update, clinical update, then the monitoring snapshot.
    pub fn update(&mut self, scenario: &Scenario, clock: &SimClock, input: StepInput<'_>) -> HostStep {
        let mut result = HostStep::default();
        let age_at_step_end = self.age(clock.ts1());
        if self.clinical.is_dead(clock, age_at_step_end) {
            self.clinical.flush_episode();
            result.died = true;
            self.collect_events(&mut result.monitor);
            return result;
        }
        let age_years = self.age(clock.ts0()).in_years();

        let report = self.within_host.update(
            &scenario.within_host,
            &scenario.genotypes,
            &scenario.drugs,
            clock,
            &mut self.rng,
            input,
            age_years,
            &self.vaccine,
        );
        result.monitor.new_infections +=
            (report.started_imported + report.started_indigenous) as u32;
        result.monitor.ignored_infections += report.ignored as u32;

        let outcome = self.clinical.update(
            &scenario.health_system,
            &scenario.pathogenesis,
            &scenario.within_host,
            &scenario.treatments,
            &scenario.library,
            clock,
            &mut self.rng,
            &mut self.within_host,
            age_years,
            self.comorbidity_factor,
            &self.cohorts,
        );
        if outcome.remove_on_first_treatment {
            self.cohorts
                .retain(|c| !scenario.cohorts_remove_on_first_treatment.contains(c));
        }
        if outcome.remove_on_first_bout {
            self.cohorts
                .retain(|c| !scenario.cohorts_remove_on_first_bout.contains(c));
        }
        result.died = outcome.died;
        if result.died {
            self.clinical.flush_episode();
        }

        // Monitoring snapshot.
        if self.within_host.num_infections() > 0 {
            result.monitor.infected_hosts += 1;
            for inf in self.within_host.infections() {
                result
                    .monitor
                    .record_infection_genotype(inf.genotype().index());
            }
        }
        let total = self.within_host.total_density();
        if self
            .within_host
            .diagnostic_result(&mut self.rng, &scenario.monitoring_diagnostic)
        {
            result.monitor.patent_hosts += 1;
            if total > 0.0 {
                result.monitor.sum_log_density += total.ln();
            }
        }
        result.monitor.drug_concentrations.extend(
            self.within_host
                .drug_concentrations(&scenario.within_host, &scenario.drugs, age_years),
        );
        self.collect_events(&mut result.monitor);
        result
    }

    fn collect_events(&mut self, monitor: &mut StepMonitor) {
        for event in self.clinical.take_events() {
            monitor.record(&event);
        }
    }

    /// Probability of infecting a biting mosquito, given a
    /// transmission-blocking vaccine factor.
    pub fn prob_transmission_to_mosquito(
        &self,
        scenario: &Scenario,
        clock: &SimClock,
        tbv_factor: f64,
    ) -> f64 {
        self.within_host
            .prob_transmission_to_mosquito(&scenario.within_host, clock, tbv_factor)
    }
}

fn log_normal_factor(rng: &mut LocalRng, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        1.0
    } else {
        // Unit mean regardless of spread.
        rng.log_normal(-0.5 * sigma * sigma, sigma)
    }
}

/// Advance every host one step in parallel and merge their monitors.
///
/// `inputs` pairs with `hosts` by index. Dead hosts are removed after the
/// barrier; the returned monitor aggregates the whole population.
pub fn step_population(
    hosts: &mut Vec<Host>,
    scenario: &Scenario,
    clock: &mut SimClock,
    inputs: &[StepInput<'_>],
) -> StepMonitor {
    assert_eq!(hosts.len(), inputs.len(), "one input per host");
    clock.start_update();
    let results: Vec<HostStep> = {
        let clock: &SimClock = clock;
        hosts
            .par_iter_mut()
            .zip(inputs.par_iter())
            .map(|(host, input)| host.update(scenario, clock, *input))
            .collect()
    };
    clock.end_update();

    let mut monitor = StepMonitor::default();
    let mut died = results.iter().map(|r| r.died);
    hosts.retain(|_| !died.next().unwrap_or(false));
    for r in &results {
        monitor.merge(&r.monitor);
    }
    monitor
}

