//! Per-step monitoring aggregates.
//!
//! Each host accumulates its own counters during the step; the population
//! loop merges them after the barrier, so parallel execution never shares
//! a mutable counter.

use clinical::{ClinicalEvent, TreatmentLine};
use serde::{Deserialize, Serialize};

/// Aggregated monitoring counters for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMonitor {
    pub infected_hosts: u32,
    pub patent_hosts: u32,
    pub new_infections: u32,
    pub ignored_infections: u32,
    /// Treatments by stream: first line, second line, hospital.
    pub treatments: [u32; 3],
    pub episodes_ended: u32,
    pub expected_direct_deaths: f64,
    pub expected_hospital_deaths: f64,
    pub expected_sequelae: f64,
    pub direct_deaths: u32,
    pub hospital_deaths: u32,
    pub indirect_deaths: u32,
    pub sequelae: u32,
    pub tree_reports: Vec<u32>,
    pub deployments: Vec<u32>,
    pub sum_log_density: f64,
    /// Start-of-day drug concentrations: `(drug type index, mg/l)`.
    pub drug_concentrations: Vec<(usize, f64)>,
    /// Current infection counts keyed by genotype index.
    pub infections_by_genotype: Vec<u32>,
}

impl StepMonitor {
    /// Count one infection of a genotype.
    pub fn record_infection_genotype(&mut self, genotype: usize) {
        if self.infections_by_genotype.len() <= genotype {
            self.infections_by_genotype.resize(genotype + 1, 0);
        }
        self.infections_by_genotype[genotype] += 1;
    }

    pub fn record(&mut self, event: &ClinicalEvent) {
        match event {
            ClinicalEvent::EpisodeEnd { .. } => self.episodes_ended += 1,
            ClinicalEvent::Treatment { line } => {
                let i = match line {
                    TreatmentLine::First => 0,
                    TreatmentLine::Second => 1,
                    TreatmentLine::Hospital => 2,
                };
                self.treatments[i] += 1;
            }
            ClinicalEvent::ExpectedDirectDeaths(x) => self.expected_direct_deaths += x,
            ClinicalEvent::ExpectedHospitalDeaths(x) => self.expected_hospital_deaths += x,
            ClinicalEvent::ExpectedSequelae(x) => self.expected_sequelae += x,
            ClinicalEvent::DirectDeath { in_hospital } => {
                self.direct_deaths += 1;
                if *in_hospital {
                    self.hospital_deaths += 1;
                }
            }
            ClinicalEvent::Sequelae { .. } => self.sequelae += 1,
            ClinicalEvent::IndirectDeath => self.indirect_deaths += 1,
            ClinicalEvent::DecisionTreeReport(id) => self.tree_reports.push(*id),
            ClinicalEvent::Deploy { component } => self.deployments.push(*component),
        }
    }

    pub fn merge(&mut self, other: &StepMonitor) {
        self.infected_hosts += other.infected_hosts;
        self.patent_hosts += other.patent_hosts;
        self.new_infections += other.new_infections;
        self.ignored_infections += other.ignored_infections;
        for i in 0..3 {
            self.treatments[i] += other.treatments[i];
        }
        self.episodes_ended += other.episodes_ended;
        self.expected_direct_deaths += other.expected_direct_deaths;
        self.expected_hospital_deaths += other.expected_hospital_deaths;
        self.expected_sequelae += other.expected_sequelae;
        self.direct_deaths += other.direct_deaths;
        self.hospital_deaths += other.hospital_deaths;
        self.indirect_deaths += other.indirect_deaths;
        self.sequelae += other.sequelae;
        self.tree_reports.extend_from_slice(&other.tree_reports);
        self.deployments.extend_from_slice(&other.deployments);
        self.sum_log_density += other.sum_log_density;
        self.drug_concentrations
            .extend_from_slice(&other.drug_concentrations);
        if self.infections_by_genotype.len() < other.infections_by_genotype.len() {
            self.infections_by_genotype
                .resize(other.infections_by_genotype.len(), 0);
        }
        for (i, n) in other.infections_by_genotype.iter().enumerate() {
            self.infections_by_genotype[i] += n;
        }
    }
}
