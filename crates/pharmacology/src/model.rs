//! Per-host pharmacokinetic/pharmacodynamic model.
//!
//! Holds the drugs currently in a host's body and the queue of prescribed
//! medications. The daily calling contract, in order:
//!
//! 1. [`DrugModel::prescribe`] (when treatment is dispensed),
//! 2. [`DrugModel::medicate`] (doses due today enter the body),
//! 3. [`DrugModel::factor`] for each infection (survival multipliers are
//!    computed from start-of-day concentrations),
//! 4. [`DrugModel::decay_drugs`] (concentrations advance to the end of the
//!    day; negligible drugs are dropped).

use serde::{Deserialize, Serialize};

use crate::drug::Drug;
use crate::drug_type::DrugRegistry;
use crate::treatments::TreatmentLibrary;

/// A prescribed medication waiting to be taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MedicateData {
    /// Drug type index.
    pub drug: usize,
    /// Quantity in mg.
    pub qty_mg: f64,
    /// Days from the start of the current time step; entries with
    /// `time_d < 1` are taken on the next [`DrugModel::medicate`] call.
    pub time_d: f64,
    /// IV infusion duration in days; `None` for oral/bolus dosing.
    pub iv_duration_d: Option<f64>,
}

/// Drugs in the body plus pending medications, for one host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrugModel {
    drugs: Vec<Drug>,
    medicate_queue: Vec<MedicateData>,
}

impl DrugModel {
    pub fn new() -> Self {
        DrugModel::default()
    }

    /// Expand a treatment schedule into the medication queue.
    ///
    /// Doses are scaled by the dosage table's multiplier for this host and
    /// shifted by `delay_d` days. Schedule and dosage indices come from
    /// [`TreatmentLibrary`] name resolution at load.
    pub fn prescribe(
        &mut self,
        library: &TreatmentLibrary,
        schedule: usize,
        dosage: usize,
        age_years: f64,
        body_mass: f64,
        delay_d: f64,
    ) {
        let mult = library.dosage(dosage).multiplier(age_years, body_mass);
        for med in &library.schedule(schedule).medications {
            self.medicate_queue.push(MedicateData {
                drug: med.drug,
                qty_mg: med.qty_mg * mult,
                time_d: med.time_d + delay_d,
                iv_duration_d: med.iv_duration_d,
            });
        }
    }

    /// Take every queued medication due within the coming day and postpone
    /// the rest by one day.
    pub fn medicate(&mut self, registry: &DrugRegistry, rng: &mut simclock::LocalRng) {
        if self.medicate_queue.is_empty() {
            return;
        }
        let due: Vec<MedicateData> = {
            let mut due = Vec::new();
            self.medicate_queue.retain_mut(|med| {
                if med.time_d < 1.0 {
                    due.push(*med);
                    false
                } else {
                    med.time_d -= 1.0;
                    true
                }
            });
            due
        };
        for med in due {
            self.medicate_drug(registry, rng, med.drug, med.qty_mg, med.time_d, med.iv_duration_d);
        }
    }

    /// Apply one dose to the drug list, creating the record if absent.
    pub fn medicate_drug(
        &mut self,
        registry: &DrugRegistry,
        rng: &mut simclock::LocalRng,
        type_index: usize,
        qty_mg: f64,
        time_d: f64,
        iv_duration_d: Option<f64>,
    ) {
        let index = match self.drugs.iter().position(|d| d.type_index() == type_index) {
            Some(i) => i,
            None => {
                self.drugs.push(Drug::new(registry, type_index, rng));
                self.drugs.len() - 1
            }
        };
        self.drugs[index].medicate(time_d, qty_mg, iv_duration_d);
    }

    /// Product of per-drug survival multipliers for one infection's
    /// genotype, over the coming day. Must run before
    /// [`DrugModel::decay_drugs`]: it evaluates concentrations from the
    /// start of the day.
    pub fn factor(&mut self, registry: &DrugRegistry, genotype: usize, body_mass: f64) -> f64 {
        let mut factor = 1.0;
        for drug in &mut self.drugs {
            factor *= drug.factor(registry, genotype, body_mass);
        }
        factor
    }

    /// Advance all drugs one day and drop those with negligible
    /// concentrations.
    pub fn decay_drugs(&mut self, registry: &DrugRegistry, body_mass: f64) {
        self.drugs.retain_mut(|drug| drug.decay(registry, body_mass));
    }

    /// Concentration of a drug type at the start of the day (mg/l), summed
    /// over records carrying it (a conversion parent reports its metabolite
    /// amount under the metabolite's index).
    pub fn concentration(
        &self,
        registry: &DrugRegistry,
        type_index: usize,
        body_mass: f64,
    ) -> f64 {
        let mut total = 0.0;
        for drug in &self.drugs {
            if drug.type_index() == type_index {
                total += drug.concentration(registry.get(type_index), body_mass);
            } else if registry.metabolite_of(drug.type_index()) == Some(type_index) {
                total += drug.metabolite_concentration(registry.get(type_index), body_mass);
            }
        }
        total
    }

    /// Total mg still queued; used by tests and treatment reporting.
    pub fn prescribed_mg(&self) -> f64 {
        self.medicate_queue.iter().map(|m| m.qty_mg).sum()
    }

    pub fn has_active_drugs(&self) -> bool {
        !self.drugs.is_empty()
    }

    /// Log-concentration summaries for monitoring, one entry per active
    /// drug: `(type_index, concentration)`.
    pub fn active_concentrations(
        &self,
        registry: &DrugRegistry,
        body_mass: f64,
    ) -> Vec<(usize, f64)> {
        self.drugs
            .iter()
            .map(|d| {
                (
                    d.type_index(),
                    d.concentration(registry.get(d.type_index()), body_mass),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drug_type::{Compartments, DrugType, Phenotype};
    use crate::treatments::{DosageConfig, DosageTable, MedicationConfig, ScheduleConfig};
    use simclock::LocalRng;

    fn registry() -> DrugRegistry {
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

    fn library(reg: &DrugRegistry) -> TreatmentLibrary {
        TreatmentLibrary::new(
            reg,
            vec![
                ScheduleConfig {
                    name: "sched1".into(),
                    medications: vec![MedicationConfig {
                        drug: "MQ".into(),
                        mg: 6.0,
                        hour: 0.0,
                        iv_duration_hours: None,
                    }],
                },
                ScheduleConfig {
                    name: "sched2".into(),
                    medications: vec![
                        MedicationConfig {
                            drug: "MQ".into(),
                            mg: 2.0,
                            hour: 0.0,
                            iv_duration_hours: None,
                        },
                        MedicationConfig {
                            drug: "MQ".into(),
                            mg: 5.0,
                            hour: 12.0,
                            iv_duration_hours: None,
                        },
                    ],
                },
            ],
            vec![DosageConfig {
                name: "dosage1".into(),
                table: DosageTable::ByAge(vec![(0.0, 1.0), (5.0, 5.0)]),
            }],
        )
        .unwrap()
    }

    #[test]
    fn prescribe_scales_by_dosage_multiplier() {
        let reg = registry();
        let lib = library(&reg);
        let mut model = DrugModel::new();
        let sched = lib.find_schedule("sched2").unwrap();
        let dos = lib.find_dosage("dosage1").unwrap();
        model.prescribe(&lib, sched, dos, 2.0, 12.0, 0.0);
        assert_eq!(model.prescribed_mg(), 7.0);
        let mut model5 = DrugModel::new();
        model5.prescribe(&lib, sched, dos, 21.0, 50.0, 0.0);
        assert_eq!(model5.prescribed_mg(), 35.0);
    }

    #[test]
    fn medicate_pops_only_due_doses() {
        let reg = registry();
        let lib = library(&reg);
        let mut rng = LocalRng::seed(5);
        let mut model = DrugModel::new();
        let sched = lib.find_schedule("sched1").unwrap();
        let dos = lib.find_dosage("dosage1").unwrap();
        // Delay of 1.5 days: nothing due on the first day.
        model.prescribe(&lib, sched, dos, 21.0, 50.0, 1.5);
        model.medicate(&reg, &mut rng);
        assert!(!model.has_active_drugs());
        assert_eq!(model.prescribed_mg(), 30.0);
        model.medicate(&reg, &mut rng);
        assert!(model.has_active_drugs());
        assert_eq!(model.prescribed_mg(), 0.0);
    }

    #[test]
    fn factor_is_one_without_drugs() {
        let reg = registry();
        let mut model = DrugModel::new();
        assert_eq!(model.factor(&reg, 0, 50.0), 1.0);
    }

    #[test]
    fn decay_drops_negligible_drugs() {
        let reg = registry();
        let mut rng = LocalRng::seed(5);
        let mut model = DrugModel::new();
        // A dose small enough to be negligible after one day's decay.
        model.medicate_drug(&reg, &mut rng, 0, 1.0, 0.0, None);
        model.decay_drugs(&reg, 50.0);
        // 1 mg / 1040 l is below 0.005 mg/l.
        assert!(!model.has_active_drugs());
        assert_eq!(model.concentration(&reg, 0, 50.0), 0.0);
    }
}
