//! Treatment schedules and dosage tables.
//!
//! A schedule lists the medications of one course (drug, mg at the reference
//! dose, hour offset). A dosage table scales the reference dose by patient
//! age or body mass, or multiplies directly by mass in kg. Both are loaded
//! once by name and referenced by index from decision trees.

use serde::{Deserialize, Serialize};

use crate::drug_type::DrugRegistry;
use crate::{PkPdError, Result};

/// One medication within a schedule, at the reference dose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    /// Drug type index into the [`DrugRegistry`].
    pub drug: usize,
    /// Reference quantity in mg (per kg when the dosage table multiplies by
    /// mass).
    pub qty_mg: f64,
    /// Offset from the start of the time step, in days.
    pub time_d: f64,
    /// Duration of an IV infusion in days; `None` for a bolus.
    pub iv_duration_d: Option<f64>,
}

/// Configuration form of a medication, with the drug given by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationConfig {
    pub drug: String,
    pub mg: f64,
    pub hour: f64,
    #[serde(default)]
    pub iv_duration_hours: Option<f64>,
}

/// A named course of medications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub name: String,
    pub medications: Vec<Medication>,
}

/// How a dosage table keys its buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DosageTable {
    /// Step function over age in years: `(lower_bound, multiplier)`.
    ByAge(Vec<(f64, f64)>),
    /// Step function over body mass in kg.
    ByBodyMass(Vec<(f64, f64)>),
    /// Reference doses are mg/kg; multiply by body mass.
    MultiplyByKg,
}

impl DosageTable {
    /// Dose multiplier for a host. Bucket search is by upper bound; the
    /// validated table always covers the key, so lookup cannot fail.
    pub fn multiplier(&self, age_years: f64, body_mass: f64) -> f64 {
        match self {
            DosageTable::ByAge(buckets) => Self::lookup(buckets, age_years),
            DosageTable::ByBodyMass(buckets) => Self::lookup(buckets, body_mass),
            DosageTable::MultiplyByKg => body_mass,
        }
    }

    fn lookup(buckets: &[(f64, f64)], key: f64) -> f64 {
        let mut mult = buckets[0].1;
        for &(lb, m) in buckets {
            if key < lb {
                break;
            }
            mult = m;
        }
        mult
    }

    fn validate(buckets: &[(f64, f64)], name: &str) -> Result<()> {
        match buckets.first() {
            None => return Err(PkPdError::EmptyDosageTable(name.to_string())),
            Some(&(lb, _)) if lb != 0.0 => {
                return Err(PkPdError::DosageLowerBound(name.to_string()))
            }
            _ => {}
        }
        for pair in buckets.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(PkPdError::DosageOrder(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Configuration form of a named dosage table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosageConfig {
    pub name: String,
    pub table: DosageTable,
}

/// Configuration form of a named schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    pub medications: Vec<MedicationConfig>,
}

/// The read-only library of schedules and dosage tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentLibrary {
    schedules: Vec<Schedule>,
    dosages: Vec<(String, DosageTable)>,
}

impl TreatmentLibrary {
    pub fn new(
        registry: &DrugRegistry,
        schedules: Vec<ScheduleConfig>,
        dosages: Vec<DosageConfig>,
    ) -> Result<Self> {
        let mut built_schedules = Vec::with_capacity(schedules.len());
        for cfg in schedules {
            let mut medications = Vec::with_capacity(cfg.medications.len());
            for med in cfg.medications {
                medications.push(Medication {
                    drug: registry.find(&med.drug)?,
                    qty_mg: med.mg,
                    time_d: med.hour / 24.0,
                    iv_duration_d: med.iv_duration_hours.map(|h| h / 24.0),
                });
            }
            built_schedules.push(Schedule {
                name: cfg.name,
                medications,
            });
        }
        let mut built_dosages = Vec::with_capacity(dosages.len());
        for cfg in dosages {
            match &cfg.table {
                DosageTable::ByAge(b) | DosageTable::ByBodyMass(b) => {
                    DosageTable::validate(b, &cfg.name)?;
                }
                DosageTable::MultiplyByKg => {}
            }
            built_dosages.push((cfg.name, cfg.table));
        }
        Ok(TreatmentLibrary {
            schedules: built_schedules,
            dosages: built_dosages,
        })
    }

    pub fn schedule(&self, index: usize) -> &Schedule {
        &self.schedules[index]
    }

    pub fn dosage(&self, index: usize) -> &DosageTable {
        &self.dosages[index].1
    }

    pub fn find_schedule(&self, name: &str) -> Result<usize> {
        self.schedules
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| PkPdError::UnknownSchedule(name.to_string()))
    }

    pub fn find_dosage(&self, name: &str) -> Result<usize> {
        self.dosages
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| PkPdError::UnknownDosage(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_table_uses_upper_bound_search() {
        let table = DosageTable::ByAge(vec![(0.0, 1.0), (5.0, 5.0)]);
        assert_eq!(table.multiplier(0.0, 50.0), 1.0);
        assert_eq!(table.multiplier(4.99, 50.0), 1.0);
        assert_eq!(table.multiplier(5.0, 50.0), 5.0);
        assert_eq!(table.multiplier(80.0, 50.0), 5.0);
    }

    #[test]
    fn mass_multiplier_table() {
        let table = DosageTable::MultiplyByKg;
        assert_eq!(table.multiplier(21.0, 50.0), 50.0);
    }

    #[test]
    fn validation_requires_zero_first_bound_and_increasing_bounds() {
        assert!(DosageTable::validate(&[(1.0, 1.0)], "t").is_err());
        assert!(DosageTable::validate(&[(0.0, 1.0), (0.0, 2.0)], "t").is_err());
        assert!(DosageTable::validate(&[(0.0, 1.0), (5.0, 2.0)], "t").is_ok());
    }
}
