//! Pharmacokinetics and pharmacodynamics of antimalarial treatment.
//!
//! Drug types couple a compartment structure (one-compartment, conversion
//! to a metabolite, or two/three compartments) with per-genotype killing
//! parameters. Each host carries a [`DrugModel`]: the drugs currently in
//! the body plus a queue of prescribed medications.
//!
//! Concentration trajectories use closed forms where they exist and an
//! embedded Runge–Kutta integrator elsewhere; the daily killing integral is
//! evaluated with adaptive Gauss–Legendre quadrature.

pub mod drug;
pub mod drug_type;
pub mod integrator;
pub mod model;
pub mod quadrature;
pub mod treatments;

pub use drug::Drug;
pub use drug_type::{Compartments, DrugRegistry, DrugType, Phenotype, SampledValue};
pub use model::{DrugModel, MedicateData};
pub use treatments::{
    DosageConfig, DosageTable, MedicationConfig, ScheduleConfig, TreatmentLibrary,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PkPdError {
    #[error("duplicate drug abbreviation: {0}")]
    DuplicateDrug(String),

    #[error("no drug with this abbreviation: {0}")]
    UnknownDrug(String),

    #[error("invalid PK parameters for drug {0}")]
    BadDrugParameters(String),

    #[error("drug {drug}: {got} phenotypes for {genotypes} genotypes")]
    PhenotypeCount {
        drug: String,
        got: usize,
        genotypes: usize,
    },

    #[error("no treatment schedule with this name: {0}")]
    UnknownSchedule(String),

    #[error("no dosage table with this name: {0}")]
    UnknownDosage(String),

    #[error("dosage table {0} is empty")]
    EmptyDosageTable(String),

    #[error("dosage table {0} must have first lower bound equal 0")]
    DosageLowerBound(String),

    #[error("dosage table {0} must list buckets in increasing order")]
    DosageOrder(String),
}

pub type Result<T> = std::result::Result<T, PkPdError>;
