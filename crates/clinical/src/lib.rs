//! Clinical illness and case management.
//!
//! Maps parasite densities to clinical states through the pathogenesis
//! model, aggregates bouts into episodes, and dispatches treatment through
//! configurable decision trees (uncomplicated care) or the fixed severe
//! outcome tree. Per-host clinical events accumulate locally and are
//! drained by monitoring after the step barrier.

pub mod case_management;
pub mod decision_tree;
pub mod episode;
pub mod pathogenesis;

pub use case_management::{
    AgeCurve, ClinicalModel, ClinicalOutcome, HealthSystem, HealthSystemConfig,
};
pub use decision_tree::{
    DecisionTree, PkPdTreatConfig, TreeBuilder, TreeConfig, TreeContext, TreeOutcome,
};
pub use episode::{Episode, EpisodeState};
pub use pathogenesis::{Morbidity, Pathogenesis, PathogenesisParams};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClinicalError {
    #[error("decision tree (random node): expected probability sum in [1.0, 1.001], found {0}")]
    RandomProbabilitySum(f64),

    #[error("decision tree age switch must have first lower bound equal 0, found {0}")]
    AgeSwitchFirstBound(f64),

    #[error("decision tree age switch must list age groups in increasing order")]
    AgeSwitchOrder,

    #[error("decision tree age switch has no age groups")]
    AgeSwitchEmpty,

    #[error("decision tree: caseType can only be used for uncomplicated cases")]
    CaseTypeOutsideUncomplicated,

    #[error("decision tree: {0} leaf must name at least one action")]
    EmptyActionLeaf(&'static str),

    #[error("age curve must cover all ages from 0 with increasing bounds")]
    AgeCurveCoverage,

    #[error(
        "care-seeking probabilities must be non-negative and sum to at most 1 per regimen"
    )]
    AccessProbabilities,

    #[error(transparent)]
    WithinHost(#[from] within_host::WithinHostError),

    #[error(transparent)]
    PkPd(#[from] pharmacology::PkPdError),
}

pub type Result<T> = std::result::Result<T, ClinicalError>;

/// Which treatment stream a treatment was reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatmentLine {
    First,
    Second,
    Hospital,
}

/// A monitoring event recorded during a host's clinical update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClinicalEvent {
    /// An episode closed; `state` aggregates everything observed in it.
    EpisodeEnd { state: EpisodeState },
    Treatment { line: TreatmentLine },
    /// Expectation contributions, reported per severe bout.
    ExpectedDirectDeaths(f64),
    ExpectedHospitalDeaths(f64),
    ExpectedSequelae(f64),
    DirectDeath { in_hospital: bool },
    Sequelae { in_hospital: bool },
    IndirectDeath,
    /// A report leaf in a decision tree fired.
    DecisionTreeReport(u32),
    /// A deploy leaf requested an intervention component.
    Deploy { component: u32 },
}
