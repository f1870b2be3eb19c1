//! Simple (non-pharmacological) treatment registry.
//!
//! A simple treatment acts by stage: a liver-stage window blocks new
//! inoculations from progressing, and a blood-stage window clears
//! blood-stage infections at each update while it lasts. Durations are in
//! time steps: `None` leaves the stage untouched, `Some(-1)` clears the
//! stage's current infections outright and unconditionally, `Some(0)` is
//! an immediate one-step effect, positive values open a timed window.

use serde::{Deserialize, Serialize};

/// Handle into the treatment registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreatmentId(usize);

impl TreatmentId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Stage-wise clearance durations, in time steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleTreatment {
    pub liver_steps: Option<i32>,
    pub blood_steps: Option<i32>,
}

impl SimpleTreatment {
    /// Clear the blood stage, forever (the severe-malaria hospital
    /// treatment).
    pub fn blood_clearance() -> Self {
        SimpleTreatment {
            liver_steps: None,
            blood_steps: Some(-1),
        }
    }
}

/// Registry of treatment effects, shared read-only after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreatmentRegistry {
    treatments: Vec<SimpleTreatment>,
}

impl TreatmentRegistry {
    pub fn new() -> Self {
        TreatmentRegistry::default()
    }

    pub fn add(&mut self, treatment: SimpleTreatment) -> TreatmentId {
        self.treatments.push(treatment);
        TreatmentId(self.treatments.len() - 1)
    }

    pub fn get(&self, id: TreatmentId) -> &SimpleTreatment {
        &self.treatments[id.0]
    }
}
