//! Deterministic test infection.
//!
//! Geometric growth with wrap-around, scaled by the survival factor. Used
//! by unit tests and as the simplest possible dynamics model.

use serde::{Deserialize, Serialize};
use simclock::mod_nn_i;

use crate::DensityUpdate;

const GROWTH_RATE: f64 = 8.0;
const WRAP: i32 = 20_000;
const PARASITE_THRESHOLD: f64 = 1.0;
const INITIAL_DENSITY: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DummyState {
    density: f64,
}

impl DummyState {
    pub fn new() -> Self {
        DummyState {
            density: INITIAL_DENSITY,
        }
    }

    pub fn update(&mut self, survival_factor: f64) -> DensityUpdate {
        self.density = f64::from(mod_nn_i((self.density * GROWTH_RATE) as i32, WRAP)) * survival_factor;
        DensityUpdate {
            density: self.density,
            extinct: self.density < PARASITE_THRESHOLD,
        }
    }
}

impl Default for DummyState {
    fn default() -> Self {
        DummyState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn densities_follow_the_geometric_map() {
        let mut s = DummyState::new();
        assert_eq!(s.update(1.0).density, 128.0);
        assert_eq!(s.update(1.0).density, 1024.0);
        let mut t = DummyState::new();
        t.update(1.0);
        assert_eq!(t.update(0.1).density, 102.4);
    }

    #[test]
    fn wraps_and_goes_extinct() {
        let mut s = DummyState::new();
        // Run until the wrap-around eventually drops density below 1.
        let mut extinct = false;
        for _ in 0..10_000 {
            let u = s.update(0.01);
            if u.extinct {
                extinct = true;
                break;
            }
        }
        assert!(extinct);
    }
}
