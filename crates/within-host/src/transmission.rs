//! Host-to-mosquito infectiousness from lagged parasite densities.
//!
//! Gametocytes circulating today stem from asexual parasites 10–20 days
//! ago, so infectiousness reads the lagged density buffer at three lags and
//! squashes the weighted sum through a saturating Hill curve.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use simclock::SimClock;

/// Lags (days) feeding gametocyte production, newest first.
const LAGS_DAYS: [i32; 3] = [10, 15, 20];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionParams {
    /// Weights of the 10/15/20-day lagged densities.
    pub beta1: f64,
    pub beta2: f64,
    pub beta3: f64,
    /// Weighted density of half-maximal infectiousness (parasites/µl).
    pub density_50: f64,
    /// Hill shape of the infectiousness curve.
    pub shape: f64,
    /// Upper bound on the transmission probability.
    pub max_probability: f64,
}

impl Default for TransmissionParams {
    fn default() -> Self {
        TransmissionParams {
            beta1: 1.0,
            beta2: 0.46,
            beta3: 0.17,
            density_50: 120.0,
            shape: 1.2,
            max_probability: 0.92,
        }
    }
}

impl TransmissionParams {
    /// Probability that a biting mosquito becomes infected, before any
    /// transmission-blocking intervention.
    pub fn probability(
        &self,
        y_lag_imported: &Array2<f64>,
        y_lag_local: &Array2<f64>,
        clock: &SimClock,
    ) -> f64 {
        let len = y_lag_imported.nrows() as i32;
        let now = clock.now_or_ts1();
        let betas = [self.beta1, self.beta2, self.beta3];
        let mut x = 0.0;
        for (lag_days, beta) in LAGS_DAYS.iter().zip(betas.iter()) {
            let t = now - simclock::SimTime::from_days(*lag_days);
            if t < simclock::SimTime::zero() {
                continue;
            }
            let row = clock.modulo_steps(t, len) as usize;
            let dens: f64 = y_lag_imported.row(row).sum() + y_lag_local.row(row).sum();
            x += beta * dens;
        }
        if x <= 0.0 {
            return 0.0;
        }
        let xn = x.powf(self.shape);
        self.max_probability * xn / (xn + self.density_50.powf(self.shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simclock::{SimClock, SimTime};

    fn clock_at(days: i32) -> SimClock {
        let mut clock = SimClock::new(5, SimTime::from_years_i(90)).unwrap();
        for _ in 0..(days / 5) {
            clock.start_update();
            clock.end_update();
        }
        clock
    }

    #[test]
    fn no_history_means_no_transmission() {
        let params = TransmissionParams::default();
        let clock = clock_at(100);
        let y = Array2::zeros((5, 1));
        assert_eq!(params.probability(&y, &y, &clock), 0.0);
    }

    #[test]
    fn probability_increases_with_density_and_saturates() {
        let params = TransmissionParams::default();
        let clock = clock_at(100);
        let mut low = Array2::zeros((5, 1));
        let mut high = Array2::zeros((5, 1));
        low.fill(10.0);
        high.fill(1e6);
        let zero = Array2::zeros((5, 1));
        let p_low = params.probability(&low, &zero, &clock);
        let p_high = params.probability(&high, &zero, &clock);
        assert!(p_low > 0.0 && p_low < p_high);
        assert!(p_high <= params.max_probability);
    }
}
