//! Pyrogenic-threshold pathogenesis.
//!
//! Fever is driven by parasite density relative to an adaptive pyrogenic
//! threshold: the probability of a clinical episode this step is
//! `ρ / (ρ + Y*)`. The threshold itself rises with recent parasite
//! exposure and decays back, so repeatedly infected hosts tolerate higher
//! densities. Complications arise from a malaria episode with an age- and
//! density-dependent probability scaled by the host's co-morbidity factor,
//! and carry a chance of flagging indirect mortality. Non-malaria fevers,
//! when enabled, occur at a fixed age-dependent incidence.

use serde::{Deserialize, Serialize};
use simclock::LocalRng;

use crate::episode::EpisodeState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathogenesisParams {
    /// Pyrogenic threshold of a naive host (parasites/µl).
    pub y_star_init: f64,
    /// Lower bound of the threshold.
    pub y_star_min: f64,
    /// Threshold growth per step at saturating density.
    pub y_star_growth: f64,
    /// Density of half-maximal threshold stimulation (parasites/µl).
    pub y_star_half: f64,
    /// Per-step decay of the threshold toward its floor.
    pub y_star_decay: f64,
    /// Base probability that a malaria episode turns severe.
    pub p_severe_base: f64,
    /// Density at which the severe risk doubles (parasites/µl).
    pub severe_density_50: f64,
    /// Age-dependent co-morbidity contribution to severe risk: risk is
    /// multiplied by `1 + comorb_age_factor / (1 + age/comorb_age_50)`.
    pub comorb_age_factor: f64,
    pub comorb_age_50: f64,
    /// Probability that a severe or co-morbid episode flags indirect
    /// mortality.
    pub p_indirect_mortality: f64,
    /// Age-dependent incidence of non-malaria fever per step, or `None` to
    /// disable: `(age upper bound in years, incidence)`.
    pub non_malaria_fever: Option<Vec<(f64, f64)>>,
}

impl Default for PathogenesisParams {
    fn default() -> Self {
        PathogenesisParams {
            y_star_init: 296.3,
            y_star_min: 12.9,
            y_star_growth: 124.0,
            y_star_half: 4000.0,
            y_star_decay: 0.075,
            p_severe_base: 0.0092,
            severe_density_50: 1.8e5,
            comorb_age_factor: 0.177,
            comorb_age_50: 0.5,
            p_indirect_mortality: 0.019,
            non_malaria_fever: None,
        }
    }
}

/// Outcome of a morbidity determination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Morbidity {
    pub state: EpisodeState,
    pub indirect_mortality: bool,
}

/// Per-host pathogenesis state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pathogenesis {
    /// Current pyrogenic threshold Y* (parasites/µl).
    y_star: f64,
}

impl Pathogenesis {
    pub fn new(params: &PathogenesisParams) -> Self {
        Pathogenesis {
            y_star: params.y_star_init,
        }
    }

    pub fn y_star(&self) -> f64 {
        self.y_star
    }

    /// Determine this step's morbidity from the current total density.
    pub fn determine_morbidity(
        &mut self,
        params: &PathogenesisParams,
        rng: &mut LocalRng,
        density: f64,
        age_years: f64,
        comorbidity_factor: f64,
    ) -> Morbidity {
        let p_episode = density / (density + self.y_star);

        // The threshold adapts to exposure before the next step.
        self.y_star += params.y_star_growth * density / (density + params.y_star_half);
        self.y_star -= params.y_star_decay * (self.y_star - params.y_star_min);
        self.y_star = self.y_star.max(params.y_star_min);

        let mut state = EpisodeState::NONE;
        let mut indirect_mortality = false;

        if density > 0.0 && rng.bernoulli(p_episode) {
            state |= EpisodeState::SICK | EpisodeState::MALARIA;

            let age_term = 1.0 + params.comorb_age_factor / (1.0 + age_years / params.comorb_age_50);
            let density_term = 1.0 + density / (density + params.severe_density_50);
            let p_severe =
                (params.p_severe_base * age_term * density_term * comorbidity_factor).min(1.0);
            if rng.bernoulli(p_severe) {
                state |= EpisodeState::COMPLICATED;
            }
            if state.contains(EpisodeState::COMPLICATED) || comorbidity_factor > 1.0 {
                indirect_mortality = rng.bernoulli(params.p_indirect_mortality);
            }
        } else if let Some(nmf) = &params.non_malaria_fever {
            let incidence = nmf
                .iter()
                .find(|&&(ub, _)| age_years < ub)
                .map(|&(_, inc)| inc)
                .unwrap_or(0.0);
            if rng.bernoulli(incidence) {
                state |= EpisodeState::SICK | EpisodeState::NM_FEVER;
            }
        }

        Morbidity {
            state,
            indirect_mortality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_parasites_no_malaria() {
        let params = PathogenesisParams::default();
        let mut path = Pathogenesis::new(&params);
        let mut rng = LocalRng::seed(91);
        for _ in 0..100 {
            let m = path.determine_morbidity(&params, &mut rng, 0.0, 21.0, 1.0);
            assert!(!m.state.intersects(EpisodeState::MALARIA));
            assert!(!m.indirect_mortality);
        }
    }

    #[test]
    fn high_density_usually_causes_fever() {
        let params = PathogenesisParams::default();
        let mut rng = LocalRng::seed(92);
        let mut sick = 0;
        for _ in 0..1000 {
            let mut path = Pathogenesis::new(&params);
            let m = path.determine_morbidity(&params, &mut rng, 1e5, 5.0, 1.0);
            if m.state.intersects(EpisodeState::MALARIA) {
                sick += 1;
            }
        }
        // P(sick) = 1e5/(1e5 + 296.3) ≈ 0.997
        assert!(sick > 980, "{sick}/1000 sick");
    }

    #[test]
    fn threshold_adapts_upward_under_exposure() {
        let params = PathogenesisParams::default();
        let mut path = Pathogenesis::new(&params);
        let mut rng = LocalRng::seed(93);
        let before = path.y_star();
        for _ in 0..20 {
            let _ = path.determine_morbidity(&params, &mut rng, 5e4, 21.0, 1.0);
        }
        assert!(path.y_star() > before);
        // And decays back without exposure.
        let peak = path.y_star();
        for _ in 0..200 {
            let _ = path.determine_morbidity(&params, &mut rng, 0.0, 21.0, 1.0);
        }
        assert!(path.y_star() < peak);
        assert!(path.y_star() >= params.y_star_min);
    }

    #[test]
    fn non_malaria_fever_uses_age_buckets() {
        let params = PathogenesisParams {
            non_malaria_fever: Some(vec![(5.0, 1.0), (f64::INFINITY, 0.0)]),
            ..PathogenesisParams::default()
        };
        let mut path = Pathogenesis::new(&params);
        let mut rng = LocalRng::seed(94);
        let child = path.determine_morbidity(&params, &mut rng, 0.0, 2.0, 1.0);
        assert!(child.state.contains(EpisodeState::SICK | EpisodeState::NM_FEVER));
        let adult = path.determine_morbidity(&params, &mut rng, 0.0, 30.0, 1.0);
        assert!(adult.state.is_empty());
    }
}
