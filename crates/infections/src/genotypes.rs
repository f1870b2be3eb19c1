//! The parasite genotype table.
//!
//! Genotypes determine a drug's pharmacodynamic phenotype and the chance
//! that an infection lacks HRP2 (making it invisible to HRP2-based rapid
//! tests). The table is loaded once and shared; code passes the small
//! integer [`GenotypeId`] around.

use serde::{Deserialize, Serialize};
use simclock::LocalRng;

use crate::{InfectionError, Result};

/// Index into the genotype table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenotypeId(u32);

impl GenotypeId {
    pub fn new(index: usize) -> Self {
        GenotypeId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One parasite strain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Genotype {
    /// Sampling weight at scenario start; weights are normalised at load.
    pub initial_frequency: f64,
    /// Probability that an infection of this genotype is HRP2-deficient.
    pub hrp2_deletion_freq: f64,
}

/// The read-only genotype table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genotypes {
    genotypes: Vec<Genotype>,
    /// Cumulative normalised initial frequencies, for sampling.
    cumulative: Vec<f64>,
}

impl Genotypes {
    /// A single wild-type genotype; the default for scenarios that do not
    /// track parasite strains.
    pub fn single() -> Self {
        Genotypes::new(vec![Genotype {
            initial_frequency: 1.0,
            hrp2_deletion_freq: 0.0,
        }])
        .expect("the single-genotype table is always valid")
    }

    pub fn new(genotypes: Vec<Genotype>) -> Result<Self> {
        if genotypes.is_empty() {
            return Err(InfectionError::EmptyGenotypeTable);
        }
        let total: f64 = genotypes.iter().map(|g| g.initial_frequency).sum();
        if !(total > 0.0) || genotypes.iter().any(|g| g.initial_frequency < 0.0) {
            return Err(InfectionError::BadGenotypeFrequencies);
        }
        if genotypes
            .iter()
            .any(|g| !(0.0..=1.0).contains(&g.hrp2_deletion_freq))
        {
            return Err(InfectionError::BadGenotypeFrequencies);
        }
        let mut cumulative = Vec::with_capacity(genotypes.len());
        let mut acc = 0.0;
        for g in &genotypes {
            acc += g.initial_frequency / total;
            cumulative.push(acc);
        }
        // Guard the last bucket against rounding.
        *cumulative.last_mut().expect("table is non-empty") = 1.0;
        Ok(Genotypes {
            genotypes,
            cumulative,
        })
    }

    pub fn count(&self) -> usize {
        self.genotypes.len()
    }

    pub fn get(&self, id: GenotypeId) -> &Genotype {
        &self.genotypes[id.index()]
    }

    /// Sample a genotype. An empty weight vector means "use the initial
    /// frequencies"; otherwise `weights` must have one entry per genotype.
    pub fn sample_genotype(&self, rng: &mut LocalRng, weights: &[f64]) -> GenotypeId {
        debug_assert!(weights.is_empty() || weights.len() == self.count());
        let x = rng.uniform_01();
        if weights.is_empty() {
            let idx = self
                .cumulative
                .iter()
                .position(|&c| x < c)
                .unwrap_or(self.count() - 1);
            return GenotypeId::new(idx);
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return GenotypeId::new(0);
        }
        let mut acc = 0.0;
        for (i, w) in weights.iter().enumerate() {
            acc += w / total;
            if x < acc {
                return GenotypeId::new(i);
            }
        }
        GenotypeId::new(self.count() - 1)
    }

    /// Whether a fresh infection of this genotype lacks HRP2.
    pub fn sample_hrp2_deficiency(&self, rng: &mut LocalRng, id: GenotypeId) -> bool {
        let p = self.get(id).hrp2_deletion_freq;
        p > 0.0 && rng.bernoulli(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_weights_use_initial_frequencies() {
        let table = Genotypes::new(vec![
            Genotype {
                initial_frequency: 3.0,
                hrp2_deletion_freq: 0.0,
            },
            Genotype {
                initial_frequency: 1.0,
                hrp2_deletion_freq: 0.0,
            },
        ])
        .unwrap();
        let mut rng = LocalRng::seed(11);
        let n = 40_000;
        let first = (0..n)
            .filter(|_| table.sample_genotype(&mut rng, &[]).index() == 0)
            .count();
        let rate = first as f64 / n as f64;
        assert!((rate - 0.75).abs() < 0.01, "rate {rate}");
    }

    #[test]
    fn supplied_weights_override_frequencies() {
        let table = Genotypes::new(vec![
            Genotype {
                initial_frequency: 1.0,
                hrp2_deletion_freq: 0.0,
            },
            Genotype {
                initial_frequency: 1.0,
                hrp2_deletion_freq: 0.0,
            },
        ])
        .unwrap();
        let mut rng = LocalRng::seed(12);
        for _ in 0..100 {
            assert_eq!(table.sample_genotype(&mut rng, &[0.0, 1.0]).index(), 1);
        }
    }

    #[test]
    fn invalid_tables_are_rejected() {
        assert!(Genotypes::new(vec![]).is_err());
        assert!(Genotypes::new(vec![Genotype {
            initial_frequency: -1.0,
            hrp2_deletion_freq: 0.0,
        }])
        .is_err());
        assert!(Genotypes::new(vec![Genotype {
            initial_frequency: 1.0,
            hrp2_deletion_freq: 1.5,
        }])
        .is_err());
    }
}
