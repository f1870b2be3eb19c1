//! Drug type definitions and the load-once drug registry.
//!
//! A drug type couples a pharmacokinetic compartment structure with one
//! pharmacodynamic phenotype per parasite genotype. Types are loaded once
//! from configuration, validated, and then shared read-only; per-host state
//! references them by index.

use serde::{Deserialize, Serialize};

use crate::{PkPdError, Result};

/// A rate or volume that may carry between-host log-normal variation.
///
/// With `cv = 0` every host gets the mean, which keeps reference scenarios
/// reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampledValue {
    pub mean: f64,
    /// Coefficient of variation of the log-normal inter-host distribution.
    #[serde(default)]
    pub cv: f64,
}

impl SampledValue {
    pub fn fixed(mean: f64) -> Self {
        SampledValue { mean, cv: 0.0 }
    }

    /// Sample one host's value; deterministic when `cv` is zero.
    pub fn sample(&self, rng: &mut simclock::LocalRng) -> f64 {
        if self.cv <= 0.0 {
            self.mean
        } else {
            let sigma = (self.cv * self.cv + 1.0).ln().sqrt();
            let mu = self.mean.ln() - 0.5 * sigma * sigma;
            rng.log_normal(mu, sigma)
        }
    }
}

/// Pharmacodynamic parameters for one genotype phenotype.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Phenotype {
    /// Maximal killing rate (per day).
    pub vmax: f64,
    /// Concentration of half-maximal killing (mg/l).
    pub ic50: f64,
    /// Hill slope of the concentration–effect curve.
    pub slope: f64,
}

impl Phenotype {
    /// Instantaneous killing rate at concentration `c` (mg/l).
    pub fn killing_rate(&self, c: f64) -> f64 {
        if c <= 0.0 {
            return 0.0;
        }
        let cn = c.powf(self.slope);
        let icn = self.ic50.powf(self.slope);
        self.vmax * cn / (cn + icn)
    }
}

/// Pharmacokinetic compartment structure of a drug type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Compartments {
    /// Single compartment; boluses enter the central compartment directly.
    OneCompartment { elimination_rate: SampledValue },
    /// Absorption compartment feeding a central compartment which converts
    /// into a metabolite drug. `elimination_rate` is direct (non-conversion)
    /// parent loss and is commonly zero.
    Conversion {
        absorption_rate: SampledValue,
        elimination_rate: SampledValue,
        /// Abbreviation of the metabolite drug type; resolved to an index at
        /// registry load.
        metabolite: String,
        conversion_rate: SampledValue,
        /// Metabolite molecular weight over parent molecular weight.
        molecular_weight_ratio: f64,
    },
    /// Gut, central and one peripheral compartment.
    TwoCompartment {
        elimination_rate: SampledValue,
        absorption_rate: SampledValue,
        k12: SampledValue,
        k21: SampledValue,
    },
    /// Gut, central and two peripheral compartments.
    ThreeCompartment {
        elimination_rate: SampledValue,
        absorption_rate: SampledValue,
        k12: SampledValue,
        k21: SampledValue,
        k13: SampledValue,
        k31: SampledValue,
    },
}

impl Compartments {
    /// One-compartment structure parameterised by half-life in days.
    pub fn one_compartment_half_life(half_life_d: f64) -> Self {
        Compartments::OneCompartment {
            elimination_rate: SampledValue::fixed(std::f64::consts::LN_2 / half_life_d),
        }
    }
}

/// One drug type: PK structure plus PD phenotypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugType {
    /// Short name used by treatment schedules, e.g. "MQ".
    pub abbreviation: String,
    /// Volume of distribution (l/kg).
    pub volume_of_distribution: f64,
    /// Concentration below which the drug is dropped from the body (mg/l).
    pub negligible_concentration: f64,
    /// Allometric exponent: the elimination rate is scaled by
    /// `mass^-exponent` relative to the reference parameterisation.
    #[serde(default)]
    pub body_mass_exponent: f64,
    pub compartments: Compartments,
    /// One entry, or one entry per genotype.
    pub phenotypes: Vec<Phenotype>,
}

impl DrugType {
    /// PD phenotype for a genotype index.
    pub fn phenotype(&self, genotype: usize) -> &Phenotype {
        if self.phenotypes.len() == 1 {
            &self.phenotypes[0]
        } else {
            &self.phenotypes[genotype]
        }
    }

    /// Central-compartment concentration for a drug amount in mg.
    pub fn concentration(&self, amount_mg: f64, body_mass: f64) -> f64 {
        amount_mg / (self.volume_of_distribution * body_mass)
    }

    /// Elimination-rate scaling for a host of the given mass.
    pub fn mass_rate_factor(&self, body_mass: f64) -> f64 {
        if self.body_mass_exponent == 0.0 {
            1.0
        } else {
            body_mass.powf(-self.body_mass_exponent)
        }
    }
}

/// The read-only table of drug types, indexed by small integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugRegistry {
    types: Vec<DrugType>,
    /// Metabolite type index for conversion drugs, parallel to `types`.
    metabolite_index: Vec<Option<usize>>,
}

impl DrugRegistry {
    /// Validate and freeze a set of drug types.
    pub fn new(types: Vec<DrugType>, genotype_count: usize) -> Result<Self> {
        let mut metabolite_index = vec![None; types.len()];
        for (i, ty) in types.iter().enumerate() {
            if types[..i].iter().any(|t| t.abbreviation == ty.abbreviation) {
                return Err(PkPdError::DuplicateDrug(ty.abbreviation.clone()));
            }
            if !(ty.volume_of_distribution > 0.0) || !(ty.negligible_concentration > 0.0) {
                return Err(PkPdError::BadDrugParameters(ty.abbreviation.clone()));
            }
            if ty.phenotypes.is_empty()
                || (ty.phenotypes.len() != 1 && ty.phenotypes.len() != genotype_count)
            {
                return Err(PkPdError::PhenotypeCount {
                    drug: ty.abbreviation.clone(),
                    got: ty.phenotypes.len(),
                    genotypes: genotype_count,
                });
            }
        }
        for (i, ty) in types.iter().enumerate() {
            if let Compartments::Conversion { metabolite, .. } = &ty.compartments {
                let target = types
                    .iter()
                    .position(|t| &t.abbreviation == metabolite)
                    .ok_or_else(|| PkPdError::UnknownDrug(metabolite.clone()))?;
                if target == i {
                    return Err(PkPdError::BadDrugParameters(ty.abbreviation.clone()));
                }
                metabolite_index[i] = Some(target);
            }
        }
        Ok(DrugRegistry {
            types,
            metabolite_index,
        })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, index: usize) -> &DrugType {
        &self.types[index]
    }

    /// Metabolite drug index of a conversion parent.
    pub fn metabolite_of(&self, index: usize) -> Option<usize> {
        self.metabolite_index[index]
    }

    /// Look an abbreviation up; unknown names are a configuration error.
    pub fn find(&self, abbreviation: &str) -> Result<usize> {
        self.types
            .iter()
            .position(|t| t.abbreviation == abbreviation)
            .ok_or_else(|| PkPdError::UnknownDrug(abbreviation.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn simple_type(abbrev: &str) -> DrugType {
        DrugType {
            abbreviation: abbrev.to_string(),
            volume_of_distribution: 20.8,
            negligible_concentration: 0.005,
            body_mass_exponent: 0.0,
            compartments: Compartments::one_compartment_half_life(13.078),
            phenotypes: vec![Phenotype {
                vmax: 3.45,
                ic50: 0.027,
                slope: 5.0,
            }],
        }
    }

    #[test]
    fn killing_rate_saturates_at_vmax() {
        let pd = Phenotype {
            vmax: 3.45,
            ic50: 0.027,
            slope: 5.0,
        };
        assert_eq!(pd.killing_rate(0.0), 0.0);
        assert_relative_eq!(pd.killing_rate(pd.ic50), 0.5 * pd.vmax, max_relative = 1e-12);
        assert!(pd.killing_rate(10.0) > 0.999 * pd.vmax);
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_metabolites() {
        let err = DrugRegistry::new(vec![simple_type("MQ"), simple_type("MQ")], 1);
        assert!(err.is_err());

        let mut conv = simple_type("AR");
        conv.compartments = Compartments::Conversion {
            absorption_rate: SampledValue::fixed(23.98),
            elimination_rate: SampledValue::fixed(0.0),
            metabolite: "DHA".to_string(),
            conversion_rate: SampledValue::fixed(11.98),
            molecular_weight_ratio: 0.9547587,
        };
        assert!(DrugRegistry::new(vec![conv], 1).is_err());
    }

    #[test]
    fn metabolite_resolves_to_index() {
        let mut conv = simple_type("AR");
        conv.compartments = Compartments::Conversion {
            absorption_rate: SampledValue::fixed(23.98),
            elimination_rate: SampledValue::fixed(0.0),
            metabolite: "DHA".to_string(),
            conversion_rate: SampledValue::fixed(11.98),
            molecular_weight_ratio: 0.9547587,
        };
        let reg = DrugRegistry::new(vec![conv, simple_type("DHA")], 1).unwrap();
        assert_eq!(reg.metabolite_of(0), Some(1));
        assert_eq!(reg.metabolite_of(1), None);
        assert_eq!(reg.find("DHA").unwrap(), 1);
        assert!(reg.find("XX").is_err());
    }
}
