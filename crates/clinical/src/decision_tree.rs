//! Case-management decision trees.
//!
//! Trees are loaded once from configuration into an immutable DAG of
//! shared nodes (structurally identical subtrees are de-duplicated
//! globally, so a handful of standard actions back most of the branches).
//! Execution walks the DAG for one host, consuming random numbers from the
//! host's own stream and dispatching treatments into the within-host and
//! PK/PD models.
//!
//! Load-time validation is strict: random branches must have a cumulative
//! probability in `[1.0, 1.001]`, age switches must start at a lower bound
//! of 0 with increasing bounds, and caseType may only appear in
//! uncomplicated trees.

use std::sync::Arc;

use infections::InfectionOrigin;
use pharmacology::TreatmentLibrary;
use serde::{Deserialize, Serialize};
use simclock::{LocalRng, SimClock};
use within_host::{Diagnostic, Diagnostics, SimpleTreatment, WithinHost, WithinHostConfig};

use crate::episode::EpisodeState;
use crate::{ClinicalError, Result};

/// A PK/PD treatment reference by name, as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkPdTreatConfig {
    pub schedule: String,
    pub dosage: String,
    #[serde(default)]
    pub delay_hours: f64,
}

/// Decision tree configuration, one node per value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeConfig {
    /// Run all children; a treatment from any of them counts.
    Multiple(Vec<TreeConfig>),
    /// First- or second-line subtree by episode history.
    CaseType {
        first_line: Box<TreeConfig>,
        second_line: Box<TreeConfig>,
    },
    /// Branch on the host's infection-origin classification.
    InfectionOrigin {
        imported: Box<TreeConfig>,
        introduced: Box<TreeConfig>,
        indigenous: Box<TreeConfig>,
    },
    /// Run a named diagnostic and branch on its result.
    Diagnostic {
        diagnostic: String,
        positive: Box<TreeConfig>,
        negative: Box<TreeConfig>,
    },
    /// Branch on whether the episode is uncomplicated (or malarial).
    Uncomplicated {
        positive: Box<TreeConfig>,
        negative: Box<TreeConfig>,
    },
    /// Branch on whether the episode is complicated.
    Severe {
        positive: Box<TreeConfig>,
        negative: Box<TreeConfig>,
    },
    /// Choose one branch at random; probabilities must sum to 1.
    Random(Vec<(f64, TreeConfig)>),
    /// Piecewise-constant over age: `(lower bound in years, subtree)`.
    Age(Vec<(f64, TreeConfig)>),
    /// Branch on membership of an intervention cohort.
    Cohort {
        component: u32,
        positive: Box<TreeConfig>,
        negative: Box<TreeConfig>,
    },
    NoTreatment,
    /// Report a treatment without affecting parasites.
    TreatFailure,
    /// Queue one or more drug courses through the PK/PD model.
    TreatPkPd(Vec<PkPdTreatConfig>),
    /// Apply one or more stage-clearance treatments.
    TreatSimple(Vec<SimpleTreatment>),
    /// Deploy intervention components (recorded for the deployment layer).
    Deploy(Vec<u32>),
    /// Record report counters.
    Report(Vec<u32>),
}

/// A resolved PK/PD treatment.
#[derive(Debug, Clone, PartialEq)]
struct PkPdTreat {
    schedule: usize,
    dosage: usize,
    delay_d: f64,
}

/// One node of the built tree. Children are shared, de-duplicated `Arc`s.
#[derive(Debug)]
enum Node {
    Multiple(Vec<Arc<Node>>),
    CaseType {
        first_line: Arc<Node>,
        second_line: Arc<Node>,
    },
    InfectionOrigin {
        imported: Arc<Node>,
        introduced: Arc<Node>,
        indigenous: Arc<Node>,
    },
    Diagnostic {
        diagnostic: Diagnostic,
        positive: Arc<Node>,
        negative: Arc<Node>,
    },
    Uncomplicated {
        positive: Arc<Node>,
        negative: Arc<Node>,
    },
    Severe {
        positive: Arc<Node>,
        negative: Arc<Node>,
    },
    /// Keys are cumulative probabilities; the last is at least 1.
    Random(Vec<(f64, Arc<Node>)>),
    /// Keys are age upper bounds; the last is infinite.
    Age(Vec<(f64, Arc<Node>)>),
    Cohort {
        component: u32,
        positive: Arc<Node>,
        negative: Arc<Node>,
    },
    NoTreatment,
    TreatFailure,
    TreatPkPd(Vec<PkPdTreat>),
    TreatSimple(Vec<SimpleTreatment>),
    Deploy(Vec<u32>),
    Report(Vec<u32>),
}

// Structural equality with children compared by pointer: children are
// themselves de-duplicated, so shared subtrees collapse to pointer checks.
impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Multiple(a), Node::Multiple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
            }
            (
                Node::CaseType {
                    first_line: a1,
                    second_line: a2,
                },
                Node::CaseType {
                    first_line: b1,
                    second_line: b2,
                },
            ) => Arc::ptr_eq(a1, b1) && Arc::ptr_eq(a2, b2),
            (
                Node::InfectionOrigin {
                    imported: a1,
                    introduced: a2,
                    indigenous: a3,
                },
                Node::InfectionOrigin {
                    imported: b1,
                    introduced: b2,
                    indigenous: b3,
                },
            ) => Arc::ptr_eq(a1, b1) && Arc::ptr_eq(a2, b2) && Arc::ptr_eq(a3, b3),
            (
                Node::Diagnostic {
                    diagnostic: da,
                    positive: a1,
                    negative: a2,
                },
                Node::Diagnostic {
                    diagnostic: db,
                    positive: b1,
                    negative: b2,
                },
            ) => da == db && Arc::ptr_eq(a1, b1) && Arc::ptr_eq(a2, b2),
            (
                Node::Uncomplicated {
                    positive: a1,
                    negative: a2,
                },
                Node::Uncomplicated {
                    positive: b1,
                    negative: b2,
                },
            )
            | (
                Node::Severe {
                    positive: a1,
                    negative: a2,
                },
                Node::Severe {
                    positive: b1,
                    negative: b2,
                },
            ) => Arc::ptr_eq(a1, b1) && Arc::ptr_eq(a2, b2),
            (Node::Random(a), Node::Random(b)) | (Node::Age(a), Node::Age(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((pa, na), (pb, nb))| pa == pb && Arc::ptr_eq(na, nb))
            }
            (
                Node::Cohort {
                    component: ca,
                    positive: a1,
                    negative: a2,
                },
                Node::Cohort {
                    component: cb,
                    positive: b1,
                    negative: b2,
                },
            ) => ca == cb && Arc::ptr_eq(a1, b1) && Arc::ptr_eq(a2, b2),
            (Node::NoTreatment, Node::NoTreatment)
            | (Node::TreatFailure, Node::TreatFailure) => true,
            (Node::TreatPkPd(a), Node::TreatPkPd(b)) => a == b,
            (Node::TreatSimple(a), Node::TreatSimple(b)) => a == b,
            (Node::Deploy(a), Node::Deploy(b)) => a == b,
            (Node::Report(a), Node::Report(b)) => a == b,
            _ => false,
        }
    }
}

/// Everything a tree execution needs besides the host's mutable state.
pub struct TreeContext<'a> {
    pub wh_cfg: &'a WithinHostConfig,
    pub clock: &'a SimClock,
    pub library: &'a TreatmentLibrary,
    pub state: EpisodeState,
    pub age_years: f64,
    /// Intervention cohorts the host belongs to.
    pub cohorts: &'a [u32],
}

/// Accumulated result of one tree execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeOutcome {
    /// Any treatment or treatment-failure report happened.
    pub treated: bool,
    /// A diagnostic was used.
    pub screened: bool,
    /// Intervention components to deploy, in stable order.
    pub deployed: Vec<u32>,
    /// Report counters recorded by report leaves.
    pub reports: Vec<u32>,
}

/// Builds trees against the loaded registries, sharing de-duplicated nodes
/// across every tree built by the same builder.
pub struct TreeBuilder<'a> {
    diagnostics: &'a Diagnostics,
    library: &'a TreatmentLibrary,
    saved: Vec<Arc<Node>>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(diagnostics: &'a Diagnostics, library: &'a TreatmentLibrary) -> Self {
        TreeBuilder {
            diagnostics,
            library,
            saved: Vec::new(),
        }
    }

    pub fn build(&mut self, cfg: &TreeConfig, is_uc: bool) -> Result<DecisionTree> {
        let root = self.build_node(cfg, is_uc)?;
        Ok(DecisionTree { root })
    }

    fn build_node(&mut self, cfg: &TreeConfig, is_uc: bool) -> Result<Arc<Node>> {
        let node = match cfg {
            TreeConfig::Multiple(children) => {
                let mut built = Vec::with_capacity(children.len());
                for child in children {
                    built.push(self.build_node(child, is_uc)?);
                }
                Node::Multiple(built)
            }
            TreeConfig::CaseType {
                first_line,
                second_line,
            } => {
                if !is_uc {
                    return Err(ClinicalError::CaseTypeOutsideUncomplicated);
                }
                Node::CaseType {
                    first_line: self.build_node(first_line, is_uc)?,
                    second_line: self.build_node(second_line, is_uc)?,
                }
            }
            TreeConfig::InfectionOrigin {
                imported,
                introduced,
                indigenous,
            } => Node::InfectionOrigin {
                imported: self.build_node(imported, is_uc)?,
                introduced: self.build_node(introduced, is_uc)?,
                indigenous: self.build_node(indigenous, is_uc)?,
            },
            TreeConfig::Diagnostic {
                diagnostic,
                positive,
                negative,
            } => Node::Diagnostic {
                diagnostic: self.diagnostics.get(diagnostic)?.clone(),
                positive: self.build_node(positive, is_uc)?,
                negative: self.build_node(negative, is_uc)?,
            },
            TreeConfig::Uncomplicated { positive, negative } => Node::Uncomplicated {
                positive: self.build_node(positive, is_uc)?,
                negative: self.build_node(negative, is_uc)?,
            },
            TreeConfig::Severe { positive, negative } => Node::Severe {
                positive: self.build_node(positive, true)?,
                negative: self.build_node(negative, is_uc)?,
            },
            TreeConfig::Random(outcomes) => {
                let mut branches = Vec::with_capacity(outcomes.len());
                let mut cum_p = 0.0;
                for (p, child) in outcomes {
                    cum_p += p;
                    branches.push((cum_p, self.build_node(child, is_uc)?));
                }
                // No less than one, so generated numbers cannot fall past
                // the last branch; a little head room for rounding.
                if !(1.0..=1.001).contains(&cum_p) {
                    return Err(ClinicalError::RandomProbabilitySum(cum_p));
                }
                Node::Random(branches)
            }
            TreeConfig::Age(groups) => {
                let mut branches: Vec<(f64, Arc<Node>)> = Vec::with_capacity(groups.len());
                let mut last_lb = f64::NAN;
                let mut last_node: Option<Arc<Node>> = None;
                for (lb, child) in groups {
                    if last_lb.is_nan() {
                        if *lb != 0.0 {
                            return Err(ClinicalError::AgeSwitchFirstBound(*lb));
                        }
                    } else {
                        if *lb <= last_lb {
                            return Err(ClinicalError::AgeSwitchOrder);
                        }
                        branches.push((
                            *lb,
                            last_node.clone().expect("a previous group exists"),
                        ));
                    }
                    last_node = Some(self.build_node(child, is_uc)?);
                    last_lb = *lb;
                }
                let last = last_node.ok_or(ClinicalError::AgeSwitchEmpty)?;
                branches.push((f64::INFINITY, last));
                Node::Age(branches)
            }
            TreeConfig::Cohort {
                component,
                positive,
                negative,
            } => Node::Cohort {
                component: *component,
                positive: self.build_node(positive, is_uc)?,
                negative: self.build_node(negative, is_uc)?,
            },
            TreeConfig::NoTreatment => Node::NoTreatment,
            TreeConfig::TreatFailure => Node::TreatFailure,
            TreeConfig::TreatPkPd(treatments) => {
                if treatments.is_empty() {
                    return Err(ClinicalError::EmptyActionLeaf("treatPKPD"));
                }
                let mut resolved = Vec::with_capacity(treatments.len());
                for t in treatments {
                    resolved.push(PkPdTreat {
                        schedule: self.library.find_schedule(&t.schedule)?,
                        dosage: self.library.find_dosage(&t.dosage)?,
                        delay_d: t.delay_hours / 24.0,
                    });
                }
                Node::TreatPkPd(resolved)
            }
            TreeConfig::TreatSimple(treatments) => {
                if treatments.is_empty() {
                    return Err(ClinicalError::EmptyActionLeaf("treatSimple"));
                }
                Node::TreatSimple(treatments.clone())
            }
            TreeConfig::Deploy(components) => {
                if components.is_empty() {
                    return Err(ClinicalError::EmptyActionLeaf("deploy"));
                }
                let mut sorted = components.clone();
                sorted.sort_unstable();
                Node::Deploy(sorted)
            }
            TreeConfig::Report(ids) => {
                if ids.is_empty() {
                    return Err(ClinicalError::EmptyActionLeaf("report"));
                }
                Node::Report(ids.clone())
            }
        };
        Ok(self.save(node))
    }

    // De-duplicate: a structurally identical node already in the library is
    // reused. Linear search; a little start-up time is no concern.
    fn save(&mut self, node: Node) -> Arc<Node> {
        for existing in &self.saved {
            if **existing == node {
                return Arc::clone(existing);
            }
        }
        let arc = Arc::new(node);
        self.saved.push(Arc::clone(&arc));
        arc
    }
}

/// An executable, immutable decision tree.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    root: Arc<Node>,
}

impl DecisionTree {
    pub fn exec(
        &self,
        ctx: &TreeContext<'_>,
        wh: &mut WithinHost,
        rng: &mut LocalRng,
    ) -> TreeOutcome {
        let mut out = TreeOutcome::default();
        exec_node(&self.root, ctx, wh, rng, &mut out);
        out
    }
}

fn exec_node(
    node: &Node,
    ctx: &TreeContext<'_>,
    wh: &mut WithinHost,
    rng: &mut LocalRng,
    out: &mut TreeOutcome,
) {
    match node {
        Node::Multiple(children) => {
            for child in children {
                exec_node(child, ctx, wh, rng, out);
            }
        }
        Node::CaseType {
            first_line,
            second_line,
        } => {
            debug_assert!(
                ctx.state.intersects(EpisodeState::SICK)
                    && !ctx.state.intersects(EpisodeState::COMPLICATED)
            );
            if ctx.state.intersects(EpisodeState::SECOND_CASE) {
                exec_node(second_line, ctx, wh, rng, out);
            } else {
                exec_node(first_line, ctx, wh, rng, out);
            }
        }
        Node::InfectionOrigin {
            imported,
            introduced,
            indigenous,
        } => match wh.infection_origin() {
            InfectionOrigin::Imported => exec_node(imported, ctx, wh, rng, out),
            InfectionOrigin::Introduced => exec_node(introduced, ctx, wh, rng, out),
            InfectionOrigin::Indigenous => exec_node(indigenous, ctx, wh, rng, out),
        },
        Node::Diagnostic {
            diagnostic,
            positive,
            negative,
        } => {
            let result = wh.diagnostic_result(rng, diagnostic);
            out.screened = true;
            if result {
                exec_node(positive, ctx, wh, rng, out);
            } else {
                exec_node(negative, ctx, wh, rng, out);
            }
        }
        Node::Uncomplicated { positive, negative } => {
            let uc = (ctx.state.intersects(EpisodeState::SICK)
                && !ctx.state.intersects(EpisodeState::COMPLICATED))
                || ctx.state.intersects(EpisodeState::MALARIA);
            if uc {
                exec_node(positive, ctx, wh, rng, out);
            } else {
                exec_node(negative, ctx, wh, rng, out);
            }
        }
        Node::Severe { positive, negative } => {
            if ctx.state.intersects(EpisodeState::COMPLICATED) {
                exec_node(positive, ctx, wh, rng, out);
            } else {
                exec_node(negative, ctx, wh, rng, out);
            }
        }
        Node::Random(branches) => {
            let x = rng.uniform_01();
            let chosen = branches
                .iter()
                .find(|(cum_p, _)| x < *cum_p)
                .map(|(_, n)| n)
                .unwrap_or(&branches.last().expect("random node has branches").1);
            exec_node(chosen, ctx, wh, rng, out);
        }
        Node::Age(branches) => {
            let chosen = branches
                .iter()
                .find(|(ub, _)| ctx.age_years < *ub)
                .map(|(_, n)| n)
                .unwrap_or(&branches.last().expect("age node has branches").1);
            exec_node(chosen, ctx, wh, rng, out);
        }
        Node::Cohort {
            component,
            positive,
            negative,
        } => {
            if ctx.cohorts.contains(component) {
                exec_node(positive, ctx, wh, rng, out);
            } else {
                exec_node(negative, ctx, wh, rng, out);
            }
        }
        Node::NoTreatment => {}
        Node::TreatFailure => {
            out.treated = true;
        }
        Node::TreatPkPd(treatments) => {
            for t in treatments {
                wh.treat_pkpd(
                    ctx.wh_cfg,
                    ctx.library,
                    t.schedule,
                    t.dosage,
                    ctx.age_years,
                    t.delay_d,
                );
            }
            out.treated = true;
        }
        Node::TreatSimple(treatments) => {
            let mut blood_treated = false;
            for t in treatments {
                blood_treated |= wh.treat_simple(ctx.wh_cfg, ctx.clock, *t);
            }
            out.treated |= blood_treated;
        }
        Node::Deploy(components) => {
            out.deployed.extend_from_slice(components);
            // Deployment alone does not count as treatment, so repeat
            // seekers still reach second-line care.
        }
        Node::Report(ids) => {
            out.reports.extend_from_slice(ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infections::{InfectionConfig, Genotypes, ModelChoice};
    use pharmacology::{
        DosageConfig, DosageTable, DrugRegistry, MedicationConfig, ScheduleConfig,
    };
    use simclock::SimTime;

    fn library(reg: &DrugRegistry) -> TreatmentLibrary {
        TreatmentLibrary::new(
            reg,
            vec![ScheduleConfig {
                name: "sched1".into(),
                medications: vec![MedicationConfig {
                    drug: "MQ".into(),
                    mg: 6.0,
                    hour: 0.0,
                    iv_duration_hours: None,
                }],
            }],
            vec![DosageConfig {
                name: "dosage1".into(),
                table: DosageTable::ByAge(vec![(0.0, 1.0), (5.0, 5.0)]),
            }],
        )
        .unwrap()
    }

    fn registry() -> DrugRegistry {
        DrugRegistry::new(
            vec![pharmacology::DrugType {
                abbreviation: "MQ".into(),
                volume_of_distribution: 20.8,
                negligible_concentration: 0.005,
                body_mass_exponent: 0.0,
                compartments: pharmacology::Compartments::one_compartment_half_life(13.078),
                phenotypes: vec![pharmacology::Phenotype {
                    vmax: 3.45,
                    ic50: 0.027,
                    slope: 5.0,
                }],
            }],
            1,
        )
        .unwrap()
    }

    fn treat_leaf() -> TreeConfig {
        TreeConfig::TreatPkPd(vec![PkPdTreatConfig {
            schedule: "sched1".into(),
            dosage: "dosage1".into(),
            delay_hours: 0.0,
        }])
    }

    struct Fixture {
        wh_cfg: WithinHostConfig,
        genotypes: Genotypes,
        clock: SimClock,
        library: TreatmentLibrary,
        diagnostics: Diagnostics,
    }

    fn fixture() -> Fixture {
        let reg = registry();
        let mut diagnostics = Diagnostics::new();
        diagnostics
            .insert("RDT", Diagnostic::stochastic(50.0, 0.942).unwrap())
            .unwrap();
        diagnostics
            .insert("microscopy", Diagnostic::stochastic(20.0, 0.75).unwrap())
            .unwrap();
        Fixture {
            wh_cfg: WithinHostConfig::new(InfectionConfig::new(ModelChoice::Dummy)),
            genotypes: Genotypes::single(),
            clock: SimClock::new(1, SimTime::from_years_i(90)).unwrap(),
            library: library(&reg),
            diagnostics,
        }
    }

    fn run(
        fx: &Fixture,
        tree: &DecisionTree,
        state: EpisodeState,
        rng: &mut LocalRng,
    ) -> TreeOutcome {
        let mut wh = WithinHost::new(&fx.wh_cfg, &fx.genotypes, &fx.clock, rng);
        let ctx = TreeContext {
            wh_cfg: &fx.wh_cfg,
            clock: &fx.clock,
            library: &fx.library,
            state,
            age_years: 21.0,
            cohorts: &[],
        };
        tree.exec(&ctx, &mut wh, rng)
    }

    #[test]
    fn case_type_switches_on_second_case() {
        let fx = fixture();
        let mut builder = TreeBuilder::new(&fx.diagnostics, &fx.library);
        let tree = builder
            .build(
                &TreeConfig::CaseType {
                    first_line: Box::new(treat_leaf()),
                    second_line: Box::new(TreeConfig::NoTreatment),
                },
                true,
            )
            .unwrap();
        let mut rng = LocalRng::seed(101);
        let first = run(
            &fx,
            &tree,
            EpisodeState::SICK | EpisodeState::MALARIA,
            &mut rng,
        );
        assert!(first.treated);
        let second = run(
            &fx,
            &tree,
            EpisodeState::SICK | EpisodeState::MALARIA | EpisodeState::SECOND_CASE,
            &mut rng,
        );
        assert!(!second.treated);
    }

    #[test]
    fn case_type_is_rejected_outside_uncomplicated_trees() {
        let fx = fixture();
        let mut builder = TreeBuilder::new(&fx.diagnostics, &fx.library);
        let err = builder.build(
            &TreeConfig::CaseType {
                first_line: Box::new(TreeConfig::NoTreatment),
                second_line: Box::new(TreeConfig::NoTreatment),
            },
            false,
        );
        assert!(err.is_err());
    }

    #[test]
    fn nested_random_treats_at_the_combined_rate() {
        let fx = fixture();
        let mut builder = TreeBuilder::new(&fx.diagnostics, &fx.library);
        // 0.5·0.9 + 0.5·0.7 = 0.8 of runs treat.
        let sub = |p_treat: f64| {
            TreeConfig::Random(vec![
                (p_treat, treat_leaf()),
                (1.0 - p_treat, TreeConfig::NoTreatment),
            ])
        };
        let tree = builder
            .build(
                &TreeConfig::Random(vec![(0.5, sub(0.9)), (0.5, sub(0.7))]),
                true,
            )
            .unwrap();
        let mut rng = LocalRng::seed(102);
        let n = 10_000;
        let treated = (0..n)
            .filter(|_| {
                run(&fx, &tree, EpisodeState::SICK | EpisodeState::MALARIA, &mut rng).treated
            })
            .count();
        let rate = treated as f64 / n as f64;
        assert!((rate - 0.8).abs() < 0.02, "rate {rate}");
    }

    #[test]
    fn random_sum_outside_window_is_fatal() {
        let fx = fixture();
        let mut builder = TreeBuilder::new(&fx.diagnostics, &fx.library);
        for bad in [0.9, 1.01] {
            let err = builder.build(
                &TreeConfig::Random(vec![(bad, TreeConfig::NoTreatment)]),
                true,
            );
            assert!(err.is_err(), "sum {bad} should be rejected");
        }
        assert!(builder
            .build(
                &TreeConfig::Random(vec![(1.0005, TreeConfig::NoTreatment)]),
                true
            )
            .is_ok());
    }

    #[test]
    fn age_switch_validates_bounds() {
        let fx = fixture();
        let mut builder = TreeBuilder::new(&fx.diagnostics, &fx.library);
        assert!(builder
            .build(
                &TreeConfig::Age(vec![(1.0, TreeConfig::NoTreatment)]),
                true
            )
            .is_err());
        assert!(builder
            .build(
                &TreeConfig::Age(vec![
                    (0.0, TreeConfig::NoTreatment),
                    (0.0, TreeConfig::NoTreatment)
                ]),
                true
            )
            .is_err());
        let tree = builder
            .build(
                &TreeConfig::Age(vec![
                    (0.0, treat_leaf()),
                    (2.5, TreeConfig::NoTreatment),
                    (50.0, treat_leaf()),
                ]),
                true,
            )
            .unwrap();
        let mut rng = LocalRng::seed(103);
        let mut run_age = |age: f64| {
            let mut wh = WithinHost::new(&fx.wh_cfg, &fx.genotypes, &fx.clock, &mut rng);
            let ctx = TreeContext {
                wh_cfg: &fx.wh_cfg,
                clock: &fx.clock,
                library: &fx.library,
                state: EpisodeState::SICK | EpisodeState::MALARIA,
                age_years: age,
                cohorts: &[],
            };
            tree.exec(&ctx, &mut wh, &mut rng).treated
        };
        assert!(run_age(1.0));
        assert!(!run_age(20.0));
        assert!(run_age(60.0));
    }

    #[test]
    fn identical_subtrees_are_shared() {
        let fx = fixture();
        let mut builder = TreeBuilder::new(&fx.diagnostics, &fx.library);
        let _ = builder
            .build(
                &TreeConfig::Severe {
                    positive: Box::new(treat_leaf()),
                    negative: Box::new(treat_leaf()),
                },
                true,
            )
            .unwrap();
        // Root, plus ONE shared treatment leaf.
        assert_eq!(builder.saved.len(), 2);
    }

    #[test]
    fn diagnostic_branch_screens() {
        let fx = fixture();
        let mut builder = TreeBuilder::new(&fx.diagnostics, &fx.library);
        let tree = builder
            .build(
                &TreeConfig::Diagnostic {
                    diagnostic: "RDT".into(),
                    positive: Box::new(treat_leaf()),
                    negative: Box::new(TreeConfig::NoTreatment),
                },
                true,
            )
            .unwrap();
        let mut rng = LocalRng::seed(104);
        let out = run(&fx, &tree, EpisodeState::SICK | EpisodeState::MALARIA, &mut rng);
        assert!(out.screened);
        // A parasite-free host is treated only at the false-positive rate.
        let n = 5000;
        let treated = (0..n)
            .filter(|_| {
                run(&fx, &tree, EpisodeState::SICK | EpisodeState::MALARIA, &mut rng).treated
            })
            .count();
        let rate = treated as f64 / n as f64;
        assert!((rate - 0.058).abs() < 0.02, "rate {rate}");
    }

    #[test]
    fn unknown_diagnostic_is_fatal() {
        let fx = fixture();
        let mut builder = TreeBuilder::new(&fx.diagnostics, &fx.library);
        assert!(builder
            .build(
                &TreeConfig::Diagnostic {
                    diagnostic: "PCR".into(),
                    positive: Box::new(TreeConfig::NoTreatment),
                    negative: Box::new(TreeConfig::NoTreatment),
                },
                true
            )
            .is_err());
    }
}
