//! Five-day case management with decision trees.
//!
//! Each step the pathogenesis model classifies the host; uncomplicated
//! episodes run the configured self-treatment or official-care decision
//! tree depending on an access-to-care draw, while complicated episodes
//! run a fixed nine-outcome probability tree over community/hospital care,
//! parasite clearance, death and sequelae. Indirect (co-morbidity) deaths
//! are delayed through the doomed countdown.

use serde::{Deserialize, Serialize};
use simclock::{LocalRng, SimClock, SimTime};
use within_host::{SimpleTreatment, TreatmentId, TreatmentRegistry, WithinHost, WithinHostConfig};

use crate::decision_tree::{DecisionTree, TreeBuilder, TreeConfig, TreeContext};
use crate::episode::{Episode, EpisodeState};
use crate::pathogenesis::{Pathogenesis, PathogenesisParams};
use crate::{ClinicalError, ClinicalEvent, Result, TreatmentLine};

/// Days a doomed host lingers before the indirect death is recorded.
const DOOMED_EXPIRED_DAYS: i32 = -30;
/// Positive doomed markers; any positive value means dead at the next
/// liveness check.
const NOT_DOOMED: i32 = 0;
const DOOMED_COMPLICATED: i32 = 4;
const DOOMED_INDIRECT: i32 = 2;
const DOOMED_TOO_OLD: i32 = 1;

/// Uncomplicated regimen selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseType {
    FirstLine = 0,
    SecondLine = 1,
}

/// Piecewise-constant curve over age, validated to cover all ages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgeCurve {
    /// `(lower bound in years, value)`; first bound must be 0.
    points: Vec<(f64, f64)>,
}

impl AgeCurve {
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        match points.first() {
            Some(&(lb, _)) if lb == 0.0 => {}
            _ => return Err(ClinicalError::AgeCurveCoverage),
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(ClinicalError::AgeCurveCoverage);
        }
        Ok(AgeCurve { points })
    }

    pub fn constant(value: f64) -> Self {
        AgeCurve {
            points: vec![(0.0, value)],
        }
    }

    pub fn eval(&self, age_years: f64) -> f64 {
        let mut value = self.points[0].1;
        for &(lb, v) in &self.points {
            if age_years < lb {
                break;
            }
            value = v;
        }
        value
    }
}

/// Health-system configuration, by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSystemConfig {
    pub p_seek_official_care_uncomplicated1: f64,
    pub p_seek_official_care_uncomplicated2: f64,
    pub p_self_treat_uncomplicated: f64,
    pub p_seek_official_care_severe: f64,
    pub cure_rate_severe: f64,
    /// Applied on hospital parasitological success.
    pub treatment_severe: SimpleTreatment,
    pub tree_uc_official: TreeConfig,
    pub tree_uc_self_treat: TreeConfig,
    /// Hospital case fatality by age.
    pub case_fatality: Vec<(f64, f64)>,
    /// Probability of sequelae among inpatients, by age.
    pub p_sequelae_inpatient: Vec<(f64, f64)>,
    /// Log odds ratio of community vs hospital case fatality.
    pub log_odds_ratio_community: f64,
    /// Episode aggregation window and second-case memory, in steps.
    pub memory_steps: i32,
    /// Use the hospital CFR for in-hospital parasitological failures
    /// instead of the community CFR.
    pub cfr_pf_use_hospital: bool,
    /// Gate uncomplicated events on the indirect-mortality flag the
    /// historical way (see DESIGN notes).
    pub indirect_mort_bugfix: bool,
}

/// The loaded health system, shared read-only between hosts.
#[derive(Debug, Clone)]
pub struct HealthSystem {
    access_uc_any: [f64; 2],
    access_uc_self_treat: [f64; 2],
    access_severe: f64,
    cure_rate_severe: f64,
    treatment_severe: TreatmentId,
    tree_uc_official: DecisionTree,
    tree_uc_self_treat: DecisionTree,
    case_fatality: AgeCurve,
    p_sequelae_inpatient: AgeCurve,
    odds_ratio_community: f64,
    memory: SimTime,
    cfr_pf_use_hospital: bool,
    indirect_mort_bugfix: bool,
}

impl HealthSystem {
    pub fn new(
        cfg: &HealthSystemConfig,
        clock: &SimClock,
        diagnostics: &within_host::Diagnostics,
        library: &pharmacology::TreatmentLibrary,
        treatments: &mut TreatmentRegistry,
    ) -> Result<Self> {
        let access_uc_self_treat = [cfg.p_self_treat_uncomplicated, 0.0];
        let access_uc_any = [
            cfg.p_seek_official_care_uncomplicated1 + access_uc_self_treat[0],
            cfg.p_seek_official_care_uncomplicated2 + access_uc_self_treat[1],
        ];
        if cfg.p_seek_official_care_uncomplicated1 < 0.0
            || cfg.p_seek_official_care_uncomplicated2 < 0.0
            || cfg.p_self_treat_uncomplicated < 0.0
            || access_uc_any[0] > 1.0
            || access_uc_any[1] > 1.0
            || !(0.0..=1.0).contains(&cfg.p_seek_official_care_severe)
            || !(0.0..=1.0).contains(&cfg.cure_rate_severe)
        {
            return Err(ClinicalError::AccessProbabilities);
        }

        let mut builder = TreeBuilder::new(diagnostics, library);
        let tree_uc_official = builder.build(&cfg.tree_uc_official, true)?;
        let tree_uc_self_treat = builder.build(&cfg.tree_uc_self_treat, true)?;

        Ok(HealthSystem {
            access_uc_any,
            access_uc_self_treat,
            access_severe: cfg.p_seek_official_care_severe,
            cure_rate_severe: cfg.cure_rate_severe,
            treatment_severe: treatments.add(cfg.treatment_severe),
            tree_uc_official,
            tree_uc_self_treat,
            case_fatality: AgeCurve::new(cfg.case_fatality.clone())?,
            p_sequelae_inpatient: AgeCurve::new(cfg.p_sequelae_inpatient.clone())?,
            odds_ratio_community: cfg.log_odds_ratio_community.exp(),
            memory: clock.from_steps(cfg.memory_steps),
            cfr_pf_use_hospital: cfg.cfr_pf_use_hospital,
            indirect_mort_bugfix: cfg.indirect_mort_bugfix,
        })
    }

    pub fn memory(&self) -> SimTime {
        self.memory
    }

    /// Community case fatality, log-odds-shifted from the hospital rate.
    fn community_cfr(&self, hospital_cfr: f64) -> f64 {
        let x = hospital_cfr * self.odds_ratio_community;
        x / (1.0 - hospital_cfr + x)
    }
}

/// What the host loop must do after a clinical update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClinicalOutcome {
    /// The host died this step (indirectly or of severe malaria).
    pub died: bool,
    /// Remove from cohorts configured to drop members on first treatment.
    pub remove_on_first_treatment: bool,
    /// Remove from cohorts configured to drop members on first bout.
    pub remove_on_first_bout: bool,
}

/// Per-host clinical state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalModel {
    /// Time of the last treatment; `never` if none.
    t_last_treatment: SimTime,
    /// Host-specific treatment-seeking multiplier.
    treatment_seeking_factor: f64,
    pathogenesis: Pathogenesis,
    episode: Episode,
    /// Indirect-mortality countdown: 0 = not doomed, negative = counting
    /// down in days, positive = dead at the next liveness check.
    doomed: i32,
    /// Events accumulated this step; drained by monitoring after the
    /// per-step barrier.
    events: Vec<ClinicalEvent>,
}

impl ClinicalModel {
    pub fn new(pathogenesis: &PathogenesisParams, treatment_seeking_factor: f64) -> Self {
        ClinicalModel {
            t_last_treatment: SimTime::never(),
            treatment_seeking_factor,
            pathogenesis: Pathogenesis::new(pathogenesis),
            episode: Episode::new(),
            doomed: NOT_DOOMED,
            events: Vec::new(),
        }
    }

    pub fn doomed(&self) -> i32 {
        self.doomed
    }

    pub fn t_last_treatment(&self) -> SimTime {
        self.t_last_treatment
    }

    /// Check and record death by age limit or an earlier doomed marker.
    pub fn is_dead(&mut self, clock: &SimClock, age: SimTime) -> bool {
        if age >= clock.max_human_age() {
            self.doomed = DOOMED_TOO_OLD;
        }
        self.doomed > NOT_DOOMED
    }

    /// Drain the events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<ClinicalEvent> {
        std::mem::take(&mut self.events)
    }

    /// The clinical update for one step. Runs after the within-host update.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        hs: &HealthSystem,
        path_params: &PathogenesisParams,
        wh_cfg: &WithinHostConfig,
        treatments: &TreatmentRegistry,
        library: &pharmacology::TreatmentLibrary,
        clock: &SimClock,
        rng: &mut LocalRng,
        wh: &mut WithinHost,
        age_years: f64,
        comorbidity_factor: f64,
        cohorts: &[u32],
    ) -> ClinicalOutcome {
        let mut outcome = ClinicalOutcome::default();

        // Countdown to indirect mortality.
        if self.doomed < NOT_DOOMED {
            self.doomed -= clock.interval();
        }
        if self.doomed <= DOOMED_EXPIRED_DAYS {
            self.events.push(ClinicalEvent::IndirectDeath);
            self.doomed = DOOMED_INDIRECT;
            outcome.died = true;
            return outcome;
        }

        let morbidity = self.pathogenesis.determine_morbidity(
            path_params,
            rng,
            wh.total_density(),
            age_years,
            comorbidity_factor,
        );
        let pg_state = morbidity.state;

        if pg_state.intersects(EpisodeState::MALARIA) {
            if pg_state.intersects(EpisodeState::COMPLICATED) {
                self.severe_malaria(hs, wh_cfg, treatments, clock, rng, wh, age_years, pg_state);
            } else if hs.indirect_mort_bugfix || !morbidity.indirect_mortality {
                // The gate on the indirect-mortality bit is historical;
                // kept switchable because its validity is debatable.
                self.uncomplicated_event(
                    hs, wh_cfg, library, clock, rng, wh, age_years, pg_state, cohorts,
                );
            }
        } else if pg_state.intersects(EpisodeState::SICK) {
            self.uncomplicated_event(
                hs, wh_cfg, library, clock, rng, wh, age_years, pg_state, cohorts,
            );
        }

        if morbidity.indirect_mortality && self.doomed == NOT_DOOMED {
            self.doomed = -clock.interval();
        }

        if self.t_last_treatment == clock.ts0() {
            outcome.remove_on_first_treatment = true;
        }
        if pg_state.intersects(EpisodeState::SICK) {
            outcome.remove_on_first_bout = true;
        }
        outcome.died = self.doomed > NOT_DOOMED;
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn uncomplicated_event(
        &mut self,
        hs: &HealthSystem,
        wh_cfg: &WithinHostConfig,
        library: &pharmacology::TreatmentLibrary,
        clock: &SimClock,
        rng: &mut LocalRng,
        wh: &mut WithinHost,
        age_years: f64,
        pg_state: EpisodeState,
        cohorts: &[u32],
    ) {
        let ts0 = clock.ts0();
        // A treatment in recent memory makes this a second case.
        let (regimen, state) = if self.t_last_treatment + hs.memory() > ts0 {
            (CaseType::SecondLine, pg_state | EpisodeState::SECOND_CASE)
        } else {
            (CaseType::FirstLine, pg_state)
        };
        self.episode.report(ts0, hs.memory(), state, &mut self.events);

        let x = rng.uniform_01();
        let tsf = self.treatment_seeking_factor;
        let regimen_ix = regimen as usize;
        if x < hs.access_uc_any[regimen_ix] * tsf {
            let ctx = TreeContext {
                wh_cfg,
                clock,
                library,
                state,
                age_years,
                cohorts,
            };
            let tree = if x < hs.access_uc_self_treat[regimen_ix] * tsf {
                &hs.tree_uc_self_treat
            } else {
                &hs.tree_uc_official
            };
            let output = tree.exec(&ctx, wh, rng);

            if output.treated {
                self.t_last_treatment = ts0;
                let line = match regimen {
                    CaseType::FirstLine => TreatmentLine::First,
                    CaseType::SecondLine => TreatmentLine::Second,
                };
                self.events.push(ClinicalEvent::Treatment { line });
            }
            for id in output.reports {
                self.events.push(ClinicalEvent::DecisionTreeReport(id));
            }
            for component in output.deployed {
                self.events.push(ClinicalEvent::Deploy { component });
            }
        }
        // else: no care sought
    }

    /// The fixed severe-malaria probability tree: nine mutually exclusive
    /// outcomes over community/hospital care, parasite clearance, death and
    /// sequelae, selected by a single uniform draw.
    #[allow(clippy::too_many_arguments)]
    fn severe_malaria(
        &mut self,
        hs: &HealthSystem,
        wh_cfg: &WithinHostConfig,
        treatments: &TreatmentRegistry,
        clock: &SimClock,
        rng: &mut LocalRng,
        wh: &mut WithinHost,
        age_years: f64,
        pg_state: EpisodeState,
    ) {
        let ts0 = clock.ts0();
        // Probability of reaching hospital:
        let p2 = hs.access_severe * self.treatment_seeking_factor;
        // Probability of parasitological cure given hospital treatment:
        let p3 = hs.cure_rate_severe;
        // Hospital case-fatality rate:
        let p4 = hs.case_fatality.eval(age_years);
        // Community case-fatality rate:
        let p5a = hs.community_cfr(p4);
        // In-hospital treatment-failure case-fatality rate:
        let p5b = if hs.cfr_pf_use_hospital { p4 } else { p5a };
        // Sequelae probabilities for treated and untreated survivors:
        let p6 = hs.p_sequelae_inpatient.eval(age_years);
        let p7 = p6;

        let mut q = [0.0; 9];
        // Community deaths
        q[0] = (1.0 - p2) * p5a;
        // Community sequelae
        q[1] = q[0] + (1.0 - p2) * (1.0 - p5a) * p7;
        // Community survival
        q[2] = q[1] + (1.0 - p2) * (1.0 - p5a) * (1.0 - p7);
        // In-hospital parasitological failure deaths
        q[3] = q[2] + p2 * (1.0 - p3) * p5b;
        // In-hospital parasitological failure sequelae
        q[4] = q[3] + p2 * (1.0 - p3) * (1.0 - p5b) * p7;
        // In-hospital parasitological failure survivors
        q[5] = q[4] + p2 * (1.0 - p3) * (1.0 - p5b) * (1.0 - p7);
        // In-hospital parasitological success deaths
        q[6] = q[5] + p2 * p3 * p4;
        // In-hospital parasitological success sequelae
        q[7] = q[6] + p2 * p3 * (1.0 - p4) * p6;
        // In-hospital parasitological success survival
        q[8] = q[7] + p2 * p3 * (1.0 - p4) * (1.0 - p6);
        debug_assert!((q[8] - 1.0).abs() < 1e-9);

        let ex_hospital_death = p2 * (p3 * p4 + (1.0 - p3) * p5b);
        let ex_death = ex_hospital_death + (1.0 - p2) * p5a;
        self.events
            .push(ClinicalEvent::ExpectedHospitalDeaths(ex_hospital_death));
        self.events.push(ClinicalEvent::ExpectedDirectDeaths(ex_death));
        let ex_seq = (p2 * (p3 * (1.0 - p4) + (1.0 - p3) * (1.0 - p5b)) + (1.0 - p2) * (1.0 - p5a))
            * p6;
        self.events.push(ClinicalEvent::ExpectedSequelae(ex_seq));

        let p_random = rng.uniform_01();

        if p_random >= q[2] {
            // Treated in hospital.
            self.t_last_treatment = ts0;
            self.events.push(ClinicalEvent::Treatment {
                line: TreatmentLine::Hospital,
            });
            let state_treated = pg_state | EpisodeState::IN_HOSPITAL;

            if p_random >= q[5] {
                // Parasites cleared.
                wh.treatment(wh_cfg, clock, treatments, hs.treatment_severe);
                if p_random < q[6] {
                    self.report(hs, clock, state_treated | EpisodeState::DIRECT_DEATH);
                    self.doomed = DOOMED_COMPLICATED;
                } else if p_random < q[7] {
                    self.report(hs, clock, state_treated | EpisodeState::SEQUELAE);
                } else {
                    self.report(hs, clock, state_treated | EpisodeState::RECOVERY);
                }
            } else {
                // Treated but parasites not cleared.
                if p_random < q[3] {
                    self.report(hs, clock, state_treated | EpisodeState::DIRECT_DEATH);
                    self.doomed = DOOMED_COMPLICATED;
                } else if p_random < q[4] {
                    self.report(hs, clock, state_treated | EpisodeState::SEQUELAE);
                } else {
                    self.report(hs, clock, state_treated);
                }
            }
        } else {
            // Not treated; no change in parasitological status.
            if p_random < q[0] {
                self.report(hs, clock, pg_state | EpisodeState::DIRECT_DEATH);
                self.doomed = DOOMED_COMPLICATED;
            } else if p_random < q[1] {
                self.report(hs, clock, pg_state | EpisodeState::SEQUELAE);
            } else {
                self.report(hs, clock, pg_state);
            }
        }
    }

    fn report(&mut self, hs: &HealthSystem, clock: &SimClock, state: EpisodeState) {
        self.episode
            .report(clock.ts0(), hs.memory(), state, &mut self.events);
        if state.intersects(EpisodeState::DIRECT_DEATH) {
            self.events.push(ClinicalEvent::DirectDeath {
                in_hospital: state.intersects(EpisodeState::IN_HOSPITAL),
            });
        } else if state.intersects(EpisodeState::SEQUELAE) {
            self.events.push(ClinicalEvent::Sequelae {
                in_hospital: state.intersects(EpisodeState::IN_HOSPITAL),
            });
        }
    }

    /// Flush the open episode (end of life or of monitoring period).
    pub fn flush_episode(&mut self) {
        self.episode.flush(&mut self.events);
    }
}
