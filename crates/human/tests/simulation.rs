//! End-to-end simulation tests: inoculation through treatment to
//! clearance, population invariants, determinism and checkpointing.

use clinical::{HealthSystem, HealthSystemConfig, PathogenesisParams, PkPdTreatConfig, TreeConfig};
use human::{save_host, load_host, step_population, Host, Scenario, StepMonitor};
use infections::{Genotypes, InfectionConfig, ModelChoice};
use pharmacology::{
    Compartments, DosageConfig, DosageTable, DrugRegistry, DrugType, MedicationConfig, Phenotype,
    ScheduleConfig, TreatmentLibrary,
};
use simclock::{MasterRng, SimClock, SimTime};
use within_host::{
    Diagnostic, Diagnostics, SimpleTreatment, StepInput, TreatmentRegistry, WithinHostConfig,
    MAX_INFECTIONS,
};

fn scenario() -> (Scenario, SimClock) {
    let clock = SimClock::new(1, SimTime::from_years_i(90)).unwrap();

    let drugs = DrugRegistry::new(
        vec![DrugType {
            abbreviation: "MQ".into(),
            volume_of_distribution: 20.8,
            negligible_concentration: 0.005,
            body_mass_exponent: 0.0,
            compartments: Compartments::one_compartment_half_life(13.078),
            phenotypes: vec![Phenotype {
                vmax: 3.45,
                ic50: 0.027,
                slope: 5.0,
            }],
        }],
        1,
    )
    .unwrap();
    let library = TreatmentLibrary::new(
        &drugs,
        vec![ScheduleConfig {
            name: "act".into(),
            medications: vec![MedicationConfig {
                drug: "MQ".into(),
                mg: 8.3,
                hour: 0.0,
                iv_duration_hours: None,
            }],
        }],
        vec![DosageConfig {
            name: "kg".into(),
            table: DosageTable::MultiplyByKg,
        }],
    )
    .unwrap();

    let mut diagnostics = Diagnostics::new();
    diagnostics
        .insert("RDT", Diagnostic::stochastic(50.0, 0.942).unwrap())
        .unwrap();

    let mut treatments = TreatmentRegistry::new();
    let hs_cfg = HealthSystemConfig {
        p_seek_official_care_uncomplicated1: 1.0,
        p_seek_official_care_uncomplicated2: 1.0,
        p_self_treat_uncomplicated: 0.0,
        p_seek_official_care_severe: 0.48,
        cure_rate_severe: 0.8,
        treatment_severe: SimpleTreatment::blood_clearance(),
        tree_uc_official: TreeConfig::CaseType {
            first_line: Box::new(TreeConfig::TreatPkPd(vec![PkPdTreatConfig {
                schedule: "act".into(),
                dosage: "kg".into(),
                delay_hours: 0.0,
            }])),
            second_line: Box::new(TreeConfig::NoTreatment),
        },
        tree_uc_self_treat: TreeConfig::NoTreatment,
        case_fatality: vec![(0.0, 0.09), (5.0, 0.05)],
        p_sequelae_inpatient: vec![(0.0, 0.02)],
        log_odds_ratio_community: 0.7,
        memory_steps: 30,
        cfr_pf_use_hospital: false,
        indirect_mort_bugfix: false,
    };
    let health_system =
        HealthSystem::new(&hs_cfg, &clock, &diagnostics, &library, &mut treatments).unwrap();

    let scenario = Scenario {
        within_host: WithinHostConfig::new(InfectionConfig::new(ModelChoice::Dummy)),
        genotypes: Genotypes::single(),
        drugs,
        library,
        treatments,
        health_system,
        pathogenesis: PathogenesisParams::default(),
        heterogeneity: Default::default(),
        monitoring_diagnostic: Diagnostic::deterministic(40.0).unwrap(),
        cohorts_remove_on_first_treatment: vec![1],
        cohorts_remove_on_first_bout: vec![],
    };
    (scenario, clock)
}

fn run(
    seed: u64,
    n_hosts: usize,
    steps: i32,
    inoculate_at_step: i32,
) -> (Vec<Host>, SimClock, Vec<StepMonitor>) {
    let (scenario, mut clock) = scenario();
    let mut master = MasterRng::seed(seed);
    let mut hosts: Vec<Host> = (0..n_hosts)
        .map(|_| Host::birth(&scenario, &clock, &mut master))
        .collect();
    let mut monitors = Vec::new();
    for step in 0..steps {
        let n = if step == inoculate_at_step { 1 } else { 0 };
        let inputs: Vec<StepInput> = hosts
            .iter()
            .map(|_| StepInput {
                imported: n,
                indigenous: 0,
                weights_imported: &[],
                weights_indigenous: &[],
            })
            .collect();
        let monitor = step_population(&mut hosts, &scenario, &mut clock, &inputs);
        for host in &hosts {
            let wh = host.within_host();
            assert!(wh.num_infections() <= MAX_INFECTIONS);
            assert!(wh.total_density().is_finite());
            assert!(wh.hrp2_density() >= 0.0);
            assert!(wh.total_density() >= wh.hrp2_density());
        }
        monitors.push(monitor);
    }
    (hosts, clock, monitors)
}

#[test]
fn inoculation_leads_to_treatment_and_clearance() {
    let (hosts, clock, monitors) = run(4242, 8, 80, 0);

    let total_treatments: u32 = monitors.iter().map(|m| m.treatments.iter().sum::<u32>()).sum();
    assert!(total_treatments > 0, "no host ever got treated");

    let total_infected_steps: u32 = monitors.iter().map(|m| m.infected_hosts).sum();
    assert!(total_infected_steps > 0, "inoculations never took");

    // Under saturating mefloquine pressure every infection has cleared
    // long before the end of the run.
    for host in &hosts {
        assert_eq!(host.within_host().num_infections(), 0);
        assert_eq!(host.within_host().total_density(), 0.0);
    }

    // Patent hosts were seen while infections ran their course.
    let total_patent: u32 = monitors.iter().map(|m| m.patent_hosts).sum();
    assert!(total_patent > 0);
    let _ = clock;
}

#[test]
fn identical_seeds_reproduce_the_simulation() {
    let (hosts_a, _, monitors_a) = run(77, 6, 40, 0);
    let (hosts_b, _, monitors_b) = run(77, 6, 40, 0);
    assert_eq!(hosts_a, hosts_b);
    assert_eq!(monitors_a, monitors_b);
}

#[test]
fn different_seeds_diverge() {
    let (_, _, monitors_a) = run(1, 6, 40, 0);
    let (_, _, monitors_b) = run(2, 6, 40, 0);
    assert_ne!(monitors_a, monitors_b);
}

#[test]
fn checkpoint_round_trip_is_exact() {
    let (scenario, mut clock) = scenario();
    let mut master = MasterRng::seed(99);
    let mut hosts: Vec<Host> = (0..4)
        .map(|_| Host::birth(&scenario, &clock, &mut master))
        .collect();

    // Get some non-trivial state in place: infections, drugs, episodes.
    for step in 0..25 {
        let inputs: Vec<StepInput> = hosts
            .iter()
            .map(|_| StepInput {
                imported: i32::from(step == 0),
                indigenous: 0,
                weights_imported: &[],
                weights_indigenous: &[],
            })
            .collect();
        step_population(&mut hosts, &scenario, &mut clock, &inputs);
    }

    // Serialise and restore every host.
    let mut restored = Vec::new();
    for host in &hosts {
        let mut buffer = Vec::new();
        save_host(host, &mut buffer).unwrap();
        let loaded = load_host(buffer.as_slice()).unwrap();
        restored.push(loaded);
    }
    assert_eq!(hosts, restored);

    // Both copies continue identically: same RNG stream, same outcomes.
    let mut clock_b = clock.clone();
    for _ in 0..10 {
        let inputs: Vec<StepInput> = hosts.iter().map(|_| StepInput::default()).collect();
        let ma = step_population(&mut hosts, &scenario, &mut clock, &inputs);
        let inputs_b: Vec<StepInput> = restored.iter().map(|_| StepInput::default()).collect();
        let mb = step_population(&mut restored, &scenario, &mut clock_b, &inputs_b);
        assert_eq!(ma, mb);
    }
    assert_eq!(hosts, restored);
}

#[test]
fn transmission_probability_is_a_probability() {
    let (hosts, clock, _) = run(11, 4, 60, 0);
    let (scenario, _) = scenario();
    for host in &hosts {
        let p = host.prob_transmission_to_mosquito(&scenario, &clock, 1.0);
        assert!((0.0..=1.0).contains(&p), "p = {p}");
        let blocked = host.prob_transmission_to_mosquito(&scenario, &clock, 0.25);
        assert!(blocked <= p);
    }
}

#[test]
fn cohort_membership_drops_on_first_treatment() {
    let (scenario, mut clock) = scenario();
    let mut master = MasterRng::seed(31337);
    let mut hosts = vec![Host::birth(&scenario, &clock, &mut master)];
    hosts[0].join_cohort(1);
    hosts[0].join_cohort(7);

    for step in 0..60 {
        let inputs: Vec<StepInput> = hosts
            .iter()
            .map(|_| StepInput {
                imported: i32::from(step == 0),
                indigenous: 0,
                weights_imported: &[],
                weights_indigenous: &[],
            })
            .collect();
        let monitor = step_population(&mut hosts, &scenario, &mut clock, &inputs);
        if hosts.is_empty() {
            return; // the single host died of severe malaria; nothing to check
        }
        if monitor.treatments.iter().sum::<u32>() > 0 {
            // Component 1 is configured to drop on first treatment.
            assert!(!hosts[0].cohorts().contains(&1));
            assert!(hosts[0].cohorts().contains(&7));
            return;
        }
    }
    panic!("host was never treated in 60 steps");
}
