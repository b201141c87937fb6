use greendc_core::simulation::Simulation;

use greendc_cloud::core::cloudlet_scheduler::CloudletSchedulerDynamic;
use greendc_cloud::core::config::SimulationConfig;
use greendc_cloud::core::datacenter::EnergyAccounting;
use greendc_cloud::core::host::Host;
use greendc_cloud::core::overload_detection::{MadDetector, OverloadDetector, StaticThresholdDetector};
use greendc_cloud::core::pe::make_pes;
use greendc_cloud::core::power_model::PowerModelLinear;
use greendc_cloud::core::utilization_model::{UtilizationModel, UtilizationModelFull, UtilizationModelTrace};
use greendc_cloud::core::vm::Vm;
use greendc_cloud::core::vm_allocation::PowerVmAllocationSimple;
use greendc_cloud::core::vm_registry::VmRegistry;
use greendc_cloud::core::vm_scheduler::VmSchedulerTimeShared;
use greendc_cloud::experiment::{write_metrics_csv, MetricsSummary};
use greendc_cloud::extensions::dataset_reader::WorkloadReader;
use greendc_cloud::extensions::swf_reader::SwfReader;
use greendc_cloud::simulation::CloudSimulation;

#[test]
// Comment lines and jobs with non-positive run time or processor count are discarded,
// malformed lines are skipped.
fn test_swf_reader_filters_input() {
    let path = std::env::temp_dir().join("greendc_swf_reader_test.swf");
    let content = "\
; SWF header comment
1 0 0 100 2 0 0 0 0 0 0 0 0 0 0 0 0 0
2 10 0 -1 4 0 0 0 0 0 0 0 0 0 0 0 0 0
3 20 0 50 0 0 0 0 0 0 0 0 0 0 0 0 0 0
garbage line
4 30 0 60 1 0 0 0 0 0 0 0 0 0 0 0 0 0
";
    std::fs::write(&path, content).unwrap();

    let mut reader = SwfReader::from_file(&path, 1000.).unwrap();
    assert_eq!(reader.job_count(), 2);

    let first = reader.next_job().unwrap();
    assert_eq!(first.id, 1);
    assert_eq!(first.submit_time, 0.);
    assert_eq!(first.run_time, 100.);
    assert_eq!(first.pe_count, 2);
    assert_eq!(reader.length_of(&first), 100000.);

    let second = reader.next_job().unwrap();
    assert_eq!(second.id, 4);
    assert_eq!(second.pe_count, 1);
    assert!(reader.next_job().is_none());

    std::fs::remove_file(&path).unwrap();
}

#[test]
// Trace samples are interpolated linearly and the tail is clamped to the last sample.
fn test_trace_utilization_model_interpolates() {
    let model = UtilizationModelTrace::new(vec![0., 0.5, 1.0], 300.);
    assert_eq!(model.utilization(0.), 0.);
    assert!((model.utilization(150.) - 0.25).abs() < 1e-9);
    assert_eq!(model.utilization(300.), 0.5);
    assert!((model.utilization(450.) - 0.75).abs() < 1e-9);
    assert_eq!(model.utilization(600.), 1.0);
    assert_eq!(model.utilization(9000.), 1.0);
}

#[test]
// While the utilization history is too short for the statistics, the adaptive detector
// delegates to its fallback.
fn test_mad_detector_falls_back_on_short_history() {
    let mut registry = VmRegistry::new();
    let vm = registry.register(Vm::new(
        1,
        0,
        900.,
        1,
        512.,
        100.,
        100.,
        Box::new(CloudletSchedulerDynamic::new(900., 1)),
    ));
    let mut host = Host::new(
        0,
        "h",
        2048.,
        1000.,
        100000.,
        Box::new(VmSchedulerTimeShared::new(make_pes(1, 1000.))),
        Some(Box::new(PowerModelLinear::new(250., 0.7))),
    );
    assert!(host.vm_create(&vm));

    // the instantiating VM demands 900 of 1000 MIPS
    let sensitive = MadDetector::new(2.5, Box::new(StaticThresholdDetector::new(0.5)));
    assert!(sensitive.is_host_overloaded(&host, &registry, 0.));
    assert_eq!(sensitive.utilization_metric(&host, &registry, 0.), 0.5);

    let tolerant = MadDetector::new(2.5, Box::new(StaticThresholdDetector::new(0.95)));
    assert!(!tolerant.is_host_overloaded(&host, &registry, 0.));
}

#[test]
// End-to-end metrics of a small run land in a readable CSV file.
fn test_metrics_summary_and_csv() {
    let sim = Simulation::new(123);
    let mut config = SimulationConfig::new();
    config.disable_migrations = true;
    let mut cloud_sim = CloudSimulation::new(sim, config);

    let dc = cloud_sim.add_datacenter(
        "dc",
        Box::new(PowerVmAllocationSimple::new(true)),
        EnergyAccounting::PowerAware,
    );
    cloud_sim.add_host(dc, "h0", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(250., 0.7))));
    let broker = cloud_sim.add_broker("broker", dc);
    let vm = cloud_sim.spawn_vm(broker, 500., 1, 512., 100., 100., Box::new(CloudletSchedulerDynamic::new(500., 1)));
    cloud_sim.submit_cloudlet(broker, 10000., 1, 0., 0., Box::new(UtilizationModelFull::new()), 0., Some(vm));

    let end_time = cloud_sim.run();

    let datacenter = cloud_sim.datacenter(dc);
    let registry = cloud_sim.vm_registry();
    let summary = MetricsSummary::compute("smoke", end_time, &datacenter.borrow(), &registry.borrow());
    assert_eq!(summary.migrations, 0);
    assert!(summary.energy_ws > 0.);
    assert_eq!(summary.sla_degradation_due_to_migration, 0.);

    let path = std::env::temp_dir().join("greendc_metrics_test.csv");
    write_metrics_csv(&path, &[summary]).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("smoke"));
    assert!(written.contains("experiment_name"));
    std::fs::remove_file(&path).unwrap();
}
