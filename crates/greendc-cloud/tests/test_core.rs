use greendc_core::simulation::Simulation;

use greendc_cloud::core::cloudlet_scheduler::CloudletSchedulerDynamic;
use greendc_cloud::core::config::SimulationConfig;
use greendc_cloud::core::datacenter::EnergyAccounting;
use greendc_cloud::core::host::Host;
use greendc_cloud::core::pe::make_pes;
use greendc_cloud::core::power_model::{PowerModel, PowerModelLinear, PowerModelSpecPower};
use greendc_cloud::core::provisioner::ResourceProvisioner;
use greendc_cloud::core::suitability::HostSuitability;
use greendc_cloud::core::utilization_model::{UtilizationModelConstant, UtilizationModelFull};
use greendc_cloud::core::vm::Vm;
use greendc_cloud::core::vm_allocation::PowerVmAllocationSimple;
use greendc_cloud::core::vm_registry::VmRegistry;
use greendc_cloud::core::vm_scheduler::{VmScheduler, VmSchedulerSpaceShared, VmSchedulerTimeShared};
use greendc_cloud::simulation::CloudSimulation;

fn no_migrations_config() -> SimulationConfig {
    let mut config = SimulationConfig::new();
    config.disable_migrations = true;
    config
}

fn dynamic_scheduler(mips: f64, pe_count: u32) -> Box<CloudletSchedulerDynamic> {
    Box::new(CloudletSchedulerDynamic::new(mips, pe_count))
}

#[test]
// Two hosts of 1000 MIPS, two VMs of 500 MIPS each running one cloudlet of 10000 MI at
// full utilization: both cloudlets take 20 seconds and nothing migrates.
fn test_two_hosts_two_vms_no_migrations() {
    let sim = Simulation::new(123);
    let mut cloud_sim = CloudSimulation::new(sim, no_migrations_config());

    let dc = cloud_sim.add_datacenter(
        "dc",
        Box::new(PowerVmAllocationSimple::new(true)),
        EnergyAccounting::PowerAware,
    );
    let h1 = cloud_sim.add_host(dc, "h1", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(250., 0.7))));
    let h2 = cloud_sim.add_host(dc, "h2", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(250., 0.7))));
    let broker = cloud_sim.add_broker("broker", dc);

    let vm1 = cloud_sim.spawn_vm(broker, 500., 1, 512., 100., 100., dynamic_scheduler(500., 1));
    let vm2 = cloud_sim.spawn_vm(broker, 500., 1, 512., 100., 100., dynamic_scheduler(500., 1));
    cloud_sim.submit_cloudlet(broker, 10000., 1, 0., 0., Box::new(UtilizationModelFull::new()), 0., Some(vm1));
    cloud_sim.submit_cloudlet(broker, 10000., 1, 0., 0., Box::new(UtilizationModelFull::new()), 0., Some(vm2));

    cloud_sim.run();

    let datacenter = cloud_sim.datacenter(dc);
    assert_eq!(datacenter.borrow().migration_count(), 0);

    let broker_ref = cloud_sim.broker(broker);
    let broker_ref = broker_ref.borrow();
    let finished = broker_ref.finished_cloudlets();
    assert_eq!(finished.len(), 2);
    for cloudlet in finished {
        let duration = cloudlet.finish_time() - cloudlet.submission_time();
        assert!((duration - 20.).abs() < 0.1, "unexpected duration {}", duration);
    }

    // each VM got its own host and both are released by now
    let dc_ref = datacenter.borrow();
    assert_eq!(dc_ref.hosts().get(h1).vm_count(), 0);
    assert_eq!(dc_ref.hosts().get(h2).vm_count(), 0);
    assert_eq!(dc_ref.hosts().get(h1).utilization_of_cpu(), 0.);
    assert_eq!(dc_ref.hosts().get(h2).utilization_of_cpu(), 0.);
}

#[test]
// The first VM fills the first host, so the second VM must land on the second host.
fn test_placement_respects_capacity() {
    let sim = Simulation::new(123);
    let mut cloud_sim = CloudSimulation::new(sim, no_migrations_config());

    let dc = cloud_sim.add_datacenter(
        "dc",
        Box::new(PowerVmAllocationSimple::new(true)),
        EnergyAccounting::PowerAware,
    );
    let h1 = cloud_sim.add_host(dc, "h1", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(250., 0.7))));
    let h2 = cloud_sim.add_host(dc, "h2", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(250., 0.7))));
    let broker = cloud_sim.add_broker("broker", dc);

    let vm1 = cloud_sim.spawn_vm(broker, 800., 1, 512., 100., 100., dynamic_scheduler(800., 1));
    let vm2 = cloud_sim.spawn_vm(broker, 800., 1, 512., 100., 100., dynamic_scheduler(800., 1));
    cloud_sim.submit_cloudlet(broker, 1e9, 1, 0., 0., Box::new(UtilizationModelFull::new()), 0., Some(vm1));
    cloud_sim.submit_cloudlet(broker, 1e9, 1, 0., 0., Box::new(UtilizationModelFull::new()), 0., Some(vm2));

    cloud_sim.step_for_duration(400.);

    assert_eq!(cloud_sim.vm_location(vm1), Some(h1));
    assert_eq!(cloud_sim.vm_location(vm2), Some(h2));
    let datacenter = cloud_sim.datacenter(dc);
    let dc_ref = datacenter.borrow();
    assert!(dc_ref.hosts().get(h1).utilization_of_cpu() > 0.7);
    assert!(dc_ref.hosts().get(h2).utilization_of_cpu() > 0.7);
}

#[test]
// Without oversubscription the sum of nominal VM capacities never exceeds the host capacity,
// and RAM/BW reservations stay within their capacities.
fn test_capacity_invariants_without_oversubscription() {
    let sim = Simulation::new(123);
    let mut cloud_sim = CloudSimulation::new(sim, no_migrations_config());

    let dc = cloud_sim.add_datacenter(
        "dc",
        Box::new(PowerVmAllocationSimple::new(false)),
        EnergyAccounting::PowerAware,
    );
    for i in 0..2 {
        cloud_sim.add_host(
            dc,
            &format!("h{}", i),
            2,
            1000.,
            2048.,
            1000.,
            100000.,
            Some(Box::new(PowerModelLinear::new(250., 0.7))),
        );
    }
    let broker = cloud_sim.add_broker("broker", dc);

    // 8 VMs of 600 MIPS and 512 RAM: only 3 fit per host without oversubscription
    let mut vms = Vec::new();
    for _ in 0..8 {
        let vm = cloud_sim.spawn_vm(broker, 600., 1, 512., 100., 100., dynamic_scheduler(600., 1));
        vms.push(vm);
    }
    for &vm in &vms {
        cloud_sim.submit_cloudlet(broker, 1e9, 1, 0., 0., Box::new(UtilizationModelFull::new()), 0., Some(vm));
    }

    cloud_sim.step_for_duration(400.);

    let registry = cloud_sim.vm_registry();
    let registry = registry.borrow();
    let datacenter = cloud_sim.datacenter(dc);
    let dc_ref = datacenter.borrow();
    let mut hosted = 0;
    for host_id in dc_ref.hosts().ids() {
        let host = dc_ref.hosts().get(host_id);
        assert!(host.total_vm_mips(&registry) <= host.total_mips() + 1e-9);
        assert!(host.ram_provisioner().used() <= host.ram_provisioner().capacity() + 1e-9);
        assert!(host.bw_provisioner().used() <= host.bw_provisioner().capacity() + 1e-9);
        hosted += host.vm_count();
    }
    assert_eq!(hosted, 6);

    // each VM is hosted by at most one host
    for &vm in &vms {
        let count = dc_ref
            .hosts()
            .ids()
            .into_iter()
            .filter(|&host_id| dc_ref.hosts().get(host_id).has_vm(vm))
            .count();
        assert!(count <= 1);
    }
}

#[test]
// Accumulated energy never decreases over time.
fn test_energy_is_monotone() {
    let sim = Simulation::new(123);
    let mut cloud_sim = CloudSimulation::new(sim, no_migrations_config());

    let dc = cloud_sim.add_datacenter(
        "dc",
        Box::new(PowerVmAllocationSimple::new(true)),
        EnergyAccounting::PowerAware,
    );
    cloud_sim.add_host(dc, "h1", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(100., 0.4))));
    let broker = cloud_sim.add_broker("broker", dc);
    let vm = cloud_sim.spawn_vm(broker, 500., 1, 512., 100., 100., dynamic_scheduler(500., 1));
    cloud_sim.submit_cloudlet(broker, 1e7, 1, 0., 0., Box::new(UtilizationModelFull::new()), 0., Some(vm));

    let datacenter = cloud_sim.datacenter(dc);
    let mut last_energy = 0.;
    for _ in 0..20 {
        cloud_sim.step_for_duration(500.);
        let energy = datacenter.borrow().energy_consumed();
        assert!(energy >= last_energy);
        last_energy = energy;
    }
    assert!(last_energy > 0.);
}

#[test]
// Non-power-aware accounting charges every host its maximum power for the whole run.
fn test_max_power_energy_accounting() {
    let sim = Simulation::new(123);
    let mut config = SimulationConfig::new();
    config.disable_migrations = true;
    config.simulation_limit = 86400.;
    let mut cloud_sim = CloudSimulation::new(sim, config);

    let dc = cloud_sim.add_datacenter(
        "dc",
        Box::new(PowerVmAllocationSimple::new(true)),
        EnergyAccounting::MaxPower,
    );
    for i in 0..4 {
        cloud_sim.add_host(
            dc,
            &format!("h{}", i),
            1,
            1000.,
            4096.,
            1000.,
            100000.,
            Some(Box::new(PowerModelLinear::new(250., 0.7))),
        );
    }
    let broker = cloud_sim.add_broker("broker", dc);
    for _ in 0..8 {
        let vm = cloud_sim.spawn_vm(broker, 400., 1, 512., 100., 100., dynamic_scheduler(400., 1));
        cloud_sim.submit_cloudlet(broker, 1e12, 1, 0., 0., Box::new(UtilizationModelFull::new()), 0., Some(vm));
    }

    let end_time = cloud_sim.run();
    assert_eq!(end_time, 86400.);

    let expected = 4. * 250. * 86400.;
    let energy = cloud_sim.datacenter(dc).borrow().energy_consumed();
    assert!(
        (energy - expected).abs() < 1.,
        "energy {} differs from expected {}",
        energy,
        expected
    );
}

#[test]
fn test_provisioner_reservations() {
    let mut ram = ResourceProvisioner::new(1000.);
    assert!(ram.allocate(1, 600.));
    assert_eq!(ram.used(), 600.);
    assert_eq!(ram.available(), 400.);
    assert!(!ram.is_suitable(2, 500.));
    // re-allocation releases the previous reservation first
    assert!(ram.is_suitable(1, 1000.));
    assert!(ram.allocate(1, 1000.));
    assert_eq!(ram.allocated_for(1), 1000.);
    assert!(!ram.allocate(2, 1.));
    ram.deallocate(1);
    assert_eq!(ram.used(), 0.);
}

#[test]
fn test_time_shared_scheduler_scales_down_when_overcommitted() {
    let mut scheduler = VmSchedulerTimeShared::new(make_pes(2, 1000.));
    assert!(scheduler.allocate_pes(1, false, &[800., 800.]));
    assert_eq!(scheduler.total_allocated_mips(1), 1600.);
    assert!((scheduler.available_mips() - 400.).abs() < 1e-9);

    // 2200 MIPS demanded on a 2000 MIPS host: everything is scaled by 2000/2200
    assert!(scheduler.allocate_pes(2, false, &[600.]));
    let scale = 2000. / 2200.;
    assert!((scheduler.total_allocated_mips(1) - 1600. * scale).abs() < 1e-9);
    assert!((scheduler.total_allocated_mips(2) - 600. * scale).abs() < 1e-9);
    assert!(scheduler.available_mips() < 1e-9);

    // releasing the second VM restores the full allocation of the first one
    scheduler.deallocate_pes(2);
    assert!((scheduler.total_allocated_mips(1) - 1600.).abs() < 1e-9);
    assert!((scheduler.available_mips() - 400.).abs() < 1e-9);
}

#[test]
fn test_time_shared_scheduler_migration_degradation() {
    let mut scheduler = VmSchedulerTimeShared::new(make_pes(1, 1000.));
    // migrating-out VM loses 10% of its allocation
    assert!(scheduler.allocate_pes(1, true, &[500.]));
    assert!((scheduler.total_allocated_mips(1) - 450.).abs() < 1e-9);

    // migrating-in VM receives only 10% on the destination host
    let mut destination = VmSchedulerTimeShared::new(make_pes(1, 1000.));
    destination.add_migrating_in(2);
    assert!(destination.allocate_pes(2, true, &[500.]));
    assert!((destination.total_allocated_mips(2) - 50.).abs() < 1e-9);
    assert!((destination.available_mips() - 950.).abs() < 1e-9);
}

#[test]
fn test_space_shared_scheduler_assigns_whole_pes() {
    let mut scheduler = VmSchedulerSpaceShared::new(make_pes(4, 1000.));
    // a 2500 MIPS virtual PE is split into 3 whole PEs
    assert!(scheduler.allocate_pes(1, false, &[2500.]));
    assert_eq!(scheduler.allocated_mips(1).len(), 3);
    assert!((scheduler.total_allocated_mips(1) - 2500.).abs() < 1e-9);

    // only one PE left, a two-PE request fails
    assert!(!scheduler.allocate_pes(2, false, &[1000., 1000.]));
    assert!(scheduler.allocated_mips(2).is_empty());
    assert!(scheduler.allocate_pes(3, false, &[700.]));
    assert!((scheduler.total_allocated_mips(3) - 700.).abs() < 1e-9);
}

#[test]
fn test_failed_pe_reduces_capacity() {
    let mut scheduler = VmSchedulerTimeShared::new(make_pes(2, 1000.));
    assert_eq!(scheduler.total_mips(), 2000.);
    scheduler.fail_pe(1);
    assert_eq!(scheduler.total_mips(), 1000.);
    assert!(scheduler.allocate_pes(1, false, &[800.]));
    assert!((scheduler.available_mips() - 200.).abs() < 1e-9);
}

#[test]
fn test_host_suitability_variants() {
    let mut registry = VmRegistry::new();
    let hosted = registry.register(Vm::new(1, 0, 500., 1, 512., 100., 100., dynamic_scheduler(500., 1)));
    let mut host = Host::new(
        0,
        "h",
        2048.,
        1000.,
        100000.,
        Box::new(VmSchedulerTimeShared::new(make_pes(1, 1000.))),
        None,
    );
    assert!(host.vm_create(&hosted));

    let big = registry.register(Vm::new(2, 0, 600., 1, 512., 100., 100., dynamic_scheduler(600., 1)));
    let small = registry.register(Vm::new(3, 0, 400., 1, 512., 100., 100., dynamic_scheduler(400., 1)));

    let strict = HostSuitability::new(false);
    let registry_ref = registry;
    assert!(!strict.is_suitable(&host, &big.borrow(), &registry_ref));
    // 1000 - 500 = 500 of nominal capacity left, a 400 MIPS VM fits
    assert!(strict.is_suitable(&host, &small.borrow(), &registry_ref));

    let oversub = HostSuitability::new(true);
    // the hosted VM is still being instantiated and demands its full 500 MIPS
    assert!(!oversub.is_suitable(&host, &big.borrow(), &registry_ref));
    assert!(oversub.is_suitable(&host, &small.borrow(), &registry_ref));
}

#[test]
fn test_power_models() {
    let linear = PowerModelLinear::new(250., 0.7);
    assert_eq!(linear.power(0.), 0.);
    assert_eq!(linear.power(1.), 250.);
    assert!((linear.power(0.5) - 212.5).abs() < 1e-9);
    // tolerated rounding overshoot
    assert_eq!(linear.power(1.005), 250.);

    let spec = PowerModelSpecPower::new([100., 160., 210., 250., 280., 300., 310., 315., 318., 319., 320.]);
    assert_eq!(spec.power(0.3), 250.);
    assert_eq!(spec.power(1.), 320.);
    assert!((spec.power(0.35) - 265.).abs() < 1e-9);
}

#[test]
fn test_energy_linear_interpolation() {
    let host = Host::new(
        0,
        "h",
        2048.,
        1000.,
        100000.,
        Box::new(VmSchedulerTimeShared::new(make_pes(1, 1000.))),
        Some(Box::new(PowerModelLinear::new(250., 0.7))),
    );
    // trapezoid between P(0.5) = 212.5 and P(1.0) = 250 over 10 seconds
    assert!((host.energy_linear_interpolation(0.5, 1., 10.) - 2312.5).abs() < 1e-9);
    assert_eq!(host.energy_linear_interpolation(0., 0., 10.), 0.);
}

#[test]
fn test_utilization_model_constant_bounds() {
    let model = UtilizationModelConstant::new(0.42);
    use greendc_cloud::core::utilization_model::UtilizationModel;
    assert_eq!(model.utilization(0.), 0.42);
    assert_eq!(model.utilization(1e6), 0.42);
}
