use greendc_core::simulation::Simulation;

use greendc_cloud::core::cloudlet_scheduler::CloudletSchedulerDynamic;
use greendc_cloud::core::config::SimulationConfig;
use greendc_cloud::core::datacenter::EnergyAccounting;
use greendc_cloud::core::host::Host;
use greendc_cloud::core::host_pool::HostPool;
use greendc_cloud::core::overload_detection::StaticThresholdDetector;
use greendc_cloud::core::pe::make_pes;
use greendc_cloud::core::power_model::{PowerModelLinear, PowerModelSpecPower};
use greendc_cloud::core::utilization_model::UtilizationModelConstant;
use greendc_cloud::core::vm::Vm;
use greendc_cloud::core::vm_allocation::VmAllocationPolicy;
use greendc_cloud::core::vm_consolidation::PowerVmAllocationMigration;
use greendc_cloud::core::vm_registry::VmRegistry;
use greendc_cloud::core::vm_scheduler::VmSchedulerTimeShared;
use greendc_cloud::core::vm_selection::MinimumMigrationTimePolicy;
use greendc_cloud::simulation::CloudSimulation;

fn dynamic_scheduler(mips: f64, pe_count: u32) -> Box<CloudletSchedulerDynamic> {
    Box::new(CloudletSchedulerDynamic::new(mips, pe_count))
}

fn migration_policy(threshold: f64) -> Box<PowerVmAllocationMigration> {
    Box::new(PowerVmAllocationMigration::new(
        true,
        Box::new(StaticThresholdDetector::new(threshold)),
        Box::new(MinimumMigrationTimePolicy::new()),
    ))
}

#[test]
// An overloaded host triggers exactly one migration, and the live migration of a VM with
// 1000 units of RAM to a host with 1000 units of bandwidth takes 1000 / (1000 / 16) = 16
// seconds of simulation time.
fn test_overload_triggers_single_migration_with_expected_duration() {
    let sim = Simulation::new(123);
    let mut cloud_sim = CloudSimulation::new(sim, SimulationConfig::new());

    let dc = cloud_sim.add_datacenter("dc", migration_policy(0.8), EnergyAccounting::PowerAware);
    // the cheaper small host attracts the initial placement, the big one stays empty
    let h0 = cloud_sim.add_host(dc, "h0", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(100., 0.7))));
    let h1 = cloud_sim.add_host(dc, "h1", 1, 2000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(300., 0.7))));
    let broker = cloud_sim.add_broker("broker", dc);

    let vm = cloud_sim.spawn_vm(broker, 900., 1, 1000., 100., 100., dynamic_scheduler(900., 1));
    cloud_sim.submit_cloudlet(
        broker,
        1e12,
        1,
        0.,
        0.,
        Box::new(UtilizationModelConstant::new(0.95)),
        0.,
        Some(vm),
    );

    // the first consolidation pass happens at the first scheduling tick (~300)
    cloud_sim.step_for_duration(316.);
    let datacenter = cloud_sim.datacenter(dc);
    assert_eq!(datacenter.borrow().migration_count(), 1);
    {
        let dc_ref = datacenter.borrow();
        assert!(cloud_sim.vm(vm).borrow().is_in_migration());
        // during the migration window the VM stays on the source host and is also present
        // on the destination through its migrating-in set
        assert!(dc_ref.hosts().get(h0).has_vm(vm));
        assert!(dc_ref.hosts().get(h1).has_vm(vm));
        assert!(dc_ref.hosts().get(h1).is_migrating_in_vm(vm));
    }

    // 15.9 more seconds are still within the 16-second migration window
    cloud_sim.step_for_duration(15.9);
    assert!(cloud_sim.vm(vm).borrow().is_in_migration());

    // and 0.2 seconds later the migration has completed
    cloud_sim.step_for_duration(0.2);
    assert!(!cloud_sim.vm(vm).borrow().is_in_migration());
    assert_eq!(cloud_sim.vm_location(vm), Some(h1));
    {
        let dc_ref = datacenter.borrow();
        assert_eq!(dc_ref.hosts().get(h0).vm_count(), 0);
        assert!(dc_ref.hosts().get(h1).has_vm(vm));
        assert!(!dc_ref.hosts().get(h1).is_migrating_in_vm(vm));
    }

    // the placement stays stable afterwards
    cloud_sim.step_for_duration(1700.);
    assert_eq!(datacenter.borrow().migration_count(), 1);
}

#[test]
// The minimum-migration-time policy picks the VM with the smallest RAM as the victim.
fn test_victim_selection_prefers_smallest_ram() {
    let sim = Simulation::new(123);
    let mut cloud_sim = CloudSimulation::new(sim, SimulationConfig::new());

    let dc = cloud_sim.add_datacenter("dc", migration_policy(0.8), EnergyAccounting::PowerAware);
    let h0 = cloud_sim.add_host(dc, "h0", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(250., 0.7))));
    let h1 = cloud_sim.add_host(dc, "h1", 1, 1000., 4096., 1000., 100000., Some(Box::new(PowerModelLinear::new(250., 0.7))));
    let broker = cloud_sim.add_broker("broker", dc);

    let vm_big = cloud_sim.spawn_vm(broker, 500., 1, 1024., 100., 100., dynamic_scheduler(500., 1));
    let vm_small = cloud_sim.spawn_vm(broker, 450., 1, 512., 100., 100., dynamic_scheduler(450., 1));
    cloud_sim.submit_cloudlet(broker, 1e12, 1, 0., 0., Box::new(UtilizationModelConstant::new(1.)), 0., Some(vm_big));
    cloud_sim.submit_cloudlet(broker, 1e12, 1, 0., 0., Box::new(UtilizationModelConstant::new(1.)), 0., Some(vm_small));

    cloud_sim.step_for_duration(1000.);

    let datacenter = cloud_sim.datacenter(dc);
    assert_eq!(datacenter.borrow().migration_count(), 1);
    assert_eq!(cloud_sim.vm_location(vm_big), Some(h0));
    assert_eq!(cloud_sim.vm_location(vm_small), Some(h1));
}

fn run_consolidation_scenario(seed: u64) -> (u32, u64, Vec<Option<u32>>) {
    let sim = Simulation::new(seed);
    let mut config = SimulationConfig::new();
    config.simulation_limit = 2000.;
    let mut cloud_sim = CloudSimulation::new(sim, config);

    let spec_power = [100., 160., 210., 250., 280., 300., 310., 315., 318., 319., 320.];
    let dc = cloud_sim.add_datacenter("dc", migration_policy(0.8), EnergyAccounting::PowerAware);
    for i in 0..3 {
        cloud_sim.add_host(
            dc,
            &format!("h{}", i),
            1,
            1000.,
            4096.,
            1000.,
            100000.,
            Some(Box::new(PowerModelSpecPower::new(spec_power))),
        );
    }
    let broker = cloud_sim.add_broker("broker", dc);

    let mut vms = Vec::new();
    for utilization in [0.1, 0.2, 0.3] {
        let vm = cloud_sim.spawn_vm(broker, 1000., 1, 512., 100., 100., dynamic_scheduler(1000., 1));
        cloud_sim.submit_cloudlet(
            broker,
            1e12,
            1,
            0.,
            0.,
            Box::new(UtilizationModelConstant::new(utilization)),
            0.,
            Some(vm),
        );
        vms.push(vm);
    }

    cloud_sim.run();

    let datacenter = cloud_sim.datacenter(dc);
    let migrations = datacenter.borrow().migration_count();
    let energy_bits = datacenter.borrow().energy_consumed().to_bits();
    let locations = vms.iter().map(|&vm| cloud_sim.vm_location(vm)).collect();
    (migrations, energy_bits, locations)
}

#[test]
// Consolidation empties the two least loaded hosts: the 10% and 20% VMs land on the host of
// the 30% VM, because the piecewise power model makes the marginal power cheapest there.
fn test_consolidation_empties_underutilized_hosts() {
    let (migrations, _, locations) = run_consolidation_scenario(123);
    assert_eq!(migrations, 2);
    assert_eq!(locations, vec![Some(2), Some(2), Some(2)]);
}

#[test]
// Given the same seed and inputs, the placement decisions and the accumulated energy are
// bitwise identical across runs.
fn test_placement_is_deterministic() {
    let first = run_consolidation_scenario(42);
    let second = run_consolidation_scenario(42);
    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
    assert_eq!(first.2, second.2);
}

fn test_host(id: u32) -> Host {
    Host::new(
        id,
        &format!("h{}", id),
        4096.,
        1000.,
        100000.,
        Box::new(VmSchedulerTimeShared::new(make_pes(2, 1000.))),
        Some(Box::new(PowerModelLinear::new(250., 0.7))),
    )
}

#[test]
// Saving the allocation and restoring it after arbitrary speculative changes brings every
// host VM list back to the snapshot.
fn test_restore_allocation_is_idempotent() {
    let mut registry = VmRegistry::new();
    let mut pool = HostPool::new();
    pool.add_host(test_host(0));
    pool.add_host(test_host(1));

    let mut policy = PowerVmAllocationMigration::new(
        true,
        Box::new(StaticThresholdDetector::new(0.8)),
        Box::new(MinimumMigrationTimePolicy::new()),
    );

    let vm1 = registry.register(Vm::new(1, 0, 500., 1, 512., 100., 100., dynamic_scheduler(500., 1)));
    let vm2 = registry.register(Vm::new(2, 0, 500., 1, 512., 100., 100., dynamic_scheduler(500., 1)));
    let vm3 = registry.register(Vm::new(3, 0, 500., 1, 512., 100., 100., dynamic_scheduler(500., 1)));
    assert!(policy.allocate_vm_on_host(&vm1, 0, &mut pool, &registry));
    assert!(policy.allocate_vm_on_host(&vm2, 0, &mut pool, &registry));
    assert!(policy.allocate_vm_on_host(&vm3, 1, &mut pool, &registry));

    policy.save_allocation(&pool);

    // scramble the placement
    pool.get_mut(0).vm_destroy(&vm1);
    pool.get_mut(1).vm_create(&vm1);
    pool.get_mut(1).vm_destroy(&vm3);
    assert_eq!(pool.get(0).vm_ids(), &[2]);
    assert_eq!(pool.get(1).vm_ids(), &[1]);

    policy.restore_allocation(&mut pool, &registry);

    assert_eq!(pool.get(0).vm_ids(), &[1, 2]);
    assert_eq!(pool.get(1).vm_ids(), &[3]);
    assert_eq!(vm1.borrow().host_id(), Some(0));
    assert_eq!(vm2.borrow().host_id(), Some(0));
    assert_eq!(vm3.borrow().host_id(), Some(1));
}
