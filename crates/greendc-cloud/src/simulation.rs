//! Simulation configuration and execution. Library API.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use sugars::{rc, refcell};

use greendc_core::context::SimulationContext;
use greendc_core::simulation::Simulation;

use crate::core::broker::Broker;
use crate::core::cloudlet::Cloudlet;
use crate::core::config::SimulationConfig;
use crate::core::datacenter::{Datacenter, EnergyAccounting};
use crate::core::host::Host;
use crate::core::pe::make_pes;
use crate::core::power_model::PowerModel;
use crate::core::utilization_model::{UtilizationModel, UtilizationModelFull};
use crate::core::vm::Vm;
use crate::core::vm_allocation::VmAllocationPolicy;
use crate::core::vm_registry::VmRegistry;
use crate::core::vm_scheduler::{VmScheduler, VmSchedulerTimeShared};
use crate::extensions::dataset_reader::WorkloadReader;

/// Represents a simulation, provides methods for its configuration and execution.
pub struct CloudSimulation {
    sim: Simulation,
    registry: Rc<RefCell<VmRegistry>>,
    datacenters: BTreeMap<u32, Rc<RefCell<Datacenter>>>,
    brokers: BTreeMap<u32, Rc<RefCell<Broker>>>,
    host_counter: u32,
    cloudlet_counter: u32,
    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl CloudSimulation {
    /// Creates a simulation with specific config.
    pub fn new(mut sim: Simulation, sim_config: SimulationConfig) -> Self {
        sim.set_min_event_gap(sim_config.min_event_gap);
        if sim_config.simulation_limit > 0. {
            sim.terminate_at(sim_config.simulation_limit);
        }
        let ctx = sim.create_context("simulation");
        Self {
            sim,
            registry: rc!(refcell!(VmRegistry::new())),
            datacenters: BTreeMap::new(),
            brokers: BTreeMap::new(),
            host_counter: 0,
            cloudlet_counter: 0,
            ctx,
            sim_config: Rc::new(sim_config),
        }
    }

    /// Creates a new datacenter entity with the given placement policy. Returns its id.
    pub fn add_datacenter(
        &mut self,
        name: &str,
        vm_allocation_policy: Box<dyn VmAllocationPolicy>,
        energy_accounting: EnergyAccounting,
    ) -> u32 {
        let datacenter = rc!(refcell!(Datacenter::new(
            vm_allocation_policy,
            self.registry.clone(),
            energy_accounting,
            self.sim.create_context(name),
            self.sim_config.clone(),
        )));
        let id = self.sim.add_handler(name, datacenter.clone());
        self.datacenters.insert(id, datacenter);
        id
    }

    /// Creates a new host with homogeneous PEs and a time-shared VM scheduler,
    /// adds it to the datacenter. Returns the host id.
    #[allow(clippy::too_many_arguments)]
    pub fn add_host(
        &mut self,
        datacenter_id: u32,
        name: &str,
        pe_count: u32,
        pe_mips: f64,
        ram: f64,
        bw: f64,
        storage: f64,
        power_model: Option<Box<dyn PowerModel>>,
    ) -> u32 {
        let scheduler = Box::new(VmSchedulerTimeShared::new(make_pes(pe_count, pe_mips)));
        self.add_host_with_scheduler(datacenter_id, name, ram, bw, storage, scheduler, power_model)
    }

    /// Creates a new host with a custom VM scheduler, adds it to the datacenter.
    pub fn add_host_with_scheduler(
        &mut self,
        datacenter_id: u32,
        name: &str,
        ram: f64,
        bw: f64,
        storage: f64,
        vm_scheduler: Box<dyn VmScheduler>,
        power_model: Option<Box<dyn PowerModel>>,
    ) -> u32 {
        let id = self.host_counter;
        self.host_counter += 1;
        let host = Host::new(id, name, ram, bw, storage, vm_scheduler, power_model);
        self.datacenters
            .get(&datacenter_id)
            .unwrap_or_else(|| panic!("Unknown datacenter {}", datacenter_id))
            .borrow_mut()
            .add_host(host);
        id
    }

    /// Creates a new broker entity working with the given datacenter. Returns its id.
    pub fn add_broker(&mut self, name: &str, datacenter_id: u32) -> u32 {
        let broker = rc!(refcell!(Broker::new(
            datacenter_id,
            self.registry.clone(),
            self.sim.create_context(name),
        )));
        let id = self.sim.add_handler(name, broker.clone());
        self.brokers.insert(id, broker);
        id
    }

    /// Registers a VM owned by the broker; its creation is requested when the simulation
    /// starts. Returns the VM id.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_vm(
        &mut self,
        broker_id: u32,
        mips: f64,
        pe_count: u32,
        ram: f64,
        bw: f64,
        size: f64,
        cloudlet_scheduler: Box<dyn crate::core::cloudlet_scheduler::CloudletScheduler>,
    ) -> u32 {
        let id = self.registry.borrow_mut().generate_vm_id();
        let vm = Vm::new(id, broker_id, mips, pe_count, ram, bw, size, cloudlet_scheduler);
        self.registry.borrow_mut().register(vm);
        self.brokers
            .get(&broker_id)
            .unwrap_or_else(|| panic!("Unknown broker {}", broker_id))
            .borrow_mut()
            .add_vm(id);
        id
    }

    /// Queues a cloudlet on the broker, optionally bound to a specific VM.
    /// Returns the cloudlet id.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_cloudlet(
        &mut self,
        broker_id: u32,
        length: f64,
        pe_count: u32,
        file_size: f64,
        output_size: f64,
        utilization_model: Box<dyn UtilizationModel>,
        earliest_time: f64,
        vm_id: Option<u32>,
    ) -> u32 {
        self.cloudlet_counter += 1;
        let id = self.cloudlet_counter;
        let cloudlet = Cloudlet::new(id, broker_id, length, pe_count, file_size, output_size, utilization_model);
        self.brokers
            .get(&broker_id)
            .unwrap_or_else(|| panic!("Unknown broker {}", broker_id))
            .borrow_mut()
            .add_cloudlet(cloudlet, earliest_time, vm_id);
        id
    }

    /// Queues a cloudlet per workload job, spread over the broker VMs round-robin.
    ///
    /// The job run time is converted into the cloudlet length with the given MIPS rating.
    pub fn submit_workload(&mut self, broker_id: u32, reader: &mut dyn WorkloadReader, rating: f64) -> usize {
        let mut count = 0;
        while let Some(job) = reader.next_job() {
            self.submit_cloudlet(
                broker_id,
                job.run_time * rating,
                job.pe_count,
                0.,
                0.,
                Box::new(UtilizationModelFull::new()),
                job.submit_time,
                None,
            );
            count += 1;
        }
        count
    }

    /// Runs the simulation to completion and returns the final simulation time.
    pub fn run(&mut self) -> f64 {
        self.sim.run()
    }

    /// Process N simulation steps.
    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    /// Process simulation for the given duration.
    pub fn step_for_duration(&mut self, time: f64) -> bool {
        self.sim.step_for_duration(time)
    }

    /// Get current simulation time.
    pub fn current_time(&self) -> f64 {
        self.sim.time()
    }

    /// Number of events processed yet.
    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    /// Get simulation context (to access current time from user code).
    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    /// Get reference to datacenter component.
    pub fn datacenter(&self, id: u32) -> Rc<RefCell<Datacenter>> {
        self.datacenters
            .get(&id)
            .unwrap_or_else(|| panic!("Unknown datacenter {}", id))
            .clone()
    }

    /// Get reference to broker component.
    pub fn broker(&self, id: u32) -> Rc<RefCell<Broker>> {
        self.brokers
            .get(&id)
            .unwrap_or_else(|| panic!("Unknown broker {}", id))
            .clone()
    }

    /// Get reference to VM registry.
    pub fn vm_registry(&self) -> Rc<RefCell<VmRegistry>> {
        self.registry.clone()
    }

    /// Get reference to VM.
    pub fn vm(&self, vm_id: u32) -> Rc<RefCell<Vm>> {
        self.registry.borrow().get(vm_id)
    }

    /// Get the host currently running the VM.
    pub fn vm_location(&self, vm_id: u32) -> Option<u32> {
        self.registry.borrow().get(vm_id).borrow().host_id()
    }

    /// Get simulation config.
    pub fn sim_config(&self) -> Rc<SimulationConfig> {
        self.sim_config.clone()
    }
}
