//! Kernel-facing datacenter entity.

use std::cell::RefCell;
use std::rc::Rc;

use greendc_core::cast;
use greendc_core::context::SimulationContext;
use greendc_core::event::Event;
use greendc_core::handler::EventHandler;
use greendc_core::{log_debug, log_info, log_trace, log_warn};

use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::config::SimulationConfig;
use crate::core::events::allocation::{VmCreateAck, VmCreateRequest, VmDestroyRequest, VmMigrate};
use crate::core::events::cloudlet::{CloudletReturn, CloudletSubmit};
use crate::core::events::datacenter::ProcessDatacenterEvents;
use crate::core::host::Host;
use crate::core::host_pool::HostPool;
use crate::core::vm_allocation::VmAllocationPolicy;
use crate::core::vm_registry::VmRegistry;

/// How the datacenter accounts the energy consumed by its hosts over a time frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum EnergyAccounting {
    /// Integral of the utilization-dependent power between the frame endpoints.
    PowerAware,
    /// Every host is charged its maximum power for the whole frame.
    MaxPower,
}

/// Simulation entity owning the hosts and the VM placement policy.
///
/// The datacenter processes VM lifecycle and cloudlet events, periodically re-evaluates the
/// placement through the policy, orchestrates live migrations and accumulates the energy
/// consumed by its hosts.
pub struct Datacenter {
    pub id: u32,
    hosts: HostPool,
    vm_allocation_policy: Box<dyn VmAllocationPolicy>,
    registry: Rc<RefCell<VmRegistry>>,
    energy_accounting: EnergyAccounting,
    last_process_time: f64,
    cloudlet_submitted: f64,
    migration_count: u32,
    energy_consumed: f64,
    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl Datacenter {
    pub fn new(
        vm_allocation_policy: Box<dyn VmAllocationPolicy>,
        registry: Rc<RefCell<VmRegistry>>,
        energy_accounting: EnergyAccounting,
        ctx: SimulationContext,
        sim_config: Rc<SimulationConfig>,
    ) -> Self {
        Self {
            id: ctx.id(),
            hosts: HostPool::new(),
            vm_allocation_policy,
            registry,
            energy_accounting,
            last_process_time: 0.,
            cloudlet_submitted: -1.,
            migration_count: 0,
            energy_consumed: 0.,
            ctx,
            sim_config,
        }
    }

    pub fn add_host(&mut self, host: Host) {
        self.hosts.add_host(host);
    }

    pub fn hosts(&self) -> &HostPool {
        &self.hosts
    }

    /// Total energy consumed by the hosts so far, in Watt-seconds.
    pub fn energy_consumed(&self) -> f64 {
        self.energy_consumed
    }

    pub fn migration_count(&self) -> u32 {
        self.migration_count
    }

    pub fn vm_allocation_policy(&self) -> &dyn VmAllocationPolicy {
        self.vm_allocation_policy.as_ref()
    }

    fn on_vm_create(&mut self, vm_id: u32, requester: u32) {
        let now = self.ctx.time();
        let vm_rc = self.registry.borrow().get(vm_id);
        let created = {
            let registry = self.registry.borrow();
            self.vm_allocation_policy.allocate_host_for_vm(&vm_rc, &mut self.hosts, &registry)
        };
        let host_id = self.vm_allocation_policy.host_of_vm(vm_id);
        if created {
            let host_id = host_id.unwrap();
            log_debug!(self.ctx, "vm {} allocated on host {}", vm_id, host_id);
            let mut vm = vm_rc.borrow_mut();
            vm.set_being_instantiated(false);
            let share = self.hosts.get(host_id).allocated_mips_for_vm(vm_id);
            vm.update_processing(now, &share);
        } else {
            log_warn!(self.ctx, "not enough resources to create vm {}", vm_id);
        }
        self.ctx.emit(
            VmCreateAck {
                vm_id,
                host_id,
                created,
            },
            requester,
            0.,
        );
    }

    fn on_vm_destroy(&mut self, vm_id: u32) {
        log_debug!(self.ctx, "vm {} destroyed", vm_id);
        let registry = self.registry.borrow();
        self.vm_allocation_policy.deallocate_host_for_vm(vm_id, &mut self.hosts, &registry);
    }

    fn on_cloudlet_submit(&mut self, mut cloudlet: Cloudlet) {
        self.update_cloudlet_processing();
        let now = self.ctx.time();
        let Some(vm_id) = cloudlet.vm_id() else {
            log_warn!(self.ctx, "cloudlet {} is not bound to any vm, dropped", cloudlet.id);
            cloudlet.set_status(CloudletStatus::Failed);
            let owner = cloudlet.owner_id();
            self.ctx.emit(CloudletReturn { cloudlet }, owner, 0.);
            return;
        };
        let vm_rc = self.registry.borrow().get(vm_id);
        if vm_rc.borrow().host_id().is_none() {
            log_warn!(self.ctx, "cloudlet {}: vm {} is not hosted, dropped", cloudlet.id, vm_id);
            cloudlet.set_status(CloudletStatus::Failed);
            let owner = cloudlet.owner_id();
            self.ctx.emit(CloudletReturn { cloudlet }, owner, 0.);
            return;
        }
        log_debug!(self.ctx, "cloudlet {} submitted to vm {}", cloudlet.id, vm_id);
        cloudlet.set_submission_time(now);
        let estimate = vm_rc.borrow_mut().submit_cloudlet(cloudlet, now);
        if estimate.is_finite() && estimate > 0. {
            self.ctx.emit_self(ProcessDatacenterEvents {}, estimate);
        }
        self.check_cloudlet_completion();
        self.cloudlet_submitted = now;
    }

    fn on_vm_migrate(&mut self, vm_id: u32, target_host: u32) {
        let now = self.ctx.time();
        // account the energy of the frame that ends with this migration
        if now > self.last_process_time {
            self.update_cloudlet_processing_force();
        }
        let vm_rc = self.registry.borrow().get(vm_id);
        {
            let registry = self.registry.borrow();
            self.vm_allocation_policy.deallocate_host_for_vm(vm_id, &mut self.hosts, &registry);
        }
        self.hosts.get_mut(target_host).remove_migrating_in_vm(&vm_rc);
        let allocated = {
            let registry = self.registry.borrow();
            self.vm_allocation_policy
                .allocate_vm_on_host(&vm_rc, target_host, &mut self.hosts, &registry)
        };
        if !allocated {
            panic!(
                "Bookkeeping inconsistency: migration of vm {} to host {} failed",
                vm_id, target_host
            );
        }
        vm_rc.borrow_mut().set_in_migration(false);
        log_info!(self.ctx, "migration of vm {} to host {} completed at {:.2}", vm_id, target_host, now);
        // refresh the host bookkeeping, unless another migration completion is parked for
        // this very moment and will do it anyway
        if !self.ctx.has_deferred(|e| e.data.is::<VmMigrate>()) {
            self.update_cloudlet_processing_force();
        }
    }

    /// The periodic processing tick.
    ///
    /// While no cloudlet was ever submitted (or one was submitted at the current clock), the
    /// tick is simply rescheduled. Otherwise the hosts are updated, completions collected,
    /// the placement policy consulted for migrations and the energy accounted.
    fn update_cloudlet_processing(&mut self) {
        let now = self.ctx.time();
        if self.cloudlet_submitted < 0. || self.cloudlet_submitted == now {
            let id = self.ctx.id();
            self.ctx
                .cancel_events(|e| e.src == id && e.dest == id && e.data.is::<ProcessDatacenterEvents>());
            self.ctx
                .emit_self(ProcessDatacenterEvents {}, self.sim_config.scheduling_interval);
            return;
        }
        if now <= self.last_process_time {
            return;
        }
        let min_time = self.update_cloudlet_processing_force();

        if !self.sim_config.disable_migrations {
            let migration_map = {
                let registry = self.registry.borrow();
                self.vm_allocation_policy
                    .optimize_allocation(&mut self.hosts, &registry, now)
            };
            for decision in migration_map {
                let vm_rc = self.registry.borrow().get(decision.vm_id);
                {
                    let registry = self.registry.borrow();
                    self.hosts
                        .get_mut(decision.target_host)
                        .add_migrating_in_vm(&vm_rc, now, &registry);
                    // the source keeps running the VM with degraded performance
                    self.hosts
                        .get_mut(decision.source_host)
                        .update_vms_processing(now, &registry);
                }
                self.migration_count += 1;
                let ram = vm_rc.borrow().ram();
                let target_bw = self.hosts.get(decision.target_host).bw_capacity();
                // half of the host bandwidth is available for the live migration
                let delay = ram / (target_bw / (2. * 8.));
                log_info!(
                    self.ctx,
                    "migration of vm {} from host {} to host {} started, expected duration {:.2}",
                    decision.vm_id,
                    decision.source_host,
                    decision.target_host,
                    delay
                );
                self.ctx.emit_self(
                    VmMigrate {
                        vm_id: decision.vm_id,
                        target_host: decision.target_host,
                    },
                    delay,
                );
            }
        }

        if min_time.is_finite() {
            let id = self.ctx.id();
            self.ctx
                .cancel_events(|e| e.src == id && e.dest == id && e.data.is::<ProcessDatacenterEvents>());
            let delay = (min_time - now)
                .max(self.sim_config.min_event_gap)
                .min(self.sim_config.scheduling_interval);
            self.ctx.emit_self(ProcessDatacenterEvents {}, delay);
        }
        self.last_process_time = now;
    }

    /// Updates every host, accounts the frame energy, collects cloudlet completions and
    /// deallocates the VMs that have no more work. Returns the earliest next completion.
    fn update_cloudlet_processing_force(&mut self) -> f64 {
        let now = self.ctx.time();
        let time_diff = now - self.last_process_time;
        let mut min_time = f64::INFINITY;
        let mut frame_energy = 0.;
        {
            let registry = self.registry.borrow();
            for host_id in self.hosts.ids() {
                let host = self.hosts.get_mut(host_id);
                let time = host.update_vms_processing(now, &registry);
                if time < min_time {
                    min_time = time;
                }
                if time_diff > 0. {
                    frame_energy += match self.energy_accounting {
                        EnergyAccounting::PowerAware => host.energy_linear_interpolation(
                            host.previous_utilization_of_cpu(),
                            host.utilization_of_cpu(),
                            time_diff,
                        ),
                        EnergyAccounting::MaxPower => host.max_power() * time_diff,
                    };
                }
            }
        }
        if time_diff > 0. {
            log_trace!(self.ctx, "energy consumed in the last time frame: {:.2} Ws", frame_energy);
        }
        self.energy_consumed += frame_energy;

        self.check_cloudlet_completion();

        let completed: Vec<u32> = {
            let registry = self.registry.borrow();
            self.hosts
                .ids()
                .into_iter()
                .flat_map(|host_id| self.hosts.get(host_id).completed_vms(&registry))
                .collect()
        };
        for vm_id in completed {
            log_debug!(self.ctx, "vm {} has no more work, deallocated", vm_id);
            let registry = self.registry.borrow();
            self.vm_allocation_policy.deallocate_host_for_vm(vm_id, &mut self.hosts, &registry);
        }
        self.last_process_time = now;
        min_time
    }

    /// Returns completed cloudlets to their owners.
    fn check_cloudlet_completion(&mut self) {
        let mut returns: Vec<(u32, Cloudlet)> = Vec::new();
        {
            let registry = self.registry.borrow();
            for host_id in self.hosts.ids() {
                let host = self.hosts.get(host_id);
                for &vm_id in host.vm_ids() {
                    let vm_rc = registry.get(vm_id);
                    let mut vm = vm_rc.borrow_mut();
                    for cloudlet in vm.take_finished_cloudlets() {
                        returns.push((cloudlet.owner_id(), cloudlet));
                    }
                }
            }
        }
        for (owner, cloudlet) in returns {
            log_info!(
                self.ctx,
                "cloudlet {} completed at {:.2}",
                cloudlet.id,
                cloudlet.finish_time()
            );
            self.ctx.emit(CloudletReturn { cloudlet }, owner, 0.);
        }
    }

    /// Final energy accounting over the tail frame `[last_process_time, now]`.
    fn finalize_energy(&mut self) {
        let now = self.ctx.time();
        let time_diff = now - self.last_process_time;
        if time_diff <= 0. {
            return;
        }
        let registry = self.registry.borrow();
        let mut frame_energy = 0.;
        for host_id in self.hosts.ids() {
            let host = self.hosts.get_mut(host_id);
            host.update_vms_processing(now, &registry);
            frame_energy += match self.energy_accounting {
                EnergyAccounting::PowerAware => host.energy_linear_interpolation(
                    host.previous_utilization_of_cpu(),
                    host.utilization_of_cpu(),
                    time_diff,
                ),
                EnergyAccounting::MaxPower => host.max_power() * time_diff,
            };
        }
        drop(registry);
        self.energy_consumed += frame_energy;
        self.last_process_time = now;
    }
}

impl EventHandler for Datacenter {
    fn on_start(&mut self) {
        log_info!(self.ctx, "datacenter with {} hosts started", self.hosts.len());
        self.ctx
            .emit_self(ProcessDatacenterEvents {}, self.sim_config.scheduling_interval);
    }

    fn on(&mut self, event: Event) {
        cast!(match event.data {
            VmCreateRequest { vm_id } => {
                self.on_vm_create(vm_id, event.src);
            }
            VmDestroyRequest { vm_id } => {
                self.on_vm_destroy(vm_id);
            }
            CloudletSubmit { cloudlet } => {
                self.on_cloudlet_submit(cloudlet);
            }
            VmMigrate { vm_id, target_host } => {
                self.on_vm_migrate(vm_id, target_host);
            }
            ProcessDatacenterEvents {} => {
                self.update_cloudlet_processing();
            }
        })
    }

    fn on_shutdown(&mut self) {
        self.finalize_energy();
        log_info!(
            self.ctx,
            "datacenter finished: energy consumed {:.2} Ws, {} migrations",
            self.energy_consumed,
            self.migration_count
        );
    }
}
