//! VM-to-host allocation policies.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use greendc_core::EPSILON;

use crate::core::host::Host;
use crate::core::host_pool::HostPool;
use crate::core::suitability::HostSuitability;
use crate::core::vm::Vm;
use crate::core::vm_registry::VmRegistry;

/// A single VM relocation decided by the consolidation step.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationDecision {
    pub vm_id: u32,
    pub source_host: u32,
    pub target_host: u32,
}

/// Trait for implementation of VM placement policies.
///
/// The policy selects hosts for new VMs and keeps its own VM-to-host table. A consolidation
/// policy additionally proposes live migrations from its `optimize_allocation`, which is
/// invoked by the datacenter once per scheduling interval.
pub trait VmAllocationPolicy {
    /// Places the VM on a host chosen by the policy, returns whether it succeeded.
    fn allocate_host_for_vm(&mut self, vm: &Rc<RefCell<Vm>>, pool: &mut HostPool, registry: &VmRegistry) -> bool;

    /// Places the VM on the given host, returns whether it succeeded.
    fn allocate_vm_on_host(
        &mut self,
        vm: &Rc<RefCell<Vm>>,
        host_id: u32,
        pool: &mut HostPool,
        registry: &VmRegistry,
    ) -> bool;

    /// Removes the VM from its current host.
    fn deallocate_host_for_vm(&mut self, vm_id: u32, pool: &mut HostPool, registry: &VmRegistry);

    /// Returns the host currently assigned to the VM by this policy.
    fn host_of_vm(&self, vm_id: u32) -> Option<u32>;

    /// Proposes live migrations rebalancing the data center. The default policy never
    /// migrates anything.
    fn optimize_allocation(&mut self, _pool: &mut HostPool, _registry: &VmRegistry, _now: f64) -> Vec<MigrationDecision> {
        Vec::new()
    }
}

/// Marginal power increase caused by placing the VM on the host.
///
/// The utilization after allocation is estimated from the bookkept host utilization and the
/// current VM demand, as of the last processing update.
pub fn power_after_allocation(host: &Host, vm: &Vm) -> f64 {
    let requested = vm.current_requested_total_mips();
    let potential_utilization = (host.utilization_of_cpu_mips() + requested) / host.total_mips();
    host.power_at(potential_utilization.min(1.))
}

/// First-fit-by-power placement.
///
/// Hosts are examined in registration order and among the suitable ones the host with the
/// minimum marginal power increase wins; an empty host wins a power tie, otherwise the first
/// one encountered is kept. No consolidation is performed.
pub struct PowerVmAllocationSimple {
    suitability: HostSuitability,
    vm_table: HashMap<u32, u32>,
}

impl PowerVmAllocationSimple {
    pub fn new(oversubscribe: bool) -> Self {
        Self {
            suitability: HostSuitability::new(oversubscribe),
            vm_table: HashMap::new(),
        }
    }

    fn find_host_for_vm(&self, vm: &Rc<RefCell<Vm>>, pool: &HostPool, registry: &VmRegistry) -> Option<u32> {
        let vm_ref = vm.borrow();
        let mut best: Option<u32> = None;
        let mut best_power = f64::MAX;
        let mut best_is_empty = false;
        for (&host_id, host) in pool.iter() {
            if !self.suitability.is_suitable(host, &vm_ref, registry) {
                continue;
            }
            let power_diff = power_after_allocation(host, &vm_ref) - host.power();
            let is_empty = host.vm_count() == 0;
            let better = power_diff < best_power - EPSILON
                || ((power_diff - best_power).abs() <= EPSILON && is_empty && !best_is_empty);
            if better {
                best = Some(host_id);
                best_power = power_diff;
                best_is_empty = is_empty;
            }
        }
        best
    }
}

impl VmAllocationPolicy for PowerVmAllocationSimple {
    fn allocate_host_for_vm(&mut self, vm: &Rc<RefCell<Vm>>, pool: &mut HostPool, registry: &VmRegistry) -> bool {
        match self.find_host_for_vm(vm, pool, registry) {
            Some(host_id) => self.allocate_vm_on_host(vm, host_id, pool, registry),
            None => false,
        }
    }

    fn allocate_vm_on_host(
        &mut self,
        vm: &Rc<RefCell<Vm>>,
        host_id: u32,
        pool: &mut HostPool,
        _registry: &VmRegistry,
    ) -> bool {
        if pool.get_mut(host_id).vm_create(vm) {
            self.vm_table.insert(vm.borrow().id, host_id);
            true
        } else {
            false
        }
    }

    fn deallocate_host_for_vm(&mut self, vm_id: u32, pool: &mut HostPool, registry: &VmRegistry) {
        if let Some(host_id) = self.vm_table.remove(&vm_id) {
            let vm_rc = registry.get(vm_id);
            pool.get_mut(host_id).vm_destroy(&vm_rc);
        }
    }

    fn host_of_vm(&self, vm_id: u32) -> Option<u32> {
        self.vm_table.get(&vm_id).copied()
    }
}
