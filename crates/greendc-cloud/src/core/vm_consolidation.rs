//! Migration-based consolidation policy.
//!
//! Once per scheduling interval the policy detects overloaded hosts, selects victim VMs
//! until the hosts stop being overloaded, finds new hosts for the victims minimizing the
//! marginal power increase, evacuates under-utilized hosts, and returns the resulting
//! migration map to the datacenter. All placement search is performed speculatively on the
//! real host objects and the original allocation is restored before returning.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use crate::core::host::Host;
use crate::core::host_pool::HostPool;
use crate::core::overload_detection::OverloadDetector;
use crate::core::suitability::HostSuitability;
use crate::core::vm::Vm;
use crate::core::vm_allocation::{power_after_allocation, MigrationDecision, VmAllocationPolicy};
use crate::core::vm_registry::VmRegistry;
use crate::core::vm_selection::VmSelectionPolicy;

fn all_vms_migrating_out_or_any_migrating_in(host: &Host, registry: &VmRegistry) -> bool {
    for &vm_id in host.vm_ids() {
        if !registry.get(vm_id).borrow().is_in_migration() {
            // at least one VM is not migrating anywhere
            return false;
        }
        if host.is_migrating_in_vm(vm_id) {
            return true;
        }
    }
    true
}

pub struct PowerVmAllocationMigration {
    suitability: HostSuitability,
    overload_detector: Box<dyn OverloadDetector>,
    vm_selection: Box<dyn VmSelectionPolicy>,
    vm_table: HashMap<u32, u32>,
    saved_allocation: Vec<(u32, u32)>,
    // per-host time series recorded at each optimization pass
    utilization_history: HashMap<u32, Vec<f64>>,
    metric_history: HashMap<u32, Vec<f64>>,
    time_history: HashMap<u32, Vec<f64>>,
    // wall-clock instrumentation of the optimization stages
    execution_time_host_selection: Vec<f64>,
    execution_time_vm_selection: Vec<f64>,
    execution_time_vm_reallocation: Vec<f64>,
    execution_time_total: Vec<f64>,
}

impl PowerVmAllocationMigration {
    pub fn new(
        oversubscribe: bool,
        overload_detector: Box<dyn OverloadDetector>,
        vm_selection: Box<dyn VmSelectionPolicy>,
    ) -> Self {
        Self {
            suitability: HostSuitability::new(oversubscribe),
            overload_detector,
            vm_selection,
            vm_table: HashMap::new(),
            saved_allocation: Vec::new(),
            utilization_history: HashMap::new(),
            metric_history: HashMap::new(),
            time_history: HashMap::new(),
            execution_time_host_selection: Vec::new(),
            execution_time_vm_selection: Vec::new(),
            execution_time_vm_reallocation: Vec::new(),
            execution_time_total: Vec::new(),
        }
    }

    pub fn utilization_history(&self) -> &HashMap<u32, Vec<f64>> {
        &self.utilization_history
    }

    pub fn metric_history(&self) -> &HashMap<u32, Vec<f64>> {
        &self.metric_history
    }

    pub fn time_history(&self) -> &HashMap<u32, Vec<f64>> {
        &self.time_history
    }

    pub fn execution_time_total(&self) -> &[f64] {
        &self.execution_time_total
    }

    fn record_host_history(&mut self, pool: &HostPool, registry: &VmRegistry, now: f64) {
        for host_id in pool.ids() {
            let times = self.time_history.entry(host_id).or_default();
            if times.last() == Some(&now) {
                continue;
            }
            times.push(now);
            let host = pool.get(host_id);
            self.utilization_history
                .entry(host_id)
                .or_default()
                .push(host.utilization_of_cpu());
            self.metric_history
                .entry(host_id)
                .or_default()
                .push(self.overload_detector.utilization_metric(host, registry, now));
        }
    }

    /// Remembers the current VM placement, excluding VMs that are migrating in.
    pub fn save_allocation(&mut self, pool: &HostPool) {
        self.saved_allocation.clear();
        for host_id in pool.ids() {
            let host = pool.get(host_id);
            for &vm_id in host.vm_ids() {
                if host.is_migrating_in_vm(vm_id) {
                    continue;
                }
                self.saved_allocation.push((vm_id, host_id));
            }
        }
    }

    /// Re-creates the remembered placement on the hosts.
    ///
    /// A failure to recreate a VM here means the speculative search corrupted the host
    /// bookkeeping, which is a bug, so it is fatal.
    pub fn restore_allocation(&mut self, pool: &mut HostPool, registry: &VmRegistry) {
        for host_id in pool.ids() {
            pool.get_mut(host_id).vm_destroy_all(registry);
            pool.get_mut(host_id).reallocate_migrating_in_vms(registry);
        }
        let saved = self.saved_allocation.clone();
        for (vm_id, host_id) in saved {
            let vm_rc = registry.get(vm_id);
            if !pool.get_mut(host_id).vm_create(&vm_rc) {
                panic!(
                    "Bookkeeping inconsistency: could not restore vm {} on host {}",
                    vm_id, host_id
                );
            }
            self.vm_table.insert(vm_id, host_id);
        }
    }

    /// Repeatedly picks victims from each overloaded host until it stops being overloaded.
    /// The victims are speculatively removed from their hosts.
    fn vms_to_migrate_from_overloaded(
        &mut self,
        overloaded: &[u32],
        pool: &mut HostPool,
        registry: &VmRegistry,
        now: f64,
    ) -> Vec<u32> {
        let mut victims = Vec::new();
        for &host_id in overloaded {
            loop {
                let selected = self.vm_selection.select_vm_to_migrate(pool.get(host_id), registry, now);
                let Some(vm_id) = selected else { break };
                victims.push(vm_id);
                let vm_rc = registry.get(vm_id);
                pool.get_mut(host_id).vm_destroy(&vm_rc);
                if !self.overload_detector.is_host_overloaded(pool.get(host_id), registry, now) {
                    break;
                }
            }
        }
        victims
    }

    /// All movable VMs of an under-utilized host.
    fn vms_to_migrate_from_underloaded(&self, host: &Host, registry: &VmRegistry) -> Vec<u32> {
        host.vm_ids()
            .iter()
            .filter(|&&vm_id| {
                !registry.get(vm_id).borrow().is_in_migration() && !host.is_migrating_in_vm(vm_id)
            })
            .cloned()
            .collect()
    }

    fn is_host_overloaded_after_allocation(
        &self,
        host_id: u32,
        vm_rc: &Rc<RefCell<Vm>>,
        pool: &mut HostPool,
        registry: &VmRegistry,
        now: f64,
    ) -> bool {
        if !pool.get_mut(host_id).vm_create(vm_rc) {
            return true;
        }
        let overloaded = self.overload_detector.is_host_overloaded(pool.get(host_id), registry, now);
        pool.get_mut(host_id).vm_destroy(vm_rc);
        overloaded
    }

    /// Searches the host with the minimum marginal power increase that can take the VM
    /// without getting overloaded.
    fn find_host_for_vm(
        &self,
        vm_id: u32,
        excluded: &HashSet<u32>,
        pool: &mut HostPool,
        registry: &VmRegistry,
        now: f64,
    ) -> Option<u32> {
        let vm_rc = registry.get(vm_id);
        let mut min_power_diff = f64::MAX;
        let mut best = None;
        for host_id in pool.ids() {
            if excluded.contains(&host_id) {
                continue;
            }
            {
                let host = pool.get(host_id);
                let vm = vm_rc.borrow();
                if !self.suitability.is_suitable(host, &vm, registry) {
                    continue;
                }
            }
            if pool.get(host_id).utilization_of_cpu_mips() != 0.
                && self.is_host_overloaded_after_allocation(host_id, &vm_rc, pool, registry, now)
            {
                continue;
            }
            let host = pool.get(host_id);
            let power_diff = power_after_allocation(host, &vm_rc.borrow()) - host.power();
            if power_diff < min_power_diff {
                min_power_diff = power_diff;
                best = Some(host_id);
            }
        }
        best
    }

    /// Sorts the VMs by descending CPU demand (stable).
    fn sort_by_cpu_utilization(vms: &mut Vec<u32>, registry: &VmRegistry, now: f64) {
        let mut keyed: Vec<(u32, f64)> = vms
            .iter()
            .map(|&vm_id| {
                let mips = registry.get(vm_id).borrow().total_utilization_of_cpu_mips(now);
                (vm_id, mips)
            })
            .collect();
        keyed.sort_by(|a, b| b.1.total_cmp(&a.1));
        *vms = keyed.into_iter().map(|(vm_id, _)| vm_id).collect();
    }

    /// Places the victims of overloaded hosts, speculatively creating them on the chosen
    /// hosts. Victims that cannot be placed simply stay where they were.
    fn new_vm_placement(
        &mut self,
        mut victims: Vec<u32>,
        excluded: &HashSet<u32>,
        pool: &mut HostPool,
        registry: &VmRegistry,
        now: f64,
    ) -> Vec<MigrationDecision> {
        let mut migration_map = Vec::new();
        Self::sort_by_cpu_utilization(&mut victims, registry, now);
        for vm_id in victims {
            if let Some(target) = self.find_host_for_vm(vm_id, excluded, pool, registry, now) {
                let vm_rc = registry.get(vm_id);
                pool.get_mut(target).vm_create(&vm_rc);
                let source = self.vm_table[&vm_id];
                log::debug!("vm {} reallocated from host {} to host {}", vm_id, source, target);
                migration_map.push(MigrationDecision {
                    vm_id,
                    source_host: source,
                    target_host: target,
                });
            }
        }
        migration_map
    }

    /// Places all VMs of an under-utilized host, or none: a single placement failure rolls
    /// back everything placed from this host.
    fn new_vm_placement_from_underloaded(
        &mut self,
        mut vms: Vec<u32>,
        excluded: &HashSet<u32>,
        pool: &mut HostPool,
        registry: &VmRegistry,
        now: f64,
    ) -> Vec<MigrationDecision> {
        let mut migration_map: Vec<MigrationDecision> = Vec::new();
        Self::sort_by_cpu_utilization(&mut vms, registry, now);
        for vm_id in vms {
            match self.find_host_for_vm(vm_id, excluded, pool, registry, now) {
                Some(target) => {
                    let vm_rc = registry.get(vm_id);
                    pool.get_mut(target).vm_create(&vm_rc);
                    let source = self.vm_table[&vm_id];
                    migration_map.push(MigrationDecision {
                        vm_id,
                        source_host: source,
                        target_host: target,
                    });
                }
                None => {
                    log::debug!("not all vms can be reallocated from the host, reallocation cancelled");
                    for decision in &migration_map {
                        let vm_rc = registry.get(decision.vm_id);
                        pool.get_mut(decision.target_host).vm_destroy(&vm_rc);
                    }
                    migration_map.clear();
                    break;
                }
            }
        }
        migration_map
    }

    /// The under-utilized host with the minimum non-zero utilization, skipping hosts whose
    /// VMs are all migrating out or that have a VM migrating in.
    fn find_underutilized_host(
        &self,
        excluded: &HashSet<u32>,
        pool: &HostPool,
        registry: &VmRegistry,
    ) -> Option<u32> {
        let mut min_utilization = 1.;
        let mut result = None;
        for host_id in pool.ids() {
            if excluded.contains(&host_id) {
                continue;
            }
            let host = pool.get(host_id);
            let utilization = host.utilization_of_cpu();
            if utilization > 0.
                && utilization < min_utilization
                && !all_vms_migrating_out_or_any_migrating_in(host, registry)
            {
                min_utilization = utilization;
                result = Some(host_id);
            }
        }
        result
    }

    /// Evacuates under-utilized hosts one by one until every host was examined.
    fn migrations_from_underloaded_hosts(
        &mut self,
        overloaded: &[u32],
        pool: &mut HostPool,
        registry: &VmRegistry,
        now: f64,
    ) -> Vec<MigrationDecision> {
        let mut migration_map = Vec::new();
        let switched_off: Vec<u32> = pool
            .ids()
            .into_iter()
            .filter(|&host_id| pool.get(host_id).is_switched_off())
            .collect();

        let mut excluded_for_underloaded: HashSet<u32> = overloaded.iter().cloned().collect();
        excluded_for_underloaded.extend(switched_off.iter().cloned());
        let mut excluded_for_placement: HashSet<u32> = overloaded.iter().cloned().collect();
        excluded_for_placement.extend(switched_off.iter().cloned());

        let host_count = pool.len();
        loop {
            if excluded_for_underloaded.len() >= host_count {
                break;
            }
            let Some(underloaded) = self.find_underutilized_host(&excluded_for_underloaded, pool, registry) else {
                break;
            };
            log::debug!("under-utilized host {} selected for evacuation", underloaded);
            excluded_for_underloaded.insert(underloaded);
            excluded_for_placement.insert(underloaded);

            let vms = self.vms_to_migrate_from_underloaded(pool.get(underloaded), registry);
            if vms.is_empty() {
                continue;
            }
            let placement = self.new_vm_placement_from_underloaded(vms, &excluded_for_placement, pool, registry, now);
            for decision in &placement {
                excluded_for_underloaded.insert(decision.target_host);
            }
            migration_map.extend(placement);
        }
        migration_map
    }
}

impl VmAllocationPolicy for PowerVmAllocationMigration {
    fn allocate_host_for_vm(&mut self, vm: &Rc<RefCell<Vm>>, pool: &mut HostPool, registry: &VmRegistry) -> bool {
        let vm_id = vm.borrow().id;
        match self.find_host_for_vm(vm_id, &HashSet::new(), pool, registry, 0.) {
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

    fn optimize_allocation(&mut self, pool: &mut HostPool, registry: &VmRegistry, now: f64) -> Vec<MigrationDecision> {
        let total_start = Instant::now();

        let host_selection_start = Instant::now();
        let overloaded: Vec<u32> = pool
            .ids()
            .into_iter()
            .filter(|&host_id| self.overload_detector.is_host_overloaded(pool.get(host_id), registry, now))
            .collect();
        self.execution_time_host_selection
            .push(host_selection_start.elapsed().as_secs_f64());
        self.record_host_history(pool, registry, now);
        if !overloaded.is_empty() {
            log::debug!("over-utilized hosts: {:?}", overloaded);
        }

        self.save_allocation(pool);

        let vm_selection_start = Instant::now();
        let victims = self.vms_to_migrate_from_overloaded(&overloaded, pool, registry, now);
        self.execution_time_vm_selection
            .push(vm_selection_start.elapsed().as_secs_f64());

        let reallocation_start = Instant::now();
        let excluded: HashSet<u32> = overloaded.iter().cloned().collect();
        let mut migration_map = self.new_vm_placement(victims, &excluded, pool, registry, now);
        self.execution_time_vm_reallocation
            .push(reallocation_start.elapsed().as_secs_f64());

        migration_map.extend(self.migrations_from_underloaded_hosts(&overloaded, pool, registry, now));
        self.restore_allocation(pool, registry);

        self.execution_time_total.push(total_start.elapsed().as_secs_f64());
        migration_map
    }
}
