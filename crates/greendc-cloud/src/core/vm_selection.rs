//! Policies selecting the victim VM to migrate away from an overloaded host.

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::core::host::Host;
use crate::core::vm_registry::VmRegistry;

/// Selects a VM to migrate away from the given host.
///
/// Only movable VMs are considered: a VM already participating in a migration is never
/// selected.
pub trait VmSelectionPolicy {
    fn select_vm_to_migrate(&mut self, host: &Host, registry: &VmRegistry, now: f64) -> Option<u32>;
}

fn migratable_vms(host: &Host, registry: &VmRegistry) -> Vec<u32> {
    host.vm_ids()
        .iter()
        .filter(|&&vm_id| !registry.get(vm_id).borrow().is_in_migration())
        .cloned()
        .collect()
}

/// Picks the VM with the smallest RAM, i.e. the shortest migration time.
pub struct MinimumMigrationTimePolicy;

impl MinimumMigrationTimePolicy {
    pub fn new() -> Self {
        Self {}
    }
}

impl VmSelectionPolicy for MinimumMigrationTimePolicy {
    fn select_vm_to_migrate(&mut self, host: &Host, registry: &VmRegistry, _now: f64) -> Option<u32> {
        let mut result = None;
        let mut min_ram = f64::MAX;
        for vm_id in migratable_vms(host, registry) {
            let ram = registry.get(vm_id).borrow().ram();
            if ram < min_ram {
                min_ram = ram;
                result = Some(vm_id);
            }
        }
        result
    }
}

/// Picks the VM with the smallest current CPU demand.
pub struct MinimumUtilizationPolicy;

impl MinimumUtilizationPolicy {
    pub fn new() -> Self {
        Self {}
    }
}

impl VmSelectionPolicy for MinimumUtilizationPolicy {
    fn select_vm_to_migrate(&mut self, host: &Host, registry: &VmRegistry, now: f64) -> Option<u32> {
        let mut result = None;
        let mut min_mips = f64::MAX;
        for vm_id in migratable_vms(host, registry) {
            let mips = registry.get(vm_id).borrow().total_utilization_of_cpu_mips(now);
            if mips < min_mips {
                min_mips = mips;
                result = Some(vm_id);
            }
        }
        result
    }
}

/// Picks a uniformly random movable VM using an own seeded generator,
/// so runs with the same seed stay reproducible.
pub struct RandomSelectionPolicy {
    rand: Pcg64,
}

impl RandomSelectionPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rand: Pcg64::seed_from_u64(seed),
        }
    }
}

impl VmSelectionPolicy for RandomSelectionPolicy {
    fn select_vm_to_migrate(&mut self, host: &Host, registry: &VmRegistry, _now: f64) -> Option<u32> {
        let candidates = migratable_vms(host, registry);
        if candidates.is_empty() {
            return None;
        }
        let index = self.rand.gen_range(0..candidates.len());
        Some(candidates[index])
    }
}
