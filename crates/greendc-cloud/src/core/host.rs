//! Physical host aggregating provisioners, a VM scheduler and a power model.

use std::mem;
use std::rc::Rc;
use std::cell::RefCell;

use indexmap::IndexSet;
use serde::Serialize;

use greendc_core::EPSILON;

use crate::core::power_model::PowerModel;
use crate::core::provisioner::ResourceProvisioner;
use crate::core::vm::{Vm, HISTORY_LENGTH};
use crate::core::vm_registry::VmRegistry;
use crate::core::vm_scheduler::VmScheduler;

/// A single record of the host utilization history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostStateHistoryEntry {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub is_active: bool,
}

/// Represents a physical machine.
///
/// The host owns its PEs (through the VM scheduler), the RAM and bandwidth provisioners and
/// the list of hosted VMs. During a live migration the incoming VM is present both in the VM
/// list and in the migrating-in set, and its RAM and bandwidth reservations on this host are
/// held through the whole migration window.
pub struct Host {
    pub id: u32,
    name: String,
    ram_provisioner: ResourceProvisioner,
    bw_provisioner: ResourceProvisioner,
    storage: f64,
    vm_scheduler: Box<dyn VmScheduler>,
    power_model: Option<Box<dyn PowerModel>>,
    vms: Vec<u32>,
    vms_migrating_in: IndexSet<u32>,
    state_history: Vec<HostStateHistoryEntry>,
    utilization_mips: f64,
    previous_utilization_mips: f64,
}

impl Host {
    pub fn new(
        id: u32,
        name: &str,
        ram: f64,
        bw: f64,
        storage: f64,
        vm_scheduler: Box<dyn VmScheduler>,
        power_model: Option<Box<dyn PowerModel>>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            ram_provisioner: ResourceProvisioner::new(ram),
            bw_provisioner: ResourceProvisioner::new(bw),
            storage,
            vm_scheduler,
            power_model,
            vms: Vec::new(),
            vms_migrating_in: IndexSet::new(),
            state_history: Vec::new(),
            utilization_mips: 0.,
            previous_utilization_mips: 0.,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_mips(&self) -> f64 {
        self.vm_scheduler.total_mips()
    }

    pub fn pe_capacity(&self) -> f64 {
        self.vm_scheduler.pe_capacity()
    }

    pub fn available_mips(&self) -> f64 {
        self.vm_scheduler.available_mips()
    }

    pub fn ram_provisioner(&self) -> &ResourceProvisioner {
        &self.ram_provisioner
    }

    pub fn bw_provisioner(&self) -> &ResourceProvisioner {
        &self.bw_provisioner
    }

    pub fn bw_capacity(&self) -> f64 {
        self.bw_provisioner.capacity()
    }

    pub fn storage(&self) -> f64 {
        self.storage
    }

    pub fn vm_ids(&self) -> &[u32] {
        &self.vms
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    pub fn has_vm(&self, vm_id: u32) -> bool {
        self.vms.contains(&vm_id)
    }

    pub fn vms_migrating_in(&self) -> &IndexSet<u32> {
        &self.vms_migrating_in
    }

    pub fn is_migrating_in_vm(&self, vm_id: u32) -> bool {
        self.vms_migrating_in.contains(&vm_id)
    }

    /// Marks a PE of this host as failed.
    pub fn fail_pe(&mut self, pe_id: u32) {
        self.vm_scheduler.fail_pe(pe_id);
    }

    /// Sum of nominal MIPS requirements of the hosted VMs.
    pub fn total_vm_mips(&self, registry: &VmRegistry) -> f64 {
        self.vms
            .iter()
            .map(|&vm_id| registry.get(vm_id).borrow().total_mips())
            .sum()
    }

    /// Tries to place the VM on this host, reserving storage, RAM, bandwidth and PEs.
    ///
    /// Partial reservations are rolled back on failure.
    pub fn vm_create(&mut self, vm_rc: &Rc<RefCell<Vm>>) -> bool {
        let mut vm = vm_rc.borrow_mut();
        if self.storage < vm.size() - EPSILON {
            log::debug!("host {}: not enough storage for vm {}", self.name, vm.id);
            return false;
        }
        if !self.ram_provisioner.allocate(vm.id, vm.current_requested_ram()) {
            log::debug!("host {}: not enough ram for vm {}", self.name, vm.id);
            return false;
        }
        if !self.bw_provisioner.allocate(vm.id, vm.current_requested_bw()) {
            log::debug!("host {}: not enough bw for vm {}", self.name, vm.id);
            self.ram_provisioner.deallocate(vm.id);
            return false;
        }
        let requested = vm.current_requested_mips();
        if !self.vm_scheduler.allocate_pes(vm.id, vm.is_in_migration(), &requested) {
            log::debug!("host {}: not enough mips for vm {}", self.name, vm.id);
            self.ram_provisioner.deallocate(vm.id);
            self.bw_provisioner.deallocate(vm.id);
            return false;
        }
        self.storage -= vm.size();
        self.vms.push(vm.id);
        vm.set_host(Some(self.id));
        true
    }

    /// Removes the VM from this host and releases all its reservations.
    pub fn vm_destroy(&mut self, vm_rc: &Rc<RefCell<Vm>>) {
        let mut vm = vm_rc.borrow_mut();
        if let Some(pos) = self.vms.iter().position(|&id| id == vm.id) {
            self.vms.remove(pos);
            self.ram_provisioner.deallocate(vm.id);
            self.bw_provisioner.deallocate(vm.id);
            self.vm_scheduler.deallocate_pes(vm.id);
            self.storage += vm.size();
            vm.set_host(None);
        }
    }

    /// Removes every VM from this host, releasing all reservations.
    pub fn vm_destroy_all(&mut self, registry: &VmRegistry) {
        let vm_ids = mem::take(&mut self.vms);
        for vm_id in vm_ids {
            let vm_rc = registry.get(vm_id);
            let mut vm = vm_rc.borrow_mut();
            self.ram_provisioner.deallocate(vm_id);
            self.bw_provisioner.deallocate(vm_id);
            self.vm_scheduler.deallocate_pes(vm_id);
            self.storage += vm.size();
            vm.set_host(None);
        }
    }

    /// Registers an incoming live migration and reserves the target-side resources.
    ///
    /// The RAM and bandwidth reservations are held through the full migration window, while
    /// the CPU allocation is reduced to 10% of the request. A reservation failure here
    /// indicates broken placement bookkeeping and is fatal.
    pub fn add_migrating_in_vm(&mut self, vm_rc: &Rc<RefCell<Vm>>, now: f64, registry: &VmRegistry) {
        let vm_id = {
            let mut vm = vm_rc.borrow_mut();
            vm.set_in_migration(true);
            vm.id
        };
        if self.vms_migrating_in.contains(&vm_id) {
            return;
        }
        {
            let mut vm = vm_rc.borrow_mut();
            if self.storage < vm.size() - EPSILON {
                panic!(
                    "Bookkeeping inconsistency: not enough storage on host {} for migrating vm {}",
                    self.name, vm_id
                );
            }
            if !self.ram_provisioner.allocate(vm_id, vm.current_requested_ram()) {
                panic!(
                    "Bookkeeping inconsistency: not enough ram on host {} for migrating vm {}",
                    self.name, vm_id
                );
            }
            if !self.bw_provisioner.allocate(vm_id, vm.current_requested_bw()) {
                panic!(
                    "Bookkeeping inconsistency: not enough bw on host {} for migrating vm {}",
                    self.name, vm_id
                );
            }
            self.vm_scheduler.add_migrating_in(vm_id);
            vm.set_host(Some(self.id));
            let requested = vm.current_requested_mips();
            if !self.vm_scheduler.allocate_pes(vm_id, true, &requested) {
                panic!(
                    "Bookkeeping inconsistency: not enough mips on host {} for migrating vm {}",
                    self.name, vm_id
                );
            }
            self.storage -= vm.size();
            self.vms_migrating_in.insert(vm_id);
            self.vms.push(vm_id);
        }
        self.update_vms_processing(now, registry);
    }

    /// Completes or cancels an incoming migration, releasing the temporary reservations.
    pub fn remove_migrating_in_vm(&mut self, vm_rc: &Rc<RefCell<Vm>>) {
        let mut vm = vm_rc.borrow_mut();
        let vm_id = vm.id;
        if self.vms_migrating_in.shift_remove(&vm_id) {
            if let Some(pos) = self.vms.iter().position(|&id| id == vm_id) {
                self.vms.remove(pos);
            }
            self.ram_provisioner.deallocate(vm_id);
            self.bw_provisioner.deallocate(vm_id);
            self.vm_scheduler.deallocate_pes(vm_id);
            self.storage += vm.size();
            self.vm_scheduler.remove_migrating_in(vm_id);
            vm.set_in_migration(false);
        }
    }

    /// Re-creates the reservations for the VMs in the migrating-in set.
    ///
    /// Used after a bulk destroy to bring the host back to a consistent state.
    pub fn reallocate_migrating_in_vms(&mut self, registry: &VmRegistry) {
        let vm_ids: Vec<u32> = self.vms_migrating_in.iter().cloned().collect();
        for vm_id in vm_ids {
            let vm_rc = registry.get(vm_id);
            let mut vm = vm_rc.borrow_mut();
            if !self.vms.contains(&vm_id) {
                self.vms.push(vm_id);
            }
            self.vm_scheduler.add_migrating_in(vm_id);
            self.ram_provisioner.allocate(vm_id, vm.current_requested_ram());
            self.bw_provisioner.allocate(vm_id, vm.current_requested_bw());
            let requested = vm.current_requested_mips();
            self.vm_scheduler.allocate_pes(vm_id, true, &requested);
            self.storage -= vm.size();
            vm.set_host(Some(self.id));
        }
    }

    /// Advances the processing of all hosted VMs up to the given time.
    ///
    /// Rebuilds the PE allocation from the current VM demands, accounts the live-migration
    /// performance degradation, updates the host utilization bookkeeping and the state
    /// history. Returns the earliest expected cloudlet completion time, or `f64::INFINITY`.
    pub fn update_vms_processing(&mut self, now: f64, registry: &VmRegistry) -> f64 {
        let mut smaller_time = f64::INFINITY;
        let vm_ids = self.vms.clone();

        for &vm_id in &vm_ids {
            self.vm_scheduler.deallocate_pes(vm_id);
        }
        for &vm_id in &vm_ids {
            let vm_rc = registry.get(vm_id);
            let (requested, in_migration) = {
                let vm = vm_rc.borrow();
                (vm.current_requested_mips(), vm.is_in_migration())
            };
            self.vm_scheduler.allocate_pes(vm_id, in_migration, &requested);
        }

        self.previous_utilization_mips = self.utilization_mips;
        self.utilization_mips = 0.;
        let mut host_requested_mips = 0.;

        for &vm_id in &vm_ids {
            let vm_rc = registry.get(vm_id);
            let mut vm = vm_rc.borrow_mut();
            let mips_share = self.vm_scheduler.allocated_mips(vm_id);
            let time = vm.update_processing(now, &mips_share);
            if time < smaller_time {
                smaller_time = time;
            }
            let total_requested = vm.current_requested_total_mips();
            let mut total_allocated = self.vm_scheduler.total_allocated_mips(vm_id);
            if self.vms_migrating_in.contains(&vm_id) {
                log::trace!("host {}: vm {} is being migrated in", self.name, vm_id);
            } else {
                if total_allocated + 0.1 < total_requested {
                    log::debug!(
                        "host {}: vm {} is under-allocated: requested {:.2} mips, got {:.2} mips",
                        self.name,
                        vm_id,
                        total_requested,
                        total_allocated
                    );
                }
                let is_migrating = vm.is_in_migration();
                vm.add_state_history_entry(now, total_allocated, total_requested, is_migrating);
                if vm.is_in_migration() {
                    log::trace!("host {}: vm {} is migrating out", self.name, vm_id);
                    // compensate the 10% live-migration degradation in the usage accounting
                    total_allocated /= 0.9;
                }
            }
            self.utilization_mips += total_allocated;
            host_requested_mips += total_requested;
        }

        self.add_state_history_entry(now, self.utilization_mips, host_requested_mips, self.utilization_mips > 0.);
        smaller_time
    }

    /// Returns VMs that have no more work: their demand is zero and they are not migrating.
    pub fn completed_vms(&self, registry: &VmRegistry) -> Vec<u32> {
        self.vms
            .iter()
            .filter(|&&vm_id| {
                let vm_rc = registry.get(vm_id);
                let vm = vm_rc.borrow();
                !vm.is_in_migration() && vm.current_requested_total_mips() == 0.
            })
            .cloned()
            .collect()
    }

    /// Current CPU utilization in `[0, 1]`.
    pub fn utilization_of_cpu(&self) -> f64 {
        if self.total_mips() == 0. {
            return 0.;
        }
        (self.utilization_mips / self.total_mips()).min(1.)
    }

    pub fn utilization_of_cpu_mips(&self) -> f64 {
        self.utilization_mips
    }

    pub fn previous_utilization_of_cpu(&self) -> f64 {
        if self.total_mips() == 0. {
            return 0.;
        }
        (self.previous_utilization_mips / self.total_mips()).min(1.)
    }

    /// A host is switched off iff its CPU utilization is exactly zero.
    pub fn is_switched_off(&self) -> bool {
        self.utilization_of_cpu() == 0.
    }

    pub fn has_power_model(&self) -> bool {
        self.power_model.is_some()
    }

    /// Power consumption at the given CPU utilization, in Watts.
    pub fn power_at(&self, utilization: f64) -> f64 {
        match &self.power_model {
            Some(model) => model.power(utilization),
            None => 0.,
        }
    }

    /// Current power consumption, in Watts.
    pub fn power(&self) -> f64 {
        self.power_at(self.utilization_of_cpu())
    }

    /// Power consumption of the fully loaded host, in Watts.
    pub fn max_power(&self) -> f64 {
        self.power_at(1.)
    }

    /// Energy consumed over a time frame, integrating the power between the two utilization
    /// samples by linear interpolation (trapezoidal rule), in Watt-seconds.
    pub fn energy_linear_interpolation(&self, from_utilization: f64, to_utilization: f64, time_diff: f64) -> f64 {
        if from_utilization == 0. && to_utilization == 0. {
            return 0.;
        }
        let from_power = self.power_at(from_utilization);
        let to_power = self.power_at(to_utilization);
        (from_power + (to_power - from_power) / 2.) * time_diff
    }

    /// Host CPU utilization history derived from the hosted VMs' histories,
    /// the most recent sample first, the zero tail trimmed.
    pub fn utilization_history(&self, registry: &VmRegistry) -> Vec<f64> {
        let mut history = vec![0.; HISTORY_LENGTH];
        let host_mips = self.total_mips();
        if host_mips == 0. {
            return Vec::new();
        }
        for &vm_id in &self.vms {
            let vm_rc = registry.get(vm_id);
            let vm = vm_rc.borrow();
            for (i, utilization) in vm.utilization_history().iter().enumerate() {
                history[i] += utilization * vm.total_mips() / host_mips;
            }
        }
        crate::core::math::trim_zero_tail(&history)
    }

    /// Appends a state history entry, replacing the previous one if it has the same time.
    fn add_state_history_entry(&mut self, time: f64, allocated_mips: f64, requested_mips: f64, is_active: bool) {
        let entry = HostStateHistoryEntry {
            time,
            allocated_mips,
            requested_mips,
            is_active,
        };
        if let Some(last) = self.state_history.last_mut() {
            if last.time == time {
                *last = entry;
                return;
            }
        }
        self.state_history.push(entry);
    }

    pub fn state_history(&self) -> &[HostStateHistoryEntry] {
        &self.state_history
    }

    /// Returns the per-PE MIPS amounts allocated to the VM by the host scheduler.
    pub fn allocated_mips_for_vm(&self, vm_id: u32) -> Vec<f64> {
        self.vm_scheduler.allocated_mips(vm_id)
    }
}
