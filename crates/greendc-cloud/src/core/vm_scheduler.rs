//! Host-side schedulers mapping VM MIPS requests to PE allocations.

use indexmap::{IndexMap, IndexSet};

use greendc_core::EPSILON;

use crate::core::pe::Pe;

/// Maps the MIPS requests of hosted VMs to allocations on the host PEs.
///
/// `allocate_pes` releases the previous allocation of the VM first, so re-allocation is
/// idempotent. VMs migrating out of the host lose 10% of the allocation to the migration
/// overhead, VMs migrating in receive only 10% of their request on the destination host.
pub trait VmScheduler {
    /// Allocates PEs for the VM according to the policy, returns whether it succeeded.
    fn allocate_pes(&mut self, vm_id: u32, in_migration: bool, requested: &[f64]) -> bool;

    /// Releases the PEs allocated to the VM.
    fn deallocate_pes(&mut self, vm_id: u32);

    /// Returns the per-PE MIPS amounts allocated to the VM.
    fn allocated_mips(&self, vm_id: u32) -> Vec<f64>;

    /// Returns the total MIPS allocated to the VM.
    fn total_allocated_mips(&self, vm_id: u32) -> f64 {
        self.allocated_mips(vm_id).iter().sum()
    }

    /// Returns the MIPS amount left for new allocations.
    fn available_mips(&self) -> f64;

    /// Returns the nominal MIPS capacity of a single PE.
    fn pe_capacity(&self) -> f64;

    /// Returns the total MIPS capacity over the working PEs.
    fn total_mips(&self) -> f64;

    fn pes(&self) -> &[Pe];

    /// Marks a PE as failed, excluding its capacity.
    fn fail_pe(&mut self, pe_id: u32);

    fn add_migrating_in(&mut self, vm_id: u32);

    fn remove_migrating_in(&mut self, vm_id: u32);

    fn is_migrating_in(&self, vm_id: u32) -> bool;
}

fn working_mips(pes: &[Pe]) -> f64 {
    pes.iter().filter(|pe| !pe.is_failed()).map(|pe| pe.mips()).sum()
}

/// Time-shared scheduler.
///
/// A VM request can be split across PEs, each virtual PE request is capped at the physical
/// PE capacity. When the host is overcommitted, all allocations are scaled down
/// proportionally.
pub struct VmSchedulerTimeShared {
    pes: Vec<Pe>,
    mips_map_requested: IndexMap<u32, Vec<f64>>,
    mips_map: IndexMap<u32, Vec<f64>>,
    available_mips: f64,
    vms_migrating_in: IndexSet<u32>,
    vms_migrating_out: IndexSet<u32>,
}

impl VmSchedulerTimeShared {
    pub fn new(pes: Vec<Pe>) -> Self {
        let available_mips = working_mips(&pes);
        Self {
            pes,
            mips_map_requested: IndexMap::new(),
            mips_map: IndexMap::new(),
            available_mips,
            vms_migrating_in: IndexSet::new(),
            vms_migrating_out: IndexSet::new(),
        }
    }

    fn update_migration_sets(&mut self, vm_id: u32, in_migration: bool) {
        if in_migration {
            if !self.vms_migrating_in.contains(&vm_id) && !self.vms_migrating_out.contains(&vm_id) {
                self.vms_migrating_out.insert(vm_id);
            }
        } else {
            self.vms_migrating_out.shift_remove(&vm_id);
        }
    }

    /// Recomputes all allocations from the recorded requests.
    ///
    /// Applies the per-PE caps and migration factors, and scales everything down
    /// proportionally when the total demand exceeds the host capacity.
    fn rebuild_allocations(&mut self) {
        let pe_mips = self.pe_capacity();
        let total_capacity = self.total_mips();

        let requests: Vec<(u32, Vec<f64>)> = self
            .mips_map_requested
            .iter()
            .map(|(vm_id, requested)| (*vm_id, requested.clone()))
            .collect();

        let mut total_reserved = 0.;
        for (vm_id, requested) in &requests {
            let mut sum: f64 = requested.iter().map(|m| m.min(pe_mips)).sum();
            if self.vms_migrating_in.contains(vm_id) {
                sum *= 0.1;
            }
            total_reserved += sum;
        }
        let scale = if total_reserved > total_capacity + EPSILON {
            total_capacity / total_reserved
        } else {
            1.
        };

        self.mips_map.clear();
        for (vm_id, requested) in &requests {
            let allocated: Vec<f64> = requested
                .iter()
                .map(|m| {
                    let mut mips = m.min(pe_mips);
                    if self.vms_migrating_out.contains(vm_id) {
                        mips *= 0.9;
                    } else if self.vms_migrating_in.contains(vm_id) {
                        mips *= 0.1;
                    }
                    mips * scale
                })
                .collect();
            self.mips_map.insert(*vm_id, allocated);
        }
        self.available_mips = (total_capacity - total_reserved * scale).max(0.);
    }
}

impl VmScheduler for VmSchedulerTimeShared {
    fn allocate_pes(&mut self, vm_id: u32, in_migration: bool, requested: &[f64]) -> bool {
        self.mips_map_requested.shift_remove(&vm_id);
        self.update_migration_sets(vm_id, in_migration);
        self.mips_map_requested.insert(vm_id, requested.to_vec());
        self.rebuild_allocations();
        true
    }

    fn deallocate_pes(&mut self, vm_id: u32) {
        self.mips_map_requested.shift_remove(&vm_id);
        self.mips_map.shift_remove(&vm_id);
        self.rebuild_allocations();
    }

    fn allocated_mips(&self, vm_id: u32) -> Vec<f64> {
        self.mips_map.get(&vm_id).cloned().unwrap_or_default()
    }

    fn available_mips(&self) -> f64 {
        self.available_mips
    }

    fn pe_capacity(&self) -> f64 {
        self.pes.first().map(|pe| pe.mips()).unwrap_or(0.)
    }

    fn total_mips(&self) -> f64 {
        working_mips(&self.pes)
    }

    fn pes(&self) -> &[Pe] {
        &self.pes
    }

    fn fail_pe(&mut self, pe_id: u32) {
        if let Some(pe) = self.pes.iter_mut().find(|pe| pe.id == pe_id) {
            pe.set_failed(true);
        }
        self.rebuild_allocations();
    }

    fn add_migrating_in(&mut self, vm_id: u32) {
        self.vms_migrating_in.insert(vm_id);
    }

    fn remove_migrating_in(&mut self, vm_id: u32) {
        self.vms_migrating_in.shift_remove(&vm_id);
    }

    fn is_migrating_in(&self, vm_id: u32) -> bool {
        self.vms_migrating_in.contains(&vm_id)
    }
}

/// Space-shared scheduler assigning whole PEs to VMs.
///
/// A virtual PE request larger than the physical PE capacity is split into an integer number
/// of whole PEs. Allocation fails when there are not enough free PEs.
pub struct VmSchedulerSpaceShared {
    pes: Vec<Pe>,
    free_pes: Vec<usize>,
    pe_map: IndexMap<u32, Vec<usize>>,
    mips_map: IndexMap<u32, Vec<f64>>,
    available_mips: f64,
    vms_migrating_in: IndexSet<u32>,
    vms_migrating_out: IndexSet<u32>,
}

impl VmSchedulerSpaceShared {
    pub fn new(pes: Vec<Pe>) -> Self {
        let available_mips = working_mips(&pes);
        let free_pes = (0..pes.len()).collect();
        Self {
            pes,
            free_pes,
            pe_map: IndexMap::new(),
            mips_map: IndexMap::new(),
            available_mips,
            vms_migrating_in: IndexSet::new(),
            vms_migrating_out: IndexSet::new(),
        }
    }
}

impl VmScheduler for VmSchedulerSpaceShared {
    fn allocate_pes(&mut self, vm_id: u32, in_migration: bool, requested: &[f64]) -> bool {
        self.deallocate_pes(vm_id);
        if in_migration {
            if !self.vms_migrating_in.contains(&vm_id) && !self.vms_migrating_out.contains(&vm_id) {
                self.vms_migrating_out.insert(vm_id);
            }
        } else {
            self.vms_migrating_out.shift_remove(&vm_id);
        }

        let pe_mips = self.pe_capacity();
        if pe_mips == 0. {
            return false;
        }
        let mut chunks: Vec<f64> = Vec::new();
        for &mips in requested {
            if mips <= pe_mips + EPSILON {
                chunks.push(mips);
            } else {
                let count = (mips / pe_mips).ceil() as usize;
                for _ in 0..count {
                    chunks.push(mips / count as f64);
                }
            }
        }
        if self.free_pes.len() < chunks.len() {
            return false;
        }
        let selected: Vec<usize> = self.free_pes.drain(..chunks.len()).collect();
        self.available_mips -= chunks.iter().sum::<f64>();
        self.pe_map.insert(vm_id, selected);
        self.mips_map.insert(vm_id, chunks);
        true
    }

    fn deallocate_pes(&mut self, vm_id: u32) {
        if let Some(pes) = self.pe_map.shift_remove(&vm_id) {
            let allocated: f64 = self
                .mips_map
                .shift_remove(&vm_id)
                .map(|v| v.iter().sum())
                .unwrap_or(0.);
            self.available_mips += allocated;
            self.free_pes.extend(pes);
            self.free_pes.sort_unstable();
        } else {
            self.mips_map.shift_remove(&vm_id);
        }
    }

    fn allocated_mips(&self, vm_id: u32) -> Vec<f64> {
        self.mips_map.get(&vm_id).cloned().unwrap_or_default()
    }

    fn available_mips(&self) -> f64 {
        self.available_mips
    }

    fn pe_capacity(&self) -> f64 {
        self.pes.first().map(|pe| pe.mips()).unwrap_or(0.)
    }

    fn total_mips(&self) -> f64 {
        working_mips(&self.pes)
    }

    fn pes(&self) -> &[Pe] {
        &self.pes
    }

    fn fail_pe(&mut self, pe_id: u32) {
        if let Some(pos) = self.pes.iter().position(|pe| pe.id == pe_id) {
            self.pes[pos].set_failed(true);
            self.free_pes.retain(|&idx| idx != pos);
            self.available_mips = self
                .free_pes
                .iter()
                .map(|&idx| self.pes[idx].mips())
                .sum::<f64>()
                .min(self.available_mips);
        }
    }

    fn add_migrating_in(&mut self, vm_id: u32) {
        self.vms_migrating_in.insert(vm_id);
    }

    fn remove_migrating_in(&mut self, vm_id: u32) {
        self.vms_migrating_in.shift_remove(&vm_id);
    }

    fn is_migrating_in(&self, vm_id: u32) -> bool {
        self.vms_migrating_in.contains(&vm_id)
    }
}
