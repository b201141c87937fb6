//! Scalar resource provisioners with reservation semantics.

use indexmap::IndexMap;

use greendc_core::EPSILON;

/// Accounts allocation of a scalar host resource (RAM or bandwidth) to VMs.
///
/// The used amount is always recomputed from the allocation map, so repeated
/// allocations and releases do not accumulate floating-point drift.
#[derive(Debug, Clone)]
pub struct ResourceProvisioner {
    capacity: f64,
    allocations: IndexMap<u32, f64>,
}

impl ResourceProvisioner {
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity,
            allocations: IndexMap::new(),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Returns the total amount currently reserved by VMs.
    pub fn used(&self) -> f64 {
        self.allocations.values().sum()
    }

    /// Returns the amount left for new reservations.
    pub fn available(&self) -> f64 {
        self.capacity - self.used()
    }

    /// Checks whether the given amount can be reserved, without mutating anything.
    ///
    /// A VM that already holds a reservation is assumed to release it first.
    pub fn is_suitable(&self, vm_id: u32, amount: f64) -> bool {
        let held = self.allocations.get(&vm_id).copied().unwrap_or(0.);
        self.available() + held >= amount - EPSILON
    }

    /// Reserves the given amount for the VM, releasing its previous reservation first.
    ///
    /// Returns `false` and leaves no reservation if the capacity is insufficient.
    pub fn allocate(&mut self, vm_id: u32, amount: f64) -> bool {
        self.allocations.shift_remove(&vm_id);
        if self.available() >= amount - EPSILON {
            self.allocations.insert(vm_id, amount);
            true
        } else {
            false
        }
    }

    /// Releases the reservation held by the VM, if any.
    pub fn deallocate(&mut self, vm_id: u32) {
        self.allocations.shift_remove(&vm_id);
    }

    /// Returns the amount currently reserved by the VM.
    pub fn allocated_for(&self, vm_id: u32) -> f64 {
        self.allocations.get(&vm_id).copied().unwrap_or(0.)
    }
}
