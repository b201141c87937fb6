//! Central registry of all VMs in the simulation.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use sugars::{rc, refcell};

use crate::core::vm::Vm;

/// Stores every VM of the simulation keyed by its id.
///
/// Hosts, brokers and placement policies hold VM ids and resolve them through this registry,
/// which avoids ownership cycles between hosts and VMs.
pub struct VmRegistry {
    vms: BTreeMap<u32, Rc<RefCell<Vm>>>,
    vm_counter: u32,
}

impl VmRegistry {
    pub fn new() -> Self {
        Self {
            vms: BTreeMap::new(),
            vm_counter: 0,
        }
    }

    /// Registers information about new VM.
    pub fn register(&mut self, vm: Vm) -> Rc<RefCell<Vm>> {
        let id = vm.id;
        let vm_rc = rc!(refcell!(vm));
        self.vms.insert(id, vm_rc.clone());
        vm_rc
    }

    /// Returns the reference to VM by its id.
    ///
    /// Panics if the VM is not registered.
    pub fn get(&self, vm_id: u32) -> Rc<RefCell<Vm>> {
        self.vms
            .get(&vm_id)
            .unwrap_or_else(|| panic!("Unknown vm {}", vm_id))
            .clone()
    }

    pub fn contains(&self, vm_id: u32) -> bool {
        self.vms.contains_key(&vm_id)
    }

    /// All registered VM ids in ascending order.
    pub fn vm_ids(&self) -> Vec<u32> {
        self.vms.keys().cloned().collect()
    }

    /// Generates new VM id.
    pub fn generate_vm_id(&mut self) -> u32 {
        self.vm_counter += 1;
        self.vm_counter
    }
}

impl Default for VmRegistry {
    fn default() -> Self {
        Self::new()
    }
}
