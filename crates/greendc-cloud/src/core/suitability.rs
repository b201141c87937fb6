//! Host suitability evaluation for VM placement.

use greendc_core::EPSILON;

use crate::core::host::Host;
use crate::core::vm::Vm;
use crate::core::vm_registry::VmRegistry;

/// Answers whether a VM fits on a host as a conjunction of bandwidth, RAM and MIPS checks.
///
/// The MIPS check has two variants. Without oversubscription the nominal VM capacities are
/// compared against the host capacity, so the sum of hosted VM capacities can never exceed
/// it. With oversubscription only the current MIPS demand must fit into the currently
/// available MIPS.
#[derive(Clone, Copy)]
pub struct HostSuitability {
    oversubscribe: bool,
}

impl HostSuitability {
    pub fn new(oversubscribe: bool) -> Self {
        Self { oversubscribe }
    }

    pub fn is_suitable(&self, host: &Host, vm: &Vm, registry: &VmRegistry) -> bool {
        self.is_bw_suitable(host, vm) && self.is_ram_suitable(host, vm) && self.is_mips_suitable(host, vm, registry)
    }

    fn is_bw_suitable(&self, host: &Host, vm: &Vm) -> bool {
        host.bw_provisioner().is_suitable(vm.id, vm.current_requested_bw())
    }

    fn is_ram_suitable(&self, host: &Host, vm: &Vm) -> bool {
        host.ram_provisioner().is_suitable(vm.id, vm.current_requested_ram())
    }

    fn is_mips_suitable(&self, host: &Host, vm: &Vm, registry: &VmRegistry) -> bool {
        if self.oversubscribe {
            host.available_mips() > vm.current_requested_total_mips() + EPSILON
        } else {
            (host.total_mips() - host.total_vm_mips(registry)) > vm.total_mips() + EPSILON
        }
    }
}
