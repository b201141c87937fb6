//! Broker entity owning VMs and cloudlets on behalf of a user.

use std::cell::RefCell;
use std::collections::HashSet;
use std::mem;
use std::rc::Rc;

use greendc_core::cast;
use greendc_core::context::SimulationContext;
use greendc_core::event::Event;
use greendc_core::handler::EventHandler;
use greendc_core::{log_debug, log_info, log_warn};

use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::events::allocation::{VmCreateAck, VmCreateRequest, VmDestroyRequest};
use crate::core::events::cloudlet::{CloudletReturn, CloudletSubmit};
use crate::core::vm_registry::VmRegistry;

/// A cloudlet waiting for submission together with its earliest submission time and an
/// optional explicit VM binding.
struct PendingCloudlet {
    cloudlet: Cloudlet,
    earliest_time: f64,
    vm_id: Option<u32>,
}

/// Represents a cloud user: requests VM creation, submits cloudlets to the created VMs and
/// collects the results.
///
/// Cloudlets without an explicit binding are spread over the created VMs round-robin.
/// Cloudlets bound to a VM that failed to be created are dropped with a warning.
pub struct Broker {
    pub id: u32,
    datacenter_id: u32,
    vm_requests: Vec<u32>,
    pending_cloudlets: Vec<PendingCloudlet>,
    created_vms: Vec<u32>,
    acks_received: usize,
    cloudlets_submitted: usize,
    finished_cloudlets: Vec<Cloudlet>,
    registry: Rc<RefCell<VmRegistry>>,
    ctx: SimulationContext,
}

impl Broker {
    pub fn new(datacenter_id: u32, registry: Rc<RefCell<VmRegistry>>, ctx: SimulationContext) -> Self {
        Self {
            id: ctx.id(),
            datacenter_id,
            vm_requests: Vec::new(),
            pending_cloudlets: Vec::new(),
            created_vms: Vec::new(),
            acks_received: 0,
            cloudlets_submitted: 0,
            finished_cloudlets: Vec::new(),
            registry,
            ctx,
        }
    }

    /// Queues a VM creation request, sent when the simulation starts.
    pub fn add_vm(&mut self, vm_id: u32) {
        self.vm_requests.push(vm_id);
    }

    /// Queues a cloudlet for submission after the VM creation phase.
    pub fn add_cloudlet(&mut self, cloudlet: Cloudlet, earliest_time: f64, vm_id: Option<u32>) {
        self.pending_cloudlets.push(PendingCloudlet {
            cloudlet,
            earliest_time,
            vm_id,
        });
    }

    /// Cloudlets returned by the datacenter so far.
    pub fn finished_cloudlets(&self) -> &[Cloudlet] {
        &self.finished_cloudlets
    }

    pub fn created_vms(&self) -> &[u32] {
        &self.created_vms
    }

    fn submit_cloudlets(&mut self) {
        let now = self.ctx.time();
        let pending = mem::take(&mut self.pending_cloudlets);
        if self.created_vms.is_empty() && !pending.is_empty() {
            log_warn!(self.ctx, "no vms created, dropping {} cloudlets", pending.len());
            return;
        }
        let created: HashSet<u32> = self.created_vms.iter().cloned().collect();
        let mut next_vm = 0;
        for entry in pending {
            let PendingCloudlet {
                mut cloudlet,
                earliest_time,
                vm_id,
            } = entry;
            let vm_id = match vm_id {
                Some(vm_id) => {
                    if !created.contains(&vm_id) {
                        log_warn!(
                            self.ctx,
                            "cloudlet {}: bound vm {} is not available, skipped",
                            cloudlet.id,
                            vm_id
                        );
                        continue;
                    }
                    vm_id
                }
                None => {
                    let vm_id = self.created_vms[next_vm % self.created_vms.len()];
                    next_vm += 1;
                    vm_id
                }
            };
            cloudlet.set_vm_id(vm_id);
            cloudlet.set_status(CloudletStatus::Ready);
            log_debug!(self.ctx, "submitting cloudlet {} to vm {}", cloudlet.id, vm_id);
            self.cloudlets_submitted += 1;
            let delay = (earliest_time - now).max(0.);
            self.ctx.emit(CloudletSubmit { cloudlet }, self.datacenter_id, delay);
        }
    }

    fn on_vm_create_ack(&mut self, vm_id: u32, created: bool) {
        self.acks_received += 1;
        if created {
            self.created_vms.push(vm_id);
        } else {
            log_warn!(self.ctx, "creation of vm {} failed", vm_id);
        }
        if self.acks_received == self.vm_requests.len() {
            log_debug!(self.ctx, "{} vms created, submitting cloudlets", self.created_vms.len());
            self.submit_cloudlets();
        }
    }

    fn on_cloudlet_return(&mut self, cloudlet: Cloudlet) {
        log_debug!(
            self.ctx,
            "cloudlet {} returned with status {}",
            cloudlet.id,
            cloudlet.status()
        );
        self.finished_cloudlets.push(cloudlet);
        if self.finished_cloudlets.len() == self.cloudlets_submitted {
            log_info!(self.ctx, "all cloudlets completed, destroying vms");
            for &vm_id in &self.created_vms {
                self.ctx.emit(VmDestroyRequest { vm_id }, self.datacenter_id, 0.);
            }
        }
    }
}

impl EventHandler for Broker {
    fn on_start(&mut self) {
        log_info!(
            self.ctx,
            "broker started with {} vm requests and {} cloudlets",
            self.vm_requests.len(),
            self.pending_cloudlets.len()
        );
        if self.vm_requests.is_empty() {
            self.submit_cloudlets();
            return;
        }
        for &vm_id in &self.vm_requests {
            assert!(self.registry.borrow().contains(vm_id), "vm {} is not registered", vm_id);
            self.ctx.emit(VmCreateRequest { vm_id }, self.datacenter_id, 0.);
        }
    }

    fn on(&mut self, event: Event) {
        cast!(match event.data {
            VmCreateAck { vm_id, host_id, created } => {
                let _ = host_id;
                self.on_vm_create_ack(vm_id, created);
            }
            CloudletReturn { cloudlet } => {
                self.on_cloudlet_return(cloudlet);
            }
        })
    }

    fn on_shutdown(&mut self) {
        log_info!(
            self.ctx,
            "broker finished: {} of {} cloudlets returned",
            self.finished_cloudlets.len(),
            self.cloudlets_submitted
        );
    }
}
