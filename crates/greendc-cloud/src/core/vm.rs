//! Representation of a virtual machine.

use std::collections::VecDeque;

use serde::Serialize;

use crate::core::cloudlet::Cloudlet;
use crate::core::cloudlet_scheduler::CloudletScheduler;

/// Number of utilization samples retained in the VM utilization history.
pub const HISTORY_LENGTH: usize = 30;

/// A single record of the VM MIPS allocation history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmStateHistoryEntry {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub in_migration: bool,
}

/// Represents a virtual machine.
///
/// A VM is pinned to exactly one host at a time, except during a live migration when it is
/// present on the source host and in the migrating-in set of the destination host.
pub struct Vm {
    pub id: u32,
    owner_id: u32,
    mips: f64,
    pe_count: u32,
    ram: f64,
    bw: f64,
    size: f64,
    cloudlet_scheduler: Box<dyn CloudletScheduler>,
    host_id: Option<u32>,
    in_migration: bool,
    being_instantiated: bool,
    state_history: Vec<VmStateHistoryEntry>,
    utilization_history: VecDeque<f64>,
    previous_time: f64,
}

impl Vm {
    /// Creates virtual machine with specified parameters.
    ///
    /// * `mips` - requested MIPS per PE.
    /// * `ram`, `bw`, `size` - requested memory, bandwidth and image size.
    pub fn new(
        id: u32,
        owner_id: u32,
        mips: f64,
        pe_count: u32,
        ram: f64,
        bw: f64,
        size: f64,
        cloudlet_scheduler: Box<dyn CloudletScheduler>,
    ) -> Self {
        Self {
            id,
            owner_id,
            mips,
            pe_count,
            ram,
            bw,
            size,
            cloudlet_scheduler,
            host_id: None,
            in_migration: false,
            being_instantiated: true,
            state_history: Vec::new(),
            utilization_history: VecDeque::new(),
            previous_time: -1.,
        }
    }

    pub fn owner_id(&self) -> u32 {
        self.owner_id
    }

    pub fn mips(&self) -> f64 {
        self.mips
    }

    pub fn pe_count(&self) -> u32 {
        self.pe_count
    }

    pub fn ram(&self) -> f64 {
        self.ram
    }

    pub fn bw(&self) -> f64 {
        self.bw
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    /// Total requested MIPS over all PEs.
    pub fn total_mips(&self) -> f64 {
        self.mips * self.pe_count as f64
    }

    pub fn host_id(&self) -> Option<u32> {
        self.host_id
    }

    pub fn set_host(&mut self, host_id: Option<u32>) {
        self.host_id = host_id;
    }

    pub fn is_in_migration(&self) -> bool {
        self.in_migration
    }

    pub fn set_in_migration(&mut self, in_migration: bool) {
        self.in_migration = in_migration;
    }

    pub fn is_being_instantiated(&self) -> bool {
        self.being_instantiated
    }

    pub fn set_being_instantiated(&mut self, value: bool) {
        self.being_instantiated = value;
    }

    /// Returns the per-PE MIPS amounts currently requested by this VM.
    ///
    /// A VM that is still being instantiated requests its full capacity, afterwards the
    /// demand is driven by the cloudlet scheduler.
    pub fn current_requested_mips(&self) -> Vec<f64> {
        if self.being_instantiated {
            return vec![self.mips; self.pe_count as usize];
        }
        self.cloudlet_scheduler.current_requested_mips()
    }

    pub fn current_requested_total_mips(&self) -> f64 {
        self.current_requested_mips().iter().sum()
    }

    pub fn current_requested_ram(&self) -> f64 {
        self.ram
    }

    pub fn current_requested_bw(&self) -> f64 {
        self.bw
    }

    /// Returns the current CPU demand as a fraction of the VM capacity.
    pub fn total_utilization_of_cpu(&self, time: f64) -> f64 {
        self.cloudlet_scheduler.total_utilization_of_cpu(time)
    }

    /// Returns the current CPU demand in MIPS.
    pub fn total_utilization_of_cpu_mips(&self, time: f64) -> f64 {
        self.total_utilization_of_cpu(time) * self.total_mips()
    }

    /// Accepts a cloudlet for execution, returns the estimated relative completion time.
    pub fn submit_cloudlet(&mut self, cloudlet: Cloudlet, time: f64) -> f64 {
        self.cloudlet_scheduler.submit(cloudlet, time)
    }

    /// Removes and returns the cloudlets completed since the last call.
    pub fn take_finished_cloudlets(&mut self) -> Vec<Cloudlet> {
        self.cloudlet_scheduler.take_finished()
    }

    pub fn running_cloudlet_count(&self) -> usize {
        self.cloudlet_scheduler.running_count()
    }

    /// Advances the cloudlet execution up to the given time using the allocated MIPS share.
    ///
    /// Appends a sample to the utilization history once per advancing invocation.
    /// Returns the absolute time of the next expected cloudlet completion or `f64::INFINITY`.
    pub fn update_processing(&mut self, time: f64, mips_share: &[f64]) -> f64 {
        let next = self.cloudlet_scheduler.update_processing(time, mips_share);
        if time > self.previous_time {
            let utilization = self.total_utilization_of_cpu(self.cloudlet_scheduler.previous_time());
            if time != 0. || utilization != 0. {
                self.add_utilization_history_value(utilization);
            }
            self.previous_time = time;
        }
        next
    }

    fn add_utilization_history_value(&mut self, utilization: f64) {
        self.utilization_history.push_front(utilization.min(1.));
        self.utilization_history.truncate(HISTORY_LENGTH);
    }

    /// CPU utilization samples, the most recent first.
    pub fn utilization_history(&self) -> &VecDeque<f64> {
        &self.utilization_history
    }

    /// Appends a state history entry, replacing the previous one if it has the same time.
    pub fn add_state_history_entry(&mut self, time: f64, allocated_mips: f64, requested_mips: f64, in_migration: bool) {
        let entry = VmStateHistoryEntry {
            time,
            allocated_mips,
            requested_mips,
            in_migration,
        };
        if let Some(last) = self.state_history.last_mut() {
            if last.time == time {
                *last = entry;
                return;
            }
        }
        self.state_history.push(entry);
    }

    pub fn state_history(&self) -> &[VmStateHistoryEntry] {
        &self.state_history
    }
}
