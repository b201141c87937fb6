//! Schedulers splitting the VM processing capacity across its cloudlets.

use crate::core::cloudlet::{Cloudlet, CloudletStatus};

/// Scheduler owning the cloudlets of a single VM.
///
/// The scheduler receives the per-PE MIPS share allocated to the VM by the host and advances
/// the execution of its cloudlets, reporting the time of the next expected completion.
pub trait CloudletScheduler {
    /// Accepts a cloudlet for execution, returns the estimated time to its completion
    /// relative to the current time (infinite if it cannot be estimated yet).
    fn submit(&mut self, cloudlet: Cloudlet, time: f64) -> f64;

    /// Advances the execution of cloudlets up to the given time using the new MIPS share.
    ///
    /// The work done since the previous invocation is accounted at the previously allocated
    /// share. Returns the absolute time of the next expected cloudlet completion, or
    /// `f64::INFINITY` if there is none.
    fn update_processing(&mut self, time: f64, mips_share: &[f64]) -> f64;

    /// Returns the per-PE MIPS amounts currently requested by this VM.
    fn current_requested_mips(&self) -> Vec<f64>;

    /// Returns the total CPU demand of cloudlets as a fraction of the VM capacity.
    fn total_utilization_of_cpu(&self, time: f64) -> f64;

    /// Removes and returns the cloudlets completed since the last call.
    fn take_finished(&mut self) -> Vec<Cloudlet>;

    /// Returns the number of cloudlets currently in execution.
    fn running_count(&self) -> usize;

    fn previous_time(&self) -> f64;
}

fn mips_for_cloudlet(mips_share: &[f64], pe_count: u32) -> f64 {
    mips_share.iter().take(pe_count as usize).sum()
}

/// Scheduler driven by the cloudlet utilization models.
///
/// The MIPS demand of the VM is the sum of its cloudlets' utilization fractions applied to
/// the full VM capacity and spread evenly over the VM PEs. A VM with no cloudlets demands
/// nothing.
pub struct CloudletSchedulerDynamic {
    mips: f64,
    pe_count: u32,
    previous_time: f64,
    current_mips_share: Vec<f64>,
    exec_list: Vec<Cloudlet>,
    finished_list: Vec<Cloudlet>,
}

impl CloudletSchedulerDynamic {
    /// Creates scheduler for a VM with the given per-PE MIPS and PE count.
    pub fn new(mips: f64, pe_count: u32) -> Self {
        Self {
            mips,
            pe_count,
            previous_time: 0.,
            current_mips_share: Vec::new(),
            exec_list: Vec::new(),
            finished_list: Vec::new(),
        }
    }

    fn total_mips(&self) -> f64 {
        self.mips * self.pe_count as f64
    }
}

impl CloudletScheduler for CloudletSchedulerDynamic {
    fn submit(&mut self, mut cloudlet: Cloudlet, time: f64) -> f64 {
        cloudlet.set_status(CloudletStatus::InExec);
        cloudlet.set_exec_start_time(time);
        let allocated = mips_for_cloudlet(&self.current_mips_share, cloudlet.pe_count());
        let estimate = if allocated > 0. {
            cloudlet.remaining_work() / allocated
        } else {
            f64::INFINITY
        };
        self.exec_list.push(cloudlet);
        estimate
    }

    fn update_processing(&mut self, time: f64, mips_share: &[f64]) -> f64 {
        let time_span = time - self.previous_time;
        for cloudlet in self.exec_list.iter_mut() {
            let allocated = mips_for_cloudlet(&self.current_mips_share, cloudlet.pe_count());
            cloudlet.advance(allocated * time_span);
        }
        self.current_mips_share = mips_share.to_vec();
        self.previous_time = time;

        let mut next_event = f64::INFINITY;
        let mut still_running = Vec::with_capacity(self.exec_list.len());
        for mut cloudlet in self.exec_list.drain(..) {
            if cloudlet.is_finished() {
                cloudlet.finish(time);
                self.finished_list.push(cloudlet);
            } else {
                let allocated = mips_for_cloudlet(&self.current_mips_share, cloudlet.pe_count());
                if allocated > 0. {
                    let estimate = time + cloudlet.remaining_work() / allocated;
                    if estimate < next_event {
                        next_event = estimate;
                    }
                }
                still_running.push(cloudlet);
            }
        }
        self.exec_list = still_running;
        next_event
    }

    fn current_requested_mips(&self) -> Vec<f64> {
        let total = self.total_utilization_of_cpu(self.previous_time) * self.total_mips();
        let mips_per_pe = total / self.pe_count as f64;
        vec![mips_per_pe; self.pe_count as usize]
    }

    fn total_utilization_of_cpu(&self, time: f64) -> f64 {
        self.exec_list.iter().map(|c| c.utilization_of_cpu(time)).sum()
    }

    fn take_finished(&mut self) -> Vec<Cloudlet> {
        std::mem::take(&mut self.finished_list)
    }

    fn running_count(&self) -> usize {
        self.exec_list.len()
    }

    fn previous_time(&self) -> f64 {
        self.previous_time
    }
}

/// Classic time-shared scheduler.
///
/// The capacity of the allocated share is split evenly across the running cloudlets.
/// The VM demands its full capacity while at least one cloudlet is running.
pub struct CloudletSchedulerTimeShared {
    mips: f64,
    pe_count: u32,
    previous_time: f64,
    current_mips_share: Vec<f64>,
    exec_list: Vec<Cloudlet>,
    finished_list: Vec<Cloudlet>,
}

impl CloudletSchedulerTimeShared {
    pub fn new(mips: f64, pe_count: u32) -> Self {
        Self {
            mips,
            pe_count,
            previous_time: 0.,
            current_mips_share: Vec::new(),
            exec_list: Vec::new(),
            finished_list: Vec::new(),
        }
    }

    /// Processing capacity available to a single cloudlet PE under the given share.
    fn capacity(&self, mips_share: &[f64]) -> f64 {
        let mut total = 0.;
        let mut cpus = 0;
        for &mips in mips_share {
            total += mips;
            if mips > 0. {
                cpus += 1;
            }
        }
        if cpus == 0 {
            return 0.;
        }
        let pes_in_use: u32 = self.exec_list.iter().map(|c| c.pe_count()).sum();
        total / pes_in_use.max(cpus) as f64
    }
}

impl CloudletScheduler for CloudletSchedulerTimeShared {
    fn submit(&mut self, mut cloudlet: Cloudlet, time: f64) -> f64 {
        cloudlet.set_status(CloudletStatus::InExec);
        cloudlet.set_exec_start_time(time);
        let capacity = self.capacity(&self.current_mips_share);
        let estimate = if capacity > 0. {
            cloudlet.remaining_work() / (capacity * cloudlet.pe_count() as f64)
        } else {
            f64::INFINITY
        };
        self.exec_list.push(cloudlet);
        estimate
    }

    fn update_processing(&mut self, time: f64, mips_share: &[f64]) -> f64 {
        let time_span = time - self.previous_time;
        let capacity = self.capacity(&self.current_mips_share);
        for cloudlet in self.exec_list.iter_mut() {
            cloudlet.advance(capacity * cloudlet.pe_count() as f64 * time_span);
        }
        self.current_mips_share = mips_share.to_vec();
        self.previous_time = time;

        let capacity = self.capacity(&self.current_mips_share);
        let mut next_event = f64::INFINITY;
        let mut still_running = Vec::with_capacity(self.exec_list.len());
        for mut cloudlet in self.exec_list.drain(..) {
            if cloudlet.is_finished() {
                cloudlet.finish(time);
                self.finished_list.push(cloudlet);
            } else {
                if capacity > 0. {
                    let estimate = time + cloudlet.remaining_work() / (capacity * cloudlet.pe_count() as f64);
                    if estimate < next_event {
                        next_event = estimate;
                    }
                }
                still_running.push(cloudlet);
            }
        }
        self.exec_list = still_running;
        next_event
    }

    fn current_requested_mips(&self) -> Vec<f64> {
        if self.exec_list.is_empty() {
            vec![0.; self.pe_count as usize]
        } else {
            vec![self.mips; self.pe_count as usize]
        }
    }

    fn total_utilization_of_cpu(&self, _time: f64) -> f64 {
        if self.exec_list.is_empty() {
            0.
        } else {
            1.
        }
    }

    fn take_finished(&mut self) -> Vec<Cloudlet> {
        std::mem::take(&mut self.finished_list)
    }

    fn running_count(&self) -> usize {
        self.exec_list.len()
    }

    fn previous_time(&self) -> f64 {
        self.previous_time
    }
}
