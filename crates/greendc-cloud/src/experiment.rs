//! Tools for computing experiment metrics and running experiment batches.

use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use threadpool::ThreadPool;

use crate::core::datacenter::Datacenter;
use crate::core::vm_registry::VmRegistry;

/// Per-run metrics persisted as one CSV row.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub experiment_name: String,
    pub simulation_time: f64,
    pub energy_ws: f64,
    pub migrations: u32,
    /// Fraction of active host time spent overloaded (demand above capacity).
    pub sla_overload_time_fraction: f64,
    /// Overall fraction of the VM demand lost to live migrations.
    pub sla_degradation_due_to_migration: f64,
    /// Combined SLA violation metric, the product of the two above.
    pub sla_violation: f64,
}

impl MetricsSummary {
    /// Computes the metrics of a finished run from the datacenter state histories.
    pub fn compute(experiment_name: &str, simulation_time: f64, datacenter: &Datacenter, registry: &VmRegistry) -> Self {
        let overload_time_fraction = sla_time_per_active_host(datacenter);
        let degradation = sla_degradation_due_to_migration(registry);
        Self {
            experiment_name: experiment_name.to_string(),
            simulation_time,
            energy_ws: datacenter.energy_consumed(),
            migrations: datacenter.migration_count(),
            sla_overload_time_fraction: overload_time_fraction,
            sla_degradation_due_to_migration: degradation,
            sla_violation: overload_time_fraction * degradation,
        }
    }
}

/// Fraction of the total active host time during which the demand exceeded the allocation.
fn sla_time_per_active_host(datacenter: &Datacenter) -> f64 {
    let mut total_active_time = 0.;
    let mut total_overloaded_time = 0.;
    for host_id in datacenter.hosts().ids() {
        let host = datacenter.hosts().get(host_id);
        let history = host.state_history();
        for pair in history.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            if !previous.is_active {
                continue;
            }
            let time_diff = next.time - previous.time;
            total_active_time += time_diff;
            if previous.requested_mips > previous.allocated_mips {
                total_overloaded_time += time_diff;
            }
        }
    }
    if total_active_time == 0. {
        0.
    } else {
        total_overloaded_time / total_active_time
    }
}

/// Overall fraction of the requested VM MIPS not served while the VMs were migrating.
fn sla_degradation_due_to_migration(registry: &VmRegistry) -> f64 {
    let mut total_requested = 0.;
    let mut total_under_allocated = 0.;
    for vm_id in registry.vm_ids() {
        let vm_rc = registry.get(vm_id);
        let vm = vm_rc.borrow();
        let history = vm.state_history();
        for pair in history.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            let time_diff = next.time - previous.time;
            total_requested += previous.requested_mips * time_diff;
            if previous.in_migration {
                total_under_allocated += (previous.requested_mips - previous.allocated_mips).max(0.) * time_diff;
            }
        }
    }
    if total_requested == 0. {
        0.
    } else {
        total_under_allocated / total_requested
    }
}

/// Initializes logging for experiment runs, safe to call multiple times.
pub fn init_logger() {
    let _ = env_logger::builder().try_init();
}

/// Writes metric rows into a pretty-printed JSON file.
pub fn write_metrics_json<P: AsRef<Path>>(path: P, metrics: &[MetricsSummary]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    serde_json::to_writer_pretty(&mut file, metrics)?;
    Ok(())
}

/// Writes metric rows into a CSV file.
pub fn write_metrics_csv<P: AsRef<Path>>(path: P, metrics: &[MetricsSummary]) -> csv::Result<()> {
    let file = File::create(path).map_err(csv::Error::from)?;
    let mut writer = csv::Writer::from_writer(file);
    for row in metrics {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Runs independent simulation runs on a thread pool and collects their metrics.
///
/// Each run builds and executes its own simulation inside the worker thread, so the
/// determinism of individual runs is preserved.
pub struct Experiment {
    run_count: usize,
    run: Arc<dyn Fn(usize) -> MetricsSummary + Send + Sync>,
    csv_path: Option<String>,
}

impl Experiment {
    pub fn new<F>(run_count: usize, run: F, csv_path: Option<String>) -> Self
    where
        F: Fn(usize) -> MetricsSummary + Send + Sync + 'static,
    {
        Self {
            run_count,
            run: Arc::new(run),
            csv_path,
        }
    }

    /// Runs the experiment using the specified number of threads, returns the metrics
    /// ordered by run id.
    pub fn run(&self, num_threads: usize) -> Vec<MetricsSummary> {
        let results = Arc::new(Mutex::new(Vec::new()));
        let pool = ThreadPool::new(num_threads);
        for run_id in 0..self.run_count {
            let run = self.run.clone();
            let results = results.clone();
            pool.execute(move || {
                let summary = run(run_id);
                results.lock().unwrap().push((run_id, summary));
            });
        }
        pool.join();
        let mut collected = Arc::try_unwrap(results).unwrap().into_inner().unwrap();
        collected.sort_by_key(|(run_id, _)| *run_id);
        let metrics: Vec<MetricsSummary> = collected.into_iter().map(|(_, summary)| summary).collect();
        if let Some(path) = &self.csv_path {
            write_metrics_csv(path, &metrics).expect("Failed to write experiment results");
        }
        metrics
    }
}
