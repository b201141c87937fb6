//! Common interface of workload dataset readers.

/// A single job of an external workload trace.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadJob {
    pub id: u32,
    /// Submission time in seconds from the trace start.
    pub submit_time: f64,
    /// Run time in seconds.
    pub run_time: f64,
    /// Number of allocated processors.
    pub pe_count: u32,
    /// Requested memory, zero if the trace does not provide it.
    pub ram: f64,
    /// Requested bandwidth, zero if the trace does not provide it.
    pub bw: f64,
}

/// Iterator-style access to workload traces.
pub trait WorkloadReader {
    fn next_job(&mut self) -> Option<WorkloadJob>;
}
