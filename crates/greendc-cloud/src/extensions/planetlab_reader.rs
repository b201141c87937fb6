//! Reader of PlanetLab CPU utilization traces.
//!
//! Each file holds the CPU utilization of one VM sampled every 300 seconds over 24 hours:
//! 288 integers in `[0, 100]`, one per line. The file name identifies the VM.

use std::fs;
use std::path::Path;

use crate::core::utilization_model::UtilizationModelTrace;

/// Sampling period of the PlanetLab traces, in seconds.
pub const PLANETLAB_INTERVAL: f64 = 300.;

/// Reads a single trace file into utilization fractions.
pub fn read_trace<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<f64>> {
    let content = fs::read_to_string(path)?;
    let mut samples = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed.parse().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("bad utilization value: {}", e))
        })?;
        samples.push((value / 100.).clamp(0., 1.));
    }
    Ok(samples)
}

/// Builds a utilization model from a single trace file.
pub fn read_utilization_model<P: AsRef<Path>>(path: P) -> std::io::Result<UtilizationModelTrace> {
    Ok(UtilizationModelTrace::new(read_trace(path)?, PLANETLAB_INTERVAL))
}

/// Reads all trace files of a directory (one day of data), sorted by file name so the
/// result order is deterministic. Returns pairs of the VM identifier and its samples.
pub fn read_trace_dir<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<(String, Vec<f64>)>> {
    let mut entries: Vec<_> = fs::read_dir(path)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|entry| entry.path().is_file())
        .collect();
    entries.sort_by_key(|entry| entry.file_name());
    let mut traces = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let samples = read_trace(entry.path())?;
        traces.push((name, samples));
    }
    Ok(traces)
}
