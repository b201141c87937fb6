//! Reader of workload traces in the Standard Workload Format (SWF).

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::extensions::dataset_reader::{WorkloadJob, WorkloadReader};

/// Parses SWF traces: ASCII lines of 18 whitespace-separated columns, `;` starting a
/// comment line. Only the job id, submit time, run time and processor count columns are
/// used. Jobs with a non-positive run time or processor count are discarded.
///
/// Files with the `.gz` extension are decompressed transparently.
pub struct SwfReader {
    jobs: Vec<WorkloadJob>,
    position: usize,
    /// MIPS rating of a trace processor, converts run times into cloudlet lengths.
    rating: f64,
}

impl SwfReader {
    pub fn from_file<P: AsRef<Path>>(path: P, rating: f64) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut jobs = Vec::new();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(';') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() < 5 {
                log::warn!("swf: skipping malformed line: {}", trimmed);
                continue;
            }
            let parsed = (
                fields[0].parse::<u32>(),
                fields[1].parse::<f64>(),
                fields[3].parse::<f64>(),
                fields[4].parse::<i64>(),
            );
            let (id, submit_time, run_time, pe_count) = match parsed {
                (Ok(id), Ok(submit), Ok(run), Ok(procs)) => (id, submit, run, procs),
                _ => {
                    log::warn!("swf: skipping malformed line: {}", trimmed);
                    continue;
                }
            };
            if run_time <= 0. || pe_count <= 0 {
                continue;
            }
            jobs.push(WorkloadJob {
                id,
                submit_time,
                run_time,
                pe_count: pe_count as u32,
                ram: 0.,
                bw: 0.,
            });
        }
        Ok(Self {
            jobs,
            position: 0,
            rating,
        })
    }

    /// Converts a run time in seconds into a cloudlet length in MI.
    pub fn length_of(&self, job: &WorkloadJob) -> f64 {
        job.run_time * self.rating
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

impl WorkloadReader for SwfReader {
    fn next_job(&mut self) -> Option<WorkloadJob> {
        if self.position < self.jobs.len() {
            let job = self.jobs[self.position].clone();
            self.position += 1;
            Some(job)
        } else {
            None
        }
    }
}
