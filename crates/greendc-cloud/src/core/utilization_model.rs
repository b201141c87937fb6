//! CPU utilization models of cloudlets.

use dyn_clone::{clone_trait_object, DynClone};

/// A utilization model is a function of simulation time which defines the fraction of the
/// VM processing capacity demanded by a cloudlet at that moment, in `[0, 1]`.
pub trait UtilizationModel: DynClone {
    fn utilization(&self, time: f64) -> f64;
}

clone_trait_object!(UtilizationModel);

/// Cloudlet always demands the full capacity.
#[derive(Clone)]
pub struct UtilizationModelFull;

impl UtilizationModelFull {
    pub fn new() -> Self {
        Self {}
    }
}

impl UtilizationModel for UtilizationModelFull {
    fn utilization(&self, _time: f64) -> f64 {
        1.
    }
}

/// Cloudlet demands a constant fraction of the capacity.
#[derive(Clone)]
pub struct UtilizationModelConstant {
    utilization: f64,
}

impl UtilizationModelConstant {
    pub fn new(utilization: f64) -> Self {
        assert!((0. ..=1.).contains(&utilization));
        Self { utilization }
    }
}

impl UtilizationModel for UtilizationModelConstant {
    fn utilization(&self, _time: f64) -> f64 {
        self.utilization
    }
}

/// Utilization driven by a recorded trace sampled with a fixed period,
/// such as the PlanetLab CPU traces (288 samples per day, one per 300 seconds).
///
/// Utilization between two samples is obtained by linear interpolation.
#[derive(Clone)]
pub struct UtilizationModelTrace {
    samples: Vec<f64>,
    interval: f64,
}

impl UtilizationModelTrace {
    /// Creates a trace-driven model.
    ///
    /// * `samples` - utilization fractions in `[0, 1]`.
    /// * `interval` - sampling period in seconds.
    pub fn new(samples: Vec<f64>, interval: f64) -> Self {
        assert!(!samples.is_empty(), "Utilization trace cannot be empty");
        assert!(interval > 0.);
        Self { samples, interval }
    }
}

impl UtilizationModel for UtilizationModelTrace {
    fn utilization(&self, time: f64) -> f64 {
        let last = self.samples.len() - 1;
        let position = time / self.interval;
        let floor = (position.floor() as usize).min(last);
        let ceil = (position.ceil() as usize).min(last);
        if floor == ceil {
            return self.samples[floor];
        }
        let from = self.samples[floor];
        let to = self.samples[ceil];
        from + (to - from) * (position - floor as f64)
    }
}
