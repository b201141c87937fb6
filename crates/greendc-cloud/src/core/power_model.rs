//! Host power consumption models.

use dyn_clone::{clone_trait_object, DynClone};

/// A power model computes the power consumption of a host in Watts as a function of its CPU
/// utilization in `[0, 1]`.
///
/// A host with zero CPU utilization is considered switched off and consumes no power.
/// Utilization values in `(1, 1.01]` are accepted as `1.0` to tolerate cumulative rounding.
pub trait PowerModel: DynClone {
    fn power(&self, utilization: f64) -> f64;
}

clone_trait_object!(PowerModel);

pub(crate) fn validate_utilization(utilization: f64) -> f64 {
    assert!(
        (-1e-9..=1.01).contains(&utilization),
        "Utilization value {} is out of the [0, 1] range",
        utilization
    );
    utilization.clamp(0., 1.)
}

/// Linear power model.
///
/// An active host consumes the static fraction of its maximum power plus the rest scaled
/// linearly with the CPU utilization.
#[derive(Clone)]
pub struct PowerModelLinear {
    max_power: f64,
    static_power: f64,
}

impl PowerModelLinear {
    /// Creates a linear power model.
    ///
    /// * `max_power` - power consumption at 100% utilization in Watts.
    /// * `static_fraction` - fraction of `max_power` consumed by an idle active host.
    pub fn new(max_power: f64, static_fraction: f64) -> Self {
        assert!((0. ..=1.).contains(&static_fraction));
        Self {
            max_power,
            static_power: max_power * static_fraction,
        }
    }
}

impl PowerModel for PowerModelLinear {
    fn power(&self, utilization: f64) -> f64 {
        let utilization = validate_utilization(utilization);
        if utilization == 0. {
            return 0.;
        }
        self.static_power + (self.max_power - self.static_power) * utilization
    }
}

/// Piecewise-linear power model built from 11 measurements of the actual power consumption
/// at utilization levels from 0% to 100% with step 10%, such as the results published by the
/// SPECpower benchmark.
///
/// The power between two measurements is obtained by linear interpolation.
#[derive(Clone)]
pub struct PowerModelSpecPower {
    measurements: [f64; 11],
}

impl PowerModelSpecPower {
    pub fn new(measurements: [f64; 11]) -> Self {
        Self { measurements }
    }
}

impl PowerModel for PowerModelSpecPower {
    fn power(&self, utilization: f64) -> f64 {
        let utilization = validate_utilization(utilization);
        if utilization == 0. {
            return 0.;
        }
        let position = utilization * 10.;
        let floor = position.floor() as usize;
        let ceil = position.ceil() as usize;
        if floor == ceil {
            return self.measurements[floor];
        }
        let from = self.measurements[floor];
        let to = self.measurements[ceil];
        from + (to - from) * (position - floor as f64)
    }
}
