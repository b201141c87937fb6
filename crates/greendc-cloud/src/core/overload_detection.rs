//! Host overload detection policies.

use crate::core::host::Host;
use crate::core::math;
use crate::core::vm_registry::VmRegistry;

/// Minimum number of utilization history samples required by the statistical detectors.
const MIN_HISTORY_LENGTH: usize = 12;

/// Number of latest samples used by the local-regression detector.
const REGRESSION_LENGTH: usize = 10;

/// Predicate deciding whether a host is overloaded.
///
/// Detectors are pure functions of the host utilization history and the current demand, so
/// they can be evaluated speculatively during placement without extra bookkeeping.
pub trait OverloadDetector {
    fn is_host_overloaded(&self, host: &Host, registry: &VmRegistry, now: f64) -> bool;

    /// The detector-specific threshold or prediction recorded by the policy history.
    fn utilization_metric(&self, host: &Host, registry: &VmRegistry, now: f64) -> f64;
}

fn requested_utilization(host: &Host, registry: &VmRegistry) -> f64 {
    let total_requested: f64 = host
        .vm_ids()
        .iter()
        .map(|&vm_id| registry.get(vm_id).borrow().current_requested_total_mips())
        .sum();
    total_requested / host.total_mips()
}

/// Host is overloaded when the requested CPU utilization exceeds a fixed threshold.
pub struct StaticThresholdDetector {
    threshold: f64,
}

impl StaticThresholdDetector {
    pub fn new(threshold: f64) -> Self {
        assert!((0. ..=1.).contains(&threshold));
        Self { threshold }
    }
}

impl OverloadDetector for StaticThresholdDetector {
    fn is_host_overloaded(&self, host: &Host, registry: &VmRegistry, _now: f64) -> bool {
        requested_utilization(host, registry) > self.threshold
    }

    fn utilization_metric(&self, _host: &Host, _registry: &VmRegistry, _now: f64) -> f64 {
        self.threshold
    }
}

/// Adaptive threshold based on the median absolute deviation of the host utilization
/// history: `1 - safety * MAD`. Falls back to another detector while the history is short.
pub struct MadDetector {
    safety: f64,
    fallback: Box<dyn OverloadDetector>,
}

impl MadDetector {
    pub fn new(safety: f64, fallback: Box<dyn OverloadDetector>) -> Self {
        assert!(safety >= 0.);
        Self { safety, fallback }
    }

    fn threshold(&self, host: &Host, registry: &VmRegistry) -> Option<f64> {
        let history = host.utilization_history(registry);
        if history.len() < MIN_HISTORY_LENGTH {
            return None;
        }
        Some(1. - self.safety * math::mad(&history))
    }
}

impl OverloadDetector for MadDetector {
    fn is_host_overloaded(&self, host: &Host, registry: &VmRegistry, now: f64) -> bool {
        match self.threshold(host, registry) {
            Some(threshold) => requested_utilization(host, registry) > threshold,
            None => self.fallback.is_host_overloaded(host, registry, now),
        }
    }

    fn utilization_metric(&self, host: &Host, registry: &VmRegistry, now: f64) -> f64 {
        self.threshold(host, registry)
            .unwrap_or_else(|| self.fallback.utilization_metric(host, registry, now))
    }
}

/// Adaptive threshold based on the interquartile range of the host utilization history:
/// `1 - safety * IQR`. Falls back to another detector while the history is short.
pub struct IqrDetector {
    safety: f64,
    fallback: Box<dyn OverloadDetector>,
}

impl IqrDetector {
    pub fn new(safety: f64, fallback: Box<dyn OverloadDetector>) -> Self {
        assert!(safety >= 0.);
        Self { safety, fallback }
    }

    fn threshold(&self, host: &Host, registry: &VmRegistry) -> Option<f64> {
        let history = host.utilization_history(registry);
        if history.len() < MIN_HISTORY_LENGTH {
            return None;
        }
        Some(1. - self.safety * math::iqr(&history))
    }
}

impl OverloadDetector for IqrDetector {
    fn is_host_overloaded(&self, host: &Host, registry: &VmRegistry, now: f64) -> bool {
        match self.threshold(host, registry) {
            Some(threshold) => requested_utilization(host, registry) > threshold,
            None => self.fallback.is_host_overloaded(host, registry, now),
        }
    }

    fn utilization_metric(&self, host: &Host, registry: &VmRegistry, now: f64) -> f64 {
        self.threshold(host, registry)
            .unwrap_or_else(|| self.fallback.utilization_metric(host, registry, now))
    }
}

/// Predicts the utilization by extrapolating a local linear trend fitted over the latest
/// history window, looking ahead by the worst-case migration time. The host is overloaded
/// when the safety-scaled prediction reaches 100%. Falls back to another detector while the
/// history is short.
pub struct LocalRegressionDetector {
    safety: f64,
    scheduling_interval: f64,
    fallback: Box<dyn OverloadDetector>,
}

impl LocalRegressionDetector {
    pub fn new(safety: f64, scheduling_interval: f64, fallback: Box<dyn OverloadDetector>) -> Self {
        assert!(safety >= 1.);
        assert!(scheduling_interval > 0.);
        Self {
            safety,
            scheduling_interval,
            fallback,
        }
    }

    fn max_vm_migration_time(&self, host: &Host, registry: &VmRegistry) -> f64 {
        let max_ram = host
            .vm_ids()
            .iter()
            .map(|&vm_id| registry.get(vm_id).borrow().ram())
            .fold(0., f64::max);
        max_ram / (host.bw_capacity() / (2. * 8.))
    }

    fn predicted_utilization(&self, host: &Host, registry: &VmRegistry) -> Option<f64> {
        let history = host.utilization_history(registry);
        if history.len() < REGRESSION_LENGTH {
            return None;
        }
        // the latest samples, oldest first
        let window: Vec<f64> = history.iter().take(REGRESSION_LENGTH).rev().cloned().collect();
        let (intercept, slope) = math::loess_estimates(&window);
        let migration_intervals = (self.max_vm_migration_time(host, registry) / self.scheduling_interval).ceil();
        let predicted = intercept + slope * (REGRESSION_LENGTH as f64 + migration_intervals);
        Some(predicted * self.safety)
    }
}

impl OverloadDetector for LocalRegressionDetector {
    fn is_host_overloaded(&self, host: &Host, registry: &VmRegistry, now: f64) -> bool {
        match self.predicted_utilization(host, registry) {
            Some(predicted) => predicted >= 1.,
            None => self.fallback.is_host_overloaded(host, registry, now),
        }
    }

    fn utilization_metric(&self, host: &Host, registry: &VmRegistry, now: f64) -> f64 {
        self.predicted_utilization(host, registry)
            .unwrap_or_else(|| self.fallback.utilization_metric(host, registry, now))
    }
}
