//! Capacity arithmetic shared by the scaling policies.

use serde::Serialize;

use sloguard_core::{MetricRef, ScalingPolicy};

/// Period used to read a raw series when the policy does not name one.
pub const DEFAULT_METRIC_PERIOD_SECS: u64 = 60;

/// Capacity bounds in force for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub min: u32,
    pub max: u32,
}

impl Bounds {
    pub fn clamp(&self, capacity: u32) -> u32 {
        capacity.clamp(self.min, self.max)
    }
}

/// What one policy asked for this tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub policy: String,
    pub desired: u32,
}

/// `round(current * value / target)`; `None` when the inputs do not give
/// a usable capacity.
pub fn proportional_capacity(current: u32, value: f64, target: f64) -> Option<u32> {
    if target <= 0.0 || !value.is_finite() || value < 0.0 {
        return None;
    }
    let desired = (current as f64 * value / target).round();
    if desired.is_finite() && desired <= u32::MAX as f64 {
        Some(desired as u32)
    } else {
        None
    }
}

/// Bucket width used to resolve `metric` for a scaling decision.
pub fn metric_period(metric: &MetricRef) -> u64 {
    match metric {
        MetricRef::Composite(def) => def.period_secs,
        MetricRef::Series(_) => DEFAULT_METRIC_PERIOD_SECS,
    }
}

/// Per-direction cooldowns: the longest configured by any target-tracking
/// policy, since cooldowns apply to the target rather than to one policy.
pub fn cooldowns(policies: &[ScalingPolicy]) -> (u64, u64) {
    policies.iter().fold((0, 0), |(scale_in, scale_out), p| match p {
        ScalingPolicy::TargetTracking {
            scale_in_cooldown_secs,
            scale_out_cooldown_secs,
            ..
        } => (
            scale_in.max(*scale_in_cooldown_secs),
            scale_out.max(*scale_out_cooldown_secs),
        ),
        _ => (scale_in, scale_out),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sloguard_core::{SeriesRef, SeriesSelector, Statistic};

    #[test]
    fn cpu_example() {
        assert_eq!(proportional_capacity(4, 91.0, 70.0), Some(5));
    }

    #[test]
    fn rounds_to_nearest() {
        assert_eq!(proportional_capacity(4, 78.75, 70.0), Some(5)); // 4.5
        assert_eq!(proportional_capacity(4, 78.0, 70.0), Some(4)); // 4.46
        assert_eq!(proportional_capacity(10, 20.0, 70.0), Some(3)); // 2.86
    }

    #[test]
    fn rejects_unusable_inputs() {
        assert_eq!(proportional_capacity(4, f64::NAN, 70.0), None);
        assert_eq!(proportional_capacity(4, -1.0, 70.0), None);
        assert_eq!(proportional_capacity(4, 50.0, 0.0), None);
    }

    #[test]
    fn bounds_clamp() {
        let b = Bounds { min: 2, max: 10 };
        assert_eq!(b.clamp(0), 2);
        assert_eq!(b.clamp(11), 10);
        assert_eq!(b.clamp(5), 5);
    }

    #[test]
    fn cooldowns_take_longest() {
        let metric = MetricRef::Series(SeriesRef::new(
            SeriesSelector::new("CPUUtilization"),
            Statistic::Avg,
        ));
        let tt = |name: &str, scale_in, scale_out| ScalingPolicy::TargetTracking {
            name: name.to_string(),
            metric: metric.clone(),
            target_value: 70.0,
            scale_in_cooldown_secs: scale_in,
            scale_out_cooldown_secs: scale_out,
        };
        let policies = vec![tt("cpu", 300, 60), tt("mem", 120, 300)];
        assert_eq!(cooldowns(&policies), (300, 300));
        assert_eq!(cooldowns(&[]), (0, 0));
    }
}
