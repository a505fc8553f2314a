//! Single-alarm state machine.

use sloguard_core::{AlarmSpec, AlarmStateValue, Timestamp, TreatMissingData};
use sloguard_notify::AlarmTransition;
use sloguard_state::AlarmState;

/// One alarm's spec together with the state it exclusively owns.
///
/// [`evaluate`](Self::evaluate) is the only mutation path.
#[derive(Debug, Clone)]
pub struct AlarmStateMachine {
    spec: AlarmSpec,
    state: AlarmState,
}

impl AlarmStateMachine {
    /// Fresh machine in OK with no history.
    pub fn new(spec: AlarmSpec) -> Self {
        let state = AlarmState::new(&spec.name);
        Self { spec, state }
    }

    /// Resume from a persisted state.
    pub fn restore(spec: AlarmSpec, state: AlarmState) -> Self {
        Self { spec, state }
    }

    pub fn spec(&self) -> &AlarmSpec {
        &self.spec
    }

    pub fn state(&self) -> &AlarmState {
        &self.state
    }

    /// Whether a tick for the period ending at `period_end` would be new.
    pub fn is_new_period(&self, period_end: Timestamp) -> bool {
        self.state
            .last_evaluated_time
            .is_none_or(|last| period_end > last)
    }

    /// Apply one tick for the period ending at `period_end`.
    ///
    /// `observation` is `None` when the period had no usable value. Returns
    /// the transition if the state changed. A period that was already
    /// evaluated is ignored.
    pub fn evaluate(
        &mut self,
        observation: Option<f64>,
        period_end: Timestamp,
    ) -> Option<AlarmTransition> {
        if !self.is_new_period(period_end) {
            return None;
        }
        self.state.last_evaluated_time = Some(period_end);

        let breached = match observation {
            Some(value) => {
                self.state.last_value = Some(value);
                self.spec.comparison.breaches(value, self.spec.threshold)
            }
            None => match self.spec.treat_missing_data {
                TreatMissingData::Breaching => true,
                TreatMissingData::NotBreaching => false,
                TreatMissingData::Ignore => return None,
                TreatMissingData::Missing => {
                    self.state.consecutive_breaching_periods = 0;
                    return self.transition(AlarmStateValue::InsufficientData, None, period_end);
                }
            },
        };

        let next = if breached {
            self.state.consecutive_breaching_periods =
                self.state.consecutive_breaching_periods.saturating_add(1);
            if self.state.consecutive_breaching_periods >= self.spec.evaluation_periods {
                AlarmStateValue::Alarm
            } else {
                self.state.current_state
            }
        } else {
            self.state.consecutive_breaching_periods = 0;
            AlarmStateValue::Ok
        };

        self.transition(next, observation, period_end)
    }

    fn transition(
        &mut self,
        next: AlarmStateValue,
        value: Option<f64>,
        now: Timestamp,
    ) -> Option<AlarmTransition> {
        let old = self.state.current_state;
        if old == next {
            return None;
        }
        self.state.current_state = next;
        self.state.last_transition_time = Some(now);
        Some(AlarmTransition {
            alarm_name: self.spec.name.clone(),
            old_state: old,
            new_state: next,
            breaching_value: value,
            timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sloguard_core::{Comparison, MetricRef, SeriesRef, SeriesSelector, Statistic};

    fn spec(n: u32, treat: TreatMissingData) -> AlarmSpec {
        AlarmSpec {
            name: "latency-slo".to_string(),
            metric: MetricRef::Series(SeriesRef::new(
                SeriesSelector::new("TargetResponseTime"),
                Statistic::P95,
            )),
            comparison: Comparison::GreaterThan,
            threshold: 0.5,
            evaluation_periods: n,
            period_secs: 60,
            treat_missing_data: treat,
        }
    }

    /// Feed observations on consecutive 60s periods; collect transitions.
    fn run(machine: &mut AlarmStateMachine, obs: &[Option<f64>]) -> Vec<AlarmTransition> {
        let start = machine.state().last_evaluated_time.unwrap_or(0);
        obs.iter()
            .enumerate()
            .filter_map(|(i, o)| machine.evaluate(*o, start + 60 * (i as u64 + 1)))
            .collect()
    }

    #[test]
    fn n_minus_one_breaches_do_not_alarm() {
        for n in 1..=5 {
            let mut m = AlarmStateMachine::new(spec(n, TreatMissingData::Missing));
            let breaches = vec![Some(0.9); n as usize - 1];
            assert!(run(&mut m, &breaches).is_empty(), "n = {n}");

            let fired = run(&mut m, &[Some(0.9)]);
            assert_eq!(fired.len(), 1, "n = {n}");
            assert_eq!(fired[0].new_state, AlarmStateValue::Alarm);
            assert_eq!(fired[0].breaching_value, Some(0.9));
        }
    }

    #[test]
    fn alarm_is_sticky() {
        let mut m = AlarmStateMachine::new(spec(2, TreatMissingData::Missing));
        let fired = run(&mut m, &[Some(0.9); 10]);
        assert_eq!(fired.len(), 1);
        assert_eq!(m.state().current_state, AlarmStateValue::Alarm);
        assert_eq!(m.state().consecutive_breaching_periods, 10);
    }

    #[test]
    fn recovery_notifies_once() {
        let mut m = AlarmStateMachine::new(spec(1, TreatMissingData::Missing));
        run(&mut m, &[Some(0.9)]);
        let fired = run(&mut m, &[Some(0.1), Some(0.1), Some(0.2)]);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].old_state, AlarmStateValue::Alarm);
        assert_eq!(fired[0].new_state, AlarmStateValue::Ok);
    }

    #[test]
    fn interrupted_streak_resets_counter() {
        let mut m = AlarmStateMachine::new(spec(3, TreatMissingData::Missing));
        let fired = run(&mut m, &[Some(0.9), Some(0.9), Some(0.1), Some(0.9), Some(0.9)]);
        assert!(fired.is_empty());
        assert_eq!(m.state().consecutive_breaching_periods, 2);
    }

    #[test]
    fn missing_goes_insufficient_data() {
        let mut m = AlarmStateMachine::new(spec(3, TreatMissingData::Missing));
        run(&mut m, &[Some(0.9), Some(0.9)]);
        let fired = run(&mut m, &[None]);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].new_state, AlarmStateValue::InsufficientData);
        assert_eq!(fired[0].breaching_value, None);
        assert_eq!(m.state().consecutive_breaching_periods, 0);

        // Still missing: no second notification.
        assert!(run(&mut m, &[None]).is_empty());
    }

    #[test]
    fn insufficient_data_recovers_to_ok() {
        let mut m = AlarmStateMachine::new(spec(2, TreatMissingData::Missing));
        run(&mut m, &[None]);
        let fired = run(&mut m, &[Some(0.1)]);
        assert_eq!(fired[0].old_state, AlarmStateValue::InsufficientData);
        assert_eq!(fired[0].new_state, AlarmStateValue::Ok);
    }

    #[test]
    fn missing_as_breaching() {
        let mut m = AlarmStateMachine::new(spec(2, TreatMissingData::Breaching));
        let fired = run(&mut m, &[None, None]);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].new_state, AlarmStateValue::Alarm);
        assert_eq!(fired[0].breaching_value, None);
    }

    #[test]
    fn missing_as_not_breaching() {
        let mut m = AlarmStateMachine::new(spec(2, TreatMissingData::NotBreaching));
        run(&mut m, &[Some(0.9)]);
        run(&mut m, &[None]);
        assert_eq!(m.state().consecutive_breaching_periods, 0);
        assert_eq!(m.state().current_state, AlarmStateValue::Ok);
    }

    #[test]
    fn ignore_skips_tick_entirely() {
        let mut m = AlarmStateMachine::new(spec(3, TreatMissingData::Ignore));
        run(&mut m, &[Some(0.9), Some(0.9)]);
        assert!(run(&mut m, &[None, None]).is_empty());
        assert_eq!(m.state().consecutive_breaching_periods, 2);

        let fired = run(&mut m, &[Some(0.9)]);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].new_state, AlarmStateValue::Alarm);
    }

    #[test]
    fn same_period_twice_is_noop() {
        let mut m = AlarmStateMachine::new(spec(1, TreatMissingData::Missing));
        assert!(m.evaluate(Some(0.9), 60).is_some());
        assert!(m.evaluate(Some(0.9), 60).is_none());
        assert!(m.evaluate(Some(0.1), 60).is_none());
        assert!(m.evaluate(Some(0.1), 30).is_none());
        assert_eq!(m.state().current_state, AlarmStateValue::Alarm);
        assert_eq!(m.state().consecutive_breaching_periods, 1);
    }

    #[test]
    fn transition_time_recorded() {
        let mut m = AlarmStateMachine::new(spec(1, TreatMissingData::Missing));
        m.evaluate(Some(0.9), 120);
        m.evaluate(Some(0.9), 180);
        assert_eq!(m.state().last_transition_time, Some(120));
        assert_eq!(m.state().last_evaluated_time, Some(180));
    }
}
