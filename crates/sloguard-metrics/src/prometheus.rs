//! Prometheus text exposition format.
//!
//! Renders alarm state, target capacity and the latest value of every
//! ingested series for scraping by a Prometheus server.

use sloguard_core::{AlarmStateValue, SeriesSelector};
use sloguard_state::AlarmState;

use crate::store::SeriesPoint;

/// Current capacity of one scalable target.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityGauge {
    pub resource_id: String,
    pub capacity: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
}

/// Render control-plane state into Prometheus text format.
pub fn render_prometheus(
    alarms: &[AlarmState],
    capacities: &[CapacityGauge],
    series: &[SeriesPoint],
) -> String {
    let mut out = String::new();

    out.push_str("# HELP sloguard_alarm_state Alarm state (1 for the current state).\n");
    out.push_str("# TYPE sloguard_alarm_state gauge\n");
    for a in alarms {
        for state in [
            AlarmStateValue::Ok,
            AlarmStateValue::Alarm,
            AlarmStateValue::InsufficientData,
        ] {
            let v = u8::from(a.current_state == state);
            out.push_str(&format!(
                "sloguard_alarm_state{{alarm=\"{}\",state=\"{state}\"}} {v}\n",
                escape(&a.alarm_name)
            ));
        }
    }

    out.push_str("# HELP sloguard_alarm_breaching_periods Consecutive breaching periods.\n");
    out.push_str("# TYPE sloguard_alarm_breaching_periods gauge\n");
    for a in alarms {
        out.push_str(&format!(
            "sloguard_alarm_breaching_periods{{alarm=\"{}\"}} {}\n",
            escape(&a.alarm_name),
            a.consecutive_breaching_periods
        ));
    }

    out.push_str("# HELP sloguard_target_capacity Current capacity of a scalable target.\n");
    out.push_str("# TYPE sloguard_target_capacity gauge\n");
    for c in capacities {
        out.push_str(&format!(
            "sloguard_target_capacity{{resource_id=\"{}\"}} {}\n",
            escape(&c.resource_id),
            c.capacity
        ));
    }

    out.push_str("# HELP sloguard_target_capacity_bounds Configured capacity bounds.\n");
    out.push_str("# TYPE sloguard_target_capacity_bounds gauge\n");
    for c in capacities {
        let id = escape(&c.resource_id);
        out.push_str(&format!(
            "sloguard_target_capacity_bounds{{resource_id=\"{id}\",bound=\"min\"}} {}\n",
            c.min_capacity
        ));
        out.push_str(&format!(
            "sloguard_target_capacity_bounds{{resource_id=\"{id}\",bound=\"max\"}} {}\n",
            c.max_capacity
        ));
    }

    out.push_str("# HELP sloguard_series_last_value Latest sample of each ingested series.\n");
    out.push_str("# TYPE sloguard_series_last_value gauge\n");
    for p in series {
        out.push_str(&format!(
            "sloguard_series_last_value{{{}}} {}\n",
            series_labels(&p.selector),
            p.value
        ));
    }

    out
}

fn series_labels(selector: &SeriesSelector) -> String {
    let mut labels = vec![format!("metric=\"{}\"", escape(&selector.metric_name))];
    for (k, v) in &selector.dimensions {
        labels.push(format!("{}=\"{}\"", label_name(k), escape(v)));
    }
    labels.join(",")
}

/// Dimension keys become label names; anything outside `[a-zA-Z0-9_]` is
/// replaced with `_`.
fn label_name(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
