//! sloguard.toml configuration parser.
//!
//! The file is plain data (duration strings, expression strings, names);
//! the accessor methods compile it into domain types and report every
//! dangling reference or malformed value as a [`ConfigError`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::expr::parse_expression;
use crate::time::parse_duration;
use crate::types::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub control: LoopConfig,
    #[serde(default)]
    pub composites: Vec<CompositeConfig>,
    #[serde(default)]
    pub alarms: Vec<AlarmConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
}

/// Control loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_alarm_interval")]
    pub alarm_interval: String,
    #[serde(default = "default_autoscale_interval")]
    pub autoscale_interval: String,
    /// Journal every ingested sample to the state store.
    #[serde(default = "default_true")]
    pub journal_metrics: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            alarm_interval: default_alarm_interval(),
            autoscale_interval: default_autoscale_interval(),
            journal_metrics: true,
        }
    }
}

/// A metric reference as written in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricRefConfig {
    Series(SeriesRef),
    /// Name of a `[[composites]]` entry.
    Composite(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConfig {
    pub name: String,
    /// Infix expression over the operand ids, e.g. `100*(m4+m5)/(m1+m2+m3)`.
    pub expression: String,
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default)]
    pub operands: BTreeMap<String, MetricRefConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    pub name: String,
    pub metric: MetricRefConfig,
    pub comparison: Comparison,
    pub threshold: f64,
    #[serde(default = "default_evaluation_periods")]
    pub evaluation_periods: u32,
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default)]
    pub treat_missing_data: TreatMissingData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub resource_id: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    /// Starting capacity; defaults to `min_capacity`.
    pub initial_capacity: Option<u32>,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    TargetTracking {
        name: String,
        metric: MetricRefConfig,
        target_value: f64,
        #[serde(default = "default_scale_in_cooldown")]
        scale_in_cooldown: String,
        #[serde(default = "default_scale_out_cooldown")]
        scale_out_cooldown: String,
    },
    Scheduled {
        name: String,
        cron: String,
        #[serde(default = "default_period")]
        window: String,
        min_capacity: u32,
        max_capacity: u32,
    },
    Predictive {
        name: String,
        metric: MetricRefConfig,
        target_value: f64,
        #[serde(default = "default_buffer_time")]
        buffer_time: String,
        #[serde(default)]
        max_capacity_buffer: u32,
        #[serde(default)]
        max_capacity_breach_behavior: MaxCapacityBreachBehavior,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    /// Overrides the tier implied by the environment name.
    pub risk_tier: Option<RiskTier>,
    #[serde(default = "default_true")]
    pub circuit_breaker: bool,
    pub health_target: String,
    #[serde(default)]
    pub slo_alarms: Vec<String>,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout: String,
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
    #[serde(default = "default_verify_interval")]
    pub verify_interval: String,
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    #[serde(default = "default_alarm_window")]
    pub alarm_window: String,
}

fn default_true() -> bool {
    true
}
fn default_alarm_interval() -> String {
    "60s".to_string()
}
fn default_autoscale_interval() -> String {
    "30s".to_string()
}
fn default_period() -> String {
    "60s".to_string()
}
fn default_evaluation_periods() -> u32 {
    1
}
fn default_scale_in_cooldown() -> String {
    "300s".to_string()
}
fn default_scale_out_cooldown() -> String {
    "60s".to_string()
}
fn default_buffer_time() -> String {
    "5m".to_string()
}
fn default_confirmation_timeout() -> String {
    "15m".to_string()
}
fn default_apply_timeout() -> String {
    "30m".to_string()
}
fn default_probe_timeout() -> String {
    "5s".to_string()
}
fn default_verify_interval() -> String {
    "10s".to_string()
}
fn default_verify_attempts() -> u32 {
    30
}
fn default_alarm_window() -> String {
    "5m".to_string()
}

fn duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn secs(field: &str, value: &str) -> Result<u64, ConfigError> {
    duration(field, value).map(|d| d.as_secs())
}

impl ControlConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn alarm_interval(&self) -> Result<Duration, ConfigError> {
        duration("control.alarm_interval", &self.control.alarm_interval)
    }

    pub fn autoscale_interval(&self) -> Result<Duration, ConfigError> {
        duration("control.autoscale_interval", &self.control.autoscale_interval)
    }

    /// Compile every composite, resolving nested composite references.
    pub fn composites(&self) -> Result<BTreeMap<String, CompositeMetricDefinition>, ConfigError> {
        let mut compiled = BTreeMap::new();
        for c in &self.composites {
            let mut visiting = HashSet::new();
            self.compile_composite(&c.name, &mut visiting, &mut compiled)?;
        }
        Ok(compiled)
    }

    fn compile_composite(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        compiled: &mut BTreeMap<String, CompositeMetricDefinition>,
    ) -> Result<CompositeMetricDefinition, ConfigError> {
        if let Some(done) = compiled.get(name) {
            return Ok(done.clone());
        }
        let cfg = self
            .composites
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ConfigError::UnknownReference(format!("composite {name}")))?;
        if !visiting.insert(name.to_string()) {
            return Err(ConfigError::Expression {
                name: name.to_string(),
                message: "composite references itself".to_string(),
            });
        }

        let mut operands = BTreeMap::new();
        for (id, operand) in &cfg.operands {
            let expr = match operand {
                MetricRefConfig::Series(s) => Expr::Series(s.clone()),
                MetricRefConfig::Composite(inner) => Expr::Composite(Box::new(
                    self.compile_composite(inner, visiting, compiled)?,
                )),
            };
            operands.insert(id.clone(), expr);
        }

        let expression = parse_expression(&cfg.expression, |id| operands.get(id).cloned())
            .map_err(|e| ConfigError::Expression {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let definition = CompositeMetricDefinition {
            name: name.to_string(),
            expression,
            period_secs: secs(&format!("composites.{name}.period"), &cfg.period)?,
        };
        visiting.remove(name);
        compiled.insert(name.to_string(), definition.clone());
        Ok(definition)
    }

    fn resolve_metric(
        composites: &BTreeMap<String, CompositeMetricDefinition>,
        metric: &MetricRefConfig,
    ) -> Result<MetricRef, ConfigError> {
        match metric {
            MetricRefConfig::Series(s) => Ok(MetricRef::Series(s.clone())),
            MetricRefConfig::Composite(name) => composites
                .get(name)
                .cloned()
                .map(MetricRef::Composite)
                .ok_or_else(|| ConfigError::UnknownReference(format!("composite {name}"))),
        }
    }

    pub fn alarm_specs(&self) -> Result<Vec<AlarmSpec>, ConfigError> {
        let composites = self.composites()?;
        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(self.alarms.len());
        for a in &self.alarms {
            if !seen.insert(a.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate alarm {}", a.name)));
            }
            let spec = AlarmSpec {
                name: a.name.clone(),
                metric: Self::resolve_metric(&composites, &a.metric)?,
                comparison: a.comparison,
                threshold: a.threshold,
                evaluation_periods: a.evaluation_periods,
                period_secs: secs(&format!("alarms.{}.period", a.name), &a.period)?,
                treat_missing_data: a.treat_missing_data,
            };
            spec.validate()?;
            specs.push(spec);
        }
        Ok(specs)
    }

    pub fn scalable_targets(&self) -> Result<Vec<ScalableTargetSpec>, ConfigError> {
        let composites = self.composites()?;
        let mut specs = Vec::with_capacity(self.targets.len());
        for t in &self.targets {
            let mut policies = Vec::with_capacity(t.policies.len());
            for p in &t.policies {
                let policy = match p {
                    PolicyConfig::TargetTracking {
                        name,
                        metric,
                        target_value,
                        scale_in_cooldown,
                        scale_out_cooldown,
                    } => ScalingPolicy::TargetTracking {
                        name: name.clone(),
                        metric: Self::resolve_metric(&composites, metric)?,
                        target_value: *target_value,
                        scale_in_cooldown_secs: secs(
                            &format!("{name}.scale_in_cooldown"),
                            scale_in_cooldown,
                        )?,
                        scale_out_cooldown_secs: secs(
                            &format!("{name}.scale_out_cooldown"),
                            scale_out_cooldown,
                        )?,
                    },
                    PolicyConfig::Scheduled {
                        name,
                        cron,
                        window,
                        min_capacity,
                        max_capacity,
                    } => ScalingPolicy::Scheduled {
                        name: name.clone(),
                        cron_expr: cron.clone(),
                        window_secs: secs(&format!("{name}.window"), window)?,
                        min_capacity: *min_capacity,
                        max_capacity: *max_capacity,
                    },
                    PolicyConfig::Predictive {
                        name,
                        metric,
                        target_value,
                        buffer_time,
                        max_capacity_buffer,
                        max_capacity_breach_behavior,
                    } => ScalingPolicy::Predictive {
                        name: name.clone(),
                        target_metric: Self::resolve_metric(&composites, metric)?,
                        target_value: *target_value,
                        buffer_time_secs: secs(&format!("{name}.buffer_time"), buffer_time)?,
                        max_capacity_buffer: *max_capacity_buffer,
                        max_capacity_breach_behavior: *max_capacity_breach_behavior,
                    },
                };
                policies.push(policy);
            }

            let spec = ScalableTargetSpec {
                resource_id: t.resource_id.clone(),
                min_capacity: t.min_capacity,
                max_capacity: t.max_capacity,
                initial_capacity: t
                    .initial_capacity
                    .unwrap_or(t.min_capacity)
                    .clamp(t.min_capacity, t.max_capacity.max(t.min_capacity)),
                policies,
            };
            spec.validate()?;
            specs.push(spec);
        }
        Ok(specs)
    }

    pub fn environment_policies(&self) -> Result<Vec<EnvironmentPolicy>, ConfigError> {
        let alarm_names: HashSet<&str> = self.alarms.iter().map(|a| a.name.as_str()).collect();
        let mut policies = Vec::with_capacity(self.environments.len());
        for e in &self.environments {
            for alarm in &e.slo_alarms {
                if !alarm_names.contains(alarm.as_str()) {
                    return Err(ConfigError::UnknownReference(format!(
                        "environment {} watches unknown alarm {alarm}",
                        e.name
                    )));
                }
            }
            if e.verify_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "environment {}: verify_attempts must be >= 1",
                    e.name
                )));
            }
            let field = |f: &str| format!("environments.{}.{f}", e.name);
            policies.push(EnvironmentPolicy {
                name: e.name.clone(),
                risk_tier: e.risk_tier.unwrap_or_else(|| RiskTier::for_environment(&e.name)),
                circuit_breaker: e.circuit_breaker,
                health_target: e.health_target.clone(),
                slo_alarms: e.slo_alarms.clone(),
                confirmation_timeout: duration(
                    &field("confirmation_timeout"),
                    &e.confirmation_timeout,
                )?,
                apply_timeout: duration(&field("apply_timeout"), &e.apply_timeout)?,
                probe_timeout: duration(&field("probe_timeout"), &e.probe_timeout)?,
                verify_interval: duration(&field("verify_interval"), &e.verify_interval)?,
                verify_attempts: e.verify_attempts,
                alarm_window: duration(&field("alarm_window"), &e.alarm_window)?,
            });
        }
        Ok(policies)
    }

    /// Compile everything once, surfacing the first error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.alarm_interval()?;
        self.autoscale_interval()?;
        self.alarm_specs()?;
        self.scalable_targets()?;
        self.environment_policies()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[control]
alarm_interval = "60s"
autoscale_interval = "30s"

[[composites]]
name = "error_rate"
expression = "100*(m4+m5)/(m1+m2+m3)"
period = "5m"

[composites.operands.m1.series]
metric_name = "HTTPCode_Target_2XX_Count"
statistic = "sum"
dimensions = { LoadBalancer = "web" }

[composites.operands.m2.series]
metric_name = "HTTPCode_Target_3XX_Count"
statistic = "sum"

[composites.operands.m3.series]
metric_name = "HTTPCode_Target_4XX_Count"
statistic = "sum"

[composites.operands.m4.series]
metric_name = "HTTPCode_Target_5XX_Count"
statistic = "sum"

[composites.operands.m5.series]
metric_name = "HTTPCode_ELB_5XX_Count"
statistic = "sum"

[[alarms]]
name = "error-rate-slo"
metric = { composite = "error_rate" }
comparison = ">"
threshold = 0.1
evaluation_periods = 2
period = "5m"
treat_missing_data = "notBreaching"

[[alarms]]
name = "latency-slo"
metric = { series = { metric_name = "TargetResponseTime", statistic = "p95" } }
comparison = ">"
threshold = 0.5
evaluation_periods = 3

[[targets]]
resource_id = "service/web"
min_capacity = 2
max_capacity = 10

[[targets.policies]]
type = "target_tracking"
name = "cpu"
metric = { series = { metric_name = "CPUUtilization", statistic = "avg" } }
target_value = 70.0
scale_in_cooldown = "300s"
scale_out_cooldown = "300s"

[[targets.policies]]
type = "scheduled"
name = "business-hours"
cron = "0 8 * * 1-5"
window = "10h"
min_capacity = 4
max_capacity = 10

[[environments]]
name = "prod"
health_target = "10.0.0.10:8080/health"
slo_alarms = ["error-rate-slo", "latency-slo"]
verify_attempts = 5
"#;

    #[test]
    fn parses_full_sample() {
        let cfg = ControlConfig::from_toml_str(SAMPLE).unwrap();
        cfg.validate().unwrap();

        let alarms = cfg.alarm_specs().unwrap();
        assert_eq!(alarms.len(), 2);
        assert_eq!(alarms[0].period_secs, 300);
        assert!(matches!(alarms[0].metric, MetricRef::Composite(_)));
        assert_eq!(alarms[1].period_secs, 60);
        assert_eq!(alarms[0].treat_missing_data, TreatMissingData::NotBreaching);
    }

    #[test]
    fn compiles_targets_and_policies() {
        let cfg = ControlConfig::from_toml_str(SAMPLE).unwrap();
        let targets = cfg.scalable_targets().unwrap();
        assert_eq!(targets.len(), 1);
        let t = &targets[0];
        assert_eq!(t.initial_capacity, 2);
        assert_eq!(t.policies.len(), 2);
        match &t.policies[1] {
            ScalingPolicy::Scheduled { window_secs, .. } => assert_eq!(*window_secs, 36_000),
            other => panic!("expected scheduled policy, got {other:?}"),
        }
    }

    #[test]
    fn environment_defaults() {
        let cfg = ControlConfig::from_toml_str(SAMPLE).unwrap();
        let envs = cfg.environment_policies().unwrap();
        assert_eq!(envs[0].risk_tier, RiskTier::High);
        assert!(envs[0].circuit_breaker);
        assert_eq!(envs[0].verify_attempts, 5);
        assert_eq!(envs[0].verify_interval, Duration::from_secs(10));
    }

    #[test]
    fn unknown_composite_reference() {
        let cfg = ControlConfig::from_toml_str(
            r#"
[[alarms]]
name = "a"
metric = { composite = "missing" }
comparison = ">"
threshold = 1.0
"#,
        )
        .unwrap();
        assert!(matches!(
            cfg.alarm_specs(),
            Err(ConfigError::UnknownReference(_))
        ));
    }

    #[test]
    fn environment_with_unknown_alarm() {
        let cfg = ControlConfig::from_toml_str(
            r#"
[[environments]]
name = "prod"
health_target = "x"
slo_alarms = ["nope"]
"#,
        )
        .unwrap();
        assert!(cfg.environment_policies().is_err());
    }

    #[test]
    fn self_referencing_composite() {
        let cfg = ControlConfig::from_toml_str(
            r#"
[[composites]]
name = "loop"
expression = "a + 1"
[composites.operands]
a = { composite = "loop" }
"#,
        )
        .unwrap();
        assert!(matches!(
            cfg.composites(),
            Err(ConfigError::Expression { .. })
        ));
    }

    #[test]
    fn nested_composites_compile() {
        let cfg = ControlConfig::from_toml_str(
            r#"
[[composites]]
name = "outer"
expression = "inner * 2"
[composites.operands]
inner = { composite = "inner" }

[[composites]]
name = "inner"
expression = "a + b"
[composites.operands.a.series]
metric_name = "a"
statistic = "sum"
[composites.operands.b.series]
metric_name = "b"
statistic = "sum"
"#,
        )
        .unwrap();
        let compiled = cfg.composites().unwrap();
        assert_eq!(compiled.len(), 2);
        match &compiled["outer"].expression {
            Expr::Binary { lhs, .. } => assert!(matches!(**lhs, Expr::Composite(_))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_duration_is_reported() {
        let cfg = ControlConfig::from_toml_str(
            r#"
[control]
alarm_interval = "often"
"#,
        )
        .unwrap();
        assert!(matches!(
            cfg.alarm_interval(),
            Err(ConfigError::Duration { .. })
        ));
    }

    #[test]
    fn empty_config_is_valid() {
        let cfg = ControlConfig::from_toml_str("").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.alarm_interval().unwrap(), Duration::from_secs(60));
    }

    fn series_names(expr: &Expr, out: &mut Vec<String>) {
        match expr {
            Expr::Series(series) => out.push(series.selector.metric_name.clone()),
            Expr::Binary { lhs, rhs, .. } => {
                series_names(lhs, out);
                series_names(rhs, out);
            }
            Expr::Composite(def) => series_names(&def.expression, out),
            Expr::Constant(_) => {}
        }
    }

    #[test]
    fn shipped_config_error_rate_operands() {
        let cfg = ControlConfig::from_toml_str(include_str!("../../../sloguard.toml")).unwrap();
        cfg.validate().unwrap();

        let compiled = cfg.composites().unwrap();
        let mut names = Vec::new();
        series_names(&compiled["error_rate"].expression, &mut names);
        assert_eq!(
            names,
            vec![
                "HTTPCode_Target_5XX_Count",
                "HTTPCode_ELB_5XX_Count",
                "HTTPCode_Target_2XX_Count",
                "HTTPCode_Target_3XX_Count",
                "HTTPCode_Target_4XX_Count",
            ]
        );
    }
}
