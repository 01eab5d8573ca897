//! Domain model shared by the scoring engine: evaluation definitions, KPI
//! metadata, employees, recorded grades, activity records, performance bands,
//! and persisted evaluation snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calendar::weekday_names;

/// Identifier wrapper for an evaluation definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvaluationId(pub String);

/// Identifier wrapper for a section inside an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId(pub String);

/// Identifier wrapper for a KPI document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KpiId(pub String);

/// Identifier wrapper for a grade label (sub-grade discriminator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub String);

/// Identifier wrapper for an evaluated employee.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

/// Identifier wrapper for an operational task definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

/// Identifier wrapper for a department.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepartmentId(pub String);

/// Activity-log field that carries the record creation timestamp.
pub const CREATED_FIELD: &str = "Fecha_de_creacion";
/// Activity-log field that carries the record update timestamp.
pub const UPDATED_FIELD: &str = "Fecha_de_actualizacion";

/// Round to two decimal places, the precision every intermediate score is
/// stored and combined at. Rounding at each step (not only at the end) is
/// required for numeric parity with historical snapshots.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// How a KPI's grade is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiKind {
    /// Grade was previously stored by a human or an upstream materializer.
    Recorded,
    /// Grade is computed from aggregated activity records against a target.
    Metric,
}

impl KpiKind {
    /// Maps the upstream KPI type string. `question`, `dropdown` and
    /// `static_metrics` carry stored grades; every other type is metric.
    pub fn from_wire(kpi_type: &str) -> Self {
        match kpi_type {
            "question" | "dropdown" | "static_metrics" => Self::Recorded,
            _ => Self::Metric,
        }
    }
}

/// Dynamic equality filter applied to activity records, e.g. `{"Estado": "cerrado"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub key: String,
    pub value: Value,
}

/// Denormalized KPI metadata merged into each section reference when the
/// definition is enriched by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target: Option<f64>,
    /// Divisor applied to the working-day count before the target is scaled.
    #[serde(default = "default_time_unit")]
    pub time_unit: f64,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub evaluable_field: Option<String>,
    #[serde(default = "default_date_filter")]
    pub date_filter_field: String,
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    #[serde(default)]
    pub task: Option<TaskId>,
    #[serde(default, with = "weekday_names")]
    pub non_working_days: Vec<Weekday>,
}

fn default_time_unit() -> f64 {
    1.0
}

fn default_date_filter() -> String {
    CREATED_FIELD.to_string()
}

impl Default for KpiMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            target: None,
            time_unit: default_time_unit(),
            formula: None,
            evaluable_field: None,
            date_filter_field: default_date_filter(),
            filters: Vec::new(),
            task: None,
            non_working_days: Vec::new(),
        }
    }
}

impl KpiMetadata {
    pub fn target_value(&self) -> f64 {
        self.target.unwrap_or(0.0)
    }

    /// KPI-level non-working days; an empty set means the platform default of
    /// Saturday and Sunday.
    pub fn effective_non_working_days(&self) -> Vec<Weekday> {
        if self.non_working_days.is_empty() {
            vec![Weekday::Sat, Weekday::Sun]
        } else {
            self.non_working_days.clone()
        }
    }
}

/// KPI reference as stored inside a raw (un-enriched) evaluation section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawKpiRef {
    pub kpi_id: KpiId,
    pub weight: f64,
    #[serde(default)]
    pub label_id: Option<LabelId>,
}

/// Section of a raw evaluation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSection {
    pub id: SectionId,
    pub title: String,
    pub weight: f64,
    pub kpis: Vec<RawKpiRef>,
}

/// Evaluation definition as it exists in the definition store, before KPI
/// metadata has been merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDefinition {
    pub id: EvaluationId,
    pub name: String,
    #[serde(default, with = "weekday_names")]
    pub non_working_days: Vec<Weekday>,
    #[serde(default)]
    pub evaluated_employees: Vec<EmployeeId>,
    pub sections: Vec<RawSection>,
}

/// KPI document as it exists in the KPI store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRecord {
    pub id: KpiId,
    /// Upstream type string; drives [`KpiKind::from_wire`].
    #[serde(default)]
    pub kpi_type: String,
    #[serde(flatten)]
    pub metadata: KpiMetadata,
}

impl KpiRecord {
    pub fn kind(&self) -> KpiKind {
        KpiKind::from_wire(&self.kpi_type)
    }
}

/// KPI reference enriched with its denormalized metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRef {
    pub kpi_id: KpiId,
    pub weight: f64,
    #[serde(default)]
    pub label_id: Option<LabelId>,
    pub kind: KpiKind,
    #[serde(flatten)]
    pub metadata: KpiMetadata,
}

/// Enriched section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub title: String,
    pub weight: f64,
    pub kpis: Vec<KpiRef>,
}

/// Fully enriched evaluation definition, the unit the cache stores and the
/// scorer consumes. Read-only from the engine's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDefinition {
    pub id: EvaluationId,
    pub name: String,
    #[serde(default, with = "weekday_names")]
    pub non_working_days: Vec<Weekday>,
    #[serde(default)]
    pub evaluated_employees: Vec<EmployeeId>,
    pub sections: Vec<Section>,
}

/// Evaluated employee master record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub first_names: String,
    pub last_names: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub position: String,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_names, self.last_names)
    }
}

/// Stored grade for a (employee, kpi[, label]) pair. Immutable history fact
/// from the scorer's perspective; the batch processor also materializes
/// per-KPI daily metric results into the same store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedGrade {
    pub employee_id: EmployeeId,
    pub kpi_id: KpiId,
    #[serde(default)]
    pub label_id: Option<LabelId>,
    pub grade: f64,
    #[serde(default)]
    pub raw_total: Option<f64>,
    #[serde(default)]
    pub period_target: Option<f64>,
    #[serde(default)]
    pub surplus_deficit: Option<f64>,
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub working_days: Option<u32>,
    #[serde(default)]
    pub non_working_days: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Raw operational activity record. Beyond the task and employee references,
/// fields are free-form so KPIs can select their evaluable and date-filter
/// fields by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub task_id: TaskId,
    pub employee_id: EmployeeId,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl ActivityRecord {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Parses the named field as an RFC 3339 timestamp.
    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        parse_timestamp(self.fields.get(name)?)
    }
}

/// Parses an RFC 3339 timestamp out of a JSON value.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Task definition: the operational unit an activity record belongs to, and
/// the set of KPIs recomputed when its activity changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(default)]
    pub kpi_ids: Vec<KpiId>,
}

/// Labeled, colored score range supplied by the tenant metadata store.
/// Ranges are `[min, max)` over `[0, 100]`; the band with `max == 100` also
/// absorbs scores at or above 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBand {
    pub label: String,
    pub color: String,
    pub min: f64,
    pub max: f64,
}

/// Classification outcome attached to a scored employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceLevel {
    pub label: String,
    pub color: String,
}

impl PerformanceLevel {
    /// Sentinel used when classification fails for one employee; the batch
    /// continues with this in place of a band label.
    pub fn error_sentinel() -> Self {
        Self {
            label: "error".to_string(),
            color: "#FF0000".to_string(),
        }
    }
}

/// Per-KPI line of a section breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiScore {
    pub kpi_id: KpiId,
    pub name: String,
    pub weight: f64,
    pub grade: f64,
    pub weighted: f64,
    #[serde(default)]
    pub target: Option<f64>,
}

/// Per-section line of an employee scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub section_id: SectionId,
    pub title: String,
    pub score: f64,
    pub weighted: f64,
    pub kpis: Vec<KpiScore>,
}

/// Unique key of a persisted evaluation snapshot. At most one
/// logically-current snapshot exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub employee_id: EmployeeId,
    pub evaluation_id: EvaluationId,
    pub filter_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Persisted result of one employee scoring over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    pub key: SnapshotKey,
    pub employee_name: String,
    pub department: String,
    pub position: String,
    pub final_score: f64,
    pub performance: PerformanceLevel,
    pub sections: Vec<SectionScore>,
    pub created_at: DateTime<Utc>,
}
