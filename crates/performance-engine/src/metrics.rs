//! Metric-KPI evaluation: filter activity records, aggregate the evaluable
//! field, and compare the result against the working-day-scaled target.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::calendar::{count_business_days, local_date_of};
use crate::domain::{round2, EmployeeId, KpiMetadata, TaskId};
use crate::store::{ActivityQuery, ActivityStore, StoreError};
use crate::tenancy::TenantId;

#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    #[error("kpi '{kpi}' is missing required field '{field}'")]
    MissingKpiField { kpi: String, field: &'static str },
    #[error("invalid KPI formula '{0}'")]
    InvalidFormula(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of evaluating one metric KPI over one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KpiEvaluation {
    /// Achievement against the period target, unclamped.
    pub percentage: f64,
    pub raw_result: f64,
    pub working_days: u32,
    pub target_for_period: f64,
    pub non_working_days: u32,
}

/// Aggregates projected values with a KPI formula.
pub fn apply_formula(values: &[Value], formula: &str) -> Result<f64, MetricError> {
    match formula {
        "count" => Ok(values.len() as f64),
        "count_distinct" => {
            let mut seen = HashSet::new();
            for value in values {
                seen.insert(value.to_string());
            }
            Ok(seen.len() as f64)
        }
        "sum" => {
            let mut total = 0.0;
            for value in values {
                match value {
                    Value::Number(number) => {
                        if let Some(number) = number.as_f64() {
                            total += number;
                        }
                    }
                    Value::String(raw) => {
                        if let Ok(number) = raw.trim().parse::<f64>() {
                            total += number;
                        }
                    }
                    _ => {}
                }
            }
            Ok(total)
        }
        other => Err(MetricError::InvalidFormula(other.to_string())),
    }
}

/// Stateless calculator over the activity store. Pure read; no side effects.
pub struct MetricCalculator {
    activity: Arc<dyn ActivityStore>,
    tz: FixedOffset,
}

impl MetricCalculator {
    pub fn new(activity: Arc<dyn ActivityStore>, tz: FixedOffset) -> Self {
        Self { activity, tz }
    }

    pub fn timezone(&self) -> FixedOffset {
        self.tz
    }

    /// Evaluates one metric KPI for one employee over `[start, end]`.
    pub fn evaluate(
        &self,
        tenant: &TenantId,
        task: &TaskId,
        kpi: &KpiMetadata,
        employee: &EmployeeId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<KpiEvaluation, MetricError> {
        let evaluable_field =
            kpi.evaluable_field
                .as_deref()
                .ok_or_else(|| MetricError::MissingKpiField {
                    kpi: kpi.name.clone(),
                    field: "evaluable field",
                })?;
        let formula = kpi
            .formula
            .as_deref()
            .ok_or_else(|| MetricError::MissingKpiField {
                kpi: kpi.name.clone(),
                field: "formula",
            })?;

        let excluded = kpi.effective_non_working_days();
        let values = self.activity.evaluable_values(
            tenant,
            &ActivityQuery {
                task_id: task.clone(),
                employee_id: employee.clone(),
                equality: kpi.filters.clone(),
                date_field: kpi.date_filter_field.clone(),
                start,
                end,
                excluded_weekdays: excluded.clone(),
                tz: self.tz,
                project: evaluable_field.to_string(),
            },
        )?;

        let raw_result = apply_formula(&values, formula)?;

        let (working_days, non_working_days) = count_business_days(
            local_date_of(start, self.tz),
            local_date_of(end, self.tz),
            &excluded,
        );

        let quotient = round2(f64::from(working_days) / kpi.time_unit);
        let target_for_period = round2(quotient * kpi.target_value());
        let percentage = if target_for_period == 0.0 {
            0.0
        } else {
            round2(raw_result / target_for_period * 100.0)
        };

        Ok(KpiEvaluation {
            percentage,
            raw_result,
            working_days,
            target_for_period,
            non_working_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityRecord, FieldFilter, CREATED_FIELD};
    use crate::store::memory::MemoryActivityStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn tz() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).expect("valid offset")
    }

    fn tenant() -> TenantId {
        TenantId("chasqi".into())
    }

    fn record(day: u32, hour: u32, fields: &[(&str, Value)]) -> ActivityRecord {
        let mut map = BTreeMap::new();
        map.insert(
            CREATED_FIELD.to_string(),
            json!(format!("2025-01-{day:02}T{hour:02}:00:00-05:00")),
        );
        for (key, value) in fields {
            map.insert((*key).to_string(), value.clone());
        }
        ActivityRecord {
            task_id: TaskId("task-1".into()),
            employee_id: EmployeeId("emp-1".into()),
            fields: map,
        }
    }

    fn calculator_with(records: Vec<ActivityRecord>) -> MetricCalculator {
        let store = MemoryActivityStore::default();
        for entry in records {
            store.insert(&tenant(), entry);
        }
        MetricCalculator::new(Arc::new(store), tz())
    }

    fn sales_kpi() -> KpiMetadata {
        KpiMetadata {
            name: "Ventas diarias".into(),
            target: Some(2.0),
            formula: Some("sum".into()),
            evaluable_field: Some("Ventas".into()),
            ..KpiMetadata::default()
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        // January 2025, local bounds.
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).single().expect("valid");
        let end = Utc.with_ymd_and_hms(2025, 2, 1, 4, 59, 59).single().expect("valid");
        (start, end)
    }

    #[test]
    fn sum_parses_numeric_strings_and_drops_junk() {
        let values = vec![json!("3"), json!("4"), Value::Null, json!("x")];
        assert_eq!(apply_formula(&values, "sum").expect("sums"), 7.0);
    }

    #[test]
    fn count_distinct_collapses_duplicates() {
        let values = vec![json!(1), json!(1), json!(2)];
        assert_eq!(apply_formula(&values, "count_distinct").expect("counts"), 2.0);
    }

    #[test]
    fn unknown_formula_is_rejected() {
        let err = apply_formula(&[], "median").expect_err("must fail");
        assert!(matches!(err, MetricError::InvalidFormula(_)));
    }

    #[test]
    fn evaluates_against_working_day_scaled_target() {
        let calculator = calculator_with(vec![
            record(6, 9, &[("Ventas", json!("20"))]),  // Monday
            record(7, 9, &[("Ventas", json!(26.0))]),  // Tuesday
            record(8, 9, &[("Ventas", json!("x"))]),   // dropped silently
        ]);
        let (start, end) = window();
        let result = calculator
            .evaluate(
                &tenant(),
                &TaskId("task-1".into()),
                &sales_kpi(),
                &EmployeeId("emp-1".into()),
                start,
                end,
            )
            .expect("evaluates");

        // 23 working days / 1 * 2 = 46 expected; 46 raw would be 100%.
        assert_eq!(result.working_days, 23);
        assert_eq!(result.non_working_days, 8);
        assert_eq!(result.target_for_period, 46.0);
        assert_eq!(result.raw_result, 46.0);
        assert_eq!(result.percentage, 100.0);
    }

    #[test]
    fn weekend_records_are_excluded_from_aggregation() {
        let calculator = calculator_with(vec![
            record(4, 9, &[("Ventas", json!("10"))]), // Saturday, excluded
            record(6, 9, &[("Ventas", json!("10"))]), // Monday
        ]);
        let (start, end) = window();
        let result = calculator
            .evaluate(
                &tenant(),
                &TaskId("task-1".into()),
                &sales_kpi(),
                &EmployeeId("emp-1".into()),
                start,
                end,
            )
            .expect("evaluates");
        assert_eq!(result.raw_result, 10.0);
    }

    #[test]
    fn dynamic_filters_restrict_the_query() {
        let mut kpi = sales_kpi();
        kpi.formula = Some("count".into());
        kpi.filters = vec![FieldFilter {
            key: "Estado".into(),
            value: json!("cerrado"),
        }];
        let calculator = calculator_with(vec![
            record(6, 9, &[("Ventas", json!(1)), ("Estado", json!("cerrado"))]),
            record(7, 9, &[("Ventas", json!(1)), ("Estado", json!("abierto"))]),
        ]);
        let (start, end) = window();
        let result = calculator
            .evaluate(
                &tenant(),
                &TaskId("task-1".into()),
                &kpi,
                &EmployeeId("emp-1".into()),
                start,
                end,
            )
            .expect("evaluates");
        assert_eq!(result.raw_result, 1.0);
    }

    #[test]
    fn zero_target_yields_zero_percentage() {
        let mut kpi = sales_kpi();
        kpi.target = None;
        let calculator = calculator_with(vec![record(6, 9, &[("Ventas", json!("5"))])]);
        let (start, end) = window();
        let result = calculator
            .evaluate(
                &tenant(),
                &TaskId("task-1".into()),
                &kpi,
                &EmployeeId("emp-1".into()),
                start,
                end,
            )
            .expect("evaluates");
        assert_eq!(result.target_for_period, 0.0);
        assert_eq!(result.percentage, 0.0);
    }

    #[test]
    fn percentage_is_not_clamped() {
        let mut kpi = sales_kpi();
        kpi.time_unit = 23.0; // one target unit for the whole month
        let calculator = calculator_with(vec![record(6, 9, &[("Ventas", json!("9"))])]);
        let (start, end) = window();
        let result = calculator
            .evaluate(
                &tenant(),
                &TaskId("task-1".into()),
                &kpi,
                &EmployeeId("emp-1".into()),
                start,
                end,
            )
            .expect("evaluates");
        assert_eq!(result.target_for_period, 2.0);
        assert_eq!(result.percentage, 450.0);
    }

    #[test]
    fn missing_metadata_is_reported() {
        let mut kpi = sales_kpi();
        kpi.evaluable_field = None;
        let calculator = calculator_with(Vec::new());
        let (start, end) = window();
        let err = calculator
            .evaluate(
                &tenant(),
                &TaskId("task-1".into()),
                &kpi,
                &EmployeeId("emp-1".into()),
                start,
                end,
            )
            .expect_err("must fail");
        assert!(matches!(err, MetricError::MissingKpiField { .. }));
    }
}
