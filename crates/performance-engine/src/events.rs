//! Debounced batch processing of raw activity-update events.
//!
//! Upstream writers enqueue an event per changed activity record. Each sweep
//! drains the queue atomically, lets recent events settle until they are
//! older than the debounce window, and collapses the stale ones into one
//! per-KPI recompute per (tenant, task, employee, local day).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::calendar::day_window;
use crate::domain::{
    round2, EmployeeId, RecordedGrade, TaskId, CREATED_FIELD, UPDATED_FIELD,
};
use crate::fanout::bounded_map;
use crate::metrics::{MetricCalculator, MetricError};
use crate::store::{ActivityEvent, EventQueue, GradeStore, KpiStore, StoreError, TaskStore};
use crate::tenancy::TenantId;

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// Outcome of one processor sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    /// Events taken off the queue this sweep.
    pub drained: usize,
    /// (tenant, task, employee) groups recomputed.
    pub groups_processed: usize,
    /// Per-KPI daily results written.
    pub results_written: usize,
    /// Events pushed back: not yet stale, unparseable, or from failed groups.
    pub requeued: usize,
    /// Groups whose recompute failed; their events were requeued.
    pub failed_groups: usize,
}

type GroupKey = (TenantId, TaskId, EmployeeId);

pub struct EventProcessor {
    queue: Arc<dyn EventQueue>,
    tasks: Arc<dyn TaskStore>,
    kpis: Arc<dyn KpiStore>,
    grades: Arc<dyn GradeStore>,
    calculator: MetricCalculator,
    debounce: Duration,
    worker_cap: usize,
}

impl EventProcessor {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        tasks: Arc<dyn TaskStore>,
        kpis: Arc<dyn KpiStore>,
        grades: Arc<dyn GradeStore>,
        calculator: MetricCalculator,
        debounce_secs: i64,
        worker_cap: usize,
    ) -> Self {
        Self {
            queue,
            tasks,
            kpis,
            grades,
            calculator,
            debounce: Duration::seconds(debounce_secs),
            worker_cap,
        }
    }

    /// Runs one sweep over the pending queue.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let events = self.queue.drain()?;
        let drained = events.len();

        let mut held: Vec<ActivityEvent> = Vec::new();
        let mut groups: BTreeMap<GroupKey, BTreeMap<NaiveDate, Vec<ActivityEvent>>> =
            BTreeMap::new();

        for event in events {
            match self.relevant_timestamp(&event) {
                Some(stamp) if now.signed_duration_since(stamp) > self.debounce => {
                    let key = (
                        event.tenant.clone(),
                        event.payload.task_id.clone(),
                        event.payload.employee_id.clone(),
                    );
                    let day = stamp
                        .with_timezone(&self.calculator.timezone())
                        .date_naive();
                    groups.entry(key).or_default().entry(day).or_default().push(event);
                }
                // Fresh events settle until the next sweep; events without a
                // readable timestamp are held rather than dropped.
                _ => held.push(event),
            }
        }

        let group_list: Vec<(GroupKey, BTreeMap<NaiveDate, Vec<ActivityEvent>>)> =
            groups.into_iter().collect();
        let groups_processed = group_list.len();

        let outcomes = bounded_map(group_list, self.worker_cap, |(key, days)| {
            self.process_group(&key, &days, now)
        });

        let mut results_written = 0;
        let mut failed_groups = 0;
        let mut requeued = held.len();

        for event in held {
            self.queue.push(event)?;
        }
        for outcome in outcomes {
            match outcome {
                GroupOutcome::Done { written } => results_written += written,
                GroupOutcome::Failed { events } => {
                    failed_groups += 1;
                    requeued += events.len();
                    for event in events {
                        self.queue.push(event)?;
                    }
                }
            }
        }

        let report = SweepReport {
            drained,
            groups_processed,
            results_written,
            requeued,
            failed_groups,
        };
        if drained > 0 {
            info!(
                drained = report.drained,
                groups = report.groups_processed,
                written = report.results_written,
                requeued = report.requeued,
                "activity event sweep finished"
            );
        }
        Ok(report)
    }

    fn relevant_timestamp(&self, event: &ActivityEvent) -> Option<DateTime<Utc>> {
        event
            .payload
            .timestamp(UPDATED_FIELD)
            .or_else(|| event.payload.timestamp(CREATED_FIELD))
    }

    fn process_group(
        &self,
        key: &GroupKey,
        days: &BTreeMap<NaiveDate, Vec<ActivityEvent>>,
        now: DateTime<Utc>,
    ) -> GroupOutcome {
        let (tenant, task_id, employee_id) = key;
        match self.recompute(tenant, task_id, employee_id, days, now) {
            Ok(written) => GroupOutcome::Done { written },
            Err(err) => {
                error!(
                    tenant = %tenant,
                    task = %task_id.0,
                    employee = %employee_id.0,
                    error = %err,
                    "group recompute failed, requeueing its events"
                );
                GroupOutcome::Failed {
                    events: days.values().flatten().cloned().collect(),
                }
            }
        }
    }

    fn recompute(
        &self,
        tenant: &TenantId,
        task_id: &TaskId,
        employee_id: &EmployeeId,
        days: &BTreeMap<NaiveDate, Vec<ActivityEvent>>,
        now: DateTime<Utc>,
    ) -> Result<usize, ProcessError> {
        let Some(task) = self.tasks.fetch_task(tenant, task_id)? else {
            warn!(tenant = %tenant, task = %task_id.0, "task not found, events discarded");
            return Ok(0);
        };
        let records = self.kpis.fetch_many(tenant, &task.kpi_ids)?;

        let mut written = 0;
        for day in days.keys() {
            let window = day_window(*day, self.calculator.timezone());
            for kpi in &records {
                // Mirrors the scorer: a KPI without a task reference is skipped.
                let Some(kpi_task) = &kpi.metadata.task else {
                    continue;
                };
                let result = self.calculator.evaluate(
                    tenant,
                    kpi_task,
                    &kpi.metadata,
                    employee_id,
                    window.start,
                    window.end,
                )?;
                self.grades.upsert_result(
                    tenant,
                    RecordedGrade {
                        employee_id: employee_id.clone(),
                        kpi_id: kpi.id.clone(),
                        label_id: None,
                        grade: result.percentage,
                        raw_total: Some(result.raw_result),
                        period_target: Some(result.target_for_period),
                        surplus_deficit: Some(round2(
                            result.raw_result - result.target_for_period,
                        )),
                        period_start: Some(window.start),
                        period_end: Some(window.end),
                        working_days: Some(result.working_days),
                        non_working_days: Some(result.non_working_days),
                        created_at: now,
                    },
                )?;
                written += 1;
            }
        }
        Ok(written)
    }
}

enum GroupOutcome {
    Done { written: usize },
    Failed { events: Vec<ActivityEvent> },
}
