//! Storage abstractions so the engine can be exercised in isolation.
//!
//! Every store is tenant-scoped: implementations derive the physical
//! namespace from the tenant id (see [`crate::tenancy::TenantId`]). Absence is
//! modeled as `Ok(None)` / empty collections; `StoreError` is reserved for
//! transport and data faults.

pub mod memory;

use chrono::{DateTime, FixedOffset, Utc, Weekday};
use serde_json::Value;

use crate::domain::{
    DepartmentId, Employee, EmployeeId, EvaluationId, EvaluationSnapshot, FieldFilter, KpiId,
    KpiRecord, LabelId, PerformanceBand, RawDefinition, RecordedGrade, SnapshotKey, TaskId,
    TaskRecord,
};
use crate::tenancy::TenantId;

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Read access to raw evaluation definitions.
pub trait DefinitionStore: Send + Sync {
    fn fetch_definition(
        &self,
        tenant: &TenantId,
        id: &EvaluationId,
    ) -> Result<Option<RawDefinition>, StoreError>;
}

/// Read access to KPI documents.
pub trait KpiStore: Send + Sync {
    /// Batch fetch; ids not present in the store are silently absent from the
    /// result.
    fn fetch_many(&self, tenant: &TenantId, ids: &[KpiId]) -> Result<Vec<KpiRecord>, StoreError>;
}

/// Read access to task definitions.
pub trait TaskStore: Send + Sync {
    fn fetch_task(&self, tenant: &TenantId, id: &TaskId) -> Result<Option<TaskRecord>, StoreError>;
}

/// Read access to the employee master.
pub trait EmployeeStore: Send + Sync {
    fn fetch_employee(
        &self,
        tenant: &TenantId,
        id: &EmployeeId,
    ) -> Result<Option<Employee>, StoreError>;

    fn by_department(
        &self,
        tenant: &TenantId,
        department: &DepartmentId,
    ) -> Result<Vec<Employee>, StoreError>;
}

/// One (kpi, label) pair of a batched grade lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeQuery {
    pub kpi_id: KpiId,
    pub label_id: Option<LabelId>,
}

/// Recorded grades plus the per-KPI results materialized by the batch
/// processor.
pub trait GradeStore: Send + Sync {
    /// Single disjunctive query across all pairs for one employee.
    fn find_grades(
        &self,
        tenant: &TenantId,
        employee: &EmployeeId,
        pairs: &[GradeQuery],
    ) -> Result<Vec<RecordedGrade>, StoreError>;

    /// Insert-or-replace keyed on (employee, kpi, label, period bounds).
    fn upsert_result(&self, tenant: &TenantId, grade: RecordedGrade) -> Result<(), StoreError>;
}

/// Projection query over raw activity records.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityQuery {
    pub task_id: TaskId,
    pub employee_id: EmployeeId,
    pub equality: Vec<FieldFilter>,
    /// Field holding the timestamp the window applies to.
    pub date_field: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Records whose local weekday falls in this set are excluded.
    pub excluded_weekdays: Vec<Weekday>,
    /// Civil timezone used to derive the local weekday of each record.
    pub tz: FixedOffset,
    /// Field projected out of each matching record.
    pub project: String,
}

/// Read access to the activity log.
pub trait ActivityStore: Send + Sync {
    /// Returns the projected evaluable field of every matching record,
    /// dropping records where the field is absent or null.
    fn evaluable_values(
        &self,
        tenant: &TenantId,
        query: &ActivityQuery,
    ) -> Result<Vec<Value>, StoreError>;
}

/// Tenant metadata store holding the performance band table.
pub trait BandStore: Send + Sync {
    fn bands(&self, tenant: &TenantId) -> Result<Vec<PerformanceBand>, StoreError>;
}

/// Evaluation snapshot history.
pub trait HistoryStore: Send + Sync {
    /// Atomic insert-or-replace on the snapshot's unique key. On replace the
    /// stored `created_at` is preserved and all other fields are overwritten.
    fn upsert(&self, tenant: &TenantId, snapshot: EvaluationSnapshot) -> Result<(), StoreError>;

    fn lookup(
        &self,
        tenant: &TenantId,
        key: &SnapshotKey,
    ) -> Result<Option<EvaluationSnapshot>, StoreError>;

    fn for_employee(
        &self,
        tenant: &TenantId,
        employee: &EmployeeId,
    ) -> Result<Vec<EvaluationSnapshot>, StoreError>;
}

/// Key-value cache with per-key TTL on write.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: std::time::Duration,
    ) -> Result<(), StoreError>;
}

/// Pending activity-update event as queued by upstream writers.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActivityEvent {
    pub tenant: TenantId,
    pub payload: crate::domain::ActivityRecord,
}

/// Durable queue of pending activity events.
pub trait EventQueue: Send + Sync {
    fn push(&self, event: ActivityEvent) -> Result<(), StoreError>;

    /// Removes and returns the entire pending queue in one atomic step, so
    /// overlapping processor invocations can never take the same event.
    fn drain(&self) -> Result<Vec<ActivityEvent>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Asynchronous snapshot persistence request.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistJob {
    pub tenant: TenantId,
    pub snapshot: EvaluationSnapshot,
}

/// Error raised by the background dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget, at-least-once job submission.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job: PersistJob) -> Result<(), DispatchError>;
}
