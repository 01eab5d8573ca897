//! In-memory store implementations backing tests, demos, and single-node
//! deployments. The concrete storage engine stays behind the traits in the
//! parent module.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::domain::{
    DepartmentId, Employee, EmployeeId, EvaluationId, EvaluationSnapshot, KpiId, KpiRecord,
    PerformanceBand, RawDefinition, RecordedGrade, SnapshotKey, TaskId, TaskRecord,
};
use crate::store::{
    ActivityEvent, ActivityQuery, ActivityStore, BandStore, CacheStore, DefinitionStore,
    DispatchError, EmployeeStore, EventQueue, GradeQuery, GradeStore, HistoryStore, JobDispatcher,
    KpiStore, PersistJob, StoreError, TaskStore,
};
use crate::tenancy::TenantId;

#[derive(Default, Clone)]
pub struct MemoryDefinitionStore {
    definitions: Arc<Mutex<HashMap<(TenantId, EvaluationId), RawDefinition>>>,
}

impl MemoryDefinitionStore {
    pub fn insert(&self, tenant: &TenantId, definition: RawDefinition) {
        self.definitions
            .lock()
            .expect("definition mutex poisoned")
            .insert((tenant.clone(), definition.id.clone()), definition);
    }
}

impl DefinitionStore for MemoryDefinitionStore {
    fn fetch_definition(
        &self,
        tenant: &TenantId,
        id: &EvaluationId,
    ) -> Result<Option<RawDefinition>, StoreError> {
        let guard = self.definitions.lock().expect("definition mutex poisoned");
        Ok(guard.get(&(tenant.clone(), id.clone())).cloned())
    }
}

#[derive(Default, Clone)]
pub struct MemoryKpiStore {
    kpis: Arc<Mutex<HashMap<(TenantId, KpiId), KpiRecord>>>,
}

impl MemoryKpiStore {
    pub fn insert(&self, tenant: &TenantId, record: KpiRecord) {
        self.kpis
            .lock()
            .expect("kpi mutex poisoned")
            .insert((tenant.clone(), record.id.clone()), record);
    }
}

impl KpiStore for MemoryKpiStore {
    fn fetch_many(&self, tenant: &TenantId, ids: &[KpiId]) -> Result<Vec<KpiRecord>, StoreError> {
        let guard = self.kpis.lock().expect("kpi mutex poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| guard.get(&(tenant.clone(), id.clone())).cloned())
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct MemoryTaskStore {
    tasks: Arc<Mutex<HashMap<(TenantId, TaskId), TaskRecord>>>,
}

impl MemoryTaskStore {
    pub fn insert(&self, tenant: &TenantId, task: TaskRecord) {
        self.tasks
            .lock()
            .expect("task mutex poisoned")
            .insert((tenant.clone(), task.id.clone()), task);
    }
}

impl TaskStore for MemoryTaskStore {
    fn fetch_task(&self, tenant: &TenantId, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let guard = self.tasks.lock().expect("task mutex poisoned");
        Ok(guard.get(&(tenant.clone(), id.clone())).cloned())
    }
}

#[derive(Default, Clone)]
pub struct MemoryEmployeeStore {
    employees: Arc<Mutex<HashMap<(TenantId, EmployeeId), Employee>>>,
    departments: Arc<Mutex<HashMap<(TenantId, DepartmentId), String>>>,
}

impl MemoryEmployeeStore {
    pub fn insert(&self, tenant: &TenantId, employee: Employee) {
        self.employees
            .lock()
            .expect("employee mutex poisoned")
            .insert((tenant.clone(), employee.id.clone()), employee);
    }

    pub fn insert_department(&self, tenant: &TenantId, id: DepartmentId, name: &str) {
        self.departments
            .lock()
            .expect("department mutex poisoned")
            .insert((tenant.clone(), id), name.to_string());
    }
}

impl EmployeeStore for MemoryEmployeeStore {
    fn fetch_employee(
        &self,
        tenant: &TenantId,
        id: &EmployeeId,
    ) -> Result<Option<Employee>, StoreError> {
        let guard = self.employees.lock().expect("employee mutex poisoned");
        Ok(guard.get(&(tenant.clone(), id.clone())).cloned())
    }

    fn by_department(
        &self,
        tenant: &TenantId,
        department: &DepartmentId,
    ) -> Result<Vec<Employee>, StoreError> {
        let name = {
            let guard = self.departments.lock().expect("department mutex poisoned");
            guard.get(&(tenant.clone(), department.clone())).cloned()
        };
        let Some(name) = name else {
            return Ok(Vec::new());
        };
        let guard = self.employees.lock().expect("employee mutex poisoned");
        let mut members: Vec<Employee> = guard
            .iter()
            .filter(|((owner, _), employee)| owner == tenant && employee.department == name)
            .map(|(_, employee)| employee.clone())
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(members)
    }
}

#[derive(Default, Clone)]
pub struct MemoryGradeStore {
    grades: Arc<Mutex<HashMap<TenantId, Vec<RecordedGrade>>>>,
}

impl MemoryGradeStore {
    pub fn insert(&self, tenant: &TenantId, grade: RecordedGrade) {
        self.grades
            .lock()
            .expect("grade mutex poisoned")
            .entry(tenant.clone())
            .or_default()
            .push(grade);
    }

    pub fn all(&self, tenant: &TenantId) -> Vec<RecordedGrade> {
        self.grades
            .lock()
            .expect("grade mutex poisoned")
            .get(tenant)
            .cloned()
            .unwrap_or_default()
    }
}

fn pair_matches(pair: &GradeQuery, grade: &RecordedGrade) -> bool {
    if pair.kpi_id != grade.kpi_id {
        return false;
    }
    match &pair.label_id {
        Some(label) => grade.label_id.as_ref() == Some(label),
        None => true,
    }
}

impl GradeStore for MemoryGradeStore {
    fn find_grades(
        &self,
        tenant: &TenantId,
        employee: &EmployeeId,
        pairs: &[GradeQuery],
    ) -> Result<Vec<RecordedGrade>, StoreError> {
        let guard = self.grades.lock().expect("grade mutex poisoned");
        Ok(guard
            .get(tenant)
            .map(|grades| {
                grades
                    .iter()
                    .filter(|grade| {
                        grade.employee_id == *employee
                            && pairs.iter().any(|pair| pair_matches(pair, grade))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn upsert_result(&self, tenant: &TenantId, grade: RecordedGrade) -> Result<(), StoreError> {
        let mut guard = self.grades.lock().expect("grade mutex poisoned");
        let grades = guard.entry(tenant.clone()).or_default();
        let existing = grades.iter_mut().find(|candidate| {
            candidate.employee_id == grade.employee_id
                && candidate.kpi_id == grade.kpi_id
                && candidate.label_id == grade.label_id
                && candidate.period_start == grade.period_start
                && candidate.period_end == grade.period_end
        });
        match existing {
            Some(slot) => {
                let created_at = slot.created_at;
                *slot = grade;
                slot.created_at = created_at;
            }
            None => grades.push(grade),
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryActivityStore {
    records: Arc<Mutex<HashMap<TenantId, Vec<crate::domain::ActivityRecord>>>>,
}

impl MemoryActivityStore {
    pub fn insert(&self, tenant: &TenantId, record: crate::domain::ActivityRecord) {
        self.records
            .lock()
            .expect("activity mutex poisoned")
            .entry(tenant.clone())
            .or_default()
            .push(record);
    }
}

impl ActivityStore for MemoryActivityStore {
    fn evaluable_values(
        &self,
        tenant: &TenantId,
        query: &ActivityQuery,
    ) -> Result<Vec<Value>, StoreError> {
        let guard = self.records.lock().expect("activity mutex poisoned");
        let Some(records) = guard.get(tenant) else {
            return Ok(Vec::new());
        };

        let mut values = Vec::new();
        for record in records {
            if record.task_id != query.task_id || record.employee_id != query.employee_id {
                continue;
            }
            if !query
                .equality
                .iter()
                .all(|filter| record.field(&filter.key) == Some(&filter.value))
            {
                continue;
            }
            let Some(stamp) = record.timestamp(&query.date_field) else {
                continue;
            };
            if stamp < query.start || stamp > query.end {
                continue;
            }
            let weekday =
                chrono::Datelike::weekday(&stamp.with_timezone(&query.tz).date_naive());
            if query.excluded_weekdays.contains(&weekday) {
                continue;
            }
            match record.field(&query.project) {
                Some(Value::Null) | None => {}
                Some(value) => values.push(value.clone()),
            }
        }
        Ok(values)
    }
}

#[derive(Default, Clone)]
pub struct MemoryBandStore {
    bands: Arc<Mutex<HashMap<TenantId, Vec<PerformanceBand>>>>,
}

impl MemoryBandStore {
    pub fn set_bands(&self, tenant: &TenantId, bands: Vec<PerformanceBand>) {
        self.bands
            .lock()
            .expect("band mutex poisoned")
            .insert(tenant.clone(), bands);
    }
}

impl BandStore for MemoryBandStore {
    fn bands(&self, tenant: &TenantId) -> Result<Vec<PerformanceBand>, StoreError> {
        let guard = self.bands.lock().expect("band mutex poisoned");
        Ok(guard.get(tenant).cloned().unwrap_or_default())
    }
}

#[derive(Default, Clone)]
pub struct MemoryHistoryStore {
    snapshots: Arc<Mutex<HashMap<(TenantId, SnapshotKey), EvaluationSnapshot>>>,
}

impl MemoryHistoryStore {
    pub fn count(&self, tenant: &TenantId) -> usize {
        self.snapshots
            .lock()
            .expect("history mutex poisoned")
            .keys()
            .filter(|(owner, _)| owner == tenant)
            .count()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn upsert(&self, tenant: &TenantId, snapshot: EvaluationSnapshot) -> Result<(), StoreError> {
        let mut guard = self.snapshots.lock().expect("history mutex poisoned");
        let key = (tenant.clone(), snapshot.key.clone());
        match guard.get_mut(&key) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = snapshot;
                existing.created_at = created_at;
            }
            None => {
                guard.insert(key, snapshot);
            }
        }
        Ok(())
    }

    fn lookup(
        &self,
        tenant: &TenantId,
        key: &SnapshotKey,
    ) -> Result<Option<EvaluationSnapshot>, StoreError> {
        let guard = self.snapshots.lock().expect("history mutex poisoned");
        Ok(guard.get(&(tenant.clone(), key.clone())).cloned())
    }

    fn for_employee(
        &self,
        tenant: &TenantId,
        employee: &EmployeeId,
    ) -> Result<Vec<EvaluationSnapshot>, StoreError> {
        let guard = self.snapshots.lock().expect("history mutex poisoned");
        let mut found: Vec<EvaluationSnapshot> = guard
            .iter()
            .filter(|((owner, key), _)| owner == tenant && key.employee_id == *employee)
            .map(|(_, snapshot)| snapshot.clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[derive(Default, Clone)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, (String, Option<Instant>)>>>,
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut guard = self.entries.lock().expect("cache mutex poisoned");
        match guard.get(key) {
            Some((_, Some(expiry))) if *expiry <= Instant::now() => {
                guard.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expiry = Instant::now().checked_add(ttl);
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(key.to_string(), (value, expiry));
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryEventQueue {
    events: Arc<Mutex<Vec<ActivityEvent>>>,
}

impl EventQueue for MemoryEventQueue {
    fn push(&self, event: ActivityEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .expect("event queue mutex poisoned")
            .push(event);
        Ok(())
    }

    fn drain(&self) -> Result<Vec<ActivityEvent>, StoreError> {
        let mut guard = self.events.lock().expect("event queue mutex poisoned");
        Ok(std::mem::take(&mut *guard))
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.events.lock().expect("event queue mutex poisoned").len())
    }
}

/// Dispatcher that records submitted jobs without running them; tests assert
/// on the captured jobs.
#[derive(Default, Clone)]
pub struct RecordingDispatcher {
    jobs: Arc<Mutex<Vec<PersistJob>>>,
}

impl RecordingDispatcher {
    pub fn jobs(&self) -> Vec<PersistJob> {
        self.jobs.lock().expect("dispatcher mutex poisoned").clone()
    }
}

impl JobDispatcher for RecordingDispatcher {
    fn dispatch(&self, job: PersistJob) -> Result<(), DispatchError> {
        self.jobs.lock().expect("dispatcher mutex poisoned").push(job);
        Ok(())
    }
}

/// Dispatcher that always fails; exercises the swallow-and-log path.
#[derive(Default, Clone, Copy)]
pub struct FailingDispatcher;

impl JobDispatcher for FailingDispatcher {
    fn dispatch(&self, _job: PersistJob) -> Result<(), DispatchError> {
        Err(DispatchError::Unavailable("dispatcher offline".to_string()))
    }
}
