use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Utc, Weekday};
use metrics_exporter_prometheus::PrometheusHandle;
use performance_engine::config::EngineConfig;
use performance_engine::domain::{
    ActivityRecord, DepartmentId, Employee, EmployeeId, EvaluationId, KpiId, KpiMetadata,
    KpiRecord, PerformanceBand, RawDefinition, RawKpiRef, RawSection, RecordedGrade, SectionId,
    TaskId, TaskRecord, CREATED_FIELD,
};
use performance_engine::store::memory::{
    MemoryActivityStore, MemoryBandStore, MemoryCacheStore, MemoryDefinitionStore,
    MemoryEmployeeStore, MemoryEventQueue, MemoryGradeStore, MemoryHistoryStore, MemoryKpiStore,
    MemoryTaskStore,
};
use performance_engine::store::{
    DispatchError, EventQueue, HistoryStore, JobDispatcher, PersistJob,
};
use performance_engine::{
    DefinitionCache, EvaluationHistory, EventProcessor, MetricCalculator, ScoringService,
    TenantId,
};
use serde_json::json;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) engine: Arc<EngineContext>,
}

/// Engine wiring shared by every request handler. The in-memory stores stand
/// in for the tenant document store, cache, and queue backends.
pub(crate) struct EngineContext {
    pub(crate) scoring: ScoringService,
    pub(crate) processor: EventProcessor,
    pub(crate) replay_processor: EventProcessor,
    pub(crate) history: EvaluationHistory,
    pub(crate) queue: Arc<dyn EventQueue>,
}

/// Persists snapshots on a detached thread: fire-and-forget, at-least-once,
/// failures logged and swallowed.
pub(crate) struct ThreadDispatcher {
    history: Arc<dyn HistoryStore>,
}

impl JobDispatcher for ThreadDispatcher {
    fn dispatch(&self, job: PersistJob) -> Result<(), DispatchError> {
        let history = Arc::clone(&self.history);
        std::thread::Builder::new()
            .name("snapshot-persist".to_string())
            .spawn(move || {
                let service = EvaluationHistory::new(history);
                if let Err(err) = service.save(&job.tenant, job.snapshot, Utc::now()) {
                    tracing::warn!(tenant = %job.tenant, error = %err, "async snapshot persistence failed");
                }
            })
            .map_err(|err| DispatchError::Unavailable(err.to_string()))?;
        Ok(())
    }
}

pub(crate) fn build_context(config: &EngineConfig, seed_demo: bool) -> EngineContext {
    let definitions = MemoryDefinitionStore::default();
    let kpis = MemoryKpiStore::default();
    let tasks = MemoryTaskStore::default();
    let employees = MemoryEmployeeStore::default();
    let grades = MemoryGradeStore::default();
    let bands = MemoryBandStore::default();
    let activity = MemoryActivityStore::default();
    let history_store = MemoryHistoryStore::default();
    let queue = MemoryEventQueue::default();

    if seed_demo {
        seed_demo_tenant(
            &definitions,
            &kpis,
            &tasks,
            &employees,
            &grades,
            &bands,
            &activity,
        );
    }

    let tz = config.civil_timezone();
    let scoring = ScoringService::new(
        DefinitionCache::new(
            Arc::new(definitions),
            Arc::new(kpis.clone()),
            Arc::new(MemoryCacheStore::default()),
            Duration::from_secs(config.definition_cache_ttl_secs),
        ),
        MetricCalculator::new(Arc::new(activity.clone()), tz),
        Arc::new(employees),
        Arc::new(grades.clone()),
        Arc::new(bands),
        EvaluationHistory::new(Arc::new(history_store.clone())),
        Arc::new(ThreadDispatcher {
            history: Arc::new(history_store.clone()),
        }),
        config.worker_cap,
    );

    let processor = EventProcessor::new(
        Arc::new(queue.clone()),
        Arc::new(tasks.clone()),
        Arc::new(kpis.clone()),
        Arc::new(grades.clone()),
        MetricCalculator::new(Arc::new(activity.clone()), tz),
        config.debounce_secs,
        config.worker_cap,
    );
    let replay_processor = EventProcessor::new(
        Arc::new(queue.clone()),
        Arc::new(tasks),
        Arc::new(kpis),
        Arc::new(grades),
        MetricCalculator::new(Arc::new(activity), tz),
        config.replay_debounce_secs,
        config.worker_cap,
    );

    EngineContext {
        scoring,
        processor,
        replay_processor,
        history: EvaluationHistory::new(Arc::new(history_store)),
        queue: Arc::new(queue),
    }
}

pub(crate) fn demo_tenant() -> TenantId {
    TenantId("chasqi".into())
}

/// Seeds one tenant with a mixed evaluation so the service is exercisable
/// out of the box.
#[allow(clippy::too_many_arguments)]
fn seed_demo_tenant(
    definitions: &MemoryDefinitionStore,
    kpis: &MemoryKpiStore,
    tasks: &MemoryTaskStore,
    employees: &MemoryEmployeeStore,
    grades: &MemoryGradeStore,
    bands: &MemoryBandStore,
    activity: &MemoryActivityStore,
) {
    let tenant = demo_tenant();

    definitions.insert(
        &tenant,
        RawDefinition {
            id: EvaluationId("ev-demo".into()),
            name: "Evaluación demo".into(),
            non_working_days: vec![Weekday::Sat, Weekday::Sun],
            evaluated_employees: vec![EmployeeId("emp-1".into()), EmployeeId("emp-2".into())],
            sections: vec![
                RawSection {
                    id: SectionId("sec-competencias".into()),
                    title: "Competencias".into(),
                    weight: 60.0,
                    kpis: vec![RawKpiRef {
                        kpi_id: KpiId("kpi-liderazgo".into()),
                        weight: 100.0,
                        label_id: None,
                    }],
                },
                RawSection {
                    id: SectionId("sec-entregas".into()),
                    title: "Entregas".into(),
                    weight: 40.0,
                    kpis: vec![RawKpiRef {
                        kpi_id: KpiId("kpi-entregas".into()),
                        weight: 100.0,
                        label_id: None,
                    }],
                },
            ],
        },
    );

    kpis.insert(
        &tenant,
        KpiRecord {
            id: KpiId("kpi-liderazgo".into()),
            kpi_type: "question".into(),
            metadata: KpiMetadata {
                name: "Liderazgo".into(),
                ..KpiMetadata::default()
            },
        },
    );
    kpis.insert(
        &tenant,
        KpiRecord {
            id: KpiId("kpi-entregas".into()),
            kpi_type: "metrics".into(),
            metadata: KpiMetadata {
                name: "Entregas diarias".into(),
                target: Some(1.0),
                formula: Some("count".into()),
                evaluable_field: Some("Entrega".into()),
                task: Some(TaskId("task-entregas".into())),
                ..KpiMetadata::default()
            },
        },
    );
    tasks.insert(
        &tenant,
        TaskRecord {
            id: TaskId("task-entregas".into()),
            kpi_ids: vec![KpiId("kpi-entregas".into())],
        },
    );

    employees.insert_department(&tenant, DepartmentId("dep-comercial".into()), "Comercial");
    for (id, first, last) in [("emp-1", "Ana", "Suárez"), ("emp-2", "Luis", "Mora")] {
        employees.insert(
            &tenant,
            Employee {
                id: EmployeeId(id.into()),
                first_names: first.into(),
                last_names: last.into(),
                department: "Comercial".into(),
                position: "Ejecutivo".into(),
            },
        );
    }

    bands.set_bands(
        &tenant,
        vec![
            PerformanceBand { label: "Bajo".into(), color: "#D9534F".into(), min: 0.0, max: 40.0 },
            PerformanceBand { label: "Regular".into(), color: "#F0AD4E".into(), min: 40.0, max: 70.0 },
            PerformanceBand { label: "Bueno".into(), color: "#5BC0DE".into(), min: 70.0, max: 90.0 },
            PerformanceBand { label: "Excelente".into(), color: "#5CB85C".into(), min: 90.0, max: 100.0 },
        ],
    );

    for (employee, value) in [("emp-1", 85.0), ("emp-2", 55.0)] {
        grades.insert(
            &tenant,
            RecordedGrade {
                employee_id: EmployeeId(employee.into()),
                kpi_id: KpiId("kpi-liderazgo".into()),
                label_id: None,
                grade: value,
                raw_total: None,
                period_target: None,
                surplus_deficit: None,
                period_start: None,
                period_end: None,
                working_days: None,
                non_working_days: None,
                created_at: Utc::now(),
            },
        );
    }

    // A delivery this morning for each employee.
    let today = Utc::now().date_naive().format("%Y-%m-%d");
    for employee in ["emp-1", "emp-2"] {
        let mut fields = BTreeMap::new();
        fields.insert(CREATED_FIELD.to_string(), json!(format!("{today}T09:00:00-05:00")));
        fields.insert("Entrega".to_string(), json!("ok"));
        activity.insert(
            &tenant,
            ActivityRecord {
                task_id: TaskId("task-entregas".into()),
                employee_id: EmployeeId(employee.into()),
                fields,
            },
        );
    }
}
