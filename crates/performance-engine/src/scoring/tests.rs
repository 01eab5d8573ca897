use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc, Weekday};
use serde_json::json;

use crate::cache::DefinitionCache;
use crate::domain::{
    ActivityRecord, DepartmentId, Employee, EmployeeId, EvaluationId, EvaluationSnapshot, KpiId,
    KpiMetadata, KpiRecord, PerformanceBand, PerformanceLevel, RawDefinition, RawKpiRef,
    RawSection, RecordedGrade, SectionId, SnapshotKey, TaskId, CREATED_FIELD,
};
use crate::history::EvaluationHistory;
use crate::metrics::MetricCalculator;
use crate::store::memory::{
    MemoryActivityStore, MemoryBandStore, MemoryCacheStore, MemoryDefinitionStore,
    MemoryEmployeeStore, MemoryGradeStore, MemoryHistoryStore, MemoryKpiStore,
    RecordingDispatcher,
};
use crate::tenancy::TenantId;

use super::{ScoreBody, ScoringScope, ScoringService};

fn tz() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).expect("valid offset")
}

fn tenant() -> TenantId {
    TenantId("chasqi".into())
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().expect("valid instant")
}

struct Fixture {
    service: ScoringService,
    definitions: MemoryDefinitionStore,
    kpis: MemoryKpiStore,
    employees: MemoryEmployeeStore,
    grades: MemoryGradeStore,
    bands: MemoryBandStore,
    activity: MemoryActivityStore,
    history: MemoryHistoryStore,
    dispatcher: RecordingDispatcher,
}

fn fixture() -> Fixture {
    let definitions = MemoryDefinitionStore::default();
    let kpis = MemoryKpiStore::default();
    let employees = MemoryEmployeeStore::default();
    let grades = MemoryGradeStore::default();
    let bands = MemoryBandStore::default();
    let activity = MemoryActivityStore::default();
    let history = MemoryHistoryStore::default();
    let dispatcher = RecordingDispatcher::default();

    let service = ScoringService::new(
        DefinitionCache::new(
            Arc::new(definitions.clone()),
            Arc::new(kpis.clone()),
            Arc::new(MemoryCacheStore::default()),
            Duration::from_secs(21_600),
        ),
        MetricCalculator::new(Arc::new(activity.clone()), tz()),
        Arc::new(employees.clone()),
        Arc::new(grades.clone()),
        Arc::new(bands.clone()),
        EvaluationHistory::new(Arc::new(history.clone())),
        Arc::new(dispatcher.clone()),
        4,
    );

    Fixture {
        service,
        definitions,
        kpis,
        employees,
        grades,
        bands,
        activity,
        history,
        dispatcher,
    }
}

fn default_bands() -> Vec<PerformanceBand> {
    vec![
        PerformanceBand { label: "Bajo".into(), color: "#D9534F".into(), min: 0.0, max: 40.0 },
        PerformanceBand { label: "Regular".into(), color: "#F0AD4E".into(), min: 40.0, max: 70.0 },
        PerformanceBand { label: "Bueno".into(), color: "#5BC0DE".into(), min: 70.0, max: 90.0 },
        PerformanceBand { label: "Excelente".into(), color: "#5CB85C".into(), min: 90.0, max: 100.0 },
    ]
}

fn employee(id: &str, first: &str, last: &str) -> Employee {
    Employee {
        id: EmployeeId(id.into()),
        first_names: first.into(),
        last_names: last.into(),
        department: "Comercial".into(),
        position: "Ejecutiva".into(),
    }
}

fn recorded_kpi(id: &str, name: &str) -> KpiRecord {
    KpiRecord {
        id: KpiId(id.into()),
        kpi_type: "question".into(),
        metadata: KpiMetadata { name: name.into(), ..KpiMetadata::default() },
    }
}

fn grade(employee: &str, kpi: &str, value: f64) -> RecordedGrade {
    RecordedGrade {
        employee_id: EmployeeId(employee.into()),
        kpi_id: KpiId(kpi.into()),
        label_id: None,
        grade: value,
        raw_total: None,
        period_target: None,
        surplus_deficit: None,
        period_start: None,
        period_end: None,
        working_days: None,
        non_working_days: None,
        created_at: at(2025, 1, 15, 12),
    }
}

/// One section at weight 100 holding two recorded KPIs (60/40).
fn seed_recorded_definition(fix: &Fixture) {
    fix.definitions.insert(
        &tenant(),
        RawDefinition {
            id: EvaluationId("ev-1".into()),
            name: "Evaluación comercial".into(),
            non_working_days: vec![Weekday::Sat, Weekday::Sun],
            evaluated_employees: vec![
                EmployeeId("emp-1".into()),
                EmployeeId("emp-2".into()),
                EmployeeId("emp-404".into()),
            ],
            sections: vec![RawSection {
                id: SectionId("sec-1".into()),
                title: "Desempeño".into(),
                weight: 100.0,
                kpis: vec![
                    RawKpiRef { kpi_id: KpiId("kpi-a".into()), weight: 60.0, label_id: None },
                    RawKpiRef { kpi_id: KpiId("kpi-b".into()), weight: 40.0, label_id: None },
                ],
            }],
        },
    );
    fix.kpis.insert(&tenant(), recorded_kpi("kpi-a", "Atención"));
    fix.kpis.insert(&tenant(), recorded_kpi("kpi-b", "Puntualidad"));
    fix.employees.insert(&tenant(), employee("emp-1", "Ana", "Suárez"));
    fix.employees.insert(&tenant(), employee("emp-2", "Luis", "Mora"));
    fix.employees.insert_department(&tenant(), DepartmentId("dep-1".into()), "Comercial");
    fix.grades.insert(&tenant(), grade("emp-1", "kpi-a", 80.0));
    fix.grades.insert(&tenant(), grade("emp-1", "kpi-b", 50.0));
    fix.grades.insert(&tenant(), grade("emp-2", "kpi-a", 60.0));
    fix.grades.insert(&tenant(), grade("emp-2", "kpi-b", 40.0));
    fix.bands.set_bands(&tenant(), default_bands());
}

/// One section mixing a task-backed metric KPI with a task-less one.
fn seed_metric_definition(fix: &Fixture) {
    fix.definitions.insert(
        &tenant(),
        RawDefinition {
            id: EvaluationId("ev-2".into()),
            name: "Operaciones".into(),
            non_working_days: vec![Weekday::Sat, Weekday::Sun],
            evaluated_employees: vec![EmployeeId("emp-1".into())],
            sections: vec![RawSection {
                id: SectionId("sec-m".into()),
                title: "Entregas".into(),
                weight: 100.0,
                kpis: vec![
                    RawKpiRef { kpi_id: KpiId("kpi-m".into()), weight: 50.0, label_id: None },
                    RawKpiRef { kpi_id: KpiId("kpi-sin-task".into()), weight: 50.0, label_id: None },
                ],
            }],
        },
    );
    fix.kpis.insert(
        &tenant(),
        KpiRecord {
            id: KpiId("kpi-m".into()),
            kpi_type: "metrics".into(),
            metadata: KpiMetadata {
                name: "Entregas diarias".into(),
                target: Some(1.0),
                formula: Some("count".into()),
                evaluable_field: Some("Entrega".into()),
                task: Some(TaskId("task-1".into())),
                ..KpiMetadata::default()
            },
        },
    );
    fix.kpis.insert(
        &tenant(),
        KpiRecord {
            id: KpiId("kpi-sin-task".into()),
            kpi_type: "metrics".into(),
            metadata: KpiMetadata {
                name: "KPI huérfano".into(),
                formula: Some("count".into()),
                evaluable_field: Some("Entrega".into()),
                ..KpiMetadata::default()
            },
        },
    );
    fix.employees.insert(&tenant(), employee("emp-1", "Ana", "Suárez"));
    fix.bands.set_bands(&tenant(), default_bands());

    // One delivery per working day, Monday Jan 6 through Friday Jan 10.
    for day in 6..=10 {
        let mut fields = BTreeMap::new();
        fields.insert(
            CREATED_FIELD.to_string(),
            json!(format!("2025-01-{day:02}T09:00:00-05:00")),
        );
        fields.insert("Entrega".to_string(), json!("ok"));
        fix.activity.insert(
            &tenant(),
            ActivityRecord {
                task_id: TaskId("task-1".into()),
                employee_id: EmployeeId("emp-1".into()),
                fields,
            },
        );
    }
}

fn single_scope(evaluation: &str, employee: &str) -> ScoringScope {
    ScoringScope::Employee {
        evaluation: EvaluationId(evaluation.into()),
        employee: EmployeeId(employee.into()),
    }
}

#[test]
fn weighted_section_combines_recorded_grades() {
    let fix = fixture();
    seed_recorded_definition(&fix);

    let report = fix
        .service
        .score(
            &tenant(),
            &single_scope("ev-1", "emp-1"),
            "rango_de_fechas",
            Some("2025-01-01"),
            Some("2025-01-31"),
            at(2025, 2, 15, 12),
        )
        .expect("scores")
        .expect("found");

    let ScoreBody::Single(card) = report.body else {
        panic!("expected single scorecard");
    };
    assert_eq!(card.final_score, 68.0);
    assert_eq!(card.sections.len(), 1);
    assert_eq!(card.sections[0].score, 68.0);
    assert_eq!(card.sections[0].weighted, 68.0);
    assert_eq!(card.sections[0].kpis[0].weighted, 48.0);
    assert_eq!(card.sections[0].kpis[1].weighted, 20.0);
    assert_eq!(card.performance.label, "Regular");
    assert_eq!(card.employee_name, "Ana Suárez");
}

#[test]
fn absent_grades_default_to_zero() {
    let fix = fixture();
    seed_recorded_definition(&fix);
    fix.employees.insert(&tenant(), employee("emp-3", "Rosa", "Paz"));

    let report = fix
        .service
        .score(
            &tenant(),
            &single_scope("ev-1", "emp-3"),
            "rango_de_fechas",
            Some("2025-01-01"),
            Some("2025-01-31"),
            at(2025, 2, 15, 12),
        )
        .expect("scores")
        .expect("found");

    let ScoreBody::Single(card) = report.body else {
        panic!("expected single scorecard");
    };
    assert_eq!(card.final_score, 0.0);
    assert_eq!(card.performance.label, "Bajo");
}

#[test]
fn taskless_metric_kpis_are_excluded_entirely() {
    let fix = fixture();
    seed_metric_definition(&fix);

    let report = fix
        .service
        .score(
            &tenant(),
            &single_scope("ev-2", "emp-1"),
            "rango_de_fechas",
            Some("2025-01-06"),
            Some("2025-01-10"),
            at(2025, 2, 15, 12),
        )
        .expect("scores")
        .expect("found");

    let ScoreBody::Single(card) = report.body else {
        panic!("expected single scorecard");
    };
    let section = &card.sections[0];
    // Only the task-backed KPI appears; 5 deliveries vs a 5-delivery target.
    assert_eq!(section.kpis.len(), 1);
    assert_eq!(section.kpis[0].grade, 100.0);
    assert_eq!(section.kpis[0].weighted, 50.0);
    assert_eq!(section.kpis[0].target, Some(5.0));
    assert_eq!(section.score, 50.0);
    assert_eq!(card.final_score, 50.0);
}

#[test]
fn evaluation_scope_scores_the_roster_and_averages() {
    let fix = fixture();
    seed_recorded_definition(&fix);

    let report = fix
        .service
        .score(
            &tenant(),
            &ScoringScope::Evaluation { evaluation: EvaluationId("ev-1".into()) },
            "rango_de_fechas",
            Some("2025-01-01"),
            Some("2025-01-31"),
            at(2025, 2, 15, 12),
        )
        .expect("scores")
        .expect("found");

    let ScoreBody::Cohort(cohort) = report.body else {
        panic!("expected cohort report");
    };
    // emp-404 has no master record and is dropped from the batch.
    assert_eq!(cohort.results.len(), 2);
    assert_eq!(cohort.results[0].final_score, 68.0);
    assert_eq!(cohort.results[1].final_score, 52.0);
    assert_eq!(cohort.mean_score, 60.0);
    assert_eq!(cohort.section_averages.len(), 1);
    assert_eq!(cohort.section_averages[0].average, 60.0);
}

#[test]
fn department_scope_uses_the_department_roster() {
    let fix = fixture();
    seed_recorded_definition(&fix);

    let report = fix
        .service
        .score(
            &tenant(),
            &ScoringScope::Department {
                evaluation: EvaluationId("ev-1".into()),
                department: DepartmentId("dep-1".into()),
            },
            "rango_de_fechas",
            Some("2025-01-01"),
            Some("2025-01-31"),
            at(2025, 2, 15, 12),
        )
        .expect("scores")
        .expect("found");

    let ScoreBody::Cohort(cohort) = report.body else {
        panic!("expected cohort report");
    };
    assert_eq!(cohort.results.len(), 2);

    let missing = fix
        .service
        .score(
            &tenant(),
            &ScoringScope::Department {
                evaluation: EvaluationId("ev-1".into()),
                department: DepartmentId("dep-404".into()),
            },
            "rango_de_fechas",
            Some("2025-01-01"),
            Some("2025-01-31"),
            at(2025, 2, 15, 12),
        )
        .expect("callable");
    assert!(missing.is_none());
}

#[test]
fn cacheable_filters_dispatch_async_persistence() {
    let fix = fixture();
    seed_recorded_definition(&fix);

    fix.service
        .score(
            &tenant(),
            &single_scope("ev-1", "emp-1"),
            "ultimo_mes",
            None,
            None,
            at(2025, 2, 15, 12),
        )
        .expect("scores")
        .expect("found");

    let jobs = fix.dispatcher.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].snapshot.final_score, 68.0);
    assert_eq!(jobs[0].snapshot.key.filter_name, "ultimo_mes");
}

#[test]
fn short_filters_never_dispatch_persistence() {
    let fix = fixture();
    seed_recorded_definition(&fix);

    fix.service
        .score(
            &tenant(),
            &single_scope("ev-1", "emp-1"),
            "rango_de_fechas",
            Some("2025-01-01"),
            Some("2025-01-31"),
            at(2025, 2, 15, 12),
        )
        .expect("scores")
        .expect("found");

    assert!(fix.dispatcher.jobs().is_empty());
}

#[test]
fn stored_snapshots_short_circuit_cacheable_recomputes() {
    let fix = fixture();
    seed_recorded_definition(&fix);
    let now = at(2025, 2, 15, 12);

    // Window the resolver will produce for ultimo_mes at `now`.
    let start = at(2025, 1, 1, 5);
    let end = Utc
        .with_ymd_and_hms(2025, 2, 1, 4, 59, 59)
        .single()
        .expect("valid instant");
    let key = SnapshotKey {
        employee_id: EmployeeId("emp-1".into()),
        evaluation_id: EvaluationId("ev-1".into()),
        filter_name: "ultimo_mes".into(),
        start,
        end,
    };
    crate::store::HistoryStore::upsert(
        &fix.history,
        &tenant(),
        EvaluationSnapshot {
            key,
            employee_name: "Ana Suárez".into(),
            department: "Comercial".into(),
            position: "Ejecutiva".into(),
            final_score: 99.0,
            performance: PerformanceLevel { label: "Excelente".into(), color: "#5CB85C".into() },
            sections: Vec::new(),
            created_at: now,
        },
    )
    .expect("seeds history");

    let report = fix
        .service
        .score(&tenant(), &single_scope("ev-1", "emp-1"), "ultimo_mes", None, None, now)
        .expect("scores")
        .expect("found");

    let ScoreBody::Single(card) = report.body else {
        panic!("expected single scorecard");
    };
    assert_eq!(card.final_score, 99.0);
    // Served from history, so nothing new was dispatched.
    assert!(fix.dispatcher.jobs().is_empty());
}

#[test]
fn classifier_failure_degrades_to_the_sentinel() {
    let fix = fixture();
    seed_recorded_definition(&fix);
    fix.bands.set_bands(&tenant(), Vec::new());

    let report = fix
        .service
        .score(
            &tenant(),
            &ScoringScope::Evaluation { evaluation: EvaluationId("ev-1".into()) },
            "rango_de_fechas",
            Some("2025-01-01"),
            Some("2025-01-31"),
            at(2025, 2, 15, 12),
        )
        .expect("batch still completes")
        .expect("found");

    let ScoreBody::Cohort(cohort) = report.body else {
        panic!("expected cohort report");
    };
    for card in &cohort.results {
        assert_eq!(card.performance, PerformanceLevel::error_sentinel());
    }
}

#[test]
fn unknown_evaluation_is_absent() {
    let fix = fixture();
    seed_recorded_definition(&fix);
    let report = fix
        .service
        .score(
            &tenant(),
            &single_scope("ev-404", "emp-1"),
            "ultimo_mes",
            None,
            None,
            at(2025, 2, 15, 12),
        )
        .expect("callable");
    assert!(report.is_none());
}

#[test]
fn sections_overview_lists_weighted_kpis() {
    let fix = fixture();
    seed_recorded_definition(&fix);

    let overview = fix
        .service
        .sections_overview(&tenant(), &EvaluationId("ev-1".into()))
        .expect("loads")
        .expect("present");

    assert_eq!(overview.name, "Evaluación comercial");
    assert_eq!(overview.sections.len(), 1);
    assert_eq!(overview.sections[0].kpis.len(), 2);
    assert_eq!(overview.sections[0].kpis[0].name, "Atención");

    assert!(fix
        .service
        .sections_overview(&tenant(), &EvaluationId("ev-404".into()))
        .expect("callable")
        .is_none());
}
