//! Hierarchical weighted scoring: sections of weighted KPIs combined into a
//! final score per employee, with scope dispatch over evaluation, employee,
//! and department requests.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::cache::{CacheError, DefinitionCache};
use crate::calendar::{
    resolve_window, CalendarError, EvaluationFilter, EvaluationWindow,
};
use crate::classify::classify;
use crate::domain::{
    round2, DepartmentId, Employee, EmployeeId, EvaluationDefinition, EvaluationId,
    EvaluationSnapshot, KpiKind, KpiRef, KpiScore, PerformanceLevel, Section, SectionId,
    SectionScore, SnapshotKey, TaskId,
};
use crate::fanout::bounded_map;
use crate::history::EvaluationHistory;
use crate::metrics::{MetricCalculator, MetricError};
use crate::store::{
    BandStore, EmployeeStore, GradeQuery, GradeStore, JobDispatcher, PersistJob, StoreError,
};
use crate::tenancy::TenantId;

/// Error raised while computing a score. Not-found conditions are absent
/// results, never errors.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Metric(#[from] MetricError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a scoring request ranges over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringScope {
    /// Every employee assigned to the evaluation.
    Evaluation { evaluation: EvaluationId },
    /// One employee against the evaluation.
    Employee {
        evaluation: EvaluationId,
        employee: EmployeeId,
    },
    /// Every employee of a department against the evaluation.
    Department {
        evaluation: EvaluationId,
        department: DepartmentId,
    },
}

impl ScoringScope {
    fn evaluation(&self) -> &EvaluationId {
        match self {
            Self::Evaluation { evaluation }
            | Self::Employee { evaluation, .. }
            | Self::Department { evaluation, .. } => evaluation,
        }
    }
}

/// Scored breakdown for one employee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeScorecard {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub department: String,
    pub position: String,
    pub final_score: f64,
    pub performance: PerformanceLevel,
    pub sections: Vec<SectionScore>,
}

/// Cohort average for one section across a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionAverage {
    pub section_id: SectionId,
    pub average: f64,
}

/// Batch output: every scorecard plus cohort aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortReport {
    pub results: Vec<EmployeeScorecard>,
    pub mean_score: f64,
    pub section_averages: Vec<SectionAverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScoreBody {
    Single(EmployeeScorecard),
    Cohort(CohortReport),
}

/// Scoring response: the resolved window plus the scope-shaped body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub filter: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub body: ScoreBody,
}

/// Flat view of an evaluation's structure (sections and weighted KPIs).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionsOverview {
    pub evaluation_id: EvaluationId,
    pub name: String,
    pub sections: Vec<SectionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionSummary {
    pub id: SectionId,
    pub title: String,
    pub weight: f64,
    pub kpis: Vec<KpiSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSummary {
    pub id: crate::domain::KpiId,
    pub name: String,
    pub weight: f64,
}

/// The scoring engine. Stateless per call; every shared mutable resource
/// lives behind the injected stores.
pub struct ScoringService {
    cache: DefinitionCache,
    calculator: MetricCalculator,
    employees: Arc<dyn EmployeeStore>,
    grades: Arc<dyn GradeStore>,
    bands: Arc<dyn BandStore>,
    history: EvaluationHistory,
    dispatcher: Arc<dyn JobDispatcher>,
    worker_cap: usize,
}

impl ScoringService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: DefinitionCache,
        calculator: MetricCalculator,
        employees: Arc<dyn EmployeeStore>,
        grades: Arc<dyn GradeStore>,
        bands: Arc<dyn BandStore>,
        history: EvaluationHistory,
        dispatcher: Arc<dyn JobDispatcher>,
        worker_cap: usize,
    ) -> Self {
        Self {
            cache,
            calculator,
            employees,
            grades,
            bands,
            history,
            dispatcher,
            worker_cap,
        }
    }

    /// Scores a request. Returns `Ok(None)` when the evaluation, employee, or
    /// department roster cannot be found.
    pub fn score(
        &self,
        tenant: &TenantId,
        scope: &ScoringScope,
        filter_name: &str,
        explicit_start: Option<&str>,
        explicit_end: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<ScoreReport>, ScoringError> {
        let filter = EvaluationFilter::parse(filter_name)?;
        let Some(definition) = self.cache.get_or_load(tenant, scope.evaluation())? else {
            return Ok(None);
        };
        let window = resolve_window(
            filter,
            explicit_start,
            explicit_end,
            &definition.non_working_days,
            now,
            self.calculator.timezone(),
        )?;

        let body = match scope {
            ScoringScope::Employee { employee, .. } => {
                match self.score_one(tenant, &definition, employee, window, filter, now)? {
                    Some(card) => ScoreBody::Single(card),
                    None => return Ok(None),
                }
            }
            ScoringScope::Evaluation { .. } => {
                let roster = definition.evaluated_employees.clone();
                if roster.is_empty() {
                    return Ok(None);
                }
                ScoreBody::Cohort(self.score_roster(tenant, &definition, roster, window, filter, now)?)
            }
            ScoringScope::Department { department, .. } => {
                let members = self.employees.by_department(tenant, department)?;
                if members.is_empty() {
                    return Ok(None);
                }
                let roster = members.into_iter().map(|employee| employee.id).collect();
                ScoreBody::Cohort(self.score_roster(tenant, &definition, roster, window, filter, now)?)
            }
        };

        Ok(Some(ScoreReport {
            filter: filter.wire_name().to_string(),
            start: window.start,
            end: window.end,
            body,
        }))
    }

    /// Structure view used by dashboards: sections with their weighted KPIs.
    pub fn sections_overview(
        &self,
        tenant: &TenantId,
        evaluation: &EvaluationId,
    ) -> Result<Option<SectionsOverview>, ScoringError> {
        let Some(definition) = self.cache.get_or_load(tenant, evaluation)? else {
            return Ok(None);
        };
        Ok(Some(SectionsOverview {
            evaluation_id: definition.id,
            name: definition.name,
            sections: definition
                .sections
                .into_iter()
                .map(|section| SectionSummary {
                    id: section.id,
                    title: section.title,
                    weight: section.weight,
                    kpis: section
                        .kpis
                        .into_iter()
                        .map(|kpi| KpiSummary {
                            id: kpi.kpi_id,
                            name: kpi.metadata.name,
                            weight: kpi.weight,
                        })
                        .collect(),
                })
                .collect(),
        }))
    }

    fn score_roster(
        &self,
        tenant: &TenantId,
        definition: &EvaluationDefinition,
        roster: Vec<EmployeeId>,
        window: EvaluationWindow,
        filter: EvaluationFilter,
        now: DateTime<Utc>,
    ) -> Result<CohortReport, ScoringError> {
        let outcomes = bounded_map(roster, self.worker_cap, |employee_id| {
            self.score_one(tenant, definition, &employee_id, window, filter, now)
                .map(|card| (employee_id, card))
        });

        let mut results = Vec::new();
        for outcome in outcomes {
            let (employee_id, card) = outcome?;
            match card {
                Some(card) => results.push(card),
                None => {
                    warn!(tenant = %tenant, employee = %employee_id.0, "employee missing, dropped from batch");
                }
            }
        }

        let mean_score = if results.is_empty() {
            0.0
        } else {
            round2(results.iter().map(|card| card.final_score).sum::<f64>() / results.len() as f64)
        };

        let mut section_averages = Vec::new();
        for section in &definition.sections {
            let scores: Vec<f64> = results
                .iter()
                .filter_map(|card| {
                    card.sections
                        .iter()
                        .find(|scored| scored.section_id == section.id)
                        .map(|scored| scored.score)
                })
                .collect();
            if !scores.is_empty() {
                section_averages.push(SectionAverage {
                    section_id: section.id.clone(),
                    average: round2(scores.iter().sum::<f64>() / scores.len() as f64),
                });
            }
        }

        Ok(CohortReport {
            results,
            mean_score,
            section_averages,
        })
    }

    fn score_one(
        &self,
        tenant: &TenantId,
        definition: &EvaluationDefinition,
        employee_id: &EmployeeId,
        window: EvaluationWindow,
        filter: EvaluationFilter,
        now: DateTime<Utc>,
    ) -> Result<Option<EmployeeScorecard>, ScoringError> {
        let Some(employee) = self.employees.fetch_employee(tenant, employee_id)? else {
            return Ok(None);
        };

        let key = SnapshotKey {
            employee_id: employee.id.clone(),
            evaluation_id: definition.id.clone(),
            filter_name: filter.wire_name().to_string(),
            start: window.start,
            end: window.end,
        };

        if filter.is_cacheable() {
            if let Some(snapshot) = self.history.lookup(tenant, &key)? {
                return Ok(Some(scorecard_from_snapshot(snapshot)));
            }
        }

        let mut final_score = 0.0;
        let mut sections = Vec::with_capacity(definition.sections.len());
        for section in &definition.sections {
            let scored = self.score_section(tenant, section, &employee, window)?;
            final_score += scored.weighted;
            sections.push(scored);
        }
        let final_score = round2(final_score);

        let performance = self.classify_or_sentinel(tenant, &employee, final_score);

        let card = EmployeeScorecard {
            employee_id: employee.id.clone(),
            employee_name: employee.full_name(),
            department: employee.department.clone(),
            position: employee.position.clone(),
            final_score,
            performance,
            sections,
        };

        if filter.is_cacheable() {
            let job = PersistJob {
                tenant: tenant.clone(),
                snapshot: snapshot_from_scorecard(&card, key, now),
            };
            if let Err(err) = self.dispatcher.dispatch(job) {
                warn!(
                    tenant = %tenant,
                    employee = %card.employee_id.0,
                    error = %err,
                    "async snapshot persistence not dispatched"
                );
            }
        }

        Ok(Some(card))
    }

    fn score_section(
        &self,
        tenant: &TenantId,
        section: &Section,
        employee: &Employee,
        window: EvaluationWindow,
    ) -> Result<SectionScore, ScoringError> {
        let mut recorded: Vec<&KpiRef> = Vec::new();
        let mut metric: Vec<(&KpiRef, TaskId)> = Vec::new();
        for kpi in &section.kpis {
            match kpi.kind {
                KpiKind::Recorded => recorded.push(kpi),
                KpiKind::Metric => match &kpi.metadata.task {
                    Some(task) => metric.push((kpi, task.clone())),
                    // Metric KPIs without a task are excluded from output and score.
                    None => {}
                },
            }
        }

        let mut details = Vec::with_capacity(recorded.len() + metric.len());

        if !recorded.is_empty() {
            let pairs: Vec<GradeQuery> = recorded
                .iter()
                .map(|kpi| GradeQuery {
                    kpi_id: kpi.kpi_id.clone(),
                    label_id: kpi.label_id.clone(),
                })
                .collect();
            let found = self.grades.find_grades(tenant, &employee.id, &pairs)?;

            for kpi in &recorded {
                let grade = found
                    .iter()
                    .find(|grade| {
                        grade.kpi_id == kpi.kpi_id
                            && match &kpi.label_id {
                                Some(label) => grade.label_id.as_ref() == Some(label),
                                None => true,
                            }
                    })
                    .map(|grade| grade.grade)
                    .unwrap_or(0.0);
                details.push(KpiScore {
                    kpi_id: kpi.kpi_id.clone(),
                    name: kpi.metadata.name.clone(),
                    weight: kpi.weight,
                    grade: round2(grade),
                    weighted: round2(grade * kpi.weight / 100.0),
                    target: kpi.metadata.target,
                });
            }
        }

        // Metric KPIs evaluate concurrently and join before the section closes.
        let evaluated = bounded_map(metric, self.worker_cap, |(kpi, task)| {
            self.calculator
                .evaluate(tenant, &task, &kpi.metadata, &employee.id, window.start, window.end)
                .map(|result| KpiScore {
                    kpi_id: kpi.kpi_id.clone(),
                    name: kpi.metadata.name.clone(),
                    weight: kpi.weight,
                    grade: round2(result.percentage),
                    weighted: round2(result.percentage * kpi.weight / 100.0),
                    target: Some(result.target_for_period),
                })
        });
        for row in evaluated {
            details.push(row?);
        }

        let score = round2(details.iter().map(|kpi| kpi.weighted).sum::<f64>());
        let weighted = round2(score * section.weight / 100.0);

        Ok(SectionScore {
            section_id: section.id.clone(),
            title: section.title.clone(),
            score,
            weighted,
            kpis: details,
        })
    }

    fn classify_or_sentinel(
        &self,
        tenant: &TenantId,
        employee: &Employee,
        score: f64,
    ) -> PerformanceLevel {
        let bands = match self.bands.bands(tenant) {
            Ok(bands) => bands,
            Err(err) => {
                warn!(tenant = %tenant, employee = %employee.id.0, error = %err, "band table unavailable");
                return PerformanceLevel::error_sentinel();
            }
        };
        match classify(score, &bands) {
            Ok(level) => level,
            Err(err) => {
                warn!(tenant = %tenant, employee = %employee.id.0, error = %err, "score did not classify");
                PerformanceLevel::error_sentinel()
            }
        }
    }
}

fn snapshot_from_scorecard(
    card: &EmployeeScorecard,
    key: SnapshotKey,
    now: DateTime<Utc>,
) -> EvaluationSnapshot {
    EvaluationSnapshot {
        key,
        employee_name: card.employee_name.clone(),
        department: card.department.clone(),
        position: card.position.clone(),
        final_score: card.final_score,
        performance: card.performance.clone(),
        sections: card.sections.clone(),
        created_at: now,
    }
}

fn scorecard_from_snapshot(snapshot: EvaluationSnapshot) -> EmployeeScorecard {
    EmployeeScorecard {
        employee_id: snapshot.key.employee_id,
        employee_name: snapshot.employee_name,
        department: snapshot.department,
        position: snapshot.position,
        final_score: snapshot.final_score,
        performance: snapshot.performance,
        sections: snapshot.sections,
    }
}
