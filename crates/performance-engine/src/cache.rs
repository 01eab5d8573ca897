//! TTL-cached, KPI-enriched evaluation definitions.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::{
    EvaluationDefinition, EvaluationId, KpiMetadata, KpiRecord, KpiRef, Section,
};
use crate::store::{CacheStore, DefinitionStore, KpiStore, StoreError};
use crate::tenancy::TenantId;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cached definition is not valid JSON: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Read-through cache over the definition store. Entries carry a fixed TTL
/// and are never actively invalidated; staleness is bounded by the TTL alone.
/// Concurrent misses for one key may each populate the entry; the results are
/// deterministic, so the duplicate work is harmless.
pub struct DefinitionCache {
    definitions: Arc<dyn DefinitionStore>,
    kpis: Arc<dyn KpiStore>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl DefinitionCache {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        kpis: Arc<dyn KpiStore>,
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            definitions,
            kpis,
            cache,
            ttl,
        }
    }

    pub fn cache_key(tenant: &TenantId, id: &EvaluationId) -> String {
        format!("tenant:{tenant}:evaluation:{}", id.0)
    }

    /// Returns the enriched definition, serving the cache when possible.
    /// A missing definition is an absent result, not an error.
    pub fn get_or_load(
        &self,
        tenant: &TenantId,
        id: &EvaluationId,
    ) -> Result<Option<EvaluationDefinition>, CacheError> {
        let key = Self::cache_key(tenant, id);
        if let Some(cached) = self.cache.get(&key)? {
            let definition = serde_json::from_str(&cached)?;
            return Ok(Some(definition));
        }

        let Some(raw) = self.definitions.fetch_definition(tenant, id)? else {
            return Ok(None);
        };

        let mut kpi_ids = BTreeSet::new();
        for section in &raw.sections {
            for kpi in &section.kpis {
                kpi_ids.insert(kpi.kpi_id.clone());
            }
        }
        let kpi_ids: Vec<_> = kpi_ids.into_iter().collect();
        let records = self.kpis.fetch_many(tenant, &kpi_ids)?;
        let by_id: std::collections::HashMap<_, _> =
            records.into_iter().map(|record| (record.id.clone(), record)).collect();

        let sections = raw
            .sections
            .into_iter()
            .map(|section| Section {
                id: section.id,
                title: section.title,
                weight: section.weight,
                kpis: section
                    .kpis
                    .into_iter()
                    .map(|slot| enrich(slot, &by_id))
                    .collect(),
            })
            .collect();

        let definition = EvaluationDefinition {
            id: raw.id,
            name: raw.name,
            non_working_days: raw.non_working_days,
            evaluated_employees: raw.evaluated_employees,
            sections,
        };

        let serialized = serde_json::to_string(&definition)?;
        self.cache.set_with_ttl(&key, serialized, self.ttl)?;
        debug!(tenant = %tenant, evaluation = %definition.id.0, "definition cached");

        Ok(Some(definition))
    }
}

fn enrich(
    slot: crate::domain::RawKpiRef,
    records: &std::collections::HashMap<crate::domain::KpiId, KpiRecord>,
) -> KpiRef {
    match records.get(&slot.kpi_id) {
        Some(record) => KpiRef {
            kpi_id: slot.kpi_id,
            weight: slot.weight,
            label_id: slot.label_id,
            kind: record.kind(),
            metadata: record.metadata.clone(),
        },
        // Dangling reference: no metadata, no task, so the scorer skips it.
        None => KpiRef {
            kpi_id: slot.kpi_id,
            weight: slot.weight,
            label_id: slot.label_id,
            kind: crate::domain::KpiKind::Metric,
            metadata: KpiMetadata::default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KpiId, KpiKind, RawDefinition, RawKpiRef, RawSection, SectionId};
    use crate::store::memory::{MemoryCacheStore, MemoryDefinitionStore, MemoryKpiStore};

    fn tenant() -> TenantId {
        TenantId("chasqi".into())
    }

    fn raw_definition() -> RawDefinition {
        RawDefinition {
            id: EvaluationId("ev-1".into()),
            name: "Evaluación comercial".into(),
            non_working_days: vec![chrono::Weekday::Sat, chrono::Weekday::Sun],
            evaluated_employees: vec![crate::domain::EmployeeId("emp-1".into())],
            sections: vec![RawSection {
                id: SectionId("sec-1".into()),
                title: "Comercial".into(),
                weight: 100.0,
                kpis: vec![
                    RawKpiRef {
                        kpi_id: KpiId("kpi-recorded".into()),
                        weight: 60.0,
                        label_id: None,
                    },
                    RawKpiRef {
                        kpi_id: KpiId("kpi-ghost".into()),
                        weight: 40.0,
                        label_id: None,
                    },
                ],
            }],
        }
    }

    fn build_cache() -> (DefinitionCache, MemoryDefinitionStore, MemoryCacheStore) {
        let definitions = MemoryDefinitionStore::default();
        let kpis = MemoryKpiStore::default();
        let cache = MemoryCacheStore::default();
        definitions.insert(&tenant(), raw_definition());
        kpis.insert(
            &tenant(),
            KpiRecord {
                id: KpiId("kpi-recorded".into()),
                kpi_type: "question".into(),
                metadata: KpiMetadata {
                    name: "Atención al cliente".into(),
                    ..KpiMetadata::default()
                },
            },
        );
        let service = DefinitionCache::new(
            Arc::new(definitions.clone()),
            Arc::new(kpis),
            Arc::new(cache.clone()),
            Duration::from_secs(21_600),
        );
        (service, definitions, cache)
    }

    #[test]
    fn miss_enriches_and_populates_the_cache() {
        let (service, _, cache) = build_cache();
        let definition = service
            .get_or_load(&tenant(), &EvaluationId("ev-1".into()))
            .expect("loads")
            .expect("present");

        let section = &definition.sections[0];
        assert_eq!(section.kpis[0].kind, KpiKind::Recorded);
        assert_eq!(section.kpis[0].metadata.name, "Atención al cliente");
        // The dangling reference degrades to a task-less metric.
        assert_eq!(section.kpis[1].kind, KpiKind::Metric);
        assert!(section.kpis[1].metadata.task.is_none());

        let key = DefinitionCache::cache_key(&tenant(), &EvaluationId("ev-1".into()));
        assert!(cache.get(&key).expect("cache readable").is_some());
    }

    #[test]
    fn hit_serves_the_cached_document() {
        let (service, definitions, _) = build_cache();
        let first = service
            .get_or_load(&tenant(), &EvaluationId("ev-1".into()))
            .expect("loads")
            .expect("present");

        // Mutate the backing store; the cached copy must win until TTL.
        let mut changed = raw_definition();
        changed.name = "Renombrada".into();
        definitions.insert(&tenant(), changed);

        let second = service
            .get_or_load(&tenant(), &EvaluationId("ev-1".into()))
            .expect("loads")
            .expect("present");
        assert_eq!(second, first);
        assert_eq!(second.name, "Evaluación comercial");
    }

    #[test]
    fn missing_definition_is_absent_not_an_error() {
        let (service, _, _) = build_cache();
        let result = service
            .get_or_load(&tenant(), &EvaluationId("ev-404".into()))
            .expect("store reachable");
        assert!(result.is_none());
    }
}
