//! Idempotent persistence of computed evaluation snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{EmployeeId, EvaluationSnapshot, SnapshotKey};
use crate::store::{HistoryStore, StoreError};
use crate::tenancy::TenantId;

/// Service wrapper over the history store. The store's `upsert` is a single
/// atomic insert-or-replace on the snapshot key, so repeated saves of the
/// same computation leave exactly one reachable snapshot.
pub struct EvaluationHistory {
    store: Arc<dyn HistoryStore>,
}

impl EvaluationHistory {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Saves a snapshot, stamping `created_at` with `now`; on replacement the
    /// store keeps the original `created_at`.
    pub fn save(
        &self,
        tenant: &TenantId,
        mut snapshot: EvaluationSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        snapshot.created_at = now;
        self.store.upsert(tenant, snapshot)
    }

    pub fn lookup(
        &self,
        tenant: &TenantId,
        key: &SnapshotKey,
    ) -> Result<Option<EvaluationSnapshot>, StoreError> {
        self.store.lookup(tenant, key)
    }

    /// All stored snapshots for one employee, newest first.
    pub fn for_employee(
        &self,
        tenant: &TenantId,
        employee: &EmployeeId,
    ) -> Result<Vec<EvaluationSnapshot>, StoreError> {
        self.store.for_employee(tenant, employee)
    }
}
