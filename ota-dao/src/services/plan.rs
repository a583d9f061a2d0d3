//! Ordered multi-row write plans.
//!
//! The store has no multi-row transactions, so every mutation that touches
//! more than one row is expressed as a `WritePlan`: a list of steps executed
//! strictly in order. Two rules keep a crash mid-plan detectable rather than
//! silently inconsistent:
//!
//! - reservations (conditional index writes) precede the first primary-row
//!   write, so an entity is never visible without its index entries;
//! - releases (index removals) follow the first primary-row write, so an
//!   index entry can dangle but a live entity never loses its index.
//!
//! A failure before the plan's last primary write undoes the completed steps
//! in reverse. A failure after it leaves at worst dangling index rows, which
//! lookups detect and report as divergence.
//!
//! Replacing or removing a primary row is conditional on the version that was
//! read. A row that moved on in between fails the step with
//! `ConcurrentModification`, which compensates like any other failure.

use crate::services::DaoError;
use crate::store::{row_version, set_row_version, Row, RowKey, StoreClient, StoreError, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Conditional index write guarding a uniqueness fact.
    Reserve,
    Put,
    Delete,
    /// Removal of an index row.
    Release,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteStep {
    pub kind: StepKind,
    pub table: Table,
    pub key: RowKey,
    pub row: Option<Row>,
    /// Reserve only: an existing identical row counts as already held.
    pub idempotent: bool,
    /// Reserve only: message of the `DuplicateEntity` error on collision.
    pub conflict: Option<String>,
    /// Put or delete only while the stored row still has this version.
    pub expected_version: Option<u64>,
    /// Step that reverses this one during compensation.
    pub undo: Option<Box<WriteStep>>,
}

impl WriteStep {
    /// Strict reservation: any existing row is a collision.
    pub fn reserve(table: Table, key: RowKey, row: Row, conflict: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Reserve,
            undo: Some(Box::new(WriteStep::release(table, key.clone()))),
            table,
            key,
            row: Some(row),
            idempotent: false,
            conflict: Some(conflict.into()),
            expected_version: None,
        }
    }

    /// Reservation that tolerates an identical existing row.
    pub fn reserve_idempotent(
        table: Table,
        key: RowKey,
        row: Row,
        conflict: impl Into<String>,
    ) -> Self {
        Self {
            idempotent: true,
            ..Self::reserve(table, key, row, conflict)
        }
    }

    pub fn put(table: Table, key: RowKey, row: Row) -> Self {
        Self {
            kind: StepKind::Put,
            table,
            key,
            row: Some(row),
            idempotent: false,
            conflict: None,
            expected_version: None,
            undo: None,
        }
    }

    /// Put of a row that did not exist before; compensated by deleting it.
    pub fn insert(table: Table, key: RowKey, row: Row) -> Self {
        Self {
            undo: Some(Box::new(WriteStep::delete(table, key.clone()))),
            ..Self::put(table, key, row)
        }
    }

    /// Put over the row `previous` was read from, only while it is unchanged.
    ///
    /// The new row gets the next version. Compensation restores `previous`
    /// one version further on, so writers holding the old read stay stale.
    pub fn replace(table: Table, key: RowKey, mut row: Row, mut previous: Row) -> Self {
        let expected = row_version(&previous);
        set_row_version(&mut row, expected + 1);
        set_row_version(&mut previous, expected + 2);
        let restore = Self {
            expected_version: Some(expected + 1),
            ..Self::put(table, key.clone(), previous)
        };
        Self {
            expected_version: Some(expected),
            undo: Some(Box::new(restore)),
            ..Self::put(table, key, row)
        }
    }

    pub fn delete(table: Table, key: RowKey) -> Self {
        Self {
            kind: StepKind::Delete,
            table,
            key,
            row: None,
            idempotent: false,
            conflict: None,
            expected_version: None,
            undo: None,
        }
    }

    /// Delete of the row `previous` was read from, only while it is unchanged;
    /// compensated by writing `previous` back.
    pub fn remove(table: Table, key: RowKey, previous: Row) -> Self {
        Self {
            expected_version: Some(row_version(&previous)),
            undo: Some(Box::new(WriteStep::put(table, key.clone(), previous))),
            ..Self::delete(table, key)
        }
    }

    pub fn release(table: Table, key: RowKey) -> Self {
        Self {
            kind: StepKind::Release,
            ..Self::delete(table, key)
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.kind, StepKind::Put | StepKind::Delete) && !self.table.is_index()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingViolation {
    pub step: usize,
    pub reason: String,
}

impl std::fmt::Display for OrderingViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {}: {}", self.step, self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct WritePlan {
    operation: &'static str,
    steps: Vec<WriteStep>,
}

enum StepOutcome {
    Applied,
    AlreadyHeld,
}

impl WritePlan {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, step: WriteStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: WriteStep) {
        self.steps.push(step);
    }

    pub fn extend(&mut self, steps: impl IntoIterator<Item = WriteStep>) {
        self.steps.extend(steps);
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn steps(&self) -> &[WriteStep] {
        &self.steps
    }

    /// Check the reservation/release ordering rules without touching a store.
    pub fn check_ordering(&self) -> Result<(), OrderingViolation> {
        let first_primary = self.steps.iter().position(WriteStep::is_primary);
        let Some(first_primary) = first_primary else {
            return Ok(());
        };

        for (index, step) in self.steps.iter().enumerate() {
            match step.kind {
                StepKind::Reserve if index > first_primary => {
                    return Err(OrderingViolation {
                        step: index,
                        reason: format!(
                            "reservation on {} follows primary write at step {}",
                            step.table, first_primary
                        ),
                    });
                }
                StepKind::Release if index < first_primary => {
                    return Err(OrderingViolation {
                        step: index,
                        reason: format!(
                            "release on {} precedes primary write at step {}",
                            step.table, first_primary
                        ),
                    });
                }
                StepKind::Reserve | StepKind::Put if step.row.is_none() => {
                    return Err(OrderingViolation {
                        step: index,
                        reason: "write step without a row".to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Run every step in order, compensating on failure before the commit point.
    pub async fn execute(self, store: &dyn StoreClient) -> Result<(), DaoError> {
        if let Err(violation) = self.check_ordering() {
            tracing::error!(
                operation = self.operation,
                %violation,
                "Write plan violates ordering rules"
            );
            return Err(DaoError::Internal(format!(
                "{} plan rejected: {}",
                self.operation, violation
            )));
        }

        let commit_point = self.steps.iter().rposition(WriteStep::is_primary);
        let mut completed: Vec<&WriteStep> = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let failure = match Self::apply(store, step).await {
                Ok(StepOutcome::Applied) => {
                    completed.push(step);
                    continue;
                }
                Ok(StepOutcome::AlreadyHeld) => continue,
                Err(failure) => failure,
            };

            let past_commit = commit_point.is_some_and(|commit| index > commit);
            if past_commit {
                tracing::error!(
                    operation = self.operation,
                    step = index,
                    table = %step.table,
                    key = %step.key,
                    "Write plan failed after its commit point; index rows may dangle: {}",
                    failure
                );
            } else {
                tracing::warn!(
                    operation = self.operation,
                    step = index,
                    table = %step.table,
                    key = %step.key,
                    "Write plan step failed, compensating {} completed steps: {}",
                    completed.len(),
                    failure
                );
                Self::compensate(self.operation, store, &completed).await;
            }
            return Err(failure);
        }

        tracing::debug!(
            operation = self.operation,
            steps = self.steps.len(),
            "Write plan applied"
        );
        Ok(())
    }

    async fn apply(store: &dyn StoreClient, step: &WriteStep) -> Result<StepOutcome, DaoError> {
        match step.kind {
            StepKind::Reserve => {
                let row = step.row.clone().unwrap_or_default();
                if store.put_if_absent(step.table, &step.key, row).await? {
                    return Ok(StepOutcome::Applied);
                }
                if step.idempotent {
                    let existing = store.get(step.table, &step.key).await?;
                    if existing.as_ref() == step.row.as_ref() {
                        return Ok(StepOutcome::AlreadyHeld);
                    }
                }
                Err(DaoError::DuplicateEntity(
                    step.conflict
                        .clone()
                        .unwrap_or_else(|| format!("{} {} already exists", step.table, step.key)),
                ))
            }
            StepKind::Put | StepKind::Delete | StepKind::Release => {
                if Self::write(store, step).await? {
                    Ok(StepOutcome::Applied)
                } else {
                    Err(DaoError::ConcurrentModification(format!(
                        "{} {} was modified concurrently",
                        step.table, step.key
                    )))
                }
            }
        }
    }

    /// Unconditional or versioned put/delete. `false` means the version moved on.
    async fn write(store: &dyn StoreClient, step: &WriteStep) -> Result<bool, StoreError> {
        let row = || step.row.clone().unwrap_or_default();
        match (step.kind, step.expected_version) {
            (StepKind::Put | StepKind::Reserve, Some(version)) => {
                store.put_if_version(step.table, &step.key, row(), version).await
            }
            (StepKind::Put | StepKind::Reserve, None) => {
                store.put(step.table, &step.key, row()).await?;
                Ok(true)
            }
            (StepKind::Delete | StepKind::Release, Some(version)) => {
                store.delete_if_version(step.table, &step.key, version).await
            }
            (StepKind::Delete | StepKind::Release, None) => {
                store.delete(step.table, &step.key).await?;
                Ok(true)
            }
        }
    }

    async fn compensate(
        operation: &'static str,
        store: &dyn StoreClient,
        completed: &[&WriteStep],
    ) {
        for step in completed.iter().rev() {
            let Some(undo) = step.undo.as_deref() else {
                continue;
            };
            match Self::write(store, undo).await {
                Ok(true) => {}
                Ok(false) => tracing::error!(
                    operation,
                    table = %undo.table,
                    key = %undo.key,
                    "Compensation skipped, row was modified concurrently"
                ),
                Err(e) => tracing::error!(
                    operation,
                    table = %undo.table,
                    key = %undo.key,
                    "Compensation step failed: {}",
                    e
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn key_reservation(key: &str) -> WriteStep {
        WriteStep::reserve(
            Table::DeploymentsByKey,
            RowKey::partition(key),
            row(json!({ "app_id": "a1", "deployment_id": key })),
            format!("Deployment key {} already exists", key),
        )
    }

    fn app_insert() -> WriteStep {
        WriteStep::insert(Table::Apps, RowKey::partition("a1"), row(json!({ "id": "a1" })))
    }

    #[test]
    fn reservations_before_primary_write_pass() {
        let plan = WritePlan::new("create_app")
            .then(key_reservation("123"))
            .then(key_reservation("456"))
            .then(app_insert());
        assert!(plan.check_ordering().is_ok());
    }

    #[test]
    fn reservation_after_primary_write_is_flagged() {
        let plan = WritePlan::new("create_app")
            .then(app_insert())
            .then(key_reservation("123"));
        let violation = plan.check_ordering().unwrap_err();
        assert_eq!(violation.step, 1);
    }

    #[test]
    fn release_before_primary_removal_is_flagged() {
        let plan = WritePlan::new("remove_app")
            .then(WriteStep::release(Table::DeploymentsByKey, RowKey::partition("123")))
            .then(WriteStep::delete(Table::Apps, RowKey::partition("a1")));
        assert_eq!(plan.check_ordering().unwrap_err().step, 0);
    }

    #[test]
    fn index_only_plans_have_no_ordering_constraint() {
        let plan = WritePlan::new("remove_collaborator_index").then(WriteStep::release(
            Table::AppsByCollaborator,
            RowKey::clustered("test@t.com", "a1"),
        ));
        assert!(plan.check_ordering().is_ok());
    }

    #[tokio::test]
    async fn collision_releases_earlier_reservations() {
        let store = MemoryStore::new();
        WritePlan::new("seed")
            .then(key_reservation("456"))
            .execute(&store)
            .await
            .unwrap();

        let result = WritePlan::new("create_app")
            .then(key_reservation("123"))
            .then(key_reservation("456"))
            .then(app_insert())
            .execute(&store)
            .await;

        assert!(matches!(
            result,
            Err(DaoError::DuplicateEntity(ref m)) if m == "Deployment key 456 already exists"
        ));
        assert!(store
            .get(Table::DeploymentsByKey, &RowKey::partition("123"))
            .await
            .unwrap()
            .is_none());
        // the pre-existing reservation is not ours to release
        assert!(store
            .get(Table::DeploymentsByKey, &RowKey::partition("456"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.row_count(Table::Apps), 0);
    }

    #[tokio::test]
    async fn idempotent_reservation_accepts_identical_row() {
        let store = MemoryStore::new();
        let step = || {
            WriteStep::reserve_idempotent(
                Table::UsersByAccessKey,
                RowKey::partition("abc"),
                row(json!({ "user_id": "u1" })),
                "Access key already exists",
            )
        };

        WritePlan::new("index").then(step()).execute(&store).await.unwrap();
        WritePlan::new("index").then(step()).execute(&store).await.unwrap();

        let other = WriteStep::reserve_idempotent(
            Table::UsersByAccessKey,
            RowKey::partition("abc"),
            row(json!({ "user_id": "u2" })),
            "Access key already exists",
        );
        let result = WritePlan::new("index").then(other).execute(&store).await;
        assert!(matches!(result, Err(DaoError::DuplicateEntity(_))));
    }

    #[tokio::test]
    async fn store_failure_before_commit_undoes_inserts_and_reservations() {
        let store = MemoryStore::new();
        store.fail_writes_to(Table::Apps);

        let result = WritePlan::new("create_app")
            .then(key_reservation("123"))
            .then(WriteStep::insert(
                Table::Deployments,
                RowKey::partition("d1"),
                row(json!({ "id": "d1" })),
            ))
            .then(app_insert())
            .execute(&store)
            .await;

        assert!(matches!(result, Err(DaoError::Store(_))));
        assert_eq!(store.row_count(Table::DeploymentsByKey), 0);
        assert_eq!(store.row_count(Table::Deployments), 0);
    }

    #[tokio::test]
    async fn failure_after_commit_point_keeps_primary_write() {
        let store = MemoryStore::new();
        store
            .put(Table::Apps, &RowKey::partition("a1"), row(json!({ "id": "a1" })))
            .await
            .unwrap();
        store
            .put(
                Table::AppsByCollaborator,
                &RowKey::clustered("test@t.com", "a1"),
                row(json!({ "app_id": "a1" })),
            )
            .await
            .unwrap();
        store.fail_writes_to(Table::AppsByCollaborator);

        let result = WritePlan::new("remove_app")
            .then(WriteStep::delete(Table::Apps, RowKey::partition("a1")))
            .then(WriteStep::release(
                Table::AppsByCollaborator,
                RowKey::clustered("test@t.com", "a1"),
            ))
            .execute(&store)
            .await;

        assert!(result.is_err());
        assert_eq!(store.row_count(Table::Apps), 0);
        assert_eq!(store.row_count(Table::AppsByCollaborator), 1);
    }

    #[tokio::test]
    async fn failed_replace_restores_previous_row() {
        let store = MemoryStore::new();
        let key = RowKey::partition("u1");
        store
            .put(Table::Users, &key, row(json!({ "name": "old" })))
            .await
            .unwrap();
        store.fail_writes_to(Table::Deployments);

        let result = WritePlan::new("update")
            .then(WriteStep::replace(
                Table::Users,
                key.clone(),
                row(json!({ "name": "new" })),
                row(json!({ "name": "old" })),
            ))
            .then(WriteStep::put(
                Table::Deployments,
                RowKey::partition("d1"),
                row(json!({})),
            ))
            .execute(&store)
            .await;

        assert!(result.is_err());
        let stored = store.get(Table::Users, &key).await.unwrap().unwrap();
        assert_eq!(stored["name"], "old");
    }

    #[tokio::test]
    async fn failed_removal_restores_removed_rows() {
        let store = MemoryStore::new();
        let app = row(json!({ "id": "a1" }));
        store.put(Table::Apps, &RowKey::partition("a1"), app.clone()).await.unwrap();
        store.fail_writes_to(Table::Deployments);

        let result = WritePlan::new("remove_app")
            .then(WriteStep::remove(Table::Apps, RowKey::partition("a1"), app))
            .then(WriteStep::delete(Table::Deployments, RowKey::partition("d1")))
            .execute(&store)
            .await;

        assert!(result.is_err());
        assert_eq!(store.row_count(Table::Apps), 1);
    }

    #[tokio::test]
    async fn replace_bumps_the_version() {
        let store = MemoryStore::new();
        let key = RowKey::partition("a1");
        let previous = row(json!({ "name": "old" }));
        store.put(Table::Apps, &key, previous.clone()).await.unwrap();

        WritePlan::new("update_app")
            .then(WriteStep::replace(
                Table::Apps,
                key.clone(),
                row(json!({ "name": "new" })),
                previous,
            ))
            .execute(&store)
            .await
            .unwrap();

        let stored = store.get(Table::Apps, &key).await.unwrap().unwrap();
        assert_eq!(stored["name"], "new");
        assert_eq!(row_version(&stored), 1);
    }

    #[tokio::test]
    async fn stale_replace_is_a_conflict_and_undoes_earlier_steps() {
        let store = MemoryStore::new();
        let key = RowKey::partition("a1");
        let read = row(json!({ "name": "old" }));
        store
            .put(Table::Apps, &key, row(json!({ "name": "moved on", "version": 1 })))
            .await
            .unwrap();

        let result = WritePlan::new("add_deployment")
            .then(key_reservation("123"))
            .then(WriteStep::insert(
                Table::Deployments,
                RowKey::partition("d1"),
                row(json!({ "id": "d1" })),
            ))
            .then(WriteStep::replace(
                Table::Apps,
                key.clone(),
                row(json!({ "name": "new" })),
                read,
            ))
            .execute(&store)
            .await;

        assert!(matches!(result, Err(DaoError::ConcurrentModification(_))));
        let stored = store.get(Table::Apps, &key).await.unwrap().unwrap();
        assert_eq!(stored["name"], "moved on");
        assert_eq!(store.row_count(Table::DeploymentsByKey), 0);
        assert_eq!(store.row_count(Table::Deployments), 0);
    }

    #[tokio::test]
    async fn undone_replace_restores_previous_at_a_newer_version() {
        let store = MemoryStore::new();
        let key = RowKey::partition("u1");
        let previous = row(json!({ "name": "old", "version": 3 }));
        store.put(Table::Users, &key, previous.clone()).await.unwrap();
        store.fail_writes_to(Table::Deployments);

        let result = WritePlan::new("update")
            .then(WriteStep::replace(
                Table::Users,
                key.clone(),
                row(json!({ "name": "new" })),
                previous,
            ))
            .then(WriteStep::put(Table::Deployments, RowKey::partition("d1"), row(json!({}))))
            .execute(&store)
            .await;

        assert!(result.is_err());
        let stored = store.get(Table::Users, &key).await.unwrap().unwrap();
        assert_eq!(stored["name"], "old");
        assert_eq!(row_version(&stored), 5);
    }

    #[tokio::test]
    async fn stale_removal_leaves_the_row() {
        let store = MemoryStore::new();
        let key = RowKey::partition("a1");
        store
            .put(Table::Apps, &key, row(json!({ "id": "a1", "version": 2 })))
            .await
            .unwrap();

        let result = WritePlan::new("remove_app")
            .then(WriteStep::remove(Table::Apps, key, row(json!({ "id": "a1", "version": 1 }))))
            .execute(&store)
            .await;

        assert!(matches!(result, Err(DaoError::ConcurrentModification(_))));
        assert_eq!(store.row_count(Table::Apps), 1);
    }

    #[tokio::test]
    async fn misordered_plan_is_an_internal_error() {
        let store = MemoryStore::new();
        let result = WritePlan::new("create_app")
            .then(app_insert())
            .then(key_reservation("123"))
            .execute(&store)
            .await;

        assert!(matches!(result, Err(DaoError::Internal(_))));
        assert_eq!(store.row_count(Table::Apps), 0);
    }
}
