//! Emulated secondary indexes.
//!
//! | table                  | partition      | clustering | value                     |
//! |------------------------|----------------|------------|---------------------------|
//! | `users_by_email`       | email          |            | user id                   |
//! | `users_by_access_key`  | access key     |            | user id                   |
//! | `deployments_by_key`   | deployment key |            | app id, deployment row id |
//! | `apps_by_collaborator` | email          | app id     | app id                    |
//!
//! The `*_step` builders are used inside larger write plans; the other
//! mutators run a one-step plan on their own.

use crate::services::plan::{WritePlan, WriteStep};
use crate::services::DaoError;
use crate::store::{Row, RowKey, StoreClient, Table};
use serde_json::{json, Value};
use std::sync::Arc;

/// Target of a deployment-key index entry. Keyed by the deployment row id,
/// so renaming a deployment leaves the entry untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentKeyEntry {
    pub app_id: String,
    pub deployment_id: String,
}

#[derive(Clone)]
pub struct IndexManager {
    store: Arc<dyn StoreClient>,
}

fn object(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn string_cell(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}

impl IndexManager {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store }
    }

    // ==================== Step builders ====================

    pub fn email_reservation_step(email: &str, user_id: &str) -> WriteStep {
        WriteStep::reserve(
            Table::UsersByEmail,
            RowKey::partition(email),
            object(json!({ "user_id": user_id })),
            format!("User already exists {}", email),
        )
    }

    pub fn access_key_step(token: &str, user_id: &str) -> WriteStep {
        WriteStep::reserve_idempotent(
            Table::UsersByAccessKey,
            RowKey::partition(token),
            object(json!({ "user_id": user_id })),
            "Access key already exists",
        )
    }

    pub fn access_key_release_step(token: &str) -> WriteStep {
        WriteStep::release(Table::UsersByAccessKey, RowKey::partition(token))
    }

    pub fn deployment_key_step(key: &str, entry: &DeploymentKeyEntry) -> WriteStep {
        WriteStep::reserve(
            Table::DeploymentsByKey,
            RowKey::partition(key),
            object(json!({
                "app_id": entry.app_id,
                "deployment_id": entry.deployment_id,
            })),
            format!("Deployment key {} already exists", key),
        )
    }

    pub fn deployment_key_release_step(key: &str) -> WriteStep {
        WriteStep::release(Table::DeploymentsByKey, RowKey::partition(key))
    }

    pub fn collaborator_step(email: &str, app_id: &str) -> WriteStep {
        WriteStep::reserve_idempotent(
            Table::AppsByCollaborator,
            RowKey::clustered(email, app_id),
            object(json!({ "app_id": app_id })),
            format!("Collaborator {} already indexed for app {}", email, app_id),
        )
    }

    pub fn collaborator_release_step(email: &str, app_id: &str) -> WriteStep {
        WriteStep::release(Table::AppsByCollaborator, RowKey::clustered(email, app_id))
    }

    // ==================== Standalone mutators ====================

    /// Claim `email` for `user_id`. Any existing entry is a collision, even
    /// one for the same user, because creation always mints a fresh id.
    pub async fn reserve_email(&self, email: &str, user_id: &str) -> Result<(), DaoError> {
        WritePlan::new("reserve_email")
            .then(Self::email_reservation_step(email, user_id))
            .execute(self.store.as_ref())
            .await
    }

    pub async fn index_access_key(&self, token: &str, user_id: &str) -> Result<(), DaoError> {
        WritePlan::new("index_access_key")
            .then(Self::access_key_step(token, user_id))
            .execute(self.store.as_ref())
            .await
    }

    pub async fn remove_access_key_index(&self, token: &str) -> Result<(), DaoError> {
        WritePlan::new("remove_access_key_index")
            .then(Self::access_key_release_step(token))
            .execute(self.store.as_ref())
            .await
    }

    pub async fn reserve_deployment_key(
        &self,
        key: &str,
        entry: &DeploymentKeyEntry,
    ) -> Result<(), DaoError> {
        WritePlan::new("reserve_deployment_key")
            .then(Self::deployment_key_step(key, entry))
            .execute(self.store.as_ref())
            .await
    }

    pub async fn release_deployment_key(&self, key: &str) -> Result<(), DaoError> {
        WritePlan::new("release_deployment_key")
            .then(Self::deployment_key_release_step(key))
            .execute(self.store.as_ref())
            .await
    }

    pub async fn index_collaborator(&self, email: &str, app_id: &str) -> Result<(), DaoError> {
        WritePlan::new("index_collaborator")
            .then(Self::collaborator_step(email, app_id))
            .execute(self.store.as_ref())
            .await
    }

    pub async fn remove_collaborator_index(
        &self,
        email: &str,
        app_id: &str,
    ) -> Result<(), DaoError> {
        WritePlan::new("remove_collaborator_index")
            .then(Self::collaborator_release_step(email, app_id))
            .execute(self.store.as_ref())
            .await
    }

    // ==================== Lookups ====================

    pub async fn lookup_by_email(&self, email: &str) -> Result<Option<String>, DaoError> {
        let row = self
            .store
            .get(Table::UsersByEmail, &RowKey::partition(email))
            .await?;
        Ok(row.as_ref().and_then(|row| string_cell(row, "user_id")))
    }

    pub async fn lookup_by_access_key(&self, token: &str) -> Result<Option<String>, DaoError> {
        let row = self
            .store
            .get(Table::UsersByAccessKey, &RowKey::partition(token))
            .await?;
        Ok(row.as_ref().and_then(|row| string_cell(row, "user_id")))
    }

    pub async fn lookup_by_deployment_key(
        &self,
        key: &str,
    ) -> Result<Option<DeploymentKeyEntry>, DaoError> {
        let row = self
            .store
            .get(Table::DeploymentsByKey, &RowKey::partition(key))
            .await?;
        Ok(row.and_then(|row| {
            Some(DeploymentKeyEntry {
                app_id: string_cell(&row, "app_id")?,
                deployment_id: string_cell(&row, "deployment_id")?,
            })
        }))
    }

    /// App ids indexed for `email`, in ascending id order.
    pub async fn lookup_apps_by_collaborator(&self, email: &str) -> Result<Vec<String>, DaoError> {
        let rows = self
            .store
            .get_partition(Table::AppsByCollaborator, email)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| string_cell(row, "app_id"))
            .collect())
    }

    // ==================== Divergence ====================

    /// Record an index entry that resolved to a missing or mismatched row.
    pub fn divergence(index: Table, key: &str, detail: impl std::fmt::Display) -> DaoError {
        tracing::warn!(
            divergence = true,
            index = %index,
            key = %key,
            "Index entry does not match primary data: {}",
            detail
        );
        metrics::counter!("ota_dao_consistency_divergence_total", "index" => index.name())
            .increment(1);
        DaoError::ConsistencyDivergence(format!("{} {}: {}", index, key, detail))
    }
}
