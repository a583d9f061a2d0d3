use crate::codec::{AppRow, DeploymentRow, RowCodec};
use crate::models::{Deployment, Package, PackageUpdate};
use crate::services::{
    load, load_deployment_in_app, DaoError, IndexManager, WritePlan, WriteStep,
};
use crate::store::{StoreClient, Table};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;
use validator::Validate;

#[derive(Clone)]
pub struct PackageRepository {
    store: Arc<dyn StoreClient>,
    index: IndexManager,
}

impl PackageRepository {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self {
            index: IndexManager::new(store.clone()),
            store,
        }
    }

    /// Follow a deployment key to its deployment row.
    ///
    /// The index entry must point at a row that exists, belongs to the
    /// indexed app, and is still listed on that app.
    async fn resolve(&self, key: &str) -> Result<DeploymentRow, DaoError> {
        let entry = self
            .index
            .lookup_by_deployment_key(key)
            .await?
            .ok_or_else(|| DaoError::not_found(format!("Deployment not found for key {}", key)))?;

        let deployment = load::<DeploymentRow>(self.store.as_ref(), &entry.deployment_id).await?;
        let Some(deployment) = deployment else {
            return Err(IndexManager::divergence(
                Table::DeploymentsByKey,
                key,
                format!("deployment {} does not exist", entry.deployment_id),
            ));
        };
        if deployment.key != key || deployment.app_id != entry.app_id {
            return Err(IndexManager::divergence(
                Table::DeploymentsByKey,
                key,
                format!("deployment {} now has key {}", deployment.id, deployment.key),
            ));
        }

        match load::<AppRow>(self.store.as_ref(), &entry.app_id).await? {
            Some(app) if app.deployments.iter().any(|slot| slot.id == deployment.id) => {
                Ok(deployment)
            }
            _ => Err(IndexManager::divergence(
                Table::DeploymentsByKey,
                key,
                format!("app {} does not hold deployment {}", entry.app_id, deployment.id),
            )),
        }
    }

    async fn store_deployment(
        &self,
        operation: &'static str,
        updated: &DeploymentRow,
        previous: &DeploymentRow,
    ) -> Result<(), DaoError> {
        WritePlan::new(operation)
            .then(WriteStep::replace(
                DeploymentRow::TABLE,
                updated.row_key(),
                updated.encode()?,
                previous.encode()?,
            ))
            .execute(self.store.as_ref())
            .await
    }

    /// Make `package` the current package of the deployment with `key`.
    ///
    /// A missing label becomes `v{n}` where n is the new history length; a
    /// missing upload time is stamped with now.
    #[instrument(skip(self, package), fields(package_hash = %package.package_hash))]
    pub async fn add_package(&self, key: &str, mut package: Package) -> Result<Package, DaoError> {
        let current = self.resolve(key).await?;

        if package.label.is_none() {
            package.label = Some(format!("v{}", current.history.len() + 1));
        }
        if package.upload_time.is_none() {
            package.upload_time = Some(Utc::now());
        }

        let mut updated = current.clone();
        updated.push_package(package.clone());
        self.store_deployment("add_package", &updated, &current).await?;

        tracing::info!(
            deployment_id = %updated.id,
            label = package.label.as_deref().unwrap_or_default(),
            "Package added"
        );
        Ok(package)
    }

    pub async fn deployment_for_key(&self, key: &str) -> Result<Deployment, DaoError> {
        Ok(self.resolve(key).await?.to_deployment())
    }

    /// Patch metadata of the current package. The matching history entry
    /// is patched as well.
    #[instrument(skip(self, update))]
    pub async fn update_package(
        &self,
        key: &str,
        update: PackageUpdate,
    ) -> Result<Package, DaoError> {
        update.validate()?;
        let current = self.resolve(key).await?;

        let mut updated = current.clone();
        let Some(package) = updated.package.as_mut() else {
            return Err(DaoError::not_found(format!(
                "Deployment {} has no package",
                current.name
            )));
        };
        if update.is_empty() {
            return Ok(package.clone());
        }
        update.apply(package);
        let patched = package.clone();

        if let Some(latest) = updated.history.last_mut() {
            if latest.label == patched.label {
                update.apply(latest);
            }
        }

        self.store_deployment("update_package", &updated, &current).await?;
        tracing::info!(deployment_id = %updated.id, "Package updated");
        Ok(patched)
    }

    /// Packages ever attached to the deployment, oldest first.
    pub async fn history(&self, app_id: &str, name: &str) -> Result<Vec<Package>, DaoError> {
        let (_, deployment) = load_deployment_in_app(self.store.as_ref(), app_id, name).await?;
        Ok(deployment.history)
    }

    /// Drop the history and the current package of a deployment.
    #[instrument(skip(self))]
    pub async fn clear_history(&self, app_id: &str, name: &str) -> Result<(), DaoError> {
        let (_, current) = load_deployment_in_app(self.store.as_ref(), app_id, name).await?;
        if current.package.is_none() && current.history.is_empty() {
            return Ok(());
        }

        let mut updated = current.clone();
        updated.package = None;
        updated.history.clear();
        self.store_deployment("clear_history", &updated, &current).await?;

        tracing::info!(deployment_id = %updated.id, "History cleared");
        Ok(())
    }
}
