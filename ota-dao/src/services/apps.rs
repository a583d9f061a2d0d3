use crate::codec::{AppRow, DeploymentRow, DeploymentSlot, RowCodec};
use crate::models::{App, AppUpdate, Deployment, NewApp, NewDeployment};
use crate::services::{
    load, load_app, load_deployment_in_app, DaoError, DeploymentKeyEntry, IdGenerator,
    IndexManager, WritePlan, WriteStep,
};
use crate::store::{StoreClient, Table};
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use validator::Validate;

#[derive(Clone)]
pub struct AppRepository {
    store: Arc<dyn StoreClient>,
    index: IndexManager,
    ids: Arc<dyn IdGenerator>,
}

impl AppRepository {
    pub fn new(store: Arc<dyn StoreClient>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            index: IndexManager::new(store.clone()),
            store,
            ids,
        }
    }

    // ==================== Apps ====================

    /// Create an app with its deployments and collaborators.
    ///
    /// Every deployment key is reserved and every collaborator indexed before
    /// any primary row is written; a colliding key aborts the whole creation.
    #[instrument(skip(self, input), fields(app_name = %input.name))]
    pub async fn create_app(&self, input: NewApp) -> Result<App, DaoError> {
        input.validate()?;

        {
            let mut seen = HashSet::new();
            let duplicate = input
                .deployments
                .iter()
                .find(|d| !seen.insert(d.name.as_str()));
            if let Some(duplicate) = duplicate {
                return Err(DaoError::duplicate(format!(
                    "Deployment {} already exists",
                    duplicate.name
                )));
            }
        }

        let app_id = self.ids.next_id();
        let deployments: Vec<DeploymentRow> = input
            .deployments
            .into_iter()
            .map(|d| DeploymentRow::new(self.ids.next_id(), app_id.clone(), d.name, d.key))
            .collect();
        let app = AppRow {
            id: app_id,
            name: input.name,
            collaborators: input.collaborators,
            deployments: deployments
                .iter()
                .map(|d| DeploymentSlot {
                    name: d.name.clone(),
                    id: d.id.clone(),
                })
                .collect(),
            version: 0,
        };

        let mut plan = WritePlan::new("create_app");
        for deployment in &deployments {
            plan.push(IndexManager::deployment_key_step(
                &deployment.key,
                &DeploymentKeyEntry {
                    app_id: app.id.clone(),
                    deployment_id: deployment.id.clone(),
                },
            ));
        }
        for email in app.collaborators.keys() {
            plan.push(IndexManager::collaborator_step(email, &app.id));
        }
        for deployment in &deployments {
            plan.push(WriteStep::insert(
                DeploymentRow::TABLE,
                deployment.row_key(),
                deployment.encode()?,
            ));
        }
        plan.push(WriteStep::insert(AppRow::TABLE, app.row_key(), app.encode()?));
        plan.execute(self.store.as_ref()).await?;

        tracing::info!(app_id = %app.id, deployments = deployments.len(), "App created");
        Ok(app.to_app())
    }

    pub async fn app_by_id(&self, app_id: &str) -> Result<App, DaoError> {
        Ok(load_app(self.store.as_ref(), app_id).await?.to_app())
    }

    /// Rename an app and/or replace its collaborator map.
    #[instrument(skip(self, update))]
    pub async fn update_app(&self, app_id: &str, update: AppUpdate) -> Result<App, DaoError> {
        update.validate()?;
        let current = load_app(self.store.as_ref(), app_id).await?;

        let mut updated = current.clone();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(collaborators) = update.collaborators {
            updated.collaborators = collaborators;
        }

        let mut plan = WritePlan::new("update_app");
        plan.extend(
            updated
                .collaborators
                .keys()
                .filter(|email| !current.collaborators.contains_key(*email))
                .map(|email| IndexManager::collaborator_step(email, app_id)),
        );
        plan.push(WriteStep::replace(
            AppRow::TABLE,
            updated.row_key(),
            updated.encode()?,
            current.encode()?,
        ));
        plan.extend(
            current
                .collaborators
                .keys()
                .filter(|email| !updated.collaborators.contains_key(*email))
                .map(|email| IndexManager::collaborator_release_step(email, app_id)),
        );
        plan.execute(self.store.as_ref()).await?;

        tracing::info!(app_id = %app_id, "App updated");
        Ok(updated.to_app())
    }

    /// Remove an app, its deployment rows, and every index entry pointing at it.
    ///
    /// The app row goes first so a crash leaves only dangling index rows.
    #[instrument(skip(self))]
    pub async fn remove_app(&self, app_id: &str) -> Result<(), DaoError> {
        let app = load_app(self.store.as_ref(), app_id).await?;

        let mut deployments = Vec::with_capacity(app.deployments.len());
        for slot in &app.deployments {
            match load::<DeploymentRow>(self.store.as_ref(), &slot.id).await? {
                Some(deployment) => deployments.push(deployment),
                None => {
                    IndexManager::divergence(
                        Table::Apps,
                        app_id,
                        format!("deployment {} ({}) has no row", slot.name, slot.id),
                    );
                }
            }
        }

        let mut plan = WritePlan::new("remove_app").then(WriteStep::remove(
            AppRow::TABLE,
            app.row_key(),
            app.encode()?,
        ));
        for deployment in &deployments {
            plan.push(WriteStep::remove(
                DeploymentRow::TABLE,
                deployment.row_key(),
                deployment.encode()?,
            ));
        }
        plan.extend(
            deployments
                .iter()
                .map(|deployment| IndexManager::deployment_key_release_step(&deployment.key)),
        );
        plan.extend(
            app.collaborators
                .keys()
                .map(|email| IndexManager::collaborator_release_step(email, app_id)),
        );
        plan.execute(self.store.as_ref()).await?;

        tracing::info!(app_id = %app_id, "App removed");
        Ok(())
    }

    /// Every live app listing `email` as a collaborator. Never fails on a miss.
    ///
    /// Collaborator entries are written before the app row, so an app still
    /// being created is skipped here and counted as divergence like a
    /// dangling entry left by a crash.
    pub async fn apps_for_collaborator(&self, email: &str) -> Result<Vec<App>, DaoError> {
        let app_ids = self.index.lookup_apps_by_collaborator(email).await?;

        let rows = try_join_all(
            app_ids
                .iter()
                .map(|app_id| load::<AppRow>(self.store.as_ref(), app_id)),
        )
        .await?;

        let mut apps = Vec::with_capacity(rows.len());
        for (app_id, row) in app_ids.iter().zip(rows) {
            match row {
                Some(app) if app.collaborators.contains_key(email) => apps.push(app.to_app()),
                Some(_) => {
                    IndexManager::divergence(
                        Table::AppsByCollaborator,
                        email,
                        format!("app {} no longer lists this collaborator", app_id),
                    );
                }
                None => {
                    IndexManager::divergence(
                        Table::AppsByCollaborator,
                        email,
                        format!("app {} does not exist", app_id),
                    );
                }
            }
        }
        Ok(apps)
    }

    /// The app named `name` that has `email` as a collaborator.
    pub async fn app_for_collaborator(&self, email: &str, name: &str) -> Result<App, DaoError> {
        self.apps_for_collaborator(email)
            .await?
            .into_iter()
            .find(|app| app.name == name)
            .ok_or_else(|| DaoError::not_found(format!("App not found {}", name)))
    }

    pub async fn app_for_deployment_key(&self, key: &str) -> Result<App, DaoError> {
        let entry = self
            .index
            .lookup_by_deployment_key(key)
            .await?
            .ok_or_else(|| DaoError::not_found(format!("Deployment not found for key {}", key)))?;

        match load::<AppRow>(self.store.as_ref(), &entry.app_id).await? {
            Some(app) if app.deployments.iter().any(|s| s.id == entry.deployment_id) => {
                Ok(app.to_app())
            }
            _ => Err(IndexManager::divergence(
                Table::DeploymentsByKey,
                key,
                format!(
                    "app {} does not hold deployment {}",
                    entry.app_id, entry.deployment_id
                ),
            )),
        }
    }

    // ==================== Deployments ====================

    /// Add a deployment, reserving its key before it becomes visible on the app.
    #[instrument(skip(self))]
    pub async fn add_deployment(
        &self,
        app_id: &str,
        name: &str,
        key: &str,
    ) -> Result<Deployment, DaoError> {
        NewDeployment::new(name, key).validate()?;

        let current = load_app(self.store.as_ref(), app_id).await?;
        if current.has_deployment(name) {
            return Err(DaoError::duplicate(format!("Deployment {} already exists", name)));
        }

        let deployment = DeploymentRow::new(
            self.ids.next_id(),
            app_id.to_string(),
            name.to_string(),
            key.to_string(),
        );
        let mut updated = current.clone();
        updated.deployments.push(DeploymentSlot {
            name: deployment.name.clone(),
            id: deployment.id.clone(),
        });

        WritePlan::new("add_deployment")
            .then(IndexManager::deployment_key_step(
                key,
                &DeploymentKeyEntry {
                    app_id: app_id.to_string(),
                    deployment_id: deployment.id.clone(),
                },
            ))
            .then(WriteStep::insert(
                DeploymentRow::TABLE,
                deployment.row_key(),
                deployment.encode()?,
            ))
            .then(WriteStep::replace(
                AppRow::TABLE,
                updated.row_key(),
                updated.encode()?,
                current.encode()?,
            ))
            .execute(self.store.as_ref())
            .await?;

        tracing::info!(app_id = %app_id, deployment_id = %deployment.id, "Deployment added");
        Ok(deployment.to_deployment())
    }

    /// Remove a deployment from its app and release its key.
    #[instrument(skip(self))]
    pub async fn remove_deployment(&self, app_id: &str, name: &str) -> Result<(), DaoError> {
        let (current, deployment) =
            load_deployment_in_app(self.store.as_ref(), app_id, name).await?;

        let mut updated = current.clone();
        updated.deployments.retain(|slot| slot.name != name);

        WritePlan::new("remove_deployment")
            .then(WriteStep::replace(
                AppRow::TABLE,
                updated.row_key(),
                updated.encode()?,
                current.encode()?,
            ))
            .then(WriteStep::remove(
                DeploymentRow::TABLE,
                deployment.row_key(),
                deployment.encode()?,
            ))
            .then(IndexManager::deployment_key_release_step(&deployment.key))
            .execute(self.store.as_ref())
            .await?;

        tracing::info!(app_id = %app_id, deployment_id = %deployment.id, "Deployment removed");
        Ok(())
    }

    /// Rename a deployment in place. Its key, package and history are kept.
    #[instrument(skip(self))]
    pub async fn rename_deployment(
        &self,
        app_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), DaoError> {
        let (current, deployment) =
            load_deployment_in_app(self.store.as_ref(), app_id, old_name).await?;
        if old_name == new_name {
            return Ok(());
        }
        NewDeployment::new(new_name, deployment.key.as_str()).validate()?;
        if current.has_deployment(new_name) {
            return Err(DaoError::duplicate(format!(
                "Deployment {} already exists",
                new_name
            )));
        }

        let mut renamed = deployment.clone();
        renamed.name = new_name.to_string();
        let mut updated = current.clone();
        for slot in updated.deployments.iter_mut() {
            if slot.name == old_name {
                slot.name = new_name.to_string();
            }
        }

        WritePlan::new("rename_deployment")
            .then(WriteStep::replace(
                DeploymentRow::TABLE,
                renamed.row_key(),
                renamed.encode()?,
                deployment.encode()?,
            ))
            .then(WriteStep::replace(
                AppRow::TABLE,
                updated.row_key(),
                updated.encode()?,
                current.encode()?,
            ))
            .execute(self.store.as_ref())
            .await?;

        tracing::info!(app_id = %app_id, from = %old_name, to = %new_name, "Deployment renamed");
        Ok(())
    }

    pub async fn deployment_by_app(
        &self,
        app_id: &str,
        name: &str,
    ) -> Result<Deployment, DaoError> {
        let (_, deployment) = load_deployment_in_app(self.store.as_ref(), app_id, name).await?;
        Ok(deployment.to_deployment())
    }

    /// Expand the named deployments of an app into full records keyed by name.
    ///
    /// Names the app no longer has are skipped.
    pub async fn deployments_by_app(
        &self,
        app_id: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, Deployment>, DaoError> {
        let app = load_app(self.store.as_ref(), app_id).await?;

        let slots: Vec<&DeploymentSlot> = names
            .iter()
            .filter_map(|name| {
                let slot = app.slot(name);
                if slot.is_none() {
                    tracing::debug!(
                        app_id = %app_id,
                        deployment = %name,
                        "Skipping unknown deployment"
                    );
                }
                slot
            })
            .collect();

        let rows = try_join_all(
            slots
                .iter()
                .map(|slot| load::<DeploymentRow>(self.store.as_ref(), &slot.id)),
        )
        .await?;

        let mut deployments = BTreeMap::new();
        for (slot, row) in slots.iter().zip(rows) {
            match row {
                Some(row) => {
                    deployments.insert(slot.name.clone(), row.to_deployment());
                }
                None => {
                    IndexManager::divergence(
                        Table::Apps,
                        app_id,
                        format!("deployment {} ({}) has no row", slot.name, slot.id),
                    );
                }
            }
        }
        Ok(deployments)
    }
}
