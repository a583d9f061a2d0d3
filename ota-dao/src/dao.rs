use crate::config::{DaoConfig, StoreBackend};
use crate::models::{
    App, AppUpdate, Deployment, NewApp, NewUser, Package, PackageUpdate, User, UserUpdate,
};
use crate::services::{
    AppRepository, DaoError, IdGenerator, PackageRepository, UserRepository, UuidGenerator,
};
use crate::store::{MemoryStore, MongoStore, StoreClient};
use ota_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Entry point of the data-access layer.
///
/// Cloning is cheap; every clone shares the same store client.
#[derive(Clone)]
pub struct Dao {
    store: Arc<dyn StoreClient>,
    users: UserRepository,
    apps: AppRepository,
    packages: PackageRepository,
}

impl Dao {
    pub fn new(
        store: Arc<dyn StoreClient>,
        ids: Arc<dyn IdGenerator>,
        default_linked_providers: Vec<String>,
    ) -> Self {
        Self {
            users: UserRepository::new(store.clone(), ids.clone(), default_linked_providers),
            apps: AppRepository::new(store.clone(), ids),
            packages: PackageRepository::new(store.clone()),
            store,
        }
    }

    /// In-memory DAO with uuid identifiers and the given provider default.
    pub fn in_memory(default_linked_providers: Vec<String>) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(UuidGenerator),
            default_linked_providers,
        )
    }

    /// Build the DAO over the backend selected in `config`.
    pub async fn from_config(config: &DaoConfig) -> Result<Self, AppError> {
        let store: Arc<dyn StoreClient> = match config.store.backend {
            StoreBackend::Memory => {
                tracing::info!("Using in-memory store");
                Arc::new(MemoryStore::new())
            }
            StoreBackend::Mongodb => {
                let mongo = config.store.mongodb.as_ref().ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "STORE_BACKEND is mongodb but no MongoDB settings were loaded"
                    ))
                })?;
                let store = MongoStore::connect(&mongo.uri, &mongo.database)
                    .await
                    .map_err(DaoError::from)?;
                store.initialize_indexes().await.map_err(DaoError::from)?;
                Arc::new(store)
            }
        };

        Ok(Self::new(
            store,
            Arc::new(UuidGenerator),
            config.default_linked_providers.clone(),
        ))
    }

    pub async fn health_check(&self) -> Result<(), DaoError> {
        Ok(self.store.health_check().await?)
    }

    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    // ==================== Users ====================

    pub async fn create_user(&self, input: NewUser) -> Result<User, DaoError> {
        self.users.create_user(input).await
    }

    pub async fn user_by_id(&self, id: &str) -> Result<User, DaoError> {
        self.users.user_by_id(id).await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<User, DaoError> {
        self.users.user_by_email(email).await
    }

    pub async fn user_by_access_key(&self, token: &str) -> Result<User, DaoError> {
        self.users.user_by_access_key(token).await
    }

    pub async fn update_user(&self, email: &str, update: UserUpdate) -> Result<User, DaoError> {
        self.users.update_user(email, update).await
    }

    // ==================== Apps ====================

    pub async fn create_app(&self, input: NewApp) -> Result<App, DaoError> {
        self.apps.create_app(input).await
    }

    pub async fn app_by_id(&self, app_id: &str) -> Result<App, DaoError> {
        self.apps.app_by_id(app_id).await
    }

    pub async fn update_app(&self, app_id: &str, update: AppUpdate) -> Result<App, DaoError> {
        self.apps.update_app(app_id, update).await
    }

    pub async fn remove_app(&self, app_id: &str) -> Result<(), DaoError> {
        self.apps.remove_app(app_id).await
    }

    pub async fn apps_for_collaborator(&self, email: &str) -> Result<Vec<App>, DaoError> {
        self.apps.apps_for_collaborator(email).await
    }

    pub async fn app_for_collaborator(&self, email: &str, name: &str) -> Result<App, DaoError> {
        self.apps.app_for_collaborator(email, name).await
    }

    pub async fn app_for_deployment_key(&self, key: &str) -> Result<App, DaoError> {
        self.apps.app_for_deployment_key(key).await
    }

    // ==================== Deployments ====================

    pub async fn add_deployment(
        &self,
        app_id: &str,
        name: &str,
        key: &str,
    ) -> Result<Deployment, DaoError> {
        self.apps.add_deployment(app_id, name, key).await
    }

    pub async fn remove_deployment(&self, app_id: &str, name: &str) -> Result<(), DaoError> {
        self.apps.remove_deployment(app_id, name).await
    }

    pub async fn rename_deployment(
        &self,
        app_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), DaoError> {
        self.apps.rename_deployment(app_id, old_name, new_name).await
    }

    pub async fn deployment_by_app(
        &self,
        app_id: &str,
        name: &str,
    ) -> Result<Deployment, DaoError> {
        self.apps.deployment_by_app(app_id, name).await
    }

    pub async fn deployments_by_app(
        &self,
        app_id: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, Deployment>, DaoError> {
        self.apps.deployments_by_app(app_id, names).await
    }

    // ==================== Packages ====================

    pub async fn add_package(&self, key: &str, package: Package) -> Result<Package, DaoError> {
        self.packages.add_package(key, package).await
    }

    pub async fn deployment_for_key(&self, key: &str) -> Result<Deployment, DaoError> {
        self.packages.deployment_for_key(key).await
    }

    pub async fn update_package(
        &self,
        key: &str,
        update: PackageUpdate,
    ) -> Result<Package, DaoError> {
        self.packages.update_package(key, update).await
    }

    pub async fn history(&self, app_id: &str, name: &str) -> Result<Vec<Package>, DaoError> {
        self.packages.history(app_id, name).await
    }

    pub async fn clear_history(&self, app_id: &str, name: &str) -> Result<(), DaoError> {
        self.packages.clear_history(app_id, name).await
    }
}
