//! Repositories and the consistency machinery they share.

mod apps;
pub mod error;
mod ids;
pub mod index;
mod packages;
pub mod plan;
mod users;

pub use apps::AppRepository;
pub use error::DaoError;
pub use ids::{IdGenerator, UuidGenerator};
pub use index::{DeploymentKeyEntry, IndexManager};
pub use packages::PackageRepository;
pub use plan::{WritePlan, WriteStep};
pub use users::UserRepository;

use crate::codec::{AppRow, DeploymentRow, RowCodec};
use crate::store::{row_version, RowKey, StoreClient, Table};

/// Load and decode the row of `T` with the given partition key.
pub(crate) async fn load<T: RowCodec>(
    store: &dyn StoreClient,
    id: &str,
) -> Result<Option<T>, DaoError> {
    Ok(load_versioned::<T>(store, id).await?.map(|(record, _)| record))
}

/// Like [`load`], also returning the row's version for a later conditional write.
pub(crate) async fn load_versioned<T: RowCodec>(
    store: &dyn StoreClient,
    id: &str,
) -> Result<Option<(T, u64)>, DaoError> {
    match store.get(T::TABLE, &RowKey::partition(id)).await? {
        Some(row) => Ok(Some((T::decode(&row)?, row_version(&row)))),
        None => Ok(None),
    }
}

pub(crate) async fn load_app(store: &dyn StoreClient, app_id: &str) -> Result<AppRow, DaoError> {
    load::<AppRow>(store, app_id)
        .await?
        .ok_or_else(|| DaoError::not_found(format!("App not found {}", app_id)))
}

/// Resolve a deployment by app id and deployment name.
pub(crate) async fn load_deployment_in_app(
    store: &dyn StoreClient,
    app_id: &str,
    name: &str,
) -> Result<(AppRow, DeploymentRow), DaoError> {
    let app = load_app(store, app_id).await?;
    let deployment_id = app
        .slot(name)
        .map(|slot| slot.id.clone())
        .ok_or_else(|| DaoError::not_found(format!("Deployment not found {}", name)))?;

    match load::<DeploymentRow>(store, &deployment_id).await? {
        Some(deployment) => Ok((app, deployment)),
        None => Err(IndexManager::divergence(
            Table::Apps,
            app_id,
            format!("deployment {} ({}) has no row", name, deployment_id),
        )),
    }
}
