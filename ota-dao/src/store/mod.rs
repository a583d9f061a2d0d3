//! Store client abstraction over a wide-column style database.
//!
//! Rows are addressed by table plus partition key (and an optional
//! clustering key). The only lookups are equality on the partition; the only
//! uniqueness primitive is a conditional write that succeeds when the row
//! does not exist yet. Primary rows carry a `version` column so a replace or
//! delete can be made conditional on the version that was read.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// A flat row: column name to cell. `Value::Null` is the canonical null cell.
pub type Row = Map<String, Value>;

/// Column holding a primary row's write counter for conditional replaces.
pub const VERSION_COLUMN: &str = "version";

/// Write counter of `row`. Rows written without one read as version 0.
pub fn row_version(row: &Row) -> u64 {
    row.get(VERSION_COLUMN).and_then(Value::as_u64).unwrap_or(0)
}

pub fn set_row_version(row: &mut Row, version: u64) {
    row.insert(VERSION_COLUMN.to_string(), Value::from(version));
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(anyhow::Error),

    #[error("Row serialization error: {0}")]
    Serialization(anyhow::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Users,
    Apps,
    Deployments,
    UsersByEmail,
    UsersByAccessKey,
    DeploymentsByKey,
    AppsByCollaborator,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Users,
        Table::Apps,
        Table::Deployments,
        Table::UsersByEmail,
        Table::UsersByAccessKey,
        Table::DeploymentsByKey,
        Table::AppsByCollaborator,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Apps => "apps",
            Table::Deployments => "deployments",
            Table::UsersByEmail => "users_by_email",
            Table::UsersByAccessKey => "users_by_access_key",
            Table::DeploymentsByKey => "deployments_by_key",
            Table::AppsByCollaborator => "apps_by_collaborator",
        }
    }

    /// Emulated secondary index tables, maintained by the application.
    pub fn is_index(&self) -> bool {
        matches!(
            self,
            Table::UsersByEmail
                | Table::UsersByAccessKey
                | Table::DeploymentsByKey
                | Table::AppsByCollaborator
        )
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub partition: String,
    pub clustering: Option<String>,
}

impl RowKey {
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            clustering: None,
        }
    }

    pub fn clustered(partition: impl Into<String>, clustering: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            clustering: Some(clustering.into()),
        }
    }

    pub(crate) fn clustering_or_empty(&self) -> &str {
        self.clustering.as_deref().unwrap_or("")
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.clustering {
            Some(clustering) => write!(f, "{}/{}", self.partition, clustering),
            None => write!(f, "{}", self.partition),
        }
    }
}

/// Row read/write primitives the DAO needs from a database driver.
///
/// Connection pooling, driver-level retries and consistency levels belong
/// to the implementation; callers never retry on `StoreError`.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn get(&self, table: Table, key: &RowKey) -> Result<Option<Row>, StoreError>;

    /// All rows of a partition, in ascending clustering order.
    async fn get_partition(&self, table: Table, partition: &str) -> Result<Vec<Row>, StoreError>;

    /// Unconditional upsert.
    async fn put(&self, table: Table, key: &RowKey, row: Row) -> Result<(), StoreError>;

    /// Write-if-not-exists. Returns `false` when the row was already present.
    async fn put_if_absent(
        &self,
        table: Table,
        key: &RowKey,
        row: Row,
    ) -> Result<bool, StoreError>;

    /// Replace an existing row while its version still equals `expected`.
    /// Returns `false` when the row moved on or no longer exists.
    async fn put_if_version(
        &self,
        table: Table,
        key: &RowKey,
        row: Row,
        expected: u64,
    ) -> Result<bool, StoreError>;

    /// Removing a missing row is not an error.
    async fn delete(&self, table: Table, key: &RowKey) -> Result<(), StoreError>;

    /// Delete a row while its version still equals `expected`.
    async fn delete_if_version(
        &self,
        table: Table,
        key: &RowKey,
        expected: u64,
    ) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
