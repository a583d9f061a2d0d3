use super::{cell, column_or_default, text, RowCodec};
use crate::models::{Deployment, Package};
use crate::services::DaoError;
use crate::store::{row_version, set_row_version, Row, RowKey, Table};
use serde_json::Value;

/// Stored form of a deployment: the current package plus the append-only history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRow {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub key: String,
    pub package: Option<Package>,
    pub history: Vec<Package>,
    pub version: u64,
}

impl DeploymentRow {
    pub fn new(id: String, app_id: String, name: String, key: String) -> Self {
        Self {
            id,
            app_id,
            name,
            key,
            package: None,
            history: Vec::new(),
            version: 0,
        }
    }

    pub fn to_deployment(&self) -> Deployment {
        Deployment {
            id: self.id.clone(),
            app_id: self.app_id.clone(),
            name: self.name.clone(),
            key: self.key.clone(),
            package: self.package.clone(),
        }
    }

    /// Make `package` current and append it to the history.
    pub fn push_package(&mut self, package: Package) {
        self.history.push(package.clone());
        self.package = Some(package);
    }
}

impl RowCodec for DeploymentRow {
    const TABLE: Table = Table::Deployments;

    fn row_key(&self) -> RowKey {
        RowKey::partition(&self.id)
    }

    fn encode(&self) -> Result<Row, DaoError> {
        let mut row = Row::new();
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("app_id".into(), Value::String(self.app_id.clone()));
        row.insert("name".into(), Value::String(self.name.clone()));
        row.insert("key".into(), Value::String(self.key.clone()));
        row.insert("package".into(), cell(&self.package)?);
        row.insert("history".into(), cell(&self.history)?);
        set_row_version(&mut row, self.version);
        Ok(row)
    }

    fn decode(row: &Row) -> Result<Self, DaoError> {
        Ok(DeploymentRow {
            id: text(row, "id")?,
            app_id: text(row, "app_id")?,
            name: text(row, "name")?,
            key: text(row, "key")?,
            package: column_or_default(row, "package")?,
            history: column_or_default(row, "history")?,
            version: row_version(row),
        })
    }
}
