use super::{cell, column_or_default, text, RowCodec};
use crate::models::{App, Collaborator};
use crate::services::DaoError;
use crate::store::{row_version, set_row_version, Row, RowKey, Table};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name of a deployment on an app and the id of its deployment row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSlot {
    pub name: String,
    pub id: String,
}

/// Stored form of an app.
///
/// Columns: `deployments` is the ordered name list (or `null` when there are
/// none) and `deployment_ids` maps each name to its deployment row.
/// `version` counts the replaces the row has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRow {
    pub id: String,
    pub name: String,
    pub collaborators: BTreeMap<String, Collaborator>,
    pub deployments: Vec<DeploymentSlot>,
    pub version: u64,
}

impl AppRow {
    pub fn slot(&self, name: &str) -> Option<&DeploymentSlot> {
        self.deployments.iter().find(|slot| slot.name == name)
    }

    pub fn has_deployment(&self, name: &str) -> bool {
        self.slot(name).is_some()
    }

    pub fn to_app(&self) -> App {
        App {
            id: self.id.clone(),
            name: self.name.clone(),
            collaborators: self.collaborators.clone(),
            deployments: if self.deployments.is_empty() {
                None
            } else {
                Some(self.deployments.iter().map(|slot| slot.name.clone()).collect())
            },
        }
    }
}

impl RowCodec for AppRow {
    const TABLE: Table = Table::Apps;

    fn row_key(&self) -> RowKey {
        RowKey::partition(&self.id)
    }

    fn encode(&self) -> Result<Row, DaoError> {
        let names = if self.deployments.is_empty() {
            Value::Null
        } else {
            Value::Array(
                self.deployments
                    .iter()
                    .map(|slot| Value::String(slot.name.clone()))
                    .collect(),
            )
        };
        let ids: BTreeMap<&str, &str> = self
            .deployments
            .iter()
            .map(|slot| (slot.name.as_str(), slot.id.as_str()))
            .collect();

        let mut row = Row::new();
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("name".into(), Value::String(self.name.clone()));
        row.insert("collaborators".into(), cell(&self.collaborators)?);
        row.insert("deployments".into(), names);
        row.insert("deployment_ids".into(), cell(&ids)?);
        set_row_version(&mut row, self.version);
        Ok(row)
    }

    fn decode(row: &Row) -> Result<Self, DaoError> {
        let id = text(row, "id")?;
        let names: Vec<String> = column_or_default(row, "deployments")?;
        let mut ids: BTreeMap<String, String> = column_or_default(row, "deployment_ids")?;

        let deployments = names
            .into_iter()
            .map(|name| match ids.remove(&name) {
                Some(deployment_id) => Ok(DeploymentSlot {
                    name,
                    id: deployment_id,
                }),
                None => Err(DaoError::Codec(format!(
                    "app {} lists deployment {} without a deployment id",
                    id, name
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AppRow {
            name: text(row, "name")?,
            collaborators: column_or_default(row, "collaborators")?,
            deployments,
            version: row_version(row),
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app_row(deployments: Vec<(&str, &str)>) -> AppRow {
        let mut collaborators = BTreeMap::new();
        collaborators.insert("test@t.com".to_string(), Collaborator::owner());
        AppRow {
            id: "a1".to_string(),
            name: "Hello".to_string(),
            collaborators,
            deployments: deployments
                .into_iter()
                .map(|(name, id)| DeploymentSlot {
                    name: name.to_string(),
                    id: id.to_string(),
                })
                .collect(),
            version: 0,
        }
    }

    #[test]
    fn deployment_names_keep_insertion_order() {
        let row = app_row(vec![("staging", "d1"), ("production", "d2")])
            .encode()
            .unwrap();

        assert_eq!(row["deployments"], json!(["staging", "production"]));
        assert_eq!(row["collaborators"], json!({"test@t.com": {"permission": "Owner"}}));

        let decoded = AppRow::decode(&row).unwrap();
        assert_eq!(
            decoded.to_app().deployments,
            Some(vec!["staging".to_string(), "production".to_string()])
        );
    }

    #[test]
    fn version_column_round_trips() {
        let mut app = app_row(vec![]);
        app.version = 7;
        let row = app.encode().unwrap();
        assert_eq!(row["version"], json!(7));
        assert_eq!(AppRow::decode(&row).unwrap().version, 7);
    }

    #[test]
    fn no_deployments_is_encoded_as_null() {
        let row = app_row(vec![]).encode().unwrap();
        assert_eq!(row["deployments"], Value::Null);

        let app = AppRow::decode(&row).unwrap().to_app();
        assert_eq!(app.deployments, None);
        assert!(app.deployment_names().is_empty());
    }

    #[test]
    fn listed_deployment_without_id_is_rejected() {
        let row = json!({
            "id": "a1",
            "name": "Hello",
            "collaborators": {},
            "deployments": ["staging"],
            "deployment_ids": {}
        })
        .as_object()
        .cloned()
        .unwrap();

        assert!(matches!(AppRow::decode(&row), Err(DaoError::Codec(_))));
    }
}
