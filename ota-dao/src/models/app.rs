//! Apps, their collaborators, and deployments.

use crate::models::Package;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Owner,
    Collaborator,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Owner => write!(f, "Owner"),
            Permission::Collaborator => write!(f, "Collaborator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub permission: Permission,
}

impl Collaborator {
    pub fn owner() -> Self {
        Self {
            permission: Permission::Owner,
        }
    }

    pub fn collaborator() -> Self {
        Self {
            permission: Permission::Collaborator,
        }
    }
}

/// Decoded app record.
///
/// `deployments` lists deployment names in insertion order, and is `None`
/// (not an empty list) once the app has no deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: String,
    pub name: String,
    pub collaborators: BTreeMap<String, Collaborator>,
    pub deployments: Option<Vec<String>>,
}

impl App {
    pub fn deployment_names(&self) -> &[String] {
        self.deployments.as_deref().unwrap_or_default()
    }

    pub fn has_collaborator(&self, email: &str) -> bool {
        self.collaborators.contains_key(email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub key: String,
    pub package: Option<Package>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct NewDeployment {
    #[validate(length(min = 1, message = "deployment name must not be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "deployment key must not be empty"))]
    pub key: String,
}

impl NewDeployment {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

/// Request to create an app. Deployments keep the order they were given in.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewApp {
    #[validate(length(min = 1, message = "app name must not be empty"))]
    pub name: String,
    #[serde(default)]
    pub collaborators: BTreeMap<String, Collaborator>,
    #[serde(default)]
    #[validate(nested)]
    pub deployments: Vec<NewDeployment>,
}

impl NewApp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_collaborator(
        mut self,
        email: impl Into<String>,
        collaborator: Collaborator,
    ) -> Self {
        self.collaborators.insert(email.into(), collaborator);
        self
    }

    pub fn with_deployment(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.deployments.push(NewDeployment::new(name, key));
        self
    }
}

/// Changes applied by `update_app`. A supplied collaborator map replaces the stored one.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AppUpdate {
    #[serde(default)]
    #[validate(length(min = 1, message = "app name must not be empty"))]
    pub name: Option<String>,
    #[serde(default)]
    pub collaborators: Option<BTreeMap<String, Collaborator>>,
}
