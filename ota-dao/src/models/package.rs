use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A release attached to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub package_hash: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub rollout: Option<u8>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub blob_url: Option<String>,
    #[serde(default)]
    pub manifest_blob_url: Option<String>,
    /// Assigned as `v{n}` on attach when not supplied.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub release_method: Option<String>,
    #[serde(default)]
    pub original_label: Option<String>,
    #[serde(default)]
    pub original_deployment: Option<String>,
    #[serde(default)]
    pub released_by: Option<String>,
    #[serde(default)]
    pub upload_time: Option<DateTime<Utc>>,
}

impl Package {
    pub fn new(package_hash: impl Into<String>) -> Self {
        Self {
            package_hash: package_hash.into(),
            description: None,
            app_version: None,
            is_mandatory: false,
            is_disabled: false,
            rollout: None,
            size: None,
            blob_url: None,
            manifest_blob_url: None,
            label: None,
            release_method: None,
            original_label: None,
            original_deployment: None,
            released_by: None,
            upload_time: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Metadata changes for the current package of a deployment.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PackageUpdate {
    pub description: Option<String>,
    pub app_version: Option<String>,
    pub is_mandatory: Option<bool>,
    pub is_disabled: Option<bool>,
    #[validate(range(min = 1, max = 100, message = "rollout must be between 1 and 100"))]
    pub rollout: Option<u8>,
}

impl PackageUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.app_version.is_none()
            && self.is_mandatory.is_none()
            && self.is_disabled.is_none()
            && self.rollout.is_none()
    }

    pub fn apply(&self, package: &mut Package) {
        if let Some(description) = &self.description {
            package.description = Some(description.clone());
        }
        if let Some(app_version) = &self.app_version {
            package.app_version = Some(app_version.clone());
        }
        if let Some(is_mandatory) = self.is_mandatory {
            package.is_mandatory = is_mandatory;
        }
        if let Some(is_disabled) = self.is_disabled {
            package.is_disabled = is_disabled;
        }
        if let Some(rollout) = self.rollout {
            package.rollout = Some(rollout);
        }
    }
}
