//! Resource manifest
//!
//! A manifest is a YAML document of the form:
//!
//! ```yaml
//! apiVersion: aws.project-planton.org/v1
//! kind: AwsVpc
//! metadata:
//!   name: main-vpc
//!   labels:
//!     pulumi.project-planton.org/stack.fqdn: acme/network/prod
//! spec:
//!   cidrBlock: 10.0.0.0/16
//! ```
//!
//! The `spec` section is opaque here; validating it is the job of the schema
//! catalog that owns each kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ManifestMetadata,
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is empty")]
    Empty,

    #[error("manifest is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("kind field is required in manifest")]
    MissingKind,
}

impl Manifest {
    /// Parse a manifest and check the fields every deploy relies on
    pub fn from_yaml(source: &str) -> Result<Self, ManifestError> {
        if source.trim().is_empty() {
            return Err(ManifestError::Empty);
        }

        let manifest: Manifest = serde_yaml::from_str(source)?;
        if manifest.kind.trim().is_empty() {
            return Err(ManifestError::MissingKind);
        }

        Ok(manifest)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }
}
