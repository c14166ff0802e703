//! Resource Service
//!
//! Minimal manifest storage: a resource is created from its YAML and read
//! back by deploys.

use stackrun_core::domain::manifest::{Manifest, ManifestError};
use stackrun_core::domain::resource::CloudResource;
use stackrun_core::dto::resource::CreateResource;
use uuid::Uuid;

use crate::repository::Stores;
use crate::service::error::{Result, ServiceError};

/// Store a manifest as a new cloud resource
pub async fn create_resource(stores: &Stores, req: CreateResource) -> Result<CloudResource> {
    let manifest = Manifest::from_yaml(&req.manifest).map_err(|e| match e {
        ManifestError::Empty => ServiceError::InvalidArgument("manifest cannot be empty".to_string()),
        other => ServiceError::InvalidArgument(other.to_string()),
    })?;

    if manifest.metadata.name.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(
            "metadata.name is required in manifest".to_string(),
        ));
    }

    let now = chrono::Utc::now();
    let resource = CloudResource {
        id: Uuid::new_v4(),
        name: manifest.metadata.name,
        kind: manifest.kind,
        manifest: req.manifest,
        created_at: now,
        updated_at: now,
    };

    stores.resources.create(&resource).await?;

    tracing::info!(
        "Cloud resource created: {} ({}) of kind {}",
        resource.name,
        resource.id,
        resource.kind
    );

    Ok(resource)
}

/// Get a resource by ID
pub async fn get_resource(stores: &Stores, id: Uuid) -> Result<CloudResource> {
    stores
        .resources
        .find_by_id(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cloud resource {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let stores = Stores::in_memory();
        let resource = create_resource(
            &stores,
            CreateResource {
                manifest: "kind: GcpVpc\nmetadata:\n  name: shared\n".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(resource.kind, "GcpVpc");
        assert_eq!(resource.name, "shared");

        let fetched = get_resource(&stores, resource.id).await.unwrap();
        assert_eq!(fetched.manifest, resource.manifest);
    }

    #[tokio::test]
    async fn test_invalid_manifests() {
        let stores = Stores::in_memory();

        for manifest in ["", "metadata:\n  name: x\n", "kind: AwsVpc\n", "kind: [unclosed"] {
            let result = create_resource(
                &stores,
                CreateResource {
                    manifest: manifest.to_string(),
                },
            )
            .await;
            assert!(
                matches!(result, Err(ServiceError::InvalidArgument(_))),
                "accepted {:?}",
                manifest
            );
        }
    }

    #[tokio::test]
    async fn test_get_missing() {
        let stores = Stores::in_memory();
        let result = get_resource(&stores, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
