//! Cloud resource endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use stackrun_core::domain::resource::CloudResource;
use stackrun_core::dto::resource::CreateResource;
use uuid::Uuid;

impl OrchestratorClient {
    /// Store a resource manifest
    ///
    /// # Arguments
    /// * `manifest` - The manifest YAML, exactly as it should be deployed
    ///
    /// # Returns
    /// The stored resource
    pub async fn create_resource(&self, manifest: impl Into<String>) -> Result<CloudResource> {
        let response = self
            .client
            .post(self.url("/resources"))
            .json(&CreateResource {
                manifest: manifest.into(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a stored resource by ID
    pub async fn get_resource(&self, resource_id: Uuid) -> Result<CloudResource> {
        let url = self.url(&format!("/resources/{}", resource_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
