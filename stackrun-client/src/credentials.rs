//! Credential endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use stackrun_core::domain::credential::{CredentialData, Provider};
use stackrun_core::dto::credential::{CreateCredential, CredentialSummary};

impl OrchestratorClient {
    /// Store provider credentials
    ///
    /// The secret material is never returned; only a summary comes back.
    pub async fn create_credential(
        &self,
        name: impl Into<String>,
        data: CredentialData,
    ) -> Result<CredentialSummary> {
        let response = self
            .client
            .post(self.url("/credentials"))
            .json(&CreateCredential {
                name: name.into(),
                data,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List stored credentials, optionally for a single provider
    pub async fn list_credentials(
        &self,
        provider: Option<Provider>,
    ) -> Result<Vec<CredentialSummary>> {
        let mut request = self.client.get(self.url("/credentials"));
        if let Some(provider) = provider {
            request = request.query(&[("provider", provider.as_str())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }
}
