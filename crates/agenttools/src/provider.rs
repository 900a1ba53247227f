use agentcore::BlockError;
use agentruntime::{ProviderClient, ProviderRequest, ProviderResponse};
use async_trait::async_trait;

/// Provider used when no model client is wired in. Every model-backed block
/// fails with a clear message; the rest of the workflow still runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredProvider;

#[async_trait]
impl ProviderClient for UnconfiguredProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, BlockError> {
        Err(BlockError::Provider(format!(
            "No provider client configured for {}",
            request.provider_id
        )))
    }
}
