use std::time::Duration;

use crate::core::{
    domain::{ExecutionRequest, ExecutionResult},
    traits::gateway::{Gateway, GatewayError},
};

/// Answers every request with the same result after a fixed delay.
#[derive(Debug, Clone)]
pub struct GatewayStub {
    result: ExecutionResult,
    version: String,
    delay: Duration,
}

impl GatewayStub {
    pub fn new(result: ExecutionResult, version: &str, delay: Duration) -> Self {
        Self {
            result,
            version: version.to_string(),
            delay,
        }
    }
}

#[async_trait::async_trait]
impl Gateway for GatewayStub {
    #[tracing::instrument(skip(self))]
    async fn run(
        &self,
        request: &ExecutionRequest,
        deadline: Duration,
    ) -> Result<ExecutionResult, GatewayError> {
        tracing::debug!("Start execution: request={:?}, deadline={:?}", request, deadline);
        tokio::time::sleep(self.delay).await;
        tracing::debug!("Execution result: {:?}", self.result);

        Ok(self.result.clone())
    }

    async fn version(&self, _deadline: Duration) -> Result<String, GatewayError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.version.clone())
    }
}
