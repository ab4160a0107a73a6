use std::time::Duration;

use crate::core::{
    domain::{ExecutionRequest, ExecutionResult},
    traits::provisioner::ProvisioningError,
};

/// Failures that prevent an execution from being attempted at all.
///
/// Anything that happens once the interpreter is resolved and the source
/// is on disk (spawn failures, crashes, timeouts) is reported through
/// [`ExecutionResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error("Failed to write source file: {0}")]
    SourceFile(#[source] std::io::Error),
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait Gateway: std::fmt::Debug + Send + Sync {
    async fn run(
        &self,
        request: &ExecutionRequest,
        deadline: Duration,
    ) -> Result<ExecutionResult, GatewayError>;

    /// Output of `<binary> --version`, trimmed, or a fixed fallback.
    async fn version(&self, deadline: Duration) -> Result<String, GatewayError>;
}
