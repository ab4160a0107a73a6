use std::path::PathBuf;

use crate::core::domain::BinaryHandle;

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("Failed to download interpreter: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Redirect without a usable location (status {status})")]
    NoRedirectTarget { status: u16 },
    #[error("Interpreter file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Interpreter binary was not produced at {}", path.display())]
    Missing { path: PathBuf },
}

/// Resolves a path to an interpreter binary that is ready to execute.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Provisioner: std::fmt::Debug + Send + Sync {
    async fn resolve(&self) -> Result<BinaryHandle, ProvisioningError>;
}
