use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::native::{gateway::GatewayOptions, provisioner::ProvisionerConfig};

pub const DEFAULT_BINARY_URL: &str = "https://github.com/AlmartDev/SK/releases/download/0.6.1/SK";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Gateway configuration loaded from environment variables.
///
/// | Env Var             | Default                        |
/// |---------------------|--------------------------------|
/// | `HOST`              | `0.0.0.0`                      |
/// | `PORT`              | `3000`                         |
/// | `SK_BINARY_URL`     | [`DEFAULT_BINARY_URL`]         |
/// | `SK_LOCAL_BINARY`   | `./SK`                         |
/// | `SK_CACHE_BINARY`   | `<temp dir>/SK`                |
/// | `SK_WORK_DIR`       | `<temp dir>`                   |
/// | `SK_DEADLINE_MS`    | `10000`                        |
/// | `SK_SAFE_MODE`      | `true`                         |
/// | `SK_MAX_BODY_BYTES` | `262144`                       |
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub binary_url: String,
    pub local_binary: PathBuf,
    pub cache_binary: PathBuf,
    pub work_dir: PathBuf,
    pub deadline: Duration,
    pub safe_mode: bool,
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let temp_dir = std::env::temp_dir();

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(&lookup, "PORT", 3000)?,
            binary_url: lookup("SK_BINARY_URL").unwrap_or_else(|| DEFAULT_BINARY_URL.into()),
            local_binary: lookup("SK_LOCAL_BINARY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("SK")),
            cache_binary: lookup("SK_CACHE_BINARY")
                .map(PathBuf::from)
                .unwrap_or_else(|| temp_dir.join("SK")),
            work_dir: lookup("SK_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(temp_dir),
            deadline: Duration::from_millis(parse_var(&lookup, "SK_DEADLINE_MS", 10_000)?),
            safe_mode: parse_var(&lookup, "SK_SAFE_MODE", true)?,
            max_body_bytes: parse_var(&lookup, "SK_MAX_BODY_BYTES", 256 * 1024)?,
        })
    }

    pub fn provisioner(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            local_path: self.local_binary.clone(),
            cache_path: self.cache_binary.clone(),
            source_url: self.binary_url.clone(),
        }
    }

    pub fn gateway(&self) -> GatewayOptions {
        GatewayOptions {
            work_dir: self.work_dir.clone(),
            safe_mode: self.safe_mode,
        }
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
