//! # Config
//!
//! Environment metadata settings, read from `AWS_EMF_*` process variables or set through the
//! [Builder](super::Builder)

use std::str::FromStr;
use tracing::warn;

pub const SERVICE_NAME_VAR: &str = "AWS_EMF_SERVICE_NAME";
pub const SERVICE_TYPE_VAR: &str = "AWS_EMF_SERVICE_TYPE";
pub const LOG_GROUP_NAME_VAR: &str = "AWS_EMF_LOG_GROUP_NAME";
pub const NAMESPACE_VAR: &str = "AWS_EMF_NAMESPACE";
pub const ENVIRONMENT_VAR: &str = "AWS_EMF_ENVIRONMENT";

/// Forces a specific environment instead of detecting one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvironmentOverride {
    Lambda,
    Local,
    Default,
}

impl FromStr for EnvironmentOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lambda" => Ok(Self::Lambda),
            "local" => Ok(Self::Local),
            "default" => Ok(Self::Default),
            other => Err(format!("unknown environment {other:?}")),
        }
    }
}

/// Metadata the built-in environments report as dimensions
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub service_name: Option<String>,
    pub service_type: Option<String>,
    pub log_group_name: Option<String>,
    pub namespace: Option<String>,
    pub environment_override: Option<EnvironmentOverride>,
}

impl EnvironmentConfig {
    /// Reads the `AWS_EMF_*` variables of the current process
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let environment_override = read(ENVIRONMENT_VAR).and_then(|value| match value.parse() {
            Ok(environment) => Some(environment),
            Err(e) => {
                warn!("Ignoring {ENVIRONMENT_VAR}: {e}");
                None
            }
        });

        Self {
            service_name: read(SERVICE_NAME_VAR),
            service_type: read(SERVICE_TYPE_VAR),
            log_group_name: read(LOG_GROUP_NAME_VAR),
            namespace: read(NAMESPACE_VAR),
            environment_override,
        }
    }
}
