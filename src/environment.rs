//! # Environment
//!
//! Where the process runs and where its metrics documents go. A [MetricsLogger](super::MetricsLogger)
//! asks an [EnvironmentProvider] for the current [Environment] on every flush and falls back to
//! the provider's default environment if resolution fails.

use super::config::{EnvironmentConfig, EnvironmentOverride};
use super::context::MetricsContext;
use super::sink::{ConsoleSink, Sink};
use super::Error;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::debug;

const UNKNOWN: &str = "Unknown";
const LOCAL_TYPE: &str = "Local";
const LAMBDA_TYPE: &str = "AWS::Lambda::Function";

const LAMBDA_FUNCTION_NAME_VAR: &str = "AWS_LAMBDA_FUNCTION_NAME";
const LAMBDA_FUNCTION_VERSION_VAR: &str = "AWS_LAMBDA_FUNCTION_VERSION";
const LAMBDA_LOG_STREAM_VAR: &str = "AWS_LAMBDA_LOG_STREAM_NAME";
const LAMBDA_EXECUTION_ENV_VAR: &str = "AWS_EXECUTION_ENV";
const LAMBDA_TRACE_ID_VAR: &str = "_X_AMZN_TRACE_ID";

/// Deployment metadata and the sink documents are delivered to
///
/// Any metadata field may be absent, absent fields produce no dimension.
pub trait Environment: Send + Sync {
    /// Service name, reported as the `ServiceName` dimension
    fn name(&self) -> Option<&str>;

    /// Service type, reported as the `ServiceType` dimension
    fn environment_type(&self) -> Option<&str>;

    /// Log group, reported as the `LogGroup` dimension
    fn log_group_name(&self) -> Option<&str>;

    /// Sink for the next document, looked up again on every flush
    fn sink(&self) -> Arc<dyn Sink>;

    /// Hook to add environment specific properties before a document is written
    fn configure_context(&self, _context: &mut MetricsContext) {}
}

/// Resolves the [Environment] a logger flushes into
pub trait EnvironmentProvider: Send + Sync {
    /// Asynchronous lookup that may fail or take arbitrarily long
    fn resolve_environment(&self) -> BoxFuture<'_, Result<Arc<dyn Environment>, Error>>;

    /// Synchronous, infallible environment used when resolution does not succeed
    fn default_environment(&self) -> Arc<dyn Environment>;
}

/// Environment built from configuration alone, used as the fallback
pub struct DefaultEnvironment {
    name: String,
    environment_type: String,
    log_group_name: String,
    sink: Arc<dyn Sink>,
}

impl DefaultEnvironment {
    /// Name and type default to `Unknown`, the log group to `<name>-metrics`
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self::with_type(config, UNKNOWN)
    }

    fn with_type(config: &EnvironmentConfig, default_type: &str) -> Self {
        let name = config.service_name.clone().unwrap_or_else(|| UNKNOWN.to_owned());
        Self {
            environment_type: config.service_type.clone().unwrap_or_else(|| default_type.to_owned()),
            log_group_name: config
                .log_group_name
                .clone()
                .unwrap_or_else(|| format!("{name}-metrics")),
            name,
            sink: Arc::new(ConsoleSink),
        }
    }

    pub fn with_sink(self, sink: Arc<dyn Sink>) -> Self {
        Self { sink, ..self }
    }
}

impl Environment for DefaultEnvironment {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn environment_type(&self) -> Option<&str> {
        Some(&self.environment_type)
    }

    fn log_group_name(&self) -> Option<&str> {
        Some(&self.log_group_name)
    }

    fn sink(&self) -> Arc<dyn Sink> {
        self.sink.clone()
    }
}

/// A developer machine or any host without a metrics agent, documents go to stdout
pub struct LocalEnvironment {
    inner: DefaultEnvironment,
}

impl LocalEnvironment {
    /// Same defaults as [DefaultEnvironment] except the type, which defaults to `Local`
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            inner: DefaultEnvironment::with_type(config, LOCAL_TYPE),
        }
    }

    pub fn with_sink(self, sink: Arc<dyn Sink>) -> Self {
        Self {
            inner: self.inner.with_sink(sink),
        }
    }
}

impl Environment for LocalEnvironment {
    fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    fn environment_type(&self) -> Option<&str> {
        self.inner.environment_type()
    }

    fn log_group_name(&self) -> Option<&str> {
        self.inner.log_group_name()
    }

    fn sink(&self) -> Arc<dyn Sink> {
        self.inner.sink()
    }
}

/// AWS Lambda, detected through the variables the Lambda runtime sets
///
/// The function's log group is created by Lambda itself, documents go to stdout.
pub struct LambdaEnvironment {
    function_name: String,
    function_version: Option<String>,
    log_stream: Option<String>,
    execution_environment: Option<String>,
    trace_id: Option<String>,
    sink: Arc<dyn Sink>,
}

impl LambdaEnvironment {
    /// Reads the Lambda runtime variables of the current process
    pub fn detect() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Returns `None` unless `AWS_LAMBDA_FUNCTION_NAME` is set
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

        Some(Self {
            function_name: read(LAMBDA_FUNCTION_NAME_VAR)?,
            function_version: read(LAMBDA_FUNCTION_VERSION_VAR),
            log_stream: read(LAMBDA_LOG_STREAM_VAR),
            execution_environment: read(LAMBDA_EXECUTION_ENV_VAR),
            // Only sampled traces can be looked up in X-Ray
            trace_id: read(LAMBDA_TRACE_ID_VAR).filter(|trace| trace.contains("Sampled=1")),
            sink: Arc::new(ConsoleSink),
        })
    }

    pub fn with_sink(self, sink: Arc<dyn Sink>) -> Self {
        Self { sink, ..self }
    }
}

impl Environment for LambdaEnvironment {
    fn name(&self) -> Option<&str> {
        Some(&self.function_name)
    }

    fn environment_type(&self) -> Option<&str> {
        Some(LAMBDA_TYPE)
    }

    fn log_group_name(&self) -> Option<&str> {
        Some(&self.function_name)
    }

    fn sink(&self) -> Arc<dyn Sink> {
        self.sink.clone()
    }

    fn configure_context(&self, context: &mut MetricsContext) {
        let properties = [
            ("executionEnvironment", &self.execution_environment),
            ("functionVersion", &self.function_version),
            ("logStreamId", &self.log_stream),
            ("traceId", &self.trace_id),
        ];
        for (name, value) in properties {
            if let Some(value) = value {
                context.put_property(name, value.clone());
            }
        }
    }
}

/// Picks the environment from `AWS_EMF_ENVIRONMENT`, otherwise Lambda when the Lambda
/// runtime variables are present, otherwise [DefaultEnvironment]
pub struct AutoEnvironmentProvider {
    config: EnvironmentConfig,
    sink: Option<Arc<dyn Sink>>,
}

impl AutoEnvironmentProvider {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self { config, sink: None }
    }

    /// Deliver documents to `sink` whatever environment is resolved
    pub fn with_sink(self, sink: Arc<dyn Sink>) -> Self {
        Self {
            sink: Some(sink),
            ..self
        }
    }

    fn sink(&self) -> Arc<dyn Sink> {
        self.sink.clone().unwrap_or_else(|| Arc::new(ConsoleSink))
    }

    fn detect(&self) -> Result<Arc<dyn Environment>, Error> {
        let environment: Arc<dyn Environment> = match self.config.environment_override {
            Some(EnvironmentOverride::Lambda) => match LambdaEnvironment::detect() {
                Some(lambda) => Arc::new(lambda.with_sink(self.sink())),
                None => return Err("environment is forced to Lambda but AWS_LAMBDA_FUNCTION_NAME is not set".into()),
            },
            Some(EnvironmentOverride::Local) => Arc::new(LocalEnvironment::new(&self.config).with_sink(self.sink())),
            Some(EnvironmentOverride::Default) => self.default_environment(),
            None => match LambdaEnvironment::detect() {
                Some(lambda) => Arc::new(lambda.with_sink(self.sink())),
                None => self.default_environment(),
            },
        };

        debug!(
            "Resolved environment {}",
            environment.environment_type().unwrap_or(UNKNOWN)
        );
        Ok(environment)
    }
}

impl EnvironmentProvider for AutoEnvironmentProvider {
    fn resolve_environment(&self) -> BoxFuture<'_, Result<Arc<dyn Environment>, Error>> {
        futures::future::ready(self.detect()).boxed()
    }

    fn default_environment(&self) -> Arc<dyn Environment> {
        Arc::new(DefaultEnvironment::new(&self.config).with_sink(self.sink()))
    }
}
