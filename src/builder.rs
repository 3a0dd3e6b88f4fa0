use super::config::{EnvironmentConfig, EnvironmentOverride};
use super::context::MetricsContext;
use super::dimension_set::DimensionSet;
use super::environment::{AutoEnvironmentProvider, EnvironmentProvider};
use super::logger::{MetricsLogger, DEFAULT_ENVIRONMENT_TIMEOUT};
use super::sink::Sink;
use super::Error;
use metrics::SharedString;
use std::sync::Arc;
use std::time::Duration;

/// Builder for the Embedded Metric Format logger
///
/// # Example
/// ```
///  let metrics = cloudwatch_emf_logger::Builder::new()
///      .namespace("MyApplication")
///      .with_dimension("Region", "us-east-1")
///      .build()
///      .unwrap();
/// ```
pub struct Builder {
    namespace: Option<SharedString>,
    default_dimensions: Vec<(SharedString, SharedString)>,
    config: EnvironmentConfig,
    flush_preserve_dimensions: bool,
    environment_timeout: Duration,
    environment_provider: Option<Arc<dyn EnvironmentProvider>>,
    sink: Option<Arc<dyn Sink>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::with_config(EnvironmentConfig::default())
    }

    /// Starts from the `AWS_EMF_*` variables of the current process
    pub fn from_env() -> Self {
        Self::with_config(EnvironmentConfig::from_env())
    }

    fn with_config(config: EnvironmentConfig) -> Self {
        Builder {
            namespace: Default::default(),
            default_dimensions: Default::default(),
            config,
            flush_preserve_dimensions: true,
            environment_timeout: DEFAULT_ENVIRONMENT_TIMEOUT,
            environment_provider: None,
            sink: None,
        }
    }

    /// Sets the CloudWatch namespace for all metrics
    /// * Defaults to `AWS_EMF_NAMESPACE`, then `aws-embedded-metrics`
    pub fn namespace(self, namespace: impl Into<SharedString>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..self
        }
    }

    /// Adds a default dimension (name, value), that will be sent with each document
    /// * This method can be called multiple times with distinct names
    /// * Wins over the environment dimension of the same name
    /// * No more than 30 dimensions in total, or build() will fail
    pub fn with_dimension(mut self, name: impl Into<SharedString>, value: impl Into<SharedString>) -> Self {
        self.default_dimensions.push((name.into(), value.into()));
        self
    }

    /// Service name reported by the built-in environments
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = Some(name.into());
        self
    }

    /// Service type reported by the built-in environments
    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.config.service_type = Some(service_type.into());
        self
    }

    /// Log group reported by the built-in environments
    pub fn log_group_name(mut self, log_group_name: impl Into<String>) -> Self {
        self.config.log_group_name = Some(log_group_name.into());
        self
    }

    /// Skips environment detection
    pub fn environment(mut self, environment: EnvironmentOverride) -> Self {
        self.config.environment_override = Some(environment);
        self
    }

    /// Keep dimension sets across flushes (the default) or reseed them from the defaults
    pub fn flush_preserve_dimensions(mut self, preserve: bool) -> Self {
        self.flush_preserve_dimensions = preserve;
        self
    }

    /// Upper bound on waiting for the environment during a flush
    pub fn environment_timeout(mut self, timeout: Duration) -> Self {
        self.environment_timeout = timeout;
        self
    }

    /// Replaces the built-in environment detection
    /// * Cannot be combined with [Builder::sink], the provider's environments bring their own sink
    pub fn environment_provider(mut self, provider: Arc<dyn EnvironmentProvider>) -> Self {
        self.environment_provider = Some(provider);
        self
    }

    /// Delivers documents to `sink` instead of stdout
    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Consume the builder into a logger
    pub fn build(self) -> Result<MetricsLogger, Error> {
        let default_dimensions = DimensionSet::of(self.default_dimensions)?;

        let mut context = MetricsContext::with_default_dimensions(default_dimensions);
        if let Some(namespace) = self.namespace.or_else(|| self.config.namespace.clone().map(Into::into)) {
            context.set_namespace(namespace);
        }

        let provider: Arc<dyn EnvironmentProvider> = match (self.environment_provider, self.sink) {
            (Some(_), Some(_)) => return Err("sink cannot be combined with a custom environment_provider".into()),
            (Some(provider), None) => provider,
            (None, sink) => {
                let provider = AutoEnvironmentProvider::new(self.config);
                Arc::new(match sink {
                    Some(sink) => provider.with_sink(sink),
                    None => provider,
                })
            }
        };

        let mut logger = MetricsLogger::with_context(provider, context);
        logger
            .set_flush_preserve_dimensions(self.flush_preserve_dimensions)
            .set_environment_timeout(self.environment_timeout);
        Ok(logger)
    }
}
