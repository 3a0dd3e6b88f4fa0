//! # Logger
//!
//! [MetricsLogger] drives a [MetricsContext] through its flush cycle: resolve the environment,
//! add the environment dimensions to the defaults, write the document to the environment's
//! sink and reset the context for the next cycle.

use super::context::MetricsContext;
use super::dimension_set::{DimensionSet, DimensionSetError};
use super::environment::{Environment, EnvironmentProvider};
use super::Error;
use metrics::SharedString;
use serde_json::value::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};

/// How long [MetricsLogger::flush] waits for the environment before using the default one
pub const DEFAULT_ENVIRONMENT_TIMEOUT: Duration = Duration::from_secs(1);

pub const LOG_GROUP_DIMENSION: &str = "LogGroup";
pub const SERVICE_NAME_DIMENSION: &str = "ServiceName";
pub const SERVICE_TYPE_DIMENSION: &str = "ServiceType";

/// Outcome of one environment lookup
enum Resolution {
    Resolved(Arc<dyn Environment>),
    Failed(Error),
    TimedOut,
}

/// Embedded Metric Format logger
///
/// Use [Builder](super::Builder) to construct with the built-in environments, or
/// [MetricsLogger::new] with your own [EnvironmentProvider].
///
/// A logger is meant for one task at a time, mutations take `&mut self` and anything
/// recorded before [MetricsLogger::flush] is part of that flush's document.
///
/// # Example
/// ```
/// use cloudwatch_emf_logger::{DimensionSet, MetricsLogger};
///
/// # async fn handle(metrics: &mut MetricsLogger) -> Result<(), cloudwatch_emf_logger::DimensionSetError> {
/// metrics
///     .put_dimensions(DimensionSet::of([("Operation", "Purchase")])?)?
///     .put_metric("Orders", 1.0)
///     .put_property("RequestId", "ABC123");
///
/// metrics.flush().await;
/// # Ok(())
/// # }
/// ```
pub struct MetricsLogger {
    context: MetricsContext,
    /// Defaults set by the caller, environment dimensions are layered under these on flush
    default_dimensions: DimensionSet,
    provider: Arc<dyn EnvironmentProvider>,
    flush_preserve_dimensions: bool,
    environment_timeout: Duration,
}

impl MetricsLogger {
    pub fn new(provider: Arc<dyn EnvironmentProvider>) -> Self {
        Self::with_context(provider, MetricsContext::new())
    }

    /// Starts from an existing context, its default dimensions count as caller defaults
    pub fn with_context(provider: Arc<dyn EnvironmentProvider>, context: MetricsContext) -> Self {
        Self {
            default_dimensions: context.default_dimensions().clone(),
            context,
            provider,
            flush_preserve_dimensions: true,
            environment_timeout: DEFAULT_ENVIRONMENT_TIMEOUT,
        }
    }

    pub fn context(&self) -> &MetricsContext {
        &self.context
    }

    /// Set a property to emit with the metrics
    /// * Properties are cleared by every flush
    pub fn put_property(&mut self, name: impl Into<SharedString>, value: impl Into<Value>) -> &mut Self {
        self.context.put_property(name, value);
        self
    }

    /// Adds dimensions to the current dimension set, see [MetricsContext::put_dimensions]
    pub fn put_dimensions(&mut self, set: DimensionSet) -> Result<&mut Self, DimensionSetError> {
        self.context.put_dimensions(set)?;
        Ok(self)
    }

    /// Replaces the dimension sets and stops applying default dimensions
    pub fn set_dimensions(&mut self, sets: impl IntoIterator<Item = DimensionSet>) -> &mut Self {
        self.context.set_dimensions(sets);
        self
    }

    /// Replaces the dimension sets, keeping default dimensions when `preserve_default` is true
    pub fn set_dimensions_with_default(
        &mut self,
        preserve_default: bool,
        sets: impl IntoIterator<Item = DimensionSet>,
    ) -> Result<&mut Self, DimensionSetError> {
        self.context.set_dimensions_with_default(preserve_default, sets)?;
        Ok(self)
    }

    pub fn reset_dimensions(&mut self, preserve_default: bool) -> &mut Self {
        self.context.reset_dimensions(preserve_default);
        self
    }

    /// Replaces the caller defaults, they win over environment dimensions with the same name
    pub fn set_default_dimensions(&mut self, set: DimensionSet) -> Result<&mut Self, DimensionSetError> {
        self.context.set_default_dimensions(set.clone())?;
        self.default_dimensions = set;
        Ok(self)
    }

    pub fn put_metric(&mut self, name: impl Into<SharedString>, value: f64) -> &mut Self {
        self.context.put_metric(name, value, None);
        self
    }

    pub fn put_metric_with_unit(&mut self, name: impl Into<SharedString>, value: f64, unit: metrics::Unit) -> &mut Self {
        self.context.put_metric(name, value, Some(unit));
        self
    }

    pub fn set_namespace(&mut self, namespace: impl Into<SharedString>) -> &mut Self {
        self.context.set_namespace(namespace);
        self
    }

    /// Timestamp of the next document only, later documents use the flush time again
    pub fn set_timestamp(&mut self, timestamp: SystemTime) -> &mut Self {
        self.context.set_timestamp(timestamp);
        self
    }

    /// Whether flushes keep the dimension sets (the default) or reseed them from the defaults
    pub fn set_flush_preserve_dimensions(&mut self, preserve: bool) -> &mut Self {
        self.flush_preserve_dimensions = preserve;
        self
    }

    pub fn set_environment_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.environment_timeout = timeout;
        self
    }

    /// Write the accumulated metrics to the sink of the current environment
    ///
    /// Waiting for the environment is the only await point, an environment that fails or is
    /// not resolved within the timeout is replaced by the provider's default environment.
    /// Needs a tokio runtime with the time driver enabled.
    pub async fn flush(&mut self) {
        let environment = match self.resolve_environment().await {
            Resolution::Resolved(environment) => environment,
            Resolution::Failed(e) => {
                warn!("Failed to resolve environment, using the default environment: {e}");
                self.provider.default_environment()
            }
            Resolution::TimedOut => {
                warn!(
                    "Environment not resolved within {:?}, using the default environment",
                    self.environment_timeout
                );
                self.provider.default_environment()
            }
        };

        self.configure_context(environment.as_ref());
        self.context.pin_timestamp();

        match self.context.serialize() {
            Ok(event) => environment.sink().accept(&event, &self.context),
            Err(e) => error!("Failed to serialize metrics document: {e}"),
        }

        self.context.reset_after_flush(self.flush_preserve_dimensions);
    }

    async fn resolve_environment(&self) -> Resolution {
        match tokio::time::timeout(self.environment_timeout, self.provider.resolve_environment()).await {
            Ok(Ok(environment)) => Resolution::Resolved(environment),
            Ok(Err(e)) => Resolution::Failed(e),
            Err(_) => Resolution::TimedOut,
        }
    }

    /// Layer the environment dimensions under the caller defaults and let the environment
    /// add its own properties
    fn configure_context(&mut self, environment: &dyn Environment) {
        let fields = [
            (LOG_GROUP_DIMENSION, environment.log_group_name()),
            (SERVICE_NAME_DIMENSION, environment.name()),
            (SERVICE_TYPE_DIMENSION, environment.environment_type()),
        ];
        let present = fields
            .into_iter()
            .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v.to_owned())));

        let defaults = DimensionSet::of(present).and_then(|environment_dimensions| {
            let defaults = environment_dimensions.merge(&self.default_dimensions)?;
            self.context.set_default_dimensions(defaults.clone())?;
            Ok(defaults)
        });

        match defaults {
            Ok(defaults) => debug!("Default dimensions {:?}", defaults.dimension_keys()),
            Err(e) => {
                error!("Dropping environment dimensions: {e}");
                if let Err(e) = self.context.set_default_dimensions(self.default_dimensions.clone()) {
                    error!("Unable to restore default dimensions: {e}");
                }
            }
        }

        environment.configure_context(&mut self.context);
    }
}
