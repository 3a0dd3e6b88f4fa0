//! # cloudwatch_emf_logger
//!
//! Accumulates properties, dimensions and metric samples into a [MetricsContext], then
//! serializes them as a CloudWatch Embedded Metric Format document and hands the document
//! to the [Sink] of the resolved [Environment] on every [MetricsLogger::flush].
//!
//! # Example
//! ```
//! use cloudwatch_emf_logger::{Builder, DimensionSet};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), cloudwatch_emf_logger::Error> {
//! let mut metrics = Builder::new()
//!     .namespace("MyApplication")
//!     .service_name("Checkout")
//!     .build()?;
//!
//! metrics
//!     .put_dimensions(DimensionSet::of([("Operation", "Purchase")])?)?
//!     .put_metric_with_unit("Latency", 42.0, metrics::Unit::Milliseconds)
//!     .put_property("RequestId", "ABC123");
//!
//! metrics.flush().await;
//! # Ok(())
//! # }
//! ```

#[cfg(test)]
#[macro_use]
extern crate rusty_fork;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use {
    builder::Builder,
    config::{EnvironmentConfig, EnvironmentOverride},
    context::{MetricValues, MetricsContext, DEFAULT_NAMESPACE, MAX_VALUES_PER_METRIC},
    dimension_set::{DimensionSet, DimensionSetError, MAX_DIMENSION_SET_SIZE},
    environment::{
        AutoEnvironmentProvider, DefaultEnvironment, Environment, EnvironmentProvider, LambdaEnvironment,
        LocalEnvironment,
    },
    logger::{
        MetricsLogger, DEFAULT_ENVIRONMENT_TIMEOUT, LOG_GROUP_DIMENSION, SERVICE_NAME_DIMENSION, SERVICE_TYPE_DIMENSION,
    },
    sink::{CapturingSink, ConsoleSink, Sink, WriterSink},
};

mod builder;
mod config;
mod context;
mod dimension_set;
mod emf;
mod environment;
mod logger;
mod sink;
