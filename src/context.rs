//! # Context
//!
//! The mutable accumulator behind a [MetricsLogger](super::MetricsLogger): properties, dimension
//! sets, namespace, timestamp and metric samples for a single flush cycle.

use super::dimension_set::{DimensionSet, DimensionSetError, MAX_DIMENSION_SET_SIZE};
use super::emf;
use metrics::SharedString;
use serde_json::value::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

/// Namespace used until [MetricsContext::set_namespace] is called
pub const DEFAULT_NAMESPACE: &str = "aws-embedded-metrics";

/// The Embedded Metric Format supports a maximum of 100 values per key
pub const MAX_VALUES_PER_METRIC: usize = 100;

/// Samples recorded for one metric name during a flush cycle
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricValues {
    values: Vec<f64>,
    unit: Option<metrics::Unit>,
}

impl MetricValues {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn unit(&self) -> Option<&metrics::Unit> {
        self.unit.as_ref()
    }
}

/// Properties, dimensions and metrics accumulated between two flushes
///
/// Dimensions have two layers: the active dimension sets set by the caller, and a default
/// set that is overlaid under every active set when the document is written. Whether the
/// defaults apply is tracked separately from the active sets, so an explicitly empty
/// dimension list stays empty even when defaults exist.
#[derive(Clone, Debug)]
pub struct MetricsContext {
    namespace: SharedString,
    properties: BTreeMap<SharedString, Value>,
    dimensions: Vec<DimensionSet>,
    default_dimensions: DimensionSet,
    use_default_dimensions: bool,
    timestamp: Option<SystemTime>,
    metrics: BTreeMap<SharedString, MetricValues>,
}

impl Default for MetricsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsContext {
    pub fn new() -> Self {
        Self {
            namespace: SharedString::const_str(DEFAULT_NAMESPACE),
            properties: BTreeMap::new(),
            dimensions: Vec::new(),
            default_dimensions: DimensionSet::new(),
            use_default_dimensions: true,
            timestamp: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Creates a context that owns the given default dimensions
    pub fn with_default_dimensions(default_dimensions: DimensionSet) -> Self {
        Self {
            default_dimensions,
            ..Self::new()
        }
    }

    /// Set a property to emit with the metrics
    /// * Setting a property with same name multiple times will overwrite the previous value
    pub fn put_property(&mut self, name: impl Into<SharedString>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(name, value)| (&**name, value))
    }

    /// Merges `set` into the last active dimension set, or makes it the only active set
    ///
    /// Fails without touching the context if the resulting combination, including the
    /// defaults when they apply, would hold more than [MAX_DIMENSION_SET_SIZE] keys.
    pub fn put_dimensions(&mut self, set: DimensionSet) -> Result<(), DimensionSetError> {
        let merged = match self.dimensions.last() {
            Some(last) => last.merge(&set)?,
            None => set,
        };
        self.check_against_defaults(&merged)?;

        match self.dimensions.last_mut() {
            Some(last) => *last = merged,
            None => self.dimensions.push(merged),
        }
        Ok(())
    }

    /// Replaces every active dimension set and stops applying the default dimensions
    ///
    /// Passing no sets leaves an explicitly empty dimension list.
    pub fn set_dimensions(&mut self, sets: impl IntoIterator<Item = DimensionSet>) {
        self.dimensions = sets.into_iter().collect();
        self.use_default_dimensions = false;
    }

    /// Replaces every active dimension set, each set is layered over the defaults when
    /// `preserve_default` is true
    pub fn set_dimensions_with_default(
        &mut self,
        preserve_default: bool,
        sets: impl IntoIterator<Item = DimensionSet>,
    ) -> Result<(), DimensionSetError> {
        if !preserve_default {
            self.set_dimensions(sets);
            return Ok(());
        }

        let dimensions: Vec<DimensionSet> = sets.into_iter().collect();
        for set in &dimensions {
            match self.default_dimensions.union_len(set) {
                count if count > MAX_DIMENSION_SET_SIZE => return Err(DimensionSetError::Exceeded { count }),
                _ => {}
            }
        }

        self.dimensions = dimensions;
        self.use_default_dimensions = true;
        Ok(())
    }

    /// Clears the active dimension sets
    ///
    /// With `preserve_default` the current defaults keep being applied, whatever they are
    /// when the document is written. Otherwise the defaults are dropped as well.
    pub fn reset_dimensions(&mut self, preserve_default: bool) {
        self.dimensions.clear();
        self.use_default_dimensions = preserve_default;
    }

    /// Replaces the default dimensions, active sets are left as they are
    pub fn set_default_dimensions(&mut self, set: DimensionSet) -> Result<(), DimensionSetError> {
        if self.use_default_dimensions {
            if let Some(count) = self
                .dimensions
                .iter()
                .map(|active| set.union_len(active))
                .find(|count| *count > MAX_DIMENSION_SET_SIZE)
            {
                return Err(DimensionSetError::Exceeded { count });
            }
        }
        self.default_dimensions = set;
        Ok(())
    }

    pub fn default_dimensions(&self) -> &DimensionSet {
        &self.default_dimensions
    }

    /// True until the caller replaces or resets the dimensions without keeping the defaults
    pub fn uses_default_dimensions(&self) -> bool {
        self.use_default_dimensions
    }

    /// The dimension sets as they will be written, defaults included
    pub fn dimensions(&self) -> Vec<DimensionSet> {
        if !self.use_default_dimensions {
            return self.dimensions.clone();
        }

        if self.dimensions.is_empty() {
            if self.default_dimensions.is_empty() {
                return Vec::new();
            }
            return vec![self.default_dimensions.clone()];
        }

        self.dimensions
            .iter()
            .map(|set| self.default_dimensions.overlay(set))
            .collect()
    }

    /// Records a sample for `name`
    /// * Samples for the same name accumulate until the next flush
    /// * A given unit replaces any unit recorded before it
    /// * NaN and infinite samples are dropped, they have no JSON number form
    pub fn put_metric(&mut self, name: impl Into<SharedString>, value: f64, unit: Option<metrics::Unit>) {
        let name = name.into();
        if !value.is_finite() {
            error!("Dropping non-finite sample {value} for metric {name}");
            return;
        }

        let metric = self.metrics.entry(name).or_default();
        if metric.values.len() >= MAX_VALUES_PER_METRIC {
            error!("Dropping sample {value}, more than {MAX_VALUES_PER_METRIC} unflushed values");
            return;
        }

        if unit.is_some() {
            metric.unit = unit;
        }
        metric.values.push(value);
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValues> {
        self.metrics.get(name)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(|name| &**name)
    }

    pub fn set_namespace(&mut self, namespace: impl Into<SharedString>) {
        self.namespace = namespace.into();
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set_timestamp(&mut self, timestamp: SystemTime) {
        self.timestamp = Some(timestamp);
    }

    /// Explicit timestamp, or the one pinned by the last flush
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Serialize the context as an Embedded Metric Format document
    ///
    /// An unset timestamp is taken as the current time. Every member name is written once:
    /// a dimension wins over a metric and a metric wins over a property of the same name.
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        let dimension_sets = self.dimensions();

        let mut emf = emf::EmbeddedMetrics {
            aws: emf::EmbeddedMetricsAws {
                timestamp: epoch_millis(self.timestamp.unwrap_or_else(SystemTime::now)),
                cloudwatch_metrics: [emf::EmbeddedNamespace {
                    namespace: &self.namespace,
                    dimensions: Vec::with_capacity(dimension_sets.len()),
                    metrics: Vec::with_capacity(self.metrics.len()),
                }],
            },
            dimensions: BTreeMap::new(),
            properties: BTreeMap::new(),
            values: BTreeMap::new(),
        };

        for set in &dimension_sets {
            emf.aws.cloudwatch_metrics[0].dimensions.push(set.dimension_keys());
            for (name, value) in set.iter() {
                emf.dimensions.insert(name, value);
            }
        }

        for (name, metric) in &self.metrics {
            if emf.dimensions.contains_key(&**name) {
                warn!("Metric {name} is shadowed by the dimension of the same name");
                continue;
            }
            emf.aws.cloudwatch_metrics[0].metrics.push(emf::EmbeddedMetric {
                name,
                unit: metric.unit.as_ref().map(emf::unit_to_str),
            });
            emf.values.insert(name, emf::samples_to_value(&metric.values));
        }

        for (name, value) in &self.properties {
            if emf.dimensions.contains_key(&**name) || emf.values.contains_key(&**name) {
                warn!("Property {name} is shadowed by the dimension or metric of the same name");
                continue;
            }
            emf.properties.insert(name, value);
        }

        serde_json::to_string(&emf)
    }

    fn check_against_defaults(&self, set: &DimensionSet) -> Result<(), DimensionSetError> {
        if !self.use_default_dimensions {
            return Ok(());
        }
        match self.default_dimensions.union_len(set) {
            count if count > MAX_DIMENSION_SET_SIZE => Err(DimensionSetError::Exceeded { count }),
            _ => Ok(()),
        }
    }

    /// Fix the timestamp of the document about to be written
    pub(crate) fn pin_timestamp(&mut self) {
        self.timestamp.get_or_insert_with(SystemTime::now);
    }

    /// Start a new flush cycle
    /// * Metrics, properties and the timestamp never outlive a flush
    /// * Dimensions are kept, or reseeded from the defaults
    pub(crate) fn reset_after_flush(&mut self, preserve_dimensions: bool) {
        self.metrics.clear();
        self.properties.clear();
        self.timestamp = None;

        if !preserve_dimensions {
            self.reset_dimensions(true);
        }
    }
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dims(pairs: &[(&'static str, &'static str)]) -> DimensionSet {
        DimensionSet::of(pairs.iter().copied()).unwrap()
    }

    fn parse(context: &MetricsContext) -> Value {
        serde_json::from_str(&context.serialize().unwrap()).unwrap()
    }

    #[test]
    fn put_dimensions_is_cumulative() {
        let mut context = MetricsContext::new();
        context.put_dimensions(dims(&[("a", "1")])).unwrap();
        context.put_dimensions(dims(&[("b", "2")])).unwrap();
        context.put_dimensions(dims(&[("a", "3")])).unwrap();

        let dimensions = context.dimensions();
        assert_eq!(dimensions.len(), 1);
        assert_eq!(dimensions[0].dimension_keys(), vec!["a", "b"]);
        assert_eq!(dimensions[0].dimension_value("a"), Some("3"));
    }

    #[test]
    fn defaults_are_overlaid_under_active_sets() {
        let mut context = MetricsContext::with_default_dimensions(dims(&[("Service", "svc"), ("a", "default")]));
        context.put_dimensions(dims(&[("a", "explicit"), ("b", "2")])).unwrap();

        let dimensions = context.dimensions();
        assert_eq!(dimensions.len(), 1);
        assert_eq!(dimensions[0].dimension_keys(), vec!["Service", "a", "b"]);
        assert_eq!(dimensions[0].dimension_value("a"), Some("explicit"));
    }

    #[test]
    fn defaults_alone_when_nothing_is_active() {
        let context = MetricsContext::with_default_dimensions(dims(&[("Service", "svc")]));
        assert_eq!(context.dimensions(), vec![dims(&[("Service", "svc")])]);

        assert!(MetricsContext::new().dimensions().is_empty());
    }

    #[test]
    fn set_dimensions_drops_defaults() {
        let mut context = MetricsContext::with_default_dimensions(dims(&[("Service", "svc")]));
        context.put_dimensions(dims(&[("foo", "bar")])).unwrap();
        context.set_dimensions([dims(&[("dim", "value")])]);

        let dimensions = context.dimensions();
        assert_eq!(dimensions.len(), 1);
        assert_eq!(dimensions[0].dimension_keys(), vec!["dim"]);
        assert!(!context.uses_default_dimensions());
    }

    #[test]
    fn set_dimensions_with_default_keeps_defaults() {
        let mut context = MetricsContext::with_default_dimensions(dims(&[("Service", "svc")]));
        context.put_dimensions(dims(&[("foo", "bar")])).unwrap();
        context
            .set_dimensions_with_default(true, [dims(&[("dim", "value")]), dims(&[("Service", "override")])])
            .unwrap();

        let dimensions = context.dimensions();
        assert_eq!(dimensions.len(), 2);
        assert_eq!(dimensions[0].dimension_keys(), vec!["Service", "dim"]);
        assert_eq!(dimensions[1].dimension_value("Service"), Some("override"));
    }

    #[test]
    fn explicit_empty_dimensions_serialize_as_empty_array() {
        let mut context = MetricsContext::with_default_dimensions(dims(&[("Service", "svc")]));
        context.set_dimensions([]);
        context.put_metric("Count", 1.0, None);

        assert!(context.dimensions().is_empty());
        let event = context.serialize().unwrap();
        assert!(event.contains(r#""Dimensions":[]"#), "{event}");
        assert!(!event.contains("Service"), "{event}");
    }

    #[test]
    fn reset_dimensions_with_and_without_defaults() {
        let defaults = dims(&[("LogGroup", "group"), ("ServiceName", "svc"), ("ServiceType", "type")]);

        let mut context = MetricsContext::with_default_dimensions(defaults.clone());
        context.put_dimensions(dims(&[("foo", "bar")])).unwrap();
        context.reset_dimensions(true);
        context.put_dimensions(dims(&[("dim", "value")])).unwrap();
        let dimensions = context.dimensions();
        assert_eq!(dimensions.len(), 1);
        assert_eq!(dimensions[0].len(), defaults.len() + 1);
        assert_eq!(dimensions[0].dimension_value("foo"), None);

        let mut context = MetricsContext::with_default_dimensions(defaults);
        context.put_dimensions(dims(&[("foo", "bar")])).unwrap();
        context.reset_dimensions(false);
        context.put_dimensions(dims(&[("dim", "value")])).unwrap();
        let dimensions = context.dimensions();
        assert_eq!(dimensions.len(), 1);
        assert_eq!(dimensions[0].dimension_keys(), vec!["dim"]);
    }

    #[test]
    fn rejected_mutations_leave_context_unchanged() {
        let defaults = DimensionSet::of((0..20).map(|i| (format!("default{i}"), "v"))).unwrap();
        let mut context = MetricsContext::with_default_dimensions(defaults);
        context.put_dimensions(dims(&[("kept", "1")])).unwrap();

        let too_many = DimensionSet::of((0..11).map(|i| (format!("extra{i}"), "v"))).unwrap();
        assert_eq!(
            context.put_dimensions(too_many.clone()),
            Err(DimensionSetError::Exceeded { count: 32 })
        );
        assert_eq!(
            context.set_dimensions_with_default(true, [dims(&[("x", "y")]), too_many.clone()]),
            Err(DimensionSetError::Exceeded { count: 31 })
        );

        let dimensions = context.dimensions();
        assert_eq!(dimensions.len(), 1);
        assert_eq!(dimensions[0].len(), 21);
        assert_eq!(dimensions[0].dimension_value("x"), None);

        // Without defaults the same set fits
        context.set_dimensions([]);
        context.put_dimensions(too_many).unwrap();
        assert_eq!(context.dimensions()[0].len(), 11);
    }

    #[test]
    fn set_default_dimensions_checks_active_sets() {
        let mut context = MetricsContext::new();
        context
            .put_dimensions(DimensionSet::of((0..29).map(|i| (format!("dim{i}"), "v"))).unwrap())
            .unwrap();

        assert_eq!(
            context.set_default_dimensions(dims(&[("a", "1"), ("b", "2")])),
            Err(DimensionSetError::Exceeded { count: 31 })
        );
        assert!(context.default_dimensions().is_empty());

        context.set_default_dimensions(dims(&[("a", "1")])).unwrap();
        assert_eq!(context.dimensions()[0].len(), 30);
    }

    #[test]
    fn put_metric_accumulates_samples() {
        let mut context = MetricsContext::new();
        context.put_metric("Latency", 10.0, Some(metrics::Unit::Seconds));
        context.put_metric("Latency", 20.0, Some(metrics::Unit::Milliseconds));
        context.put_metric("Latency", 30.0, None);

        let latency = context.metric("Latency").unwrap();
        assert_eq!(latency.values(), &[10.0, 20.0, 30.0]);
        assert_eq!(latency.unit(), Some(&metrics::Unit::Milliseconds));
    }

    #[test]
    fn put_metric_drops_samples_past_the_limit() {
        let mut context = MetricsContext::new();
        for i in 0..MAX_VALUES_PER_METRIC + 5 {
            context.put_metric("Count", i as f64, None);
        }
        assert_eq!(context.metric("Count").unwrap().values().len(), MAX_VALUES_PER_METRIC);
    }

    #[test]
    fn dropped_samples_leave_unit_untouched() {
        let mut context = MetricsContext::new();
        for _ in 0..MAX_VALUES_PER_METRIC {
            context.put_metric("Latency", 1.0, Some(metrics::Unit::Milliseconds));
        }
        context.put_metric("Latency", 1.0, Some(metrics::Unit::Seconds));
        context.put_metric("Ratio", f64::NAN, Some(metrics::Unit::Percent));

        assert_eq!(context.metric("Latency").unwrap().unit(), Some(&metrics::Unit::Milliseconds));
        assert_eq!(context.metric("Ratio"), None);
    }

    #[test]
    fn reset_dimensions_tracks_later_default_changes() {
        let mut context = MetricsContext::with_default_dimensions(dims(&[("Stage", "beta"), ("Old", "1")]));
        context.put_dimensions(dims(&[("foo", "bar")])).unwrap();
        context.reset_dimensions(true);
        context.set_default_dimensions(dims(&[("Stage", "prod")])).unwrap();

        assert_eq!(context.dimensions(), vec![dims(&[("Stage", "prod")])]);
    }

    #[test]
    fn serialize_writes_each_name_once() {
        let mut context = MetricsContext::with_default_dimensions(dims(&[("ServiceName", "svc")]));
        context.set_timestamp(UNIX_EPOCH);
        context.put_property("ServiceName", "property");
        context.put_property("Players", "property");
        context.put_metric("ServiceName", 1.0, None);
        context.put_metric("Players", 8.0, None);

        assert_eq!(
            context.serialize().unwrap(),
            r#"{"_aws":{"Timestamp":0,"CloudWatchMetrics":[{"Namespace":"aws-embedded-metrics","Dimensions":[["ServiceName"]],"Metrics":[{"Name":"Players"}]}]},"ServiceName":"svc","Players":8.0}"#
        );
    }

    #[test]
    fn serialize_writes_embedded_metric_format() {
        let mut context = MetricsContext::with_default_dimensions(dims(&[("ServiceName", "svc")]));
        context.set_namespace("GameServerMetrics");
        context.set_timestamp(UNIX_EPOCH + Duration::from_millis(1687394207903));
        context.put_dimensions(dims(&[("Port", "7779")])).unwrap();
        context.put_property("RequestId", "ABC123");
        context.put_metric("FrameTime", 10.0, Some(metrics::Unit::Milliseconds));
        context.put_metric("FrameTime", 12.0, None);
        context.put_metric("Players", 8.0, None);

        assert_eq!(
            context.serialize().unwrap(),
            r#"{"_aws":{"Timestamp":1687394207903,"CloudWatchMetrics":[{"Namespace":"GameServerMetrics","Dimensions":[["ServiceName","Port"]],"Metrics":[{"Name":"FrameTime","Unit":"Milliseconds"},{"Name":"Players"}]}]},"Port":"7779","ServiceName":"svc","RequestId":"ABC123","FrameTime":[10.0,12.0],"Players":8.0}"#
        );
    }

    #[test]
    fn unset_timestamp_is_taken_at_serialization() {
        let before = epoch_millis(SystemTime::now());
        let context = MetricsContext::new();
        assert_eq!(context.timestamp(), None);

        let written = parse(&context)["_aws"]["Timestamp"].as_u64().unwrap();
        assert!(written >= before);
        assert_eq!(parse(&context)["_aws"]["CloudWatchMetrics"][0]["Namespace"], DEFAULT_NAMESPACE);
    }

    #[test]
    fn reset_after_flush_clears_cycle_state() {
        let mut context = MetricsContext::with_default_dimensions(dims(&[("ServiceName", "svc")]));
        context.set_namespace("Namespace");
        context.put_dimensions(dims(&[("Name", "Test")])).unwrap();
        context.put_property("RequestId", "ABC123");
        context.put_metric("Count", 1.0, None);
        context.pin_timestamp();

        context.reset_after_flush(true);
        assert_eq!(context.metric_names().count(), 0);
        assert_eq!(context.property("RequestId"), None);
        assert_eq!(context.timestamp(), None);
        assert_eq!(context.namespace(), "Namespace");
        assert_eq!(context.dimensions()[0].dimension_value("Name"), Some("Test"));

        context.reset_after_flush(false);
        assert_eq!(context.dimensions(), vec![dims(&[("ServiceName", "svc")])]);
    }
}
