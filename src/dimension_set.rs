//! # DimensionSet
//!
//! One combination of dimension name/value pairs emitted alongside metrics

use metrics::SharedString;
use thiserror::Error;

/// The Embedded Metric Format supports a maximum of 30 dimensions per dimension set
pub const MAX_DIMENSION_SET_SIZE: usize = 30;

/// Errors raised synchronously while building or merging dimension sets
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DimensionSetError {
    /// The mutation would leave a dimension combination with too many keys
    #[error("dimension set would hold {count} dimensions, the maximum is {MAX_DIMENSION_SET_SIZE}")]
    Exceeded {
        /// Number of distinct keys the rejected combination would have held
        count: usize,
    },

    /// A flat name/value list did not have an even number of items
    #[error("dimension names and values must come in pairs, got {len} items")]
    OddArguments {
        /// Length of the rejected list
        len: usize,
    },
}

/// Ordered, size bounded collection of dimension name/value pairs
///
/// Names are unique within a set, insertion order is kept so the emitted `Dimensions`
/// array lists keys in the order they were declared.
///
/// # Example
/// ```
/// use cloudwatch_emf_logger::DimensionSet;
///
/// let defaults = DimensionSet::of([("Service", "Checkout"), ("Stage", "beta")]).unwrap();
/// let explicit = DimensionSet::of([("Stage", "prod")]).unwrap();
/// let merged = defaults.merge(&explicit).unwrap();
///
/// assert_eq!(merged.dimension_keys(), vec!["Service", "Stage"]);
/// assert_eq!(merged.dimension_value("Stage"), Some("prod"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DimensionSet {
    dimensions: Vec<(SharedString, SharedString)>,
}

impl DimensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from (name, value) pairs, a repeated name keeps its last value
    pub fn of<I, K, V>(pairs: I) -> Result<Self, DimensionSetError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<SharedString>,
        V: Into<SharedString>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.add_dimension(name, value)?;
        }
        Ok(set)
    }

    /// Builds a set from an alternating name, value, name, value... list
    pub fn from_flat<T>(items: &[T]) -> Result<Self, DimensionSetError>
    where
        T: Into<SharedString> + Clone,
    {
        if items.len() % 2 != 0 {
            return Err(DimensionSetError::OddArguments { len: items.len() });
        }
        Self::of(items.chunks_exact(2).map(|pair| (pair[0].clone(), pair[1].clone())))
    }

    /// Adds or replaces a dimension, rejecting the insert if the set is already full
    pub fn add_dimension(
        &mut self,
        name: impl Into<SharedString>,
        value: impl Into<SharedString>,
    ) -> Result<&mut Self, DimensionSetError> {
        let name = name.into();
        let value = value.into();

        if let Some(existing) = self.dimensions.iter_mut().find(|(key, _)| *key == name) {
            existing.1 = value;
            return Ok(self);
        }

        if self.dimensions.len() >= MAX_DIMENSION_SET_SIZE {
            return Err(DimensionSetError::Exceeded {
                count: self.dimensions.len() + 1,
            });
        }

        self.dimensions.push((name, value));
        Ok(self)
    }

    /// Key-wise union with `self` as the base and `other` overlaid on top
    ///
    /// Keys of `self` keep their position, keys only present in `other` are appended.
    pub fn merge(&self, other: &DimensionSet) -> Result<DimensionSet, DimensionSetError> {
        let count = self.union_len(other);
        if count > MAX_DIMENSION_SET_SIZE {
            return Err(DimensionSetError::Exceeded { count });
        }
        Ok(self.overlay(other))
    }

    /// Same as [DimensionSet::merge] without the size check, callers must have validated the union
    pub(crate) fn overlay(&self, other: &DimensionSet) -> DimensionSet {
        let mut merged = self.clone();
        for (name, value) in &other.dimensions {
            match merged.dimensions.iter_mut().find(|(key, _)| key == name) {
                Some(existing) => existing.1 = value.clone(),
                None => merged.dimensions.push((name.clone(), value.clone())),
            }
        }
        merged
    }

    /// Number of distinct keys in the union of both sets
    pub(crate) fn union_len(&self, other: &DimensionSet) -> usize {
        self.dimensions.len() + other.dimensions.iter().filter(|(name, _)| !self.contains(name)).count()
    }

    pub fn dimension_value(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(key, _)| &**key == name)
            .map(|(_, value)| &**value)
    }

    /// Dimension names in insertion order
    pub fn dimension_keys(&self) -> Vec<&str> {
        self.dimensions.iter().map(|(key, _)| &**key).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dimensions.iter().any(|(key, _)| &**key == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dimensions.iter().map(|(key, value)| (&**key, &**value))
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}
