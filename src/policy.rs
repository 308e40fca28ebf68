//! Attribute transfer policy.

use serde_json::Value;

use crate::{attribute::AttributeType, backend::BackendKind, dataset::is_structural_attribute};

/// Spatial attributes reordered by default when axis conventions differ.
pub const DEFAULT_SPATIAL_ATTRIBUTE_KEYS: [&str; 2] = ["resolution", "offset"];

/// Decides whether each attribute is copied verbatim, skipped or transformed.
///
/// Structural dataset attributes are skipped, since they are conveyed by the dataset itself.
/// Spatial attributes are per-axis numeric vectors in physical axis order.
/// They are reversed if the source and destination disagree on axis order.
#[derive(Debug, Clone)]
pub struct AttributeTransferPolicy {
    spatial_keys: Vec<String>,
    reverse_axes: bool,
}

impl AttributeTransferPolicy {
    /// Create a policy for migrating from `source_kind` to `destination_kind`.
    #[must_use]
    pub fn new(
        spatial_keys: Vec<String>,
        source_kind: BackendKind,
        destination_kind: BackendKind,
    ) -> Self {
        Self {
            spatial_keys,
            reverse_axes: source_kind.axis_orders_differ(destination_kind),
        }
    }

    /// Returns true if spatial attributes are reversed.
    #[must_use]
    pub fn reverses_axes(&self) -> bool {
        self.reverse_axes
    }

    #[must_use]
    pub fn spatial_keys(&self) -> &[String] {
        &self.spatial_keys
    }

    /// Returns true if `key` should not be copied.
    #[must_use]
    pub fn skips(&self, key: &str, is_dataset: bool) -> bool {
        is_dataset && is_structural_attribute(key)
    }

    /// Transform the value of `key`.
    #[must_use]
    pub fn transform(&self, key: &str, attribute_type: AttributeType, value: Value) -> Value {
        match value {
            Value::Array(mut items)
                if self.reverse_axes
                    && attribute_type.is_numeric_array()
                    && self.spatial_keys.iter().any(|spatial_key| spatial_key == key) =>
            {
                items.reverse();
                Value::Array(items)
            }
            value => value,
        }
    }
}
