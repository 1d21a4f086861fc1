//! Adapter source descriptors.

use super::StageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a transformer input gets its value from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    /// A raw field of an external data bundle.
    External {
        /// The bundle name, e.g. `input`.
        bundle: String,
        /// The field inside the bundle.
        field: String,
    },
    /// A field of an upstream stage's output.
    StageOutput {
        /// The producing stage.
        stage: StageId,
        /// The output field.
        field: String,
    },
    /// The input is deliberately not supplied.
    Absent,
}

impl Source {
    /// Reads `field` from external bundle `bundle`.
    #[must_use]
    pub fn external(bundle: impl Into<String>, field: impl Into<String>) -> Self {
        Self::External {
            bundle: bundle.into(),
            field: field.into(),
        }
    }

    /// Reads `field` from the output of `stage`.
    #[must_use]
    pub fn stage(stage: StageId, field: impl Into<String>) -> Self {
        Self::StageOutput {
            stage,
            field: field.into(),
        }
    }

    /// Returns true for [`Source::Absent`].
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns the bundle name for external sources.
    #[must_use]
    pub fn bundle(&self) -> Option<&str> {
        match self {
            Self::External { bundle, .. } => Some(bundle),
            _ => None,
        }
    }

    /// Returns the producing stage for stage-output sources.
    #[must_use]
    pub const fn upstream(&self) -> Option<StageId> {
        match self {
            Self::StageOutput { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Mapping from transformer input names to their sources.
///
/// Entries are kept sorted by input name so that two adapters built from
/// the same entries compare and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adapter {
    entries: BTreeMap<String, Source>,
}

impl Adapter {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `input` to `source`, replacing any previous mapping.
    #[must_use]
    pub fn map(mut self, input: impl Into<String>, source: Source) -> Self {
        self.entries.insert(input.into(), source);
        self
    }

    /// Maps `input` to [`Source::Absent`].
    #[must_use]
    pub fn absent(self, input: impl Into<String>) -> Self {
        self.map(input, Source::Absent)
    }

    /// Returns the source for `input`.
    #[must_use]
    pub fn get(&self, input: &str) -> Option<&Source> {
        self.entries.get(input)
    }

    /// Iterates over `(input, source)` pairs in input-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Source)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of mapped inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no input is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if any entry reads from `bundle`.
    #[must_use]
    pub fn references_bundle(&self, bundle: &str) -> bool {
        self.entries.values().any(|s| s.bundle() == Some(bundle))
    }
}

impl<K: Into<String>> FromIterator<(K, Source)> for Adapter {
    fn from_iter<I: IntoIterator<Item = (K, Source)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_map_and_lookup() {
        let stage = StageId::new(7, 0);
        let adapter = Adapter::new()
            .map("ids", Source::external("input", "img_ids"))
            .map("annotations", Source::stage(stage, "annotations"))
            .absent("valid_ids");

        assert_eq!(adapter.len(), 3);
        assert_eq!(adapter.get("ids").and_then(Source::bundle), Some("input"));
        assert_eq!(adapter.get("annotations").and_then(Source::upstream), Some(stage));
        assert!(adapter.get("valid_ids").is_some_and(Source::is_absent));
        assert!(adapter.references_bundle("input"));
        assert!(!adapter.references_bundle("validation_input"));
    }

    #[test]
    fn test_adapter_order_independent_equality() {
        let a = Adapter::new()
            .map("b", Source::Absent)
            .map("a", Source::external("x", "y"));
        let b: Adapter = [("a", Source::external("x", "y")), ("b", Source::Absent)]
            .into_iter()
            .collect();

        assert_eq!(a, b);
        let names: Vec<_> = a.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_source_serializes_tagged() {
        let json = serde_json::to_value(Source::external("metadata", "annotations")).unwrap();
        assert_eq!(json["kind"], "external");
        assert_eq!(json["bundle"], "metadata");

        let json = serde_json::to_value(Source::Absent).unwrap();
        assert_eq!(json["kind"], "absent");
    }
}
