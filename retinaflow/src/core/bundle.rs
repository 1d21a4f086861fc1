//! External data bundles and the per-mode bundle catalog.

use super::Mode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bundle holding image annotations and the label vocabulary source.
pub const METADATA: &str = "metadata";
/// Bundle holding image ids and sizes.
pub const INPUT: &str = "input";
/// Bundle holding validation image ids. Training only.
pub const VALIDATION_INPUT: &str = "validation_input";
/// Bundle holding the ids to predict on. Inference only.
pub const SPECS: &str = "specs";

/// Raw fields supplied to a run from outside the graph, grouped by bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBundles {
    bundles: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl DataBundles {
    /// Creates an empty set of bundles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or extends) a bundle with one field.
    #[must_use]
    pub fn with_field(
        mut self,
        bundle: impl Into<String>,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.insert(bundle, field, value);
        self
    }

    /// Inserts one field into a bundle, creating the bundle if needed.
    pub fn insert(
        &mut self,
        bundle: impl Into<String>,
        field: impl Into<String>,
        value: serde_json::Value,
    ) {
        self.bundles
            .entry(bundle.into())
            .or_default()
            .insert(field.into(), value);
    }

    /// Returns true if the bundle was supplied.
    #[must_use]
    pub fn has_bundle(&self, bundle: &str) -> bool {
        self.bundles.contains_key(bundle)
    }

    /// Returns one field of one bundle.
    #[must_use]
    pub fn field(&self, bundle: &str, field: &str) -> Option<&serde_json::Value> {
        self.bundles.get(bundle).and_then(|b| b.get(field))
    }

    /// Returns the names of the supplied bundles.
    pub fn bundle_names(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }
}

/// Which bundles and fields a mode supplies.
///
/// Used by the graph builder to reject adapters that read data the mode
/// will never provide, before any stage runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleCatalog {
    mode: Mode,
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl BundleCatalog {
    /// Creates an empty catalog for `mode`.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            fields: BTreeMap::new(),
        }
    }

    /// Declares a bundle and its fields.
    #[must_use]
    pub fn with_bundle<I, S>(mut self, bundle: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .entry(bundle.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// The bundles supplied to the detection pipeline in `mode`.
    #[must_use]
    pub fn for_mode(mode: Mode) -> Self {
        let catalog = Self::new(mode)
            .with_bundle(METADATA, ["annotations", "annotations_human_labels"])
            .with_bundle(INPUT, ["img_ids", "image_ids", "image_size"]);

        match mode {
            Mode::Train => catalog.with_bundle(VALIDATION_INPUT, ["valid_img_ids"]),
            Mode::Inference => catalog.with_bundle(SPECS, ["img_ids"]),
        }
    }

    /// Returns the mode this catalog describes.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns true if the bundle is supplied in this mode.
    #[must_use]
    pub fn has_bundle(&self, bundle: &str) -> bool {
        self.fields.contains_key(bundle)
    }

    /// Returns true if the bundle carries the field.
    #[must_use]
    pub fn has_field(&self, bundle: &str, field: &str) -> bool {
        self.fields
            .get(bundle)
            .is_some_and(|fields| fields.contains(field))
    }
}
