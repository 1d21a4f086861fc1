//! Core graph data model.
//!
//! This module contains the types every pipeline is made of:
//! - Typed stage handles and adapter source descriptors
//! - Stage specifications and validated stages
//! - External data bundles and the per-mode bundle catalog

pub mod bundle;
mod handle;
mod mode;
mod source;
mod stage;

pub use bundle::{BundleCatalog, DataBundles};
pub(crate) use handle::next_arena_token;
pub use handle::StageId;
pub use mode::Mode;
pub use source::{Adapter, Source};
pub use stage::{Stage, StageSpec};
