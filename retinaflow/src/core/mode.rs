//! Pipeline compilation mode.

use crate::errors::GraphError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a pipeline is compiled for training or for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Fit trainable stages; the model stage is terminal.
    Train,
    /// Produce predictions; the postprocessing chain is attached.
    Inference,
}

impl Mode {
    /// Returns the registry key for this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Inference => "inference",
        }
    }

    /// Returns true for [`Mode::Train`].
    #[must_use]
    pub const fn is_train(self) -> bool {
        matches!(self, Self::Train)
    }

    /// Maps a `train_mode` flag to a mode.
    #[must_use]
    pub const fn from_train_flag(train_mode: bool) -> Self {
        if train_mode {
            Self::Train
        } else {
            Self::Inference
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "inference" => Ok(Self::Inference),
            other => Err(GraphError::InvalidMode(other.to_string())),
        }
    }
}
