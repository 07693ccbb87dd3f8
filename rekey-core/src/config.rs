//! Configuration types

use crate::keyhash::KeyDimensions;
use serde::{Deserialize, Serialize};

/// How a publish cascade publishes an invalidated cache-key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishMode {
    /// Publish only the record itself.
    Single,
    /// Publish the record and everything it owns.
    Recursive,
}

/// Master configuration struct.
///
/// This is the value a declarative-config loader would populate; loading
/// itself is out of scope for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RekeyConfig {
    /// How publish cascades publish cache-key records.
    pub publish_mode: PublishMode,
    /// Extra dimensions appended to every generated key hash.
    pub key_dimensions: KeyDimensions,
}

impl RekeyConfig {
    /// Standard configuration: single-record publish, no extra dimensions.
    pub fn standard() -> Self {
        Self {
            publish_mode: PublishMode::Single,
            key_dimensions: KeyDimensions::new(),
        }
    }

    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    pub fn with_dimension(mut self, dim: impl Into<String>) -> Self {
        self.key_dimensions.push(dim);
        self
    }
}

impl Default for RekeyConfig {
    fn default() -> Self {
        Self::standard()
    }
}
