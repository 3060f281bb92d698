// Tracer Configuration

use serde::{Deserialize, Serialize};

/// How skipping an observation affects observations created beneath it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPropagation {
    /// Descendants of a skipped observation are skipped as well
    #[default]
    Cascade,
    /// Only the skipped observation is dropped; descendants keep their
    /// parent id and are exported as orphans
    Isolated,
}

/// Configuration shared by every trace a tracer starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerConfig {
    pub skip_propagation: SkipPropagation,

    /// Default environment for traces that do not set one
    pub environment: Option<String>,

    /// Default release tag for traces that do not set one
    pub release: Option<String>,

    /// Default version for traces that do not set one
    pub version: Option<String>,
}

impl TracerConfig {
    pub fn with_skip_propagation(mut self, policy: SkipPropagation) -> Self {
        self.skip_propagation = policy;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}
