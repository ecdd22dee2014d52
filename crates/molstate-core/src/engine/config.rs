use crate::core::models::ids::Ref;
use thiserror::Error;

const DEFAULT_MAX_CONCURRENT_TRANSFORMS: usize = 16;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// How the error text of a descendant of a failed node is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InheritedErrors {
    /// `"inherited from <origin>: <message>"`
    #[default]
    Annotate,
    /// The original failure message, unchanged.
    Verbatim,
}

impl InheritedErrors {
    pub fn format(&self, origin: Ref, message: &str) -> String {
        match self {
            InheritedErrors::Annotate => format!("inherited from {}: {}", origin, message),
            InheritedErrors::Verbatim => message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on transformer computations in flight within one transaction.
    pub max_concurrent_transforms: usize,
    pub inherited_errors: InheritedErrors,
    /// Dispose the previous object's resource when a recomputation replaces it.
    /// When off, replaced objects are retained and disposed with their node.
    pub dispose_on_replace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transforms: DEFAULT_MAX_CONCURRENT_TRANSFORMS,
            inherited_errors: InheritedErrors::default(),
            dispose_on_replace: true,
        }
    }
}

#[derive(Default)]
pub struct EngineConfigBuilder {
    max_concurrent_transforms: Option<usize>,
    inherited_errors: Option<InheritedErrors>,
    dispose_on_replace: Option<bool>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_transforms(mut self, limit: usize) -> Self {
        self.max_concurrent_transforms = Some(limit);
        self
    }
    pub fn inherited_errors(mut self, mode: InheritedErrors) -> Self {
        self.inherited_errors = Some(mode);
        self
    }
    pub fn dispose_on_replace(mut self, enabled: bool) -> Self {
        self.dispose_on_replace = Some(enabled);
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let defaults = EngineConfig::default();
        let max_concurrent_transforms = self
            .max_concurrent_transforms
            .unwrap_or(defaults.max_concurrent_transforms);
        if max_concurrent_transforms == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_concurrent_transforms",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(EngineConfig {
            max_concurrent_transforms,
            inherited_errors: self.inherited_errors.unwrap_or(defaults.inherited_errors),
            dispose_on_replace: self
                .dispose_on_replace
                .unwrap_or(defaults.dispose_on_replace),
        })
    }
}
