use thiserror::Error;

use super::config::ConfigError;
use super::registry::RegistryError;
use crate::core::models::ids::{Ref, TransformerId};
use crate::core::models::params::ParamError;
use crate::core::tree::TreeError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Transformer '{0}' is not registered")]
    UnknownTransformer(TransformerId),

    #[error("Invalid parameters for transformer '{transformer}': {source}")]
    InvalidParams {
        transformer: TransformerId,
        #[source]
        source: ParamError,
    },

    #[error("Registry error: {source}")]
    Registry {
        #[from]
        source: RegistryError,
    },

    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Transform of {node_ref} failed: {reason}")]
    TransformFailed { node_ref: Ref, reason: String },

    #[error("Computation of {0} was superseded before it committed")]
    Cancelled(Ref),
}

impl EngineError {
    /// Whether the error rejected a transaction before it touched any state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Tree(_)
                | EngineError::UnknownTransformer(_)
                | EngineError::InvalidParams { .. }
        )
    }

    /// The ref a per-node failure is about.
    pub fn node_ref(&self) -> Option<Ref> {
        match self {
            EngineError::TransformFailed { node_ref, .. } | EngineError::Cancelled(node_ref) => {
                Some(*node_ref)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_node_failures_carry_their_ref() {
        let r = Ref::new();
        let failed = EngineError::TransformFailed {
            node_ref: r,
            reason: "divide by zero".into(),
        };
        assert_eq!(failed.node_ref(), Some(r));
        assert_eq!(
            failed.to_string(),
            format!("Transform of {} failed: divide by zero", r)
        );
        assert!(!failed.is_validation());

        assert_eq!(EngineError::Cancelled(r).node_ref(), Some(r));
        assert_eq!(
            EngineError::UnknownTransformer(TransformerId::from("x")).node_ref(),
            None
        );
    }
}
