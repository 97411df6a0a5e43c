//! Errors raised when a grammar cannot be built or trained.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrammarError {
  /// A training tree node has an arity the grammar cannot express. Happens
  /// when trees were not binarized before being handed over.
  #[error("illegal tree (unbinarized?): {label} has {arity} children")]
  MalformedTree { label: String, arity: usize },

  /// Trainer or parser settings that can never work.
  #[error("invalid configuration: {message}")]
  InvalidConfig { message: String },

  /// A symbol that the current grammar generation has no refinements for.
  #[error("no refinements recorded for state {symbol}")]
  MissingState { symbol: String },
}

impl GrammarError {
  pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
    Self::InvalidConfig {
      message: message.into(),
    }
  }
}
