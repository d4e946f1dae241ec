//! Error types for the loop directive engine

use thiserror::Error;

/// Source location inside a loop-head or binding expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Main error type for the engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoopError {
    #[error("SyntaxError: {message} at {location}")]
    SyntaxError {
        message: String,
        location: SourceLocation,
    },

    #[error("TypeError: {message}")]
    TypeError { message: String },

    #[error("ReferenceError: {name} is not defined")]
    ReferenceError { name: String },

    /// `bind()` received something that is not a dense, index-addressable sequence
    #[error("ConfigurationError: Only arrays in bind() call are supported, got {found}")]
    NotIndexable { found: String },

    /// `bind()` was called twice before the loop body was entered
    #[error("ConfigurationError: Multiple bind() calls in for-of loop are not supported")]
    MultipleBind,

    /// `bind()` was called with a collection other than the captured one
    #[error("ConfigurationError: Rebinding a for-of loop to a different collection is not supported")]
    Rebind,

    #[error("ConfigurationError: element has no '{attribute}' attribute")]
    MissingAttribute { attribute: String },

    #[error("ConfigurationError: no element interpreter named '{name}'")]
    UnknownInterpreter { name: String },

    #[error("DocumentError: {message}")]
    Document { message: String },

    /// Failure reported by a per-element evaluator
    #[error("ElementError: {message}")]
    Element { message: String },

    /// The directive was torn down while work was still pending
    #[error("Directive was torn down")]
    Detached,

    /// Internal marker for voluntary `pause()` (not a real error).
    /// Routed to the completion path, never to the error channel.
    #[error("Paused")]
    Paused,
}

impl LoopError {
    pub fn syntax_error(message: impl Into<String>, line: u32, column: u32) -> Self {
        LoopError::SyntaxError {
            message: message.into(),
            location: SourceLocation { line, column },
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        LoopError::TypeError {
            message: message.into(),
        }
    }

    pub fn reference_error(name: impl Into<String>) -> Self {
        LoopError::ReferenceError { name: name.into() }
    }

    pub fn element(message: impl Into<String>) -> Self {
        LoopError::Element {
            message: message.into(),
        }
    }

    pub fn document(message: impl Into<String>) -> Self {
        LoopError::Document {
            message: message.into(),
        }
    }

    /// Configuration errors abort the current run of a directive but keep
    /// its queued operations
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LoopError::NotIndexable { .. }
                | LoopError::MultipleBind
                | LoopError::Rebind
                | LoopError::MissingAttribute { .. }
                | LoopError::UnknownInterpreter { .. }
        )
    }

    /// True for the pause marker, which completes a run instead of failing it
    pub fn is_pause(&self) -> bool {
        matches!(self, LoopError::Paused)
    }
}
