//! Binding errors

use rquickjs::{Ctx, Exception};

/// Result alias used across the crate
pub type Result<T, E = BindError> = std::result::Result<T, E>;

/// Error raised while registering, converting or calling across the boundary
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("JavaScript engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("Not enough arguments for function: expected {expected}, got {actual}")]
    NotEnoughArguments { expected: usize, actual: usize },

    #[error("Value type `{0}` is already registered")]
    AlreadyRegistered(&'static str),

    #[error("Value type `{0}` is not registered")]
    NotRegistered(&'static str),

    #[error("Value type `{0}` has no fields")]
    EmptyValueType(String),

    #[error("Binding `{0}` is already defined")]
    DuplicateBinding(String),

    #[error("Binding provider `{0}` is already registered")]
    DuplicateProvider(String),

    #[error("Expected an object, found {0}")]
    NotAnObject(&'static str),

    #[error("Expected a function, found {0}")]
    NotAFunction(&'static str),

    #[error("Expected a constructor, found {0}")]
    NotAConstructor(&'static str),

    #[error("Persistent handle is empty")]
    EmptyHandle,

    #[error("Write of {len} bytes at offset {offset} exceeds buffer of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("Buffer was detached")]
    DetachedBuffer,

    #[error("Context is not entered")]
    ContextNotEntered,

    #[error("Script error: {0}")]
    Script(String),
}

impl BindError {
    /// Turn this error into a pending JavaScript exception.
    ///
    /// Engine errors already carry (or are) the pending exception and pass
    /// through untouched; everything else becomes a `TypeError`.
    pub(crate) fn throw(self, ctx: &Ctx<'_>) -> rquickjs::Error {
        match self {
            BindError::Engine(err) => err,
            other => Exception::throw_type(ctx, &other.to_string()),
        }
    }
}
