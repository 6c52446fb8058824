use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::context::{ContextInner, OperationContext};

/// Classifies how an [`OperationError`] came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A mutating call was made against an operation that is not running,
    /// or violated another part of the operation protocol.
    Protocol,
    /// The operation exceeded its configured maximum time.
    Timeout,
    /// A background process registered on the operation failed.
    Background,
    /// Created explicitly through [`OperationContext::create_error`].
    Explicit,
}

#[derive(Debug)]
struct ErrorInner {
    message: String,
    kind: ErrorKind,
    failed_at: DateTime<Utc>,
    operation: Weak<ContextInner>,
}

/// An error bound to the operation it occurred in.
///
/// Errors are cheap to clone and compare by identity, so the error cached
/// when a timeout fires is the same object every later checkpoint surfaces.
/// The owning operation stays reachable through [`operation`](Self::operation)
/// for rendering the full trace at failure time.
#[derive(Debug, Clone, Error)]
#[error("{}", .inner.message)]
pub struct OperationError {
    inner: Arc<ErrorInner>,
}

impl OperationError {
    pub(crate) fn new(
        message: String,
        kind: ErrorKind,
        operation: Weak<ContextInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ErrorInner {
                message,
                kind,
                failed_at: Utc::now(),
                operation,
            }),
        }
    }

    /// Human-readable description of the failure.
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    /// When this error was created.
    pub fn failed_at(&self) -> DateTime<Utc> {
        self.inner.failed_at
    }

    /// The operation this error belongs to, if it is still alive.
    pub fn operation(&self) -> Option<OperationContext> {
        self.inner.operation.upgrade().map(OperationContext::from_inner)
    }
}

impl PartialEq for OperationError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for OperationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let err = OperationError::new("boom".to_string(), ErrorKind::Explicit, Weak::new());
        let clone = err.clone();

        assert_eq!(err, clone);
        assert_eq!(clone.message(), "boom");
        assert_eq!(clone.kind(), ErrorKind::Explicit);
    }

    #[test]
    fn distinct_errors_are_not_equal() {
        let a = OperationError::new("a".to_string(), ErrorKind::Protocol, Weak::new());
        let b = OperationError::new("a".to_string(), ErrorKind::Protocol, Weak::new());

        assert_ne!(a, b);
    }

    #[test]
    fn display_is_the_message() {
        let err = OperationError::new(
            "operation timed out after 100ms".to_string(),
            ErrorKind::Timeout,
            Weak::new(),
        );

        assert_eq!(err.to_string(), "operation timed out after 100ms");
    }

    #[test]
    fn detached_error_has_no_operation() {
        let err = OperationError::new("gone".to_string(), ErrorKind::Explicit, Weak::new());
        assert!(err.operation().is_none());
    }
}
