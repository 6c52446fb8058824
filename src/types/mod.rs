mod error;
mod result;

// Re-export from error.rs
pub use error::{ErrorKind, OperationError};

// Re-export from result.rs
pub use result::Result;
