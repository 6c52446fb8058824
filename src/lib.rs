//! optrace is a library for structured context propagation across async operation call chains.

pub mod context;
pub mod sync;
pub mod types;

pub mod prelude {
    //! Convenient re-exports of commonly used types
    pub use crate::context::{
        set_test_frame_capture,
        OperationContext,
        OperationSnapshot,
        OperationTimer,
        Status,
        TraceEntry,
    };
    pub use crate::sync::WaitCondition;
    pub use crate::types::{
        ErrorKind,
        OperationError,
        Result,
    };
}

// Re-export main types
pub use prelude::*;
