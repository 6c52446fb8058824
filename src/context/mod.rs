mod entry;
mod metrics;
mod operation;
mod snapshot;
pub(crate) mod stack;

pub use entry::TraceEntry;
pub use operation::{OperationContext, OperationTimer, Status};
pub(crate) use operation::ContextInner;
pub use snapshot::{
    CumulativeSnapshot, EntrySnapshot, MetricsSnapshot, OperationSnapshot, TimerEntrySnapshot,
};
pub use stack::set_test_frame_capture;
