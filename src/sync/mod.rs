mod wait_condition;

// Re-export from wait_condition.rs
pub use wait_condition::WaitCondition;
