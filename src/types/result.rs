use super::error::OperationError;

pub type Result<T> = std::result::Result<T, OperationError>;
