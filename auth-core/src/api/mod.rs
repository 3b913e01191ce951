pub mod types;

pub use types::{AuthResult, OperationResult, SecurityStatusResponse, TransactionRequest};
