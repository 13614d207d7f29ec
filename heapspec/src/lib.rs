//! heapspec
//!
//! Heap-aware function contracts checked by a remote symbolic-execution engine.
//!
//! A contract names fresh symbolic inputs, allocates symbolic memory, declares
//! the call under test, and asserts what memory and the return value look like
//! afterwards. A [`Session`] ships it to the verification server and returns
//! the verdict.

pub mod config;
pub mod contract;
pub mod error;
pub mod heap;
pub mod protocol;
pub mod result;
pub mod session;
pub mod types;
pub mod value;

pub use config::ConnectOptions;
pub use contract::{Argument, Contract, ContractBuilder, Return, Specification};
pub use error::{ContractError, Error, ProtocolError, Result};
pub use heap::{Allocation, Locator};
pub use protocol::transport::CancelHandle;
pub use protocol::ModuleHandle;
pub use result::VerificationResult;
pub use session::{connect, disconnect, verify, Session};
pub use types::TypeDescriptor;
pub use value::SymbolicValue;
