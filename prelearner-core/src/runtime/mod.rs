//! Execution context shared by the dataset engine and transform units

pub mod context;
pub mod shutdown;

pub use context::{WorkerContext, LOCAL_NODE};
pub use shutdown::ShutdownSignal;
