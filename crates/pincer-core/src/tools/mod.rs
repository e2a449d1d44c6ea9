//! The `ToolExecutor` capability and the output-truncation
//! helpers shared by the Inline Tool Runner and Action Executor.

pub mod executor;
pub mod truncation;

pub use executor::{
    EchoToolExecutor, OutputChunk, RegistryToolExecutor, ToolExecutionOutcome, ToolExecutor,
    ToolExecutorError, ToolStreamKind,
};
