//! Tool backend protocol (C1), registry (C2), and invoker (C3).
//!
//! A backend is a child process speaking the line-delimited JSON protocol
//! in [`protocol`] over its stdio. [`registry::ToolRegistry`] owns the
//! fleet of backends, their catalog, and restart supervision.
//! [`invoker::invoke_batch`] runs one assistant turn's worth of tool calls
//! concurrently against it.

pub mod error;
pub mod invoker;
pub mod protocol;
pub mod registry;
pub mod session;

pub use error::{ToolHostError, ToolHostResult};
pub use invoker::{invoke_batch, ToolInvocation, ToolInvocationResult};
pub use protocol::ToolSpecWire;
pub use registry::{ToolCatalogEntry, ToolRegistry};
pub use session::BackendDescriptor;
