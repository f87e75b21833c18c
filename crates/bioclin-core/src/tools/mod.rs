//! Tool-call boundary.
//!
//! Every Bioclin operation is a named tool taking a JSON object of arguments.
//! Most tools forward to one REST endpoint as described by the static table in
//! [`registry`]; a handful (login, logout, session checks) run locally.

pub mod dispatcher;
pub mod envelope;
pub mod registry;

pub use dispatcher::ToolDispatcher;
pub use envelope::{ErrorKind, ToolCallEnvelope, ToolError};
pub use registry::{ToolSpec, TOOLS};
