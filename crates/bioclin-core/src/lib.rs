//! Session management and HTTP dispatch for exposing the Bioclin API as
//! callable tools.

pub mod api;
pub mod auth;
pub mod config;
pub mod tools;

pub use config::Config;
pub use tools::{ToolCallEnvelope, ToolDispatcher};
