//! Tool-call surface.
//!
//! - [`params`] - typed parameter records with validation and coercion
//! - [`dispatcher`] - [`TodoServer`], one handler per tool
//! - [`format`] - text and JSON rendering of results
//! - [`tools`] - tool names and input schemas
//! - [`transport`] - stdio JSON-RPC loop

pub mod dispatcher;
pub mod format;
pub mod params;
pub mod tools;
pub mod transport;

pub use dispatcher::{TodoServer, ToolOutcome};
pub use tools::{tool_specs, Tool};
pub use transport::serve;
