//! todo-mcp - markdown todo tool server
//!
//! Serves a fixed set of tools over a stdio tool-call protocol. Todos are
//! markdown files with YAML front-matter and named sections, stored under
//! `<working dir>/.claude/`.
//!
//! # Architecture
//!
//! - [`paths`] - working-directory layout
//! - [`todo`] - data model, file codec, store, hierarchy
//! - [`index`] - search backend trait and the file-backed index
//! - [`stats`] - completion statistics
//! - [`templates`] - built-in and file templates
//! - [`manager`] - per-working-directory manager sets and their cache
//! - [`server`] - parameter parsing, dispatch, formatting, transport
//! - [`config`] - configuration loading and validation
//! - [`error`] - error taxonomy
//! - [`testing`] - mock search backends
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use todo_mcp::{FileIndexFactory, ManagerFactory, ServerConfig, TodoServer};
//!
//! let config = ServerConfig::new(".");
//! let factory = ManagerFactory::new(&config, Arc::new(FileIndexFactory)).await?;
//! let server = TodoServer::new(factory, &config);
//! let outcome = server
//!     .call_tool("todo_create", &serde_json::json!({"task": "Write docs"}), server.context())
//!     .await;
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod manager;
pub mod paths;
pub mod server;
pub mod stats;
pub mod templates;
pub mod testing;
pub mod todo;

// Re-export commonly used types
pub use error::{ErrorKind, IntoTodoError, Result, TodoError};

pub use config::{FactoryConfig, ServerConfig};
pub use index::{FileIndex, FileIndexFactory, IndexerFactory, SearchFilters, SearchResult, TodoIndexer};
pub use manager::{ManagerFactory, ManagerSet, RequestContext};
pub use paths::WorkingPaths;
pub use server::{TodoServer, Tool, ToolOutcome};
pub use stats::{StatsEngine, StatsPeriod, TodoStats};
pub use templates::{Template, TemplateManager};
pub use todo::{Todo, TodoStatus, TodoStore};
