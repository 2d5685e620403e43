//! Core engine of the morfx MCP server: configuration, error taxonomy, the
//! provider contract, the safety manager (locking, integrity, atomic writes,
//! transaction log), the staging manager and the transform finalize
//! pipeline. Everything protocol-facing lives in `morfx-mcp-server`.

pub mod config;
pub mod digest;
pub mod error;
pub mod finalize;
pub mod provider;
pub mod safety;
pub mod staging;

pub use config::Config;
pub use config::ConfigOverrides;
pub use error::MorfxErr;
pub use error::Result;
