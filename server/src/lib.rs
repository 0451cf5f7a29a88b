//! Codescout server library: live code indexes for registered
//! projects, served over HTTP and the MCP tool protocol.

pub mod api;
pub mod auth;
pub mod chunker;
pub mod config;
pub mod dag;
pub mod error;
pub mod filter;
pub mod graph;
pub mod indexer;
pub mod lineage;
pub mod mcp;
pub mod mcp_http;
pub mod store;
pub mod supervisor;
pub mod symbols;
pub mod types;
pub mod watch;

pub use error::{Error, Result};
