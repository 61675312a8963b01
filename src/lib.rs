//! # brandkb
//!
//! A brand knowledge base: documents are chunked and embedded into SQLite,
//! retrieved by similarity within an owner/visibility scope, and used to
//! ground chat answers. A token-gated capability gateway exposes the same
//! knowledge to MCP clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Files / URL │──▶│ Chunk+Embed  │──▶│   SQLite   │
//! │  (ingest)   │   │ (core kb)    │   │ chunks+FTS │
//! └─────────────┘   └──────────────┘   └─────┬──────┘
//!                                            │
//!                  ┌─────────────────────────┤
//!                  ▼                         ▼
//!            ┌───────────┐            ┌──────────────┐
//!            │ CLI (bkb) │            │ MCP gateway  │
//!            │ search/ask│            │ token + rate │
//!            └───────────┘            └──────────────┘
//! ```
//!
//! The storage-independent pieces (chunking, ranking, answer composition,
//! token hashing) live in `brandkb-core`; this crate supplies SQLite, HTTP
//! providers, and the server.
//!
//! ## Quick Start
//!
//! ```bash
//! bkb init
//! bkb ingest ./brand-docs
//! bkb search "founding story"
//! bkb ask "What do we sell?"
//! bkb token issue --name site-widget --type public --permission read_kb
//! bkb serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`], [`migrate`] | Connection pool and schema |
//! | [`sqlite_store`] | Chunk and token persistence |
//! | [`embedding`], [`chat`] | Provider adapters |
//! | [`research`] | URL fetch and page extraction |
//! | [`ingest`] | File and directory ingestion |
//! | [`capabilities`], [`gateway`] | Token-scoped capability dispatch |
//! | [`rate_limit`] | Per-token and per-IP hourly budgets |
//! | [`server`], [`mcp`] | HTTP routes and MCP bridge |

pub mod app;
pub mod capabilities;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod entries;
pub mod gateway;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod mcp;
pub mod migrate;
pub mod progress;
pub mod rate_limit;
pub mod research;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod token_cmd;
