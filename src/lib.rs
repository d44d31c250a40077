//! # Retrieval Harness
//!
//! A hybrid retrieval backend for AI agents. Documents are parsed, chunked,
//! embedded, and indexed into two independent indexes — dense vector
//! similarity and BM25 full-text — whose results are fused into one
//! relevance ranking at query time. The corpus is exposed to agents through
//! an MCP tool server.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────────┐   ┌────────────────┐
//! │  Source    │──▶│ Ingestion Pipeline │──▶│ Vector Store   │
//! │ (files)    │   │ parse→chunk→embed  │   │ Lexical Index  │
//! └────────────┘   └─────────┬─────────┘   └───────┬────────┘
//!                            │                     │
//!                   ┌────────▼────────┐    ┌───────▼────────┐
//!                   │ Embedding API   │    │  Query Service │
//!                   │ (HTTP, gated)   │◀───│  + Fusion      │
//!                   └─────────────────┘    └───────┬────────┘
//!                                          ┌───────▼────────┐
//!                                          │  CLI  /  MCP   │
//!                                          └────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Failure taxonomy |
//! | [`models`] | Core data types |
//! | [`parse`] | HTML/Markdown/plain document parsing |
//! | [`chunker`] | Boundary-aware text chunking |
//! | [`embedding`] | Embedding client, retries, admission gate |
//! | [`store`] | Vector store, lexical index, document catalog |
//! | [`fusion`] | Rank fusion strategies |
//! | [`ingest`] | Ingestion pipeline and rollback |
//! | [`query`] | Query service |
//! | [`sources`] | Filesystem document source |
//! | [`server`] | MCP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod query;
pub mod server;
pub mod sources;
pub mod store;
