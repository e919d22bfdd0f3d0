//! # Report Embedder
//!
//! Context-aware embedding materialization for structured report content.
//!
//! Reports arrive as ordered sequences of text and table blocks. Tables
//! alone embed poorly: units, reference dates and subjects usually sit in
//! the paragraph right above them. Report Embedder walks every block that
//! still lacks a vector, folds the preceding same-section paragraph into
//! each table's embedding input, vectorizes in batches, and writes each
//! batch atomically.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌───────────┐
//! │ rembed ingest│──▶│  SQLite              │◀──│ rembed    │
//! │ (JSON files) │   │  reports             │   │ embed     │
//! └──────────────┘   │  content_blocks      │   └─────┬─────┘
//!                    └──────────────────────┘         │
//!                                          ┌──────────▼─────────┐
//!                                          │ BatchMaterializer  │
//!                                          │ ContextPolicy      │
//!                                          │ LookbackCache      │
//!                                          │ Vectorizer         │
//!                                          └────────────────────┘
//! ```
//!
//! The pipeline itself lives in `report-embedder-core`; this crate adds
//! configuration, SQLite persistence, the concrete vectorizers and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `MaterialStore` |
//! | [`embedding`] | Vectorizer backends |
//! | [`embed_cmd`] | `rembed embed` |
//! | [`ingest`] | `rembed ingest` |
//! | [`stats`] | `rembed stats` |
//! | [`progress`] | Progress reporting on stderr |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod sqlite_store;
pub mod stats;
