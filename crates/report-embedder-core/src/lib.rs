//! # Report Embedder Core
//!
//! Storage-agnostic logic for Report Embedder: block models, the context
//! policy that folds preceding text into table embeddings, the lookback
//! cache, store and vectorizer traits, the batch materializer, and the
//! rate-limited batch runner.
//!
//! This crate contains no sqlx, filesystem I/O, or network clients. The
//! only runtime dependency is tokio's timer, used for inter-batch pauses.

pub mod context;
pub mod embedding;
pub mod error;
pub mod lookback;
pub mod materializer;
pub mod models;
pub mod runner;
pub mod stats;
pub mod store;
