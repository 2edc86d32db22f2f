//! # docsync core
//!
//! Runtime-agnostic building blocks for the docsync pipeline: the data
//! model that flows from a document repository into a vector index, the
//! overlapping text chunker, the provider traits the orchestrator is
//! written against, and in-memory implementations of those providers.
//!
//! This crate has no tokio, HTTP, or filesystem dependencies. Concrete
//! network-backed providers (Microsoft Graph, Pinecone, OpenAI, ...) live
//! in the `docsync` application crate.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | File records, chunks, vector records, cursors, run stats |
//! | [`chunk`] | Overlapping fixed-size chunker and deterministic vector ids |
//! | [`error`] | [`ProviderError`] taxonomy shared by every provider |
//! | [`source`] | [`DocumentStore`](source::DocumentStore) trait + in-memory store |
//! | [`embedding`] | [`Embedder`](embedding::Embedder) trait + vector helpers |
//! | [`index`] | [`VectorIndex`](index::VectorIndex) trait + in-memory index |
//! | [`extract`] | [`TextExtractor`](extract::TextExtractor) trait + plain-text extractor |

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod source;

pub use error::ProviderError;
