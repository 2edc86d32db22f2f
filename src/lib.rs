//! # docsync
//!
//! Keeps a vector index in step with a SharePoint document library.
//!
//! docsync lists the files under a configured folder, extracts their text,
//! splits it into overlapping chunks, embeds the chunks, and upserts them
//! into a vector index. A persisted change-feed cursor lets later runs
//! process only what changed, and a background scheduler keeps the index
//! current without supervision.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │ SharePoint │──▶│ Orchestrator             │──▶│ Vector index │
//! │ (Graph)    │   │ extract▸chunk▸embed      │   │ Pinecone/SQL │
//! └────────────┘   └──────────┬───────────────┘   └──────────────┘
//!                             │ cursor + manifest
//!                  ┌──────────┴──────────┐
//!                  ▼                     ▼
//!            ┌──────────┐          ┌───────────┐
//!            │   CLI    │          │ HTTP +    │
//!            │(docsync) │          │ scheduler │
//!            └──────────┘          └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsync list                  # check the source configuration
//! docsync sync full             # index everything, capture a cursor
//! docsync sync incremental      # apply changes since the cursor
//! docsync search "security clearance requirements"
//! docsync serve                 # control surface + scheduler
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`graph`] | Microsoft Graph document store |
//! | [`extract`] | PDF / Office / plain-text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`index`] | Pinecone and SQLite vector indexes |
//! | [`retry`] | Uniform retry policy for provider calls |
//! | [`cursor`] | Durable change-feed cursor |
//! | [`manifest`] | Per-file vector ownership for deletions |
//! | [`sync`] | Full and incremental sync runs |
//! | [`service`] | Single-flight run guard and status |
//! | [`scheduler`] | Background sync loop |
//! | [`server`] | HTTP control surface |
//! | [`search`] | Query the index |

pub mod app;
pub mod commands;
pub mod config;
pub mod cursor;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod graph;
pub mod http;
pub mod index;
pub mod manifest;
pub mod retry;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod service;
pub mod state;
pub mod sync;

pub use error::{PersistenceError, SyncError};
