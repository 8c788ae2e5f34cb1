//! Core types and the ingestion engine for patchnote.
//!
//! This crate decides whether an observed changelog entry is a genuinely new
//! update for a tracked product. It is free of HTTP and database
//! dependencies: storage is reached through [`store::UpdateStore`], and the
//! changelog fetch and summarization calls through [`source::ChangelogSource`]
//! and [`summary::Summarizer`].
//!
//! Data flow: [`batch::BatchCoordinator`] selects products, runs
//! [`pipeline::IngestionPipeline`] for each, and the
//! [`fingerprint::Fingerprinter`] plus the store's ledger gate every write.

// Native `async fn` in traits; the trait signatures spell out `Send` bounds.
#![allow(async_fn_in_trait)]

pub mod batch;
pub mod candidate;
pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod product;
pub mod record;
pub mod source;
pub mod store;
pub mod summary;

pub use error::{Error, Result};
