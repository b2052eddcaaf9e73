//! # Docstream
//!
//! A queue-driven document ingestion and semantic retrieval pipeline.
//!
//! Documents are imported, stored as raw objects, and pushed through an
//! at-least-once processing queue that extracts text, chunks it, embeds
//! the chunks, and upserts them into a namespace-scoped vector index.
//! Retrieval embeds a query and returns the top-k chunks above a score
//! threshold from the caller's namespace.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌────────────┐   ┌───────────────────────────┐
//! │ Import   │──▶│   Queue    │──▶│        Processor          │
//! │ validate │   │ delay +    │   │ download ▸ extract ▸ chunk │
//! │ + store  │   │ redeliver  │   │ ▸ embed ▸ upsert          │
//! └────┬────┘   └────────────┘   └─────────┬─────────────────┘
//!      │                                   │
//!      ▼                                   ▼
//! ┌─────────┐                      ┌──────────────┐
//! │ SQLite   │◀────── status ──────│ Vector index  │
//! │ records  │                     │ (namespaced)  │
//! └─────────┘                      └──────┬───────┘
//!                                         │
//!                                         ▼
//!                                  ┌──────────────┐
//!                                  │  Retrieval    │
//!                                  │  top-k query  │
//!                                  └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dsctl init                          # create database
//! dsctl import notes.txt --owner u1   # import and enqueue a document
//! dsctl status <doc-id> --owner u1    # check processing state
//! dsctl query "deployment" --owner u1 # retrieve relevant chunks
//! dsctl worker                        # run the processing workers
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the status state machine |
//! | [`chunk`] | Boundary-aware text chunking |
//! | [`extract`] | Text extraction (txt, md, pdf, docx) |
//! | [`embedding`] | Embedding client abstraction |
//! | [`object_store`] | Raw file byte storage |
//! | [`queue`] | At-least-once processing queue |
//! | [`index`] | Namespace-scoped vector index |
//! | [`store`] | SQLite document record store |
//! | [`process`] | Processing state machine and workers |
//! | [`retrieve`] | Top-k semantic retrieval |
//! | [`import`] | Import validation and enqueueing |
//! | [`idempotency`] | Client-retry deduplication |
//! | [`ratelimit`] | Per-owner token buckets |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod idempotency;
pub mod import;
pub mod index;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod process;
pub mod queue;
pub mod ratelimit;
pub mod retrieve;
pub mod store;
