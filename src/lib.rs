//! # Balanced RAG
//!
//! Retrieval-augmented generation over a small set of counselling datasets
//! whose sizes differ by orders of magnitude. Retrieval is source-balanced:
//! every source gets a quota inversely proportional to its size, so a few
//! hundred passages from a rare dataset are not drowned out by thousands
//! from a large one.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐
//! │  Datasets   │──▶│ Normalize+Valid. │──▶│  SQLite   │
//! │  CSV/JSON   │   │  Embed (batched) │   │ passages  │
//! └─────────────┘   └──────────────────┘   └────┬─────┘
//!                                               │
//!                         ┌─────────────────────┤
//!                         ▼                     ▼
//!                    ┌──────────┐         ┌──────────┐
//!                    │   CLI    │         │   HTTP   │
//!                    │  (brag)  │         │ query/ask│
//!                    └──────────┘         └──────────┘
//! ```
//!
//! The runtime-agnostic pieces (validator, normalizers, quota allocation,
//! the retriever, the ingestion driver) live in `balanced-rag-core`; this
//! crate supplies storage, gateways, dataset readers, the CLI, and the
//! server.
//!
//! ## Quick Start
//!
//! ```bash
//! brag init                       # create database
//! brag ingest --dry-run           # show what would be embedded
//! brag ingest                     # embed and store up to the cap
//! brag query "trouble sleeping" --k 5
//! brag serve                      # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`embedding`] | Embedding gateways |
//! | [`completion`] | Chat completion gateways |
//! | [`datasets`] | CSV / JSON dataset readers |
//! | [`ingest`] | `brag ingest` |
//! | [`search`] | Balanced query |
//! | [`ask`] | Grounded answers |
//! | [`stats`] | `brag stats` |
//! | [`server`] | HTTP server |

pub mod ask;
pub mod completion;
pub mod config;
pub mod datasets;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
