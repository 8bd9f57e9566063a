//! # schemadoc
//!
//! Data dictionary generation and grounded schema chat for relational
//! databases.
//!
//! A generation run extracts a connection's schema, measures per-table data
//! quality, asks a generative provider to describe each table, and stores the
//! combined [`Dictionary`](schemadoc_core::models::Dictionary). The grounding
//! engine then answers questions about a stored dictionary using only facts
//! from it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────────┐   ┌──────────┐
//! │  Sources   │──▶│           Pipeline           │──▶│  SQLite   │
//! │ PG/MySQL/  │   │ extract → analyze → describe │   │  store    │
//! │  SQLite/   │   │        → assemble            │   └────┬─────┘
//! │ SQL Server │   └──────────────────────────────┘        │
//! └────────────┘                                            │
//!                                       ┌──────────────────┤
//!                                       ▼                  ▼
//!                                 ┌──────────┐       ┌──────────┐
//!                                 │   CLI    │       │   HTTP   │
//!                                 │ (chat)   │       │  (axum)  │
//!                                 └──────────┘       └──────────┘
//! ```
//!
//! Pure logic (data model, scoring, assembly, grounding context, exports)
//! lives in the `schemadoc-core` crate; this crate does the I/O.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`source`] | Source adapters (PostgreSQL, MySQL, SQLite, SQL Server) |
//! | [`extract`] | Schema extraction |
//! | [`analyze`] | Quality sampling and scoring |
//! | [`llm`] | Generative provider clients with retry |
//! | [`describe`] | Table description generation |
//! | [`pipeline`] | Run orchestration, in-flight guard, cancellation |
//! | [`chat`] | Grounding engine |
//! | [`sqlite_store`] | SQLite dictionary store |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command bodies |

pub mod analyze;
pub mod cancel;
pub mod chat;
pub mod commands;
pub mod config;
pub mod db;
pub mod describe;
pub mod error;
pub mod extract;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod services;
pub mod source;
pub mod sqlite_store;
