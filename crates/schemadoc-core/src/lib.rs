//! # schemadoc core
//!
//! Runtime-free logic for schemadoc: the schema and dictionary data model,
//! type normalization, quality scoring, dictionary assembly, grounding
//! context construction, follow-up suggestions, reference validation,
//! export transforms and the dictionary store abstraction.
//!
//! This crate contains no tokio, sqlx, network or filesystem I/O. Everything
//! that talks to a source database or a generative provider lives in the
//! `schemadoc` application crate and feeds plain values into this one.

pub mod assemble;
pub mod context;
pub mod export;
pub mod models;
pub mod quality;
pub mod store;
pub mod suggest;
pub mod types;
pub mod validate;
