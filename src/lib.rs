// src/lib.rs

//! Hubsync
//!
//! Keeps a local store of content type packages in step with a remote
//! content type hub. A sync run fetches the hub catalog, filters it by
//! restriction policy and platform compatibility, and upgrades eligible
//! packages one at a time through an install transaction.
//!
//! # Architecture
//!
//! - `hub`: catalog client and archive fetcher (blocking HTTP)
//! - `compat`: pure eligibility checks for catalog entries
//! - `privilege`: scoped capability elevation for an explicit principal
//! - `install`: fetch, stage, validate, commit, clean up, verify, record
//! - `sync`: drives one install transaction per eligible entry
//! - `store` / `db`: the package store contract and its SQLite-backed implementation
//! - `config`: settings persisted in the database, loaded into `SyncConfig`

pub mod compat;
pub mod config;
pub mod db;
mod error;
pub mod hub;
pub mod install;
pub mod privilege;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
