// src/lib.rs

//! OpenSPM Package Manager
//!
//! Tracks remote repositories, merges their package lists into a local
//! index, resolves dependencies with tag-based compatibility filtering and
//! installs packages with optional post-install hooks.
//!
//! # Architecture
//!
//! - Single-file store: all state lives in one gzip'd tar archive
//! - Registry -> Index -> Resolver -> Installer, each taking its context
//!   (store, fetcher, config) by reference
//! - YAML documents on the wire and at rest

pub mod config;
mod error;
pub mod fetch;
pub mod install;
pub mod repository;
pub mod resolver;
pub mod store;
pub mod tags;

pub use error::{Error, Result};
