//! Core library for `MeshConsole`.
//!
//! Owns the encrypted upstream API key ([`credential`]), keeps it valid
//! ([`lifecycle`]), and partitions route snapshots for display
//! ([`classify`]). This crate talks to upstream only through the
//! `meshconsole_client::Headscale` trait and to disk only through
//! `meshconsole_storage::BlobStore`.

pub mod classify;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod lifecycle;
