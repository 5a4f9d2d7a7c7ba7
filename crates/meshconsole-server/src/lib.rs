//! `MeshConsole` HTTP server.
//!
//! Wires the Headscale client, the encrypted key store and the key lifecycle
//! into an Axum application: server-rendered admin pages, a JSON passthrough
//! API at `/api/*`, login gating, and a background key renewal worker.

pub mod auth;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod hs_config;
pub mod render;
pub mod routes;
pub mod scheduler;
pub mod state;
