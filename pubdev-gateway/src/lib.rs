//! HTTP and websocket front end for the pubdev endpoint host.
//!
//! Serves every workspace under `/pub-dev/{workspace}/...`: pages, static
//! assets and API modules over HTTP, gateway modules over websocket upgrades
//! on the same paths, and script edits under `/pub-dev/workspace/...`.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod routes;
pub mod socket;
