//! Claim verification via model-prior sampling and web-evidence fusion.
//!
//! This crate is a thin root package: it wires the library crates
//! (`heretix-cli`, `heretix-pipeline`, `heretix-config`, ...) into the two
//! process entry points, the CLI (`heretix-cli::run_cli`) and the HTTP
//! server (`http::router`). All the actual logic lives in the workspace's
//! library crates.

pub mod http;
