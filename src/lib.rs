//! Signpost aggregates service discovery backends into one routing
//! configuration.
//!
//! Each enabled provider watches one backend (a file, a REST endpoint,
//! the Consul catalog, a Redis key tree, a `DynamoDB` table) and turns what
//! it sees into a [`Configuration`](types::Configuration) of backends and
//! frontends. Providers publish complete snapshots on a bounded channel;
//! the watcher keeps the latest one per provider and serves the merged
//! view over HTTP.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate, health).
//! - [`config`] -- Static configuration loading and validation.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`provider`] -- The provider contract, the aggregator, the shared
//!   poll/watch harness, the template engine and every adapter.
//! - [`watcher`] -- Per-provider dedup, throttling and snapshot publishing.
//! - [`api`] / [`health`] -- Read-only HTTP views and the REST provider's
//!   write endpoint.
//! - [`server`] -- Axum server setup, shared state and graceful shutdown.
//! - [`safe`] -- Panic-isolated task spawning and the task pool.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `toml` | TOML config file support _(enabled by default)_ |
//! | `yaml` | YAML config file support |
//! | `json` | JSON config file support (always available) |
//! | `redis` | Redis key-value provider |
//! | `dynamodb` | AWS `DynamoDB` provider |
//! | `file-backends` | All file format backends |
//! | `kv-backends` | All key-value and database providers |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod http_client;
pub mod logging;
pub mod provider;
pub mod safe;
pub mod server;
pub mod types;
pub mod watcher;
