//! # coordkit
//!
//! Client-side coordination on top of a hierarchical, ZooKeeper-style
//! ensemble:
//! - A single-consumer actor that serializes node operations and resolves
//!   namespaces before dispatch
//! - Weighted service discovery with per-instance refresh tasks
//! - An in-process ensemble plus an HTTP server and client for it
//!
//! ## Architecture
//!
//! ```text
//!  ServiceDiscovery ──┐       WeightRefresher (1 task / instance)
//!                     ▼              │
//!              InstanceRegistry ◄────┘
//!                     │
//!                     ▼
//!            CoordinatorHandle ──mpsc──► CoordinationActor
//!                                              │
//!                                              ▼
//!                               CoordinationClient (session)
//!                                  │                 │
//!                             MemSession       RemoteEnsemble ──HTTP──► EnsembleServer
//! ```
//!
//! ## Usage
//!
//! ### Start an ensemble
//! ```bash
//! coordkit-ensemble serve --bind 127.0.0.1:2181
//! ```
//!
//! ### Use the CLI
//! ```bash
//! coordkit create /app/config --data '{"mode":"on"}'
//! coordkit ls /app --data
//! coordkit register api 8080 --id api-1 --refresh-weight 10
//! coordkit query api
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;
pub mod discovery;
pub mod ensemble;

// Re-export commonly used types
pub use common::{Config, Error, Namespaces, Result};
pub use coordinator::{ChildNode, CoordinationActor, CoordinatorHandle, Pending};
pub use discovery::{Registration, ServiceDiscovery, ServiceInstance};
pub use ensemble::{CoordinationClient, CreateMode, EnsembleServer, MemEnsemble, RemoteEnsemble};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
