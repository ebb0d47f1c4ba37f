//! Coordination ensemble adapters
//!
//! The actor talks to the ensemble only through [`CoordinationClient`].
//! Paths passed to a client are absolute and already namespace-resolved.
//!
//! - [`MemEnsemble`]: in-process ensemble with ZooKeeper-style semantics
//! - [`RemoteEnsemble`]: HTTP client for a `coordkit-ensemble` server
//! - [`server`]: the HTTP front end serving a [`MemEnsemble`]

pub mod http;
pub mod memory;
pub mod remote;
pub mod server;

use crate::common::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;

pub use memory::{MemEnsemble, MemSession};
pub use remote::RemoteEnsemble;
pub use server::EnsembleServer;

/// Node lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateMode {
    /// Lives until explicitly deleted
    Persistent,
    /// Removed when the creating session ends
    Ephemeral,
}

impl CreateMode {
    pub fn from_ephemeral(ephemeral: bool) -> Self {
        if ephemeral {
            CreateMode::Ephemeral
        } else {
            CreateMode::Persistent
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral)
    }
}

/// Session-scoped primitives offered by a coordination ensemble.
///
/// Implementations own their retry policy; failures are reported, not hidden.
pub trait CoordinationClient: Send + Sync + 'static {
    /// Create a node; the parent must already exist
    fn create(
        &self,
        path: &str,
        mode: CreateMode,
        data: Option<Bytes>,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Delete a childless node
    fn delete(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Read a node's payload; `None` when the node carries no data
    fn read(&self, path: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Overwrite a node's payload
    fn write(&self, path: &str, data: Option<Bytes>) -> impl Future<Output = Result<()>> + Send;

    /// Child names in lexicographic order
    fn list_children(&self, path: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn exists(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;

    /// End the session; its ephemeral nodes disappear
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}
