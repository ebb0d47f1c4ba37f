//! In-process coordination ensemble
//!
//! Holds the node tree behind a single lock and enforces the usual
//! hierarchical rules: parents must exist, ephemeral nodes cannot have
//! children, non-empty nodes cannot be deleted. Ephemeral nodes are owned by
//! the session that created them and vanish when that session ends.

use crate::common::path::{self, ROOT};
use crate::common::{timestamp_now_millis, Error, Result};
use crate::ensemble::{CoordinationClient, CreateMode};
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SessionId = u64;

#[derive(Debug, Clone)]
struct Node {
    data: Option<Bytes>,
    owner: Option<SessionId>,
    version: u64,
    created_at: u64,
    modified_at: u64,
}

impl Node {
    fn new(data: Option<Bytes>, owner: Option<SessionId>) -> Self {
        let now = timestamp_now_millis();
        Self {
            data,
            owner,
            version: 0,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Node metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStat {
    pub version: u64,
    pub ephemeral_owner: Option<SessionId>,
    pub num_children: usize,
    pub created_at: u64,
    pub modified_at: u64,
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    sessions: HashSet<SessionId>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), Node::new(None, None));
        Self {
            nodes,
            sessions: HashSet::new(),
        }
    }

    fn child_prefix(path: &str) -> String {
        if path == ROOT {
            ROOT.to_string()
        } else {
            format!("{}/", path)
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = Self::child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = Self::child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix) && key.len() > prefix.len())
    }

    fn get(&self, path: &str) -> Result<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }
}

struct Inner {
    tree: RwLock<Tree>,
    next_session: AtomicU64,
    available: AtomicBool,
}

/// Shared in-process ensemble; clones see the same tree
#[derive(Clone)]
pub struct MemEnsemble {
    inner: Arc<Inner>,
}

impl Default for MemEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemEnsemble {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(Tree::new()),
                next_session: AtomicU64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Open a new session
    pub async fn connect(&self) -> Result<MemSession> {
        let id = self.open_session().await?;
        Ok(MemSession {
            ensemble: self.clone(),
            id,
        })
    }

    pub async fn open_session(&self) -> Result<SessionId> {
        self.check_available()?;
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        self.inner.tree.write().await.sessions.insert(id);
        tracing::debug!(session = id, "Session opened");
        Ok(id)
    }

    /// End a session and drop the ephemeral nodes it owns
    pub async fn close_session(&self, session: SessionId) -> Result<()> {
        let mut tree = self.inner.tree.write().await;
        if !tree.sessions.remove(&session) {
            return Ok(());
        }
        let owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &owned {
            tree.nodes.remove(key);
        }
        tracing::debug!(session, removed = owned.len(), "Session closed");
        Ok(())
    }

    /// Simulate session expiry on the ensemble side
    pub async fn expire_session(&self, session: SessionId) {
        // close_session never fails
        let _ = self.close_session(session).await;
        tracing::info!(session, "Session expired");
    }

    /// Toggle reachability; while unavailable every operation fails with `ConnectionError`
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::ConnectionError("ensemble unreachable".into()))
        }
    }

    fn check_session(tree: &Tree, session: SessionId) -> Result<()> {
        if tree.sessions.contains(&session) {
            Ok(())
        } else {
            Err(Error::ConnectionError(format!("session {} expired", session)))
        }
    }

    pub async fn create(
        &self,
        session: SessionId,
        node_path: &str,
        mode: CreateMode,
        data: Option<Bytes>,
    ) -> Result<String> {
        self.check_available()?;
        path::validate_path(node_path)?;
        let mut tree = self.inner.tree.write().await;
        Self::check_session(&tree, session)?;

        if tree.nodes.contains_key(node_path) {
            return Err(Error::AlreadyExists(node_path.to_string()));
        }
        let parent = path::parent(node_path)
            .ok_or_else(|| Error::AlreadyExists(node_path.to_string()))?;
        let parent_node = tree.get(parent)?;
        if parent_node.owner.is_some() {
            return Err(Error::InvalidPath(format!(
                "ephemeral node {} cannot have children",
                parent
            )));
        }

        let owner = mode.is_ephemeral().then_some(session);
        tree.nodes
            .insert(node_path.to_string(), Node::new(data, owner));
        Ok(node_path.to_string())
    }

    pub async fn delete(&self, session: SessionId, node_path: &str) -> Result<()> {
        self.check_available()?;
        path::validate_path(node_path)?;
        if node_path == ROOT {
            return Err(Error::InvalidPath("cannot delete the root".into()));
        }
        let mut tree = self.inner.tree.write().await;
        Self::check_session(&tree, session)?;
        tree.get(node_path)?;
        if tree.has_children(node_path) {
            return Err(Error::NotEmpty(node_path.to_string()));
        }
        tree.nodes.remove(node_path);
        Ok(())
    }

    pub async fn read(&self, session: SessionId, node_path: &str) -> Result<Option<Bytes>> {
        self.check_available()?;
        let tree = self.inner.tree.read().await;
        Self::check_session(&tree, session)?;
        Ok(tree.get(node_path)?.data.clone())
    }

    pub async fn write(
        &self,
        session: SessionId,
        node_path: &str,
        data: Option<Bytes>,
    ) -> Result<()> {
        self.check_available()?;
        let mut tree = self.inner.tree.write().await;
        Self::check_session(&tree, session)?;
        let node = tree
            .nodes
            .get_mut(node_path)
            .ok_or_else(|| Error::PathNotFound(node_path.to_string()))?;
        node.data = data;
        node.version += 1;
        node.modified_at = timestamp_now_millis();
        Ok(())
    }

    pub async fn list_children(&self, session: SessionId, node_path: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let tree = self.inner.tree.read().await;
        Self::check_session(&tree, session)?;
        tree.get(node_path)?;
        Ok(tree.children(node_path))
    }

    pub async fn exists(&self, session: SessionId, node_path: &str) -> Result<bool> {
        self.check_available()?;
        let tree = self.inner.tree.read().await;
        Self::check_session(&tree, session)?;
        Ok(tree.nodes.contains_key(node_path))
    }

    /// Node metadata, bypassing sessions (inspection only)
    pub async fn stat(&self, node_path: &str) -> Option<NodeStat> {
        let tree = self.inner.tree.read().await;
        tree.nodes.get(node_path).map(|node| NodeStat {
            version: node.version,
            ephemeral_owner: node.owner,
            num_children: tree.children(node_path).len(),
            created_at: node.created_at,
            modified_at: node.modified_at,
        })
    }

    /// Number of nodes, root included
    pub async fn node_count(&self) -> usize {
        self.inner.tree.read().await.nodes.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.tree.read().await.sessions.len()
    }
}

/// A session on a [`MemEnsemble`]
#[derive(Clone)]
pub struct MemSession {
    ensemble: MemEnsemble,
    id: SessionId,
}

impl MemSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn ensemble(&self) -> &MemEnsemble {
        &self.ensemble
    }
}

impl CoordinationClient for MemSession {
    async fn create(&self, path: &str, mode: CreateMode, data: Option<Bytes>) -> Result<String> {
        self.ensemble.create(self.id, path, mode, data).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.ensemble.delete(self.id, path).await
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        self.ensemble.read(self.id, path).await
    }

    async fn write(&self, path: &str, data: Option<Bytes>) -> Result<()> {
        self.ensemble.write(self.id, path, data).await
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        self.ensemble.list_children(self.id, path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.ensemble.exists(self.id, path).await
    }

    async fn close(&self) -> Result<()> {
        self.ensemble.close_session(self.id).await
    }
}
