//! Coordination request actor
//!
//! A single task owns the ensemble session and drains an unbounded queue of
//! [`Request`]s, one at a time, in arrival order. Callers never block: every
//! submission returns a [`Pending`] that resolves when the actor replies.

use crate::common::path::{self, Namespaces};
use crate::common::{Error, Result};
use crate::coordinator::messages::{ChildNode, Pending, Reply, Request};
use crate::ensemble::{CoordinationClient, CreateMode};
use bytes::Bytes;
use std::ops::ControlFlow;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub struct CoordinationActor<C: CoordinationClient> {
    client: C,
    namespaces: Namespaces,
    rx: mpsc::UnboundedReceiver<Request>,
}

impl<C: CoordinationClient> CoordinationActor<C> {
    /// Start the actor on the current runtime
    pub fn spawn(client: C, namespaces: Namespaces) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Self {
            client,
            namespaces,
            rx,
        };
        let handle = tokio::spawn(actor.run());
        (CoordinatorHandle { tx }, handle)
    }

    async fn run(mut self) {
        tracing::debug!("Coordination actor started");
        while let Some(request) = self.rx.recv().await {
            if self.dispatch(request).await.is_break() {
                tracing::info!("Coordination actor closed");
                return;
            }
        }

        // Every handle dropped
        if let Err(e) = self.client.close().await {
            tracing::warn!(error = %e, "Failed to close ensemble session");
        }
        tracing::debug!("Coordination actor stopped");
    }

    /// Serve one request; breaks once the session has been closed
    async fn dispatch(&self, request: Request) -> ControlFlow<()> {
        let op = request.name();
        match request {
            Request::CreateNode {
                path,
                ephemeral,
                data,
                namespace,
                reply,
            } => {
                let res = self
                    .create_node(&path, ephemeral, data, namespace.as_deref())
                    .await;
                respond(op, &path, reply, res);
            }
            Request::DeleteNode {
                path,
                namespace,
                reply,
            } => {
                let res = self.delete_node(&path, namespace.as_deref()).await;
                respond(op, &path, reply, res);
            }
            Request::GetData {
                path,
                namespace,
                reply,
            } => {
                let res = self.get_data(&path, namespace.as_deref()).await;
                respond(op, &path, reply, res);
            }
            Request::SetData {
                path,
                data,
                namespace,
                reply,
            } => {
                let res = self.set_data(&path, data, namespace.as_deref()).await;
                respond(op, &path, reply, res);
            }
            Request::GetChildren {
                path,
                include_data,
                namespace,
                reply,
            } => {
                let res = self
                    .get_children(&path, include_data, namespace.as_deref())
                    .await;
                respond(op, &path, reply, res);
            }
            Request::Exists {
                path,
                namespace,
                reply,
            } => {
                let res = self.exists(&path, namespace.as_deref()).await;
                respond(op, &path, reply, res);
            }
            Request::Close { reply } => {
                let _ = reply.send(self.client.close().await);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn create_node(
        &self,
        node_path: &str,
        ephemeral: bool,
        data: Option<Bytes>,
        namespace: Option<&str>,
    ) -> Result<String> {
        let full = self.namespaces.resolve(namespace, node_path)?;

        for ancestor in path::ancestors(&full) {
            if self.client.exists(ancestor).await? {
                continue;
            }
            match self
                .client
                .create(ancestor, CreateMode::Persistent, None)
                .await
            {
                Ok(_) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let created = self
            .client
            .create(&full, CreateMode::from_ephemeral(ephemeral), data)
            .await?;
        self.namespaces.relativize(namespace, &created)
    }

    async fn delete_node(&self, node_path: &str, namespace: Option<&str>) -> Result<String> {
        let full = self.namespaces.resolve(namespace, node_path)?;

        // Parents before children; deleted in reverse
        let mut order = vec![full.clone()];
        let mut idx = 0;
        while idx < order.len() {
            let parent = order[idx].clone();
            for child in self.client.list_children(&parent).await? {
                order.push(path::join(&parent, &child));
            }
            idx += 1;
        }

        for node in order.iter().rev() {
            match self.client.delete(node).await {
                // Descendant vanished on its own (ephemeral owner went away)
                Err(Error::PathNotFound(_)) if *node != full => {}
                other => other?,
            }
        }
        self.namespaces.relativize(namespace, &full)
    }

    async fn get_data(&self, node_path: &str, namespace: Option<&str>) -> Result<Option<Bytes>> {
        let full = self.namespaces.resolve(namespace, node_path)?;
        self.client.read(&full).await
    }

    async fn set_data(
        &self,
        node_path: &str,
        data: Option<Bytes>,
        namespace: Option<&str>,
    ) -> Result<String> {
        let full = self.namespaces.resolve(namespace, node_path)?;
        self.client.write(&full, data).await?;
        self.namespaces.relativize(namespace, &full)
    }

    async fn get_children(
        &self,
        node_path: &str,
        include_data: bool,
        namespace: Option<&str>,
    ) -> Result<Vec<ChildNode>> {
        let full = self.namespaces.resolve(namespace, node_path)?;
        let names = self.client.list_children(&full).await?;
        if !include_data {
            return Ok(names
                .into_iter()
                .map(|name| ChildNode::new(name, None))
                .collect());
        }

        let mut children = Vec::with_capacity(names.len());
        for name in names {
            match self.client.read(&path::join(&full, &name)).await {
                Ok(data) => children.push(ChildNode::new(name, data)),
                // Removed between the listing and the read
                Err(Error::PathNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(children)
    }

    async fn exists(&self, node_path: &str, namespace: Option<&str>) -> Result<bool> {
        let full = self.namespaces.resolve(namespace, node_path)?;
        self.client.exists(&full).await
    }
}

fn respond<T>(op: &'static str, path: &str, reply: Reply<T>, result: Result<T>) {
    match &result {
        Ok(_) => tracing::trace!(op, path, "Request completed"),
        Err(e) => tracing::debug!(op, path, error = %e, "Request failed"),
    }
    if reply.send(result).is_err() {
        tracing::trace!(op, path, "Caller went away before the reply");
    }
}

/// Cloneable front door to a [`CoordinationActor`]
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl CoordinatorHandle {
    fn submit<T>(&self, op: &'static str, build: impl FnOnce(Reply<T>) -> Request) -> Pending<T> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(build(reply)).is_err() {
            tracing::debug!(op, "Request submitted to a stopped actor");
        }
        Pending::new(op, rx)
    }

    /// Create a node, creating missing parents; resolves to the namespace-relative path
    pub fn create_node(
        &self,
        path: impl Into<String>,
        ephemeral: bool,
        data: Option<Bytes>,
        namespace: Option<&str>,
    ) -> Pending<String> {
        let namespace = namespace.map(str::to_string);
        self.submit("create_node", |reply| Request::CreateNode {
            path: path.into(),
            ephemeral,
            data,
            namespace,
            reply,
        })
    }

    /// Delete a node and everything below it
    pub fn delete_node(&self, path: impl Into<String>, namespace: Option<&str>) -> Pending<String> {
        let namespace = namespace.map(str::to_string);
        self.submit("delete_node", |reply| Request::DeleteNode {
            path: path.into(),
            namespace,
            reply,
        })
    }

    pub fn get_data(
        &self,
        path: impl Into<String>,
        namespace: Option<&str>,
    ) -> Pending<Option<Bytes>> {
        let namespace = namespace.map(str::to_string);
        self.submit("get_data", |reply| Request::GetData {
            path: path.into(),
            namespace,
            reply,
        })
    }

    pub fn set_data(
        &self,
        path: impl Into<String>,
        data: Option<Bytes>,
        namespace: Option<&str>,
    ) -> Pending<String> {
        let namespace = namespace.map(str::to_string);
        self.submit("set_data", |reply| Request::SetData {
            path: path.into(),
            data,
            namespace,
            reply,
        })
    }

    /// List children in order; with `include_data` each child's payload is read too
    pub fn get_children(
        &self,
        path: impl Into<String>,
        include_data: bool,
        namespace: Option<&str>,
    ) -> Pending<Vec<ChildNode>> {
        let namespace = namespace.map(str::to_string);
        self.submit("get_children", |reply| Request::GetChildren {
            path: path.into(),
            include_data,
            namespace,
            reply,
        })
    }

    pub fn exists(&self, path: impl Into<String>, namespace: Option<&str>) -> Pending<bool> {
        let namespace = namespace.map(str::to_string);
        self.submit("exists", |reply| Request::Exists {
            path: path.into(),
            namespace,
            reply,
        })
    }

    /// Close the ensemble session and stop the actor; queued requests after it fail with `Shutdown`
    pub fn close(&self) -> Pending<()> {
        self.submit("close", |reply| Request::Close { reply })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::MemEnsemble;
    use std::collections::HashMap;

    async fn start() -> (MemEnsemble, CoordinatorHandle) {
        let ensemble = MemEnsemble::new();
        let session = ensemble.connect().await.unwrap();
        let (handle, _task) = CoordinationActor::spawn(session, Namespaces::default());
        (ensemble, handle)
    }

    #[tokio::test]
    async fn test_create_creates_parents() {
        let (ensemble, handle) = start().await;
        let created = handle
            .create_node("/a/b/c", false, None, None)
            .await
            .unwrap();
        assert_eq!(created, "/a/b/c");
        assert!(ensemble.stat("/a").await.is_some());
        assert!(ensemble.stat("/a/b").await.is_some());
    }

    #[tokio::test]
    async fn test_namespace_is_stripped_from_results() {
        let (ensemble, handle) = start().await;
        let created = handle
            .create_node("/test", false, None, Some("space"))
            .await
            .unwrap();
        assert_eq!(created, "/test");
        assert!(ensemble.stat("/space/test").await.is_some());

        let mut prefixes = HashMap::new();
        prefixes.insert("tenant".to_string(), "/t/one".to_string());
        let session = ensemble.connect().await.unwrap();
        let (mapped, _task) = CoordinationActor::spawn(session, Namespaces::new(None, prefixes));
        mapped
            .create_node("/x", false, None, Some("tenant"))
            .await
            .unwrap();
        assert!(ensemble.stat("/t/one/x").await.is_some());
    }

    #[tokio::test]
    async fn test_delete_is_recursive() {
        let (ensemble, handle) = start().await;
        handle.create_node("/r/a/b", false, None, None).await.unwrap();
        handle.create_node("/r/c", false, None, None).await.unwrap();

        assert_eq!(handle.delete_node("/r", None).await.unwrap(), "/r");
        assert!(ensemble.stat("/r").await.is_none());
        assert!(ensemble.stat("/r/a/b").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let (_ensemble, handle) = start().await;
        assert!(matches!(
            handle.get_data("relative", None).await,
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            handle.create_node("/a/", false, None, None).await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_close_ends_session() {
        let (ensemble, handle) = start().await;
        handle.create_node("/eph", true, None, None).await.unwrap();
        assert_eq!(ensemble.session_count().await, 1);

        handle.close().await.unwrap();
        assert!(ensemble.stat("/eph").await.is_none());
        assert_eq!(ensemble.session_count().await, 0);
        assert!(matches!(
            handle.exists("/", None).await,
            Err(Error::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_requests_queued_behind_close_are_refused() {
        let (ensemble, handle) = start().await;

        let close = handle.close();
        let late = handle.create_node("/late", false, None, None);
        close.await.unwrap();
        assert!(matches!(late.await, Err(Error::Shutdown)));
        assert!(ensemble.stat("/late").await.is_none());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_dropping_handles_closes_session() {
        let ensemble = MemEnsemble::new();
        let session = ensemble.connect().await.unwrap();
        let (handle, task) = CoordinationActor::spawn(session, Namespaces::default());
        handle.create_node("/eph", true, None, None).await.unwrap();

        drop(handle);
        task.await.unwrap();
        assert!(ensemble.stat("/eph").await.is_none());
    }

    #[tokio::test]
    async fn test_requests_processed_in_submission_order() {
        let (_ensemble, handle) = start().await;
        handle.create_node("/seq", false, None, None).await.unwrap();

        let pending: Vec<_> = (0..20u8)
            .map(|i| handle.set_data("/seq", Some(Bytes::from(vec![i])), None))
            .collect();
        let read = handle.get_data("/seq", None);
        for p in pending {
            p.await.unwrap();
        }
        assert_eq!(read.await.unwrap(), Some(Bytes::from(vec![19u8])));
    }
}
