//! Requests accepted by the coordination actor and the handles their replies arrive on

use crate::common::{Error, Result};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<Result<T>>;

/// A child entry returned by `get_children`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNode {
    pub name: String,
    /// Absent when data was not requested or the child carries none
    pub data: Option<Bytes>,
}

impl ChildNode {
    pub fn new(name: impl Into<String>, data: Option<Bytes>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug)]
pub enum Request {
    CreateNode {
        path: String,
        ephemeral: bool,
        data: Option<Bytes>,
        namespace: Option<String>,
        reply: Reply<String>,
    },
    DeleteNode {
        path: String,
        namespace: Option<String>,
        reply: Reply<String>,
    },
    GetData {
        path: String,
        namespace: Option<String>,
        reply: Reply<Option<Bytes>>,
    },
    SetData {
        path: String,
        data: Option<Bytes>,
        namespace: Option<String>,
        reply: Reply<String>,
    },
    GetChildren {
        path: String,
        include_data: bool,
        namespace: Option<String>,
        reply: Reply<Vec<ChildNode>>,
    },
    Exists {
        path: String,
        namespace: Option<String>,
        reply: Reply<bool>,
    },
    Close {
        reply: Reply<()>,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateNode { .. } => "create_node",
            Request::DeleteNode { .. } => "delete_node",
            Request::GetData { .. } => "get_data",
            Request::SetData { .. } => "set_data",
            Request::GetChildren { .. } => "get_children",
            Request::Exists { .. } => "exists",
            Request::Close { .. } => "close",
        }
    }
}

/// Reply slot for one submitted request.
///
/// Await it directly, or use [`Pending::wait`] to bound the wait. A timed-out
/// wait does not cancel the request; the actor still runs it.
#[must_use = "a pending reply does nothing unless awaited"]
pub struct Pending<T> {
    op: &'static str,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    pub(crate) fn new(op: &'static str, rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { op, rx }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Wait for the reply, failing with `Timeout` after `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<T> {
        let op = self.op;
        tokio::time::timeout(timeout, self)
            .await
            .map_err(|_| Error::Timeout(format!("{} did not complete within {:?}", op, timeout)))?
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(Error::Shutdown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_resolves() {
        let (tx, rx) = oneshot::channel();
        let pending = Pending::new("get_data", rx);
        tx.send(Ok(7u32)).unwrap();
        assert_eq!(pending.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_pending_dropped_sender_is_shutdown() {
        let (tx, rx) = oneshot::channel::<Result<()>>();
        drop(tx);
        assert!(matches!(
            Pending::new("close", rx).await,
            Err(Error::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_pending_wait_times_out() {
        let (_tx, rx) = oneshot::channel::<Result<()>>();
        let err = Pending::new("set_data", rx)
            .wait(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(msg) if msg.contains("set_data")));
    }
}
