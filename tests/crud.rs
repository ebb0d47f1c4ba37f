//! Node operations through the coordination actor against the in-memory ensemble

use bytes::Bytes;
use coordkit::ensemble::MemSession;
use coordkit::{
    ChildNode, CoordinationActor, CoordinationClient, CoordinatorHandle, CreateMode, Error,
    MemEnsemble, Namespaces, Result,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok, assert_pending};

async fn start() -> (MemEnsemble, CoordinatorHandle) {
    let ensemble = MemEnsemble::new();
    let session = ensemble.connect().await.unwrap();
    let (handle, _task) = CoordinationActor::spawn(session, Namespaces::default());
    (ensemble, handle)
}

#[tokio::test]
async fn test_create_get_children_scenario() {
    let (_ensemble, handle) = start().await;

    let created = assert_ok!(
        handle
            .create_node("/test", false, Some(Bytes::from("data")), None)
            .await
    );
    assert_eq!(created, "/test");
    let data = assert_ok!(handle.get_data("/test", None).await);
    assert_eq!(data, Some(Bytes::from("data")));

    assert_ok!(handle.create_node("/test/child", false, None, None).await);
    let children = assert_ok!(handle.get_children("/test", false, None).await);
    assert_eq!(children, vec![ChildNode::new("child", None)]);

    assert_ok!(
        handle
            .set_data("/test/child", Some(Bytes::from("data")), None)
            .await
    );
    let children = assert_ok!(handle.get_children("/test", false, None).await);
    assert_eq!(children, vec![ChildNode::new("child", None)]);
    let children = assert_ok!(handle.get_children("/test", true, None).await);
    assert_eq!(
        children,
        vec![ChildNode::new("child", Some(Bytes::from("data")))]
    );
}

#[tokio::test]
async fn test_children_are_ordered_and_data_is_per_child() {
    let (_ensemble, handle) = start().await;
    handle.create_node("/p", false, None, None).await.unwrap();
    for (name, data) in [("c", Some("three")), ("a", Some("one")), ("b", None)] {
        handle
            .create_node(format!("/p/{}", name), false, data.map(Bytes::from), None)
            .await
            .unwrap();
    }

    let children = handle.get_children("/p", true, None).await.unwrap();
    assert_eq!(
        children,
        vec![
            ChildNode::new("a", Some(Bytes::from("one"))),
            ChildNode::new("b", None),
            ChildNode::new("c", Some(Bytes::from("three"))),
        ]
    );
}

#[tokio::test]
async fn test_delete_then_get_fails() {
    let (_ensemble, handle) = start().await;
    handle
        .create_node("/gone", false, Some(Bytes::from("x")), None)
        .await
        .unwrap();

    assert_eq!(handle.delete_node("/gone", None).await.unwrap(), "/gone");
    let err = assert_err!(handle.get_data("/gone", None).await);
    assert!(matches!(err, Error::PathNotFound(_)));
    assert!(!handle.exists("/gone", None).await.unwrap());
}

#[tokio::test]
async fn test_missing_path_and_duplicate_create() {
    let (_ensemble, handle) = start().await;
    assert!(matches!(
        handle.set_data("/nope", None, None).await,
        Err(Error::PathNotFound(_))
    ));
    assert!(matches!(
        handle.delete_node("/nope", None).await,
        Err(Error::PathNotFound(_))
    ));
    assert!(matches!(
        handle.get_children("/nope", false, None).await,
        Err(Error::PathNotFound(_))
    ));

    handle.create_node("/dup", false, None, None).await.unwrap();
    assert!(matches!(
        handle.create_node("/dup", false, None, None).await,
        Err(Error::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let (ensemble, handle) = start().await;
    handle
        .create_node("/test", false, Some(Bytes::from("plain")), None)
        .await
        .unwrap();
    handle
        .create_node("/test", false, Some(Bytes::from("spaced")), Some("space"))
        .await
        .unwrap();

    handle
        .set_data("/test", Some(Bytes::from("changed")), Some("space"))
        .await
        .unwrap();

    assert_eq!(
        handle.get_data("/test", None).await.unwrap(),
        Some(Bytes::from("plain"))
    );
    assert_eq!(
        handle.get_data("/test", Some("space")).await.unwrap(),
        Some(Bytes::from("changed"))
    );
    assert!(ensemble.stat("/space/test").await.is_some());

    handle.delete_node("/test", Some("space")).await.unwrap();
    assert!(handle.exists("/test", None).await.unwrap());
}

#[tokio::test]
async fn test_default_namespace_applies_without_explicit_one() {
    let ensemble = MemEnsemble::new();
    let mut prefixes = HashMap::new();
    prefixes.insert("tenant".to_string(), "/tenants/acme".to_string());
    let session = ensemble.connect().await.unwrap();
    let (handle, _task) = CoordinationActor::spawn(
        session,
        Namespaces::new(Some("tenant".to_string()), prefixes),
    );

    let created = handle
        .create_node("/cfg", false, Some(Bytes::from("1")), None)
        .await
        .unwrap();
    assert_eq!(created, "/cfg");
    assert!(ensemble.stat("/tenants/acme/cfg").await.is_some());
    assert!(ensemble.stat("/cfg").await.is_none());
}

#[tokio::test]
async fn test_unreachable_ensemble_reports_connection_error() {
    let (ensemble, handle) = start().await;
    handle.create_node("/up", false, None, None).await.unwrap();

    ensemble.set_available(false);
    assert!(matches!(
        handle.get_data("/up", None).await,
        Err(Error::ConnectionError(_))
    ));
    assert!(matches!(
        handle.create_node("/down", false, None, None).await,
        Err(Error::ConnectionError(_))
    ));

    ensemble.set_available(true);
    assert!(handle.exists("/up", None).await.unwrap());
    assert!(!handle.exists("/down", None).await.unwrap());
}

#[tokio::test]
async fn test_expired_session_reports_connection_error() {
    let ensemble = MemEnsemble::new();
    let session = ensemble.connect().await.unwrap();
    let id = session.id();
    let (handle, _task) = CoordinationActor::spawn(session, Namespaces::default());
    handle.create_node("/eph", true, None, None).await.unwrap();

    ensemble.expire_session(id).await;
    assert!(ensemble.stat("/eph").await.is_none());
    assert!(matches!(
        handle.exists("/", None).await,
        Err(Error::ConnectionError(_))
    ));
}

#[tokio::test]
async fn test_submission_does_not_block_the_caller() {
    let (_ensemble, handle) = start().await;

    // The actor has not run yet on this single-threaded runtime
    let mut pending = tokio_test::task::spawn(handle.create_node("/later", false, None, None));
    assert_pending!(pending.poll());

    assert_eq!(pending.await.unwrap(), "/later");
}

/// Delays every create to keep the actor busy
struct SlowCreates(MemSession);

impl CoordinationClient for SlowCreates {
    async fn create(&self, path: &str, mode: CreateMode, data: Option<Bytes>) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.0.create(path, mode, data).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.0.delete(path).await
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        self.0.read(path).await
    }

    async fn write(&self, path: &str, data: Option<Bytes>) -> Result<()> {
        self.0.write(path, data).await
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        self.0.list_children(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.0.exists(path).await
    }

    async fn close(&self) -> Result<()> {
        self.0.close().await
    }
}

#[tokio::test]
async fn test_wait_times_out_locally() {
    let ensemble = MemEnsemble::new();
    let session = ensemble.connect().await.unwrap();
    let (handle, _task) = CoordinationActor::spawn(SlowCreates(session), Namespaces::default());

    let err = handle
        .create_node("/slow", false, None, None)
        .wait(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    // The operation itself still completes
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(ensemble.stat("/slow").await.is_some());
}
