//! Instance registry
//!
//! The ensemble is the source of truth. The registry writes and reads instance
//! records through the coordination actor and keeps the last record it saw
//! per instance as a local, possibly stale, view.

use bytes::Bytes;
use crate::common::{path, Error, Result};
use crate::coordinator::CoordinatorHandle;
use crate::discovery::instance::{service_path, InstanceKey, ServiceInstance};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Delete-then-create rounds before an overwrite gives up to a racing registrant
const MAX_REPLACE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct InstanceRegistry {
    coordinator: CoordinatorHandle,
    namespace: Option<String>,
    request_timeout: Duration,
    cache: Arc<RwLock<HashMap<InstanceKey, ServiceInstance>>>,
}

impl InstanceRegistry {
    pub fn new(coordinator: CoordinatorHandle, request_timeout: Duration) -> Self {
        Self {
            coordinator,
            namespace: None,
            request_timeout,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Keep every record under the given namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn ns(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Whether the underlying coordinator has stopped
    pub fn is_closed(&self) -> bool {
        self.coordinator.is_closed()
    }

    /// Write a new instance record; with `overwrite` an existing record is replaced
    pub async fn register(
        &self,
        base_path: &str,
        instance: ServiceInstance,
        overwrite: bool,
    ) -> Result<ServiceInstance> {
        path::validate_path(base_path)?;
        let key = instance.key(base_path);
        let node = key.instance_path();
        let payload = instance.to_bytes()?;

        let ephemeral = instance.service_type.is_ephemeral();
        match self.create(&node, ephemeral, payload.clone()).await {
            Ok(_) => {}
            Err(Error::AlreadyExists(_)) if overwrite => {
                self.replace(&node, ephemeral, payload).await?;
                tracing::info!(instance = %key, "Replaced existing instance record");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            instance = %key,
            port = instance.port,
            service_type = ?instance.service_type,
            "Instance registered"
        );
        self.cache.write().await.insert(key, instance.clone());
        Ok(instance)
    }

    async fn create(&self, node: &str, ephemeral: bool, payload: Bytes) -> Result<String> {
        self.coordinator
            .create_node(node, ephemeral, Some(payload), self.ns())
            .wait(self.request_timeout)
            .await
    }

    /// Recreate `node` so it takes this session as owner and the new create mode
    async fn replace(&self, node: &str, ephemeral: bool, payload: Bytes) -> Result<()> {
        for _ in 0..MAX_REPLACE_ATTEMPTS {
            match self
                .coordinator
                .delete_node(node, self.ns())
                .wait(self.request_timeout)
                .await
            {
                Ok(_) | Err(Error::PathNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            match self.create(node, ephemeral, payload.clone()).await {
                Ok(_) => return Ok(()),
                Err(Error::AlreadyExists(_)) => {
                    tracing::debug!(path = %node, "Instance record recreated concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::AlreadyExists(node.to_string()))
    }

    /// Current record of one instance, read from the ensemble
    pub async fn query_for_instance(
        &self,
        base_path: &str,
        service_name: &str,
        instance_id: &str,
    ) -> Result<ServiceInstance> {
        let key = InstanceKey::new(base_path, service_name, instance_id);
        let node = key.instance_path();
        let data = match self
            .coordinator
            .get_data(&node, self.ns())
            .wait(self.request_timeout)
            .await
        {
            Ok(data) => data,
            Err(e @ Error::PathNotFound(_)) => {
                self.cache.write().await.remove(&key);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let data = data.ok_or_else(|| Error::InvalidRecord {
                path: node.clone(),
                reason: "node carries no data".into(),
            })?;
        let instance = ServiceInstance::from_bytes(&node, &data)?;
        self.cache.write().await.insert(key, instance.clone());
        Ok(instance)
    }

    /// Every instance currently registered for a service; empty when the service is unknown
    pub async fn query_for_instances(
        &self,
        base_path: &str,
        service_name: &str,
    ) -> Result<Vec<ServiceInstance>> {
        let service = service_path(base_path, service_name);
        let children = match self
            .coordinator
            .get_children(&service, true, self.ns())
            .wait(self.request_timeout)
            .await
        {
            Ok(children) => children,
            Err(Error::PathNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut instances = Vec::with_capacity(children.len());
        for child in children {
            let node = path::join(&service, &child.name);
            let Some(data) = child.data else {
                tracing::warn!(path = %node, "Skipping instance node without data");
                continue;
            };
            match ServiceInstance::from_bytes(&node, &data) {
                Ok(instance) => instances.push(instance),
                Err(e) => tracing::warn!(path = %node, error = %e, "Skipping unreadable instance"),
            }
        }

        // The listing is authoritative for this service
        let mut cache = self.cache.write().await;
        cache.retain(|k, _| !(k.base_path == base_path && k.service_name == service_name));
        for instance in &instances {
            cache.insert(instance.key(base_path), instance.clone());
        }
        Ok(instances)
    }

    /// Names of the services registered under `base_path`
    pub async fn query_for_names(&self, base_path: &str) -> Result<Vec<String>> {
        match self
            .coordinator
            .get_children(base_path, false, self.ns())
            .wait(self.request_timeout)
            .await
        {
            Ok(children) => Ok(children.into_iter().map(|c| c.name).collect()),
            Err(Error::PathNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Overwrite an instance's weight; visible to queries once this returns
    pub async fn update_weight(
        &self,
        weight: u64,
        base_path: &str,
        service_name: &str,
        instance_id: &str,
    ) -> Result<ServiceInstance> {
        let mut instance = self
            .query_for_instance(base_path, service_name, instance_id)
            .await?;
        instance.weight = weight;

        let key = instance.key(base_path);
        let written = self
            .coordinator
            .set_data(key.instance_path(), Some(instance.to_bytes()?), self.ns())
            .wait(self.request_timeout)
            .await;
        if let Err(e) = written {
            if matches!(e, Error::PathNotFound(_)) {
                self.cache.write().await.remove(&key);
            }
            return Err(e);
        }

        tracing::debug!(instance = %key, weight, "Instance weight updated");
        self.cache.write().await.insert(key, instance.clone());
        Ok(instance)
    }

    /// Remove an instance record; a record that is already gone is not an error
    pub async fn unregister(
        &self,
        base_path: &str,
        service_name: &str,
        instance_id: &str,
    ) -> Result<()> {
        let key = InstanceKey::new(base_path, service_name, instance_id);
        match self
            .coordinator
            .delete_node(key.instance_path(), self.ns())
            .wait(self.request_timeout)
            .await
        {
            Ok(_) | Err(Error::PathNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        tracing::info!(instance = %key, "Instance unregistered");
        self.cache.write().await.remove(&key);
        Ok(())
    }

    /// Last record this process saw for an instance
    pub async fn cached(&self, key: &InstanceKey) -> Option<ServiceInstance> {
        self.cache.read().await.get(key).cloned()
    }
}
