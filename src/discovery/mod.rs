//! Discoverable services
//!
//! Processes register themselves as weighted instances under
//! `<base_path>/<service_name>/<instance_id>`; other processes query those
//! records. Registered instances start with weight 0; a [`WeightRefresher`]
//! task can republish the weight periodically.

pub mod instance;
pub mod refresh;
pub mod registry;

pub use instance::{InstanceKey, ServiceInstance, ServiceType, UriSpec};
pub use refresh::{
    weight_fn, FixedWeight, FnWeight, RefreshState, RefreshStatus, WeightPolicy, WeightRefresher,
};
pub use registry::InstanceRegistry;

use crate::common::{timestamp_now_millis, Config, Result};
use crate::coordinator::CoordinatorHandle;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything needed to make one instance discoverable
#[derive(Clone)]
pub struct Registration {
    service_name: String,
    port: u16,
    base_path: Option<String>,
    instance_id: Option<String>,
    address: Option<String>,
    ssl_port: Option<u16>,
    metadata: HashMap<String, String>,
    uri_spec: Option<UriSpec>,
    service_type: ServiceType,
    overwrite: bool,
    refresh: Option<(Arc<dyn WeightPolicy>, Option<Duration>)>,
}

impl Registration {
    pub fn new(service_name: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            port,
            base_path: None,
            instance_id: None,
            address: None,
            ssl_port: None,
            metadata: HashMap::new(),
            uri_spec: None,
            service_type: ServiceType::Dynamic,
            overwrite: false,
            refresh: None,
        }
    }

    /// Defaults to the configured discovery base path
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    /// Defaults to a random UUID
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn ssl_port(mut self, port: u16) -> Self {
        self.ssl_port = Some(port);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn uri_spec(mut self, spec: UriSpec) -> Self {
        self.uri_spec = Some(spec);
        self
    }

    pub fn service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = service_type;
        self
    }

    /// Replace an existing record with the same identity instead of failing
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Refresh the weight with `policy` at the configured interval
    pub fn refresh_with(mut self, policy: Arc<dyn WeightPolicy>) -> Self {
        self.refresh = Some((policy, None));
        self
    }

    /// Refresh the weight with `policy` every `interval`
    pub fn refresh_every(mut self, policy: Arc<dyn WeightPolicy>, interval: Duration) -> Self {
        self.refresh = Some((policy, Some(interval)));
        self
    }
}

/// Registration, queries, weight updates and refresh scheduling behind one handle
pub struct ServiceDiscovery {
    registry: InstanceRegistry,
    refresher: WeightRefresher,
    base_path: String,
    refresh_interval: Duration,
}

impl ServiceDiscovery {
    pub fn new(coordinator: CoordinatorHandle, config: &Config) -> Self {
        let registry = InstanceRegistry::new(coordinator, config.request_timeout());
        Self::from_registry(
            registry,
            config.discovery.base_path.clone(),
            config.discovery.refresh_interval(),
        )
    }

    pub fn from_registry(
        registry: InstanceRegistry,
        base_path: impl Into<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            refresher: WeightRefresher::new(registry.clone()),
            registry,
            base_path: base_path.into(),
            refresh_interval,
        }
    }

    /// Keep every record under the given namespace
    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        let registry = self.registry.with_namespace(namespace);
        Self::from_registry(registry, self.base_path, self.refresh_interval)
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn refresher(&self) -> &WeightRefresher {
        &self.refresher
    }

    pub fn default_base_path(&self) -> &str {
        &self.base_path
    }

    /// Register an instance with weight 0 and start its refresh task if requested
    pub async fn make_discoverable(&self, registration: Registration) -> Result<ServiceInstance> {
        let base_path = registration
            .base_path
            .unwrap_or_else(|| self.base_path.clone());
        let instance = ServiceInstance {
            name: registration.service_name,
            id: registration
                .instance_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            address: registration.address,
            port: registration.port,
            ssl_port: registration.ssl_port,
            payload: registration.metadata,
            registration_time_utc: timestamp_now_millis(),
            service_type: registration.service_type,
            uri_spec: registration.uri_spec,
            weight: 0,
        };

        // Settle the refresh interval before anything is written
        let refresh = registration
            .refresh
            .map(|(policy, interval)| (policy, interval.unwrap_or(self.refresh_interval)));
        if let Some((_, interval)) = &refresh {
            refresh::validate_interval(*interval)?;
        }

        let instance = self
            .registry
            .register(&base_path, instance, registration.overwrite)
            .await?;

        if let Some((policy, interval)) = refresh {
            self.refresher
                .schedule(instance.key(&base_path), interval, policy)
                .await?;
        }
        Ok(instance)
    }

    pub async fn query_for_instance(
        &self,
        base_path: &str,
        service_name: &str,
        instance_id: &str,
    ) -> Result<ServiceInstance> {
        self.registry
            .query_for_instance(base_path, service_name, instance_id)
            .await
    }

    pub async fn query_for_instances(
        &self,
        base_path: &str,
        service_name: &str,
    ) -> Result<Vec<ServiceInstance>> {
        self.registry
            .query_for_instances(base_path, service_name)
            .await
    }

    pub async fn query_for_names(&self, base_path: &str) -> Result<Vec<String>> {
        self.registry.query_for_names(base_path).await
    }

    /// Overwrite the weight; the refresh timer keeps its cadence
    pub async fn update_weight(
        &self,
        weight: u64,
        base_path: &str,
        service_name: &str,
        instance_id: &str,
    ) -> Result<ServiceInstance> {
        self.registry
            .update_weight(weight, base_path, service_name, instance_id)
            .await
    }

    /// Cancel the instance's refresh task and remove its record
    pub async fn unregister(
        &self,
        base_path: &str,
        service_name: &str,
        instance_id: &str,
    ) -> Result<()> {
        let key = InstanceKey::new(base_path, service_name, instance_id);
        self.refresher.cancel(&key).await;
        self.registry
            .unregister(base_path, service_name, instance_id)
            .await
    }

    /// Stop every refresh task; records stay until their session ends
    pub async fn close(&self) {
        self.refresher.shutdown().await;
    }
}
