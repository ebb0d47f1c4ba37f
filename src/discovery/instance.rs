//! Service instance records
//!
//! Instances live at `<base_path>/<service_name>/<instance_id>` and carry a
//! JSON payload.

use crate::common::path;
use crate::common::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How long an instance record outlives its registering session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Ephemeral record, removed with the session
    #[default]
    Dynamic,
    /// Persistent record, removed only by unregistering
    Static,
}

impl ServiceType {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, ServiceType::Dynamic)
    }
}

/// Identity of one registered instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub base_path: String,
    pub service_name: String,
    pub instance_id: String,
}

impl InstanceKey {
    pub fn new(
        base_path: impl Into<String>,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            service_name: service_name.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn service_path(&self) -> String {
        service_path(&self.base_path, &self.service_name)
    }

    pub fn instance_path(&self) -> String {
        path::join(&self.service_path(), &self.instance_id)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instance_path())
    }
}

pub fn service_path(base_path: &str, service_name: &str) -> String {
    path::join(base_path, service_name)
}

/// Template producing an instance URI.
///
/// Placeholders: `{scheme}`, `{name}`, `{id}`, `{address}`, `{port}`,
/// `{ssl-port}` and any key of the instance payload. Unknown placeholders are
/// left as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UriSpec(String);

impl UriSpec {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn template(&self) -> &str {
        &self.0
    }

    pub fn build(&self, instance: &ServiceInstance) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let name = &after[..close];
            match resolve_placeholder(name, instance) {
                Some(value) => out.push_str(&value),
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

fn resolve_placeholder(name: &str, instance: &ServiceInstance) -> Option<String> {
    match name {
        "scheme" => Some(if instance.ssl_port.is_some() { "https" } else { "http" }.to_string()),
        "name" => Some(instance.name.clone()),
        "id" => Some(instance.id.clone()),
        "address" => instance.address.clone(),
        "port" => Some(instance.port.to_string()),
        "ssl-port" => instance.ssl_port.map(|p| p.to_string()),
        other => instance.payload.get(other).cloned(),
    }
}

/// A registered, discoverable service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub address: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub ssl_port: Option<u16>,
    /// Free-form metadata
    #[serde(default)]
    pub payload: HashMap<String, String>,
    pub registration_time_utc: u64,
    #[serde(default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub uri_spec: Option<UriSpec>,
    #[serde(default)]
    pub weight: u64,
}

impl ServiceInstance {
    pub fn key(&self, base_path: &str) -> InstanceKey {
        InstanceKey::new(base_path, &self.name, &self.id)
    }

    /// Resolved URI, if the instance carries a template
    pub fn build_uri(&self) -> Option<String> {
        self.uri_spec.as_ref().map(|spec| spec.build(self))
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidRecord {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}
