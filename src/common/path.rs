//! Node path helpers and namespace resolution
//!
//! Paths are absolute (`/a/b`), never end with `/` (except the root) and
//! contain no empty, `.` or `..` segments. Namespaces map a caller-visible
//! path onto a prefix inside the ensemble; resolution is a pure function.

use crate::common::config::NamespaceConfig;
use crate::common::{Error, Result};
use std::collections::HashMap;

pub const ROOT: &str = "/";

/// Validate an absolute node path
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath("path cannot be empty".into()));
    }
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(format!("path must be absolute: {}", path)));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(Error::InvalidPath(format!(
            "path must not end with '/': {}",
            path
        )));
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidPath(format!(
                "invalid segment {:?} in {}",
                segment, path
            )));
        }
        if segment.chars().any(|c| c.is_control()) {
            return Err(Error::InvalidPath(format!(
                "control character in {}",
                path
            )));
        }
    }
    Ok(())
}

/// Join a child name onto a parent path
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent of a path; `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Every proper ancestor of `path`, outermost first, root excluded
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        if p == ROOT {
            break;
        }
        out.push(p);
        current = parent(p);
    }
    out.reverse();
    out
}

/// Resolves `(namespace, path)` pairs onto absolute ensemble paths
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    default: Option<String>,
    prefixes: HashMap<String, String>,
}

impl Namespaces {
    pub fn new(default: Option<String>, prefixes: HashMap<String, String>) -> Self {
        Self { default, prefixes }
    }

    pub fn from_config(config: &NamespaceConfig) -> Self {
        Self::new(config.default.clone(), config.prefixes.clone())
    }

    /// Prefix for a namespace; empty string means the ensemble root
    pub fn prefix(&self, namespace: Option<&str>) -> Result<String> {
        let Some(ns) = namespace.or(self.default.as_deref()) else {
            return Ok(String::new());
        };
        if let Some(prefix) = self.prefixes.get(ns) {
            validate_path(prefix)?;
            return Ok(if prefix == ROOT {
                String::new()
            } else {
                prefix.clone()
            });
        }
        if ns.is_empty() || ns.contains('/') || ns == "." || ns == ".." {
            return Err(Error::InvalidPath(format!("invalid namespace: {:?}", ns)));
        }
        Ok(format!("/{}", ns))
    }

    /// Map a namespace-relative path onto its absolute ensemble path
    pub fn resolve(&self, namespace: Option<&str>, path: &str) -> Result<String> {
        validate_path(path)?;
        let prefix = self.prefix(namespace)?;
        Ok(if prefix.is_empty() {
            path.to_string()
        } else if path == ROOT {
            prefix
        } else {
            format!("{}{}", prefix, path)
        })
    }

    /// Strip the namespace prefix from an absolute ensemble path
    pub fn relativize(&self, namespace: Option<&str>, absolute: &str) -> Result<String> {
        let prefix = self.prefix(namespace)?;
        let relative = absolute.strip_prefix(prefix.as_str()).unwrap_or(absolute);
        Ok(if relative.is_empty() {
            ROOT.to_string()
        } else {
            relative.to_string()
        })
    }
}
