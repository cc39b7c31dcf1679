//! Namespaced object keys

use std::fmt;

use kube::Resource;

use crate::error::StoreError;

/// Namespace + name address of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectKey {
    /// Creates a key from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object, failing if namespace or name is unset.
    pub fn for_object<K: Resource>(obj: &K) -> Result<Self, StoreError> {
        let meta = obj.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| StoreError::InvalidObject("missing .metadata.name".to_string()))?;
        let namespace = meta
            .namespace
            .clone()
            .ok_or_else(|| {
                StoreError::InvalidObject(format!("{name}: missing .metadata.namespace"))
            })?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
